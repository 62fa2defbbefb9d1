//! Desired per-interface DNS state
//!
//! Turns the filtered network list of one pass into the set of
//! [`DesiredInterfaceState`]s handed to the active backend.

use crate::config::DesiredStateOptions;
use crate::reverse::reverse_domains;
use crate::traits::{DesiredInterfaceState, NetworkDescriptor};
use std::collections::HashSet;
use std::net::IpAddr;
use tracing::{debug, warn};

/// Derive the desired state for every network that has something to configure
///
/// Networks without an interface or without usable DNS servers produce no
/// entry. When two networks claim the same interface the first one wins.
pub fn derive_desired(
    networks: &[NetworkDescriptor],
    options: &DesiredStateOptions,
) -> Vec<DesiredInterfaceState> {
    let mut seen = HashSet::new();
    let mut desired = Vec::new();

    for network in networks {
        if network.interface.is_empty() {
            warn!("Network {} ({}) has no interface, skipping", network.id, network.name);
            continue;
        }

        let Some(state) = derive_one(network, options) else {
            continue;
        };

        if !seen.insert(state.interface.clone()) {
            warn!(
                "Interface {} already claimed by another network, ignoring network {}",
                state.interface, network.id
            );
            continue;
        }

        desired.push(state);
    }

    desired
}

fn derive_one(
    network: &NetworkDescriptor,
    options: &DesiredStateOptions,
) -> Option<DesiredInterfaceState> {
    let mut servers: Vec<IpAddr> = Vec::new();
    for raw in &network.dns_servers {
        match raw.trim().parse::<IpAddr>() {
            Ok(addr) if !servers.contains(&addr) => servers.push(addr),
            Ok(_) => {}
            Err(_) => warn!(
                "Ignoring invalid DNS server {:?} on network {}",
                raw, network.id
            ),
        }
    }

    if servers.is_empty() {
        debug!(
            "Network {} on {} advertises no DNS servers",
            network.id, network.interface
        );
        return None;
    }

    let mut state = DesiredInterfaceState::new(&network.interface);
    state.network_id = network.id.clone();
    state.network_name = network.name.clone();
    state.dns_servers = servers;
    state.dns_over_tls = options.dns_over_tls;
    state.multicast_dns = options.multicast_dns;

    if let Some(domain) = network.dns_domain.as_deref().map(str::trim)
        && !domain.is_empty()
    {
        state.domains.insert(domain.trim_end_matches('.').to_string());
    }

    if options.add_reverse_domains {
        state
            .domains
            .extend(reverse_domains(&network.assigned_addresses));
    }

    Some(state)
}
