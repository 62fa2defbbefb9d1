// # systemd-resolved Backend
//
// This crate provides the live-service DNS backend for ztdns.
//
// ## Architecture
//
// Desired state is pushed into the running resolver as per-link runtime
// settings. Every pass re-reads the current settings from the host and only
// mutates what differs (set equality, order ignored).
//
// ## Ownership
//
// Before the first mutation of an interface its existing settings are
// captured in the [`ManagedInterfaceStore`]. Only records flagged `changed`
// are ever reverted: on departure from the desired set, after a directory
// failure and at shutdown. A revert of an interface that no longer exists
// counts as success.
//
// DNS-over-TLS and multicast DNS are only ever switched on. A toggle that is
// off in the desired state leaves the link's current mode untouched.

pub mod host;
pub mod parse;

pub use host::{Link, ResolverHost, SystemResolver};

use async_trait::async_trait;
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};
use ztdns_core::state::{InterfaceSnapshot, ManagedInterfaceRecord, ManagedInterfaceStore};
use ztdns_core::traits::{DesiredInterfaceState, DnsBackend, ReconcileReport};
use ztdns_core::{Error, Result};

/// Per-link mode written when DNS-over-TLS or mDNS is wanted
const ENABLED: &str = "yes";

/// Live-service DNS backend
pub struct ResolvedBackend {
    /// Resolver access
    host: Arc<dyn ResolverHost>,

    /// Pre-change state of every interface touched
    store: ManagedInterfaceStore,

    /// Compute but do not mutate
    dry_run: bool,
}

impl ResolvedBackend {
    /// Create a backend talking to systemd-resolved
    pub fn new() -> Self {
        Self::with_host(Arc::new(SystemResolver::new()))
    }

    /// Create a backend with a specific resolver host
    pub fn with_host(host: Arc<dyn ResolverHost>) -> Self {
        Self {
            host,
            store: ManagedInterfaceStore::new(),
            dry_run: false,
        }
    }

    /// Log instead of mutating the resolver
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Handle to the managed-interface store
    pub fn store(&self) -> &ManagedInterfaceStore {
        &self.store
    }

    /// Bring one interface to its desired state
    ///
    /// Returns whether anything was mutated.
    async fn apply(&self, desired: &DesiredInterfaceState) -> Result<bool> {
        let name = desired.interface.as_str();
        let index = self
            .host
            .link_index(name)
            .await?
            .ok_or_else(|| Error::backend(format!("Interface {} not present", name)))?;
        let link = Link { name, index };

        let current = self.host.query(name).await?;

        let dns_differs = current.dns_servers != desired.dns_server_set();
        let domains_differ = current.domains != desired.domains;
        // a toggle left off keeps whatever mode the host already has
        let dot_differs = desired.dns_over_tls && current.dns_over_tls.as_deref() != Some(ENABLED);
        let mdns_differs =
            desired.multicast_dns && current.multicast_dns.as_deref() != Some(ENABLED);

        if !(dns_differs || domains_differ || dot_differs || mdns_differs) {
            debug!("{} already matches desired DNS", name);
            return Ok(false);
        }

        if self.dry_run {
            info!(
                "[dry-run] Would update {}: dns={} domains={} dot={} mdns={}",
                name, dns_differs, domains_differ, dot_differs, mdns_differs
            );
            return Ok(true);
        }

        if self.store.capture(name, current).await {
            debug!("Captured original DNS state of {}", name);
        }

        let mut mutated = false;
        let result = async {
            if dns_differs {
                self.host.set_dns(link, &desired.dns_servers).await?;
                mutated = true;
            }
            if domains_differ {
                self.host.set_domains(link, &desired.domains).await?;
                mutated = true;
            }
            if dot_differs {
                self.host.set_dns_over_tls(link, ENABLED).await?;
                mutated = true;
            }
            if mdns_differs {
                self.host.set_multicast_dns(link, ENABLED).await?;
                mutated = true;
            }
            Ok::<(), Error>(())
        }
        .await;

        if mutated {
            self.store.mark_changed(name).await;
        }
        result?;

        info!(
            "Applied DNS to {} ({} server(s), {} domain(s))",
            name,
            desired.dns_servers.len(),
            desired.domains.len()
        );
        Ok(true)
    }

    /// Put an interface back to its captured state
    async fn restore(&self, record: &ManagedInterfaceRecord) -> Result<()> {
        let name = record.interface.as_str();
        let Some(index) = self.host.link_index(name).await? else {
            debug!("{} is gone, nothing to restore", name);
            return Ok(());
        };
        let link = Link { name, index };

        if self.dry_run {
            info!("[dry-run] Would revert {}", name);
            return Ok(());
        }

        self.host.revert(link).await?;

        let after = self.host.query(name).await?;
        let original = &record.original;
        if after.dns_servers != original.dns_servers {
            self.host.set_dns(link, &parse_servers(original)).await?;
        }
        if after.domains != original.domains {
            self.host.set_domains(link, &original.domains).await?;
        }
        if let Some(mode) = original.dns_over_tls.as_deref()
            && after.dns_over_tls.as_deref() != Some(mode)
        {
            self.host.set_dns_over_tls(link, mode).await?;
        }
        if let Some(mode) = original.multicast_dns.as_deref()
            && after.multicast_dns.as_deref() != Some(mode)
        {
            self.host.set_multicast_dns(link, mode).await?;
        }

        info!("Restored original DNS of {}", name);
        Ok(())
    }
}

impl Default for ResolvedBackend {
    fn default() -> Self {
        Self::new()
    }
}


fn parse_servers(snapshot: &InterfaceSnapshot) -> Vec<IpAddr> {
    snapshot
        .dns_servers
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect()
}

#[async_trait]
impl DnsBackend for ResolvedBackend {
    async fn check_available(&self) -> Result<()> {
        if self.host.is_available().await {
            Ok(())
        } else {
            Err(Error::backend_unavailable(
                "systemd-resolved is not running (resolvectl status failed)",
            ))
        }
    }

    async fn reconcile(&self, desired: &[DesiredInterfaceState]) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        for state in desired {
            match self.apply(state).await {
                Ok(true) => report.changed.push(state.interface.clone()),
                Ok(false) => report.unchanged.push(state.interface.clone()),
                Err(e) => {
                    warn!("Failed to apply DNS to {}: {}", state.interface, e);
                    report.failed.push((state.interface.clone(), e.to_string()));
                }
            }
        }

        let wanted: HashSet<&str> = desired.iter().map(|d| d.interface.as_str()).collect();
        for interface in self.store.interfaces().await {
            if wanted.contains(interface.as_str()) {
                continue;
            }
            let Some(record) = self.store.get(&interface).await else {
                continue;
            };
            if !record.changed {
                self.store.remove(&interface).await;
                continue;
            }

            info!("{} left the desired set, restoring", interface);
            match self.restore(&record).await {
                Ok(()) => {
                    self.store.remove(&interface).await;
                    report.removed.push(interface);
                }
                Err(e) => {
                    warn!("Failed to restore {}: {}", interface, e);
                    report.failed.push((interface, e.to_string()));
                }
            }
        }

        Ok(report)
    }

    async fn restore_changed(&self) -> Result<Vec<String>> {
        let mut restored = Vec::new();
        for record in self.store.changed_interfaces().await {
            match self.restore(&record).await {
                Ok(()) => {
                    self.store.remove(&record.interface).await;
                    restored.push(record.interface);
                }
                Err(e) => warn!("Failed to restore {}: {}", record.interface, e),
            }
        }
        Ok(restored)
    }

    fn backend_name(&self) -> &'static str {
        "resolved"
    }
}
