//! Unit file content
//!
//! ```text
//! # Managed by ztdns - do not edit
//! [Match]
//! Name=zt0
//!
//! [Network]
//! Description=corp (8056c2e21c000001)
//! DHCP=no
//! DNS=10.0.0.1
//! Domains=~2.1.10.in-addr.arpa corp.internal
//! ConfigureWithoutCarrier=true
//! KeepConfiguration=static
//! ```

use std::collections::BTreeSet;
use std::fmt::Write;
use std::path::Path;
use ztdns_core::traits::DesiredInterfaceState;

/// First line of every file this backend owns
pub const MANAGED_MARKER: &str = "# Managed by ztdns - do not edit";

/// File name prefix; sorts after distribution-provided units
pub const FILE_PREFIX: &str = "99-";

/// File name suffix
pub const FILE_SUFFIX: &str = ".network";

/// File name for an interface
pub fn file_name(interface: &str) -> String {
    format!("{FILE_PREFIX}{interface}{FILE_SUFFIX}")
}

/// Render the unit file for one interface
pub fn render(desired: &DesiredInterfaceState) -> String {
    let mut out = String::new();
    let description = if desired.network_name.is_empty() {
        desired.network_id.clone()
    } else if desired.network_id.is_empty() {
        desired.network_name.clone()
    } else {
        format!("{} ({})", desired.network_name, desired.network_id)
    };

    // writing to a String cannot fail
    let _ = writeln!(out, "{MANAGED_MARKER}");
    let _ = writeln!(out, "[Match]");
    let _ = writeln!(out, "Name={}", desired.interface);
    let _ = writeln!(out);
    let _ = writeln!(out, "[Network]");
    let _ = writeln!(out, "Description={description}");
    let _ = writeln!(out, "DHCP=no");
    for server in &desired.dns_servers {
        let _ = writeln!(out, "DNS={server}");
    }
    if desired.dns_over_tls {
        let _ = writeln!(out, "DNSOverTLS=yes");
    }
    if desired.multicast_dns {
        let _ = writeln!(out, "MulticastDNS=yes");
    }
    if let Some(domains) = domains_value(&desired.domains) {
        let _ = writeln!(out, "Domains={domains}");
    }
    let _ = writeln!(out, "ConfigureWithoutCarrier=true");
    let _ = writeln!(out, "KeepConfiguration=static");

    out
}

/// `~`-prefixed, sorted, space-joined domain list; `None` when empty
fn domains_value(domains: &BTreeSet<String>) -> Option<String> {
    let bare: BTreeSet<&str> = domains
        .iter()
        .map(|d| d.trim_start_matches('~'))
        .filter(|d| !d.is_empty())
        .collect();
    if bare.is_empty() {
        return None;
    }
    Some(format!("~{}", bare.into_iter().collect::<Vec<_>>().join(" ")))
}

/// Whether file content carries the ownership marker
pub fn is_managed(content: &str) -> bool {
    content.lines().next().map(str::trim_end) == Some(MANAGED_MARKER)
}

/// Interface a managed file applies to
///
/// Taken from the `Name=` line, falling back to the file name.
pub fn managed_interface(path: &Path, content: &str) -> Option<String> {
    let from_match = content
        .lines()
        .find_map(|line| line.trim().strip_prefix("Name="))
        .map(str::trim)
        .filter(|name| !name.is_empty());
    if let Some(name) = from_match {
        return Some(name.to_string());
    }

    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.strip_prefix(FILE_PREFIX))
        .and_then(|n| n.strip_suffix(FILE_SUFFIX))
        .filter(|n| !n.is_empty())
        .map(str::to_string)
}
