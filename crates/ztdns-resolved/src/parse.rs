//! `resolvectl` output parsing
//!
//! Per-link queries print one record per line:
//!
//! ```text
//! Global: 1.1.1.1
//! Link 5 (zt0): 10.0.0.1 fd00::53
//! ```

use std::net::IpAddr;

/// Prefix of a per-link record
const LINK_PREFIX: &str = "Link ";

/// Values of the record for `interface`, whitespace-separated
///
/// Returns an empty list when the interface has no record or no values.
pub fn link_values(output: &str, interface: &str) -> Vec<String> {
    let tag = format!("({interface})");
    output
        .lines()
        .filter_map(|line| line.trim().strip_prefix(LINK_PREFIX))
        .filter_map(|rest| rest.split_once(':'))
        .find(|(link, _)| link.trim_end().ends_with(&tag))
        .map(|(_, values)| values.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

/// Single-valued record (e.g. a DNS-over-TLS mode)
pub fn link_value(output: &str, interface: &str) -> Option<String> {
    link_values(output, interface).into_iter().next()
}

/// Canonical form of a reported DNS server
///
/// Strips `#server-name` and `%ifindex` decorations and re-renders plain
/// addresses, so reported and desired values compare equal.
pub fn normalize_server(raw: &str) -> String {
    let bare = raw.split('#').next().unwrap_or(raw);
    let bare = bare.split('%').next().unwrap_or(bare);
    match bare.parse::<IpAddr>() {
        Ok(addr) => addr.to_string(),
        Err(_) => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DNS_OUTPUT: &str = "Global: 1.1.1.1\nLink 2 (eth0): 192.168.1.1\nLink 5 (zt0): 10.0.0.1 fd00:0:0::53\n";

    #[test]
    fn test_link_values() {
        assert_eq!(link_values(DNS_OUTPUT, "zt0"), vec!["10.0.0.1", "fd00:0:0::53"]);
        assert_eq!(link_values(DNS_OUTPUT, "eth0"), vec!["192.168.1.1"]);
        assert!(link_values(DNS_OUTPUT, "zt9").is_empty());
        assert!(link_values("Link 5 (zt0):\n", "zt0").is_empty());
    }

    #[test]
    fn test_similar_names_do_not_collide() {
        let output = "Link 5 (ztabc0): 10.0.0.1\nLink 6 (zt0): 10.0.0.2\n";
        assert_eq!(link_values(output, "zt0"), vec!["10.0.0.2"]);
    }

    #[test]
    fn test_single_value() {
        assert_eq!(link_value("Link 5 (zt0): opportunistic\n", "zt0").as_deref(), Some("opportunistic"));
        assert_eq!(link_value("", "zt0"), None);
    }

    #[test]
    fn test_normalize_server() {
        assert_eq!(normalize_server("fd00:0:0::53"), "fd00::53");
        assert_eq!(normalize_server("10.0.0.1#dns.corp"), "10.0.0.1");
        assert_eq!(normalize_server("fe80::1%5"), "fe80::1");
        assert_eq!(normalize_server("garbage"), "garbage");
    }
}
