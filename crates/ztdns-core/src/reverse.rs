//! Reverse-lookup search domains for assigned subnets
//!
//! For an assigned CIDR with prefix length `p`, the domain covers the
//! `ceil(p / 8)` most significant bytes of an IPv4 address, or the
//! `ceil(p / 4)` most significant nibbles of an IPv6 address, written least
//! significant unit first under `in-addr.arpa` / `ip6.arpa`. The result is
//! prefixed with `~` so resolvers treat it as routing-only.
//!
//! ```text
//! 10.1.2.5/24   -> ~2.1.10.in-addr.arpa
//! fdab:cd00::1/20 -> ~c.b.a.d.f.ip6.arpa
//! ```

use crate::error::{Error, Result};
use std::net::IpAddr;
use tracing::warn;

/// Parse `addr/prefix` into an address and a prefix length bounded by the family
pub fn parse_cidr(cidr: &str) -> Result<(IpAddr, u8)> {
    let (addr, prefix) = cidr
        .trim()
        .split_once('/')
        .ok_or_else(|| Error::invalid_input(format!("CIDR without prefix length: {cidr}")))?;

    let addr: IpAddr = addr
        .parse()
        .map_err(|_| Error::invalid_input(format!("Invalid address in CIDR: {cidr}")))?;
    let prefix: u8 = prefix
        .parse()
        .map_err(|_| Error::invalid_input(format!("Invalid prefix length in CIDR: {cidr}")))?;

    let max = match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    };
    if prefix > max {
        return Err(Error::invalid_input(format!(
            "Prefix length {prefix} exceeds {max} in CIDR: {cidr}"
        )));
    }

    Ok((addr, prefix))
}

/// Compute the routing-only reverse domain for one CIDR
pub fn reverse_domain(cidr: &str) -> Result<String> {
    let (addr, prefix) = parse_cidr(cidr)?;
    let prefix = usize::from(prefix);

    let mut labels: Vec<String> = match addr {
        IpAddr::V4(v4) => {
            let count = prefix.div_ceil(8);
            v4.octets()[..count].iter().map(u8::to_string).collect()
        }
        IpAddr::V6(v6) => {
            let count = prefix.div_ceil(4);
            v6.octets()
                .iter()
                .flat_map(|byte| [byte >> 4, byte & 0x0f])
                .take(count)
                .map(|nibble| format!("{nibble:x}"))
                .collect()
        }
    };
    labels.reverse();

    let zone = match addr {
        IpAddr::V4(_) => "in-addr.arpa",
        IpAddr::V6(_) => "ip6.arpa",
    };
    labels.push(zone.to_string());

    Ok(format!("~{}", labels.join(".")))
}

/// Compute reverse domains for every parseable CIDR, skipping malformed ones
pub fn reverse_domains<S: AsRef<str>>(cidrs: &[S]) -> Vec<String> {
    cidrs
        .iter()
        .filter_map(|cidr| match reverse_domain(cidr.as_ref()) {
            Ok(domain) => Some(domain),
            Err(e) => {
                warn!("Skipping reverse domain for {}: {}", cidr.as_ref(), e);
                None
            }
        })
        .collect()
}
