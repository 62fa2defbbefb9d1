// # Resolver Host Access
//
// Everything the live backend needs from the running resolver service:
// interface lookup, per-link queries and per-link mutations.
//
// ## Control Plane
//
// Mutations go over D-Bus to `org.freedesktop.resolve1`. When the bus is
// unreachable or the call fails, the equivalent `resolvectl` invocation is
// used instead. Queries always go through `resolvectl`.

use crate::parse::{link_value, link_values, normalize_server};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::path::PathBuf;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use zbus::Connection;
use ztdns_core::state::InterfaceSnapshot;
use ztdns_core::{Error, Result};

const RESOLVE1_SERVICE: &str = "org.freedesktop.resolve1";
const RESOLVE1_PATH: &str = "/org/freedesktop/resolve1";
const RESOLVE1_MANAGER: &str = "org.freedesktop.resolve1.Manager";

/// Linux address family numbers used by `SetLinkDNS`
const AF_INET: i32 = 2;
const AF_INET6: i32 = 10;

/// Default location of per-interface sysfs entries
pub const DEFAULT_SYSFS_NET: &str = "/sys/class/net";

/// A host interface, by name and kernel index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link<'a> {
    /// Interface name
    pub name: &'a str,
    /// Kernel interface index
    pub index: u32,
}

/// Access to the live resolver service
#[async_trait]
pub trait ResolverHost: Send + Sync {
    /// Whether the resolver service is running
    async fn is_available(&self) -> bool;

    /// Kernel index of `interface`, `None` when it does not exist
    async fn link_index(&self, interface: &str) -> Result<Option<u32>>;

    /// Current per-link settings of `interface`
    async fn query(&self, interface: &str) -> Result<InterfaceSnapshot>;

    /// Replace the link's DNS servers
    async fn set_dns(&self, link: Link<'_>, servers: &[IpAddr]) -> Result<()>;

    /// Replace the link's search domains (`~` marks routing-only)
    async fn set_domains(&self, link: Link<'_>, domains: &BTreeSet<String>) -> Result<()>;

    /// Set the link's DNS-over-TLS mode
    async fn set_dns_over_tls(&self, link: Link<'_>, mode: &str) -> Result<()>;

    /// Set the link's multicast DNS mode
    async fn set_multicast_dns(&self, link: Link<'_>, mode: &str) -> Result<()>;

    /// Drop every runtime setting of the link
    async fn revert(&self, link: Link<'_>) -> Result<()>;
}

/// [`ResolverHost`] backed by systemd-resolved
pub struct SystemResolver {
    /// Root of per-interface sysfs entries
    sysfs_root: PathBuf,

    /// `resolvectl` binary
    resolvectl: String,

    /// System bus connection, established on first use
    bus: Mutex<Option<Connection>>,
}

impl SystemResolver {
    /// Create a resolver using the system bus and `resolvectl` from `PATH`
    pub fn new() -> Self {
        Self {
            sysfs_root: PathBuf::from(DEFAULT_SYSFS_NET),
            resolvectl: "resolvectl".to_string(),
            bus: Mutex::new(None),
        }
    }

    /// Use a different sysfs root
    pub fn with_sysfs_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.sysfs_root = root.into();
        self
    }

    /// Use a specific `resolvectl` binary
    pub fn with_resolvectl(mut self, program: impl Into<String>) -> Self {
        self.resolvectl = program.into();
        self
    }

    async fn resolvectl(&self, args: &[&str]) -> Result<String> {
        let command = format!("{} {}", self.resolvectl, args.join(" "));
        let output = Command::new(&self.resolvectl)
            .args(args)
            .output()
            .await
            .map_err(|e| Error::command(&command, e.to_string()))?;

        if !output.status.success() {
            return Err(Error::command(
                command,
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Call a resolve1 manager method; `Err` means "use the fallback"
    async fn call<B>(&self, method: &str, body: &B) -> Result<()>
    where
        B: serde::Serialize + zbus::zvariant::DynamicType,
    {
        let mut guard = self.bus.lock().await;
        if guard.is_none() {
            let conn = Connection::system()
                .await
                .map_err(|e| Error::backend(format!("System bus unavailable: {}", e)))?;
            debug!("Connected to system D-Bus");
            *guard = Some(conn);
        }
        let Some(conn) = guard.as_ref() else {
            return Err(Error::backend("System bus unavailable"));
        };

        conn.call_method(
            Some(RESOLVE1_SERVICE),
            RESOLVE1_PATH,
            Some(RESOLVE1_MANAGER),
            method,
            body,
        )
        .await
        .map(|_| ())
        .map_err(|e| Error::backend(format!("{} failed: {}", method, e)))
    }

    /// Try D-Bus first, then `resolvectl`
    async fn mutate<B>(&self, method: &str, body: &B, fallback: &[&str]) -> Result<()>
    where
        B: serde::Serialize + zbus::zvariant::DynamicType,
    {
        match self.call(method, body).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("{}; falling back to resolvectl", e);
                self.resolvectl(fallback).await.map(|_| ())
            }
        }
    }
}

impl Default for SystemResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResolverHost for SystemResolver {
    async fn is_available(&self) -> bool {
        self.resolvectl(&["status"]).await.is_ok()
    }

    async fn link_index(&self, interface: &str) -> Result<Option<u32>> {
        let path = self.sysfs_root.join(interface).join("ifindex");
        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| Error::backend(format!("Unparseable {}: {:?}", path.display(), raw))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn query(&self, interface: &str) -> Result<InterfaceSnapshot> {
        let dns = self.resolvectl(&["dns", interface]).await?;
        let domains = self.resolvectl(&["domain", interface]).await?;
        // older resolvectl builds lack these verbs; treat as unknown
        let dot = self.resolvectl(&["dnsovertls", interface]).await.ok();
        let mdns = self.resolvectl(&["mdns", interface]).await.ok();

        Ok(InterfaceSnapshot {
            dns_servers: link_values(&dns, interface)
                .iter()
                .map(|s| normalize_server(s))
                .collect(),
            domains: link_values(&domains, interface).into_iter().collect(),
            dns_over_tls: dot.and_then(|out| link_value(&out, interface)),
            multicast_dns: mdns.and_then(|out| link_value(&out, interface)),
        })
    }

    async fn set_dns(&self, link: Link<'_>, servers: &[IpAddr]) -> Result<()> {
        let addresses: Vec<(i32, Vec<u8>)> = servers
            .iter()
            .map(|addr| match addr {
                IpAddr::V4(v4) => (AF_INET, v4.octets().to_vec()),
                IpAddr::V6(v6) => (AF_INET6, v6.octets().to_vec()),
            })
            .collect();

        let rendered: Vec<String> = servers.iter().map(ToString::to_string).collect();
        let mut args = vec!["dns", link.name];
        if rendered.is_empty() {
            args.push("");
        }
        args.extend(rendered.iter().map(String::as_str));

        self.mutate("SetLinkDNS", &(link.index as i32, addresses), &args).await
    }

    async fn set_domains(&self, link: Link<'_>, domains: &BTreeSet<String>) -> Result<()> {
        let entries: Vec<(String, bool)> = domains
            .iter()
            .map(|d| match d.strip_prefix('~') {
                Some(bare) => (bare.to_string(), true),
                None => (d.clone(), false),
            })
            .collect();

        let mut args = vec!["domain", link.name];
        if domains.is_empty() {
            args.push("");
        }
        args.extend(domains.iter().map(String::as_str));

        self.mutate("SetLinkDomains", &(link.index as i32, entries), &args).await
    }

    async fn set_dns_over_tls(&self, link: Link<'_>, mode: &str) -> Result<()> {
        self.mutate(
            "SetLinkDNSOverTLS",
            &(link.index as i32, mode),
            &["dnsovertls", link.name, mode],
        )
        .await
    }

    async fn set_multicast_dns(&self, link: Link<'_>, mode: &str) -> Result<()> {
        self.mutate(
            "SetLinkMulticastDNS",
            &(link.index as i32, mode),
            &["mdns", link.name, mode],
        )
        .await
    }

    async fn revert(&self, link: Link<'_>) -> Result<()> {
        self.mutate("RevertLink", &(link.index as i32,), &["revert", link.name])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_link_index_from_sysfs() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("zt0")).unwrap();
        std::fs::write(root.path().join("zt0").join("ifindex"), "7\n").unwrap();
        std::fs::create_dir(root.path().join("bad0")).unwrap();
        std::fs::write(root.path().join("bad0").join("ifindex"), "x\n").unwrap();

        let resolver = SystemResolver::new().with_sysfs_root(root.path());
        assert_eq!(resolver.link_index("zt0").await.unwrap(), Some(7));
        assert_eq!(resolver.link_index("gone0").await.unwrap(), None);
        assert!(resolver.link_index("bad0").await.is_err());
    }

    #[tokio::test]
    async fn test_missing_resolvectl_is_unavailable() {
        let resolver = SystemResolver::new().with_resolvectl("/nonexistent/resolvectl");
        assert!(!resolver.is_available().await);
        assert!(matches!(
            resolver.query("zt0").await,
            Err(Error::Command { .. })
        ));
    }
}
