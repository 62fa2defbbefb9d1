// # Network Source Trait
//
// Defines the interface for discovering joined overlay networks.
//
// ## Implementations
//
// - Overlay controller local API: `ztdns-zerotier` crate
//
// ## Usage
//
// ```rust,ignore
// use ztdns_core::NetworkSource;
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let source = /* NetworkSource implementation */;
//
//     for network in source.list_networks().await? {
//         println!("{} on {}", network.name, network.interface);
//     }
//
//     Ok(())
// }
// ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// An advertised route of an overlay network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkRoute {
    /// Destination CIDR
    pub target: String,
    /// Gateway, if the route is not directly reachable
    pub via: Option<String>,
}

impl NetworkRoute {
    /// Create a route
    pub fn new(target: impl Into<String>, via: Option<String>) -> Self {
        Self {
            target: target.into(),
            via,
        }
    }
}

/// One joined overlay network, as reported by the directory service
///
/// Refreshed on every poll and consumed read-only downstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkDescriptor {
    /// Immutable network id
    pub id: String,
    /// Human-readable network name
    pub name: String,
    /// Host interface the network is bound to (e.g. "zt0")
    pub interface: String,
    /// Whether the network is online
    pub online: bool,
    /// Whether the host holds at least one assigned address
    pub assigned: bool,
    /// DNS servers advertised by the network
    pub dns_servers: Vec<String>,
    /// DNS search domain advertised by the network
    pub dns_domain: Option<String>,
    /// Assigned addresses in CIDR notation (e.g. "10.1.2.5/24")
    pub assigned_addresses: Vec<String>,
    /// Advertised routes
    pub routes: Vec<NetworkRoute>,
}

impl NetworkDescriptor {
    /// Create a descriptor with the given identity and no DNS settings
    pub fn new(id: impl Into<String>, name: impl Into<String>, interface: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            interface: interface.into(),
            online: true,
            assigned: false,
            dns_servers: Vec::new(),
            dns_domain: None,
            assigned_addresses: Vec::new(),
            routes: Vec::new(),
        }
    }

    /// Set the advertised DNS servers
    pub fn with_dns_servers<I, S>(mut self, servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dns_servers = servers.into_iter().map(Into::into).collect();
        self
    }

    /// Set the advertised search domain
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.dns_domain = Some(domain.into());
        self
    }

    /// Set the assigned addresses; also updates `assigned`
    pub fn with_assigned_addresses<I, S>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.assigned_addresses = addresses.into_iter().map(Into::into).collect();
        self.assigned = !self.assigned_addresses.is_empty();
        self
    }

    /// Set the advertised routes
    pub fn with_routes(mut self, routes: Vec<NetworkRoute>) -> Self {
        self.routes = routes;
        self
    }

    /// Set the host interface
    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = interface.into();
        self
    }

    /// Set the online flag
    pub fn with_online(mut self, online: bool) -> Self {
        self.online = online;
        self
    }
}

/// Trait for directory service implementations
///
/// # Failure Semantics
///
/// A pass either gets the complete network list or an error. Implementations
/// must never return a partial list: non-2xx responses and parse failures
/// are errors, and the engine reacts to them by restoring every interface
/// it changed.
#[async_trait]
pub trait NetworkSource: Send + Sync {
    /// Fetch the current list of joined networks
    async fn list_networks(&self) -> Result<Vec<NetworkDescriptor>, crate::Error>;

    /// Name of the source (for logging)
    fn source_name(&self) -> &'static str;
}
