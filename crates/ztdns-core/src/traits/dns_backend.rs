// # DNS Backend Trait
//
// Defines the interface for pushing desired per-interface DNS settings into
// the host resolver configuration.
//
// ## Implementations
//
// - Declarative unit files: `ztdns-networkd` crate
// - Live resolver service: `ztdns-resolved` crate

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::net::IpAddr;

/// Desired DNS configuration of one host interface
///
/// Derived fresh on every reconciliation pass and never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredInterfaceState {
    /// Host interface name
    pub interface: String,
    /// Id of the network that owns the interface
    pub network_id: String,
    /// Name of the network that owns the interface
    pub network_name: String,
    /// DNS servers, duplicates removed, advertised order kept
    pub dns_servers: Vec<IpAddr>,
    /// Search domains; routing-only domains carry a leading `~`
    pub domains: BTreeSet<String>,
    /// Enable DNS-over-TLS on the interface
    pub dns_over_tls: bool,
    /// Enable multicast DNS on the interface
    pub multicast_dns: bool,
}

impl DesiredInterfaceState {
    /// Create a desired state with no servers, domains or toggles
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            network_id: String::new(),
            network_name: String::new(),
            dns_servers: Vec::new(),
            domains: BTreeSet::new(),
            dns_over_tls: false,
            multicast_dns: false,
        }
    }

    /// DNS servers as strings, as a set
    pub fn dns_server_set(&self) -> BTreeSet<String> {
        self.dns_servers.iter().map(ToString::to_string).collect()
    }
}

/// Outcome of one backend reconciliation
///
/// Informational only: per-interface failures are listed in `failed` and
/// never turn the whole pass into an error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Interfaces whose configuration was written or applied
    pub changed: Vec<String>,
    /// Interfaces that already matched the desired state
    pub unchanged: Vec<String>,
    /// Interfaces whose managed configuration was removed or reverted
    pub removed: Vec<String>,
    /// Interfaces that could not be processed, with the reason
    pub failed: Vec<(String, String)>,
    /// Stale interfaces left in place (reconcile disabled)
    pub stale: Vec<String>,
    /// Whether the host service was asked to reload
    pub reloaded: bool,
}

impl ReconcileReport {
    /// True when nothing was written, applied, removed or reloaded
    pub fn is_noop(&self) -> bool {
        self.changed.is_empty() && self.removed.is_empty() && !self.reloaded
    }
}

/// Trait for DNS backend implementations
///
/// # Thread Safety
///
/// Implementations must be thread-safe. The engine guarantees that at most
/// one `reconcile` runs at a time, but `restore_changed` may be reached from
/// the shutdown path, so any state shared between the two must be guarded.
///
/// # Error Containment
///
/// A failure on one interface is logged and reported in
/// [`ReconcileReport::failed`]; the remaining interfaces are still processed.
/// `Err` is reserved for failures that make the whole pass meaningless.
#[async_trait]
pub trait DnsBackend: Send + Sync {
    /// Verify that the host integration point exists
    ///
    /// Called once before the first pass; an error here is fatal to startup.
    async fn check_available(&self) -> Result<(), crate::Error>;

    /// Reconcile the host against the full desired set
    ///
    /// Interfaces this backend manages that are absent from `desired` are
    /// treated as departed and cleaned up.
    async fn reconcile(
        &self,
        desired: &[DesiredInterfaceState],
    ) -> Result<ReconcileReport, crate::Error>;

    /// Restore every interface this backend has changed
    ///
    /// Used after a directory fetch failure and at shutdown. Returns the
    /// interfaces that were restored.
    async fn restore_changed(&self) -> Result<Vec<String>, crate::Error>;

    /// Name of the backend (for logging)
    fn backend_name(&self) -> &'static str;
}
