//! Core traits for the ztdns system
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`NetworkSource`]: Discover joined overlay networks
//! - [`DnsBackend`]: Apply desired DNS state to the host resolver configuration
//! - [`InterfaceWatcher`]: Observe host interface changes

pub mod dns_backend;
pub mod interface_watcher;
pub mod network_source;

pub use dns_backend::{DesiredInterfaceState, DnsBackend, ReconcileReport};
pub use interface_watcher::{InterfaceEvent, InterfaceEventKind, InterfaceWatcher, stopped};
pub use network_source::{NetworkDescriptor, NetworkRoute, NetworkSource};
