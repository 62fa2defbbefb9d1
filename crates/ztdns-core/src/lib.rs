// # ztdns-core
//
// Core library for keeping host DNS in sync with overlay-network memberships.
//
// ## Architecture Overview
//
// - **NetworkSource**: Trait for discovering joined networks and their DNS settings
// - **DnsBackend**: Trait for reconciling desired DNS state into the host resolver
// - **InterfaceWatcher**: Trait for observing host interface changes
// - **NetworkFilter**: Compiled rule set selecting which networks are managed
// - **Daemon**: Scheduler running single-flight reconciliation passes on a
//   timer and on debounced interface changes
//
// ## Design Principles
//
// 1. **Separation of Concerns**: Host access lives in plugin crates behind the traits
// 2. **Idempotency**: Backends diff against current host state and only apply changes
// 3. **Ownership**: Only interfaces this process changed are ever reverted
// 4. **Library-First**: All core functionality can be used as a library

pub mod config;
pub mod debounce;
pub mod desired;
pub mod engine;
pub mod error;
pub mod filter;
pub mod reverse;
pub mod state;
pub mod traits;

// Re-export core types for convenience
pub use config::{BackendConfig, DesiredStateOptions, FilterRuleConfig, WatchMode, ZtdnsConfig};
pub use debounce::Debouncer;
pub use desired::derive_desired;
pub use engine::{Daemon, DaemonState, EngineEvent, PassTrigger};
pub use error::{Error, Result};
pub use filter::NetworkFilter;
pub use reverse::{reverse_domain, reverse_domains};
pub use state::{InterfaceSnapshot, ManagedInterfaceRecord, ManagedInterfaceStore};
pub use traits::{
    DesiredInterfaceState, DnsBackend, InterfaceEvent, InterfaceEventKind, InterfaceWatcher,
    NetworkDescriptor, NetworkRoute, NetworkSource, ReconcileReport,
};
