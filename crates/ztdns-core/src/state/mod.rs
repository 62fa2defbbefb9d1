// # Managed Interface State
//
// In-memory bookkeeping for interfaces whose live resolver settings this
// process has taken over.
//
// ## Crash Behavior
//
// - All state is lost on restart/crash
// - The live backend recomputes "current" state from the host on every pass,
//   so only the pre-change snapshots are lost

pub mod managed;

pub use managed::{InterfaceSnapshot, ManagedInterfaceRecord, ManagedInterfaceStore};
