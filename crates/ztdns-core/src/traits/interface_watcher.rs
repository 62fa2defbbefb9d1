// # Interface Watcher Trait
//
// Defines the interface for observing host network interface changes.
//
// ## Implementations
//
// - Netlink link-state stream (Linux): `ztdns-netlink` crate
// - Periodic link listing: `ztdns-netlink` crate
//
// ## Cancellation Contract
//
// `watch()` runs until the stop signal flips to `true` (or its sender is
// dropped) and returns afterwards. Once it has observed the stop signal it
// must not send any further events.

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

/// Kind of interface change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterfaceEventKind {
    /// Interface appeared
    Added,
    /// Interface disappeared
    Removed,
    /// Interface became operational
    Up,
    /// Interface stopped being operational
    Down,
}

impl std::fmt::Display for InterfaceEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Added => "added",
            Self::Removed => "removed",
            Self::Up => "up",
            Self::Down => "down",
        };
        f.write_str(s)
    }
}

/// A single host interface change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceEvent {
    /// Interface name
    pub name: String,
    /// What happened
    pub kind: InterfaceEventKind,
    /// Kernel interface index (0 when unknown)
    pub index: u32,
}

impl InterfaceEvent {
    /// Create a new interface event
    pub fn new(name: impl Into<String>, kind: InterfaceEventKind, index: u32) -> Self {
        Self {
            name: name.into(),
            kind,
            index,
        }
    }
}

/// Resolve once the stop signal is raised or its sender is gone
pub async fn stopped(stop: &mut watch::Receiver<bool>) {
    while !*stop.borrow_and_update() {
        if stop.changed().await.is_err() {
            return;
        }
    }
}

/// Trait for interface watcher implementations
///
/// # Trust Level: Semi-Trusted
///
/// Watchers are observers: they perform platform I/O to detect interface
/// changes and forward one [`InterfaceEvent`] per change. Batching and the
/// decision to reconcile belong to the engine.
#[async_trait]
pub trait InterfaceWatcher: Send + Sync {
    /// Watch for interface changes until `stop` is raised
    ///
    /// # Returns
    ///
    /// - `Ok(())`: stopped on request (or the receiver went away)
    /// - `Err(Error)`: the event source failed
    async fn watch(
        &self,
        events: mpsc::Sender<InterfaceEvent>,
        stop: watch::Receiver<bool>,
    ) -> Result<(), crate::Error>;

    /// Name of the strategy (for logging)
    fn watcher_name(&self) -> &'static str;
}
