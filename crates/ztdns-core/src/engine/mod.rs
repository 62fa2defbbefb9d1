//! Reconciliation scheduler
//!
//! The [`Daemon`] decides *when* a reconciliation pass runs and guarantees
//! that passes never overlap.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐   events   ┌───────────┐  batches
//! │ InterfaceWatcher │──────────▶│ Debouncer │─────────┐
//! └──────────────────┘            └───────────┘         │
//!                                                        ▼
//!                  interval tick            ┌──────────────────────┐
//!                 ─────────────────────────▶│ Daemon (consumer)    │
//!                                           └──────────────────────┘
//!                                                        │ pass (single-flight)
//!         ┌───────────────────────┬──────────────────────┼────────────────────┐
//!         ▼                       ▼                      ▼                    ▼
//! ┌───────────────┐      ┌────────────────┐    ┌──────────────────┐   ┌─────────────┐
//! │ NetworkSource │      │ NetworkFilter  │    │ derive_desired   │   │ DnsBackend  │
//! │ (fetch)       │      │ (select)       │    │ (compute)        │   │ (reconcile) │
//! └───────────────┘      └────────────────┘    └──────────────────┘   └─────────────┘
//! ```
//!
//! ## Pass Flow
//!
//! 1. Fetch the network list; on failure restore every changed interface
//! 2. Apply the compiled filter rules
//! 3. Derive the desired state per interface
//! 4. Hand the complete desired set to the backend
//! 5. Emit events for monitoring/logging

use crate::config::{DesiredStateOptions, ZtdnsConfig};
use crate::debounce::Debouncer;
use crate::desired::derive_desired;
use crate::error::Result;
use crate::filter::NetworkFilter;
use crate::traits::{DnsBackend, InterfaceEvent, InterfaceWatcher, NetworkSource, ReconcileReport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Capacity of the raw watcher event channel
const WATCHER_EVENT_CAPACITY: usize = 256;

/// Capacity of the debounced batch channel
const WATCHER_BATCH_CAPACITY: usize = 16;

/// Lifecycle of the daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
    /// Waiting for the next trigger
    Idle,
    /// A reconciliation pass is in flight
    Running,
    /// The loop has exited
    Stopped,
}

/// What started a reconciliation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassTrigger {
    /// Fixed-interval timer (including the immediate first tick)
    Timer,
    /// Debounced interface change batch
    Interfaces,
    /// Direct call to [`Daemon::run_once`]
    Manual,
}

impl std::fmt::Display for PassTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Timer => "timer",
            Self::Interfaces => "interfaces",
            Self::Manual => "manual",
        };
        f.write_str(s)
    }
}

/// Events emitted by the Daemon
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Loop started
    Started {
        interval: Duration,
        watching: bool,
    },

    /// A pass began
    PassStarted {
        trigger: PassTrigger,
    },

    /// A pass reached the backend and finished
    PassCompleted {
        trigger: PassTrigger,
        report: ReconcileReport,
    },

    /// The directory service could not be queried
    FetchFailed {
        error: String,
    },

    /// A debounced batch of interface changes arrived
    InterfacesChanged {
        events: Vec<InterfaceEvent>,
    },

    /// Interfaces were restored to their original state
    Restored {
        interfaces: Vec<String>,
    },

    /// Loop stopped
    Stopped {
        reason: String,
    },
}

/// Reconciliation scheduler
///
/// ## Lifecycle
///
/// 1. Create with [`Daemon::new()`]
/// 2. Optionally attach a watcher with [`Daemon::with_watcher()`]
/// 3. Start with [`Daemon::run()`]; it returns after the shutdown signal
///
/// ## Single Flight
///
/// Every pass, whether started by the timer, by a watcher batch or by a
/// direct [`Daemon::run_once()`] call, holds `pass_lock` for its whole
/// duration. Watcher batches that arrive while a pass runs stay queued and
/// are merged into one follow-up pass.
pub struct Daemon {
    /// Directory service
    source: Box<dyn NetworkSource>,

    /// Active DNS backend
    backend: Box<dyn DnsBackend>,

    /// Compiled network filter
    filter: NetworkFilter,

    /// Desired-state derivation options
    options: DesiredStateOptions,

    /// Loop interval, `None` when disabled
    interval: Option<Duration>,

    /// Restore changed interfaces after the loop exits
    restore_on_exit: bool,

    /// Optional interface watcher
    watcher: Option<Arc<dyn InterfaceWatcher>>,

    /// Quiet window applied to watcher events
    debounce: Duration,

    /// Held for the duration of every pass
    pass_lock: Mutex<()>,

    /// Current lifecycle state
    state_tx: watch::Sender<DaemonState>,

    /// Event sender for external monitoring
    event_tx: mpsc::Sender<EngineEvent>,
}

impl Daemon {
    /// Create a new daemon
    ///
    /// # Returns
    ///
    /// A tuple of (daemon, event_receiver) where event_receiver yields engine events
    pub fn new(
        source: Box<dyn NetworkSource>,
        backend: Box<dyn DnsBackend>,
        config: &ZtdnsConfig,
    ) -> Result<(Self, mpsc::Receiver<EngineEvent>)> {
        config.validate()?;

        let filter = NetworkFilter::compile(&config.filters)?;
        let (tx, rx) = mpsc::channel(config.daemon.event_channel_capacity);
        let (state_tx, _) = watch::channel(DaemonState::Idle);

        let daemon = Self {
            source,
            backend,
            filter,
            options: config.desired,
            interval: config.daemon.interval(),
            restore_on_exit: config.daemon.restore_on_exit,
            watcher: None,
            debounce: config.watcher.debounce(),
            pass_lock: Mutex::new(()),
            state_tx,
            event_tx: tx,
        };

        Ok((daemon, rx))
    }

    /// Attach an interface watcher as an additional trigger
    pub fn with_watcher(mut self, watcher: Arc<dyn InterfaceWatcher>) -> Self {
        self.watcher = Some(watcher);
        self
    }

    /// Current lifecycle state
    pub fn state(&self) -> DaemonState {
        *self.state_tx.borrow()
    }

    /// Subscribe to lifecycle state changes
    pub fn subscribe_state(&self) -> watch::Receiver<DaemonState> {
        self.state_tx.subscribe()
    }

    /// Run a single reconciliation pass
    ///
    /// Waits for any pass already in flight before starting.
    pub async fn run_once(&self) -> Result<ReconcileReport> {
        self.run_pass(PassTrigger::Manual).await
    }

    /// Run the scheduling loop until `shutdown` fires
    ///
    /// With the interval disabled this returns immediately without running
    /// anything. Otherwise a pass runs right away and then on every tick.
    /// A pass in flight when the signal arrives is allowed to finish.
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Clean shutdown
    /// - `Err(Error)`: Fatal error
    pub async fn run(&self, mut shutdown: oneshot::Receiver<()>) -> Result<()> {
        let Some(interval) = self.interval else {
            info!("Reconciliation interval disabled, not starting the loop");
            return Ok(());
        };

        let (stop_tx, stop_rx) = watch::channel(false);
        let (batch_tx, mut batch_rx) = mpsc::channel(WATCHER_BATCH_CAPACITY);
        let tasks = self.spawn_watcher(stop_rx, batch_tx);
        let mut watching = !tasks.is_empty();

        info!(
            "Daemon started: backend={}, source={}, interval={}s, watcher={}",
            self.backend.backend_name(),
            self.source.source_name(),
            interval.as_secs(),
            watching
        );
        self.emit_event(EngineEvent::Started { interval, watching });

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }

                _ = ticker.tick() => {
                    self.logged_pass(PassTrigger::Timer).await;
                }

                batch = batch_rx.recv(), if watching => match batch {
                    Some(mut events) => {
                        while let Ok(more) = batch_rx.try_recv() {
                            events.extend(more);
                        }
                        info!("{} interface change(s) observed, reconciling", events.len());
                        self.emit_event(EngineEvent::InterfacesChanged { events });
                        self.logged_pass(PassTrigger::Interfaces).await;
                    }
                    None => {
                        warn!("Interface watcher exited, continuing on the timer only");
                        watching = false;
                    }
                },
            }
        }

        let _ = stop_tx.send(true);
        drop(batch_rx);
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Watcher task ended abnormally: {}", e);
            }
        }

        if self.restore_on_exit {
            let _guard = self.pass_lock.lock().await;
            self.restore("shutdown").await;
        }

        self.state_tx.send_replace(DaemonState::Stopped);
        self.emit_event(EngineEvent::Stopped {
            reason: "Shutdown signal".to_string(),
        });
        info!("Daemon stopped");

        Ok(())
    }

    fn spawn_watcher(
        &self,
        stop: watch::Receiver<bool>,
        batches: mpsc::Sender<Vec<InterfaceEvent>>,
    ) -> Vec<JoinHandle<()>> {
        let Some(watcher) = self.watcher.clone() else {
            return Vec::new();
        };

        let (event_tx, event_rx) = mpsc::channel(WATCHER_EVENT_CAPACITY);
        let watch_stop = stop.clone();
        let watcher_task = tokio::spawn(async move {
            let name = watcher.watcher_name();
            debug!("Interface watcher {} starting", name);
            if let Err(e) = watcher.watch(event_tx, watch_stop).await {
                error!("Interface watcher {} failed: {}", name, e);
            }
        });

        let debouncer = Debouncer::new(self.debounce);
        let debounce_task = tokio::spawn(debouncer.run(event_rx, batches, stop));

        vec![watcher_task, debounce_task]
    }

    async fn logged_pass(&self, trigger: PassTrigger) {
        if let Err(e) = self.run_pass(trigger).await {
            error!("Reconciliation pass ({}) failed: {}", trigger, e);
        }
    }

    async fn run_pass(&self, trigger: PassTrigger) -> Result<ReconcileReport> {
        let _guard = self.pass_lock.lock().await;

        self.state_tx.send_replace(DaemonState::Running);
        self.emit_event(EngineEvent::PassStarted { trigger });

        let result = self.reconcile(trigger).await;

        self.state_tx.send_if_modified(|state| {
            if *state == DaemonState::Running {
                *state = DaemonState::Idle;
                true
            } else {
                false
            }
        });

        result
    }

    async fn reconcile(&self, trigger: PassTrigger) -> Result<ReconcileReport> {
        let networks = match self.source.list_networks().await {
            Ok(networks) => networks,
            Err(e) => {
                error!("Failed to fetch networks from {}: {}", self.source.source_name(), e);
                self.emit_event(EngineEvent::FetchFailed {
                    error: e.to_string(),
                });
                self.restore("directory failure").await;
                return Err(e);
            }
        };

        let total = networks.len();
        let selected = self.filter.apply(networks);
        let desired = derive_desired(&selected, &self.options);
        debug!(
            "Pass ({}): {} network(s), {} selected, {} with DNS",
            trigger,
            total,
            selected.len(),
            desired.len()
        );

        let report = self.backend.reconcile(&desired).await?;

        if report.is_noop() {
            debug!("Pass ({}): nothing to do", trigger);
        } else {
            info!(
                "Pass ({}): {} changed, {} removed, {} failed",
                trigger,
                report.changed.len(),
                report.removed.len(),
                report.failed.len()
            );
        }
        for (interface, reason) in &report.failed {
            warn!("Interface {} not reconciled: {}", interface, reason);
        }

        self.emit_event(EngineEvent::PassCompleted {
            trigger,
            report: report.clone(),
        });

        Ok(report)
    }

    /// Restore every changed interface; failures are logged, never returned
    async fn restore(&self, reason: &str) {
        match self.backend.restore_changed().await {
            Ok(interfaces) if interfaces.is_empty() => {
                debug!("Nothing to restore ({})", reason);
            }
            Ok(interfaces) => {
                info!("Restored {} interface(s) ({})", interfaces.len(), reason);
                self.emit_event(EngineEvent::Restored { interfaces });
            }
            Err(e) => {
                error!("Failed to restore interfaces ({}): {}", reason, e);
            }
        }
    }

    /// Emit an engine event
    fn emit_event(&self, event: EngineEvent) {
        if self.event_tx.try_send(event).is_err() {
            warn!("Event channel full, dropping event. Consider increasing event_channel_capacity.");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_event_equality() {
        let event = EngineEvent::PassStarted {
            trigger: PassTrigger::Timer,
        };
        assert_eq!(event.clone(), event);
        assert_eq!(PassTrigger::Interfaces.to_string(), "interfaces");
    }
}
