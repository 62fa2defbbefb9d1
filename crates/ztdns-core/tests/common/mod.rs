//! Test doubles and common utilities for architecture contract tests
//!
//! This module provides minimal test doubles that verify scheduling and
//! ownership constraints without touching the host.

// each test binary uses a different subset of these helpers
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use ztdns_core::error::{Error, Result};
use ztdns_core::traits::{
    DesiredInterfaceState, DnsBackend, InterfaceEvent, InterfaceWatcher, NetworkDescriptor,
    NetworkSource, ReconcileReport, stopped,
};

/// A NetworkSource returning a fixed list, optionally failing
pub struct FakeNetworkSource {
    networks: Arc<Mutex<Vec<NetworkDescriptor>>>,
    fail: Arc<AtomicBool>,
    list_call_count: Arc<AtomicUsize>,
}

impl FakeNetworkSource {
    pub fn new(networks: Vec<NetworkDescriptor>) -> Self {
        Self {
            networks: Arc::new(Mutex::new(networks)),
            fail: Arc::new(AtomicBool::new(false)),
            list_call_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Create a new FakeNetworkSource that shares state with an existing one
    pub fn sharing_counters_with(other: &Self) -> Self {
        Self {
            networks: Arc::clone(&other.networks),
            fail: Arc::clone(&other.fail),
            list_call_count: Arc::clone(&other.list_call_count),
        }
    }

    /// Make subsequent fetches fail (or succeed again)
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Replace the network list returned by subsequent fetches
    pub fn set_networks(&self, networks: Vec<NetworkDescriptor>) {
        *self.networks.lock().unwrap() = networks;
    }

    /// Get the number of times list_networks() was called
    pub fn list_call_count(&self) -> usize {
        self.list_call_count.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl NetworkSource for FakeNetworkSource {
    async fn list_networks(&self) -> Result<Vec<NetworkDescriptor>> {
        self.list_call_count.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::directory("connection refused"));
        }
        Ok(self.networks.lock().unwrap().clone())
    }

    fn source_name(&self) -> &'static str {
        "fake"
    }
}

/// A DnsBackend that records calls and detects overlapping passes
pub struct RecordingBackend {
    reconcile_call_count: Arc<AtomicUsize>,
    restore_call_count: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    last_desired: Arc<Mutex<Vec<DesiredInterfaceState>>>,
    delay: Duration,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    /// Backend whose reconcile takes `delay` to complete
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            reconcile_call_count: Arc::new(AtomicUsize::new(0)),
            restore_call_count: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
            last_desired: Arc::new(Mutex::new(Vec::new())),
            delay,
        }
    }

    /// Create a new RecordingBackend that shares counters with an existing one
    pub fn sharing_counters_with(other: &Self) -> Self {
        Self {
            reconcile_call_count: Arc::clone(&other.reconcile_call_count),
            restore_call_count: Arc::clone(&other.restore_call_count),
            in_flight: Arc::clone(&other.in_flight),
            max_in_flight: Arc::clone(&other.max_in_flight),
            last_desired: Arc::clone(&other.last_desired),
            delay: other.delay,
        }
    }

    /// Get the number of times reconcile() was called
    pub fn reconcile_call_count(&self) -> usize {
        self.reconcile_call_count.load(Ordering::SeqCst)
    }

    /// Get the number of times restore_changed() was called
    pub fn restore_call_count(&self) -> usize {
        self.restore_call_count.load(Ordering::SeqCst)
    }

    /// Highest number of reconcile/restore calls observed running at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Interfaces of the most recent desired set
    pub fn last_interfaces(&self) -> Vec<String> {
        self.last_desired
            .lock()
            .unwrap()
            .iter()
            .map(|d| d.interface.clone())
            .collect()
    }

    fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl DnsBackend for RecordingBackend {
    async fn check_available(&self) -> Result<()> {
        Ok(())
    }

    async fn reconcile(&self, desired: &[DesiredInterfaceState]) -> Result<ReconcileReport> {
        self.enter();
        self.reconcile_call_count.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        *self.last_desired.lock().unwrap() = desired.to_vec();
        self.leave();

        Ok(ReconcileReport {
            unchanged: desired.iter().map(|d| d.interface.clone()).collect(),
            ..ReconcileReport::default()
        })
    }

    async fn restore_changed(&self) -> Result<Vec<String>> {
        self.enter();
        self.restore_call_count.fetch_add(1, Ordering::SeqCst);
        self.leave();
        Ok(Vec::new())
    }

    fn backend_name(&self) -> &'static str {
        "recording"
    }
}

/// An InterfaceWatcher fed by the test through a channel
pub struct ChannelWatcher {
    feed: tokio::sync::Mutex<Option<mpsc::UnboundedReceiver<InterfaceEvent>>>,
    returned: Arc<AtomicBool>,
}

impl ChannelWatcher {
    pub fn new() -> (Self, mpsc::UnboundedSender<InterfaceEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let watcher = Self {
            feed: tokio::sync::Mutex::new(Some(rx)),
            returned: Arc::new(AtomicBool::new(false)),
        };
        (watcher, tx)
    }

    /// Handle reporting whether watch() has returned
    pub fn returned_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.returned)
    }
}

#[async_trait::async_trait]
impl InterfaceWatcher for ChannelWatcher {
    async fn watch(
        &self,
        events: mpsc::Sender<InterfaceEvent>,
        mut stop: watch::Receiver<bool>,
    ) -> Result<()> {
        let mut feed = self
            .feed
            .lock()
            .await
            .take()
            .ok_or_else(|| Error::watcher("watch() can only be called once"))?;

        loop {
            tokio::select! {
                _ = stopped(&mut stop) => break,
                event = feed.recv() => match event {
                    Some(event) => {
                        if events.send(event).await.is_err() {
                            break;
                        }
                    }
                    None => stopped(&mut stop).await,
                },
            }
        }

        self.returned.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn watcher_name(&self) -> &'static str {
        "channel"
    }
}

/// A network with one DNS server on the given interface
pub fn network(id: &str, interface: &str) -> NetworkDescriptor {
    NetworkDescriptor::new(id, format!("net-{id}"), interface).with_dns_servers(["10.0.0.1"])
}

/// Helper to create a minimal config for testing
pub fn minimal_config(interval_secs: u64) -> ztdns_core::config::ZtdnsConfig {
    let mut config = ztdns_core::config::ZtdnsConfig::new();
    config.daemon.interval_secs = interval_secs;
    config.daemon.event_channel_capacity = 100;
    config.watcher.debounce_ms = 50;
    config
}
