// # Poll Watcher
//
// Lists the host's links on a fixed interval and turns the difference
// between consecutive snapshots into added/removed events. The first
// snapshot is the baseline and produces no events.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::IntervalStream;
use tracing::{debug, info, warn};
use ztdns_core::traits::{InterfaceEvent, InterfaceEventKind, InterfaceWatcher, stopped};
use ztdns_core::Result;

/// Default location of per-interface sysfs entries
pub const DEFAULT_SYSFS_NET: &str = "/sys/class/net";

/// Lists the host's network interfaces
#[async_trait]
pub trait LinkLister: Send + Sync {
    /// Current interfaces, name to kernel index (0 when unknown)
    async fn list(&self) -> Result<BTreeMap<String, u32>>;
}

/// [`LinkLister`] reading `/sys/class/net`
#[derive(Debug, Clone)]
pub struct SysfsLinks {
    root: PathBuf,
}

impl SysfsLinks {
    /// List `/sys/class/net`
    pub fn new() -> Self {
        Self::with_root(DEFAULT_SYSFS_NET)
    }

    /// List a different directory laid out like `/sys/class/net`
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Default for SysfsLinks {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LinkLister for SysfsLinks {
    async fn list(&self) -> Result<BTreeMap<String, u32>> {
        let mut links = BTreeMap::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let index = tokio::fs::read_to_string(entry.path().join("ifindex"))
                .await
                .ok()
                .and_then(|raw| raw.trim().parse().ok())
                .unwrap_or(0);
            links.insert(name, index);
        }

        Ok(links)
    }
}

/// Interval-driven watcher diffing link snapshots
pub struct PollWatcher {
    lister: Box<dyn LinkLister>,
    interval: Duration,
}

impl PollWatcher {
    /// Poll `/sys/class/net` every `interval`
    pub fn new(interval: Duration) -> Self {
        Self::with_lister(Box::new(SysfsLinks::new()), interval)
    }

    /// Poll a specific lister every `interval`
    pub fn with_lister(lister: Box<dyn LinkLister>, interval: Duration) -> Self {
        Self { lister, interval }
    }
}

/// Events turning `previous` into `current`
fn diff(previous: &BTreeMap<String, u32>, current: &BTreeMap<String, u32>) -> Vec<InterfaceEvent> {
    let removed = previous
        .iter()
        .filter(|(name, _)| !current.contains_key(*name))
        .map(|(name, index)| InterfaceEvent::new(name.clone(), InterfaceEventKind::Removed, *index));
    let added = current
        .iter()
        .filter(|(name, _)| !previous.contains_key(*name))
        .map(|(name, index)| InterfaceEvent::new(name.clone(), InterfaceEventKind::Added, *index));
    removed.chain(added).collect()
}

#[async_trait]
impl InterfaceWatcher for PollWatcher {
    async fn watch(
        &self,
        events: mpsc::Sender<InterfaceEvent>,
        mut stop: watch::Receiver<bool>,
    ) -> Result<()> {
        let mut previous = self.lister.list().await?;
        info!(
            "Polling interfaces every {:?} ({} present)",
            self.interval,
            previous.len()
        );

        let mut interval = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks = IntervalStream::new(interval);

        loop {
            tokio::select! {
                biased;

                _ = stopped(&mut stop) => {
                    debug!("Poll watcher stopping");
                    return Ok(());
                }

                Some(_) = ticks.next() => {
                    let current = match self.lister.list().await {
                        Ok(current) => current,
                        Err(e) => {
                            warn!("Failed to list interfaces: {}", e);
                            continue;
                        }
                    };
                    for event in diff(&previous, &current) {
                        if *stop.borrow() || events.send(event).await.is_err() {
                            return Ok(());
                        }
                    }
                    previous = current;
                }
            }
        }
    }

    fn watcher_name(&self) -> &'static str {
        "poll"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// A LinkLister whose contents the test controls
    #[derive(Clone, Default)]
    struct FakeLinks {
        links: Arc<Mutex<BTreeMap<String, u32>>>,
    }

    impl FakeLinks {
        fn set(&self, names: &[(&str, u32)]) {
            *self.links.lock().unwrap() = names.iter().map(|(n, i)| (n.to_string(), *i)).collect();
        }
    }

    #[async_trait]
    impl LinkLister for FakeLinks {
        async fn list(&self) -> Result<BTreeMap<String, u32>> {
            Ok(self.links.lock().unwrap().clone())
        }
    }

    #[test]
    fn test_diff() {
        let previous = BTreeMap::from([("eth0".to_string(), 2), ("zt0".to_string(), 4)]);
        let current = BTreeMap::from([("eth0".to_string(), 2), ("zt1".to_string(), 5)]);
        assert_eq!(
            diff(&previous, &current),
            vec![
                InterfaceEvent::new("zt0", InterfaceEventKind::Removed, 4),
                InterfaceEvent::new("zt1", InterfaceEventKind::Added, 5),
            ]
        );
        assert!(diff(&current, &current).is_empty());
    }

    #[tokio::test]
    async fn test_sysfs_listing() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("lo")).unwrap();
        std::fs::write(root.path().join("lo").join("ifindex"), "1\n").unwrap();
        std::fs::create_dir(root.path().join("zt0")).unwrap();

        let links = SysfsLinks::with_root(root.path()).list().await.unwrap();
        assert_eq!(links, BTreeMap::from([("lo".to_string(), 1), ("zt0".to_string(), 0)]));

        assert!(SysfsLinks::with_root(root.path().join("missing")).list().await.is_err());
    }

    #[tokio::test]
    async fn test_poll_reports_changes_and_stops() {
        let links = FakeLinks::default();
        links.set(&[("eth0", 2)]);

        let watcher = PollWatcher::with_lister(Box::new(links.clone()), Duration::from_millis(30));
        let (event_tx, mut event_rx) = mpsc::channel(16);
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(async move { watcher.watch(event_tx, stop_rx).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        links.set(&[("eth0", 2), ("zt0", 4)]);
        let event = tokio::time::timeout(Duration::from_secs(2), event_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, InterfaceEvent::new("zt0", InterfaceEventKind::Added, 4));

        links.set(&[("eth0", 2)]);
        let event = tokio::time::timeout(Duration::from_secs(2), event_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.kind, InterfaceEventKind::Removed);

        stop_tx.send(true).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
        assert!(result.is_ok());

        // changes after stop are never reported
        links.set(&[("eth0", 2), ("zt9", 9)]);
        assert!(event_rx.recv().await.is_none());
    }
}
