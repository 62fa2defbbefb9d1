// # Managed Interface Store
//
// Records the pre-change resolver state of every interface the live backend
// touches, and whether a mutation was actually applied.
//
// ## Invariants
//
// - A record is only ever created together with a snapshot of the state that
//   existed before the first mutation (`capture`).
// - A record is only owed a revert once `changed` is set (`mark_changed`).
//
// Both the reconciliation pass and the shutdown restore path go through the
// same mutex.

use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Resolver settings of one interface at a point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceSnapshot {
    /// DNS servers
    pub dns_servers: BTreeSet<String>,
    /// Search domains; routing-only domains carry a leading `~`
    pub domains: BTreeSet<String>,
    /// DNS-over-TLS mode as reported by the resolver ("yes", "no", "opportunistic")
    pub dns_over_tls: Option<String>,
    /// Multicast DNS mode as reported by the resolver ("yes", "no", "resolve")
    pub multicast_dns: Option<String>,
}

impl InterfaceSnapshot {
    /// Create a snapshot of servers and domains only
    pub fn new<I, J, S, T>(dns_servers: I, domains: J) -> Self
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        Self {
            dns_servers: dns_servers.into_iter().map(Into::into).collect(),
            domains: domains.into_iter().map(Into::into).collect(),
            dns_over_tls: None,
            multicast_dns: None,
        }
    }
}

/// Pre-change state of an interface taken over by this process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedInterfaceRecord {
    /// Host interface name
    pub interface: String,
    /// State captured before the first mutation
    pub original: InterfaceSnapshot,
    /// Set once a mutation has been applied successfully
    pub changed: bool,
    /// When the original state was captured
    pub captured_at: DateTime<Utc>,
}

/// Mutex-guarded map of managed interfaces
///
/// Cloning yields another handle to the same map.
#[derive(Debug, Clone, Default)]
pub struct ManagedInterfaceStore {
    inner: Arc<Mutex<HashMap<String, ManagedInterfaceRecord>>>,
}

impl ManagedInterfaceStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the pre-change state of `interface`
    ///
    /// Idempotent: once a record exists the first snapshot is kept and `false`
    /// is returned.
    pub async fn capture(&self, interface: &str, original: InterfaceSnapshot) -> bool {
        let mut guard = self.inner.lock().await;
        if guard.contains_key(interface) {
            return false;
        }
        guard.insert(
            interface.to_string(),
            ManagedInterfaceRecord {
                interface: interface.to_string(),
                original,
                changed: false,
                captured_at: Utc::now(),
            },
        );
        true
    }

    /// Flag `interface` as mutated by this process
    ///
    /// Returns `false` when there is no record, in which case nothing is
    /// flagged.
    pub async fn mark_changed(&self, interface: &str) -> bool {
        let mut guard = self.inner.lock().await;
        match guard.get_mut(interface) {
            Some(record) => {
                record.changed = true;
                true
            }
            None => false,
        }
    }

    /// Get a copy of the record for `interface`
    pub async fn get(&self, interface: &str) -> Option<ManagedInterfaceRecord> {
        self.inner.lock().await.get(interface).cloned()
    }

    /// Remove and return the record for `interface`
    pub async fn remove(&self, interface: &str) -> Option<ManagedInterfaceRecord> {
        self.inner.lock().await.remove(interface)
    }

    /// Names of all managed interfaces, sorted
    pub async fn interfaces(&self) -> Vec<String> {
        let guard = self.inner.lock().await;
        let mut names: Vec<String> = guard.keys().cloned().collect();
        names.sort();
        names
    }

    /// Records whose `changed` flag is set, sorted by interface
    pub async fn changed_interfaces(&self) -> Vec<ManagedInterfaceRecord> {
        let guard = self.inner.lock().await;
        let mut records: Vec<ManagedInterfaceRecord> =
            guard.values().filter(|r| r.changed).cloned().collect();
        records.sort_by(|a, b| a.interface.cmp(&b.interface));
        records
    }

    /// Number of records
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    /// True when no interface is managed
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_capture_is_idempotent() {
        let store = ManagedInterfaceStore::new();

        assert!(store.capture("zt0", InterfaceSnapshot::new(["1.1.1.1"], ["lan"])).await);
        assert!(!store.capture("zt0", InterfaceSnapshot::new(["9.9.9.9"], ["other"])).await);

        let record = store.get("zt0").await.unwrap();
        assert_eq!(record.original, InterfaceSnapshot::new(["1.1.1.1"], ["lan"]));
        assert!(!record.changed);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_only_changed_records_are_listed() {
        let store = ManagedInterfaceStore::new();
        store.capture("zt1", InterfaceSnapshot::default()).await;
        store.capture("zt0", InterfaceSnapshot::default()).await;

        assert!(store.changed_interfaces().await.is_empty());
        assert!(store.mark_changed("zt1").await);

        let changed: Vec<_> = store
            .changed_interfaces()
            .await
            .into_iter()
            .map(|r| r.interface)
            .collect();
        assert_eq!(changed, vec!["zt1"]);
        assert_eq!(store.interfaces().await, vec!["zt0", "zt1"]);
    }

    #[tokio::test]
    async fn test_mark_changed_requires_record() {
        let store = ManagedInterfaceStore::new();
        assert!(!store.mark_changed("zt0").await);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let store = ManagedInterfaceStore::new();
        let other = store.clone();
        store.capture("zt0", InterfaceSnapshot::default()).await;

        assert!(other.remove("zt0").await.is_some());
        assert!(store.get("zt0").await.is_none());
    }
}
