// # Netlink Watcher
//
// Subscribes a `NETLINK_ROUTE` socket to `RTMGRP_LINK` and forwards one
// [`InterfaceEvent`] per link update.
//
// Names already present when watching starts are seeded from sysfs, so the
// first update for an existing interface is classified as up/down rather
// than added.
//
// A receive-queue overrun (`ENOBUFS`) drops updates but leaves the socket
// usable. The watcher then re-reads sysfs and reports the names that came
// or went in the meantime. Any other socket error ends the watcher.

use crate::classify::decode;
use crate::poll::{LinkLister, SysfsLinks};
use async_trait::async_trait;
use netlink_sys::{AsyncSocket, AsyncSocketExt, SocketAddr, TokioSocket, protocols::NETLINK_ROUTE};
use std::collections::{BTreeMap, HashSet};
use std::io;
use std::path::PathBuf;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use ztdns_core::traits::{InterfaceEvent, InterfaceEventKind, InterfaceWatcher, stopped};
use ztdns_core::{Error, Result};

/// Event-driven watcher on the kernel link-state stream
pub struct NetlinkWatcher {
    /// Used to seed the set of known interface names
    seed: SysfsLinks,
}

impl NetlinkWatcher {
    /// Create a watcher seeding names from `/sys/class/net`
    pub fn new() -> Self {
        Self {
            seed: SysfsLinks::new(),
        }
    }

    /// Seed names from a different sysfs root
    pub fn with_sysfs_root(root: impl Into<PathBuf>) -> Self {
        Self {
            seed: SysfsLinks::with_root(root),
        }
    }

    fn open_socket() -> Result<TokioSocket> {
        let mut socket = TokioSocket::new(NETLINK_ROUTE)
            .map_err(|e| Error::watcher(format!("Failed to open netlink socket: {}", e)))?;
        socket
            .socket_mut()
            .bind(&SocketAddr::new(0, libc::RTMGRP_LINK as u32))
            .map_err(|e| Error::watcher(format!("Failed to subscribe to link updates: {}", e)))?;
        Ok(socket)
    }
}

impl Default for NetlinkWatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether the socket is still usable after `err`
fn is_transient(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::ENOBUFS)
        || matches!(
            err.kind(),
            io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
        )
}

/// Bring `known` in line with `links`, returning what changed
fn resync(known: &mut HashSet<String>, links: &BTreeMap<String, u32>) -> Vec<InterfaceEvent> {
    let mut gone: Vec<String> = known
        .iter()
        .filter(|name| !links.contains_key(*name))
        .cloned()
        .collect();
    gone.sort();

    let mut events: Vec<InterfaceEvent> = gone
        .into_iter()
        .map(|name| {
            known.remove(&name);
            InterfaceEvent::new(name, InterfaceEventKind::Removed, 0)
        })
        .collect();

    for (name, index) in links {
        if known.insert(name.clone()) {
            events.push(InterfaceEvent::new(name.clone(), InterfaceEventKind::Added, *index));
        }
    }
    events
}

#[async_trait]
impl InterfaceWatcher for NetlinkWatcher {
    async fn watch(
        &self,
        events: mpsc::Sender<InterfaceEvent>,
        mut stop: watch::Receiver<bool>,
    ) -> Result<()> {
        let mut known: HashSet<String> = match self.seed.list().await {
            Ok(links) => links.into_keys().collect(),
            Err(e) => {
                warn!("Could not list existing interfaces: {}", e);
                HashSet::new()
            }
        };

        let mut socket = Self::open_socket()?;
        info!("Watching link updates via netlink ({} known interfaces)", known.len());

        loop {
            tokio::select! {
                biased;

                _ = stopped(&mut stop) => {
                    debug!("Netlink watcher stopping");
                    return Ok(());
                }

                received = socket.recv_from_full() => {
                    let events_out = match received {
                        Ok((buf, _)) => decode(&buf, &mut known),
                        Err(e) if is_transient(&e) => {
                            warn!("netlink receive failed, resyncing from sysfs: {}", e);
                            match self.seed.list().await {
                                Ok(links) => resync(&mut known, &links),
                                Err(e) => {
                                    warn!("Could not list interfaces after overrun: {}", e);
                                    Vec::new()
                                }
                            }
                        }
                        Err(e) => {
                            return Err(Error::watcher(format!("netlink receive failed: {}", e)));
                        }
                    };
                    for event in events_out {
                        if *stop.borrow() || events.send(event).await.is_err() {
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    fn watcher_name(&self) -> &'static str {
        "netlink"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrun_is_transient() {
        assert!(is_transient(&io::Error::from_raw_os_error(libc::ENOBUFS)));
        assert!(is_transient(&io::Error::from(io::ErrorKind::Interrupted)));
        assert!(is_transient(&io::Error::from(io::ErrorKind::WouldBlock)));
    }

    #[test]
    fn test_socket_failures_are_fatal() {
        assert!(!is_transient(&io::Error::from_raw_os_error(libc::EBADF)));
        assert!(!is_transient(&io::Error::from_raw_os_error(libc::ENOTSOCK)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::PermissionDenied)));
    }

    #[test]
    fn test_resync_reports_missed_changes() {
        let mut known = HashSet::from(["eth0".to_string(), "zt0".to_string()]);
        let links = BTreeMap::from([("eth0".to_string(), 2), ("zt1".to_string(), 7)]);

        let events = resync(&mut known, &links);
        assert_eq!(
            events,
            vec![
                InterfaceEvent::new("zt0", InterfaceEventKind::Removed, 0),
                InterfaceEvent::new("zt1", InterfaceEventKind::Added, 7),
            ]
        );
        assert_eq!(known, HashSet::from(["eth0".to_string(), "zt1".to_string()]));

        // already in sync
        assert!(resync(&mut known, &links).is_empty());
    }
}
