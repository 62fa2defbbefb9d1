// # Interface Change Watchers
//
// This crate provides the two interchangeable interface watcher strategies
// for ztdns.
//
// ## Strategies
//
// - [`NetlinkWatcher`] (Linux): subscribes to the kernel link-state stream
//   (`RTMGRP_LINK`) and classifies every update as added/removed/up/down.
// - [`PollWatcher`]: lists links on a fixed interval and diffs consecutive
//   snapshots into added/removed events.
//
// Both forward one event per change; batching happens in the core
// debouncer. Both return promptly once the stop signal is raised.
//
// ## Platform Support
//
// The netlink strategy only compiles on Linux. Polling works wherever the
// [`LinkLister`] in use does.

pub mod poll;

#[cfg(target_os = "linux")]
pub mod classify;

#[cfg(target_os = "linux")]
pub mod netlink;

pub use poll::{LinkLister, PollWatcher, SysfsLinks};

#[cfg(target_os = "linux")]
pub use netlink::NetlinkWatcher;
