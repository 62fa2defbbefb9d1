//! Configuration types for the ztdns system
//!
//! This module defines all configuration structures used throughout the workspace.
//! Filter rules are deserialized into typed structures here and compiled once
//! by [`crate::filter::NetworkFilter::compile`].

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default local API of the overlay network controller
pub const DEFAULT_DIRECTORY_URL: &str = "http://127.0.0.1:9993";

/// Default directory for generated networkd unit files
pub const DEFAULT_NETWORKD_DIR: &str = "/etc/systemd/network";

/// Main ztdns configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ZtdnsConfig {
    /// Directory service configuration
    #[serde(default)]
    pub directory: DirectoryConfig,

    /// DNS backend configuration
    #[serde(default)]
    pub backend: BackendConfig,

    /// Network selection rules (empty = every network)
    #[serde(default)]
    pub filters: Vec<FilterRuleConfig>,

    /// Desired-state derivation options
    #[serde(default)]
    pub desired: DesiredStateOptions,

    /// Scheduler settings
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Interface watcher settings
    #[serde(default)]
    pub watcher: WatcherConfig,

    /// Compute everything but change nothing on the host
    #[serde(default)]
    pub dry_run: bool,
}

impl ZtdnsConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.directory.validate()?;
        self.backend.validate()?;
        self.watcher.validate()?;

        if self.daemon.event_channel_capacity == 0 {
            return Err(crate::Error::config("Event channel capacity must be > 0"));
        }

        Ok(())
    }
}

/// Directory service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Base URL of the local API
    #[serde(default = "default_directory_url")]
    pub url: String,

    /// Authentication token sent with every request
    #[serde(default)]
    pub auth_token: String,

    /// Request timeout (in seconds)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl DirectoryConfig {
    /// Validate the directory configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.url.is_empty() {
            return Err(crate::Error::config("Directory service URL cannot be empty"));
        }
        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            return Err(crate::Error::config(format!(
                "Directory service URL must use http or https: {}",
                self.url
            )));
        }
        if self.timeout_secs == 0 {
            return Err(crate::Error::config("Directory service timeout must be > 0"));
        }
        Ok(())
    }
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            url: default_directory_url(),
            auth_token: String::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// DNS backend configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendConfig {
    /// Declarative unit files consumed by systemd-networkd
    Networkd {
        /// Directory the unit files are written to
        #[serde(default = "default_networkd_dir")]
        directory: PathBuf,
        /// Delete managed files whose interface is no longer desired
        #[serde(default = "default_true")]
        reconcile: bool,
        /// Ask networkd to reload after changes
        #[serde(default = "default_true")]
        auto_restart: bool,
    },

    /// Live settings pushed to systemd-resolved
    Resolved,
}

impl BackendConfig {
    /// Validate the backend configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            BackendConfig::Networkd { directory, .. } => {
                if directory.as_os_str().is_empty() {
                    return Err(crate::Error::config("networkd directory cannot be empty"));
                }
                Ok(())
            }
            BackendConfig::Resolved => Ok(()),
        }
    }

    /// Get the backend type name
    pub fn type_name(&self) -> &'static str {
        match self {
            BackendConfig::Networkd { .. } => "networkd",
            BackendConfig::Resolved => "resolved",
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Networkd {
            directory: default_networkd_dir(),
            reconcile: true,
            auto_restart: true,
        }
    }
}

/// How desired state is derived from a network descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredStateOptions {
    /// Add reverse-lookup domains for every assigned subnet
    #[serde(default = "default_true")]
    pub add_reverse_domains: bool,

    /// Enable DNS-over-TLS on managed interfaces
    #[serde(default)]
    pub dns_over_tls: bool,

    /// Enable multicast DNS on managed interfaces
    #[serde(default)]
    pub multicast_dns: bool,
}

impl Default for DesiredStateOptions {
    fn default() -> Self {
        Self {
            add_reverse_domains: true,
            dns_over_tls: false,
            multicast_dns: false,
        }
    }
}

/// Scheduler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Seconds between reconciliation passes (0 = no loop)
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Restore changed interfaces when the daemon stops
    #[serde(default = "default_true")]
    pub restore_on_exit: bool,

    /// Capacity of the engine event channel
    ///
    /// When full, new events are dropped (with a warning log).
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl DaemonConfig {
    /// Interval between passes, `None` when the loop is disabled
    pub fn interval(&self) -> Option<Duration> {
        (self.interval_secs > 0).then(|| Duration::from_secs(self.interval_secs))
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            restore_on_exit: true,
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

/// Interface watcher strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchMode {
    /// Subscribe to the kernel link-state stream
    Netlink,
    /// Periodically list links and diff snapshots
    Poll,
}

/// Interface watcher settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Trigger reconciliation on interface changes
    #[serde(default)]
    pub enabled: bool,

    /// Strategy used when enabled
    #[serde(default = "default_watch_mode")]
    pub mode: WatchMode,

    /// Poll interval for [`WatchMode::Poll`] (in seconds)
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Quiet window before a batch of events is delivered (in milliseconds)
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl WatcherConfig {
    /// Validate the watcher configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if !self.enabled {
            return Ok(());
        }
        if self.debounce_ms == 0 {
            return Err(crate::Error::config("Watcher debounce window must be > 0"));
        }
        if self.mode == WatchMode::Poll && self.poll_interval_secs == 0 {
            return Err(crate::Error::config("Watcher poll interval must be > 0"));
        }
        Ok(())
    }

    /// Debounce quiet window
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: default_watch_mode(),
            poll_interval_secs: default_poll_interval_secs(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

/// Dimension of a network descriptor a filter rule looks at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FilterKind {
    /// Network name
    Name,
    /// Host interface name
    Interface,
    /// Network id
    NetworkId,
    /// Online status ("true" / "false")
    Online,
    /// Address-assigned status ("true" / "false")
    Assigned,
    /// Any assigned address (CIDR or bare address)
    Address,
    /// Any advertised route target
    Route,
    /// Anything else; such rules always evaluate false
    Unknown(String),
}

impl From<String> for FilterKind {
    fn from(value: String) -> Self {
        match value.to_ascii_lowercase().replace('-', "_").as_str() {
            "name" => Self::Name,
            "interface" => Self::Interface,
            "network_id" | "networkid" | "id" => Self::NetworkId,
            "online" => Self::Online,
            "assigned" => Self::Assigned,
            "address" => Self::Address,
            "route" => Self::Route,
            _ => Self::Unknown(value),
        }
    }
}

impl From<FilterKind> for String {
    fn from(kind: FilterKind) -> Self {
        match kind {
            FilterKind::Name => "name".to_string(),
            FilterKind::Interface => "interface".to_string(),
            FilterKind::NetworkId => "network_id".to_string(),
            FilterKind::Online => "online".to_string(),
            FilterKind::Assigned => "assigned".to_string(),
            FilterKind::Address => "address".to_string(),
            FilterKind::Route => "route".to_string(),
            FilterKind::Unknown(other) => other,
        }
    }
}

/// How a result combines with the running result before it
///
/// Unrecognized values fall back to `And`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Combinator {
    /// Both must hold
    #[default]
    And,
    /// Either may hold
    Or,
    /// Running result holds and this one does not
    Not,
}

impl Combinator {
    /// Fold `next` into `acc`
    pub fn combine(self, acc: bool, next: bool) -> bool {
        match self {
            Combinator::And => acc && next,
            Combinator::Or => acc || next,
            Combinator::Not => acc && !next,
        }
    }
}

impl From<String> for Combinator {
    fn from(value: String) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "or" => Self::Or,
            "not" | "and_not" | "and-not" => Self::Not,
            _ => Self::And,
        }
    }
}

impl From<Combinator> for String {
    fn from(combinator: Combinator) -> Self {
        match combinator {
            Combinator::And => "and",
            Combinator::Or => "or",
            Combinator::Not => "not",
        }
        .to_string()
    }
}

/// One pattern inside a filter rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterCondition {
    /// Pattern (`*`/empty = anything, `*` wildcards = glob, leading `^` = regex)
    #[serde(default)]
    pub pattern: String,

    /// How this condition combines with the previous ones in the rule
    #[serde(default)]
    pub combinator: Combinator,
}

impl FilterCondition {
    /// Create an AND condition
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            combinator: Combinator::And,
        }
    }

    /// Create an OR condition
    pub fn or(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            combinator: Combinator::Or,
        }
    }
}

/// A filter rule as loaded from configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRuleConfig {
    /// Dimension the rule matches on
    #[serde(rename = "type")]
    pub kind: FilterKind,

    /// Conditions, evaluated left to right
    #[serde(default)]
    pub conditions: Vec<FilterCondition>,

    /// Invert the rule's own result
    #[serde(default)]
    pub negate: bool,

    /// How the rule combines with the running result of prior rules
    #[serde(default)]
    pub combinator: Combinator,
}

impl FilterRuleConfig {
    /// Create a rule with a single condition
    pub fn new(kind: FilterKind, pattern: impl Into<String>) -> Self {
        Self {
            kind,
            conditions: vec![FilterCondition::new(pattern)],
            negate: false,
            combinator: Combinator::And,
        }
    }

    /// Append another condition
    pub fn with_condition(mut self, condition: FilterCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Invert the rule's result
    pub fn negated(mut self) -> Self {
        self.negate = true;
        self
    }

    /// Set the inter-rule combinator
    pub fn with_combinator(mut self, combinator: Combinator) -> Self {
        self.combinator = combinator;
        self
    }
}

fn default_true() -> bool {
    true
}

fn default_directory_url() -> String {
    DEFAULT_DIRECTORY_URL.to_string()
}

fn default_networkd_dir() -> PathBuf {
    PathBuf::from(DEFAULT_NETWORKD_DIR)
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_interval_secs() -> u64 {
    60
}

fn default_event_channel_capacity() -> usize {
    256
}

fn default_watch_mode() -> WatchMode {
    WatchMode::Netlink
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_debounce_ms() -> u64 {
    2000
}
