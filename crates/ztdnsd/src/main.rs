// # ztdnsd - overlay DNS sync daemon
//
// A thin integration layer: it reads configuration from environment
// variables, sets up logging and the runtime, builds the directory source,
// the DNS backend and the optional interface watcher, and hands them to the
// `ztdns-core` scheduler. All reconciliation logic lives in `ztdns-core` and
// the backend crates.
//
// ## Configuration
//
// ### Directory service
// - `ZTDNS_API_URL`: Local API base URL (default `http://127.0.0.1:9993`)
// - `ZTDNS_API_TOKEN`: API token
// - `ZTDNS_API_TOKEN_FILE`: File holding the API token (used when `ZTDNS_API_TOKEN` is unset)
//
// ### Backend
// - `ZTDNS_BACKEND`: `networkd` (default) or `resolved`
// - `ZTDNS_NETWORKD_DIR`: Unit file directory (default `/etc/systemd/network`)
// - `ZTDNS_RECONCILE`: Delete stale unit files (default `true`)
// - `ZTDNS_AUTO_RESTART`: Reload networkd after changes (default `true`)
//
// ### Desired state
// - `ZTDNS_ADD_REVERSE_DOMAINS`: Add reverse-lookup domains (default `true`)
// - `ZTDNS_DNS_OVER_TLS`: Enable DNS-over-TLS (default `false`)
// - `ZTDNS_MULTICAST_DNS`: Enable multicast DNS (default `false`)
// - `ZTDNS_FILTERS`: Filter rules as an inline JSON array
// - `ZTDNS_FILTERS_FILE`: File holding the filter rules JSON array
//
// ### Scheduling
// - `ZTDNS_INTERVAL_SECS`: Seconds between passes, `0` runs a single pass and exits (default `60`)
// - `ZTDNS_WATCH`: `off` (default), `netlink` or `poll`
// - `ZTDNS_WATCH_POLL_SECS`: Poll interval for `poll` (default `5`)
// - `ZTDNS_DEBOUNCE_MS`: Quiet window before interface changes trigger a pass (default `2000`)
// - `ZTDNS_RESTORE_ON_EXIT`: Restore changed interfaces on shutdown (default `true`)
// - `ZTDNS_DRY_RUN`: Compute and log, change nothing (default `false`)
// - `ZTDNS_LOG_LEVEL`: trace, debug, info, warn, error (default `info`)
//
// ## Example
//
// ```bash
// export ZTDNS_API_TOKEN_FILE=/var/lib/zerotier-one/authtoken.secret
// export ZTDNS_BACKEND=resolved
// export ZTDNS_WATCH=netlink
// export ZTDNS_FILTERS='[{"type":"name","conditions":[{"pattern":"prod-*"}]}]'
//
// ztdnsd
// ```

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;
use ztdns_core::config::{
    DEFAULT_DIRECTORY_URL, DEFAULT_NETWORKD_DIR, DaemonConfig, DirectoryConfig, WatcherConfig,
};
use ztdns_core::{
    BackendConfig, Daemon, DesiredStateOptions, DnsBackend, EngineEvent, FilterRuleConfig,
    InterfaceWatcher, WatchMode, ZtdnsConfig,
};
use ztdns_networkd::NetworkdBackend;
use ztdns_resolved::ResolvedBackend;
use ztdns_zerotier::ZeroTierSource;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum ZtdnsExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<ZtdnsExitCode> for ExitCode {
    fn from(code: ZtdnsExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Failure of [`run_daemon`], split by exit code
enum DaemonError {
    Startup(anyhow::Error),
    Runtime(anyhow::Error),
}

/// Settings read from the environment
struct Settings {
    config: ZtdnsConfig,
    log_level: String,
}

impl Settings {
    /// Load settings from environment variables
    fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load settings through `lookup`
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let auth_token = match (var("ZTDNS_API_TOKEN"), var("ZTDNS_API_TOKEN_FILE")) {
            (Some(token), _) => token,
            (None, Some(path)) => std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read ZTDNS_API_TOKEN_FILE {}", path))?
                .trim()
                .to_string(),
            (None, None) => String::new(),
        };

        let directory = DirectoryConfig {
            url: var("ZTDNS_API_URL").unwrap_or_else(|| DEFAULT_DIRECTORY_URL.to_string()),
            auth_token,
            ..DirectoryConfig::default()
        };

        let backend = match var("ZTDNS_BACKEND").as_deref().unwrap_or("networkd") {
            "networkd" => BackendConfig::Networkd {
                directory: var("ZTDNS_NETWORKD_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_NETWORKD_DIR)),
                reconcile: parse_bool("ZTDNS_RECONCILE", var("ZTDNS_RECONCILE"), true)?,
                auto_restart: parse_bool("ZTDNS_AUTO_RESTART", var("ZTDNS_AUTO_RESTART"), true)?,
            },
            "resolved" => BackendConfig::Resolved,
            other => anyhow::bail!(
                "ZTDNS_BACKEND '{}' is not supported. \
                Supported backends: networkd, resolved",
                other
            ),
        };

        let filters_json = match (var("ZTDNS_FILTERS"), var("ZTDNS_FILTERS_FILE")) {
            (Some(json), _) => Some(json),
            (None, Some(path)) => Some(
                std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read ZTDNS_FILTERS_FILE {}", path))?,
            ),
            (None, None) => None,
        };
        let filters: Vec<FilterRuleConfig> = match filters_json {
            Some(json) => serde_json::from_str(&json).context("Invalid filter rules JSON")?,
            None => Vec::new(),
        };

        let desired = DesiredStateOptions {
            add_reverse_domains: parse_bool(
                "ZTDNS_ADD_REVERSE_DOMAINS",
                var("ZTDNS_ADD_REVERSE_DOMAINS"),
                true,
            )?,
            dns_over_tls: parse_bool("ZTDNS_DNS_OVER_TLS", var("ZTDNS_DNS_OVER_TLS"), false)?,
            multicast_dns: parse_bool("ZTDNS_MULTICAST_DNS", var("ZTDNS_MULTICAST_DNS"), false)?,
        };

        let mut daemon = DaemonConfig {
            restore_on_exit: parse_bool("ZTDNS_RESTORE_ON_EXIT", var("ZTDNS_RESTORE_ON_EXIT"), true)?,
            ..DaemonConfig::default()
        };
        if let Some(secs) = parse_number("ZTDNS_INTERVAL_SECS", var("ZTDNS_INTERVAL_SECS"))? {
            daemon.interval_secs = secs;
        }

        let mut watcher = WatcherConfig::default();
        match var("ZTDNS_WATCH").as_deref().unwrap_or("off") {
            "off" => {}
            "netlink" => {
                watcher.enabled = true;
                watcher.mode = WatchMode::Netlink;
            }
            "poll" => {
                watcher.enabled = true;
                watcher.mode = WatchMode::Poll;
            }
            other => anyhow::bail!(
                "ZTDNS_WATCH '{}' is not supported. \
                Supported modes: off, netlink, poll",
                other
            ),
        }
        if let Some(secs) = parse_number("ZTDNS_WATCH_POLL_SECS", var("ZTDNS_WATCH_POLL_SECS"))? {
            watcher.poll_interval_secs = secs;
        }
        if let Some(ms) = parse_number("ZTDNS_DEBOUNCE_MS", var("ZTDNS_DEBOUNCE_MS"))? {
            watcher.debounce_ms = ms;
        }

        let config = ZtdnsConfig {
            directory,
            backend,
            filters,
            desired,
            daemon,
            watcher,
            dry_run: parse_bool("ZTDNS_DRY_RUN", var("ZTDNS_DRY_RUN"), false)?,
        };

        Ok(Self {
            config,
            log_level: var("ZTDNS_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Validate the settings
    fn validate(&self) -> Result<()> {
        self.config.validate()?;

        if self.config.directory.auth_token.is_empty() {
            anyhow::bail!(
                "ZTDNS_API_TOKEN is required. \
                Set it via: export ZTDNS_API_TOKEN_FILE=/var/lib/zerotier-one/authtoken.secret"
            );
        }

        if self.config.directory.url.starts_with("http://")
            && !self.config.directory.url.starts_with("http://127.0.0.1")
            && !self.config.directory.url.starts_with("http://localhost")
        {
            eprintln!(
                "WARNING: ZTDNS_API_URL uses plain HTTP to a remote host. \
                The API token is sent in clear text."
            );
        }

        if cfg!(not(target_os = "linux"))
            && self.config.watcher.enabled
            && self.config.watcher.mode == WatchMode::Netlink
        {
            anyhow::bail!("ZTDNS_WATCH=netlink is only available on Linux. Use ZTDNS_WATCH=poll");
        }

        parse_level(&self.log_level)?;
        Ok(())
    }
}

/// Parse a boolean variable, `default` when unset
fn parse_bool(name: &str, value: Option<String>, default: bool) -> Result<bool> {
    let Some(value) = value else {
        return Ok(default);
    };
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => anyhow::bail!("{} must be true or false. Got: {}", name, value),
    }
}

/// Parse an unsigned numeric variable
fn parse_number(name: &str, value: Option<String>) -> Result<Option<u64>> {
    value
        .map(|v| {
            v.parse()
                .with_context(|| format!("{} must be a non-negative integer. Got: {}", name, v))
        })
        .transpose()
}

/// Parse a log level name
fn parse_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => anyhow::bail!(
            "ZTDNS_LOG_LEVEL '{}' is not valid. \
            Valid levels: trace, debug, info, warn, error",
            level
        ),
    }
}

fn main() -> ExitCode {
    // Load configuration from environment
    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return ZtdnsExitCode::ConfigError.into();
        }
    };

    // Validate configuration
    if let Err(e) = settings.validate() {
        eprintln!("Configuration validation error: {:#}", e);
        return ZtdnsExitCode::ConfigError.into();
    }

    // Initialize tracing
    let log_level = parse_level(&settings.log_level).unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return ZtdnsExitCode::ConfigError.into();
    }

    info!("Starting ztdnsd daemon");
    info!(
        "Configuration loaded: backend={}, {} filter rule(s), dry_run={}",
        settings.config.backend.type_name(),
        settings.config.filters.len(),
        settings.config.dry_run
    );

    // Enter tokio runtime
    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return ZtdnsExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        match run_daemon(settings.config).await {
            Ok(()) => ZtdnsExitCode::CleanShutdown,
            Err(DaemonError::Startup(e)) => {
                error!("Startup error: {:#}", e);
                ZtdnsExitCode::ConfigError
            }
            Err(DaemonError::Runtime(e)) => {
                error!("Daemon error: {:#}", e);
                ZtdnsExitCode::RuntimeError
            }
        }
    });

    result.into()
}

/// Build the configured backend
fn build_backend(config: &ZtdnsConfig) -> Result<Box<dyn DnsBackend>> {
    let backend: Box<dyn DnsBackend> = match &config.backend {
        networkd @ BackendConfig::Networkd { .. } => {
            Box::new(NetworkdBackend::from_config(networkd, config.dry_run)?)
        }
        BackendConfig::Resolved => Box::new(ResolvedBackend::new().with_dry_run(config.dry_run)),
    };
    Ok(backend)
}

/// Build the configured interface watcher, if any
fn build_watcher(config: &WatcherConfig) -> Result<Option<Arc<dyn InterfaceWatcher>>> {
    if !config.enabled {
        return Ok(None);
    }

    let watcher: Arc<dyn InterfaceWatcher> = match config.mode {
        #[cfg(target_os = "linux")]
        WatchMode::Netlink => Arc::new(ztdns_netlink::NetlinkWatcher::new()),
        #[cfg(not(target_os = "linux"))]
        WatchMode::Netlink => anyhow::bail!("netlink watching is only available on Linux"),
        WatchMode::Poll => Arc::new(ztdns_netlink::PollWatcher::new(Duration::from_secs(
            config.poll_interval_secs,
        ))),
    };
    Ok(Some(watcher))
}

/// Log engine events until the daemon drops its sender
async fn log_events(mut events: mpsc::Receiver<EngineEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            EngineEvent::Started { interval, watching } => {
                info!("Engine started (interval {:?}, watching: {})", interval, watching)
            }
            EngineEvent::PassStarted { trigger } => debug!("Pass started ({})", trigger),
            EngineEvent::PassCompleted { trigger, report } => info!(
                "Pass completed ({}): {} changed, {} unchanged, {} removed, {} failed",
                trigger,
                report.changed.len(),
                report.unchanged.len(),
                report.removed.len(),
                report.failed.len()
            ),
            EngineEvent::FetchFailed { error } => warn!("Directory fetch failed: {}", error),
            EngineEvent::InterfacesChanged { events } => {
                debug!("{} interface change(s) observed", events.len())
            }
            EngineEvent::Restored { interfaces } => {
                info!("Restored interfaces: {:?}", interfaces)
            }
            EngineEvent::Stopped { reason } => info!("Engine stopped: {}", reason),
        }
    }
}

/// Run the daemon
async fn run_daemon(config: ZtdnsConfig) -> std::result::Result<(), DaemonError> {
    let source = ZeroTierSource::from_config(&config.directory)
        .context("Failed to create directory client")
        .map_err(DaemonError::Startup)?;
    let backend = build_backend(&config).map_err(DaemonError::Startup)?;

    info!("Checking {} backend availability", backend.backend_name());
    backend
        .check_available()
        .await
        .context("DNS backend unavailable")
        .map_err(DaemonError::Startup)?;

    let watcher = build_watcher(&config.watcher).map_err(DaemonError::Startup)?;

    let (mut daemon, events) = Daemon::new(Box::new(source), backend, &config)
        .context("Failed to create daemon")
        .map_err(DaemonError::Startup)?;
    if let Some(watcher) = watcher {
        info!("Watching interfaces via {}", watcher.watcher_name());
        daemon = daemon.with_watcher(watcher);
    }

    let event_logger = tokio::spawn(log_events(events));

    let result = if config.daemon.interval_secs == 0 {
        info!("Interval is 0, running a single pass");
        daemon
            .run_once()
            .await
            .map(|report| {
                info!(
                    "Single pass finished: {} changed, {} failed",
                    report.changed.len(),
                    report.failed.len()
                )
            })
            .context("Reconciliation pass failed")
    } else {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let signals = tokio::spawn(async move {
            match wait_for_shutdown().await {
                Ok(signal) => info!("Received shutdown signal: {}", signal),
                Err(e) => error!("Signal handling failed, shutting down: {}", e),
            }
            let _ = shutdown_tx.send(());
        });

        let result = daemon.run(shutdown_rx).await.context("Daemon loop failed");
        signals.abort();
        result
    };

    drop(daemon);
    let _ = event_logger.await;

    result.map_err(DaemonError::Runtime)?;
    info!("Shutdown complete");
    Ok(())
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
///
/// # Returns
///
/// Returns the name of the signal received.
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Wait for shutdown signals (SIGINT only)
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use ztdns_core::config::FilterKind;

    fn settings(vars: &[(&str, &str)]) -> Result<Settings> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let settings = settings(&[("ZTDNS_API_TOKEN", "secret")]).unwrap();
        let config = &settings.config;

        assert_eq!(config.directory.url, DEFAULT_DIRECTORY_URL);
        assert_eq!(config.directory.auth_token, "secret");
        assert_eq!(config.backend, BackendConfig::default());
        assert!(config.filters.is_empty());
        assert!(config.desired.add_reverse_domains);
        assert_eq!(config.daemon.interval_secs, 60);
        assert!(config.daemon.restore_on_exit);
        assert!(!config.watcher.enabled);
        assert!(!config.dry_run);
        assert_eq!(settings.log_level, "info");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_full_environment() {
        let settings = settings(&[
            ("ZTDNS_API_URL", "http://127.0.0.1:9999"),
            ("ZTDNS_API_TOKEN", "secret"),
            ("ZTDNS_BACKEND", "resolved"),
            ("ZTDNS_INTERVAL_SECS", "0"),
            ("ZTDNS_DNS_OVER_TLS", "yes"),
            ("ZTDNS_ADD_REVERSE_DOMAINS", "false"),
            ("ZTDNS_WATCH", "poll"),
            ("ZTDNS_WATCH_POLL_SECS", "10"),
            ("ZTDNS_DEBOUNCE_MS", "500"),
            ("ZTDNS_DRY_RUN", "1"),
            (
                "ZTDNS_FILTERS",
                r#"[{"type":"name","conditions":[{"pattern":"prod-*"}]},{"type":"online","negate":true}]"#,
            ),
            ("ZTDNS_LOG_LEVEL", "debug"),
        ])
        .unwrap();
        let config = &settings.config;

        assert_eq!(config.directory.url, "http://127.0.0.1:9999");
        assert_eq!(config.backend, BackendConfig::Resolved);
        assert_eq!(config.daemon.interval_secs, 0);
        assert!(config.desired.dns_over_tls);
        assert!(!config.desired.add_reverse_domains);
        assert!(config.watcher.enabled);
        assert_eq!(config.watcher.mode, WatchMode::Poll);
        assert_eq!(config.watcher.poll_interval_secs, 10);
        assert_eq!(config.watcher.debounce_ms, 500);
        assert!(config.dry_run);
        assert_eq!(config.filters.len(), 2);
        assert_eq!(config.filters[0].kind, FilterKind::Name);
        assert!(config.filters[1].negate);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_networkd_settings() {
        let settings = settings(&[
            ("ZTDNS_API_TOKEN", "secret"),
            ("ZTDNS_NETWORKD_DIR", "/run/systemd/network"),
            ("ZTDNS_RECONCILE", "false"),
        ])
        .unwrap();

        assert_eq!(
            settings.config.backend,
            BackendConfig::Networkd {
                directory: PathBuf::from("/run/systemd/network"),
                reconcile: false,
                auto_restart: true,
            }
        );
    }

    #[test]
    fn test_token_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("authtoken.secret");
        std::fs::write(&path, "from-file\n").unwrap();

        let settings = settings(&[("ZTDNS_API_TOKEN_FILE", path.to_str().unwrap())]).unwrap();
        assert_eq!(settings.config.directory.auth_token, "from-file");
    }

    #[test]
    fn test_rejected_values() {
        assert!(settings(&[("ZTDNS_BACKEND", "bind")]).is_err());
        assert!(settings(&[("ZTDNS_WATCH", "inotify")]).is_err());
        assert!(settings(&[("ZTDNS_DRY_RUN", "maybe")]).is_err());
        assert!(settings(&[("ZTDNS_INTERVAL_SECS", "-1")]).is_err());
        assert!(settings(&[("ZTDNS_FILTERS", "{not json")]).is_err());
        assert!(settings(&[("ZTDNS_API_TOKEN_FILE", "/nonexistent/ztdns/token")]).is_err());
    }

    #[test]
    fn test_validation_failures() {
        // token missing
        assert!(settings(&[]).unwrap().validate().is_err());

        let bad_level = settings(&[("ZTDNS_API_TOKEN", "secret"), ("ZTDNS_LOG_LEVEL", "loud")]);
        assert!(bad_level.unwrap().validate().is_err());

        let zero_debounce = settings(&[
            ("ZTDNS_API_TOKEN", "secret"),
            ("ZTDNS_WATCH", "poll"),
            ("ZTDNS_DEBOUNCE_MS", "0"),
        ]);
        assert!(zero_debounce.unwrap().validate().is_err());
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("X", None, true).unwrap());
        assert!(!parse_bool("X", Some("OFF".to_string()), true).unwrap());
        assert!(parse_bool("X", Some("On".to_string()), false).unwrap());
        assert!(parse_bool("X", Some("2".to_string()), false).is_err());
    }
}
