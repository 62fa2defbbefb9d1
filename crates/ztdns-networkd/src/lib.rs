// # systemd-networkd Backend
//
// This crate provides the declarative-file DNS backend for ztdns.
//
// ## Architecture
//
// Desired state is expressed as one `99-<interface>.network` unit file per
// interface. A file is only rewritten when its rendered bytes differ from
// what is on disk, so an unchanged desired set costs zero writes and zero
// reloads. Files are owned through a marker on their first line; files
// without it are never touched.
//
// ## Reconciliation
//
// 1. Scan the directory for managed files
// 2. Write every desired file whose content differs
// 3. Delete (or report) managed files whose interface is no longer desired
// 4. Issue at most one reload if anything was written or deleted

pub mod reloader;
pub mod render;

pub use reloader::{NetworkctlReloader, Reloader};
pub use render::{MANAGED_MARKER, file_name, render};

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use ztdns_core::config::{BackendConfig, DEFAULT_NETWORKD_DIR};
use ztdns_core::traits::{DesiredInterfaceState, DnsBackend, ReconcileReport};
use ztdns_core::{Error, Result};

/// Declarative-file DNS backend
pub struct NetworkdBackend {
    /// Directory the unit files live in
    directory: PathBuf,

    /// Delete stale managed files
    reconcile: bool,

    /// Reload networkd after changes
    auto_restart: bool,

    /// Compute but do not write, delete or reload
    dry_run: bool,

    /// Reload mechanism
    reloader: Box<dyn Reloader>,
}

impl NetworkdBackend {
    /// Create a backend for `directory` using `networkctl`
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            reconcile: true,
            auto_restart: true,
            dry_run: false,
            reloader: Box::new(NetworkctlReloader::new()),
        }
    }

    /// Create a backend from configuration
    pub fn from_config(config: &BackendConfig, dry_run: bool) -> Result<Self> {
        match config {
            BackendConfig::Networkd {
                directory,
                reconcile,
                auto_restart,
            } => Ok(Self::new(directory)
                .with_reconcile(*reconcile)
                .with_auto_restart(*auto_restart)
                .with_dry_run(dry_run)),
            other => Err(Error::config(format!(
                "Invalid config for networkd backend: {}",
                other.type_name()
            ))),
        }
    }

    /// Delete (true) or only report (false) stale managed files
    pub fn with_reconcile(mut self, reconcile: bool) -> Self {
        self.reconcile = reconcile;
        self
    }

    /// Reload networkd after changes
    pub fn with_auto_restart(mut self, auto_restart: bool) -> Self {
        self.auto_restart = auto_restart;
        self
    }

    /// Log instead of touching the host
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Replace the reload mechanism
    pub fn with_reloader(mut self, reloader: Box<dyn Reloader>) -> Self {
        self.reloader = reloader;
        self
    }

    /// Directory the unit files live in
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Managed files currently on disk, with the interface each one names
    ///
    /// Keyed by path, so two files naming the same interface are both listed.
    pub async fn managed_files(&self) -> Result<BTreeMap<PathBuf, String>> {
        let mut managed = BTreeMap::new();

        let mut entries = match tokio::fs::read_dir(&self.directory).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(managed),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("network") {
                continue;
            }
            let content = match tokio::fs::read_to_string(&path).await {
                Ok(content) => content,
                Err(e) => {
                    debug!("Skipping unreadable {}: {}", path.display(), e);
                    continue;
                }
            };
            if !render::is_managed(&content) {
                continue;
            }
            match render::managed_interface(&path, &content) {
                Some(interface) => {
                    managed.insert(path, interface);
                }
                None => warn!("Managed file {} names no interface", path.display()),
            }
        }

        Ok(managed)
    }

    /// Write one interface's file if its content changed
    ///
    /// Returns whether the file was (or, in dry-run mode, would be) written.
    async fn apply(&self, desired: &DesiredInterfaceState) -> Result<bool> {
        validate_interface_name(&desired.interface)?;

        let path = self.directory.join(file_name(&desired.interface));
        let content = render(desired);

        match tokio::fs::read_to_string(&path).await {
            Ok(existing) if existing == content => {
                debug!("{} is up to date", path.display());
                return Ok(false);
            }
            Ok(existing) if !render::is_managed(&existing) => {
                return Err(Error::backend(format!(
                    "{} exists and is not managed by ztdns",
                    path.display()
                )));
            }
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        if self.dry_run {
            info!("[dry-run] Would write {}", path.display());
            return Ok(true);
        }

        tokio::fs::create_dir_all(&self.directory).await?;
        tokio::fs::write(&path, content).await?;
        info!(
            "Wrote {} ({} DNS server(s), {} domain(s))",
            path.display(),
            desired.dns_servers.len(),
            desired.domains.len()
        );
        Ok(true)
    }

    async fn remove_stale(&self, interface: &str, path: &Path) -> Result<()> {
        if self.dry_run {
            info!("[dry-run] Would delete stale {} ({})", path.display(), interface);
            return Ok(());
        }
        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                info!("Deleted stale {} ({})", path.display(), interface);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn reload(&self) -> bool {
        if self.dry_run {
            info!("[dry-run] Would reload systemd-networkd");
            return false;
        }
        if !self.auto_restart {
            info!("Unit files changed; auto-restart disabled, not reloading networkd");
            return false;
        }
        if !self.reloader.is_available().await {
            warn!("networkctl not available, skipping reload");
            return false;
        }
        match self.reloader.reload().await {
            Ok(()) => {
                info!("Reloaded systemd-networkd");
                true
            }
            Err(e) => {
                warn!("Failed to reload systemd-networkd: {}", e);
                false
            }
        }
    }
}

impl Default for NetworkdBackend {
    fn default() -> Self {
        Self::new(DEFAULT_NETWORKD_DIR)
    }
}

/// Interface names become part of a file name
fn validate_interface_name(interface: &str) -> Result<()> {
    if interface.is_empty()
        || interface == "."
        || interface == ".."
        || interface.contains(['/', '\0'])
    {
        return Err(Error::invalid_input(format!(
            "Unusable interface name: {:?}",
            interface
        )));
    }
    Ok(())
}

#[async_trait]
impl DnsBackend for NetworkdBackend {
    async fn check_available(&self) -> Result<()> {
        if self.dry_run {
            return Ok(());
        }
        if !self.reloader.is_available().await {
            return Err(Error::backend_unavailable(
                "networkctl not found; is systemd-networkd installed?",
            ));
        }
        match tokio::fs::metadata(&self.directory).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(Error::backend_unavailable(format!(
                "{} is not a directory",
                self.directory.display()
            ))),
            Err(e) => Err(Error::backend_unavailable(format!(
                "{}: {}",
                self.directory.display(),
                e
            ))),
        }
    }

    async fn reconcile(&self, desired: &[DesiredInterfaceState]) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        let managed = self.managed_files().await?;
        let wanted: HashSet<&str> = desired.iter().map(|d| d.interface.as_str()).collect();

        for state in desired {
            match self.apply(state).await {
                Ok(true) => report.changed.push(state.interface.clone()),
                Ok(false) => report.unchanged.push(state.interface.clone()),
                Err(e) => {
                    warn!("Failed to write unit file for {}: {}", state.interface, e);
                    report.failed.push((state.interface.clone(), e.to_string()));
                }
            }
        }

        for (path, interface) in &managed {
            // a managed file under another name is a leftover even when its
            // interface is still wanted
            if wanted.contains(interface.as_str())
                && *path == self.directory.join(file_name(interface))
            {
                continue;
            }
            if !self.reconcile {
                warn!(
                    "Stale unit file {} left in place (reconcile disabled)",
                    path.display()
                );
                report.stale.push(interface.clone());
                continue;
            }
            match self.remove_stale(interface, path).await {
                Ok(()) => report.removed.push(interface.clone()),
                Err(e) => {
                    warn!("Failed to delete {}: {}", path.display(), e);
                    report.failed.push((interface.clone(), e.to_string()));
                }
            }
        }

        if !report.changed.is_empty() || !report.removed.is_empty() {
            report.reloaded = self.reload().await;
        }

        Ok(report)
    }

    async fn restore_changed(&self) -> Result<Vec<String>> {
        // unit files stay in place; departed interfaces are handled as stale files
        Ok(Vec::new())
    }

    fn backend_name(&self) -> &'static str {
        "networkd"
    }
}
