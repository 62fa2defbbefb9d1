// # networkd Reload
//
// After unit files change, networkd has to be asked to re-read them. The
// request is a single `networkctl reload` invocation.

use async_trait::async_trait;
use tokio::process::Command;
use ztdns_core::{Error, Result};

/// Asks the network service to pick up changed unit files
#[async_trait]
pub trait Reloader: Send + Sync {
    /// Whether the service control tool is present
    async fn is_available(&self) -> bool;

    /// Issue one reload request
    async fn reload(&self) -> Result<()>;
}

/// [`Reloader`] using `networkctl`
#[derive(Debug, Clone)]
pub struct NetworkctlReloader {
    program: String,
}

impl NetworkctlReloader {
    /// Use `networkctl` from `PATH`
    pub fn new() -> Self {
        Self::with_program("networkctl")
    }

    /// Use a specific binary
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for NetworkctlReloader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Reloader for NetworkctlReloader {
    async fn is_available(&self) -> bool {
        Command::new(&self.program)
            .arg("--version")
            .output()
            .await
            .is_ok_and(|out| out.status.success())
    }

    async fn reload(&self) -> Result<()> {
        let command = format!("{} reload", self.program);
        let output = Command::new(&self.program)
            .arg("reload")
            .output()
            .await
            .map_err(|e| Error::command(&command, e.to_string()))?;

        if !output.status.success() {
            return Err(Error::command(
                command,
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_program_is_unavailable() {
        let reloader = NetworkctlReloader::with_program("/nonexistent/networkctl");
        assert!(!reloader.is_available().await);
        assert!(matches!(reloader.reload().await, Err(Error::Command { .. })));
    }
}
