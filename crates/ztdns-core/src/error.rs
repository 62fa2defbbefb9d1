//! Error types for the ztdns system
//!
//! This module defines all error types used throughout the workspace.

use thiserror::Error;

/// Result type alias for ztdns operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the ztdns system
#[derive(Error, Debug)]
pub enum Error {
    /// Directory service errors (fetch failed, bad status, unparseable body)
    #[error("Directory service error: {0}")]
    Directory(String),

    /// DNS backend errors
    #[error("DNS backend error: {0}")]
    Backend(String),

    /// The backend's host integration point is missing
    #[error("DNS backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Interface watcher errors
    #[error("Interface watcher error: {0}")]
    Watcher(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// An external command failed or could not be spawned
    #[error("Command `{command}` failed: {message}")]
    Command {
        /// Command line that was run
        command: String,
        /// Error message
        message: String,
    },

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a directory service error
    pub fn directory(msg: impl Into<String>) -> Self {
        Self::Directory(msg.into())
    }

    /// Create a backend error
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// Create a backend-unavailable error
    pub fn backend_unavailable(msg: impl Into<String>) -> Self {
        Self::BackendUnavailable(msg.into())
    }

    /// Create a watcher error
    pub fn watcher(msg: impl Into<String>) -> Self {
        Self::Watcher(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a command error
    pub fn command(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Command {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Create an HTTP error
    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }

    /// Whether this error means the thing being operated on does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
