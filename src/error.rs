//! Error types for NodeTune
//!
//! Every resolver and tuner unit returns these as explicit values. The
//! executor classifies them with [`TuneError::kind`] to decide whether a
//! unit is recorded as failed or skipped; only a timeout or an invalid
//! configuration aborts a whole run.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for NodeTune operations
#[derive(Error, Debug)]
pub enum TuneError {
    /// I/O error against a host interface
    #[error("I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Provider, instance type or distribution could not be determined
    #[error("Detection failed: {0}")]
    DetectionFailure(String),

    /// No matching device, interface or file for a unit
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// A kernel write was rejected
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// The run exceeded its time budget
    #[error("Run timed out after {0} seconds")]
    Timeout(u64),

    /// The kernel interface a unit needs is absent on this platform
    #[error("Unsupported on this platform: {0}")]
    Unsupported(String),

    /// Invalid configuration record
    #[error("Configuration error: {0}")]
    Config(String),

    /// Idempotency state store failure
    #[error("State store error: {0}")]
    StateStore(String),

    /// Another run holds the node lock
    #[error("Another tuning run holds the lock at '{0}'")]
    LockHeld(PathBuf),

    /// An optional host tool exited unsuccessfully
    #[error("Command '{command}' failed: {message}")]
    Command { command: String, message: String },

    /// Serialization of an artifact or state document failed
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Coarse classification used by the executor and reporter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Non-fatal, triggers a fallback
    Detection,
    /// Unit fails, run continues
    ResourceNotFound,
    /// Unit fails, run continues
    PermissionDenied,
    /// Whole run is failed
    Timeout,
    /// Unit is skipped
    Unsupported,
    /// Run is aborted before any unit executes
    Config,
    /// Anything else; unit fails, run continues
    Other,
}

impl TuneError {
    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create an unsupported-interface error
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported(message.into())
    }

    /// Create a resource-not-found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::ResourceNotFound(message.into())
    }

    /// Create a command failure
    pub fn command(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Command {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DetectionFailure(_) => ErrorKind::Detection,
            Self::ResourceNotFound(_) => ErrorKind::ResourceNotFound,
            Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Unsupported(_) => ErrorKind::Unsupported,
            Self::Config(_) | Self::LockHeld(_) => ErrorKind::Config,
            Self::Io { source, .. } => match source.kind() {
                std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
                std::io::ErrorKind::NotFound => ErrorKind::ResourceNotFound,
                _ => ErrorKind::Other,
            },
            _ => ErrorKind::Other,
        }
    }

    /// Check if this error is a permission issue
    pub fn is_permission_error(&self) -> bool {
        self.kind() == ErrorKind::PermissionDenied
    }

    /// Whether this error aborts the whole run rather than a single unit
    pub fn aborts_run(&self) -> bool {
        matches!(self.kind(), ErrorKind::Timeout | ErrorKind::Config)
    }

    /// Get the path associated with this error, if any
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Self::Io { path, .. } | Self::PermissionDenied(path) | Self::LockHeld(path) => {
                Some(path)
            }
            _ => None,
        }
    }
}

/// Result type alias for NodeTune operations
pub type Result<T> = std::result::Result<T, TuneError>;

impl From<serde_json::Error> for TuneError {
    fn from(err: serde_json::Error) -> Self {
        TuneError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for TuneError {
    fn from(err: serde_yaml::Error) -> Self {
        TuneError::Serialization(err.to_string())
    }
}

/// Extension trait for adding path context to std::io::Result
pub trait IoResultExt<T> {
    /// Add path context to an I/O error
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| TuneError::io(path, e))
    }
}
