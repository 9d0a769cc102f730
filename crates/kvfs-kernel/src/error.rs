//! Volume error types.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::backend::BackendError;

/// Errors returned by the volume lifecycle manager.
///
/// Every variant is a per-request failure: the transport reports it to the
/// caller and the daemon keeps running.
#[derive(Debug, Error)]
pub enum VolumeError {
    /// No volume is registered under this name.
    #[error("no such volume: {0}")]
    NotFound(String),

    /// The volume still has active consumers.
    #[error("volume {name} is in use by {usage} consumer(s)")]
    Busy { name: String, usage: usize },

    /// The name cannot be used as a mountpoint component.
    #[error("invalid volume name: {0:?}")]
    InvalidName(String),

    /// A create-time option could not be applied.
    #[error("invalid option {key}: {reason}")]
    InvalidOption { key: String, reason: String },

    /// The backend could not produce or start a mountable root.
    #[error("failed to mount volume {name}: {source}")]
    Mount {
        name: String,
        #[source]
        source: BackendError,
    },

    /// The backend failed to stop serving.
    #[error("failed to unmount volume {name}: {source}")]
    Unmount {
        name: String,
        #[source]
        source: BackendError,
    },

    /// Creating or removing a mountpoint directory failed.
    #[error("mountpoint {}: {source}", path.display())]
    Directory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A backend call exceeded the configured bound.
    #[error("backend {op} for volume {name} timed out after {after:?}")]
    Timeout {
        name: String,
        op: &'static str,
        after: Duration,
    },
}

impl VolumeError {
    /// Create a NotFound error.
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound(name.into())
    }

    /// Create an InvalidOption error.
    pub fn invalid_option(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidOption {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create a Directory error for the given path.
    pub fn directory(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Directory {
            path: path.into(),
            source,
        }
    }

    /// Returns true if this error means the volume does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Result type for volume operations.
pub type VolumeResult<T> = Result<T, VolumeError>;
