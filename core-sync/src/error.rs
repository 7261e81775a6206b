use bridge_traits::BridgeError;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Failed to fetch remote listing from {url}: {message}")]
    ManifestFetch { url: String, message: String },

    #[error("Filesystem error at {path}: {message}")]
    Filesystem { path: String, message: String },

    #[error("Download of {name} failed with HTTP status {status}")]
    Download { name: String, status: u16 },

    #[error("Transfer of {name} failed: {message}")]
    Transfer { name: String, message: String },

    #[error("Integrity check failed for {name}: expected {expected}, got {actual}")]
    Integrity {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("Invalid file name: {0}")]
    InvalidFileName(String),

    #[error("Sync already in progress (state: {state})")]
    SyncInProgress { state: String },

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Invalid session state: {0}")]
    InvalidState(String),

    #[error("Invalid session ID: {0}")]
    InvalidSessionId(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Checksum cache error: {0}")]
    Cache(String),

    #[error("Sync timeout after {0} seconds")]
    Timeout(u64),

    #[error("Sync cancelled")]
    Cancelled,

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),
}

impl SyncError {
    /// Wrap a bridge failure that happened while touching `path`.
    pub fn filesystem(path: &Path, err: impl std::fmt::Display) -> Self {
        SyncError::Filesystem {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }

    /// Whether running the pass again may succeed without user action.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SyncError::ManifestFetch { .. }
                | SyncError::Filesystem { .. }
                | SyncError::Download { .. }
                | SyncError::Transfer { .. }
                | SyncError::Integrity { .. }
                | SyncError::Timeout(_)
                | SyncError::Bridge(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
