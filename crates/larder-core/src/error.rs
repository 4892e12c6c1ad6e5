//! Error types for larder-core

use thiserror::Error;

use crate::models::{BackendId, LocationId};

/// Result type alias using larder-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in larder-core infrastructure (local store, registry, config)
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Entity not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Remote storage error
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Sync failure taxonomy shared by backends, the codec, and the orchestrator.
///
/// Cloneable so it can travel inside [`crate::merge::MergeResult`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Expired or invalid credential. The user has to reconnect.
    #[error("Authentication failed for {backend}: {message}")]
    Auth { backend: BackendId, message: String },

    /// The remote refused access to the location.
    #[error("Access denied to {location}: {message}. Check the folder's sharing permissions and reconnect.")]
    AccessDenied { location: String, message: String },

    /// Timeout, offline, or any other transport-level failure.
    #[error("Transport error: {message}")]
    Transport { message: String, timed_out: bool },

    /// The bundle could not be encoded or decoded.
    #[error("Bundle format error: {0}")]
    Format(String),

    /// No storage location is active.
    #[error("No active storage location")]
    NoActiveLocation,

    /// The active location refers to a backend that is not configured.
    #[error("Backend {0} is not configured")]
    BackendUnavailable(BackendId),

    /// The location id is not in the registry.
    #[error("Unknown storage location: {0}")]
    UnknownLocation(LocationId),

    /// The local store or registry failed.
    #[error("Local store error: {0}")]
    Store(String),
}

impl SyncError {
    /// Build a transport error that is not a timeout.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            timed_out: false,
        }
    }

    /// Build a transport error for an expired deadline.
    pub fn timeout(operation: &str, after: std::time::Duration) -> Self {
        Self::Transport {
            message: format!("{operation} timed out after {}ms", after.as_millis()),
            timed_out: true,
        }
    }

    /// Whether the user has to act (reconnect, fix permissions) before retrying.
    pub const fn is_user_actionable(&self) -> bool {
        matches!(self, Self::Auth { .. } | Self::AccessDenied { .. })
    }

    /// Whether this is the silent "nothing to sync against" outcome.
    pub const fn is_no_active_location(&self) -> bool {
        matches!(self, Self::NoActiveLocation)
    }
}

impl From<Error> for SyncError {
    fn from(error: Error) -> Self {
        Self::Store(error.to_string())
    }
}
