use std::io;

use larder_core::SyncError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] larder_core::Error),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Record title cannot be empty")]
    EmptyTitle,
    #[error("Location identifier cannot be empty")]
    EmptyLocationId,
    #[error("Storage location not found for id/prefix/name: {0}")]
    LocationNotFound(String),
    #[error("{0}")]
    AmbiguousLocation(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Sync is off. Connect a location with `larder locations add <backend> <folder>`.")]
    SyncOff,
}
