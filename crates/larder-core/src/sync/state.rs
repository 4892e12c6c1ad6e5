//! Orchestrator state types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{StorageLocation, SyncMode};

use super::result::{PullResult, PushResult};

/// What the orchestrator is doing right now.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    #[default]
    Idle,
    Pushing,
    Pulling,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Pushing => "pushing",
            Self::Pulling => "pulling",
        })
    }
}

/// A finished operation and when it finished.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Completed<T> {
    pub at: DateTime<Utc>,
    pub result: T,
}

/// Snapshot for status displays.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub state: SyncState,
    pub mode: SyncMode,
    pub active_location: Option<StorageLocation>,
    pub last_push: Option<Completed<PushResult>>,
    pub last_pull: Option<Completed<PullResult>>,
}
