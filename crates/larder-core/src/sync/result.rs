//! Outcomes of push and pull.
//!
//! Both carry their failure instead of returning `Err`, so manual and
//! background callers share one failure channel.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::SyncError;
use crate::merge::{error_message, MergeResult};
use crate::models::Domain;

/// Why an operation did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Sync is off: no location is active.
    NoActiveLocation,
    /// An equivalent operation was already running and absorbed this one.
    AlreadyInFlight,
}

/// Result of a pull.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PullResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<SkipReason>,
    /// Per-domain merge outcome, only for domains that were processed
    pub domains: BTreeMap<Domain, MergeResult>,
    /// Sum of `domains`, carrying the first error
    pub total: MergeResult,
    /// Records dropped while decoding the remote bundle
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub skipped_records: BTreeMap<Domain, usize>,
}

impl PullResult {
    #[must_use]
    pub fn skipped(reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn failed(error: SyncError) -> Self {
        Self {
            total: MergeResult::failed(error),
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.total.is_ok()
    }

    #[must_use]
    pub const fn error(&self) -> Option<&SyncError> {
        self.total.error.as_ref()
    }

    pub(crate) fn record(&mut self, domain: Domain, result: MergeResult) {
        self.total = std::mem::take(&mut self.total) + result.clone();
        self.domains.insert(domain, result);
    }
}

/// Result of a push.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PushResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<SkipReason>,
    /// Known-domain records written into the bundle
    pub record_count: usize,
    /// Size of the uploaded bundle
    pub bytes: usize,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "error_message")]
    pub error: Option<SyncError>,
}

impl PushResult {
    #[must_use]
    pub fn skipped(reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn failed(error: SyncError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    #[must_use]
    pub const fn error(&self) -> Option<&SyncError> {
        self.error.as_ref()
    }
}
