//! Last-writer-wins reconciliation of remote records into the local set.
//!
//! Whole-record granularity: the higher `version` wins, equal versions fall back
//! to the strictly later `updated_at`, and a full tie keeps the local record.
//! Pull never deletes: records only present locally are retained.

use std::collections::BTreeMap;
use std::iter::Sum;
use std::ops::Add;

use serde::Serialize;
use uuid::Uuid;

use crate::error::SyncError;
use crate::models::Record;

/// Records of one domain keyed by sync identity.
pub type RecordSet = BTreeMap<Uuid, Record>;

/// Counts produced by reconciling one or more domains.
///
/// Combination sums the counts and keeps the first error seen.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeResult {
    pub added: usize,
    pub updated: usize,
    pub unchanged: usize,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "error_message")]
    pub error: Option<SyncError>,
}

impl MergeResult {
    /// A result carrying only an error.
    #[must_use]
    pub fn failed(error: SyncError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    /// Attach an error unless one is already present.
    #[must_use]
    pub fn with_error(mut self, error: SyncError) -> Self {
        self.error.get_or_insert(error);
        self
    }

    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Whether the merge changed anything locally.
    #[must_use]
    pub const fn has_changes(&self) -> bool {
        self.added > 0 || self.updated > 0
    }

    /// Combine two results. Counts add up; the first error is kept.
    #[must_use]
    pub fn combine(self, other: Self) -> Self {
        Self {
            added: self.added + other.added,
            updated: self.updated + other.updated,
            unchanged: self.unchanged + other.unchanged,
            error: self.error.or(other.error),
        }
    }
}

impl Add for MergeResult {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        self.combine(rhs)
    }
}

impl Sum for MergeResult {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Self::combine)
    }
}

pub(crate) fn error_message<S>(error: &Option<SyncError>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match error {
        Some(error) => serializer.serialize_str(&error.to_string()),
        None => serializer.serialize_none(),
    }
}

/// Index a list of records by UUID. A later duplicate replaces an earlier one
/// only if it would win the merge against it.
#[must_use]
pub fn index_records(records: impl IntoIterator<Item = Record>) -> RecordSet {
    let mut set = RecordSet::new();
    for record in records {
        match set.get(&record.uuid) {
            Some(existing) if !remote_wins(existing, &record) => {}
            _ => {
                set.insert(record.uuid, record);
            }
        }
    }
    set
}

/// Whether `remote` should replace `local`.
#[must_use]
pub fn remote_wins(local: &Record, remote: &Record) -> bool {
    match remote.version.cmp(&local.version) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => remote.updated_at > local.updated_at,
    }
}

/// Reconcile one domain. Pure and deterministic.
#[must_use]
pub fn merge_domain(local: &RecordSet, remote: &RecordSet) -> (RecordSet, MergeResult) {
    let mut merged = local.clone();
    let mut result = MergeResult::default();

    for (uuid, remote_record) in remote {
        match local.get(uuid) {
            None => {
                merged.insert(*uuid, remote_record.clone());
                result.added += 1;
            }
            Some(local_record) if remote_wins(local_record, remote_record) => {
                merged.insert(*uuid, remote_record.clone());
                result.updated += 1;
            }
            Some(_) => result.unchanged += 1,
        }
    }

    (merged, result)
}

/// Records of `merged` that are new or different relative to `local`.
///
/// These are the only records a pull needs to write back; local-only and
/// unchanged records are left to the store as they are.
#[must_use]
pub fn changed_records(local: &RecordSet, merged: &RecordSet) -> Vec<Record> {
    merged
        .iter()
        .filter(|(uuid, record)| local.get(*uuid) != Some(*record))
        .map(|(_, record)| record.clone())
        .collect()
}
