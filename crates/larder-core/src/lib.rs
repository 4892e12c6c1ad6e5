//! larder-core - Core library for Larder
//!
//! This crate contains the record models, the local store, and the external
//! storage sync engine used by every Larder interface: storage locations and
//! their exclusivity, the bundle codec, last-writer-wins merging, remote
//! backends, and the sync orchestrator.

pub mod backend;
pub mod bundle;
pub mod config;
pub mod error;
pub mod exclusivity;
pub mod merge;
pub mod models;
pub mod registry;
pub mod store;
pub mod sync;
pub mod util;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, Result, SyncError};
pub use exclusivity::{ActivationReport, ExclusivityManager};
pub use merge::MergeResult;
pub use models::{BackendId, Domain, LocationId, Record, Slot, StorageLocation, SyncMode};
pub use registry::StorageLocationRegistry;
pub use sync::{AutoSync, LifecycleEvent, PullResult, PushResult, SyncOrchestrator, SyncState};
