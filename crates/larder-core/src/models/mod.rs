//! Data models for Larder sync

mod location;
mod record;
mod sync_mode;

pub use location::{BackendId, LocationId, Slot, StorageLocation};
pub use record::{Domain, Record, RecordSource};
pub use sync_mode::SyncMode;
