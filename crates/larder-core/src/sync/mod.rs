//! Push, pull and automatic-mode triggering against the active location.

mod auto;
mod orchestrator;
mod result;
mod state;

pub use auto::{AutoSync, LifecycleEvent};
pub use orchestrator::SyncOrchestrator;
pub use result::{PullResult, PushResult, SkipReason};
pub use state::{Completed, SyncState, SyncStatus};
