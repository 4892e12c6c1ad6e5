//! Local record store seam.
//!
//! The sync engine only needs three things from the device-local store: read a
//! domain, upsert a domain atomically, and subscribe to changes. Local edits
//! are published with [`ChangeOrigin::Local`]; writes made by a pull are
//! published with [`ChangeOrigin::Sync`] so that automatic mode does not push
//! them straight back.

mod database;
mod memory;
mod migrations;

use async_trait::async_trait;
use tokio::sync::broadcast::{self, error::RecvError};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Domain, Record};

pub use database::LibSqlStore;
pub use memory::MemoryStore;

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Who caused a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    /// A user edit on this device
    Local,
    /// Records written by a pull
    Sync,
}

/// A committed change to one domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub domain: Domain,
    pub uuids: Vec<Uuid>,
    pub origin: ChangeOrigin,
}

/// Subscription to committed changes, optionally limited to one domain.
#[derive(Debug)]
pub struct ChangeFeed {
    receiver: broadcast::Receiver<ChangeEvent>,
    domain: Option<Domain>,
}

impl ChangeFeed {
    /// Next matching event, or `None` once the store is dropped.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.domain.map_or(true, |domain| domain == event.domain) => {
                    return Some(event);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Change feed lagged; {skipped} events skipped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

/// Fan-out of change events shared by the store implementations.
#[derive(Debug, Clone)]
pub(crate) struct ChangeNotifier {
    sender: broadcast::Sender<ChangeEvent>,
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self { sender }
    }
}

impl ChangeNotifier {
    pub(crate) fn subscribe(&self, domain: Option<Domain>) -> ChangeFeed {
        ChangeFeed {
            receiver: self.sender.subscribe(),
            domain,
        }
    }

    pub(crate) fn notify(&self, domain: Domain, uuids: Vec<Uuid>, origin: ChangeOrigin) {
        if uuids.is_empty() {
            return;
        }
        // No subscribers is fine.
        let _ = self.sender.send(ChangeEvent {
            domain,
            uuids,
            origin,
        });
    }
}

/// Device-local durable record store, keyed by record UUID.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Every record of one domain.
    async fn get_all(&self, domain: Domain) -> Result<Vec<Record>>;

    /// Upsert `records` by UUID in one transaction. Emits a `Sync` change.
    async fn put_all(&self, domain: Domain, records: Vec<Record>) -> Result<()>;

    /// Persist one locally edited record. Emits a `Local` change.
    ///
    /// Callers are expected to have bumped the record (see [`Record::touch`]).
    async fn save(&self, domain: Domain, record: Record) -> Result<()>;

    /// Subscribe to committed changes; `None` means every domain.
    fn watch_changes(&self, domain: Option<Domain>) -> ChangeFeed;
}
