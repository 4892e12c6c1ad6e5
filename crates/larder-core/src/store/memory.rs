//! In-memory store for tests and ephemeral sessions.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{ChangeFeed, ChangeNotifier, ChangeOrigin, LocalStore};
use crate::error::Result;
use crate::merge::RecordSet;
use crate::models::{Domain, Record};

#[derive(Debug, Default)]
pub struct MemoryStore {
    domains: RwLock<BTreeMap<Domain, RecordSet>>,
    notifier: ChangeNotifier,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed records without emitting change events.
    pub async fn seed(&self, domain: Domain, records: impl IntoIterator<Item = Record>) {
        let mut domains = self.domains.write().await;
        let set = domains.entry(domain).or_default();
        for record in records {
            set.insert(record.uuid, record);
        }
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn get_all(&self, domain: Domain) -> Result<Vec<Record>> {
        let domains = self.domains.read().await;
        Ok(domains
            .get(&domain)
            .map(|set| set.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn put_all(&self, domain: Domain, records: Vec<Record>) -> Result<()> {
        let uuids = records.iter().map(|record| record.uuid).collect();
        {
            let mut domains = self.domains.write().await;
            let set = domains.entry(domain).or_default();
            for record in records {
                set.insert(record.uuid, record);
            }
        }
        self.notifier.notify(domain, uuids, ChangeOrigin::Sync);
        Ok(())
    }

    async fn save(&self, domain: Domain, record: Record) -> Result<()> {
        let uuid = record.uuid;
        self.domains
            .write()
            .await
            .entry(domain)
            .or_default()
            .insert(uuid, record);
        self.notifier.notify(domain, vec![uuid], ChangeOrigin::Local);
        Ok(())
    }

    fn watch_changes(&self, domain: Option<Domain>) -> ChangeFeed {
        self.notifier.subscribe(domain)
    }
}
