//! libSQL-backed local store

use std::path::Path;

use async_trait::async_trait;
use libsql::{Builder, Connection, Database as LibSqlDatabase};
use tokio::sync::Mutex;

use super::{migrations, ChangeFeed, ChangeNotifier, ChangeOrigin, LocalStore};
use crate::error::{Error, Result};
use crate::models::{Domain, Record};

const UPSERT_RECORD: &str = "INSERT INTO records (domain, uuid, version, updated_at, body)
     VALUES (?1, ?2, ?3, ?4, ?5)
     ON CONFLICT(domain, uuid) DO UPDATE SET
         version = excluded.version,
         updated_at = excluded.updated_at,
         body = excluded.body";

/// Durable record store on a local libSQL database file.
pub struct LibSqlStore {
    _db: LibSqlDatabase,
    conn: Connection,
    /// Serializes write transactions on the shared connection
    write_gate: Mutex<()>,
    notifier: ChangeNotifier,
}

impl LibSqlStore {
    /// Open a local database at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let path_str = path.as_ref().to_string_lossy().to_string();
        let db = Builder::new_local(&path_str).build().await?;
        Self::from_database(db).await
    }

    /// Open an in-memory database (useful for testing)
    pub async fn open_in_memory() -> Result<Self> {
        let db = Builder::new_local(":memory:").build().await?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self> {
        let conn = db.connect()?;
        let store = Self {
            _db: db,
            conn,
            write_gate: Mutex::new(()),
            notifier: ChangeNotifier::default(),
        };
        store.configure().await?;
        migrations::run(&store.conn).await?;
        Ok(store)
    }

    /// Configure `SQLite` for a single-writer local file
    async fn configure(&self) -> Result<()> {
        // Ignored for in-memory databases
        self.conn
            .execute("PRAGMA journal_mode = WAL;", ())
            .await
            .ok();
        self.conn
            .execute("PRAGMA synchronous = NORMAL;", ())
            .await
            .ok();
        Ok(())
    }

    /// Number of stored records in one domain.
    pub async fn count(&self, domain: Domain) -> Result<usize> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM records WHERE domain = ?1",
                libsql::params![domain.key()],
            )
            .await?;
        let count: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => 0,
        };
        usize::try_from(count).map_err(|error| Error::Database(error.to_string()))
    }

    async fn upsert(&self, domain: Domain, record: &Record) -> Result<()> {
        let body = serde_json::to_string(record)?;
        let version = i64::try_from(record.version).unwrap_or(i64::MAX);
        self.conn
            .execute(
                UPSERT_RECORD,
                libsql::params![
                    domain.key(),
                    record.uuid.to_string(),
                    version,
                    record.updated_at.timestamp_millis(),
                    body
                ],
            )
            .await?;
        Ok(())
    }

    async fn upsert_in_transaction(&self, domain: Domain, records: &[Record]) -> Result<()> {
        self.conn.execute("BEGIN TRANSACTION", ()).await?;

        for record in records {
            if let Err(e) = self.upsert(domain, record).await {
                self.conn.execute("ROLLBACK", ()).await.ok();
                return Err(e);
            }
        }

        if let Err(e) = self.conn.execute("COMMIT", ()).await {
            self.conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
        Ok(())
    }
}

#[async_trait]
impl LocalStore for LibSqlStore {
    async fn get_all(&self, domain: Domain) -> Result<Vec<Record>> {
        let mut rows = self
            .conn
            .query(
                "SELECT body FROM records WHERE domain = ?1 ORDER BY uuid",
                libsql::params![domain.key()],
            )
            .await?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            let body: String = row.get(0)?;
            records.push(serde_json::from_str(&body)?);
        }
        Ok(records)
    }

    async fn put_all(&self, domain: Domain, records: Vec<Record>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        {
            let _guard = self.write_gate.lock().await;
            self.upsert_in_transaction(domain, &records).await?;
        }
        tracing::debug!("Stored {} {domain} records from sync", records.len());
        self.notifier.notify(
            domain,
            records.iter().map(|record| record.uuid).collect(),
            ChangeOrigin::Sync,
        );
        Ok(())
    }

    async fn save(&self, domain: Domain, record: Record) -> Result<()> {
        {
            let _guard = self.write_gate.lock().await;
            self.upsert(domain, &record).await?;
        }
        self.notifier
            .notify(domain, vec![record.uuid], ChangeOrigin::Local);
        Ok(())
    }

    fn watch_changes(&self, domain: Option<Domain>) -> ChangeFeed {
        self.notifier.subscribe(domain)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::{json, Map};
    use tempfile::tempdir;

    use super::*;

    fn recipe(title: &str) -> Record {
        let mut fields = Map::new();
        fields.insert("title".to_string(), json!(title));
        Record::new(fields)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_open_in_memory() {
        let store = LibSqlStore::open_in_memory().await.unwrap();
        assert_eq!(store.count(Domain::Recipes).await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn put_all_then_get_all_roundtrips_records_per_domain() {
        let store = LibSqlStore::open_in_memory().await.unwrap();
        let focaccia = recipe("Focaccia");
        let ragu = recipe("Ragu");

        store
            .put_all(Domain::Recipes, vec![focaccia.clone(), ragu.clone()])
            .await
            .unwrap();
        store
            .put_all(Domain::Pizzas, vec![recipe("Margherita")])
            .await
            .unwrap();

        let mut expected = vec![focaccia, ragu];
        expected.sort_by_key(|record| record.uuid.to_string());
        assert_eq!(store.get_all(Domain::Recipes).await.unwrap(), expected);
        assert_eq!(store.count(Domain::Pizzas).await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn save_updates_in_place_and_emits_local_change() {
        let store = LibSqlStore::open_in_memory().await.unwrap();
        let mut feed = store.watch_changes(Some(Domain::Sandwiches));

        let mut reuben = recipe("Reuben");
        store.save(Domain::Sandwiches, reuben.clone()).await.unwrap();
        reuben.fields.insert("title".to_string(), json!("Reuben, extra kraut"));
        reuben.touch();
        store.save(Domain::Sandwiches, reuben.clone()).await.unwrap();

        assert_eq!(store.get_all(Domain::Sandwiches).await.unwrap(), vec![reuben]);
        assert_eq!(feed.recv().await.unwrap().origin, ChangeOrigin::Local);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn older_version_never_overwrites_newer() {
        let store = LibSqlStore::open_in_memory().await.unwrap();
        let mut newer = recipe("Soup");
        newer.version = 4;
        let mut older = newer.clone();
        older.version = 2;
        older.fields.insert("title".to_string(), json!("Stale soup"));

        store.put_all(Domain::Recipes, vec![newer.clone()]).await.unwrap();
        store.put_all(Domain::Recipes, vec![older]).await.unwrap();

        assert_eq!(store.get_all(Domain::Recipes).await.unwrap(), vec![newer]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn file_store_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("larder.db");
        let record = recipe("Bread");

        {
            let store = LibSqlStore::open(&path).await.unwrap();
            store.put_all(Domain::Recipes, vec![record.clone()]).await.unwrap();
        }

        let reopened = LibSqlStore::open(&path).await.unwrap();
        assert_eq!(reopened.get_all(Domain::Recipes).await.unwrap(), vec![record]);
    }
}
