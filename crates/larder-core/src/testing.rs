//! Scripted test doubles for backend and store seams.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::backend::{Credential, RemoteBackend, RemoteFolder};
use crate::error::{Error, Result, SyncError};
use crate::models::{BackendId, Domain, Record};
use crate::store::{ChangeFeed, LocalStore, MemoryStore};

/// In-memory backend that counts calls and fails on demand.
#[derive(Debug)]
pub(crate) struct FakeBackend {
    id: BackendId,
    folders: Mutex<BTreeMap<String, Vec<u8>>>,
    connected: AtomicBool,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    uploads: AtomicUsize,
    downloads: AtomicUsize,
    connect_failure: Mutex<Option<SyncError>>,
    disconnect_failure: Mutex<Option<SyncError>>,
    upload_failure: Mutex<Option<SyncError>>,
    download_failure: Mutex<Option<SyncError>>,
    delay: Mutex<Duration>,
}

impl FakeBackend {
    pub(crate) fn new(id: BackendId) -> Arc<Self> {
        Arc::new(Self {
            id,
            folders: Mutex::default(),
            connected: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            uploads: AtomicUsize::new(0),
            downloads: AtomicUsize::new(0),
            connect_failure: Mutex::default(),
            disconnect_failure: Mutex::default(),
            upload_failure: Mutex::default(),
            download_failure: Mutex::default(),
            delay: Mutex::new(Duration::ZERO),
        })
    }

    pub(crate) fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub(crate) fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub(crate) fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub(crate) fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    pub(crate) fn fail_connect(&self, error: Option<SyncError>) {
        *self.connect_failure.lock().unwrap() = error;
    }

    pub(crate) fn fail_disconnect(&self, error: Option<SyncError>) {
        *self.disconnect_failure.lock().unwrap() = error;
    }

    pub(crate) fn fail_upload(&self, error: Option<SyncError>) {
        *self.upload_failure.lock().unwrap() = error;
    }

    pub(crate) fn fail_download(&self, error: Option<SyncError>) {
        *self.download_failure.lock().unwrap() = error;
    }

    /// Delay applied to every upload and download.
    pub(crate) fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub(crate) fn put_bundle(&self, folder_ref: &str, bytes: Vec<u8>) {
        self.folders
            .lock()
            .unwrap()
            .insert(folder_ref.to_string(), bytes);
    }

    pub(crate) fn bundle(&self, folder_ref: &str) -> Option<Vec<u8>> {
        self.folders.lock().unwrap().get(folder_ref).cloned()
    }

    async fn pause(&self) {
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl RemoteBackend for FakeBackend {
    fn id(&self) -> BackendId {
        self.id
    }

    async fn connect(&self) -> std::result::Result<Credential, SyncError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.connect_failure.lock().unwrap().clone() {
            return Err(error);
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(Credential::new(format!("{}-token", self.id.key())))
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) -> std::result::Result<(), SyncError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        match self.disconnect_failure.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn upload(&self, folder_ref: &str, bytes: Vec<u8>) -> std::result::Result<(), SyncError> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if let Some(error) = self.upload_failure.lock().unwrap().clone() {
            return Err(error);
        }
        self.put_bundle(folder_ref, bytes);
        Ok(())
    }

    async fn download(&self, folder_ref: &str) -> std::result::Result<Option<Vec<u8>>, SyncError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if let Some(error) = self.download_failure.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(self.bundle(folder_ref))
    }

    async fn list_locations(&self) -> std::result::Result<Vec<RemoteFolder>, SyncError> {
        Ok(self
            .folders
            .lock()
            .unwrap()
            .keys()
            .map(|reference| RemoteFolder {
                reference: reference.clone(),
                name: reference.clone(),
            })
            .collect())
    }
}

/// Memory store whose `put_all` fails for one chosen domain.
#[derive(Debug, Default)]
pub(crate) struct FlakyStore {
    inner: MemoryStore,
    failing_domain: Mutex<Option<Domain>>,
}

impl FlakyStore {
    pub(crate) fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    pub(crate) fn fail_put_all_for(&self, domain: Option<Domain>) {
        *self.failing_domain.lock().unwrap() = domain;
    }
}

#[async_trait]
impl LocalStore for FlakyStore {
    async fn get_all(&self, domain: Domain) -> Result<Vec<Record>> {
        self.inner.get_all(domain).await
    }

    async fn put_all(&self, domain: Domain, records: Vec<Record>) -> Result<()> {
        if *self.failing_domain.lock().unwrap() == Some(domain) {
            return Err(Error::Database(format!("disk full while writing {domain}")));
        }
        self.inner.put_all(domain, records).await
    }

    async fn save(&self, domain: Domain, record: Record) -> Result<()> {
        self.inner.save(domain, record).await
    }

    fn watch_changes(&self, domain: Option<Domain>) -> ChangeFeed {
        self.inner.watch_changes(domain)
    }
}
