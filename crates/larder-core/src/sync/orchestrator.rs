//! Sync Orchestrator.
//!
//! Push and pull against the active storage location. Push and pull are
//! serialized through one gate; a second request of the same kind while one is
//! already queued or running is absorbed as a skipped success.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{watch, Mutex, RwLock};

use crate::backend::{with_timeout, RemoteBackend};
use crate::bundle::{self, Bundle, CURRENT_SCHEMA_VERSION};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::exclusivity::ExclusivityManager;
use crate::merge::{changed_records, index_records, merge_domain, MergeResult};
use crate::models::{Domain, StorageLocation, SyncMode};
use crate::store::LocalStore;

use super::result::{PullResult, PushResult, SkipReason};
use super::state::{Completed, SyncState, SyncStatus};

type OpaqueDomains = BTreeMap<String, Value>;

pub struct SyncOrchestrator {
    store: Arc<dyn LocalStore>,
    locations: Arc<ExclusivityManager>,
    network_timeout: Duration,
    mode: watch::Sender<SyncMode>,
    state: watch::Sender<SyncState>,
    gate: Mutex<()>,
    push_in_flight: AtomicBool,
    pull_in_flight: AtomicBool,
    last_push: RwLock<Option<Completed<PushResult>>>,
    last_pull: RwLock<Option<Completed<PullResult>>>,
}

/// Clears an in-flight flag when the operation ends or is dropped.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn claim(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Returns the orchestrator to idle even if the operation is abandoned.
struct Busy<'a>(&'a watch::Sender<SyncState>);

impl Drop for Busy<'_> {
    fn drop(&mut self) {
        self.0.send_replace(SyncState::Idle);
    }
}

impl SyncOrchestrator {
    #[must_use]
    pub fn new(
        store: Arc<dyn LocalStore>,
        locations: Arc<ExclusivityManager>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            store,
            locations,
            network_timeout: config.network_timeout(),
            mode: watch::channel(config.mode).0,
            state: watch::channel(SyncState::Idle).0,
            gate: Mutex::new(()),
            push_in_flight: AtomicBool::new(false),
            pull_in_flight: AtomicBool::new(false),
            last_push: RwLock::default(),
            last_pull: RwLock::default(),
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn LocalStore> {
        &self.store
    }

    #[must_use]
    pub fn locations(&self) -> &Arc<ExclusivityManager> {
        &self.locations
    }

    #[must_use]
    pub fn mode(&self) -> SyncMode {
        *self.mode.borrow()
    }

    pub fn set_mode(&self, mode: SyncMode) {
        if self.mode.send_replace(mode) != mode {
            tracing::info!("Sync mode set to {mode}");
        }
    }

    #[must_use]
    pub fn subscribe_mode(&self) -> watch::Receiver<SyncMode> {
        self.mode.subscribe()
    }

    #[must_use]
    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    pub async fn status(&self) -> SyncStatus {
        SyncStatus {
            state: self.state(),
            mode: self.mode(),
            active_location: self.locations.active_location().await,
            last_push: self.last_push.read().await.clone(),
            last_pull: self.last_pull.read().await.clone(),
        }
    }

    /// Replace the remote bundle with a snapshot of the local store.
    pub async fn push(&self) -> PushResult {
        let Some(_claim) = InFlight::claim(&self.push_in_flight) else {
            tracing::debug!("Push already in flight; coalescing request");
            return PushResult::skipped(SkipReason::AlreadyInFlight);
        };
        let _gate = self.gate.lock().await;

        let Some(location) = self.locations.active_location().await else {
            tracing::debug!("Push skipped: no active storage location");
            return PushResult::skipped(SkipReason::NoActiveLocation);
        };

        let _busy = self.enter(SyncState::Pushing);
        tracing::info!("Pushing to '{}'", location.name);
        let result = match self.push_to(&location).await {
            Ok(result) => {
                tracing::info!(
                    "Pushed {} records ({} bytes) to '{}'",
                    result.record_count,
                    result.bytes,
                    location.name
                );
                result
            }
            Err(error) => {
                let error = self.finish_failed(&location, error).await;
                tracing::warn!("Push to '{}' failed: {error}", location.name);
                PushResult::failed(error)
            }
        };
        if result.is_ok() {
            self.finish_succeeded(&location).await;
        }

        *self.last_push.write().await = Some(Completed {
            at: Utc::now(),
            result: result.clone(),
        });
        result
    }

    /// Merge the remote bundle into the local store.
    pub async fn pull(&self) -> PullResult {
        let Some(_claim) = InFlight::claim(&self.pull_in_flight) else {
            tracing::debug!("Pull already in flight; coalescing request");
            return PullResult::skipped(SkipReason::AlreadyInFlight);
        };
        let _gate = self.gate.lock().await;

        let Some(location) = self.locations.active_location().await else {
            tracing::debug!("Pull skipped: no active storage location");
            return PullResult::skipped(SkipReason::NoActiveLocation);
        };

        let _busy = self.enter(SyncState::Pulling);
        tracing::info!("Pulling from '{}'", location.name);
        let mut result = self.pull_from(&location).await;
        match result.total.error.take() {
            None => {
                tracing::info!(
                    "Pulled from '{}': {} added, {} updated, {} unchanged",
                    location.name,
                    result.total.added,
                    result.total.updated,
                    result.total.unchanged
                );
                self.finish_succeeded(&location).await;
            }
            Some(error) => {
                let error = self.finish_failed(&location, error).await;
                tracing::warn!("Pull from '{}' failed: {error}", location.name);
                result.total.error = Some(error);
            }
        }

        *self.last_pull.write().await = Some(Completed {
            at: Utc::now(),
            result: result.clone(),
        });
        result
    }

    fn enter(&self, state: SyncState) -> Busy<'_> {
        self.state.send_replace(state);
        Busy(&self.state)
    }

    async fn push_to(&self, location: &StorageLocation) -> Result<PushResult, SyncError> {
        let backend = self.locations.backends().get(location.backend_id)?;

        let mut domains = BTreeMap::new();
        for domain in Domain::ALL {
            domains.insert(domain, self.store.get_all(domain).await?);
        }
        let opaque = self.remote_opaque_domains(location, backend.as_ref()).await?;

        let snapshot = Bundle::snapshot(domains, opaque);
        let bytes = bundle::encode(&snapshot)?;
        let size = bytes.len();
        with_timeout(
            "upload",
            self.network_timeout,
            backend.upload(&location.folder_ref, bytes),
        )
        .await?;

        Ok(PushResult {
            skipped: None,
            record_count: snapshot.record_count(),
            bytes: size,
            error: None,
        })
    }

    /// Unknown domains of the bundle about to be replaced.
    ///
    /// Read fresh before every upload: another device may have written a
    /// newer schema since this one last looked.
    async fn remote_opaque_domains(
        &self,
        location: &StorageLocation,
        backend: &dyn RemoteBackend,
    ) -> Result<OpaqueDomains, SyncError> {
        let remote = with_timeout(
            "download",
            self.network_timeout,
            backend.download(&location.folder_ref),
        )
        .await?;
        let Some(bytes) = remote else {
            return Ok(OpaqueDomains::new());
        };

        match bundle::peek_opaque(&bytes) {
            Ok((schema_version, _)) if schema_version > CURRENT_SCHEMA_VERSION => {
                Err(SyncError::Format(format!(
                    "remote bundle schemaVersion {schema_version} is newer than supported version {CURRENT_SCHEMA_VERSION}; refusing to overwrite it"
                )))
            }
            Ok((_, opaque)) => Ok(opaque),
            Err(error) => {
                tracing::warn!(
                    "Existing bundle at '{}' is unreadable and will be replaced: {error}",
                    location.name
                );
                Ok(OpaqueDomains::new())
            }
        }
    }

    async fn pull_from(&self, location: &StorageLocation) -> PullResult {
        let backend = match self.locations.backends().get(location.backend_id) {
            Ok(backend) => backend,
            Err(error) => return PullResult::failed(error),
        };

        let bytes = match with_timeout(
            "download",
            self.network_timeout,
            backend.download(&location.folder_ref),
        )
        .await
        {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                tracing::info!("No bundle at '{}' yet; nothing to pull", location.name);
                return PullResult::default();
            }
            Err(error) => return PullResult::failed(error),
        };

        let decoded = match bundle::decode(&bytes) {
            Ok(decoded) => decoded,
            Err(error) => return PullResult::failed(error),
        };
        for (domain, skipped) in &decoded.skipped_records {
            tracing::warn!("Skipped {skipped} undecodable {domain} records from '{}'", location.name);
        }
        let mut result = PullResult {
            skipped_records: decoded.skipped_records.clone(),
            ..PullResult::default()
        };

        // Everything is merged in memory before the first local write.
        let mut merged = Vec::with_capacity(Domain::ALL.len());
        for domain in Domain::ALL {
            let local = match self.store.get_all(domain).await {
                Ok(records) => index_records(records),
                Err(error) => return PullResult::failed(error.into()),
            };
            let remote = index_records(decoded.bundle.records(domain).iter().cloned());
            let (set, merge) = merge_domain(&local, &remote);
            merged.push((domain, changed_records(&local, &set), merge));
        }

        // Each domain commits on its own; a failure stops the remaining ones.
        // Only added and updated records are written, so local edits saved
        // meanwhile to other records survive.
        for (domain, changed, merge) in merged {
            if !changed.is_empty() {
                if let Err(error) = self.store.put_all(domain, changed).await {
                    tracing::error!("Committing pulled {domain} records failed: {error}");
                    result.record(domain, MergeResult::failed(error.into()));
                    break;
                }
            }
            result.record(domain, merge);
        }
        result
    }

    async fn finish_succeeded(&self, location: &StorageLocation) {
        if let Err(error) = self.locations.mark_verified(&location.id).await {
            tracing::warn!("Could not record verification of '{}': {error}", location.name);
        }
    }

    /// Apply the failure's side effects and return the error to report.
    async fn finish_failed(&self, location: &StorageLocation, error: SyncError) -> SyncError {
        match error {
            SyncError::AccessDenied { message, .. } => {
                if let Err(store_error) = self.locations.mark_access_denied(&location.id).await {
                    tracing::warn!(
                        "Could not flag '{}' as access denied: {store_error}",
                        location.name
                    );
                }
                SyncError::AccessDenied {
                    location: location.name.clone(),
                    message,
                }
            }
            SyncError::Auth { backend, message } => {
                if let Ok(remote) = self.locations.backends().get(backend) {
                    if let Err(disconnect_error) =
                        with_timeout("disconnect", self.network_timeout, remote.disconnect()).await
                    {
                        tracing::warn!("Dropping {backend} credential failed: {disconnect_error}");
                    }
                }
                SyncError::Auth { backend, message }
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::{json, Map};

    use super::*;
    use crate::backend::BackendSet;
    use crate::models::{BackendId, LocationId, Record, Slot};
    use crate::registry::StorageLocationRegistry;
    use crate::testing::{FakeBackend, FlakyStore};

    const FOLDER: &str = "Apps/Larder";

    struct Fixture {
        orchestrator: Arc<SyncOrchestrator>,
        store: Arc<FlakyStore>,
        drive: Arc<FakeBackend>,
        location: LocationId,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(FlakyStore::default());
        let drive = FakeBackend::new(BackendId::GoogleDrive);
        let manager = Arc::new(ExclusivityManager::new(
            StorageLocationRegistry::in_memory(),
            BackendSet::new().with(drive.clone()),
            Duration::from_secs(1),
        ));
        let location = manager
            .add_location(StorageLocation::new(
                "Personal",
                BackendId::GoogleDrive,
                Slot::Private,
                FOLDER,
            ))
            .await
            .unwrap();
        manager.activate(&location).await.unwrap();

        let config = SyncConfig {
            network_timeout_secs: 1,
            ..SyncConfig::default()
        };
        Fixture {
            orchestrator: Arc::new(SyncOrchestrator::new(store.clone(), manager, &config)),
            store,
            drive,
            location,
        }
    }

    fn recipe(title: &str, version: u64) -> Record {
        let mut fields = Map::new();
        fields.insert("title".to_string(), json!(title));
        let mut record = Record::new(fields);
        record.version = version;
        record
    }

    fn remote_bundle(domains: BTreeMap<Domain, Vec<Record>>) -> Vec<u8> {
        bundle::encode(&Bundle::snapshot(domains, OpaqueDomains::new())).unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pull_applies_newer_remote_version() {
        let Fixture {
            orchestrator,
            store,
            drive,
            ..
        } = fixture().await;
        let local = recipe("Focaccia v3", 3);
        let mut remote = local.clone();
        remote.version = 5;
        remote.fields.insert("title".to_string(), json!("Focaccia v5"));
        store.inner().seed(Domain::Recipes, [local]).await;
        drive.put_bundle(FOLDER, remote_bundle(BTreeMap::from([(Domain::Recipes, vec![remote.clone()])])));

        let result = orchestrator.pull().await;

        assert!(result.is_ok());
        assert_eq!(
            result.domains[&Domain::Recipes],
            MergeResult {
                added: 0,
                updated: 1,
                unchanged: 0,
                error: None
            }
        );
        assert_eq!(store.get_all(Domain::Recipes).await.unwrap(), vec![remote]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pull_keeps_local_only_and_adds_remote_only() {
        let Fixture {
            orchestrator,
            store,
            drive,
            ..
        } = fixture().await;
        let r2 = recipe("R2", 1);
        let r3 = recipe("R3", 1);
        store.inner().seed(Domain::Recipes, [r2.clone()]).await;
        drive.put_bundle(FOLDER, remote_bundle(BTreeMap::from([(Domain::Recipes, vec![r3.clone()])])));

        let result = orchestrator.pull().await;

        assert_eq!(result.total.added, 1);
        assert_eq!(result.total.updated, 0);
        let uuids: Vec<_> = store
            .get_all(Domain::Recipes)
            .await
            .unwrap()
            .into_iter()
            .map(|record| record.uuid)
            .collect();
        assert!(uuids.contains(&r2.uuid));
        assert!(uuids.contains(&r3.uuid));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pull_writes_only_added_and_updated_records() {
        let Fixture {
            orchestrator,
            store,
            drive,
            ..
        } = fixture().await;
        let local_only = recipe("Local only", 4);
        let same = recipe("Same", 2);
        let stale = recipe("Stale", 1);
        let mut fresh = stale.clone();
        fresh.version = 2;
        let added = recipe("Added", 1);
        store
            .inner()
            .seed(Domain::Recipes, [local_only.clone(), same.clone(), stale])
            .await;
        drive.put_bundle(
            FOLDER,
            remote_bundle(BTreeMap::from([(
                Domain::Recipes,
                vec![same, fresh.clone(), added.clone()],
            )])),
        );
        let mut feed = store.watch_changes(Some(Domain::Recipes));

        let result = orchestrator.pull().await;

        assert!(result.is_ok());
        let event = feed.recv().await.unwrap();
        let mut expected = vec![fresh.uuid, added.uuid];
        expected.sort();
        assert_eq!(event.uuids, expected);
        assert!(!event.uuids.contains(&local_only.uuid));
        assert_eq!(store.get_all(Domain::Recipes).await.unwrap().len(), 4);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn push_then_pull_reports_everything_unchanged() {
        let Fixture {
            orchestrator,
            store,
            ..
        } = fixture().await;
        store
            .inner()
            .seed(Domain::Recipes, [recipe("A", 1), recipe("B", 2)])
            .await;
        store.inner().seed(Domain::CellarEntries, [recipe("Barolo", 1)]).await;

        let push = orchestrator.push().await;
        assert!(push.is_ok());
        assert_eq!(push.record_count, 3);

        let pull = orchestrator.pull().await;
        assert_eq!(
            pull.total,
            MergeResult {
                added: 0,
                updated: 0,
                unchanged: 3,
                error: None
            }
        );

        let again = orchestrator.pull().await;
        assert!(!again.total.has_changes());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn no_active_location_is_a_silent_skip() {
        let Fixture {
            orchestrator,
            drive,
            ..
        } = fixture().await;
        orchestrator.locations().deactivate_all().await.unwrap();

        assert_eq!(
            orchestrator.push().await,
            PushResult::skipped(SkipReason::NoActiveLocation)
        );
        assert_eq!(
            orchestrator.pull().await,
            PullResult::skipped(SkipReason::NoActiveLocation)
        );
        assert_eq!(drive.upload_count(), 0);
        assert_eq!(drive.download_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_download_leaves_store_untouched() {
        let Fixture {
            orchestrator,
            store,
            drive,
            ..
        } = fixture().await;
        let local = recipe("Local", 1);
        store.inner().seed(Domain::Recipes, [local.clone()]).await;
        drive.fail_download(Some(SyncError::transport("offline")));

        let result = orchestrator.pull().await;

        assert_eq!(result.error(), Some(&SyncError::transport("offline")));
        assert_eq!(store.get_all(Domain::Recipes).await.unwrap(), vec![local]);
        assert_eq!(orchestrator.state(), SyncState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_download_times_out_without_local_writes() {
        let Fixture {
            orchestrator,
            store,
            drive,
            ..
        } = fixture().await;
        drive.put_bundle(FOLDER, remote_bundle(BTreeMap::from([(Domain::Recipes, vec![recipe("Late", 1)])])));
        drive.set_delay(Duration::from_secs(5));

        let result = orchestrator.pull().await;

        assert!(matches!(
            result.error(),
            Some(SyncError::Transport { timed_out: true, .. })
        ));
        assert!(store.get_all(Domain::Recipes).await.unwrap().is_empty());
        assert_eq!(orchestrator.state(), SyncState::Idle);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn undecodable_bundle_aborts_pull() {
        let Fixture {
            orchestrator,
            store,
            drive,
            ..
        } = fixture().await;
        drive.put_bundle(FOLDER, b"{not json".to_vec());

        let result = orchestrator.pull().await;

        assert!(matches!(result.error(), Some(SyncError::Format(_))));
        assert!(store.get_all(Domain::Recipes).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_remote_bundle_is_an_empty_success() {
        let Fixture { orchestrator, .. } = fixture().await;

        let result = orchestrator.pull().await;

        assert!(result.is_ok());
        assert!(result.domains.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failing_domain_commit_keeps_earlier_domains_and_reports_error() {
        let Fixture {
            orchestrator,
            store,
            drive,
            ..
        } = fixture().await;
        drive.put_bundle(
            FOLDER,
            remote_bundle(BTreeMap::from([
                (Domain::Recipes, vec![recipe("Soup", 1)]),
                (Domain::Pizzas, vec![recipe("Marinara", 1)]),
                (Domain::Sandwiches, vec![recipe("Club", 1)]),
            ])),
        );
        store.fail_put_all_for(Some(Domain::Pizzas));

        let result = orchestrator.pull().await;

        assert!(matches!(result.error(), Some(SyncError::Store(_))));
        assert_eq!(result.domains[&Domain::Recipes].added, 1);
        assert!(!result.domains.contains_key(&Domain::Sandwiches));
        assert_eq!(store.get_all(Domain::Recipes).await.unwrap().len(), 1);
        assert!(store.get_all(Domain::Sandwiches).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn success_clears_pending_verification() {
        let Fixture {
            orchestrator,
            location,
            ..
        } = fixture().await;
        let before = orchestrator.locations().location(&location).await.unwrap();
        assert!(before.is_pending_verification);

        assert!(orchestrator.push().await.is_ok());

        let after = orchestrator.locations().location(&location).await.unwrap();
        assert!(!after.is_pending_verification);
        assert!(after.last_verified.is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn access_denied_deactivates_location_with_named_error() {
        let Fixture {
            orchestrator,
            drive,
            location,
            ..
        } = fixture().await;
        drive.fail_upload(Some(SyncError::AccessDenied {
            location: FOLDER.to_string(),
            message: "forbidden".to_string(),
        }));

        let result = orchestrator.push().await;

        assert_eq!(
            result.error(),
            Some(&SyncError::AccessDenied {
                location: "Personal".to_string(),
                message: "forbidden".to_string(),
            })
        );
        let denied = orchestrator.locations().location(&location).await.unwrap();
        assert!(denied.access_denied);
        assert!(!denied.is_active);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn auth_failure_drops_the_backend_session() {
        let Fixture {
            orchestrator,
            drive,
            ..
        } = fixture().await;
        drive.fail_download(Some(SyncError::Auth {
            backend: BackendId::GoogleDrive,
            message: "token expired".to_string(),
        }));

        let result = orchestrator.pull().await;

        assert!(result.error().is_some_and(SyncError::is_user_actionable));
        assert_eq!(drive.disconnect_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn push_preserves_unknown_remote_domains() {
        let Fixture {
            orchestrator,
            store,
            drive,
            ..
        } = fixture().await;
        let future_bundle = json!({
            "schemaVersion": 1,
            "exportedAt": "2026-01-01T00:00:00Z",
            "domains": {
                "smoothies": {"count": 1, "records": [{"uuid": "0190f0f0-0000-7000-8000-000000000001"}]}
            }
        });
        drive.put_bundle(FOLDER, serde_json::to_vec(&future_bundle).unwrap());
        store.inner().seed(Domain::Recipes, [recipe("Soup", 1)]).await;

        assert!(orchestrator.push().await.is_ok());

        let written: Value = serde_json::from_slice(&drive.bundle(FOLDER).unwrap()).unwrap();
        assert_eq!(written["domains"]["smoothies"], future_bundle["domains"]["smoothies"]);
        assert_eq!(written["domains"]["recipes"]["count"], 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn push_refuses_to_overwrite_newer_schema() {
        let Fixture {
            orchestrator,
            drive,
            ..
        } = fixture().await;
        let newer = serde_json::to_vec(&json!({
            "schemaVersion": CURRENT_SCHEMA_VERSION + 1,
            "exportedAt": "2026-01-01T00:00:00Z",
            "domains": {}
        }))
        .unwrap();
        drive.put_bundle(FOLDER, newer.clone());

        let result = orchestrator.push().await;

        assert!(matches!(result.error(), Some(SyncError::Format(_))));
        assert_eq!(drive.upload_count(), 0);
        assert_eq!(drive.bundle(FOLDER), Some(newer));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn push_after_pull_rechecks_the_remote_schema() {
        let Fixture {
            orchestrator,
            store,
            drive,
            ..
        } = fixture().await;
        drive.put_bundle(FOLDER, remote_bundle(BTreeMap::from([(Domain::Recipes, vec![recipe("Soup", 1)])])));
        assert!(orchestrator.pull().await.is_ok());

        let newer = serde_json::to_vec(&json!({
            "schemaVersion": CURRENT_SCHEMA_VERSION + 1,
            "exportedAt": "2026-02-01T00:00:00Z",
            "domains": {
                "smoothies": {"count": 1, "records": [{"uuid": "0190f0f0-0000-7000-8000-000000000002"}]}
            }
        }))
        .unwrap();
        drive.put_bundle(FOLDER, newer.clone());
        store.inner().seed(Domain::Recipes, [recipe("Stew", 1)]).await;

        let result = orchestrator.push().await;

        assert!(matches!(result.error(), Some(SyncError::Format(_))));
        assert_eq!(drive.upload_count(), 0);
        assert_eq!(drive.bundle(FOLDER), Some(newer));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn push_carries_the_unknown_domains_present_at_upload_time() {
        let Fixture {
            orchestrator,
            store,
            drive,
            ..
        } = fixture().await;
        let with_smoothies = |uuid: &str| {
            json!({
                "schemaVersion": 1,
                "exportedAt": "2026-01-01T00:00:00Z",
                "domains": {
                    "smoothies": {"count": 1, "records": [{"uuid": uuid}]}
                }
            })
        };
        let first = with_smoothies("0190f0f0-0000-7000-8000-000000000001");
        drive.put_bundle(FOLDER, serde_json::to_vec(&first).unwrap());
        assert!(orchestrator.pull().await.is_ok());

        let second = with_smoothies("0190f0f0-0000-7000-8000-000000000003");
        drive.put_bundle(FOLDER, serde_json::to_vec(&second).unwrap());
        store.inner().seed(Domain::Recipes, [recipe("Soup", 1)]).await;

        assert!(orchestrator.push().await.is_ok());

        let written: Value = serde_json::from_slice(&drive.bundle(FOLDER).unwrap()).unwrap();
        assert_eq!(written["domains"]["smoothies"], second["domains"]["smoothies"]);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_push_is_coalesced() {
        let Fixture {
            orchestrator,
            drive,
            ..
        } = fixture().await;
        drive.set_delay(Duration::from_millis(500));

        let first = tokio::spawn({
            let orchestrator = Arc::clone(&orchestrator);
            async move { orchestrator.push().await }
        });
        tokio::task::yield_now().await;
        while orchestrator.state() != SyncState::Pushing {
            tokio::task::yield_now().await;
        }

        let second = orchestrator.push().await;
        assert_eq!(second, PushResult::skipped(SkipReason::AlreadyInFlight));

        let first = first.await.unwrap();
        assert!(first.is_ok());
        assert_eq!(drive.upload_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn status_reports_last_results() {
        let Fixture { orchestrator, .. } = fixture().await;
        orchestrator.set_mode(SyncMode::Automatic);
        orchestrator.push().await;

        let status = orchestrator.status().await;

        assert_eq!(status.state, SyncState::Idle);
        assert_eq!(status.mode, SyncMode::Automatic);
        assert_eq!(status.active_location.unwrap().name, "Personal");
        assert!(status.last_push.unwrap().result.is_ok());
        assert!(status.last_pull.is_none());
    }
}
