//! Provider Exclusivity Manager.
//!
//! Owns the location registry and is the only place that mutates it. Every
//! mutation takes the registry lock for its whole duration, including the
//! backend disconnects it triggers, so activations never interleave. At most
//! one location across both slots and all backends is active afterwards.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::backend::{with_timeout, BackendSet, RemoteFolder};
use crate::error::SyncError;
use crate::models::{BackendId, LocationId, Slot, StorageLocation};
use crate::registry::StorageLocationRegistry;

/// A superseded backend whose `disconnect` failed. Non-fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisconnectFailure {
    pub backend: BackendId,
    pub message: String,
}

/// What an activation changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActivationReport {
    pub activated: Option<LocationId>,
    pub deactivated: Vec<LocationId>,
    pub disconnected: Vec<BackendId>,
    pub disconnect_failures: Vec<DisconnectFailure>,
}

impl ActivationReport {
    fn absorb(&mut self, other: Self) {
        self.deactivated.extend(other.deactivated);
        self.disconnected.extend(other.disconnected);
        self.disconnect_failures.extend(other.disconnect_failures);
        if other.activated.is_some() {
            self.activated = other.activated;
        }
    }
}

pub struct ExclusivityManager {
    registry: Mutex<StorageLocationRegistry>,
    backends: BackendSet,
    network_timeout: Duration,
}

impl ExclusivityManager {
    #[must_use]
    pub fn new(
        registry: StorageLocationRegistry,
        backends: BackendSet,
        network_timeout: Duration,
    ) -> Self {
        Self {
            registry: Mutex::new(registry),
            backends,
            network_timeout,
        }
    }

    #[must_use]
    pub const fn backends(&self) -> &BackendSet {
        &self.backends
    }

    /// Snapshot of every registered location.
    pub async fn locations(&self) -> Vec<StorageLocation> {
        self.registry.lock().await.locations().to_vec()
    }

    pub async fn location(&self, id: &LocationId) -> Option<StorageLocation> {
        self.registry.lock().await.get(id).cloned()
    }

    pub async fn active_location(&self) -> Option<StorageLocation> {
        self.registry.lock().await.active().cloned()
    }

    /// Make `id` the single active location.
    ///
    /// Every other active location's backend is disconnected once per distinct
    /// backend, including one the target also uses; the target reconnects on
    /// its next transfer. Disconnect failures are reported, not fatal.
    pub async fn activate(&self, id: &LocationId) -> Result<ActivationReport, SyncError> {
        let mut registry = self.registry.lock().await;
        self.activate_locked(&mut registry, Some(id)).await
    }

    /// Turn sync off: no location stays active.
    pub async fn deactivate_all(&self) -> Result<ActivationReport, SyncError> {
        let mut registry = self.registry.lock().await;
        self.activate_locked(&mut registry, None).await
    }

    /// Register an inactive location without touching the active one.
    pub async fn add_location(&self, location: StorageLocation) -> Result<LocationId, SyncError> {
        self.backends.get(location.backend_id)?;
        let id = location.id;
        let mut registry = self.registry.lock().await;
        registry.insert(location)?;
        registry.save()?;
        Ok(id)
    }

    /// Connect flow: deactivate everything, connect the backend, register the
    /// location (pending verification) and activate it.
    ///
    /// If connecting fails, sync is left off and nothing is registered.
    pub async fn connect_location(
        &self,
        backend_id: BackendId,
        name: &str,
        slot: Slot,
        folder_ref: &str,
    ) -> Result<(StorageLocation, ActivationReport), SyncError> {
        let backend = self.backends.get(backend_id)?;
        let mut registry = self.registry.lock().await;

        let mut report = self.activate_locked(&mut registry, None).await?;

        with_timeout("connect", self.network_timeout, backend.connect()).await?;

        let location = StorageLocation::new(name.trim(), backend_id, slot, folder_ref.trim());
        let id = location.id;
        registry.insert(location)?;
        report.absorb(self.activate_locked(&mut registry, Some(&id)).await?);

        let location = registry
            .get(&id)
            .cloned()
            .ok_or(SyncError::UnknownLocation(id))?;
        tracing::info!(
            "Connected {} location '{}' ({:?} slot)",
            backend_id,
            location.name,
            slot
        );
        Ok((location, report))
    }

    /// Forget a location. Disconnects its backend if it was active; remote
    /// data is never touched.
    pub async fn remove_location(&self, id: &LocationId) -> Result<StorageLocation, SyncError> {
        let mut registry = self.registry.lock().await;
        let location = registry
            .get(id)
            .cloned()
            .ok_or(SyncError::UnknownLocation(*id))?;

        if location.is_active {
            if let Err(error) = self.disconnect_backend(location.backend_id).await {
                tracing::warn!(
                    "Failed to disconnect {} while removing '{}': {error}",
                    location.backend_id,
                    location.name
                );
            }
        }

        let removed = registry.remove(id).ok_or(SyncError::UnknownLocation(*id))?;
        registry.save()?;
        tracing::info!("Removed storage location '{}'", removed.name);
        Ok(removed)
    }

    /// Enumerate candidate folders on a backend, connecting first if needed.
    pub async fn browse(&self, backend_id: BackendId) -> Result<Vec<RemoteFolder>, SyncError> {
        let backend = self.backends.get(backend_id)?;
        if !backend.is_connected().await {
            with_timeout("connect", self.network_timeout, backend.connect()).await?;
        }
        with_timeout("list_locations", self.network_timeout, backend.list_locations()).await
    }

    /// First successful round-trip: clear pending verification.
    pub async fn mark_verified(&self, id: &LocationId) -> Result<(), SyncError> {
        let mut registry = self.registry.lock().await;
        if registry.mark_verified(id, Utc::now()) {
            registry.save()?;
            tracing::debug!("Storage location {id} verified");
        }
        Ok(())
    }

    /// The remote refused access: flag the location and deactivate it.
    pub async fn mark_access_denied(&self, id: &LocationId) -> Result<(), SyncError> {
        let mut registry = self.registry.lock().await;
        if registry.mark_access_denied(id) {
            registry.save()?;
            tracing::warn!("Storage location {id} marked access denied and deactivated");
        }
        Ok(())
    }

    async fn activate_locked(
        &self,
        registry: &mut StorageLocationRegistry,
        target: Option<&LocationId>,
    ) -> Result<ActivationReport, SyncError> {
        if let Some(id) = target {
            let location = registry.get(id).ok_or(SyncError::UnknownLocation(*id))?;
            self.backends.get(location.backend_id)?;
        }

        let superseded: Vec<(LocationId, BackendId)> = registry
            .locations()
            .iter()
            .filter(|location| location.is_active && Some(&location.id) != target)
            .map(|location| (location.id, location.backend_id))
            .collect();

        let mut report = ActivationReport::default();
        let backends_to_disconnect: BTreeSet<BackendId> = superseded
            .iter()
            .map(|(_, backend_id)| *backend_id)
            .collect();

        for backend_id in backends_to_disconnect {
            match self.disconnect_backend(backend_id).await {
                Ok(()) => report.disconnected.push(backend_id),
                Err(error) => {
                    tracing::warn!("Disconnecting superseded {backend_id} failed: {error}");
                    report.disconnect_failures.push(DisconnectFailure {
                        backend: backend_id,
                        message: error.to_string(),
                    });
                }
            }
        }

        for location in registry.active_mut() {
            if Some(&location.id) != target {
                location.is_active = false;
            }
        }
        report.deactivated = superseded.into_iter().map(|(id, _)| id).collect();

        if let Some(id) = target {
            if let Some(location) = registry.get_mut(id) {
                if !location.is_active || location.access_denied {
                    location.is_pending_verification = true;
                }
                location.is_active = true;
                location.access_denied = false;
                tracing::info!("Activated storage location '{}'", location.name);
            }
            report.activated = Some(*id);
        } else if !report.deactivated.is_empty() {
            tracing::info!("Deactivated all storage locations");
        }

        registry.save()?;
        Ok(report)
    }

    async fn disconnect_backend(&self, backend_id: BackendId) -> Result<(), SyncError> {
        let backend = self.backends.get(backend_id)?;
        with_timeout("disconnect", self.network_timeout, backend.disconnect()).await
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    use std::sync::Arc;

    use super::*;
    use crate::registry::REGISTRY_FILE_NAME;
    use crate::testing::FakeBackend;

    struct Fixture {
        manager: ExclusivityManager,
        drive: Arc<FakeBackend>,
        onedrive: Arc<FakeBackend>,
    }

    fn fixture_with(registry: StorageLocationRegistry) -> Fixture {
        let drive = FakeBackend::new(BackendId::GoogleDrive);
        let onedrive = FakeBackend::new(BackendId::OneDrive);
        let backends = BackendSet::new()
            .with(drive.clone())
            .with(onedrive.clone());
        Fixture {
            manager: ExclusivityManager::new(registry, backends, Duration::from_secs(5)),
            drive,
            onedrive,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(StorageLocationRegistry::in_memory())
    }

    async fn add(manager: &ExclusivityManager, name: &str, backend: BackendId, slot: Slot) -> LocationId {
        manager
            .add_location(StorageLocation::new(name, backend, slot, format!("{name}-folder")))
            .await
            .unwrap()
    }

    async fn active_ids(manager: &ExclusivityManager) -> Vec<LocationId> {
        manager
            .locations()
            .await
            .into_iter()
            .filter(|location| location.is_active)
            .map(|location| location.id)
            .collect()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn activating_shared_onedrive_disconnects_personal_drive_once() {
        let Fixture {
            manager,
            drive,
            onedrive,
        } = fixture();
        let personal = add(&manager, "Personal", BackendId::GoogleDrive, Slot::Private).await;
        let shared = add(&manager, "Shared", BackendId::OneDrive, Slot::Shared).await;
        manager.activate(&personal).await.unwrap();

        let report = manager.activate(&shared).await.unwrap();

        assert_eq!(drive.disconnect_count(), 1);
        assert_eq!(onedrive.disconnect_count(), 0);
        assert_eq!(report.deactivated, vec![personal]);
        assert_eq!(report.activated, Some(shared));
        assert!(!manager.location(&personal).await.unwrap().is_active);
        assert!(manager.location(&shared).await.unwrap().is_active);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn shared_backend_is_disconnected_once_for_many_active_locations() {
        let mut registry = StorageLocationRegistry::in_memory();
        let a = StorageLocation::new("A", BackendId::GoogleDrive, Slot::Private, "a");
        let b = StorageLocation::new("B", BackendId::GoogleDrive, Slot::Shared, "b");
        let target = StorageLocation::new("C", BackendId::OneDrive, Slot::Private, "c");
        let (a_id, b_id, target_id) = (a.id, b.id, target.id);
        for location in [a, b, target] {
            registry.insert(location).unwrap();
        }
        // State left behind by an interrupted activation.
        for id in [a_id, b_id] {
            registry.get_mut(&id).unwrap().is_active = true;
        }
        let Fixture { manager, drive, .. } = fixture_with(registry);

        let report = manager.activate(&target_id).await.unwrap();

        assert_eq!(drive.disconnect_count(), 1);
        assert_eq!(report.disconnected, vec![BackendId::GoogleDrive]);
        assert_eq!(report.deactivated, vec![a_id, b_id]);
        assert_eq!(active_ids(&manager).await, vec![target_id]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn at_most_one_location_is_active_after_any_activation_sequence() {
        let Fixture { manager, .. } = fixture();
        let ids = vec![
            add(&manager, "P1", BackendId::GoogleDrive, Slot::Private).await,
            add(&manager, "P2", BackendId::OneDrive, Slot::Private).await,
            add(&manager, "S1", BackendId::GoogleDrive, Slot::Shared).await,
            add(&manager, "S2", BackendId::OneDrive, Slot::Shared).await,
        ];

        for index in [0, 2, 1, 1, 3, 0, 2, 3] {
            manager.activate(&ids[index]).await.unwrap();
            assert_eq!(active_ids(&manager).await, vec![ids[index]]);
        }

        manager.deactivate_all().await.unwrap();
        assert!(active_ids(&manager).await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn same_backend_switch_disconnects_the_superseded_session() {
        let Fixture { manager, drive, .. } = fixture();
        let first = add(&manager, "Mine", BackendId::GoogleDrive, Slot::Private).await;
        let second = add(&manager, "Family", BackendId::GoogleDrive, Slot::Shared).await;

        manager.activate(&first).await.unwrap();
        let report = manager.activate(&second).await.unwrap();

        assert_eq!(drive.disconnect_count(), 1);
        assert_eq!(report.deactivated, vec![first]);
        assert_eq!(report.disconnected, vec![BackendId::GoogleDrive]);
        assert_eq!(active_ids(&manager).await, vec![second]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn disconnect_failure_is_reported_but_activation_proceeds() {
        let Fixture {
            manager, drive, ..
        } = fixture();
        let personal = add(&manager, "Personal", BackendId::GoogleDrive, Slot::Private).await;
        let shared = add(&manager, "Shared", BackendId::OneDrive, Slot::Shared).await;
        manager.activate(&personal).await.unwrap();
        drive.fail_disconnect(Some(SyncError::transport("revoke endpoint down")));

        let report = manager.activate(&shared).await.unwrap();

        assert_eq!(report.disconnect_failures.len(), 1);
        assert_eq!(report.disconnect_failures[0].backend, BackendId::GoogleDrive);
        assert_eq!(active_ids(&manager).await, vec![shared]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unknown_location_is_rejected_without_side_effects() {
        let Fixture { manager, drive, .. } = fixture();
        let personal = add(&manager, "Personal", BackendId::GoogleDrive, Slot::Private).await;
        manager.activate(&personal).await.unwrap();

        let missing = LocationId::new();
        let error = manager.activate(&missing).await.unwrap_err();

        assert_eq!(error, SyncError::UnknownLocation(missing));
        assert_eq!(drive.disconnect_count(), 0);
        assert_eq!(active_ids(&manager).await, vec![personal]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn connect_flow_deactivates_first_then_activates_pending_location() {
        let Fixture {
            manager,
            drive,
            onedrive,
        } = fixture();
        let personal = add(&manager, "Personal", BackendId::GoogleDrive, Slot::Private).await;
        manager.activate(&personal).await.unwrap();

        let (location, report) = manager
            .connect_location(BackendId::OneDrive, " Shared ", Slot::Shared, "Apps/Larder")
            .await
            .unwrap();

        assert_eq!(location.name, "Shared");
        assert!(location.is_active);
        assert!(location.is_pending_verification);
        assert_eq!(report.deactivated, vec![personal]);
        assert_eq!(drive.disconnect_count(), 1);
        assert_eq!(onedrive.connect_count(), 1);
        assert_eq!(active_ids(&manager).await, vec![location.id]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_connect_leaves_sync_off_and_registers_nothing() {
        let Fixture {
            manager, onedrive, ..
        } = fixture();
        let personal = add(&manager, "Personal", BackendId::GoogleDrive, Slot::Private).await;
        manager.activate(&personal).await.unwrap();
        onedrive.fail_connect(Some(SyncError::Auth {
            backend: BackendId::OneDrive,
            message: "consent revoked".to_string(),
        }));

        let error = manager
            .connect_location(BackendId::OneDrive, "Shared", Slot::Shared, "Shared")
            .await
            .unwrap_err();

        assert!(error.is_user_actionable());
        assert!(active_ids(&manager).await.is_empty());
        assert_eq!(manager.locations().await.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn removing_active_location_disconnects_and_forgets_it() {
        let Fixture { manager, drive, .. } = fixture();
        let personal = add(&manager, "Personal", BackendId::GoogleDrive, Slot::Private).await;
        manager.activate(&personal).await.unwrap();

        let removed = manager.remove_location(&personal).await.unwrap();

        assert_eq!(removed.id, personal);
        assert_eq!(drive.disconnect_count(), 1);
        assert!(manager.locations().await.is_empty());
        assert!(matches!(
            manager.remove_location(&personal).await,
            Err(SyncError::UnknownLocation(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn access_denied_then_reactivation_resets_verification() {
        let Fixture { manager, .. } = fixture();
        let shared = add(&manager, "Shared", BackendId::OneDrive, Slot::Shared).await;
        manager.activate(&shared).await.unwrap();
        manager.mark_verified(&shared).await.unwrap();
        assert_eq!(manager.location(&shared).await.unwrap().badge(), "active");

        manager.mark_access_denied(&shared).await.unwrap();
        let denied = manager.location(&shared).await.unwrap();
        assert!(denied.access_denied);
        assert!(!denied.is_active);
        assert!(manager.active_location().await.is_none());

        manager.activate(&shared).await.unwrap();
        let reactivated = manager.location(&shared).await.unwrap();
        assert!(!reactivated.access_denied);
        assert!(reactivated.is_pending_verification);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn activation_is_persisted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(REGISTRY_FILE_NAME);
        let registry = StorageLocationRegistry::load_from_path(&path).unwrap();
        let Fixture { manager, .. } = fixture_with(registry);
        let personal = add(&manager, "Personal", BackendId::GoogleDrive, Slot::Private).await;

        manager.activate(&personal).await.unwrap();

        let reloaded = StorageLocationRegistry::load_from_path(&path).unwrap();
        assert_eq!(reloaded.active().map(|location| location.id), Some(personal));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn every_verification_timestamp_is_persisted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(REGISTRY_FILE_NAME);
        let registry = StorageLocationRegistry::load_from_path(&path).unwrap();
        let Fixture { manager, .. } = fixture_with(registry);
        let personal = add(&manager, "Personal", BackendId::GoogleDrive, Slot::Private).await;
        manager.activate(&personal).await.unwrap();

        manager.mark_verified(&personal).await.unwrap();
        let first = manager.location(&personal).await.unwrap().last_verified;
        tokio::time::sleep(Duration::from_millis(5)).await;
        manager.mark_verified(&personal).await.unwrap();
        let second = manager.location(&personal).await.unwrap().last_verified;

        assert!(second > first);
        let reloaded = StorageLocationRegistry::load_from_path(&path).unwrap();
        assert_eq!(reloaded.get(&personal).unwrap().last_verified, second);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn adding_location_for_unconfigured_backend_fails() {
        let Fixture { manager, .. } = fixture();
        let error = manager
            .add_location(StorageLocation::new("Bucket", BackendId::S3, Slot::Private, "x"))
            .await
            .unwrap_err();
        assert_eq!(error, SyncError::BackendUnavailable(BackendId::S3));
    }
}
