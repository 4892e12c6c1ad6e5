//! Remote storage backends.
//!
//! Every provider implements [`RemoteBackend`]. The engine only ever talks to
//! `Arc<dyn RemoteBackend>` values looked up by [`BackendId`] in a
//! [`BackendSet`]; adding a provider means adding a `BackendId` variant and
//! one implementation here.

pub mod google_drive;
pub(crate) mod http;
pub mod local_folder;
pub mod onedrive;
pub mod s3;

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::config::{S3Config, SyncConfig};
use crate::error::{Result, SyncError};
use crate::models::BackendId;

pub use google_drive::GoogleDriveBackend;
pub use local_folder::LocalFolderBackend;
pub use onedrive::OneDriveBackend;
pub use s3::S3Backend;

const ENV_GDRIVE_ACCESS_TOKEN: &str = "LARDER_GDRIVE_ACCESS_TOKEN";
const ENV_ONEDRIVE_ACCESS_TOKEN: &str = "LARDER_ONEDRIVE_ACCESS_TOKEN";

/// Session credential handed out by a backend's `connect`.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    #[must_use]
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            expires_at: None,
        }
    }

    #[must_use]
    pub const fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Whether the credential is past its expiry at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Credential")
            .field("access_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// A folder (or prefix) on the remote that can become a storage location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteFolder {
    /// Backend-specific reference stored as the location's `folder_ref`
    pub reference: String,
    pub name: String,
}

/// Capability surface of one remote provider.
///
/// Uploads replace the single canonical bundle object at a location, so every
/// operation is safe to retry. `disconnect` only clears local session state
/// and never touches remote data.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    fn id(&self) -> BackendId;

    /// Acquire and verify a credential.
    async fn connect(&self) -> std::result::Result<Credential, SyncError>;

    async fn is_connected(&self) -> bool;

    /// Drop the cached credential. Idempotent.
    async fn disconnect(&self) -> std::result::Result<(), SyncError>;

    /// Replace the bundle stored in `folder_ref`.
    async fn upload(&self, folder_ref: &str, bytes: Vec<u8>) -> std::result::Result<(), SyncError>;

    /// Fetch the bundle stored in `folder_ref`; `None` when none was written yet.
    async fn download(&self, folder_ref: &str) -> std::result::Result<Option<Vec<u8>>, SyncError>;

    /// Candidate folders the user can pick as a location.
    async fn list_locations(&self) -> std::result::Result<Vec<RemoteFolder>, SyncError>;
}

/// Source of OAuth access tokens. Token acquisition and refresh happen outside
/// the engine; backends only ask for a currently valid token.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self, backend: BackendId) -> std::result::Result<Credential, SyncError>;
}

type Lookup = dyn Fn(&str) -> Option<String> + Send + Sync;

/// Reads bearer tokens from `LARDER_GDRIVE_ACCESS_TOKEN` / `LARDER_ONEDRIVE_ACCESS_TOKEN`.
#[derive(Clone)]
pub struct EnvTokenProvider {
    lookup: Arc<Lookup>,
}

impl EnvTokenProvider {
    #[must_use]
    pub fn from_env() -> Self {
        Self::with_lookup(|key| std::env::var(key).ok())
    }

    pub fn with_lookup(lookup: impl Fn(&str) -> Option<String> + Send + Sync + 'static) -> Self {
        Self {
            lookup: Arc::new(lookup),
        }
    }

    const fn variable_for(backend: BackendId) -> Option<&'static str> {
        match backend {
            BackendId::GoogleDrive => Some(ENV_GDRIVE_ACCESS_TOKEN),
            BackendId::OneDrive => Some(ENV_ONEDRIVE_ACCESS_TOKEN),
            BackendId::S3 | BackendId::LocalFolder => None,
        }
    }
}

impl std::fmt::Debug for EnvTokenProvider {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.debug_struct("EnvTokenProvider").finish_non_exhaustive()
    }
}

#[async_trait]
impl TokenProvider for EnvTokenProvider {
    async fn access_token(&self, backend: BackendId) -> std::result::Result<Credential, SyncError> {
        let Some(variable) = Self::variable_for(backend) else {
            return Err(SyncError::Auth {
                backend,
                message: "backend does not use OAuth tokens".to_string(),
            });
        };
        (self.lookup)(variable)
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
            .map(Credential::new)
            .ok_or_else(|| SyncError::Auth {
                backend,
                message: format!("{variable} is not set"),
            })
    }
}

/// Cached credential shared by the OAuth backends.
#[derive(Debug, Default)]
pub(crate) struct CredentialCache {
    current: RwLock<Option<Credential>>,
}

impl CredentialCache {
    pub(crate) async fn get(&self) -> Option<Credential> {
        let current = self.current.read().await;
        current
            .as_ref()
            .filter(|credential| !credential.is_expired(Utc::now()))
            .cloned()
    }

    pub(crate) async fn set(&self, credential: Credential) {
        *self.current.write().await = Some(credential);
    }

    pub(crate) async fn clear(&self) -> bool {
        self.current.write().await.take().is_some()
    }
}

/// Run one backend call under a hard deadline.
pub async fn with_timeout<T, F>(
    operation: &str,
    limit: Duration,
    future: F,
) -> std::result::Result<T, SyncError>
where
    F: Future<Output = std::result::Result<T, SyncError>>,
{
    tokio::time::timeout(limit, future)
        .await
        .map_err(|_| SyncError::timeout(operation, limit))?
}

/// The configured backends, keyed by provider.
#[derive(Clone, Default)]
pub struct BackendSet {
    backends: BTreeMap<BackendId, Arc<dyn RemoteBackend>>,
}

impl BackendSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every backend the config allows. S3 is only added when `s3` is set.
    pub fn from_config(
        config: &SyncConfig,
        tokens: Arc<dyn TokenProvider>,
        s3: Option<S3Config>,
    ) -> Result<Self> {
        let mut set = Self::new()
            .with(Arc::new(GoogleDriveBackend::new(
                config.google_drive.clone(),
                &config.bundle_file_name,
                config.network_timeout(),
                Arc::clone(&tokens),
            )?))
            .with(Arc::new(OneDriveBackend::new(
                config.onedrive.clone(),
                &config.bundle_file_name,
                config.network_timeout(),
                tokens,
            )?))
            .with(Arc::new(LocalFolderBackend::new(
                config.local_folder.root.clone(),
                &config.bundle_file_name,
            )));
        if let Some(s3) = s3 {
            set.insert(Arc::new(S3Backend::new(s3, &config.bundle_file_name)?));
        }
        Ok(set)
    }

    #[must_use]
    pub fn with(mut self, backend: Arc<dyn RemoteBackend>) -> Self {
        self.insert(backend);
        self
    }

    pub fn insert(&mut self, backend: Arc<dyn RemoteBackend>) {
        self.backends.insert(backend.id(), backend);
    }

    pub fn get(&self, id: BackendId) -> std::result::Result<Arc<dyn RemoteBackend>, SyncError> {
        self.backends
            .get(&id)
            .cloned()
            .ok_or(SyncError::BackendUnavailable(id))
    }

    pub fn ids(&self) -> impl Iterator<Item = BackendId> + '_ {
        self.backends.keys().copied()
    }
}

impl std::fmt::Debug for BackendSet {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_list()
            .entries(self.backends.keys())
            .finish()
    }
}
