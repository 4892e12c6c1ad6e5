//! OneDrive backend over Microsoft Graph.
//!
//! A location is a path below the drive root (e.g. `Apps/Larder`); the bundle
//! is addressed by path, so no id lookup is needed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;

use super::http::{build_client, ensure_success, read_bytes, read_json, request_error};
use super::{Credential, CredentialCache, RemoteBackend, RemoteFolder, TokenProvider};
use crate::config::OneDriveConfig;
use crate::error::{Result, SyncError};
use crate::models::BackendId;

#[derive(Debug, Deserialize)]
struct ChildrenPage {
    #[serde(default)]
    value: Vec<DriveItem>,
}

#[derive(Debug, Deserialize)]
struct DriveItem {
    name: String,
    #[serde(default)]
    folder: Option<Value>,
}

pub struct OneDriveBackend {
    config: OneDriveConfig,
    bundle_file_name: String,
    client: reqwest::Client,
    tokens: Arc<dyn TokenProvider>,
    credential: CredentialCache,
}

impl OneDriveBackend {
    pub fn new(
        config: OneDriveConfig,
        bundle_file_name: &str,
        timeout: Duration,
        tokens: Arc<dyn TokenProvider>,
    ) -> Result<Self> {
        Ok(Self {
            config,
            bundle_file_name: bundle_file_name.to_string(),
            client: build_client(timeout)?,
            tokens,
            credential: CredentialCache::default(),
        })
    }

    async fn bearer(&self) -> std::result::Result<String, SyncError> {
        if let Some(credential) = self.credential.get().await {
            return Ok(credential.access_token);
        }
        Ok(self.connect().await?.access_token)
    }

    fn content_url(&self, folder_ref: &str) -> String {
        format!(
            "{}/me/drive/root:/{}:/content",
            self.config.api_base_url,
            item_path(folder_ref, &self.bundle_file_name)
        )
    }
}

#[async_trait]
impl RemoteBackend for OneDriveBackend {
    fn id(&self) -> BackendId {
        BackendId::OneDrive
    }

    async fn connect(&self) -> std::result::Result<Credential, SyncError> {
        let credential = self.tokens.access_token(BackendId::OneDrive).await?;
        let response = self
            .client
            .get(format!("{}/me/drive?$select=id", self.config.api_base_url))
            .bearer_auth(&credential.access_token)
            .send()
            .await
            .map_err(|error| request_error(BackendId::OneDrive, "drive.get", &error))?;
        ensure_success(BackendId::OneDrive, "drive", response).await?;

        self.credential.set(credential.clone()).await;
        tracing::info!("Connected to OneDrive");
        Ok(credential)
    }

    async fn is_connected(&self) -> bool {
        self.credential.get().await.is_some()
    }

    async fn disconnect(&self) -> std::result::Result<(), SyncError> {
        if self.credential.clear().await {
            tracing::info!("Disconnected from OneDrive");
        }
        Ok(())
    }

    async fn upload(&self, folder_ref: &str, bytes: Vec<u8>) -> std::result::Result<(), SyncError> {
        let token = self.bearer().await?;
        // Simple upload; bundles stay well under Graph's 4 MB limit for this endpoint.
        let response = self
            .client
            .put(self.content_url(folder_ref))
            .bearer_auth(&token)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(bytes)
            .send()
            .await
            .map_err(|error| request_error(BackendId::OneDrive, "content.put", &error))?;
        ensure_success(BackendId::OneDrive, folder_ref, response).await?;
        Ok(())
    }

    async fn download(&self, folder_ref: &str) -> std::result::Result<Option<Vec<u8>>, SyncError> {
        let token = self.bearer().await?;
        let response = self
            .client
            .get(self.content_url(folder_ref))
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|error| request_error(BackendId::OneDrive, "content.get", &error))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = ensure_success(BackendId::OneDrive, folder_ref, response).await?;
        read_bytes(BackendId::OneDrive, "content.get", response)
            .await
            .map(Some)
    }

    async fn list_locations(&self) -> std::result::Result<Vec<RemoteFolder>, SyncError> {
        let token = self.bearer().await?;
        let response = self
            .client
            .get(format!(
                "{}/me/drive/root/children?$select=name,folder&$top=200",
                self.config.api_base_url
            ))
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|error| request_error(BackendId::OneDrive, "children.list", &error))?;
        let response = ensure_success(BackendId::OneDrive, "root", response).await?;
        let page: ChildrenPage = read_json(BackendId::OneDrive, "children.list", response).await?;

        Ok(page
            .value
            .into_iter()
            .filter(|item| item.folder.is_some())
            .map(|item| RemoteFolder {
                reference: item.name.clone(),
                name: item.name,
            })
            .collect())
    }
}

/// Percent-encoded `folder/.../file` path relative to the drive root.
fn item_path(folder_ref: &str, file_name: &str) -> String {
    folder_ref
        .split('/')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .chain(std::iter::once(file_name))
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
