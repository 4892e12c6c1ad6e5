//! Google Drive v3 backend.
//!
//! A location is a Drive folder id (`root` for My Drive). The bundle is a
//! single JSON file inside that folder, found by name and overwritten in place.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;

use super::http::{build_client, ensure_success, read_bytes, read_json, request_error};
use super::{Credential, CredentialCache, RemoteBackend, RemoteFolder, TokenProvider};
use crate::config::GoogleDriveConfig;
use crate::error::{Result, SyncError};
use crate::models::BackendId;

const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";
const BUNDLE_MIME_TYPE: &str = "application/json";
const ROOT_FOLDER: &str = "root";

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Debug, Deserialize)]
struct DriveFile {
    id: String,
    #[serde(default)]
    name: String,
}

pub struct GoogleDriveBackend {
    config: GoogleDriveConfig,
    bundle_file_name: String,
    client: reqwest::Client,
    tokens: Arc<dyn TokenProvider>,
    credential: CredentialCache,
}

impl GoogleDriveBackend {
    pub fn new(
        config: GoogleDriveConfig,
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

    async fn find_bundle(
        &self,
        token: &str,
        folder_ref: &str,
    ) -> std::result::Result<Option<String>, SyncError> {
        let query = bundle_query(&self.bundle_file_name, parent_folder(folder_ref));
        let url = format!(
            "{}/files?q={}&fields={}&spaces=drive",
            self.config.api_base_url,
            urlencoding::encode(&query),
            urlencoding::encode("files(id,name)")
        );
        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|error| request_error(BackendId::GoogleDrive, "files.list", &error))?;
        let response = ensure_success(BackendId::GoogleDrive, folder_ref, response).await?;
        let list: FileList = read_json(BackendId::GoogleDrive, "files.list", response).await?;
        Ok(list.files.into_iter().next().map(|file| file.id))
    }

    async fn create_bundle_file(
        &self,
        token: &str,
        folder_ref: &str,
    ) -> std::result::Result<String, SyncError> {
        let metadata = bundle_metadata(&self.bundle_file_name, parent_folder(folder_ref));
        let response = self
            .client
            .post(format!("{}/files?fields=id", self.config.api_base_url))
            .bearer_auth(token)
            .json(&metadata)
            .send()
            .await
            .map_err(|error| request_error(BackendId::GoogleDrive, "files.create", &error))?;
        let response = ensure_success(BackendId::GoogleDrive, folder_ref, response).await?;
        let file: DriveFile = read_json(BackendId::GoogleDrive, "files.create", response).await?;
        tracing::debug!("Created Google Drive bundle file {} in {folder_ref}", file.id);
        Ok(file.id)
    }
}

#[async_trait]
impl RemoteBackend for GoogleDriveBackend {
    fn id(&self) -> BackendId {
        BackendId::GoogleDrive
    }

    async fn connect(&self) -> std::result::Result<Credential, SyncError> {
        let credential = self.tokens.access_token(BackendId::GoogleDrive).await?;
        let response = self
            .client
            .get(format!("{}/about?fields=user", self.config.api_base_url))
            .bearer_auth(&credential.access_token)
            .send()
            .await
            .map_err(|error| request_error(BackendId::GoogleDrive, "about.get", &error))?;
        ensure_success(BackendId::GoogleDrive, "account", response).await?;

        self.credential.set(credential.clone()).await;
        tracing::info!("Connected to Google Drive");
        Ok(credential)
    }

    async fn is_connected(&self) -> bool {
        self.credential.get().await.is_some()
    }

    async fn disconnect(&self) -> std::result::Result<(), SyncError> {
        if self.credential.clear().await {
            tracing::info!("Disconnected from Google Drive");
        }
        Ok(())
    }

    async fn upload(&self, folder_ref: &str, bytes: Vec<u8>) -> std::result::Result<(), SyncError> {
        let token = self.bearer().await?;
        let file_id = match self.find_bundle(&token, folder_ref).await? {
            Some(file_id) => file_id,
            None => self.create_bundle_file(&token, folder_ref).await?,
        };

        let response = self
            .client
            .patch(format!(
                "{}/files/{}?uploadType=media",
                self.config.upload_base_url,
                urlencoding::encode(&file_id)
            ))
            .bearer_auth(&token)
            .header(reqwest::header::CONTENT_TYPE, BUNDLE_MIME_TYPE)
            .body(bytes)
            .send()
            .await
            .map_err(|error| request_error(BackendId::GoogleDrive, "files.update", &error))?;
        ensure_success(BackendId::GoogleDrive, folder_ref, response).await?;
        Ok(())
    }

    async fn download(&self, folder_ref: &str) -> std::result::Result<Option<Vec<u8>>, SyncError> {
        let token = self.bearer().await?;
        let Some(file_id) = self.find_bundle(&token, folder_ref).await? else {
            return Ok(None);
        };

        let response = self
            .client
            .get(format!(
                "{}/files/{}?alt=media",
                self.config.api_base_url,
                urlencoding::encode(&file_id)
            ))
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|error| request_error(BackendId::GoogleDrive, "files.get", &error))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = ensure_success(BackendId::GoogleDrive, folder_ref, response).await?;
        read_bytes(BackendId::GoogleDrive, "files.get", response)
            .await
            .map(Some)
    }

    async fn list_locations(&self) -> std::result::Result<Vec<RemoteFolder>, SyncError> {
        let token = self.bearer().await?;
        let query = format!("mimeType = '{FOLDER_MIME_TYPE}' and trashed = false");
        let url = format!(
            "{}/files?q={}&fields={}&orderBy=name&pageSize=100&spaces=drive",
            self.config.api_base_url,
            urlencoding::encode(&query),
            urlencoding::encode("files(id,name)")
        );
        let response = self
            .client
            .get(url)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|error| request_error(BackendId::GoogleDrive, "files.list", &error))?;
        let response = ensure_success(BackendId::GoogleDrive, "folders", response).await?;
        let list: FileList = read_json(BackendId::GoogleDrive, "files.list", response).await?;

        let mut folders = vec![RemoteFolder {
            reference: ROOT_FOLDER.to_string(),
            name: "My Drive".to_string(),
        }];
        folders.extend(list.files.into_iter().map(|file| RemoteFolder {
            reference: file.id,
            name: file.name,
        }));
        Ok(folders)
    }
}

/// The Drive folder id a location refers to. Blank means the user's root.
fn parent_folder(folder_ref: &str) -> &str {
    let folder = folder_ref.trim();
    if folder.is_empty() {
        ROOT_FOLDER
    } else {
        folder
    }
}

/// Drive query matching the bundle file inside one folder.
fn bundle_query(file_name: &str, folder: &str) -> String {
    format!(
        "name = '{}' and '{}' in parents and trashed = false",
        escape_query_literal(file_name),
        escape_query_literal(folder)
    )
}

/// Metadata for a new bundle file created in `folder`.
fn bundle_metadata(file_name: &str, folder: &str) -> serde_json::Value {
    json!({
        "name": file_name,
        "parents": [folder],
        "mimeType": BUNDLE_MIME_TYPE,
    })
}

fn escape_query_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}
