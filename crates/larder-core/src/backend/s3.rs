//! S3-compatible object storage backend (AWS S3, Cloudflare R2, MinIO).
//!
//! A location is a key prefix inside the configured bucket; the bundle is the
//! object `<prefix>/<bundle file name>`.

use std::env;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::{primitives::ByteStream, Client};
use aws_types::region::Region;

use super::{Credential, RemoteBackend, RemoteFolder};
use crate::error::{Error, Result, SyncError};
use crate::models::BackendId;
use crate::util::{is_http_url, normalize_text_option};

const ENV_BUCKET: &str = "LARDER_S3_BUCKET";
const ENV_ACCESS_KEY_ID: &str = "LARDER_S3_ACCESS_KEY_ID";
const ENV_SECRET_ACCESS_KEY: &str = "LARDER_S3_SECRET_ACCESS_KEY";
const ENV_ENDPOINT_URL: &str = "LARDER_S3_ENDPOINT_URL";
const ENV_ACCOUNT_ID: &str = "LARDER_S3_ACCOUNT_ID";
const ENV_REGION: &str = "LARDER_S3_REGION";

const DEFAULT_REGION: &str = "auto";

/// S3-compatible storage configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct S3Config {
    pub bucket: String,
    /// Access key id for S3-compatible auth.
    pub access_key_id: String,
    /// Secret access key for S3-compatible auth.
    pub secret_access_key: String,
    /// Service endpoint; derived from the account id for R2.
    pub endpoint_url: String,
    pub region: String,
}

impl std::fmt::Debug for S3Config {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("S3Config")
            .field("bucket", &self.bucket)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .field("endpoint_url", &self.endpoint_url)
            .field("region", &self.region)
            .finish()
    }
}

impl S3Config {
    /// Load S3 configuration from `LARDER_S3_*` environment variables.
    ///
    /// Returns `Ok(None)` when no S3 variables are set.
    /// Returns an error when only a partial configuration is provided.
    pub fn from_env() -> Result<Option<Self>> {
        parse_config(|key| env::var(key).ok())
    }
}

/// Bundle storage in an S3 bucket.
pub struct S3Backend {
    config: S3Config,
    bundle_file_name: String,
    client: Client,
    connected: AtomicBool,
}

impl S3Backend {
    pub fn new(config: S3Config, bundle_file_name: &str) -> Result<Self> {
        let client = build_s3_client(&config);
        Ok(Self {
            config,
            bundle_file_name: normalize_object_key(bundle_file_name)?,
            client,
            connected: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub const fn config(&self) -> &S3Config {
        &self.config
    }

    fn object_key(&self, folder_ref: &str) -> String {
        let prefix = folder_ref.trim().trim_matches('/');
        if prefix.is_empty() {
            self.bundle_file_name.clone()
        } else {
            format!("{prefix}/{}", self.bundle_file_name)
        }
    }
}

#[async_trait]
impl RemoteBackend for S3Backend {
    fn id(&self) -> BackendId {
        BackendId::S3
    }

    async fn connect(&self) -> std::result::Result<Credential, SyncError> {
        self.client
            .head_bucket()
            .bucket(&self.config.bucket)
            .send()
            .await
            .map_err(|error| storage_error("head_bucket", &self.config.bucket, None, &error))?;

        self.connected.store(true, Ordering::SeqCst);
        tracing::info!("Connected to S3 bucket {}", self.config.bucket);
        Ok(Credential::new(self.config.access_key_id.clone()))
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) -> std::result::Result<(), SyncError> {
        if self.connected.swap(false, Ordering::SeqCst) {
            tracing::info!("Disconnected from S3 bucket {}", self.config.bucket);
        }
        Ok(())
    }

    async fn upload(&self, folder_ref: &str, bytes: Vec<u8>) -> std::result::Result<(), SyncError> {
        let object_key = self.object_key(folder_ref);
        self.client
            .put_object()
            .bucket(&self.config.bucket)
            .key(&object_key)
            .content_type("application/json")
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|error| {
                storage_error("put_object", &self.config.bucket, Some(&object_key), &error)
            })?;
        Ok(())
    }

    async fn download(&self, folder_ref: &str) -> std::result::Result<Option<Vec<u8>>, SyncError> {
        let object_key = self.object_key(folder_ref);
        let response = match self
            .client
            .get_object()
            .bucket(&self.config.bucket)
            .key(&object_key)
            .send()
            .await
        {
            Ok(response) => response,
            Err(SdkError::ServiceError(service)) if service.err().is_no_such_key() => {
                return Ok(None);
            }
            Err(error) if http_status(&error) == Some(404) => return Ok(None),
            Err(error) => {
                return Err(storage_error(
                    "get_object",
                    &self.config.bucket,
                    Some(&object_key),
                    &error,
                ));
            }
        };

        let payload = response.body.collect().await.map_err(|error| {
            SyncError::transport(format!(
                "S3 get_object_body failed for {}/{object_key}: {error}",
                self.config.bucket
            ))
        })?;
        Ok(Some(payload.into_bytes().to_vec()))
    }

    async fn list_locations(&self) -> std::result::Result<Vec<RemoteFolder>, SyncError> {
        let response = self
            .client
            .list_objects_v2()
            .bucket(&self.config.bucket)
            .delimiter("/")
            .send()
            .await
            .map_err(|error| {
                storage_error("list_objects_v2", &self.config.bucket, None, &error)
            })?;

        let mut folders = vec![RemoteFolder {
            reference: String::new(),
            name: self.config.bucket.clone(),
        }];
        folders.extend(
            response
                .common_prefixes()
                .iter()
                .filter_map(|prefix| prefix.prefix())
                .map(|prefix| RemoteFolder {
                    reference: prefix.trim_end_matches('/').to_string(),
                    name: prefix.trim_end_matches('/').to_string(),
                }),
        );
        Ok(folders)
    }
}

fn parse_config(lookup: impl Fn(&str) -> Option<String>) -> Result<Option<S3Config>> {
    let read = |key: &str| lookup(key).map(|value| value.trim().to_string());
    let bucket = read(ENV_BUCKET);
    let access_key_id = read(ENV_ACCESS_KEY_ID);
    let secret_access_key = read(ENV_SECRET_ACCESS_KEY);
    let endpoint_url = read(ENV_ENDPOINT_URL);
    let account_id = read(ENV_ACCOUNT_ID);
    let region = read(ENV_REGION);

    let any_present = bucket.is_some()
        || access_key_id.is_some()
        || secret_access_key.is_some()
        || endpoint_url.is_some()
        || account_id.is_some()
        || region.is_some();

    if !any_present {
        return Ok(None);
    }

    let endpoint_url = match (normalize_text_option(endpoint_url), normalize_text_option(account_id)) {
        (Some(url), _) if !is_http_url(&url) => {
            return Err(Error::InvalidInput(format!(
                "{ENV_ENDPOINT_URL} must start with http:// or https://"
            )));
        }
        (Some(url), _) => Some(url.trim_end_matches('/').to_string()),
        (None, Some(account_id)) => Some(format!("https://{account_id}.r2.cloudflarestorage.com")),
        (None, None) => None,
    };

    let bucket = normalize_text_option(bucket);
    let access_key_id = normalize_text_option(access_key_id);
    let secret_access_key = normalize_text_option(secret_access_key);

    let mut missing = Vec::new();
    if bucket.is_none() {
        missing.push(ENV_BUCKET.to_string());
    }
    if access_key_id.is_none() {
        missing.push(ENV_ACCESS_KEY_ID.to_string());
    }
    if secret_access_key.is_none() {
        missing.push(ENV_SECRET_ACCESS_KEY.to_string());
    }
    if endpoint_url.is_none() {
        missing.push(format!("{ENV_ENDPOINT_URL} or {ENV_ACCOUNT_ID}"));
    }

    let (Some(bucket), Some(access_key_id), Some(secret_access_key), Some(endpoint_url)) =
        (bucket, access_key_id, secret_access_key, endpoint_url)
    else {
        return Err(Error::InvalidInput(format!(
            "S3 configuration is incomplete. Missing: {}",
            missing.join(", ")
        )));
    };

    Ok(Some(S3Config {
        bucket,
        access_key_id,
        secret_access_key,
        endpoint_url,
        region: normalize_text_option(region).unwrap_or_else(|| DEFAULT_REGION.to_string()),
    }))
}

fn build_s3_client(config: &S3Config) -> Client {
    let credentials = Credentials::new(
        config.access_key_id.clone(),
        config.secret_access_key.clone(),
        None,
        None,
        "larder-core-s3-backend",
    );

    let sdk_config = aws_sdk_s3::config::Builder::new()
        .region(Region::new(config.region.clone()))
        .credentials_provider(credentials)
        .endpoint_url(config.endpoint_url.clone())
        .force_path_style(true)
        .build();

    Client::from_conf(sdk_config)
}

fn http_status<E>(error: &SdkError<E>) -> Option<u16> {
    error.raw_response().map(|response| response.status().as_u16())
}

fn storage_error<E>(
    operation: &str,
    bucket: &str,
    object_key: Option<&str>,
    error: &SdkError<E>,
) -> SyncError
where
    E: std::error::Error + 'static,
{
    let target = object_key.map_or_else(|| bucket.to_string(), |key| format!("{bucket}/{key}"));
    let message = format!(
        "S3 {operation} failed for {target}: {}",
        DisplayErrorContext(error)
    );
    match (error, http_status(error)) {
        (SdkError::TimeoutError(_), _) => SyncError::Transport {
            message,
            timed_out: true,
        },
        (_, Some(401)) => SyncError::Auth {
            backend: BackendId::S3,
            message,
        },
        (_, Some(403)) => SyncError::AccessDenied {
            location: target,
            message,
        },
        _ => SyncError::transport(message),
    }
}

fn normalize_object_key(object_key: &str) -> Result<String> {
    let object_key = object_key.trim().trim_matches('/').to_string();
    if object_key.is_empty() {
        return Err(Error::InvalidInput(
            "Bundle object key cannot be empty".to_string(),
        ));
    }
    Ok(object_key)
}
