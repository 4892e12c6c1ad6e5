//! Sync engine configuration.
//!
//! `SyncConfig` is persisted as pretty JSON (`sync.json` in the app's config
//! directory) and can be overridden from the environment. Backend endpoint
//! overrides live next to it; S3 credentials are environment-only and are
//! parsed by [`crate::backend::s3::S3Config`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bundle::DEFAULT_BUNDLE_FILE_NAME;
use crate::error::{Error, Result};
use crate::models::SyncMode;
use crate::util::{normalize_base_url, normalize_text_option, write_json_atomically};

pub use crate::backend::s3::S3Config;

/// File name of the sync config inside the app's config directory.
pub const CONFIG_FILE_NAME: &str = "sync.json";

const ENV_SYNC_MODE: &str = "LARDER_SYNC_MODE";
const ENV_DEBOUNCE_MS: &str = "LARDER_SYNC_DEBOUNCE_MS";
const ENV_NETWORK_TIMEOUT_SECS: &str = "LARDER_NETWORK_TIMEOUT_SECS";

const DEFAULT_DEBOUNCE_MS: u64 = 2_000;
const DEFAULT_NETWORK_TIMEOUT_SECS: u64 = 30;

pub const DEFAULT_GOOGLE_DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";
pub const DEFAULT_GOOGLE_DRIVE_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";
pub const DEFAULT_ONEDRIVE_API_BASE: &str = "https://graph.microsoft.com/v1.0";

/// User-facing sync policy plus engine tunables.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncConfig {
    #[serde(default = "default_config_version")]
    pub version: u32,
    #[serde(default)]
    pub mode: SyncMode,
    /// Quiet period after the last local edit before an automatic push
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Upper bound for every single backend call
    #[serde(default = "default_network_timeout_secs")]
    pub network_timeout_secs: u64,
    /// Object name of the bundle inside each location
    #[serde(default = "default_bundle_file_name")]
    pub bundle_file_name: String,
    #[serde(default)]
    pub google_drive: GoogleDriveConfig,
    #[serde(default)]
    pub onedrive: OneDriveConfig,
    #[serde(default)]
    pub local_folder: LocalFolderConfig,
}

/// Google Drive v3 endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GoogleDriveConfig {
    #[serde(default = "default_google_api_base")]
    pub api_base_url: String,
    #[serde(default = "default_google_upload_base")]
    pub upload_base_url: String,
}

/// Microsoft Graph endpoint used for OneDrive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OneDriveConfig {
    #[serde(default = "default_onedrive_api_base")]
    pub api_base_url: String,
}

/// Parent directory enumerated when browsing local-folder locations.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LocalFolderConfig {
    #[serde(default)]
    pub root: Option<PathBuf>,
}

const fn default_config_version() -> u32 {
    1
}

const fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE_MS
}

const fn default_network_timeout_secs() -> u64 {
    DEFAULT_NETWORK_TIMEOUT_SECS
}

fn default_bundle_file_name() -> String {
    DEFAULT_BUNDLE_FILE_NAME.to_string()
}

fn default_google_api_base() -> String {
    DEFAULT_GOOGLE_DRIVE_API_BASE.to_string()
}

fn default_google_upload_base() -> String {
    DEFAULT_GOOGLE_DRIVE_UPLOAD_BASE.to_string()
}

fn default_onedrive_api_base() -> String {
    DEFAULT_ONEDRIVE_API_BASE.to_string()
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            version: default_config_version(),
            mode: SyncMode::default(),
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            network_timeout_secs: DEFAULT_NETWORK_TIMEOUT_SECS,
            bundle_file_name: default_bundle_file_name(),
            google_drive: GoogleDriveConfig::default(),
            onedrive: OneDriveConfig::default(),
            local_folder: LocalFolderConfig::default(),
        }
    }
}

impl Default for GoogleDriveConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_google_api_base(),
            upload_base_url: default_google_upload_base(),
        }
    }
}

impl Default for OneDriveConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_onedrive_api_base(),
        }
    }
}

impl SyncConfig {
    /// Load the config at `path`, falling back to defaults when it does not exist.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let mut config = serde_json::from_str::<Self>(&raw).map_err(|error| {
            Error::InvalidInput(format!(
                "Failed to parse sync config at {}: {error}",
                path.display()
            ))
        })?;
        config.normalize()?;
        Ok(config)
    }

    /// Persist the normalized config at `path`.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        let mut normalized = self.clone();
        normalized.normalize()?;
        write_json_atomically(path, &normalized)
    }

    /// Apply `LARDER_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (tests inject a map).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(mode) = normalize_text_option(lookup(ENV_SYNC_MODE)) {
            self.mode = mode
                .parse()
                .map_err(|error: String| Error::InvalidInput(format!("{ENV_SYNC_MODE}: {error}")))?;
        }
        if let Some(raw) = normalize_text_option(lookup(ENV_DEBOUNCE_MS)) {
            self.debounce_ms = parse_number(ENV_DEBOUNCE_MS, &raw)?;
        }
        if let Some(raw) = normalize_text_option(lookup(ENV_NETWORK_TIMEOUT_SECS)) {
            self.network_timeout_secs = parse_number(ENV_NETWORK_TIMEOUT_SECS, &raw)?;
        }
        self.normalize()
    }

    /// Debounce window for automatic pushes.
    #[must_use]
    pub const fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Timeout applied to every backend call.
    #[must_use]
    pub const fn network_timeout(&self) -> Duration {
        Duration::from_secs(self.network_timeout_secs)
    }

    fn normalize(&mut self) -> Result<()> {
        if self.network_timeout_secs == 0 {
            return Err(Error::InvalidInput(
                "network_timeout_secs must be greater than zero".to_string(),
            ));
        }
        self.bundle_file_name = normalize_text_option(Some(self.bundle_file_name.clone()))
            .map(|name| name.trim_matches('/').to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(default_bundle_file_name);
        self.google_drive.api_base_url =
            normalize_base_url(&self.google_drive.api_base_url, "google_drive.api_base_url")?;
        self.google_drive.upload_base_url = normalize_base_url(
            &self.google_drive.upload_base_url,
            "google_drive.upload_base_url",
        )?;
        self.onedrive.api_base_url =
            normalize_base_url(&self.onedrive.api_base_url, "onedrive.api_base_url")?;
        Ok(())
    }
}

fn parse_number(key: &str, raw: &str) -> Result<u64> {
    raw.parse::<u64>()
        .map_err(|error| Error::InvalidInput(format!("{key} must be a whole number: {error}")))
}
