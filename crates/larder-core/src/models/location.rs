//! Storage location model

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A unique identifier for a storage location, using UUID v7
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocationId(Uuid);

impl LocationId {
    /// Create a new unique location ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for LocationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for LocationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s.trim())?))
    }
}

/// Remote storage provider. Adding a provider means adding a variant here and
/// one `RemoteBackend` implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendId {
    GoogleDrive,
    #[serde(rename = "onedrive")]
    OneDrive,
    S3,
    LocalFolder,
}

impl BackendId {
    pub const ALL: [Self; 4] = [Self::GoogleDrive, Self::OneDrive, Self::S3, Self::LocalFolder];

    /// Stable identifier used in the registry file and on the command line.
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::GoogleDrive => "google_drive",
            Self::OneDrive => "onedrive",
            Self::S3 => "s3",
            Self::LocalFolder => "local_folder",
        }
    }

    /// Human-facing provider name.
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::GoogleDrive => "Google Drive",
            Self::OneDrive => "OneDrive",
            Self::S3 => "S3-compatible storage",
            Self::LocalFolder => "Local folder",
        }
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for BackendId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "google_drive" | "gdrive" => Ok(Self::GoogleDrive),
            "onedrive" | "one_drive" => Ok(Self::OneDrive),
            "s3" | "r2" => Ok(Self::S3),
            "local_folder" | "local" | "folder" => Ok(Self::LocalFolder),
            _ => Err(format!("unknown backend '{s}'")),
        }
    }
}

/// Role a location plays. The exclusivity invariant spans both slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Slot {
    /// The user's own catalog
    #[default]
    Private,
    /// A catalog shared with other people
    Shared,
}

impl FromStr for Slot {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "private" => Ok(Self::Private),
            "shared" => Ok(Self::Shared),
            _ => Err(format!("unknown slot '{s}'")),
        }
    }
}

/// A configured remote destination that can be activated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageLocation {
    pub id: LocationId,
    /// Display name chosen by the user
    pub name: String,
    pub backend_id: BackendId,
    #[serde(default)]
    pub slot: Slot,
    /// Backend-specific folder id or path
    pub folder_ref: String,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default = "default_pending")]
    pub is_pending_verification: bool,
    #[serde(default)]
    pub access_denied: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_verified: Option<DateTime<Utc>>,
}

const fn default_pending() -> bool {
    true
}

impl StorageLocation {
    /// Create an inactive location awaiting its first successful round-trip.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        backend_id: BackendId,
        slot: Slot,
        folder_ref: impl Into<String>,
    ) -> Self {
        Self {
            id: LocationId::new(),
            name: name.into(),
            backend_id,
            slot,
            folder_ref: folder_ref.into(),
            is_active: false,
            is_pending_verification: true,
            access_denied: false,
            created_at: Utc::now(),
            last_verified: None,
        }
    }

    /// Short badge used by location lists.
    #[must_use]
    pub const fn badge(&self) -> &'static str {
        if self.access_denied {
            "denied"
        } else if self.is_pending_verification {
            "pending"
        } else if self.is_active {
            "active"
        } else {
            "inactive"
        }
    }
}
