//! Storage Location Registry: the persisted list of known remote locations.
//!
//! Read access is public. Mutations are crate-private so that activation state
//! only changes through [`crate::exclusivity::ExclusivityManager`].

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{LocationId, StorageLocation};
use crate::util::write_json_atomically;

/// File name of the registry inside the app's config directory.
pub const REGISTRY_FILE_NAME: &str = "locations.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
struct RegistryDocument {
    #[serde(default = "default_registry_version")]
    version: u32,
    #[serde(default)]
    locations: Vec<StorageLocation>,
}

const fn default_registry_version() -> u32 {
    1
}

/// Known storage locations across both slots and all backends.
#[derive(Debug, Clone, Default)]
pub struct StorageLocationRegistry {
    path: Option<PathBuf>,
    locations: Vec<StorageLocation>,
}

impl StorageLocationRegistry {
    /// A registry that is never written to disk (tests, ephemeral sessions).
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the registry at `path`, starting empty when the file does not exist.
    ///
    /// A document that violates the single-active or access-denied invariants
    /// is repaired on load.
    pub fn load_from_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let locations = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            serde_json::from_str::<RegistryDocument>(&raw)
                .map_err(|error| {
                    Error::InvalidInput(format!(
                        "Failed to parse location registry at {}: {error}",
                        path.display()
                    ))
                })?
                .locations
        } else {
            Vec::new()
        };

        let mut registry = Self {
            path: Some(path),
            locations,
        };
        let repairs = registry.repair();
        for repair in &repairs {
            tracing::warn!("Repaired location registry: {repair}");
        }
        if !repairs.is_empty() {
            registry.save()?;
        }
        Ok(registry)
    }

    /// Persist the registry (no-op for in-memory registries).
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        write_json_atomically(
            path,
            &RegistryDocument {
                version: default_registry_version(),
                locations: self.locations.clone(),
            },
        )
    }

    /// Where the registry is persisted, if anywhere.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// All locations in insertion order.
    #[must_use]
    pub fn locations(&self) -> &[StorageLocation] {
        &self.locations
    }

    #[must_use]
    pub fn get(&self, id: &LocationId) -> Option<&StorageLocation> {
        self.locations.iter().find(|location| &location.id == id)
    }

    /// The single active location, if any.
    #[must_use]
    pub fn active(&self) -> Option<&StorageLocation> {
        self.locations.iter().find(|location| location.is_active)
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.locations.iter().filter(|location| location.is_active).count()
    }

    pub(crate) fn insert(&mut self, mut location: StorageLocation) -> Result<()> {
        if self.get(&location.id).is_some() {
            return Err(Error::InvalidInput(format!(
                "Storage location {} already exists",
                location.id
            )));
        }
        location.is_active = false;
        self.locations.push(location);
        Ok(())
    }

    pub(crate) fn remove(&mut self, id: &LocationId) -> Option<StorageLocation> {
        let index = self.locations.iter().position(|location| &location.id == id)?;
        Some(self.locations.remove(index))
    }

    pub(crate) fn get_mut(&mut self, id: &LocationId) -> Option<&mut StorageLocation> {
        self.locations.iter_mut().find(|location| &location.id == id)
    }

    pub(crate) fn active_mut(&mut self) -> impl Iterator<Item = &mut StorageLocation> {
        self.locations.iter_mut().filter(|location| location.is_active)
    }

    /// Record a successful round-trip at `at`. False only for an unknown id;
    /// the timestamp moves on every call, so there is always something to save.
    pub(crate) fn mark_verified(&mut self, id: &LocationId, at: DateTime<Utc>) -> bool {
        let Some(location) = self.get_mut(id) else {
            return false;
        };
        location.is_pending_verification = false;
        location.access_denied = false;
        location.last_verified = Some(at);
        true
    }

    pub(crate) fn mark_access_denied(&mut self, id: &LocationId) -> bool {
        let Some(location) = self.get_mut(id) else {
            return false;
        };
        location.access_denied = true;
        location.is_active = false;
        true
    }

    fn repair(&mut self) -> Vec<String> {
        let mut repairs = Vec::new();
        let mut seen_active = false;

        for location in &mut self.locations {
            if location.access_denied && location.is_active {
                location.is_active = false;
                repairs.push(format!("'{}' was active despite access denied", location.name));
                continue;
            }
            if location.is_active {
                if seen_active {
                    location.is_active = false;
                    repairs.push(format!("'{}' was a second active location", location.name));
                }
                seen_active = true;
            }
        }

        repairs
    }
}
