//! Local-folder backend: the bundle lives in a directory on disk.
//!
//! Useful with folders that a desktop client mirrors (Dropbox, Syncthing,
//! iCloud Drive) and for end-to-end tests. Writes go to a temp file that is
//! renamed over the bundle, so readers never see a partial document.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use super::{Credential, RemoteBackend, RemoteFolder};
use crate::error::SyncError;
use crate::models::BackendId;

pub struct LocalFolderBackend {
    root: Option<PathBuf>,
    bundle_file_name: String,
    connected: AtomicBool,
}

impl LocalFolderBackend {
    /// `root` resolves relative folder refs and is what `list_locations` browses.
    #[must_use]
    pub fn new(root: Option<PathBuf>, bundle_file_name: &str) -> Self {
        Self {
            root,
            bundle_file_name: bundle_file_name.trim().trim_matches('/').to_string(),
            connected: AtomicBool::new(false),
        }
    }

    fn folder_path(&self, folder_ref: &str) -> PathBuf {
        let folder = Path::new(folder_ref.trim());
        match &self.root {
            Some(root) if folder.is_relative() => root.join(folder),
            _ => folder.to_path_buf(),
        }
    }

    fn bundle_path(&self, folder_ref: &str) -> PathBuf {
        self.folder_path(folder_ref).join(&self.bundle_file_name)
    }
}

fn io_error(operation: &str, path: &Path, error: &std::io::Error) -> SyncError {
    let message = format!("{operation} {} failed: {error}", path.display());
    if error.kind() == ErrorKind::PermissionDenied {
        SyncError::AccessDenied {
            location: path.display().to_string(),
            message,
        }
    } else {
        SyncError::transport(message)
    }
}

#[async_trait]
impl RemoteBackend for LocalFolderBackend {
    fn id(&self) -> BackendId {
        BackendId::LocalFolder
    }

    async fn connect(&self) -> Result<Credential, SyncError> {
        if let Some(root) = &self.root {
            tokio::fs::create_dir_all(root)
                .await
                .map_err(|error| io_error("create", root, &error))?;
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(Credential::new("local"))
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) -> Result<(), SyncError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn upload(&self, folder_ref: &str, bytes: Vec<u8>) -> Result<(), SyncError> {
        let folder = self.folder_path(folder_ref);
        tokio::fs::create_dir_all(&folder)
            .await
            .map_err(|error| io_error("create", &folder, &error))?;

        let target = self.bundle_path(folder_ref);
        let temp = folder.join(format!(".{}.tmp", self.bundle_file_name));
        tokio::fs::write(&temp, bytes)
            .await
            .map_err(|error| io_error("write", &temp, &error))?;
        tokio::fs::rename(&temp, &target)
            .await
            .map_err(|error| io_error("rename", &target, &error))?;
        Ok(())
    }

    async fn download(&self, folder_ref: &str) -> Result<Option<Vec<u8>>, SyncError> {
        let path = self.bundle_path(folder_ref);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
            Err(error) => Err(io_error("read", &path, &error)),
        }
    }

    async fn list_locations(&self) -> Result<Vec<RemoteFolder>, SyncError> {
        let Some(root) = &self.root else {
            return Ok(Vec::new());
        };

        let mut entries = match tokio::fs::read_dir(root).await {
            Ok(entries) => entries,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(io_error("list", root, &error)),
        };

        let mut folders = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|error| io_error("list", root, &error))?
        {
            let is_dir = entry
                .file_type()
                .await
                .map(|file_type| file_type.is_dir())
                .unwrap_or(false);
            if !is_dir {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            folders.push(RemoteFolder {
                reference: entry.path().display().to_string(),
                name,
            });
        }
        folders.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(folders)
    }
}
