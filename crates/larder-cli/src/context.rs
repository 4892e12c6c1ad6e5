//! Resolved paths and the wired-up sync engine for one CLI invocation.

use std::env;
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;

use larder_core::backend::{BackendSet, EnvTokenProvider};
use larder_core::config::{S3Config, SyncConfig, CONFIG_FILE_NAME};
use larder_core::registry::REGISTRY_FILE_NAME;
use larder_core::store::LibSqlStore;
use larder_core::{ExclusivityManager, StorageLocationRegistry, SyncMode, SyncOrchestrator};

use crate::error::CliError;

pub const ENV_HOME: &str = "LARDER_HOME";
pub const ENV_DB_PATH: &str = "LARDER_DB_PATH";
const APP_DIR_NAME: &str = "larder";
const DATABASE_FILE_NAME: &str = "larder.db";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    pub config_dir: PathBuf,
    pub database: PathBuf,
}

impl AppPaths {
    pub fn resolve(config_dir: Option<PathBuf>, db_path: Option<PathBuf>) -> Result<Self, CliError> {
        Self::resolve_with(config_dir, db_path, |key| env::var_os(key))
    }

    /// Flags win over environment variables, which win over platform defaults.
    /// An explicit config directory also hosts the database unless one is given.
    pub fn resolve_with(
        config_dir: Option<PathBuf>,
        db_path: Option<PathBuf>,
        lookup: impl Fn(&str) -> Option<OsString>,
    ) -> Result<Self, CliError> {
        let explicit_home = config_dir.or_else(|| lookup(ENV_HOME).map(PathBuf::from));
        let explicit_db = db_path.or_else(|| lookup(ENV_DB_PATH).map(PathBuf::from));

        let config_dir = match &explicit_home {
            Some(dir) => dir.clone(),
            None => platform_dir(dirs::config_dir(), "config")?,
        };
        let database = match (explicit_db, explicit_home) {
            (Some(path), _) => path,
            (None, Some(home)) => home.join(DATABASE_FILE_NAME),
            (None, None) => platform_dir(dirs::data_dir(), "data")?.join(DATABASE_FILE_NAME),
        };

        Ok(Self {
            config_dir,
            database,
        })
    }

    pub fn sync_config(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE_NAME)
    }

    pub fn registry(&self) -> PathBuf {
        self.config_dir.join(REGISTRY_FILE_NAME)
    }
}

fn platform_dir(base: Option<PathBuf>, kind: &str) -> Result<PathBuf, CliError> {
    base.map(|dir| dir.join(APP_DIR_NAME))
        .ok_or_else(|| CliError::Config(format!("Failed to resolve {kind} directory")))
}

pub struct App {
    pub paths: AppPaths,
    pub config: SyncConfig,
    pub store: Arc<LibSqlStore>,
    pub orchestrator: Arc<SyncOrchestrator>,
}

impl App {
    pub async fn open(paths: AppPaths) -> Result<Self, CliError> {
        let mut config = SyncConfig::load_from_path(&paths.sync_config())?;
        config.apply_env_overrides()?;

        let registry = StorageLocationRegistry::load_from_path(paths.registry())?;
        let backends = BackendSet::from_config(
            &config,
            Arc::new(EnvTokenProvider::from_env()),
            S3Config::from_env()?,
        )?;
        let locations = Arc::new(ExclusivityManager::new(
            registry,
            backends,
            config.network_timeout(),
        ));

        let store = Arc::new(LibSqlStore::open(&paths.database).await?);
        let orchestrator = Arc::new(SyncOrchestrator::new(store.clone(), locations, &config));
        tracing::debug!(
            "Opened Larder at {} (database {})",
            paths.config_dir.display(),
            paths.database.display()
        );

        Ok(Self {
            paths,
            config,
            store,
            orchestrator,
        })
    }

    pub fn locations(&self) -> &ExclusivityManager {
        self.orchestrator.locations()
    }

    /// Persist a new sync mode. Environment overrides are not written back.
    pub fn set_mode(&mut self, mode: SyncMode) -> Result<(), CliError> {
        let path = self.paths.sync_config();
        let mut stored = SyncConfig::load_from_path(&path)?;
        stored.mode = mode;
        stored.save_to_path(&path)?;

        self.config.mode = mode;
        self.orchestrator.set_mode(mode);
        Ok(())
    }
}
