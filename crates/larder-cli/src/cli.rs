use std::path::PathBuf;

use clap::{Parser, Subcommand};
use larder_core::{BackendId, Domain, Slot, SyncMode};

#[derive(Parser)]
#[command(name = "larder")]
#[command(about = "Sync your Larder catalog through your own cloud storage")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Directory holding sync.json and locations.json
    #[arg(long, global = true, value_name = "DIR")]
    pub config_dir: Option<PathBuf>,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Upload a snapshot of the local catalog to the active location
    Push {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Merge the bundle at the active location into the local catalog
    Pull {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show sync mode, active location, and location badges
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show or set the sync mode
    Mode {
        /// manual or automatic; prints the current mode when omitted
        mode: Option<SyncMode>,
    },
    /// Turn sync off by deactivating every location
    Off,
    /// Run automatic sync until interrupted
    Watch {
        /// Seconds between background pulls
        #[arg(long, default_value = "300", value_name = "SECS")]
        interval: u64,
    },
    /// Manage storage locations
    #[command(alias = "loc")]
    Locations {
        #[command(subcommand)]
        command: LocationCommands,
    },
    /// Inspect and add local records
    Records {
        #[command(subcommand)]
        command: RecordCommands,
    },
}

#[derive(Subcommand)]
pub enum LocationCommands {
    /// List storage locations with their badges
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Connect a backend folder and make it the active location
    #[command(alias = "connect")]
    Add {
        /// Backend: gdrive, onedrive, s3, local
        backend: BackendId,
        /// Folder reference on the backend (folder id, path, or bucket prefix)
        folder: String,
        /// Display name
        #[arg(long)]
        name: Option<String>,
        /// Slot: private or shared
        #[arg(long, default_value = "private")]
        slot: Slot,
        /// Register without connecting or activating
        #[arg(long)]
        no_activate: bool,
    },
    /// Make a location the single active one
    Activate {
        /// Location ID, unique ID prefix, or name
        id: String,
    },
    /// Forget a location (remote data is left untouched)
    #[command(alias = "rm")]
    Remove {
        /// Location ID, unique ID prefix, or name
        id: String,
    },
    /// List candidate folders on a backend
    Browse {
        /// Backend: gdrive, onedrive, s3, local
        backend: BackendId,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum RecordCommands {
    /// List records of one domain
    List {
        /// Domain: recipes, pizzas, sandwiches, cellar
        domain: Domain,
        /// Number of records to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add a record with a title
    #[command(alias = "new")]
    Add {
        /// Domain: recipes, pizzas, sandwiches, cellar
        domain: Domain,
        /// Record title
        title: Vec<String>,
    },
}
