//! Larder CLI - sync the catalog through cloud storage you own
//!
//! Manual push/pull, location management, and a foreground automatic mode.

mod cli;
mod commands;
mod context;
mod error;


use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands, LocationCommands, RecordCommands};
use crate::commands::{locations, records, sync};
use crate::context::{App, AppPaths};
use crate::error::CliError;

const DEFAULT_LOG_FILTER: &str = "larder_core=info,larder_cli=info";

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let cli = Cli::parse();
    let paths = AppPaths::resolve(cli.config_dir, cli.db_path)?;
    let mut app = App::open(paths).await?;

    match cli.command {
        Commands::Push { json } => sync::run_push(&app, json).await?,
        Commands::Pull { json } => sync::run_pull(&app, json).await?,
        Commands::Status { json } => sync::run_status(&app, json).await?,
        Commands::Mode { mode } => sync::run_mode(&mut app, mode)?,
        Commands::Off => sync::run_off(&app).await?,
        Commands::Watch { interval } => sync::run_watch(&app, interval).await?,
        Commands::Locations { command } => match command {
            LocationCommands::List { json } => locations::run_list(&app, json).await?,
            LocationCommands::Add {
                backend,
                folder,
                name,
                slot,
                no_activate,
            } => {
                locations::run_add(&app, backend, &folder, name.as_deref(), slot, no_activate)
                    .await?;
            }
            LocationCommands::Activate { id } => locations::run_activate(&app, &id).await?,
            LocationCommands::Remove { id } => locations::run_remove(&app, &id).await?,
            LocationCommands::Browse { backend, json } => {
                locations::run_browse(&app, backend, json).await?;
            }
        },
        Commands::Records { command } => match command {
            RecordCommands::List {
                domain,
                limit,
                json,
            } => records::run_list(&app, domain, limit, json).await?,
            RecordCommands::Add { domain, title } => records::run_add(&app, domain, &title).await?,
        },
    }

    Ok(())
}
