use larder_core::exclusivity::ActivationReport;
use larder_core::{BackendId, Slot, StorageLocation};

use crate::commands::common::{
    format_location_lines, location_to_list_item, resolve_location, short_id, LocationListItem,
};
use crate::context::App;
use crate::error::CliError;

pub async fn run_list(app: &App, as_json: bool) -> Result<(), CliError> {
    let locations = app.locations().locations().await;

    if as_json {
        let json_items = locations
            .iter()
            .map(location_to_list_item)
            .collect::<Vec<LocationListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else if locations.is_empty() {
        println!("No storage locations. Add one with `larder locations add <backend> <folder>`.");
    } else {
        for line in format_location_lines(&locations) {
            println!("{line}");
        }
    }

    Ok(())
}

pub async fn run_add(
    app: &App,
    backend: BackendId,
    folder: &str,
    name: Option<&str>,
    slot: Slot,
    no_activate: bool,
) -> Result<(), CliError> {
    let folder = folder.trim();
    if folder.is_empty() {
        return Err(CliError::Config("Folder reference cannot be empty".to_string()));
    }
    let name = name
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map_or_else(|| default_location_name(folder), str::to_string);

    if no_activate {
        let location = StorageLocation::new(name, backend, slot, folder);
        let id = app.locations().add_location(location).await?;
        println!("{id}");
        return Ok(());
    }

    let (location, report) = app
        .locations()
        .connect_location(backend, &name, slot, folder)
        .await?;
    print_disconnect_warnings(&report);
    println!(
        "Connected '{}' on {} [{}]",
        location.name,
        backend.display_name(),
        location.badge()
    );
    println!("{}", location.id);
    Ok(())
}

pub async fn run_activate(app: &App, query: &str) -> Result<(), CliError> {
    let locations = app.locations().locations().await;
    let location = resolve_location(&locations, query)?;

    let report = app.locations().activate(&location.id).await?;
    print_disconnect_warnings(&report);
    println!("Active location: {} ({})", location.name, short_id(&location.id));
    Ok(())
}

pub async fn run_remove(app: &App, query: &str) -> Result<(), CliError> {
    let locations = app.locations().locations().await;
    let location = resolve_location(&locations, query)?;

    let removed = app.locations().remove_location(&location.id).await?;
    println!("Removed {} ({})", removed.name, short_id(&removed.id));
    if removed.is_active {
        println!("Sync is off");
    }
    Ok(())
}

pub async fn run_browse(app: &App, backend: BackendId, as_json: bool) -> Result<(), CliError> {
    let folders = app.locations().browse(backend).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&folders)?);
    } else if folders.is_empty() {
        println!("No folders found on {}", backend.display_name());
    } else {
        for folder in &folders {
            println!("{:<30}  {}", folder.name, folder.reference);
        }
    }
    Ok(())
}

/// Last non-empty path segment of a folder reference.
pub fn default_location_name(folder: &str) -> String {
    folder
        .rsplit(|c: char| c == '/' || c == '\\')
        .find(|segment| !segment.trim().is_empty())
        .unwrap_or(folder)
        .trim()
        .to_string()
}

fn print_disconnect_warnings(report: &ActivationReport) {
    for failure in &report.disconnect_failures {
        eprintln!(
            "Warning: could not disconnect {}: {}",
            failure.backend, failure.message
        );
    }
}
