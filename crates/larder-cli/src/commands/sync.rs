use std::sync::Arc;
use std::time::Duration;

use larder_core::sync::SkipReason;
use larder_core::{AutoSync, LifecycleEvent, PullResult, PushResult, SyncMode};

use crate::commands::common::{format_location_lines, location_to_list_item, LocationListItem};
use crate::context::App;
use crate::error::CliError;

pub async fn run_push(app: &App, as_json: bool) -> Result<(), CliError> {
    let result = app.orchestrator.push().await;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        for line in format_push_lines(&result) {
            println!("{line}");
        }
    }

    // Manual failures are always surfaced.
    match result.error {
        Some(error) => Err(error.into()),
        None => Ok(()),
    }
}

pub async fn run_pull(app: &App, as_json: bool) -> Result<(), CliError> {
    let result = app.orchestrator.pull().await;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        for line in format_pull_lines(&result) {
            println!("{line}");
        }
    }

    match result.total.error {
        Some(error) => Err(error.into()),
        None => Ok(()),
    }
}

pub async fn run_status(app: &App, as_json: bool) -> Result<(), CliError> {
    let status = app.orchestrator.status().await;
    let locations = app.locations().locations().await;

    if as_json {
        let items = locations
            .iter()
            .map(location_to_list_item)
            .collect::<Vec<LocationListItem>>();
        let payload = serde_json::json!({
            "state": status.state,
            "mode": status.mode,
            "active_location": status.active_location.as_ref().map(location_to_list_item),
            "locations": items,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    println!("Mode:    {}", status.mode);
    match &status.active_location {
        Some(location) => println!(
            "Active:  {} ({}, {})",
            location.name,
            location.backend_id,
            location.badge()
        ),
        None => println!("Active:  none (sync is off)"),
    }
    if !locations.is_empty() {
        println!();
        for line in format_location_lines(&locations) {
            println!("{line}");
        }
    }
    Ok(())
}

pub fn run_mode(app: &mut App, mode: Option<SyncMode>) -> Result<(), CliError> {
    match mode {
        None => println!("{}", app.orchestrator.mode()),
        Some(mode) => {
            app.set_mode(mode)?;
            println!("Sync mode set to {mode}");
        }
    }
    Ok(())
}

pub async fn run_off(app: &App) -> Result<(), CliError> {
    let report = app.locations().deactivate_all().await?;

    for failure in &report.disconnect_failures {
        eprintln!(
            "Warning: could not disconnect {}: {}",
            failure.backend, failure.message
        );
    }
    if report.deactivated.is_empty() {
        println!("Sync was already off");
    } else {
        println!("Sync is off");
    }
    Ok(())
}

/// Automatic sync for the lifetime of the process, regardless of the stored
/// mode. Pulls on start and every `interval_secs`; pushes follow each pull.
pub async fn run_watch(app: &App, interval_secs: u64) -> Result<(), CliError> {
    let Some(location) = app.locations().active_location().await else {
        return Err(CliError::SyncOff);
    };

    app.orchestrator.set_mode(SyncMode::Automatic);
    let auto = AutoSync::start(Arc::clone(&app.orchestrator), app.config.debounce());
    auto.notify(LifecycleEvent::Launched).await;

    println!(
        "Watching '{}' ({}). Press Ctrl-C to stop.",
        location.name, location.backend_id
    );

    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    // The first tick fires immediately and the launch sync already covers it.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !auto.notify(LifecycleEvent::Foregrounded).await {
                    break;
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
        }
    }

    auto.shutdown().await;
    println!("Stopped watching");
    Ok(())
}

pub fn format_push_lines(result: &PushResult) -> Vec<String> {
    match (result.skipped, &result.error) {
        (Some(reason), _) => vec![skip_message(reason, "pushed")],
        (None, Some(error)) => vec![format!("Push failed: {error}")],
        (None, None) => vec![format!(
            "Pushed {} records ({} bytes)",
            result.record_count, result.bytes
        )],
    }
}

pub fn format_pull_lines(result: &PullResult) -> Vec<String> {
    if let Some(reason) = result.skipped {
        return vec![skip_message(reason, "pulled")];
    }

    let mut lines = result
        .domains
        .iter()
        .map(|(domain, merge)| {
            format!(
                "{:<11} {} added, {} updated, {} unchanged",
                domain.key(),
                merge.added,
                merge.updated,
                merge.unchanged
            )
        })
        .collect::<Vec<_>>();
    for (domain, skipped) in &result.skipped_records {
        lines.push(format!("{:<11} {skipped} undecodable records skipped", domain.key()));
    }

    match &result.total.error {
        Some(error) => lines.push(format!("Pull failed: {error}")),
        None if result.domains.is_empty() => lines.push("Nothing to pull yet".to_string()),
        None => lines.push(format!(
            "Pulled: {} added, {} updated, {} unchanged",
            result.total.added, result.total.updated, result.total.unchanged
        )),
    }
    lines
}

fn skip_message(reason: SkipReason, verb: &str) -> String {
    match reason {
        SkipReason::NoActiveLocation => format!("Sync is off; nothing {verb}"),
        SkipReason::AlreadyInFlight => format!("Already in progress; nothing {verb}"),
    }
}
