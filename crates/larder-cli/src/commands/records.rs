use larder_core::store::LocalStore;
use larder_core::{Domain, Record};
use serde_json::{Map, Value};

use crate::commands::common::{format_record_lines, normalize_title, record_to_list_item, RecordListItem};
use crate::commands::sync::format_push_lines;
use crate::context::App;
use crate::error::CliError;

pub async fn run_list(app: &App, domain: Domain, limit: usize, as_json: bool) -> Result<(), CliError> {
    let records = recent_records(app, domain, limit).await?;

    if as_json {
        let json_items = records
            .iter()
            .map(record_to_list_item)
            .collect::<Vec<RecordListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else if records.is_empty() {
        println!("No {domain} yet");
    } else {
        for line in format_record_lines(&records) {
            println!("{line}");
        }
    }

    Ok(())
}

/// Save a new record. In automatic mode the change is pushed right away,
/// since the process exits before any debounce would fire.
pub async fn run_add(app: &App, domain: Domain, title_parts: &[String]) -> Result<(), CliError> {
    let title = normalize_title(title_parts)?;
    let mut fields = Map::new();
    fields.insert("title".to_string(), Value::String(title));
    let record = Record::new(fields);
    let uuid = record.uuid;

    app.store.save(domain, record).await?;
    println!("{uuid}");

    if app.orchestrator.mode().is_automatic() {
        let result = app.orchestrator.push().await;
        for line in format_push_lines(&result) {
            eprintln!("{line}");
        }
    }
    Ok(())
}

pub async fn recent_records(app: &App, domain: Domain, limit: usize) -> Result<Vec<Record>, CliError> {
    let mut records = app.store.get_all(domain).await?;
    records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.uuid.cmp(&b.uuid)));
    records.truncate(limit);
    Ok(records)
}
