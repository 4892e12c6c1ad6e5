use chrono::{DateTime, Utc};
use larder_core::{LocationId, Record, Slot, StorageLocation};
use serde::Serialize;

use crate::error::CliError;

const SHORT_ID_LEN: usize = 13;

#[derive(Debug, Serialize)]
pub struct LocationListItem {
    pub id: String,
    pub name: String,
    pub backend: String,
    pub slot: String,
    pub folder: String,
    pub badge: &'static str,
    pub is_active: bool,
    pub last_verified: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct RecordListItem {
    pub uuid: String,
    pub title: String,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
    pub relative_time: String,
}

pub fn location_to_list_item(location: &StorageLocation) -> LocationListItem {
    LocationListItem {
        id: location.id.to_string(),
        name: location.name.clone(),
        backend: location.backend_id.key().to_string(),
        slot: slot_label(location).to_string(),
        folder: location.folder_ref.clone(),
        badge: location.badge(),
        is_active: location.is_active,
        last_verified: location.last_verified,
    }
}

pub fn format_location_lines(locations: &[StorageLocation]) -> Vec<String> {
    let now = Utc::now();
    locations
        .iter()
        .map(|location| {
            let marker = if location.is_active { '*' } else { ' ' };
            let verified = location
                .last_verified
                .map_or_else(|| "never".to_string(), |at| format_relative_time(at, now));
            format!(
                "{marker} {:<13}  {:<20}  {:<21}  {:<7}  [{}]  verified {verified}",
                short_id(&location.id),
                truncate(&location.name, 20),
                location.backend_id.display_name(),
                slot_label(location),
                location.badge(),
            )
        })
        .collect()
}

const fn slot_label(location: &StorageLocation) -> &'static str {
    match location.slot {
        Slot::Private => "private",
        Slot::Shared => "shared",
    }
}

pub fn record_to_list_item(record: &Record) -> RecordListItem {
    RecordListItem {
        uuid: record.uuid.to_string(),
        title: record_title(record, 80),
        version: record.version,
        updated_at: record.updated_at,
        relative_time: format_relative_time(record.updated_at, Utc::now()),
    }
}

pub fn format_record_lines(records: &[Record]) -> Vec<String> {
    let now = Utc::now();
    records
        .iter()
        .map(|record| {
            let uuid = record.uuid.to_string();
            let short = uuid.chars().take(SHORT_ID_LEN).collect::<String>();
            format!(
                "{short:<13}  {:<40}  v{:<4}  {}",
                record_title(record, 40),
                record.version,
                format_relative_time(record.updated_at, now)
            )
        })
        .collect()
}

pub fn record_title(record: &Record, max_chars: usize) -> String {
    let title = record
        .text("title")
        .or_else(|| record.text("name"))
        .unwrap_or("(untitled)");
    truncate(&title.split_whitespace().collect::<Vec<_>>().join(" "), max_chars)
}

pub fn truncate(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        value.to_string()
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = value.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

pub fn format_relative_time(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let diff = now.signed_duration_since(at).num_milliseconds().max(0);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}

pub fn short_id(id: &LocationId) -> String {
    id.to_string().chars().take(SHORT_ID_LEN).collect()
}

pub fn normalize_title(parts: &[String]) -> Result<String, CliError> {
    let joined = parts.join(" ");
    let trimmed = joined.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyTitle)
    } else {
        Ok(trimmed.to_string())
    }
}

/// Find a location by full id, exact name, or unique id prefix.
pub fn resolve_location<'a>(
    locations: &'a [StorageLocation],
    query: &str,
) -> Result<&'a StorageLocation, CliError> {
    let query = query.trim();
    if query.is_empty() {
        return Err(CliError::EmptyLocationId);
    }

    if let Ok(id) = query.parse::<LocationId>() {
        if let Some(location) = locations.iter().find(|location| location.id == id) {
            return Ok(location);
        }
    }

    let by_name = locations
        .iter()
        .filter(|location| location.name.eq_ignore_ascii_case(query))
        .collect::<Vec<_>>();
    if let [location] = by_name.as_slice() {
        return Ok(*location);
    }

    let lowered = query.to_ascii_lowercase();
    let by_prefix = locations
        .iter()
        .filter(|location| location.id.to_string().starts_with(&lowered))
        .collect::<Vec<_>>();

    match by_prefix.as_slice() {
        [] if by_name.is_empty() => Err(CliError::LocationNotFound(query.to_string())),
        [location] => Ok(*location),
        _ => {
            let candidates = if by_prefix.is_empty() { &by_name } else { &by_prefix };
            let options = candidates
                .iter()
                .take(3)
                .map(|location| short_id(&location.id))
                .collect::<Vec<_>>()
                .join(", ");
            Err(CliError::AmbiguousLocation(format!(
                "Location '{query}' is ambiguous; matches: {options}"
            )))
        }
    }
}
