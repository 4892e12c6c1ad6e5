//! Small helpers shared by config parsing, backends, and the registry.

use std::path::Path;

use serde::Serialize;

use crate::error::{Error, Result};

/// Trimmed text, or `None` for missing and blank values.
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    let value = value?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Whether `value` is an absolute http(s) URL.
pub fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// Validate an API base URL and strip its trailing slash.
pub fn normalize_base_url(raw: &str, field: &str) -> Result<String> {
    let value = raw.trim();
    if !is_http_url(value) {
        return Err(Error::InvalidInput(format!(
            "{field} must start with http:// or https://"
        )));
    }
    Ok(value.trim_end_matches('/').to_string())
}

/// Trim a remote error body down to something fit for a log line.
pub fn compact_text(value: &str) -> String {
    value.trim().chars().take(180).collect()
}

/// Serialize `value` as pretty JSON and replace `path` atomically.
///
/// The document is written to a sibling temp file first, so readers never
/// observe a half-written file.
pub fn write_json_atomically(path: &Path, value: &impl Serialize) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let serialized = serde_json::to_string_pretty(value)?;
    let temp_path = path.with_extension("json.tmp");
    std::fs::write(&temp_path, serialized)?;
    std::fs::rename(&temp_path, path)?;
    Ok(())
}
