//! Syncable record model

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// A domain collection that takes part in sync.
///
/// The serialized key is the stable bundle key and must never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Domain {
    #[serde(rename = "recipes")]
    Recipes,
    #[serde(rename = "pizzas")]
    Pizzas,
    #[serde(rename = "sandwiches")]
    Sandwiches,
    #[serde(rename = "cellar")]
    CellarEntries,
}

impl Domain {
    /// Every known domain, in bundle order.
    pub const ALL: [Self; 4] = [
        Self::Recipes,
        Self::Pizzas,
        Self::Sandwiches,
        Self::CellarEntries,
    ];

    /// Stable key used in the bundle document and the local store.
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Recipes => "recipes",
            Self::Pizzas => "pizzas",
            Self::Sandwiches => "sandwiches",
            Self::CellarEntries => "cellar",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Domain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|domain| domain.key() == s.trim())
            .ok_or_else(|| format!("unknown domain '{s}'"))
    }
}

/// Provenance of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RecordSource {
    /// Created by the user on one of their devices
    #[default]
    Personal,
    /// Imported from a file, URL, or scan
    Imported,
    /// Shipped or shared as curated content
    Curated,
}

/// One syncable domain entity.
///
/// Only `uuid`, `version`, `updated_at`, and `source` matter to sync; every other
/// field is carried through untouched in `fields`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Stable sync identity, assigned once at creation
    pub uuid: Uuid,
    /// Bumped on every meaningful local mutation
    #[serde(default)]
    pub version: u64,
    /// Wall-clock time of the last mutation, only used as a tie-breaker
    #[serde(default = "unix_epoch", deserialize_with = "lenient_timestamp")]
    pub updated_at: DateTime<Utc>,
    /// Provenance tag
    #[serde(default)]
    pub source: RecordSource,
    /// Domain-specific payload
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record {
    /// Create a brand new record at version 1 with a fresh UUID v7.
    #[must_use]
    pub fn new(fields: Map<String, Value>) -> Self {
        Self {
            uuid: Uuid::now_v7(),
            version: 1,
            updated_at: Utc::now(),
            source: RecordSource::Personal,
            fields,
        }
    }

    /// Set the provenance tag
    #[must_use]
    pub const fn with_source(mut self, source: RecordSource) -> Self {
        self.source = source;
        self
    }

    /// Record a local mutation: bump the version and stamp the time.
    pub fn touch(&mut self) {
        self.version = self.version.saturating_add(1);
        self.updated_at = Utc::now();
    }

    /// Convenience accessor for a string field (e.g. `title`).
    #[must_use]
    pub fn text(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }
}

fn unix_epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

/// Accept RFC 3339 strings and epoch milliseconds; older bundles wrote the latter.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(raw)) => DateTime::parse_from_rfc3339(raw.trim())
            .map(|parsed| parsed.with_timezone(&Utc))
            .unwrap_or_else(|_| unix_epoch()),
        Some(Value::Number(number)) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|ms| ms as i64))
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or_else(unix_epoch),
        _ => unix_epoch(),
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn domain_keys_roundtrip_through_from_str() {
        for domain in Domain::ALL {
            assert_eq!(domain.key().parse::<Domain>().unwrap(), domain);
        }
        assert!("cocktails".parse::<Domain>().is_err());
    }

    #[test]
    fn domain_serializes_as_stable_key() {
        assert_eq!(
            serde_json::to_string(&Domain::CellarEntries).unwrap(),
            "\"cellar\""
        );
    }

    #[test]
    fn new_record_starts_at_version_one() {
        let record = Record::new(Map::new());
        assert_eq!(record.version, 1);
        assert_eq!(record.source, RecordSource::Personal);
    }

    #[test]
    fn touch_bumps_version_and_timestamp() {
        let mut record = Record::new(Map::new());
        record.updated_at = unix_epoch();
        record.touch();
        assert_eq!(record.version, 2);
        assert!(record.updated_at > unix_epoch());
    }

    #[test]
    fn record_keeps_domain_fields_flat() {
        let raw = json!({
            "uuid": "0190f5c2-7a4e-7cc0-9d1e-3f7a1b2c3d4e",
            "version": 3,
            "updatedAt": "2024-05-01T10:00:00Z",
            "source": "imported",
            "title": "Focaccia",
            "servings": 8
        });

        let record: Record = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(record.version, 3);
        assert_eq!(record.source, RecordSource::Imported);
        assert_eq!(record.text("title"), Some("Focaccia"));
        assert_eq!(serde_json::to_value(&record).unwrap(), raw);
    }

    #[test]
    fn older_record_shape_gets_defaults() {
        let record: Record = serde_json::from_value(json!({
            "uuid": "0190f5c2-7a4e-7cc0-9d1e-3f7a1b2c3d4e",
            "title": "Old"
        }))
        .unwrap();

        assert_eq!(record.version, 0);
        assert_eq!(record.updated_at, unix_epoch());
        assert_eq!(record.source, RecordSource::Personal);
    }

    #[test]
    fn epoch_millisecond_timestamps_are_accepted() {
        let record: Record = serde_json::from_value(json!({
            "uuid": "0190f5c2-7a4e-7cc0-9d1e-3f7a1b2c3d4e",
            "updatedAt": 1_714_557_600_000_i64
        }))
        .unwrap();

        assert_eq!(record.updated_at.to_rfc3339(), "2024-05-01T10:00:00+00:00");
    }
}
