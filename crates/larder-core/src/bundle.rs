//! Bundle codec: the single JSON document stored at a remote location.
//!
//! ```json
//! {
//!   "schemaVersion": 1,
//!   "exportedAt": "2024-05-01T10:00:00Z",
//!   "domains": {
//!     "recipes": { "count": 2, "records": [ ... ] }
//!   }
//! }
//! ```
//!
//! Domains this build does not know are kept as raw JSON and written back
//! unchanged. Records that cannot be keyed are skipped, never fatal.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SyncError;
use crate::models::{Domain, Record};

/// Schema version written by this build.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Canonical object name of the bundle inside a storage location.
pub const DEFAULT_BUNDLE_FILE_NAME: &str = "larder-bundle.json";

/// Immutable snapshot of every synced domain.
#[derive(Debug, Clone, PartialEq)]
pub struct Bundle {
    pub schema_version: u32,
    pub exported_at: DateTime<Utc>,
    pub domains: BTreeMap<Domain, Vec<Record>>,
    /// Domains written by a newer client, carried through verbatim
    pub opaque_domains: BTreeMap<String, Value>,
}

/// A decoded bundle plus what had to be dropped to read it.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedBundle {
    pub bundle: Bundle,
    /// Records that could not be decoded, per domain
    pub skipped_records: BTreeMap<Domain, usize>,
}

impl Bundle {
    /// Build a fresh snapshot stamped with the current schema version and time.
    #[must_use]
    pub fn snapshot(
        domains: BTreeMap<Domain, Vec<Record>>,
        opaque_domains: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            exported_at: Utc::now(),
            domains,
            opaque_domains,
        }
    }

    /// Records of one domain (empty when the bundle has none).
    #[must_use]
    pub fn records(&self, domain: Domain) -> &[Record] {
        self.domains.get(&domain).map_or(&[], Vec::as_slice)
    }

    /// Total number of known-domain records.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.domains.values().map(Vec::len).sum()
    }

    /// Per-domain record counts, as written into the document.
    #[must_use]
    pub fn domain_counts(&self) -> BTreeMap<Domain, usize> {
        self.domains
            .iter()
            .map(|(domain, records)| (*domain, records.len()))
            .collect()
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireBundle {
    schema_version: u32,
    exported_at: DateTime<Utc>,
    #[serde(default)]
    domains: BTreeMap<String, Value>,
}

#[derive(Debug, Serialize)]
struct WireDomainOut<'a> {
    count: usize,
    records: &'a [Record],
}

#[derive(Debug, Deserialize)]
struct WireDomainIn {
    #[serde(default)]
    count: Option<usize>,
    #[serde(default)]
    records: Vec<Value>,
}

/// Serialize a bundle into its wire form.
pub fn encode(bundle: &Bundle) -> Result<Vec<u8>, SyncError> {
    let mut domains = bundle.opaque_domains.clone();
    for (domain, records) in &bundle.domains {
        let payload = WireDomainOut {
            count: records.len(),
            records,
        };
        let value = serde_json::to_value(payload).map_err(format_error)?;
        domains.insert(domain.key().to_string(), value);
    }

    let wire = WireBundle {
        schema_version: bundle.schema_version,
        exported_at: bundle.exported_at,
        domains,
    };
    serde_json::to_vec_pretty(&wire).map_err(format_error)
}

/// Parse a bundle, rejecting documents from a newer schema.
pub fn decode(bytes: &[u8]) -> Result<DecodedBundle, SyncError> {
    let wire = decode_wire(bytes)?;
    if wire.schema_version > CURRENT_SCHEMA_VERSION {
        return Err(SyncError::Format(format!(
            "bundle schemaVersion {} is newer than supported version {CURRENT_SCHEMA_VERSION}; update the app",
            wire.schema_version
        )));
    }

    let mut domains = BTreeMap::new();
    let mut opaque_domains = BTreeMap::new();
    let mut skipped_records = BTreeMap::new();

    for (key, value) in wire.domains {
        let Ok(domain) = key.parse::<Domain>() else {
            tracing::debug!("Preserving unknown bundle domain '{key}'");
            opaque_domains.insert(key, value);
            continue;
        };

        let payload: WireDomainIn = serde_json::from_value(value).map_err(|error| {
            SyncError::Format(format!("domain '{key}' is malformed: {error}"))
        })?;

        let (records, skipped) = decode_records(domain, payload.records);
        if let Some(count) = payload.count {
            if count != records.len() + skipped {
                tracing::warn!(
                    "Bundle domain '{key}' declares {count} records but contains {}",
                    records.len() + skipped
                );
            }
        }
        if skipped > 0 {
            skipped_records.insert(domain, skipped);
        }
        domains.insert(domain, records);
    }

    Ok(DecodedBundle {
        bundle: Bundle {
            schema_version: wire.schema_version,
            exported_at: wire.exported_at,
            domains,
            opaque_domains,
        },
        skipped_records,
    })
}

/// Read only the envelope and the domains this build cannot interpret.
///
/// Used before a push to carry unknown domains forward and to detect a newer
/// remote schema without decoding every record.
pub fn peek_opaque(bytes: &[u8]) -> Result<(u32, BTreeMap<String, Value>), SyncError> {
    let wire = decode_wire(bytes)?;
    let opaque = wire
        .domains
        .into_iter()
        .filter(|(key, _)| key.parse::<Domain>().is_err())
        .collect();
    Ok((wire.schema_version, opaque))
}

fn decode_wire(bytes: &[u8]) -> Result<WireBundle, SyncError> {
    serde_json::from_slice(bytes).map_err(format_error)
}

fn decode_records(domain: Domain, raw: Vec<Value>) -> (Vec<Record>, usize) {
    let mut records = Vec::with_capacity(raw.len());
    let mut skipped = 0;

    for value in raw {
        match serde_json::from_value::<Record>(value) {
            Ok(record) => records.push(record),
            Err(error) => {
                skipped += 1;
                tracing::warn!("Skipping undecodable {domain} record: {error}");
            }
        }
    }

    (records, skipped)
}

fn format_error(error: serde_json::Error) -> SyncError {
    SyncError::Format(error.to_string())
}
