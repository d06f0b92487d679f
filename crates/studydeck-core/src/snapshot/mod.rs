//! Portable snapshot documents.
//!
//! A snapshot is an immutable, point-in-time copy of the store:
//!
//! ```json
//! {
//!   "meta": {"app": "studydeck", "version": 1,
//!            "timestamp": "2024-05-01T09:30:00Z", "deviceName": "laptop"},
//!   "data": {"practiceSeconds": 5400, "notes": "..."}
//! }
//! ```

pub mod export;
pub mod validate;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::SyncError;

pub use export::{export_snapshot, write_snapshot_file};
pub use validate::{ValidationError, validate_document};

/// Identifier every studydeck snapshot carries in `meta.app`.
pub const APP_ID: &str = "studydeck";

/// Schema version written by this build.
pub const SCHEMA_VERSION: u32 = 1;

/// Schema versions the merge engine knows how to interpret.
pub const SUPPORTED_SCHEMA_VERSIONS: &[u32] = &[1];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    #[serde(rename = "app")]
    pub app_id: String,
    #[serde(rename = "version")]
    pub schema_version: u32,
    #[serde(rename = "timestamp")]
    pub created_at: DateTime<Utc>,
    /// Informational only.
    #[serde(rename = "deviceName", default)]
    pub device_label: String,
}

impl SnapshotMeta {
    /// Metadata for a snapshot taken now by this build.
    #[must_use]
    pub fn current(device_label: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            app_id: APP_ID.to_string(),
            schema_version: SCHEMA_VERSION,
            created_at,
            device_label: device_label.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub meta: SnapshotMeta,
    /// Record key → value. Absent records are omitted, never `null`.
    pub data: BTreeMap<String, Value>,
}

impl Snapshot {
    /// Serialize as pretty-printed UTF-8 JSON.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Serialization`] if serialization fails.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, SyncError> {
        let mut bytes = serde_json::to_vec_pretty(self).map_err(SyncError::Serialization)?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    #[must_use]
    pub fn record(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }
}

/// File name offered when saving an export made on `date`.
#[must_use]
pub fn suggested_filename(date: NaiveDate) -> String {
    format!("{APP_ID}-backup-{}.json", date.format("%Y-%m-%d"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn meta_uses_wire_field_names() {
        let created = Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).single().expect("valid time");
        let meta = SnapshotMeta::current("laptop", created);
        let value = serde_json::to_value(&meta).expect("serialize");
        assert_eq!(
            value,
            json!({
                "app": "studydeck",
                "version": 1,
                "timestamp": "2024-05-01T09:30:00Z",
                "deviceName": "laptop",
            })
        );
    }

    #[test]
    fn filename_embeds_export_date() {
        let date = NaiveDate::from_ymd_opt(2024, 2, 9).expect("valid date");
        assert_eq!(suggested_filename(date), "studydeck-backup-2024-02-09.json");
    }

    #[test]
    fn serialized_document_ends_with_newline() {
        let created = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).single().expect("valid time");
        let snapshot = Snapshot {
            meta: SnapshotMeta::current("", created),
            data: BTreeMap::from([("notes".to_string(), json!("hola"))]),
        };
        let bytes = snapshot.to_json_bytes().expect("serialize");
        assert_eq!(bytes.last(), Some(&b'\n'));
        let back: Snapshot = serde_json::from_slice(&bytes).expect("parse back");
        assert_eq!(back, snapshot);
    }
}
