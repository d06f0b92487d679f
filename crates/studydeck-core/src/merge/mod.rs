//! Smart merge of an incoming snapshot into the store.
//!
//! # Merge Semantics
//!
//! Each record is merged on its own with the rule the [`Catalog`] assigns to
//! its key. A record that cannot be merged (unknown key, malformed value on
//! either side) is skipped and reported; the rest of the document still
//! merges. Records the merge would not change are never rewritten, so
//! importing a document into the store it was exported from touches nothing.
//!
//! Every per-record write is idempotent. A merge interrupted halfway can be
//! rerun with the same document and converges to the same store.

pub mod rules;

use serde::Serialize;

use crate::catalog::Catalog;
use crate::error::SyncError;
use crate::notify::StateChange;
use crate::snapshot::{Snapshot, validate_document};
use crate::store::{Store, StoreError};

pub use rules::{MergeRule, RecordError, Side};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// A record left as-is because it could not be merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRecord {
    pub key: String,
    pub reason: String,
}

/// Outcome of a completed merge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    /// Keys absent locally and taken from the incoming document.
    pub adopted: Vec<String>,
    /// Keys present on both sides whose value changed.
    pub merged: Vec<String>,
    /// Keys whose merged value equals the local one.
    pub unchanged: Vec<String>,
    pub skipped: Vec<SkippedRecord>,
}

impl MergeReport {
    /// Number of record types the merge actually changed.
    #[must_use]
    pub fn changed_count(&self) -> usize {
        self.adopted.len() + self.merged.len()
    }

    /// Changed keys, sorted.
    #[must_use]
    pub fn changed_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.adopted.iter().chain(&self.merged).cloned().collect();
        keys.sort();
        keys
    }

    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.changed_count() == 0
    }

    fn skip(&mut self, key: &str, error: &RecordError) {
        tracing::warn!(key, code = %error.code(), %error, "skipping record");
        self.skipped.push(SkippedRecord {
            key: key.to_string(),
            reason: error.to_string(),
        });
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Merge every record of `snapshot` into `store`.
///
/// Holds the store lock for the whole merge and publishes one
/// [`StateChange::Merged`] after the last write.
///
/// # Errors
///
/// Returns [`SyncError::Lock`] if the store is busy and
/// [`SyncError::StorageWrite`] if any write fails. A local record that
/// cannot be read is skipped like any other unmergeable record. In the write case the
/// records written before the failure stay written and are published, but
/// the merge is reported as failed.
pub fn merge_snapshot(
    store: &dyn Store,
    catalog: &Catalog,
    snapshot: &Snapshot,
) -> Result<MergeReport, SyncError> {
    let guard = store.lock()?;
    let mut report = MergeReport::default();

    for (key, incoming) in &snapshot.data {
        let Some(rule) = catalog.rule_for(key) else {
            report.skip(key, &RecordError::NoRule);
            continue;
        };

        let current = match store.get(key) {
            Ok(current) => current,
            Err(err) => {
                tracing::warn!(key, error = %err, "local record is unreadable, leaving it alone");
                let reason = match err {
                    StoreError::Corrupt { .. } => "local value is not valid JSON".to_string(),
                    other => format!("local value could not be read: {other}"),
                };
                report.skipped.push(SkippedRecord {
                    key: key.clone(),
                    reason,
                });
                continue;
            }
        };

        let merged = match rule.apply(current.as_ref(), incoming) {
            Ok(merged) => merged,
            Err(err) => {
                report.skip(key, &err);
                continue;
            }
        };

        if current.as_ref() == Some(&merged) {
            tracing::debug!(key, rule = rule.name(), "record unchanged");
            report.unchanged.push(key.clone());
            continue;
        }

        if let Err(source) = store.set(key, merged) {
            drop(guard);
            announce(store, &report);
            tracing::warn!(
                key,
                written = report.changed_count(),
                "merge stopped by a failed write"
            );
            return Err(SyncError::StorageWrite {
                key: key.clone(),
                source,
            });
        }

        tracing::debug!(key, rule = rule.name(), adopted = current.is_none(), "record merged");
        if current.is_none() {
            report.adopted.push(key.clone());
        } else {
            report.merged.push(key.clone());
        }
    }

    drop(guard);
    announce(store, &report);

    tracing::info!(
        changed = report.changed_count(),
        unchanged = report.unchanged.len(),
        skipped = report.skipped.len(),
        "merge complete"
    );
    Ok(report)
}

/// Validate raw document bytes, then merge them.
///
/// # Errors
///
/// Returns [`SyncError::Validation`] before touching the store if the
/// document is rejected, otherwise whatever [`merge_snapshot`] returns.
pub fn import_document(
    store: &dyn Store,
    catalog: &Catalog,
    raw: &[u8],
) -> Result<MergeReport, SyncError> {
    let snapshot = validate_document(raw)?;
    merge_snapshot(store, catalog, &snapshot)
}

fn announce(store: &dyn Store, report: &MergeReport) {
    if report.is_noop() {
        return;
    }
    store.changes().publish(&StateChange::Merged {
        keys: report.changed_keys(),
    });
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::SnapshotMeta;
    use crate::store::MemoryStore;
    use chrono::{TimeZone, Utc};
    use serde_json::{Value, json};
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    fn snapshot(records: Value) -> Snapshot {
        let created = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).single().expect("valid time");
        let data: BTreeMap<String, Value> = records
            .as_object()
            .expect("object")
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Snapshot {
            meta: SnapshotMeta::current("phone", created),
            data,
        }
    }

    fn recorder(store: &MemoryStore) -> (Arc<Mutex<Vec<StateChange>>>, crate::notify::Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let sub = store.subscribe(move |change| sink.lock().expect("lock").push(change.clone()));
        (seen, sub)
    }

    #[test]
    fn counters_take_the_max() {
        let store = MemoryStore::with_records([
            ("practiceSeconds", json!(500)),
            ("listeningSeconds", json!(200)),
        ]);
        let report = merge_snapshot(
            &store,
            &Catalog::standard(),
            &snapshot(json!({"practiceSeconds": 300, "listeningSeconds": 900})),
        )
        .expect("merge");

        assert_eq!(store.get("practiceSeconds").expect("get"), Some(json!(500)));
        assert_eq!(store.get("listeningSeconds").expect("get"), Some(json!(900)));
        assert_eq!(report.merged, vec!["listeningSeconds".to_string()]);
        assert_eq!(report.unchanged, vec!["practiceSeconds".to_string()]);
        assert_eq!(report.changed_count(), 1);
    }

    #[test]
    fn absent_records_are_adopted() {
        let store = MemoryStore::new();
        let report = merge_snapshot(
            &store,
            &Catalog::standard(),
            &snapshot(json!({"notes": "hola", "calendar": {"2024-06-01": true}})),
        )
        .expect("merge");

        assert_eq!(report.adopted.len(), 2);
        assert_eq!(store.get("notes").expect("get"), Some(json!("hola")));
    }

    #[test]
    fn malformed_record_is_skipped_and_the_rest_merges() {
        let store = MemoryStore::with_records([("practiceSeconds", json!(10))]);
        let report = merge_snapshot(
            &store,
            &Catalog::standard(),
            &snapshot(json!({"practiceSeconds": "lots", "notes": "kept"})),
        )
        .expect("merge");

        assert_eq!(store.get("practiceSeconds").expect("get"), Some(json!(10)));
        assert_eq!(store.get("notes").expect("get"), Some(json!("kept")));
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].key, "practiceSeconds");
    }

    #[test]
    fn malformed_local_record_is_left_untouched() {
        let store = MemoryStore::with_records([("calendar", json!(["not", "a", "map"]))]);
        let report = merge_snapshot(
            &store,
            &Catalog::standard(),
            &snapshot(json!({"calendar": {"2024-06-01": true}})),
        )
        .expect("merge");

        assert_eq!(store.get("calendar").expect("get"), Some(json!(["not", "a", "map"])));
        assert_eq!(report.skipped.len(), 1);
        assert!(report.is_noop());
    }

    #[test]
    fn unknown_keys_are_never_written() {
        let store = MemoryStore::new();
        let report = merge_snapshot(
            &store,
            &Catalog::standard(),
            &snapshot(json!({"themePreference": "dark"})),
        )
        .expect("merge");

        assert_eq!(store.get("themePreference").expect("get"), None);
        assert_eq!(report.skipped[0].reason, RecordError::NoRule.to_string());
    }

    #[test]
    fn merging_twice_equals_merging_once() {
        let store = MemoryStore::with_records([
            ("completedLessons", json!(["l1"])),
            ("chat.maria", json!([{"id": 1, "timestamp": 10}, {"id": 2, "timestamp": 20}])),
        ]);
        let incoming = snapshot(json!({
            "completedLessons": ["l2", "l1"],
            "chat.maria": [{"id": 2, "timestamp": 20}, {"id": 3, "timestamp": 15}],
        }));

        merge_snapshot(&store, &Catalog::standard(), &incoming).expect("first merge");
        let once = store.dump();
        let second = merge_snapshot(&store, &Catalog::standard(), &incoming).expect("second merge");

        assert_eq!(store.dump(), once);
        assert!(second.is_noop());
    }

    #[test]
    fn publishes_one_change_with_changed_keys() {
        let store = MemoryStore::with_records([("practiceSeconds", json!(100))]);
        let (seen, _sub) = recorder(&store);

        merge_snapshot(
            &store,
            &Catalog::standard(),
            &snapshot(json!({"practiceSeconds": 50, "readingSeconds": 30, "notes": "x"})),
        )
        .expect("merge");

        let seen = seen.lock().expect("lock");
        assert_eq!(
            *seen,
            vec![StateChange::Merged {
                keys: vec!["notes".to_string(), "readingSeconds".to_string()]
            }]
        );
    }

    #[test]
    fn noop_merge_publishes_nothing() {
        let store = MemoryStore::with_records([("notes", json!("same"))]);
        let (seen, _sub) = recorder(&store);
        merge_snapshot(&store, &Catalog::standard(), &snapshot(json!({"notes": "same"})))
            .expect("merge");
        assert!(seen.lock().expect("lock").is_empty());
    }

    #[test]
    fn failed_write_is_an_error_and_announces_earlier_writes() {
        let store = MemoryStore::new();
        store.fail_writes_for("notes");
        let (seen, _sub) = recorder(&store);

        let err = merge_snapshot(
            &store,
            &Catalog::standard(),
            &snapshot(json!({"calendar": {"2024-06-01": true}, "notes": "lost"})),
        )
        .expect_err("write must fail");

        assert!(matches!(err, SyncError::StorageWrite { ref key, .. } if key == "notes"));
        assert_eq!(store.get("calendar").expect("get"), Some(json!({"2024-06-01": true})));
        assert_eq!(
            *seen.lock().expect("lock"),
            vec![StateChange::Merged {
                keys: vec!["calendar".to_string()]
            }]
        );
    }

    #[test]
    fn unreadable_local_record_is_skipped_and_the_rest_merges() {
        let store = MemoryStore::new();
        store.fail_reads_for("chat.maria");
        let (seen, _sub) = recorder(&store);

        let report = merge_snapshot(
            &store,
            &Catalog::standard(),
            &snapshot(json!({
                "calendar": {"2024-06-01": true},
                "chat.maria": [{"id": 1, "timestamp": 1}],
                "practiceSeconds": 60,
            })),
        )
        .expect("merge");

        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].key, "chat.maria");
        assert!(report.skipped[0].reason.starts_with("local value could not be read"));
        assert_eq!(store.get("practiceSeconds").expect("get"), Some(json!(60)));
        assert_eq!(
            *seen.lock().expect("lock"),
            vec![StateChange::Merged {
                keys: vec!["calendar".to_string(), "practiceSeconds".to_string()]
            }]
        );
    }

    #[test]
    fn foreign_document_leaves_store_untouched() {
        let store = MemoryStore::with_records([("practiceSeconds", json!(5))]);
        let before = store.dump();
        let raw = serde_json::to_vec(&json!({
            "meta": {"app": "other-app", "version": 1, "timestamp": "2024-06-01T00:00:00Z"},
            "data": {"practiceSeconds": 9000},
        }))
        .expect("serialize");

        let err = import_document(&store, &Catalog::standard(), &raw).expect_err("foreign");
        assert_eq!(err.code(), crate::error::ErrorCode::ForeignDocument);
        assert_eq!(store.dump(), before);
    }
}
