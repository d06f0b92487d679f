//! Bundled baseline profile and the destructive restore that installs it.

use serde::Serialize;

use crate::error::SyncError;
use crate::notify::StateChange;
use crate::snapshot::{Snapshot, validate_document};
use crate::store::Store;

const BASELINE_JSON: &str = include_str!("../seed/baseline.json");

/// Whether the user agreed to overwrite everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Confirmed,
    Declined,
}

impl From<bool> for Confirmation {
    fn from(confirmed: bool) -> Self {
        if confirmed { Self::Confirmed } else { Self::Declined }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestoreReport {
    /// Keys that existed before the restore.
    pub removed: usize,
    /// Baseline records written.
    pub written: usize,
}

/// The bundled baseline snapshot.
///
/// # Errors
///
/// Returns [`SyncError::Validation`] if the bundled document is not a valid
/// snapshot for this build.
pub fn baseline() -> Result<Snapshot, SyncError> {
    Ok(validate_document(BASELINE_JSON.as_bytes())?)
}

/// Replace the whole store with the baseline.
///
/// Nothing is touched unless `confirmation` is [`Confirmation::Confirmed`].
///
/// # Errors
///
/// Returns [`SyncError::RestoreDeclined`] without confirmation,
/// [`SyncError::Lock`] if the store is busy, and
/// [`SyncError::StorageRead`]/[`SyncError::StorageWrite`] on storage failure.
/// A restore that fails midway still publishes [`StateChange::SeedRestored`]
/// so readers do not keep serving removed records.
pub fn restore_seed(store: &dyn Store, confirmation: Confirmation) -> Result<RestoreReport, SyncError> {
    if confirmation != Confirmation::Confirmed {
        tracing::info!("seed restore declined");
        return Err(SyncError::RestoreDeclined);
    }
    let seed = baseline()?;

    let guard = store.lock()?;
    let result = replace_all(store, &seed);
    drop(guard);

    match &result {
        Ok(report) => tracing::info!(
            removed = report.removed,
            written = report.written,
            "seed restore complete"
        ),
        Err(err) => tracing::warn!(error = %err, "seed restore stopped early"),
    }
    store.changes().publish(&StateChange::SeedRestored);
    result
}

fn replace_all(store: &dyn Store, seed: &Snapshot) -> Result<RestoreReport, SyncError> {
    let existing = store.keys().map_err(|source| SyncError::StorageRead {
        key: "*".to_string(),
        source,
    })?;

    let mut report = RestoreReport::default();
    for key in existing {
        store
            .remove(&key)
            .map_err(|source| SyncError::StorageWrite {
                key: key.clone(),
                source,
            })?;
        report.removed += 1;
    }

    for (key, value) in &seed.data {
        store
            .set(key, value.clone())
            .map_err(|source| SyncError::StorageWrite {
                key: key.clone(),
                source,
            })?;
        report.written += 1;
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[test]
    fn baseline_is_valid_and_fully_cataloged() {
        let seed = baseline().expect("bundled baseline");
        let catalog = Catalog::standard();
        assert!(!seed.data.is_empty());
        for (key, value) in &seed.data {
            let rule = catalog.rule_for(key).unwrap_or_else(|| panic!("{key} has no rule"));
            rule.check(value, crate::merge::Side::Incoming)
                .unwrap_or_else(|err| panic!("{key}: {err}"));
        }
    }

    #[test]
    fn declined_restore_changes_nothing() {
        let store = MemoryStore::with_records([("notes", json!("mine"))]);
        let before = store.dump();
        let err = restore_seed(&store, Confirmation::Declined).expect_err("declined");
        assert!(matches!(err, SyncError::RestoreDeclined));
        assert_eq!(store.dump(), before);
    }

    #[test]
    fn restore_replaces_everything_with_baseline() {
        let store = MemoryStore::with_records([
            ("notes", json!("a much longer note than the baseline has, surely")),
            ("themePreference", json!("dark")),
            ("practiceSeconds", json!(999_999)),
        ]);
        let report = restore_seed(&store, Confirmation::Confirmed).expect("restore");

        let seed = baseline().expect("baseline");
        assert_eq!(store.dump(), seed.data);
        assert_eq!(report.removed, 3);
        assert_eq!(report.written, seed.data.len());
    }

    #[test]
    fn restore_publishes_once() {
        let store = MemoryStore::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = store.subscribe(move |change| sink.lock().expect("lock").push(change.clone()));

        restore_seed(&store, Confirmation::Confirmed).expect("restore");
        assert_eq!(*seen.lock().expect("lock"), vec![StateChange::SeedRestored]);
    }

    #[test]
    fn confirmation_from_flag() {
        assert_eq!(Confirmation::from(true), Confirmation::Confirmed);
        assert_eq!(Confirmation::from(false), Confirmation::Declined);
    }
}
