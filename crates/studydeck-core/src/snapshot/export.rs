use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::Path;

use super::{Snapshot, SnapshotMeta};
use crate::catalog::Catalog;
use crate::error::SyncError;
use crate::store::{Store, StoreError};

/// Read every record in `store` into a new snapshot.
///
/// Keys without a catalog entry are exported verbatim too; import will skip
/// them, but the backup should not silently lose them.
///
/// # Errors
///
/// Returns [`SyncError::Unrepresentable`] if a record cannot be read back as
/// JSON, or [`SyncError::StorageRead`] if the store itself fails.
pub fn export_snapshot(
    store: &dyn Store,
    catalog: &Catalog,
    device_label: &str,
    now: DateTime<Utc>,
) -> Result<Snapshot, SyncError> {
    let keys = store.keys().map_err(|source| SyncError::StorageRead {
        key: "*".to_string(),
        source,
    })?;

    let mut data = BTreeMap::new();
    let mut unknown = 0_usize;
    for key in keys {
        let value = match store.get(&key) {
            Ok(Some(value)) => value,
            Ok(None) => continue,
            Err(source @ StoreError::Corrupt { .. }) => {
                return Err(SyncError::Unrepresentable { key, source });
            }
            Err(source) => return Err(SyncError::StorageRead { key, source }),
        };
        if !catalog.is_known(&key) {
            unknown += 1;
        }
        data.insert(key, value);
    }

    tracing::info!(
        records = data.len(),
        unknown,
        device = device_label,
        "exported snapshot"
    );

    Ok(Snapshot {
        meta: SnapshotMeta::current(device_label, now),
        data,
    })
}

/// Write `snapshot` to `path` atomically: either the complete document
/// lands at `path` or nothing does.
///
/// # Errors
///
/// Returns [`SyncError::ExportWrite`] on any filesystem failure.
pub fn write_snapshot_file(snapshot: &Snapshot, path: &Path) -> Result<(), SyncError> {
    let bytes = snapshot.to_json_bytes()?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let io_err = |source| SyncError::ExportWrite {
        path: path.to_path_buf(),
        source,
    };

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
    tmp.write_all(&bytes).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|err| io_err(err.error))?;
    Ok(())
}
