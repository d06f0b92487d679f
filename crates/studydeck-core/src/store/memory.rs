use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use super::{Store, StoreError};
use crate::notify::ChangeFeed;

/// In-memory store, used by tests and as a scratch target.
///
/// Writes for keys registered with [`MemoryStore::fail_writes_for`] are
/// rejected, which simulates a quota-exceeded backend. Reads for keys
/// registered with [`MemoryStore::fail_reads_for`] fail with an I/O error.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<String, Value>>,
    failing: Mutex<BTreeSet<String>>,
    unreadable: Mutex<BTreeSet<String>>,
    feed: ChangeFeed,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-populated with `records`.
    #[must_use]
    pub fn with_records<I, K>(records: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let store = Self::new();
        {
            let mut map = store.records.lock().unwrap_or_else(PoisonError::into_inner);
            map.extend(records.into_iter().map(|(k, v)| (k.into(), v)));
        }
        store
    }

    /// Make every later write to `key` fail.
    pub fn fail_writes_for(&self, key: &str) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string());
    }

    /// Make every later read of `key` fail.
    pub fn fail_reads_for(&self, key: &str) {
        self.unreadable
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string());
    }

    /// Copy of every record, for whole-store comparisons in tests.
    #[must_use]
    pub fn dump(&self) -> BTreeMap<String, Value> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        if self
            .unreadable
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
        {
            return Err(StoreError::Io {
                path: PathBuf::from(key),
                source: io::Error::other("simulated read failure"),
            });
        }
        Ok(self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        if self
            .failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
        {
            return Err(StoreError::WriteRejected {
                key: key.to_string(),
                reason: "storage quota exceeded".to_string(),
            });
        }
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect())
    }

    fn changes(&self) -> &ChangeFeed {
        &self.feed
    }
}
