//! Persisted key-value store of named records.
//!
//! Every record is an independent JSON value addressed by a string key.
//! There is no transaction spanning several keys: a crash between two
//! [`Store::set`] calls leaves the earlier write in place. Callers that
//! write many records (merge, seed restore) keep each write idempotent so a
//! rerun converges.

pub mod file;
pub mod memory;

use serde_json::Value;
use std::io;
use std::path::PathBuf;

use crate::lock::{LockError, StoreLock};
use crate::notify::{ChangeFeed, StateChange, Subscription};

pub use file::FileStore;
pub use memory::MemoryStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("record `{key}` does not contain valid JSON: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("record file for `{key}` holds `{found}` instead")]
    KeyCollision { key: String, found: String },

    #[error("write rejected for `{key}`: {reason}")]
    WriteRejected { key: String, reason: String },
}

/// Synchronous record storage shared by every reader and writer.
///
/// Implementations guard their own state, so a `&dyn Store` can be handed
/// to any component that needs it.
pub trait Store: Send + Sync {
    /// Read a record. Absent keys return `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be read or the stored
    /// bytes are not JSON.
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Overwrite the record for `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the write did not become durable.
    fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;

    /// Delete a record. Removing an absent key is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage rejects the delete.
    fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// All stored keys, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the key listing cannot be read.
    fn keys(&self) -> Result<Vec<String>, StoreError>;

    /// Change feed that multi-record operations publish to once they finish.
    fn changes(&self) -> &ChangeFeed;

    /// Take the cross-process lock, if this store has one.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is held elsewhere past its timeout.
    fn lock(&self) -> Result<Option<StoreLock>, LockError> {
        Ok(None)
    }

    /// Register a listener for [`StateChange`] notifications.
    fn subscribe(&self, listener: impl Fn(&StateChange) + Send + Sync + 'static) -> Subscription
    where
        Self: Sized,
    {
        self.changes().subscribe(listener)
    }
}

/// Write one record and tell readers about it.
///
/// # Errors
///
/// Returns the store's write error; nothing is published in that case.
pub fn write_record(store: &dyn Store, key: &str, value: Value) -> Result<(), StoreError> {
    store.set(key, value)?;
    store.changes().publish(&StateChange::RecordWritten {
        key: key.to_string(),
    });
    Ok(())
}
