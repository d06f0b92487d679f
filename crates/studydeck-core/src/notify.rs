//! Store-changed notifications.
//!
//! Merge and seed restore mutate many records out of band. Instead of
//! reloading the whole application, they publish a single [`StateChange`]
//! once the store is durable, and readers drop whatever they cached.

use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use crate::store::{Store, StoreError};

/// What changed in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateChange {
    /// An import merged these keys.
    Merged { keys: Vec<String> },
    /// Every record was replaced by the bundled baseline.
    SeedRestored,
    /// A single record was written through [`crate::store::write_record`].
    RecordWritten { key: String },
}

impl StateChange {
    /// Returns `true` if a reader of `key` must re-read it.
    #[must_use]
    pub fn touches(&self, key: &str) -> bool {
        match self {
            Self::Merged { keys } => keys.iter().any(|k| k == key),
            Self::SeedRestored => true,
            Self::RecordWritten { key: written } => written == key,
        }
    }
}

type Listener = Arc<dyn Fn(&StateChange) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    by_id: BTreeMap<u64, Listener>,
}

/// Broadcast point for [`StateChange`] events.
#[derive(Default)]
pub struct ChangeFeed {
    listeners: Arc<Mutex<Listeners>>,
}

impl std::fmt::Debug for ChangeFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeFeed")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl ChangeFeed {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener`. It stays registered until the returned
    /// [`Subscription`] is dropped.
    pub fn subscribe(&self, listener: impl Fn(&StateChange) + Send + Sync + 'static) -> Subscription {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.by_id.insert(id, Arc::new(listener));
        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    /// Deliver `change` to every listener, in subscription order.
    ///
    /// Listeners run outside the registry lock, so they may subscribe or
    /// unsubscribe without deadlocking.
    pub fn publish(&self, change: &StateChange) {
        let snapshot: Vec<Listener> = {
            let listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
            listeners.by_id.values().cloned().collect()
        };
        tracing::debug!(?change, listeners = snapshot.len(), "publishing state change");
        for listener in snapshot {
            listener(change);
        }
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .by_id
            .len()
    }
}

/// Handle for a registered listener. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    listeners: Weak<Mutex<Listeners>>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .by_id
                .remove(&self.id);
        }
    }
}

/// Reader-side cache that forgets values as soon as the store reports a
/// change touching them.
#[derive(Debug)]
pub struct RecordCache {
    values: Arc<Mutex<HashMap<String, Option<Value>>>>,
    _subscription: Subscription,
}

impl RecordCache {
    #[must_use]
    pub fn new(store: &dyn Store) -> Self {
        let values: Arc<Mutex<HashMap<String, Option<Value>>>> = Arc::default();
        let weak = Arc::downgrade(&values);
        let subscription = store.changes().subscribe(move |change| {
            let Some(values) = weak.upgrade() else {
                return;
            };
            let mut values = values.lock().unwrap_or_else(PoisonError::into_inner);
            if matches!(change, StateChange::SeedRestored) {
                values.clear();
            } else {
                values.retain(|key, _| !change.touches(key));
            }
        });
        Self {
            values,
            _subscription: subscription,
        }
    }

    /// Return the cached value for `key`, reading through on a miss.
    ///
    /// # Errors
    ///
    /// Propagates the store's read error on a miss.
    pub fn get(&self, store: &dyn Store, key: &str) -> Result<Option<Value>, StoreError> {
        if let Some(cached) = self
            .values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
        {
            return Ok(cached.clone());
        }
        let value = store.get(key)?;
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.clone());
        Ok(value)
    }

    #[must_use]
    pub fn cached_len(&self) -> usize {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
