//! # State store
//!
//! `StateStore` maps widget keys to payloads that must outlive a single
//! frame. It is a mark-and-sweep cache:
//!
//! - `invalidate` clears the mark on every entry at frame start.
//! - `get` / `set` during the build pass mark the entry again.
//! - `sweep` after the build pass removes every unmarked entry and calls
//!   `Disposable::dispose` on its payload exactly once.
//!
//! ```rust
//! use retain_core::*;
//!
//! let store = StateStore::new();
//! store.set("popup##state", StateCell::new(true));
//!
//! store.invalidate();
//! let open = store.get::<StateCell<bool>>("popup##state").unwrap();
//! assert_eq!(open.map(|s| s.get()), Some(true));
//! assert_eq!(store.sweep(), 0);
//!
//! store.invalidate();
//! assert_eq!(store.sweep(), 1);
//! assert!(store.is_empty());
//! ```
//!
//! The map is guarded by a read/write lock and the marks are atomics, so
//! background tasks may look entries up while the build thread revalidates
//! them. Payloads that are mutated from background tasks bring their own
//! synchronization.

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use crate::effects::Disposable;
use crate::error::StateError;

struct StateEntry {
    valid: AtomicBool,
    type_id: TypeId,
    type_name: &'static str,
    value: Arc<dyn Any + Send + Sync>,
    payload: Arc<dyn Disposable>,
}

impl StateEntry {
    fn new<T: Disposable>(payload: Arc<T>) -> Self {
        Self {
            valid: AtomicBool::new(true),
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            value: payload.clone(),
            payload,
        }
    }

    fn downcast<T: Disposable>(&self, key: &str) -> Result<Arc<T>, StateError> {
        if self.type_id != TypeId::of::<T>() {
            let err = StateError::TypeMismatch {
                key: key.to_owned(),
                stored: self.type_name,
                requested: type_name::<T>(),
            };
            log::error!("{err}");
            return Err(err);
        }
        self.value
            .clone()
            .downcast::<T>()
            .map_err(|_| StateError::TypeMismatch {
                key: key.to_owned(),
                stored: self.type_name,
                requested: type_name::<T>(),
            })
    }
}

#[derive(Default)]
pub struct StateStore {
    entries: RwLock<HashMap<String, StateEntry>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears the mark on every entry. Runs once at frame start.
    pub fn invalidate(&self) {
        for entry in self.entries.read().values() {
            entry.valid.store(false, Ordering::Release);
        }
    }

    /// Looks up `key` and marks it as used this frame.
    ///
    /// Fails with [`StateError::TypeMismatch`] when the entry holds a
    /// different payload type.
    pub fn get<T: Disposable>(&self, key: &str) -> Result<Option<Arc<T>>, StateError> {
        let entries = self.entries.read();
        let Some(entry) = entries.get(key) else {
            return Ok(None);
        };
        let payload = entry.downcast::<T>(key)?;
        entry.valid.store(true, Ordering::Release);
        log::trace!("state '{key}' revalidated");
        Ok(Some(payload))
    }

    /// Inserts or overwrites `key` and returns the stored handle.
    ///
    /// An overwritten payload is dropped without `dispose`; use
    /// [`StateStore::set_shared`] to get it back for explicit teardown.
    pub fn set<T: Disposable>(&self, key: impl Into<String>, payload: T) -> Arc<T> {
        let payload = Arc::new(payload);
        let key = key.into();
        if self.set_shared(key.clone(), payload.clone()).is_some() {
            log::debug!("state '{key}' overwritten without dispose");
        }
        payload
    }

    /// Inserts or overwrites `key` with a shared payload, returning the
    /// previous payload (not disposed).
    pub fn set_shared<T: Disposable>(
        &self,
        key: impl Into<String>,
        payload: Arc<T>,
    ) -> Option<Arc<dyn Disposable>> {
        self.entries
            .write()
            .insert(key.into(), StateEntry::new(payload))
            .map(|old| old.payload)
    }

    /// Returns the entry for `key`, creating it with `init` if missing.
    ///
    /// `init` runs without the store lock held, so it may use the store
    /// itself. If another thread inserts the key in the meantime, that entry
    /// wins and the freshly built value is dropped.
    pub fn get_or_insert_with<T: Disposable>(
        &self,
        key: &str,
        init: impl FnOnce() -> T,
    ) -> Result<Arc<T>, StateError> {
        if let Some(existing) = self.get::<T>(key)? {
            return Ok(existing);
        }
        let fresh = Arc::new(init());
        let mut entries = self.entries.write();
        let entry = entries
            .entry(key.to_owned())
            .or_insert_with(|| StateEntry::new(fresh));
        entry.valid.store(true, Ordering::Release);
        entry.downcast::<T>(key)
    }

    /// Removes every unmarked entry and disposes its payload.
    ///
    /// Payloads are disposed after the lock is released, in no particular
    /// order. Returns the number of swept entries.
    pub fn sweep(&self) -> usize {
        let mut dead: Vec<(String, Arc<dyn Disposable>)> = Vec::new();
        self.entries.write().retain(|key, entry| {
            if entry.valid.load(Ordering::Acquire) {
                true
            } else {
                dead.push((key.clone(), entry.payload.clone()));
                false
            }
        });

        let swept = dead.len();
        for (key, payload) in dead {
            log::trace!("state '{key}' swept");
            payload.dispose();
        }
        swept
    }

    /// Removes and disposes every entry.
    pub fn clear(&self) -> usize {
        let dead: Vec<(String, StateEntry)> = self.entries.write().drain().collect();
        let cleared = dead.len();
        for (key, entry) in dead {
            log::trace!("state '{key}' cleared");
            entry.payload.dispose();
        }
        cleared
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Snapshot of the current keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.read().keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("keys", &self.keys())
            .finish()
    }
}
