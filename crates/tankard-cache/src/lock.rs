//! Per-key lock table.
//!
//! Every `(namespace, key)` pair being read or recomputed has an entry with
//! two locks:
//!
//! - `creation`: a mutex held for the whole recomputation, so at most one
//!   caller runs the create function for a key at a time.
//! - `access`: a reader/writer lock held only while the backend is read or
//!   written, so a recomputation blocks readers only for the final store.
//!
//! Entries are created on demand and reference counted. When the last
//! [`KeyHandle`] for a key is dropped the entry is removed, so a churning key
//! space does not grow the table without bound.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
struct KeyLock {
    creation: Mutex<()>,
    access: RwLock<()>,
}

type TableKey = (String, String);

/// Lock table shared by every cache on one physical storage.
#[derive(Debug, Default)]
pub struct LockTable {
    entries: Mutex<HashMap<TableKey, Arc<KeyLock>>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a reference to the entry for `key`, creating it if needed.
    pub fn handle(&self, namespace: &str, key: &str) -> KeyHandle<'_> {
        let table_key = (namespace.to_string(), key.to_string());
        let lock = {
            let mut entries = self.entries.lock();
            Arc::clone(entries.entry(table_key.clone()).or_default())
        };
        KeyHandle {
            table: self,
            key: table_key,
            lock,
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn release(&self, key: &TableKey, lock: &Arc<KeyLock>) {
        let mut entries = self.entries.lock();
        // One reference in the table plus the releasing handle's: nobody else holds or waits.
        if Arc::strong_count(lock) == 2 {
            entries.remove(key);
        }
    }
}

/// A counted reference to one key's locks. Guards borrow the handle, so they
/// are always released before the entry can be reclaimed.
#[derive(Debug)]
pub struct KeyHandle<'a> {
    table: &'a LockTable,
    key: TableKey,
    lock: Arc<KeyLock>,
}

impl KeyHandle<'_> {
    /// Acquire the creation lock, waiting at most `timeout` (forever if `None`).
    pub fn creation(&self, timeout: Option<Duration>) -> Option<MutexGuard<'_, ()>> {
        match timeout {
            Some(t) => self.lock.creation.try_lock_for(t),
            None => Some(self.lock.creation.lock()),
        }
    }

    /// Acquire the creation lock only if it is free.
    pub fn try_creation(&self) -> Option<MutexGuard<'_, ()>> {
        self.lock.creation.try_lock()
    }

    /// Shared access for reading the backend.
    pub fn read(&self) -> RwLockReadGuard<'_, ()> {
        self.lock.access.read()
    }

    /// Exclusive access for writing the backend.
    pub fn write(&self) -> RwLockWriteGuard<'_, ()> {
        self.lock.access.write()
    }
}

impl Drop for KeyHandle<'_> {
    fn drop(&mut self) {
        self.table.release(&self.key, &self.lock);
    }
}
