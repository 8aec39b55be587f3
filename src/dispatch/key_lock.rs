//! Per-key mutual exclusion registry.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Registry holding one async mutex per key.
///
/// Entries are created on demand and reference counted: a key's entry is
/// removed as soon as no task holds or awaits its mutex, so the registry
/// never grows with historical keys. Used by the dispatch engine to
/// guarantee at most one in-flight delivery attempt per notification id.
pub struct KeyedLock<K: Eq + Hash + Clone> {
    entries: StdMutex<HashMap<K, LockEntry>>,
}

struct LockEntry {
    lock: Arc<AsyncMutex<()>>,
    refs: usize,
}

/// Holds a key's mutex until dropped.
pub struct KeyedGuard<'a, K: Eq + Hash + Clone> {
    // field order matters: the mutex guard must release before the
    // checkout drops the registry entry's reference
    _guard: OwnedMutexGuard<()>,
    _checkout: Checkout<'a, K>,
}

/// Registry reference held while a task holds or awaits a key's mutex.
struct Checkout<'a, K: Eq + Hash + Clone> {
    owner: &'a KeyedLock<K>,
    key: K,
}

impl<K: Eq + Hash + Clone> Drop for Checkout<'_, K> {
    fn drop(&mut self) {
        self.owner.release(&self.key);
    }
}

impl<K: Eq + Hash + Clone> KeyedLock<K> {
    pub fn new() -> Self {
        Self {
            entries: StdMutex::new(HashMap::new()),
        }
    }

    /// Acquire the key's mutex, waiting if another task holds it.
    pub async fn lock(&self, key: K) -> KeyedGuard<'_, K> {
        let lock = self.checkout(&key);
        let checkout = Checkout { owner: self, key };
        // if this await is cancelled the checkout drop releases the entry
        let guard = lock.lock_owned().await;
        KeyedGuard {
            _guard: guard,
            _checkout: checkout,
        }
    }

    /// Acquire the key's mutex only if it is free. Returns `None` when
    /// another task holds it.
    pub fn try_lock(&self, key: K) -> Option<KeyedGuard<'_, K>> {
        let lock = self.checkout(&key);
        let checkout = Checkout { owner: self, key };
        match lock.try_lock_owned() {
            Ok(guard) => Some(KeyedGuard {
                _guard: guard,
                _checkout: checkout,
            }),
            Err(_) => None,
        }
    }

    fn checkout(&self, key: &K) -> Arc<AsyncMutex<()>> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.entry(key.clone()).or_insert_with(|| LockEntry {
            lock: Arc::new(AsyncMutex::new(())),
            refs: 0,
        });
        entry.refs += 1;
        Arc::clone(&entry.lock)
    }

    fn release(&self, key: &K) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(key) {
            entry.refs -= 1;
            if entry.refs == 0 {
                entries.remove(key);
            }
        }
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedLock<K> {
    fn default() -> Self {
        Self::new()
    }
}
