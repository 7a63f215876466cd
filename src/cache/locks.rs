//! Per-key reservation locks.
//!
//! A thread about to populate a cache key takes the key's lock first; other
//! threads asking for the same key block on it and then find the value
//! already cached. Keys map to their own mutex, so populating one endpoint
//! never blocks readers of another.

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};

/// Map from key to the mutex reserving it. Entries exist only while some
/// thread holds or waits for the key.
pub struct KeyLocks<K: Eq + Hash> {
    active: DashMap<K, Arc<Mutex<()>>>,
}

impl<K: Eq + Hash + Clone> Default for KeyLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone> KeyLocks<K> {
    pub fn new() -> Self {
        Self { active: DashMap::new() }
    }

    /// Block until `key` is reserved for the caller.
    pub fn lock(&self, key: &K) -> KeyGuard<'_, K> {
        // clone the Arc out so the map shard is released before blocking
        let mutex = Arc::clone(
            self.active
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        let guard = mutex.lock_arc();
        KeyGuard { locks: self, key: key.clone(), guard: Some(guard) }
    }

    /// Number of keys currently reserved or waited on.
    pub fn active(&self) -> usize {
        self.active.len()
    }
}

/// Reservation of one key; released on drop.
pub struct KeyGuard<'a, K: Eq + Hash> {
    locks: &'a KeyLocks<K>,
    key: K,
    guard: Option<ArcMutexGuard<RawMutex, ()>>,
}

impl<K: Eq + Hash> KeyGuard<'_, K> {
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K: Eq + Hash> Drop for KeyGuard<'_, K> {
    fn drop(&mut self) {
        // unlock and drop our Arc before checking whether anyone else still uses the entry
        drop(self.guard.take());
        self.locks.active.remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

impl<K: Eq + Hash + fmt::Debug> fmt::Debug for KeyGuard<'_, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyGuard").field("key", &self.key).finish()
    }
}
