//! Lookup cache with store-backed miss handling.

use std::hash::Hash;

use super::{KeyGuard, KeyLocks, LookupCache};
use crate::Result;

/// A [`LookupCache`] paired with per-key reservation.
///
/// Loaders are supplied per call, so one cache type serves any tier: the
/// caller decides how a missing key is fetched. While a loader runs, its key
/// is reserved; concurrent callers for the same key wait and reuse the
/// result. A failed load leaves the key unpopulated.
pub struct EntityLookupCache<K: Eq + Hash, V> {
    name: &'static str,
    cache: Box<dyn LookupCache<K, V>>,
    locks: KeyLocks<K>,
}

impl<K, V> EntityLookupCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(name: &'static str, cache: Box<dyn LookupCache<K, V>>) -> Self {
        Self { name, cache, locks: KeyLocks::new() }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Cached value only; never loads.
    pub fn get(&self, key: &K) -> Option<V> {
        self.cache.get(key)
    }

    /// Cached value, or the loader's result stored under `key`.
    pub fn get_or_load<F>(&self, key: &K, loader: F) -> Result<V>
    where
        F: FnOnce(&K) -> Result<V>,
    {
        if let Some(value) = self.cache.get(key) {
            return Ok(value);
        }
        let entry = self.entry(key);
        // someone may have populated the key while we waited
        if let Some(value) = entry.get() {
            return Ok(value);
        }
        let value = loader(key)?;
        entry.put(value.clone());
        Ok(value)
    }

    /// Reserve `key` and operate on its slot.
    pub fn entry(&self, key: &K) -> LockedEntry<'_, K, V> {
        LockedEntry { guard: self.locks.lock(key), cache: self.cache.as_ref() }
    }

    pub fn put(&self, key: K, value: V) {
        self.entry(&key).put(value);
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.entry(key).remove()
    }

    pub fn clear(&self) {
        self.cache.clear();
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

/// A reserved cache slot. The key stays reserved until this is dropped.
pub struct LockedEntry<'a, K: Eq + Hash, V> {
    guard: KeyGuard<'a, K>,
    cache: &'a dyn LookupCache<K, V>,
}

impl<K: Eq + Hash + Clone, V> LockedEntry<'_, K, V> {
    pub fn key(&self) -> &K {
        self.guard.key()
    }

    pub fn get(&self) -> Option<V> {
        self.cache.get(self.guard.key())
    }

    pub fn put(&self, value: V) {
        self.cache.put(self.guard.key().clone(), value);
    }

    pub fn remove(&self) -> Option<V> {
        self.cache.remove(self.guard.key())
    }
}
