//! # Relationship Cache
//!
//! Two cooperating cache tiers in front of the link store, plus the pieces
//! they are built from:
//!
//! | Type | Module | Role |
//! |------|--------|------|
//! | `LookupCache` / `LruLookupCache` | here | Pluggable storage + eviction policy |
//! | `KeyLocks` | `locks` | Per-key reservation so one thread populates a key |
//! | `EntityLookupCache` | `lookup` | Lookup cache with caller-supplied miss loaders |
//! | `TombstoneSet` | `tombstone` | Recently deleted link ids, masked on every read |
//! | `RelationCache` | `relations` | Tier-1 (endpoint → types) and Tier-2 ((type, endpoint) → links) |

pub mod locks;
pub mod lookup;
pub mod relations;
pub mod tombstone;

use std::hash::{BuildHasher, Hash};
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use hashbrown::DefaultHashBuilder;
use lru::LruCache;
use parking_lot::Mutex;

use crate::config::CacheConfig;

pub use locks::{KeyGuard, KeyLocks};
pub use lookup::{EntityLookupCache, LockedEntry};
pub use relations::{RelationCache, RelationKey, TypeFilter};
pub use tombstone::TombstoneSet;

// ============================================================================
// LookupCache
// ============================================================================

/// Storage half of a lookup cache: plain get/put with some eviction policy.
///
/// Implementations must be internally synchronized. They never load
/// anything themselves; misses are handled by [`EntityLookupCache`].
pub trait LookupCache<K, V>: Send + Sync {
    fn get(&self, key: &K) -> Option<V>;
    fn put(&self, key: K, value: V);
    fn remove(&self, key: &K) -> Option<V>;
    fn clear(&self);
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// LruLookupCache
// ============================================================================

struct Slot<V> {
    value: V,
    touched: Instant,
}

/// Size-bounded LRU with optional idle expiry, split into independently
/// locked shards so unrelated keys rarely contend.
pub struct LruLookupCache<K: Hash + Eq, V> {
    shards: Vec<Mutex<LruCache<K, Slot<V>>>>,
    hasher: DefaultHashBuilder,
    max_idle: Option<Duration>,
}

impl<K: Hash + Eq, V: Clone> LruLookupCache<K, V> {
    pub fn new(shards: usize, capacity: usize, max_idle: Option<Duration>) -> Self {
        let shard_count = shards.max(1);
        let per_shard_cap =
            NonZeroUsize::new((capacity / shard_count).max(1)).unwrap_or(NonZeroUsize::MIN);
        let mut shard_vec = Vec::with_capacity(shard_count);
        for _ in 0..shard_count {
            shard_vec.push(Mutex::new(LruCache::new(per_shard_cap)));
        }
        Self { shards: shard_vec, hasher: DefaultHashBuilder::default(), max_idle }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.shards, config.max_entries, config.max_idle())
    }

    fn shard_for(&self, key: &K) -> &Mutex<LruCache<K, Slot<V>>> {
        let idx = (self.hasher.hash_one(key) as usize) % self.shards.len();
        &self.shards[idx]
    }
}

impl<K, V> LookupCache<K, V> for LruLookupCache<K, V>
where
    K: Hash + Eq + Send,
    V: Clone + Send,
{
    fn get(&self, key: &K) -> Option<V> {
        let mut guard = self.shard_for(key).lock();
        let slot = guard.get_mut(key)?;
        if !self.max_idle.is_some_and(|idle| slot.touched.elapsed() > idle) {
            slot.touched = Instant::now();
            return Some(slot.value.clone());
        }
        guard.pop(key);
        None
    }

    fn put(&self, key: K, value: V) {
        let mut guard = self.shard_for(&key).lock();
        guard.put(key, Slot { value, touched: Instant::now() });
    }

    fn remove(&self, key: &K) -> Option<V> {
        self.shard_for(key).lock().pop(key).map(|slot| slot.value)
    }

    fn clear(&self) {
        for shard in &self.shards {
            shard.lock().clear();
        }
    }

    fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().len()).sum()
    }
}
