//! Recently deleted link ids.
//!
//! Between a delete and the next refresh of a cache entry (or while the
//! store itself still returns a deleted row) readers may see links that no
//! longer exist. Every id is recorded here on delete and filtered out of
//! every read. The set is bounded; the oldest id is forgotten first.

use std::collections::VecDeque;

use hashbrown::HashSet;
use parking_lot::Mutex;

use crate::model::{LinkId, LinkReference};

/// Bounded FIFO set of deleted link ids. All access goes through one lock
/// and every critical section is O(1) or O(batch).
pub struct TombstoneSet {
    capacity: usize,
    inner: Mutex<Ring>,
}

#[derive(Default)]
struct Ring {
    order: VecDeque<LinkId>,
    members: HashSet<LinkId>,
}

impl TombstoneSet {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            inner: Mutex::new(Ring {
                order: VecDeque::with_capacity(capacity),
                members: HashSet::with_capacity(capacity),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Record a deleted id. Re-adding a known id keeps its original position.
    pub fn add(&self, id: LinkId) {
        let mut ring = self.inner.lock();
        if !ring.members.insert(id) {
            return;
        }
        ring.order.push_back(id);
        if ring.order.len() > self.capacity {
            if let Some(oldest) = ring.order.pop_front() {
                ring.members.remove(&oldest);
            }
        }
    }

    pub fn contains(&self, id: LinkId) -> bool {
        self.inner.lock().members.contains(&id)
    }

    /// True unless the link's id is tombstoned. Unpersisted links are live.
    pub fn is_live(&self, link: &LinkReference) -> bool {
        link.id.is_none_or(|id| !self.contains(id))
    }

    /// Drop tombstoned links from `links` under a single lock acquisition.
    /// Returns how many were dropped.
    pub fn retain_live(&self, links: &mut Vec<LinkReference>) -> usize {
        if links.is_empty() {
            return 0;
        }
        let before = links.len();
        let ring = self.inner.lock();
        links.retain(|link| link.id.is_none_or(|id| !ring.members.contains(&id)));
        before - links.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut ring = self.inner.lock();
        ring.order.clear();
        ring.members.clear();
    }
}
