//! In-memory collaborators.
//!
//! `MemoryBackend` is the reference implementation of `LinkStore` and
//! `PropertyStore`. It uses simple HashMaps protected by RwLock.
//!
//! ## Test hooks
//!
//! - **Query counting**: `find_calls()` reports how many `find_links` calls
//!   reached the store, so cache hits and stampede protection are observable.
//! - **Deletion lag**: `with_delete_lag()` keeps deleted rows visible to
//!   `find_links` (but not `find_link`), like a replica that has not caught up.
//! - **Latency**: `with_latency()` sleeps inside every `find_links` call.
//! - **Failure injection**: `fail_queries(true)` makes `find_links` return
//!   `Error::Storage`.
//!
//! `MemoryInstances` resolves references from registered instances and
//! serves object fields per definition id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use parking_lot::RwLock;

use crate::model::*;
use crate::{Error, Result};
use super::{DefinitionProvider, EntityResolver, LinkQuery, LinkStore, ObjectField, PropertyStore};

// ============================================================================
// MemoryBackend
// ============================================================================

/// In-memory link rows and link properties.
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    links: RwLock<HashMap<LinkId, LinkReference>>,
    properties: RwLock<HashMap<LinkId, PropertyMap>>,
    /// Deleted rows still served by `find_links` while deletion lag is on.
    lagging: RwLock<HashMap<LinkId, LinkReference>>,
    next_link_id: AtomicU64,
    find_calls: AtomicUsize,
    failing: AtomicBool,
    delete_lag: bool,
    latency: Option<Duration>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::build(false, None)
    }

    /// Deleted rows keep being returned by `find_links`.
    pub fn with_delete_lag() -> Self {
        Self::build(true, None)
    }

    /// Every `find_links` call sleeps for `latency` first.
    pub fn with_latency(latency: Duration) -> Self {
        Self::build(false, Some(latency))
    }

    fn build(delete_lag: bool, latency: Option<Duration>) -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                links: RwLock::new(HashMap::new()),
                properties: RwLock::new(HashMap::new()),
                lagging: RwLock::new(HashMap::new()),
                next_link_id: AtomicU64::new(1),
                find_calls: AtomicUsize::new(0),
                failing: AtomicBool::new(false),
                delete_lag,
                latency,
            }),
        }
    }

    /// Number of `find_links` calls served so far.
    pub fn find_calls(&self) -> usize {
        self.inner.find_calls.load(Ordering::SeqCst)
    }

    /// Make `find_links` fail until switched off again.
    pub fn fail_queries(&self, failing: bool) {
        self.inner.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of live (non-deleted) rows.
    pub fn link_count(&self) -> usize {
        self.inner.links.read().len()
    }

    /// Stored properties of a row, if any were saved.
    pub fn stored_properties(&self, id: LinkId) -> Option<PropertyMap> {
        self.inner.properties.read().get(&id).cloned()
    }
}

impl LinkStore for MemoryBackend {
    fn find_links(&self, query: &LinkQuery) -> Result<Vec<LinkReference>> {
        self.inner.find_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.inner.latency {
            std::thread::sleep(latency);
        }
        if self.inner.failing.load(Ordering::SeqCst) {
            return Err(Error::Storage("link store unavailable".into()));
        }
        if query.is_unbounded() {
            return Err(Error::Storage("link query needs a source or a target".into()));
        }

        let links = self.inner.links.read();
        let lagging = self.inner.lagging.read();
        let mut result: Vec<LinkReference> = links
            .values()
            .chain(lagging.values())
            .filter(|link| query.matches(link))
            .cloned()
            .collect();
        result.sort_by_key(|link| link.id);
        Ok(result)
    }

    fn find_link(&self, id: LinkId) -> Result<Option<LinkReference>> {
        Ok(self.inner.links.read().get(&id).cloned())
    }

    fn persist(&self, mut link: LinkReference) -> Result<LinkReference> {
        let id = match link.id {
            Some(id) => id,
            None => LinkId(self.inner.next_link_id.fetch_add(1, Ordering::Relaxed)),
        };
        link.id = Some(id);

        // rows are stored without properties; those live in the property map
        let mut row = link.clone();
        row.properties = PropertyMap::new();
        self.inner.links.write().insert(id, row);
        Ok(link)
    }

    fn delete(&self, id: LinkId) -> Result<()> {
        let removed = self.inner.links.write().remove(&id);
        if let Some(row) = removed {
            if self.inner.delete_lag {
                self.inner.lagging.write().insert(id, row);
            }
        }
        Ok(())
    }
}

impl PropertyStore for MemoryBackend {
    fn save_properties(&self, link: &LinkReference) -> Result<()> {
        let id = link
            .id
            .ok_or_else(|| Error::Properties("cannot save properties of a non persisted link".into()))?;
        let mut props = self.inner.properties.write();
        props.entry(id).or_default().extend(link.properties.clone());
        Ok(())
    }

    fn remove_properties(&self, link: &LinkReference) -> Result<()> {
        if let Some(id) = link.id {
            self.inner.properties.write().remove(&id);
        }
        Ok(())
    }

    fn load_properties(&self, links: &mut [LinkReference]) -> Result<()> {
        let props = self.inner.properties.read();
        for link in links.iter_mut() {
            if let Some(stored) = link.id.and_then(|id| props.get(&id)) {
                link.properties = stored.clone();
            }
        }
        Ok(())
    }
}

// ============================================================================
// MemoryInstances
// ============================================================================

/// Registered instances plus object-field definitions keyed by definition id.
#[derive(Clone, Default)]
pub struct MemoryInstances {
    inner: Arc<InstancesInner>,
}

#[derive(Default)]
struct InstancesInner {
    instances: RwLock<HashMap<InstanceReference, Instance>>,
    definitions: RwLock<HashMap<String, Vec<ObjectField>>>,
    batch_calls: AtomicUsize,
}

impl MemoryInstances {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) an instance and return its reference.
    pub fn insert(&self, instance: Instance) -> InstanceReference {
        let reference = instance.to_reference();
        self.inner.instances.write().insert(reference.clone(), instance);
        reference
    }

    pub fn remove(&self, reference: &InstanceReference) -> Option<Instance> {
        self.inner.instances.write().remove(reference)
    }

    /// Declare the object fields of a definition.
    pub fn define(&self, definition: impl Into<String>, fields: Vec<ObjectField>) {
        self.inner.definitions.write().insert(definition.into(), fields);
    }

    /// Number of `resolve_many` calls served so far.
    pub fn batch_calls(&self) -> usize {
        self.inner.batch_calls.load(Ordering::SeqCst)
    }
}

impl EntityResolver for MemoryInstances {
    fn resolve(&self, reference: &InstanceReference) -> Result<Option<Instance>> {
        Ok(self.inner.instances.read().get(reference).cloned())
    }

    fn resolve_many(
        &self,
        references: &[InstanceReference],
    ) -> Result<HashMap<InstanceReference, Instance>> {
        self.inner.batch_calls.fetch_add(1, Ordering::SeqCst);
        let instances = self.inner.instances.read();
        Ok(references
            .iter()
            .filter_map(|r| instances.get(r).map(|i| (r.clone(), i.clone())))
            .collect())
    }
}

impl DefinitionProvider for MemoryInstances {
    fn object_fields(&self, instance: &Instance) -> Result<Option<Vec<ObjectField>>> {
        Ok(self.inner.definitions.read().get(&instance.definition).cloned())
    }
}

// ============================================================================
// Tests
// ============================================================================
