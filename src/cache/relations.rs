//! Two-tier relationship cache.
//!
//! - **Tier-1** (`endpoints`): source endpoint → relation types seen for it.
//! - **Tier-2** (`links`): (relation type, source endpoint) → its links.
//!
//! Populating Tier-1 loads every outgoing link of the endpoint once and seeds
//! Tier-2 with one entry per type, so a Tier-1 hit is followed by Tier-2 hits.
//! Small type filters skip Tier-1 and go straight to Tier-2.
//!
//! Writes append into entries that already exist and never populate missing
//! ones. Deletes edit nothing; the tombstone set masks deleted ids on every
//! population and every read, and a cached list found to hold tombstoned
//! records is compacted in place.
//!
//! Lock order is Tier-1 key before Tier-2 key. Tier-1 population holds the
//! endpoint key while seeding Tier-2, and pushes take the same endpoint key
//! first, so a push can never be overwritten by a seed fetched before it.

use std::collections::BTreeSet;
use std::sync::Arc;

use hashbrown::HashMap;
use smallvec::SmallVec;
use tracing::{debug, trace};

use super::{EntityLookupCache, LruLookupCache, TombstoneSet};
use crate::config::LinkServiceConfig;
use crate::model::{InstanceReference, LinkReference};
use crate::storage::LinkQuery;
use crate::Result;

// ============================================================================
// TypeFilter
// ============================================================================

/// Which relation types a read should return.
///
/// `Only` with an empty set matches nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TypeFilter {
    #[default]
    All,
    Only(BTreeSet<String>),
}

impl TypeFilter {
    pub fn only<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TypeFilter::Only(types.into_iter().map(Into::into).collect())
    }

    pub fn accepts(&self, relation_type: &str) -> bool {
        match self {
            TypeFilter::All => true,
            TypeFilter::Only(types) => types.contains(relation_type),
        }
    }

    /// Same filter with every named type rewritten by `f`.
    pub fn map_types(&self, f: impl Fn(&str) -> String) -> Self {
        match self {
            TypeFilter::All => TypeFilter::All,
            TypeFilter::Only(types) => TypeFilter::Only(types.iter().map(|t| f(t)).collect()),
        }
    }

    /// Types named by the filter, empty for `All`.
    pub fn types(&self) -> impl Iterator<Item = &str> {
        let named = match self {
            TypeFilter::All => None,
            TypeFilter::Only(types) => Some(types.iter().map(String::as_str)),
        };
        named.into_iter().flatten()
    }
}

impl From<&str> for TypeFilter {
    fn from(relation_type: &str) -> Self {
        TypeFilter::only([relation_type])
    }
}

impl From<String> for TypeFilter {
    fn from(relation_type: String) -> Self {
        TypeFilter::only([relation_type])
    }
}

impl From<Option<&str>> for TypeFilter {
    fn from(relation_type: Option<&str>) -> Self {
        relation_type.map_or(TypeFilter::All, TypeFilter::from)
    }
}

impl<const N: usize> From<[&str; N]> for TypeFilter {
    fn from(types: [&str; N]) -> Self {
        TypeFilter::only(types)
    }
}

impl From<Vec<String>> for TypeFilter {
    fn from(types: Vec<String>) -> Self {
        TypeFilter::only(types)
    }
}

impl From<BTreeSet<String>> for TypeFilter {
    fn from(types: BTreeSet<String>) -> Self {
        TypeFilter::Only(types)
    }
}

// ============================================================================
// RelationCache
// ============================================================================

/// Tier-2 key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelationKey {
    pub relation_type: String,
    pub endpoint: InstanceReference,
}

impl RelationKey {
    pub fn new(relation_type: impl Into<String>, endpoint: &InstanceReference) -> Self {
        Self { relation_type: relation_type.into(), endpoint: endpoint.clone() }
    }
}

/// Both cache tiers plus the tombstones that mask them.
///
/// Loaders are passed per call as `fetch`: run a store query and return the
/// rows with properties loaded.
pub struct RelationCache {
    endpoints: EntityLookupCache<InstanceReference, Arc<BTreeSet<String>>>,
    links: EntityLookupCache<RelationKey, Arc<Vec<LinkReference>>>,
    tombstones: Arc<TombstoneSet>,
    direct_type_threshold: usize,
}

impl RelationCache {
    pub fn new(config: &LinkServiceConfig, tombstones: Arc<TombstoneSet>) -> Self {
        Self {
            endpoints: EntityLookupCache::new(
                "link-endpoint",
                Box::new(LruLookupCache::from_config(&config.endpoint_cache)),
            ),
            links: EntityLookupCache::new(
                "link-relation",
                Box::new(LruLookupCache::from_config(&config.link_cache)),
            ),
            tombstones,
            direct_type_threshold: config.direct_type_threshold,
        }
    }

    /// Outgoing links of `endpoint` whose type passes `filter`, grouped by type.
    pub fn links_from<F>(
        &self,
        endpoint: &InstanceReference,
        filter: &TypeFilter,
        fetch: F,
    ) -> Result<Vec<LinkReference>>
    where
        F: Fn(&LinkQuery) -> Result<Vec<LinkReference>>,
    {
        let selected: SmallVec<[String; 8]> = match filter {
            TypeFilter::Only(types) if types.is_empty() => return Ok(Vec::new()),
            TypeFilter::Only(types) if types.len() <= self.direct_type_threshold => {
                types.iter().cloned().collect()
            }
            _ => {
                let known = self
                    .endpoints
                    .get_or_load(endpoint, |endpoint| self.populate_endpoint(endpoint, &fetch))?;
                known.iter().filter(|t| filter.accepts(t)).cloned().collect()
            }
        };

        let mut links = Vec::new();
        for relation_type in &selected {
            links.extend(self.links_of(endpoint, relation_type, &fetch)?);
        }
        Ok(links)
    }

    /// Tier-2 read of one type, populating on miss.
    fn links_of<F>(
        &self,
        endpoint: &InstanceReference,
        relation_type: &str,
        fetch: &F,
    ) -> Result<Vec<LinkReference>>
    where
        F: Fn(&LinkQuery) -> Result<Vec<LinkReference>>,
    {
        let key = RelationKey::new(relation_type, endpoint);
        let cached = self.links.get_or_load(&key, |key| {
            let query = LinkQuery::outgoing(&key.endpoint).with_type(key.relation_type.as_str());
            let mut rows = fetch(&query)?;
            let masked = self.tombstones.retain_live(&mut rows);
            debug!(
                cache = self.links.name(),
                endpoint = %key.endpoint,
                relation_type = %key.relation_type,
                links = rows.len(),
                masked,
                "populated link list"
            );
            Ok(Arc::new(rows))
        })?;

        let mut live = Vec::clone(&cached);
        if self.tombstones.retain_live(&mut live) > 0 {
            // compact only if nobody replaced the entry since we read it
            let entry = self.links.entry(&key);
            if entry.get().is_some_and(|current| Arc::ptr_eq(&current, &cached)) {
                entry.put(Arc::new(live.clone()));
                trace!(endpoint = %endpoint, relation_type, "compacted link list");
            }
        }
        Ok(live)
    }

    /// Tier-1 loader: every outgoing link, grouped into Tier-2 entries.
    fn populate_endpoint<F>(&self, endpoint: &InstanceReference, fetch: &F) -> Result<Arc<BTreeSet<String>>>
    where
        F: Fn(&LinkQuery) -> Result<Vec<LinkReference>>,
    {
        let mut rows = fetch(&LinkQuery::outgoing(endpoint))?;
        let masked = self.tombstones.retain_live(&mut rows);
        let total = rows.len();

        let mut groups: HashMap<String, Vec<LinkReference>> = HashMap::new();
        for link in rows {
            groups.entry(link.relation_type.clone()).or_default().push(link);
        }
        let types: BTreeSet<String> = groups.keys().cloned().collect();
        for (relation_type, group) in groups {
            self.links.put(RelationKey { relation_type, endpoint: endpoint.clone() }, Arc::new(group));
        }

        debug!(
            cache = self.endpoints.name(),
            endpoint = %endpoint,
            types = types.len(),
            links = total,
            masked,
            "populated endpoint"
        );
        Ok(Arc::new(types))
    }

    /// Add a freshly persisted link to whatever is already cached for its
    /// source. Missing entries stay missing.
    pub fn push(&self, link: &LinkReference) {
        let Some(id) = link.id else {
            return;
        };
        let endpoint = self.endpoints.entry(&link.from);
        if let Some(types) = endpoint.get() {
            if !types.contains(&link.relation_type) {
                let mut extended = BTreeSet::clone(&types);
                extended.insert(link.relation_type.clone());
                endpoint.put(Arc::new(extended));
            }
        }

        let key = RelationKey::new(link.relation_type.as_str(), &link.from);
        let entry = self.links.entry(&key);
        if let Some(list) = entry.get() {
            if !list.iter().any(|cached| cached.id == Some(id)) {
                let mut appended = Vec::clone(&list);
                appended.push(link.clone());
                entry.put(Arc::new(appended));
                trace!(link = %id, endpoint = %link.from, relation_type = %link.relation_type, "pushed link");
            }
        }
    }

    /// Swap the cached copy of an already cached link (same id) for `link`.
    pub fn replace(&self, link: &LinkReference) {
        let Some(id) = link.id else {
            return;
        };
        let entry = self.links.entry(&RelationKey::new(link.relation_type.as_str(), &link.from));
        if let Some(list) = entry.get() {
            if let Some(pos) = list.iter().position(|cached| cached.id == Some(id)) {
                let mut updated = Vec::clone(&list);
                updated[pos] = link.clone();
                entry.put(Arc::new(updated));
                trace!(link = %id, "replaced cached link");
            }
        }
    }

    pub fn tombstones(&self) -> &TombstoneSet {
        &self.tombstones
    }

    /// Number of Tier-1 entries.
    pub fn endpoint_entries(&self) -> usize {
        self.endpoints.len()
    }

    /// Number of Tier-2 entries.
    pub fn link_entries(&self) -> usize {
        self.links.len()
    }

    /// Cached link list for (type, endpoint), without loading.
    pub fn peek(&self, endpoint: &InstanceReference, relation_type: &str) -> Option<Vec<LinkReference>> {
        self.links
            .get(&RelationKey::new(relation_type, endpoint))
            .map(|list| Vec::clone(&list))
    }

    pub fn clear(&self) {
        self.endpoints.clear();
        self.links.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LinkId, TypeDescriptor};
    use crate::storage::{LinkStore, MemoryBackend};
    use pretty_assertions::assert_eq;

    fn reference(id: &str) -> InstanceReference {
        InstanceReference::new(id, TypeDescriptor::new("documentinstance", "document"))
    }

    fn cache() -> RelationCache {
        RelationCache::new(&LinkServiceConfig::default(), Arc::new(TombstoneSet::new(16)))
    }

    fn ids(links: &[LinkReference]) -> Vec<u64> {
        links.iter().filter_map(|l| l.id).map(|id| id.0).collect()
    }

    #[test]
    fn test_type_filter_conversions() {
        assert_eq!(TypeFilter::from(None), TypeFilter::All);
        assert!(TypeFilter::from("a").accepts("a"));
        assert!(!TypeFilter::from(["a", "b"]).accepts("c"));
        assert!(!TypeFilter::only(Vec::<String>::new()).accepts("a"));
        let encoded = TypeFilter::from("a").map_types(|t| format!("{t}-x"));
        assert_eq!(encoded.types().collect::<Vec<_>>(), vec!["a-x"]);
    }

    #[test]
    fn test_endpoint_population_seeds_link_lists() {
        let db = MemoryBackend::new();
        let a = reference("a");
        db.persist(LinkReference::new(a.clone(), reference("b"), "T")).unwrap();
        db.persist(LinkReference::new(a.clone(), reference("c"), "U")).unwrap();
        let cache = cache();
        let fetch = |q: &LinkQuery| db.find_links(q);

        let all = cache.links_from(&a, &TypeFilter::All, fetch).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(cache.endpoint_entries(), 1);
        assert_eq!(cache.link_entries(), 2);

        // Tier-1 and seeded Tier-2 serve both reads
        cache.links_from(&a, &TypeFilter::All, fetch).unwrap();
        cache.links_from(&a, &TypeFilter::from("T"), fetch).unwrap();
        assert_eq!(db.find_calls(), 1);
    }

    #[test]
    fn test_small_filter_skips_endpoint_tier() {
        let db = MemoryBackend::new();
        let a = reference("a");
        db.persist(LinkReference::new(a.clone(), reference("b"), "T")).unwrap();
        let cache = cache();

        let links = cache.links_from(&a, &TypeFilter::from("T"), |q| db.find_links(q)).unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(cache.endpoint_entries(), 0);
        assert_eq!(cache.link_entries(), 1);
    }

    #[test]
    fn test_empty_filter_reads_nothing() {
        let db = MemoryBackend::new();
        let cache = cache();
        let links = cache
            .links_from(&reference("a"), &TypeFilter::only(Vec::<String>::new()), |q| db.find_links(q))
            .unwrap();
        assert!(links.is_empty());
        assert_eq!(db.find_calls(), 0);
    }

    #[test]
    fn test_push_only_extends_existing_entries() {
        let db = MemoryBackend::new();
        let a = reference("a");
        let cache = cache();
        let fetch = |q: &LinkQuery| db.find_links(q);

        let early = db.persist(LinkReference::new(a.clone(), reference("b"), "T")).unwrap();
        cache.push(&early);
        assert_eq!(cache.link_entries(), 0, "push must not populate");

        cache.links_from(&a, &TypeFilter::All, fetch).unwrap();
        let late = db.persist(LinkReference::new(a.clone(), reference("c"), "T")).unwrap();
        cache.push(&late);
        cache.push(&late);
        let other = db.persist(LinkReference::new(a.clone(), reference("d"), "U")).unwrap();
        cache.push(&other);

        assert_eq!(ids(&cache.peek(&a, "T").unwrap()), vec![1, 2]);
        // "U" was added to the endpoint's types but its list was never loaded
        assert!(cache.peek(&a, "U").is_none());
        let all = cache.links_from(&a, &TypeFilter::All, fetch).unwrap();
        assert_eq!(ids(&all), vec![1, 2, 3]);
    }

    #[test]
    fn test_tombstoned_records_masked_and_compacted() {
        let db = MemoryBackend::with_delete_lag();
        let a = reference("a");
        let first = db.persist(LinkReference::new(a.clone(), reference("b"), "T")).unwrap();
        db.persist(LinkReference::new(a.clone(), reference("c"), "T")).unwrap();
        let cache = cache();
        let fetch = |q: &LinkQuery| db.find_links(q);

        assert_eq!(cache.links_from(&a, &TypeFilter::from("T"), fetch).unwrap().len(), 2);
        cache.tombstones().add(first.id.unwrap());
        db.delete(first.id.unwrap()).unwrap();

        assert_eq!(ids(&cache.links_from(&a, &TypeFilter::from("T"), fetch).unwrap()), vec![2]);
        assert_eq!(ids(&cache.peek(&a, "T").unwrap()), vec![2]);

        // a fresh population still sees the lagging row in the store
        cache.clear();
        assert_eq!(ids(&cache.links_from(&a, &TypeFilter::All, fetch).unwrap()), vec![2]);
    }

    #[test]
    fn test_replace_updates_cached_copy() {
        let db = MemoryBackend::new();
        let a = reference("a");
        let link = db.persist(LinkReference::new(a.clone(), reference("b"), "T")).unwrap();
        let cache = cache();
        cache.links_from(&a, &TypeFilter::from("T"), |q| db.find_links(q)).unwrap();

        let updated = link.clone().with_property("weight", 3);
        cache.replace(&updated);
        assert_eq!(cache.peek(&a, "T").unwrap(), vec![updated]);

        let mut stranger = link.with_property("weight", 4);
        stranger.id = Some(LinkId(99));
        cache.replace(&stranger);
        assert_eq!(ids(&cache.peek(&a, "T").unwrap()), vec![1]);
    }

    #[test]
    fn test_failed_population_leaves_cache_empty() {
        let db = MemoryBackend::new();
        let a = reference("a");
        db.fail_queries(true);
        let cache = cache();
        assert!(cache.links_from(&a, &TypeFilter::All, |q| db.find_links(q)).is_err());
        assert_eq!(cache.endpoint_entries(), 0);

        db.fail_queries(false);
        assert!(cache.links_from(&a, &TypeFilter::All, |q| db.find_links(q)).unwrap().is_empty());
    }
}
