//! # Link Service
//!
//! The public face of the crate. Creates and removes links, keeps the
//! relationship cache in step with every write, and answers reads from the
//! cache (outgoing) or the store (incoming).
//!
//! ## Soft no-ops
//!
//! Missing endpoints and blank relation types are common while bulk updates
//! run over partially resolved data. They are logged and answered with a
//! "nothing happened" value (`LinkIds::NONE`, `false`, empty vector), never
//! with an error. Collaborator failures propagate unchanged.
//!
//! ## Simple links
//!
//! One-directional relations are stored with [`SIMPLE_SUFFIX`] appended to
//! the type so they can share storage with bidirectional ones. The `*_simple`
//! operations encode on the way in and decode on the way out.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use hashbrown::HashSet;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::cache::{RelationCache, TombstoneSet, TypeFilter};
use crate::config::LinkServiceConfig;
use crate::diff::{self, RelationDiff, RelationMap};
use crate::model::*;
use crate::storage::{DefinitionProvider, EntityResolver, LinkBackend, LinkQuery};
use crate::{Error, Result};

/// Property written on links created by [`LinkService::save_relations`].
pub const CREATED_BY: &str = "createdBy";
/// Property written on links created by [`LinkService::save_relations`].
pub const CREATED_ON: &str = "createdOn";

/// Arguments of [`LinkService::search_links`]. `from` takes precedence over `to`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkSearch {
    pub from: Option<InstanceReference>,
    pub to: Option<InstanceReference>,
    pub relation_type: Option<String>,
}

impl LinkSearch {
    pub fn from(from: &InstanceReference) -> Self {
        Self { from: Some(from.clone()), ..Self::default() }
    }

    pub fn to(to: &InstanceReference) -> Self {
        Self { to: Some(to.clone()), ..Self::default() }
    }

    pub fn with_type(mut self, relation_type: impl Into<String>) -> Self {
        self.relation_type = Some(relation_type.into());
        self
    }
}

/// State that lives between `open` and `close`.
struct ServiceState {
    cache: RelationCache,
    tombstones: Arc<TombstoneSet>,
}

/// Link lifecycle, relationship cache and relation diff in one handle.
///
/// Cheap to share across threads behind an `Arc`; every method takes `&self`.
pub struct LinkService<B: LinkBackend> {
    backend: B,
    resolver: Arc<dyn EntityResolver>,
    definitions: Arc<dyn DefinitionProvider>,
    relation_types: RelationTypes,
    config: LinkServiceConfig,
    state: RwLock<Option<Arc<ServiceState>>>,
}

impl<B: LinkBackend> LinkService<B> {
    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Validate `config` and build caches, tombstones and lock maps.
    pub fn open(
        config: LinkServiceConfig,
        backend: B,
        resolver: impl EntityResolver,
        definitions: impl DefinitionProvider,
    ) -> Result<Self> {
        config.validate()?;
        let mut relation_types = RelationTypes::default();
        relation_types.extend(&config.reverse_types);

        let tombstones = Arc::new(TombstoneSet::new(config.tombstone_capacity));
        let state = ServiceState { cache: RelationCache::new(&config, tombstones.clone()), tombstones };
        debug!(
            endpoint_cache = config.endpoint_cache.max_entries,
            link_cache = config.link_cache.max_entries,
            tombstones = config.tombstone_capacity,
            "link service opened"
        );
        Ok(Self {
            backend,
            resolver: Arc::new(resolver),
            definitions: Arc::new(definitions),
            relation_types,
            config,
            state: RwLock::new(Some(Arc::new(state))),
        })
    }

    /// Drop every cached entry and tombstone. Later calls fail with
    /// [`Error::ServiceClosed`].
    pub fn close(&self) {
        if let Some(state) = self.state.write().take() {
            state.cache.clear();
            state.tombstones.clear();
            debug!("link service closed");
        }
    }

    pub fn is_open(&self) -> bool {
        self.state.read().is_some()
    }

    fn state(&self) -> Result<Arc<ServiceState>> {
        self.state.read().clone().ok_or(Error::ServiceClosed)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &LinkServiceConfig {
        &self.config
    }

    pub fn relation_types(&self) -> &RelationTypes {
        &self.relation_types
    }

    /// True while `id` is remembered as deleted. Always false once closed.
    pub fn is_tombstoned(&self, id: LinkId) -> bool {
        self.state().is_ok_and(|state| state.tombstones.contains(id))
    }

    /// Store query with properties loaded.
    fn fetch(&self, query: &LinkQuery) -> Result<Vec<LinkReference>> {
        let mut rows = self.backend.find_links(query)?;
        self.backend.load_properties(&mut rows)?;
        Ok(rows)
    }

    // ========================================================================
    // Create
    // ========================================================================

    /// Link `from` to `to`, replacing any existing link of the same type
    /// between them. With `reverse_type`, a paired reverse record is written
    /// too and both records point at each other.
    pub fn link<'a, 'b>(
        &self,
        from: impl Into<Endpoint<'a>>,
        to: impl Into<Endpoint<'b>>,
        relation_type: &str,
        reverse_type: Option<&str>,
        properties: &PropertyMap,
    ) -> Result<LinkIds> {
        let state = self.state()?;
        let (from, to): (Endpoint, Endpoint) = (from.into(), to.into());
        let (Some(from), Some(to)) = (from.resolve(), to.resolve()) else {
            warn!(relation_type, "link endpoint missing, nothing linked");
            return Ok(LinkIds::NONE);
        };
        if relation_type.trim().is_empty() {
            warn!(from = %from, to = %to, "blank relation type, nothing linked");
            return Ok(LinkIds::NONE);
        }
        let reverse_type = reverse_type.filter(|t| !t.trim().is_empty());

        // replace, never append: only the exact triple and its reverse go
        let mut previous = vec![LinkQuery::between(&from, &to).with_type(relation_type)];
        if let Some(reverse_type) = reverse_type {
            previous.push(LinkQuery::between(&to, &from).with_type(reverse_type));
        }
        self.unlink_matching(&state, &previous)?;

        let mut forward = self.backend.persist(LinkReference {
            id: None,
            relation_type: relation_type.to_owned(),
            from: from.clone(),
            to: to.clone(),
            primary: true,
            reverse_id: None,
            properties: properties.clone(),
        })?;
        let mut ids = LinkIds { forward: forward.id, reverse: None };

        // a self-loop whose type is its own reverse is one record paired with itself
        if from == to && reverse_type == Some(relation_type) {
            forward.reverse_id = forward.id;
            forward = self.backend.persist(forward)?;
            ids.reverse = forward.id;
        } else if let Some(reverse_type) = reverse_type {
            let reverse = self.backend.persist(LinkReference {
                id: None,
                relation_type: reverse_type.to_owned(),
                from: to.clone(),
                to: from.clone(),
                primary: false,
                reverse_id: forward.id,
                properties: properties.clone(),
            })?;
            forward.reverse_id = reverse.id;
            forward = self.backend.persist(forward)?;
            ids.reverse = reverse.id;

            if !properties.is_empty() {
                self.backend.save_properties(&reverse)?;
            }
            state.cache.push(&reverse);
        }
        if !properties.is_empty() {
            self.backend.save_properties(&forward)?;
        }
        state.cache.push(&forward);

        debug!(
            from = %from,
            to = %to,
            relation_type,
            forward = ?ids.forward,
            reverse = ?ids.reverse,
            "linked"
        );
        Ok(ids)
    }

    /// One-directional link. The paired reverse uses the reverse table
    /// (self-reverse when unmapped). True when both records were written.
    pub fn link_simple(&self, from: &InstanceReference, to: &InstanceReference, relation_type: &str) -> Result<bool> {
        self.link_simple_with_reverse(from, to, relation_type, None)
    }

    /// Like [`link_simple`](Self::link_simple) with an explicit reverse type.
    pub fn link_simple_with_reverse(
        &self,
        from: &InstanceReference,
        to: &InstanceReference,
        relation_type: &str,
        reverse_type: Option<&str>,
    ) -> Result<bool> {
        if relation_type.trim().is_empty() {
            warn!(from = %from, to = %to, "blank relation type, nothing linked");
            return Ok(false);
        }
        let reverse = match reverse_type {
            Some(reverse) => encode_simple(reverse),
            None => encode_simple(&self.relation_types.reverse_of(relation_type)),
        };
        let ids = self.link(from, to, &encode_simple(relation_type), Some(&reverse), &PropertyMap::new())?;
        Ok(ids.is_pair())
    }

    /// [`link_simple`](Self::link_simple) for every target. True when all succeeded.
    pub fn link_simple_many(
        &self,
        from: &InstanceReference,
        tos: &[InstanceReference],
        relation_type: &str,
    ) -> Result<bool> {
        let mut all = true;
        for to in tos {
            all &= self.link_simple(from, to, relation_type)?;
        }
        Ok(all)
    }

    // ========================================================================
    // Remove
    // ========================================================================

    /// Remove the `relation_type` link between the pair and, with
    /// `reverse_type`, its reverse. When `from == to` every link of those
    /// types starting or ending at the instance is removed.
    pub fn unlink<'a, 'b>(
        &self,
        from: impl Into<Endpoint<'a>>,
        to: impl Into<Endpoint<'b>>,
        relation_type: &str,
        reverse_type: Option<&str>,
    ) -> Result<bool> {
        let state = self.state()?;
        let (from, to): (Endpoint, Endpoint) = (from.into(), to.into());
        let (Some(from), Some(to)) = (from.resolve(), to.resolve()) else {
            warn!(relation_type, "unlink endpoint missing, nothing removed");
            return Ok(false);
        };
        if relation_type.trim().is_empty() {
            warn!(from = %from, to = %to, "blank relation type, nothing removed");
            return Ok(false);
        }
        let reverse_type = reverse_type.filter(|t| !t.trim().is_empty());
        let queries = Self::pair_queries(&from, &to, Some(relation_type), reverse_type);
        let removed = self.unlink_matching(&state, &queries)?;
        debug!(from = %from, to = %to, relation_type, removed, "unlink");
        Ok(removed > 0)
    }

    /// Remove every link, of any type, from `from` to `to`.
    pub fn unlink_all(&self, from: &InstanceReference, to: &InstanceReference) -> Result<bool> {
        let state = self.state()?;
        Ok(self.unlink_matching(&state, &Self::pair_queries(from, to, None, None))? > 0)
    }

    pub fn unlink_simple(&self, from: &InstanceReference, to: &InstanceReference, relation_type: &str) -> Result<bool> {
        let reverse = encode_simple(&self.relation_types.reverse_of(relation_type));
        self.unlink(from, to, &encode_simple(relation_type), Some(&reverse))
    }

    /// Remove every simple `relation_type` link leaving `from`, plus the
    /// reverse-typed simple links arriving at it.
    pub fn unlink_simple_all(&self, from: &InstanceReference, relation_type: &str) -> Result<bool> {
        let state = self.state()?;
        let reverse = encode_simple(&self.relation_types.reverse_of(relation_type));
        let queries = [
            LinkQuery::outgoing(from).with_type(encode_simple(relation_type)),
            LinkQuery::incoming(from).with_type(reverse),
        ];
        Ok(self.unlink_matching(&state, &queries)? > 0)
    }

    /// Remove every link starting or ending at `instance`.
    pub fn remove_links_for(&self, instance: &InstanceReference) -> Result<bool> {
        let state = self.state()?;
        Ok(self.unlink_matching(&state, &Self::pair_queries(instance, instance, None, None))? > 0)
    }

    /// Remove one record. Records without an id are ignored.
    pub fn remove_link(&self, link: &LinkReference) -> Result<()> {
        let state = self.state()?;
        if link.id.is_some() {
            self.delete_link(&state, link)?;
        }
        Ok(())
    }

    /// Remove one record by id. False when the store does not know it.
    pub fn remove_link_by_id(&self, id: LinkId) -> Result<bool> {
        let state = self.state()?;
        match self.backend.find_link(id)? {
            Some(link) => {
                self.delete_link(&state, &link)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Queries locating the links between a pair. A self-pair is searched
    /// from both sides since a self-loop shows up in either direction.
    fn pair_queries(
        from: &InstanceReference,
        to: &InstanceReference,
        relation_type: Option<&str>,
        reverse_type: Option<&str>,
    ) -> Vec<LinkQuery> {
        let typed = |query: LinkQuery, relation_type: Option<&str>| match relation_type {
            Some(t) => query.with_type(t),
            None => query,
        };
        let mut queries = Vec::with_capacity(4);
        if from == to {
            queries.push(typed(LinkQuery::outgoing(from), relation_type));
            queries.push(typed(LinkQuery::incoming(to), relation_type));
            if let Some(reverse) = reverse_type.filter(|r| Some(*r) != relation_type) {
                queries.push(LinkQuery::outgoing(from).with_type(reverse));
                queries.push(LinkQuery::incoming(to).with_type(reverse));
            }
        } else {
            queries.push(typed(LinkQuery::between(from, to), relation_type));
            if let Some(reverse) = reverse_type {
                queries.push(LinkQuery::between(to, from).with_type(reverse));
            }
        }
        queries
    }

    /// Tombstone and delete every live record matched by any query. A record
    /// matched by several queries is removed once. Returns the count.
    fn unlink_matching(&self, state: &ServiceState, queries: &[LinkQuery]) -> Result<usize> {
        let mut seen = HashSet::new();
        let mut found = Vec::new();
        for query in queries {
            for link in self.backend.find_links(query)? {
                if link.id.is_some_and(|id| seen.insert(id)) {
                    found.push(link);
                }
            }
        }
        state.tombstones.retain_live(&mut found);

        for link in &found {
            self.delete_link(state, link)?;
        }
        if !found.is_empty() {
            debug!(removed = found.len(), queries = queries.len(), "unlinked");
        }
        Ok(found.len())
    }

    fn delete_link(&self, state: &ServiceState, link: &LinkReference) -> Result<()> {
        let Some(id) = link.id else {
            return Ok(());
        };
        state.tombstones.add(id);
        self.backend.delete(id)?;
        self.backend.remove_properties(link)?;
        Ok(())
    }

    // ========================================================================
    // Read
    // ========================================================================

    /// Outgoing links of `from` whose type passes `types`.
    pub fn get_links(&self, from: &InstanceReference, types: impl Into<TypeFilter>) -> Result<Vec<LinkReference>> {
        let state = self.state()?;
        state.cache.links_from(from, &types.into(), |query| self.fetch(query))
    }

    /// Incoming links of `to`. Read from the store, never cached.
    pub fn get_links_to(&self, to: &InstanceReference, types: impl Into<TypeFilter>) -> Result<Vec<LinkReference>> {
        let state = self.state()?;
        let filter = types.into();
        if matches!(&filter, TypeFilter::Only(types) if types.is_empty()) {
            return Ok(Vec::new());
        }
        let mut links = self.fetch(&LinkQuery::incoming(to).with_types(filter.types()))?;
        state.tombstones.retain_live(&mut links);
        Ok(links)
    }

    /// Simple links of `from`, types decoded. `TypeFilter::All` returns
    /// every simple link and nothing else.
    pub fn get_simple_links(
        &self,
        from: &InstanceReference,
        types: impl Into<TypeFilter>,
    ) -> Result<Vec<LinkReference>> {
        let filter = types.into();
        let mut links = self.get_links(from, filter.map_types(encode_simple))?;
        if filter == TypeFilter::All {
            links.retain(|link| is_simple(&link.relation_type));
        }
        Ok(decode_all(links))
    }

    /// Simple links arriving at `to`, types decoded.
    pub fn get_simple_links_to(&self, to: &InstanceReference, relation_type: &str) -> Result<Vec<LinkReference>> {
        Ok(decode_all(self.get_links_to(to, encode_simple(relation_type))?))
    }

    pub fn is_linked(&self, from: &InstanceReference, to: &InstanceReference, relation_type: &str) -> Result<bool> {
        Ok(self.get_links(from, relation_type)?.iter().any(|link| link.connects(from, to, relation_type)))
    }

    pub fn is_linked_simple(
        &self,
        from: &InstanceReference,
        to: &InstanceReference,
        relation_type: &str,
    ) -> Result<bool> {
        Ok(self
            .get_simple_links(from, relation_type)?
            .iter()
            .any(|link| link.connects(from, to, relation_type)))
    }

    /// Record by id with properties. Tombstoned ids read as absent.
    pub fn get_link_reference(&self, id: LinkId) -> Result<Option<LinkReference>> {
        let state = self.state()?;
        if state.tombstones.contains(id) {
            return Ok(None);
        }
        let Some(link) = self.backend.find_link(id)? else {
            return Ok(None);
        };
        let mut batch = [link];
        self.backend.load_properties(&mut batch)?;
        let [link] = batch;
        Ok(Some(link))
    }

    pub fn get_link_instance(&self, id: LinkId) -> Result<Option<LinkInstance>> {
        match self.get_link_reference(id)? {
            Some(link) => self.convert_to_link_instance(&link),
            None => Ok(None),
        }
    }

    /// Links matching the search, resolved to instances.
    pub fn search_links(&self, search: &LinkSearch) -> Result<Vec<LinkInstance>> {
        let filter = TypeFilter::from(search.relation_type.as_deref());
        let links = match (&search.from, &search.to) {
            (Some(from), _) => self.get_links(from, filter)?,
            (None, Some(to)) => self.get_links_to(to, filter)?,
            (None, None) => Vec::new(),
        };
        self.convert_to_link_instances(&links)
    }

    // ========================================================================
    // Update
    // ========================================================================

    /// Merge `properties` into a persisted link. False when the link is
    /// unknown or deleted.
    pub fn update_link_properties(&self, id: LinkId, properties: &PropertyMap) -> Result<bool> {
        let state = self.state()?;
        let Some(mut link) = self.get_link_reference(id)? else {
            warn!(link = %id, "link not found, properties not updated");
            return Ok(false);
        };
        link.properties.extend(properties.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.backend.save_properties(&link)?;
        state.cache.replace(&link);
        debug!(link = %id, updated = properties.len(), "link properties updated");
        Ok(true)
    }

    // ========================================================================
    // Conversion
    // ========================================================================

    /// Resolve both endpoints. `None` when either cannot be loaded.
    pub fn convert_to_link_instance(&self, link: &LinkReference) -> Result<Option<LinkInstance>> {
        let from = self.resolver.resolve(&link.from)?;
        let to = self.resolver.resolve(&link.to)?;
        match (from, to) {
            (Some(from), Some(to)) => Ok(Some(LinkInstance::from_reference(link, from, to))),
            _ => {
                warn!(link = ?link.id, from = %link.from, to = %link.to, "link endpoint not resolvable");
                Ok(None)
            }
        }
    }

    /// Resolve all endpoints with one batch call. Links with an endpoint that
    /// cannot be loaded are skipped.
    pub fn convert_to_link_instances(&self, links: &[LinkReference]) -> Result<Vec<LinkInstance>> {
        if links.is_empty() {
            return Ok(Vec::new());
        }
        let distinct: BTreeSet<&InstanceReference> = links.iter().flat_map(|l| [&l.from, &l.to]).collect();
        let references: Vec<InstanceReference> = distinct.into_iter().cloned().collect();
        let loaded = self.resolver.resolve_many(&references)?;

        let mut converted = Vec::with_capacity(links.len());
        let mut skipped = 0usize;
        for link in links {
            match (loaded.get(&link.from), loaded.get(&link.to)) {
                (Some(from), Some(to)) => {
                    converted.push(LinkInstance::from_reference(link, from.clone(), to.clone()))
                }
                _ => skipped += 1,
            }
        }
        if skipped > 0 {
            warn!(skipped, total = links.len(), "links with unresolvable endpoints skipped");
        }
        Ok(converted)
    }

    // ========================================================================
    // Instance relations & diff
    // ========================================================================

    /// Simple links of `instance` for every object field of its definition.
    pub fn get_instance_relations(&self, instance: &Instance) -> Result<Vec<LinkReference>> {
        self.get_instance_relations_filtered(instance, |_| true)
    }

    /// Like [`get_instance_relations`](Self::get_instance_relations), keeping
    /// only fields whose identifier passes `field_filter`.
    pub fn get_instance_relations_filtered(
        &self,
        instance: &Instance,
        field_filter: impl Fn(&str) -> bool,
    ) -> Result<Vec<LinkReference>> {
        let Some(fields) = self.definitions.object_fields(instance)? else {
            debug!(instance = %instance.id, definition = %instance.definition, "no definition, no relations");
            return Ok(Vec::new());
        };
        let types: BTreeSet<String> = fields
            .into_iter()
            .filter(|field| field_filter(&field.identifier))
            .filter_map(|field| field.relation_type)
            .collect();
        if types.is_empty() {
            return Ok(Vec::new());
        }
        self.get_simple_links(&instance.to_reference(), TypeFilter::Only(types))
    }

    /// Diff between the current relations of `source` and `desired`. Types
    /// missing from `desired` are left alone.
    pub fn relations_diff(&self, source: &InstanceReference, desired: &RelationMap) -> Result<RelationDiff> {
        self.state()?;
        if desired.is_empty() {
            return Ok(RelationDiff::default());
        }
        let current = match self.resolver.resolve(source)? {
            Some(instance) => diff::relation_map(&self.get_instance_relations(&instance)?),
            None => {
                warn!(source = %source, "relation source not resolvable, diffing against no relations");
                RelationMap::new()
            }
        };
        Ok(diff::compute(source, &current, desired))
    }

    /// Apply a diff as simple links, stamping added links with
    /// `createdBy`/`createdOn`.
    pub fn save_relations(&self, diff: &RelationDiff) -> Result<()> {
        self.save_relations_with(diff, |_| {}, |_| {})
    }

    /// [`save_relations`](Self::save_relations) with callbacks fired for each
    /// entry that actually changed the store.
    pub fn save_relations_with(
        &self,
        diff: &RelationDiff,
        mut on_added: impl FnMut(&LinkReference),
        mut on_removed: impl FnMut(&LinkReference),
    ) -> Result<()> {
        let properties = properties([
            (CREATED_BY, Value::from(self.config.system_actor.as_str())),
            (CREATED_ON, Value::from(Utc::now())),
        ]);

        let mut added = 0usize;
        for link in &diff.to_add {
            let reverse = encode_simple(&self.relation_types.reverse_of(&link.relation_type));
            let relation_type = encode_simple(&link.relation_type);
            let ids = self.link(&link.from, &link.to, &relation_type, Some(&reverse), &properties)?;
            if ids.forward.is_some() {
                added += 1;
                on_added(link);
            }
        }

        let mut removed = 0usize;
        for link in &diff.to_remove {
            if self.unlink_simple(&link.from, &link.to, &link.relation_type)? {
                removed += 1;
                on_removed(link);
            }
        }
        debug!(added, removed, "relations saved");
        Ok(())
    }
}

fn decode_all(mut links: Vec<LinkReference>) -> Vec<LinkReference> {
    for link in &mut links {
        let decoded = decode_simple(&link.relation_type).len();
        link.relation_type.truncate(decoded);
    }
    links
}
