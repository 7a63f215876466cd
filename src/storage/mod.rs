//! # Collaborator Contracts
//!
//! The link layer sits in front of four external collaborators. Each is a
//! narrow synchronous trait; any failure they report is propagated to the
//! caller unchanged.
//!
//! | Trait | Role |
//! |-------|------|
//! | `LinkStore` | Filtered lookups, persist and delete of link rows |
//! | `PropertyStore` | Link properties, saved and loaded separately from rows |
//! | `EntityResolver` | Dereferences `InstanceReference` → `Instance` |
//! | `DefinitionProvider` | Object/URI-typed fields of an instance's model |
//!
//! ## Implementations
//!
//! | Type | Module | Description |
//! |------|--------|-------------|
//! | `MemoryBackend` | `memory` | In-memory `LinkStore` + `PropertyStore` |
//! | `MemoryInstances` | `memory` | In-memory `EntityResolver` + `DefinitionProvider` |

pub mod memory;

use std::collections::{BTreeSet, HashMap};

use crate::model::*;
use crate::Result;

pub use memory::{MemoryBackend, MemoryInstances};

// ============================================================================
// Link query
// ============================================================================

/// Filter for [`LinkStore::find_links`].
///
/// At least one endpoint should be set; an empty `types` set means all types.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkQuery {
    pub from: Option<InstanceReference>,
    pub to: Option<InstanceReference>,
    pub types: BTreeSet<String>,
}

impl LinkQuery {
    pub fn outgoing(from: &InstanceReference) -> Self {
        Self { from: Some(from.clone()), ..Self::default() }
    }

    pub fn incoming(to: &InstanceReference) -> Self {
        Self { to: Some(to.clone()), ..Self::default() }
    }

    pub fn between(from: &InstanceReference, to: &InstanceReference) -> Self {
        Self { from: Some(from.clone()), to: Some(to.clone()), types: BTreeSet::new() }
    }

    pub fn with_type(mut self, relation_type: impl Into<String>) -> Self {
        self.types.insert(relation_type.into());
        self
    }

    pub fn with_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.types.extend(types.into_iter().map(Into::into));
        self
    }

    /// True when the query names no endpoint at all.
    pub fn is_unbounded(&self) -> bool {
        self.from.is_none() && self.to.is_none()
    }

    pub fn matches(&self, link: &LinkReference) -> bool {
        self.from.as_ref().is_none_or(|f| &link.from == f)
            && self.to.as_ref().is_none_or(|t| &link.to == t)
            && (self.types.is_empty() || self.types.contains(&link.relation_type))
    }
}

// ============================================================================
// LinkStore
// ============================================================================

/// Persistent storage for link rows (relational table, triple store, ...).
///
/// Implementations own their own retry and timeout policy; the link layer
/// adds none.
pub trait LinkStore: Send + Sync + 'static {
    /// All rows matching the query, without properties.
    fn find_links(&self, query: &LinkQuery) -> Result<Vec<LinkReference>>;

    /// Single row by id, without properties.
    fn find_link(&self, id: LinkId) -> Result<Option<LinkReference>>;

    /// Insert or update a row. Assigns an id when `link.id` is `None`.
    fn persist(&self, link: LinkReference) -> Result<LinkReference>;

    /// Delete a row. Deleting an unknown id is not an error.
    fn delete(&self, id: LinkId) -> Result<()>;
}

// ============================================================================
// PropertyStore
// ============================================================================

/// Storage for link properties.
pub trait PropertyStore: Send + Sync + 'static {
    /// Persist `link.properties` for the (persisted) link.
    fn save_properties(&self, link: &LinkReference) -> Result<()>;

    /// Drop every property stored for the link.
    fn remove_properties(&self, link: &LinkReference) -> Result<()>;

    /// Fill `properties` of every persisted link in the batch.
    fn load_properties(&self, links: &mut [LinkReference]) -> Result<()>;
}

/// Everything the service needs from its storage: rows plus properties.
pub trait LinkBackend: LinkStore + PropertyStore {}

impl<T: LinkStore + PropertyStore> LinkBackend for T {}

// ============================================================================
// EntityResolver
// ============================================================================

/// Loads full instances for references.
pub trait EntityResolver: Send + Sync + 'static {
    fn resolve(&self, reference: &InstanceReference) -> Result<Option<Instance>>;

    /// Batch resolve. References that cannot be loaded are absent from the map.
    ///
    /// Default: one `resolve` call per reference.
    fn resolve_many(
        &self,
        references: &[InstanceReference],
    ) -> Result<HashMap<InstanceReference, Instance>> {
        let mut loaded = HashMap::with_capacity(references.len());
        for reference in references {
            if let Some(instance) = self.resolve(reference)? {
                loaded.insert(reference.clone(), instance);
            }
        }
        Ok(loaded)
    }
}

// ============================================================================
// DefinitionProvider
// ============================================================================

/// A field of an instance's definition whose value points at other instances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectField {
    /// Field name as declared in the definition.
    pub identifier: String,
    /// Relation type the field is stored as. Fields without one are skipped.
    pub relation_type: Option<String>,
}

impl ObjectField {
    pub fn new(identifier: impl Into<String>, relation_type: impl Into<String>) -> Self {
        Self { identifier: identifier.into(), relation_type: Some(relation_type.into()) }
    }
}

/// Reads the definition model of an instance.
pub trait DefinitionProvider: Send + Sync + 'static {
    /// Object/URI-typed fields of the instance's definition, or `None` when
    /// the instance has no known definition.
    fn object_fields(&self, instance: &Instance) -> Result<Option<Vec<ObjectField>>>;
}
