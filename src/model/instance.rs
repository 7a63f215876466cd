//! Instances (domain entities) and the references that point at them.

use serde::{Deserialize, Serialize};
use super::{PropertyMap, Value};

/// Opaque instance identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceId(pub String);

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for InstanceId {
    fn from(s: &str) -> Self { InstanceId(s.to_owned()) }
}

impl From<String> for InstanceId {
    fn from(s: String) -> Self { InstanceId(s) }
}

/// Type of an instance: a type name plus the category it belongs to
/// (e.g. `documentinstance` / `document`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeDescriptor {
    pub name: String,
    pub category: String,
}

impl TypeDescriptor {
    pub fn new(name: impl Into<String>, category: impl Into<String>) -> Self {
        Self { name: name.into(), category: category.into() }
    }
}

impl std::fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.category, self.name)
    }
}

/// Identity handle to an instance. Equal iff id and type match.
///
/// Never owns the instance; used as a cache key and dereferenced through an
/// [`EntityResolver`](crate::storage::EntityResolver) when the full entity is needed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceReference {
    pub id: InstanceId,
    pub type_descriptor: TypeDescriptor,
}

impl InstanceReference {
    pub fn new(id: impl Into<InstanceId>, type_descriptor: TypeDescriptor) -> Self {
        Self { id: id.into(), type_descriptor }
    }
}

impl std::fmt::Display for InstanceReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.id, self.type_descriptor)
    }
}

/// A fully loaded domain entity (document, task, user, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: InstanceId,
    pub type_descriptor: TypeDescriptor,
    /// Definition the instance was created from; selects its field model.
    pub definition: String,
    pub properties: PropertyMap,
}

impl Instance {
    pub fn new(
        id: impl Into<InstanceId>,
        type_descriptor: TypeDescriptor,
        definition: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            type_descriptor,
            definition: definition.into(),
            properties: PropertyMap::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn to_reference(&self) -> InstanceReference {
        InstanceReference {
            id: self.id.clone(),
            type_descriptor: self.type_descriptor.clone(),
        }
    }
}

/// One end of a link as handed in by a caller.
///
/// Callers may hold a reference, a loaded instance, or nothing at all (a
/// partially resolved relation). The service resolves every variant to an
/// [`InstanceReference`] at the boundary; `Missing` turns the operation into
/// a no-op.
#[derive(Debug, Clone, Copy)]
pub enum Endpoint<'a> {
    Reference(&'a InstanceReference),
    Instance(&'a Instance),
    Missing,
}

impl Endpoint<'_> {
    pub fn resolve(self) -> Option<InstanceReference> {
        match self {
            Endpoint::Reference(r) => Some(r.clone()),
            Endpoint::Instance(i) => Some(i.to_reference()),
            Endpoint::Missing => None,
        }
    }
}

impl<'a> From<&'a InstanceReference> for Endpoint<'a> {
    fn from(r: &'a InstanceReference) -> Self { Endpoint::Reference(r) }
}

impl<'a> From<&'a Instance> for Endpoint<'a> {
    fn from(i: &'a Instance) -> Self { Endpoint::Instance(i) }
}

impl<'a> From<Option<&'a InstanceReference>> for Endpoint<'a> {
    fn from(r: Option<&'a InstanceReference>) -> Self {
        r.map_or(Endpoint::Missing, Endpoint::Reference)
    }
}

impl<'a> From<Option<&'a Instance>> for Endpoint<'a> {
    fn from(i: Option<&'a Instance>) -> Self {
        i.map_or(Endpoint::Missing, Endpoint::Instance)
    }
}
