//! Links: typed, directed relationships between instances.

use serde::{Deserialize, Serialize};
use super::{Instance, InstanceReference, PropertyMap, Value};

/// Persisted link identifier, assigned by the link store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkId(pub u64);

impl std::fmt::Display for LinkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A persisted relation record.
///
/// `primary` marks the forward half of a bidirectional pair; `reverse_id`
/// points at the paired record when one exists. `id` is `None` until the
/// record is persisted (diff output, for example, is never persisted as-is).
///
/// Values handed out of the cache are copies; changing one does not change
/// the cache. Go through the service to mutate links.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkReference {
    pub id: Option<LinkId>,
    pub relation_type: String,
    pub from: InstanceReference,
    pub to: InstanceReference,
    pub primary: bool,
    pub reverse_id: Option<LinkId>,
    pub properties: PropertyMap,
}

impl LinkReference {
    /// An unpersisted link with no properties.
    pub fn new(
        from: InstanceReference,
        to: InstanceReference,
        relation_type: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            relation_type: relation_type.into(),
            from,
            to,
            primary: true,
            reverse_id: None,
            properties: PropertyMap::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// True when this record connects `from` to `to` with the given type.
    pub fn connects(&self, from: &InstanceReference, to: &InstanceReference, relation_type: &str) -> bool {
        self.relation_type == relation_type && &self.from == from && &self.to == to
    }
}

/// A [`LinkReference`] with both endpoints resolved to full instances.
/// Built on demand, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkInstance {
    pub id: Option<LinkId>,
    pub relation_type: String,
    pub from: Instance,
    pub to: Instance,
    pub primary: bool,
    pub reverse_id: Option<LinkId>,
    pub properties: PropertyMap,
}

impl LinkInstance {
    pub fn from_reference(reference: &LinkReference, from: Instance, to: Instance) -> Self {
        Self {
            id: reference.id,
            relation_type: reference.relation_type.clone(),
            from,
            to,
            primary: reference.primary,
            reverse_id: reference.reverse_id,
            properties: reference.properties.clone(),
        }
    }
}

/// Ids assigned by a `link` call: the forward record and, for bidirectional
/// links, the reverse record. Both `None` means nothing was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LinkIds {
    pub forward: Option<LinkId>,
    pub reverse: Option<LinkId>,
}

impl LinkIds {
    /// The "nothing happened" pair.
    pub const NONE: LinkIds = LinkIds { forward: None, reverse: None };

    pub fn is_none(&self) -> bool {
        self.forward.is_none() && self.reverse.is_none()
    }

    /// Both halves of a bidirectional link were created.
    pub fn is_pair(&self) -> bool {
        self.forward.is_some() && self.reverse.is_some()
    }
}
