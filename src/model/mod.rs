//! # Link Model
//!
//! Plain DTOs shared by the cache, the service and the diff engine.
//! These types cross every boundary: store ↔ cache ↔ service ↔ caller.
//!
//! Design rule: this module is pure data with no I/O and no locking.

pub mod instance;
pub mod link;
pub mod property_map;
pub mod relation_type;
pub mod value;

pub use instance::{Endpoint, Instance, InstanceId, InstanceReference, TypeDescriptor};
pub use link::{LinkId, LinkIds, LinkInstance, LinkReference};
pub use property_map::{properties, PropertyMap};
pub use relation_type::{
    decode_simple, encode_simple, is_simple, RelationTypes, HAS_CHILD, PART_OF, PROCESSED_BY, PROCESSES,
    SIMPLE_SUFFIX,
};
pub use value::Value;
