//! # relink: Typed Relationships with a Two-Tier Cache
//!
//! Maintains typed, directed links between domain instances and keeps a
//! concurrency-safe cache in front of the slower link store.
//!
//! ## Design Principles
//!
//! 1. **Trait-first**: `LinkStore`, `PropertyStore`, `EntityResolver` and
//!    `DefinitionProvider` are the contract with the outside world
//! 2. **Clean DTOs**: `LinkReference`, `LinkInstance`, `InstanceReference`
//!    cross all boundaries
//! 3. **Replace, never append**: at most one live link per (from, to, type)
//! 4. **Tombstones over invalidation**: deletes are masked, never chased
//!    through the cache
//! 5. **Diff is a pure function**: `diff::compute` does no I/O
//!
//! ## Quick Start
//!
//! ```rust
//! use relink::{LinkService, LinkServiceConfig, PropertyMap, TypeDescriptor, Instance};
//! use relink::storage::{MemoryBackend, MemoryInstances};
//!
//! # fn main() -> relink::Result<()> {
//! let instances = MemoryInstances::new();
//! let service = LinkService::open(
//!     LinkServiceConfig::default(),
//!     MemoryBackend::new(),
//!     instances.clone(),
//!     instances.clone(),
//! )?;
//!
//! let doc = TypeDescriptor::new("documentinstance", "document");
//! let a = instances.insert(Instance::new("a", doc.clone(), "DT1"));
//! let b = instances.insert(Instance::new("b", doc, "DT1"));
//!
//! service.link(&a, &b, "emf:references", Some("emf:referencedBy"), &PropertyMap::new())?;
//! assert!(service.is_linked(&a, &b, "emf:references")?);
//! assert_eq!(service.get_links(&b, "emf:referencedBy")?.len(), 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Storage Backends
//!
//! | Backend | Description |
//! |---------|-------------|
//! | `MemoryBackend` | In-memory rows and properties for testing/embedding |
//! | your own | Implement `LinkStore` + `PropertyStore` |

// ============================================================================
// Modules
// ============================================================================

pub mod model;
pub mod config;
pub mod cache;
pub mod storage;
pub mod service;
pub mod diff;

// ============================================================================
// Re-exports: Model (the DTOs)
// ============================================================================

pub use model::{
    Endpoint, Instance, InstanceId, InstanceReference, TypeDescriptor,
    LinkId, LinkIds, LinkInstance, LinkReference,
    properties, PropertyMap, RelationTypes, Value,
};

// ============================================================================
// Re-exports: Storage
// ============================================================================

pub use storage::{
    LinkStore, PropertyStore, LinkBackend, LinkQuery,
    EntityResolver, DefinitionProvider, ObjectField,
};

// ============================================================================
// Re-exports: Service
// ============================================================================

pub use cache::TypeFilter;
pub use config::{CacheConfig, LinkServiceConfig};
pub use diff::{RelationDiff, RelationMap};
pub use service::{LinkSearch, LinkService};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Property store error: {0}")]
    Properties(String),

    #[error("Resolve error: {0}")]
    Resolve(String),

    #[error("Definition error: {0}")]
    Definition(String),

    #[error("Link service is closed")]
    ServiceClosed,

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
