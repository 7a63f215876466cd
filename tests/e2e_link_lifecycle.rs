//! End-to-end tests for link creation and removal.
//!
//! Each test opens a `LinkService` over a fresh `MemoryBackend` and checks
//! what callers observe through reads, plus what reached the store.

use std::sync::Once;

use pretty_assertions::assert_eq;
use relink::storage::{MemoryBackend, MemoryInstances};
use relink::{
    properties, Instance, InstanceReference, LinkIds, LinkService, LinkServiceConfig,
    PropertyMap, TypeDescriptor, TypeFilter, Value,
};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("relink=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .try_init();
    });
}

struct Fixture {
    service: LinkService<MemoryBackend>,
    backend: MemoryBackend,
    instances: MemoryInstances,
}

impl Fixture {
    fn new() -> Self {
        init_tracing();
        let backend = MemoryBackend::new();
        let instances = MemoryInstances::new();
        let service = LinkService::open(
            LinkServiceConfig::default(),
            backend.clone(),
            instances.clone(),
            instances.clone(),
        )
        .unwrap();
        Self { service, backend, instances }
    }

    fn doc(&self, id: &str) -> InstanceReference {
        self.instances
            .insert(Instance::new(id, TypeDescriptor::new("documentinstance", "document"), "DT1"))
    }
}

// ============================================================================
// 1. Replace on create
// ============================================================================

#[test]
fn test_link_twice_keeps_one_record() {
    let f = Fixture::new();
    let (a, b) = (f.doc("A"), f.doc("B"));

    let first = f
        .service
        .link(&a, &b, "refTo", None, &properties([("rev", Value::from(1))]))
        .unwrap();
    // read in between so the second write goes through a warm cache
    assert_eq!(f.service.get_links(&a, "refTo").unwrap().len(), 1);
    let second = f
        .service
        .link(&a, &b, "refTo", None, &properties([("rev", Value::from(2))]))
        .unwrap();
    assert_ne!(first.forward, second.forward);

    let links = f.service.get_links(&a, "refTo").unwrap();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].id, second.forward);
    assert_eq!(links[0].properties.get("rev"), Some(&Value::Int(2)));
    assert_eq!(f.backend.link_count(), 1);
    assert!(f.service.is_tombstoned(first.forward.unwrap()));
}

#[test]
fn test_link_twice_cold_cache() {
    let f = Fixture::new();
    let (a, b) = (f.doc("A"), f.doc("B"));

    f.service.link(&a, &b, "refTo", None, &PropertyMap::new()).unwrap();
    let second = f.service.link(&a, &b, "refTo", None, &PropertyMap::new()).unwrap();

    let links = f.service.get_links(&a, TypeFilter::All).unwrap();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].id, second.forward);
}

#[test]
fn test_replace_leaves_other_targets_alone() {
    let f = Fixture::new();
    let (a, b, c) = (f.doc("A"), f.doc("B"), f.doc("C"));

    f.service.link(&a, &b, "refTo", None, &PropertyMap::new()).unwrap();
    f.service.link(&a, &c, "refTo", None, &PropertyMap::new()).unwrap();
    f.service.link(&a, &b, "refTo", None, &PropertyMap::new()).unwrap();

    let mut targets: Vec<_> = f
        .service
        .get_links(&a, "refTo")
        .unwrap()
        .into_iter()
        .map(|l| l.to.id.to_string())
        .collect();
    targets.sort();
    assert_eq!(targets, vec!["B", "C"]);
}

// ============================================================================
// 2. Bidirectional links
// ============================================================================

#[test]
fn test_reverse_records_point_at_each_other() {
    let f = Fixture::new();
    let (a, b) = (f.doc("A"), f.doc("B"));

    let ids = f
        .service
        .link(&a, &b, "T", Some("T-rev"), &properties([("since", Value::from(2024))]))
        .unwrap();
    assert!(ids.is_pair());

    let back = f.service.get_links(&b, "T-rev").unwrap();
    assert_eq!(back.len(), 1);
    assert_eq!(back[0].to, a);
    assert_eq!(back[0].id, ids.reverse);
    assert_eq!(back[0].reverse_id, ids.forward);
    assert!(!back[0].primary);
    assert_eq!(back[0].properties.get("since"), Some(&Value::Int(2024)));

    let forth = f.service.get_links(&a, "T").unwrap();
    assert_eq!(forth.len(), 1);
    assert_eq!(forth[0].reverse_id, ids.reverse);
    assert!(forth[0].primary);
}

#[test]
fn test_unlink_removes_both_directions() {
    let f = Fixture::new();
    let (a, b) = (f.doc("A"), f.doc("B"));
    f.service.link(&a, &b, "T", Some("T-rev"), &PropertyMap::new()).unwrap();
    // warm both endpoints
    f.service.get_links(&a, TypeFilter::All).unwrap();
    f.service.get_links(&b, TypeFilter::All).unwrap();

    assert!(f.service.unlink(&a, &b, "T", Some("T-rev")).unwrap());
    assert!(f.service.get_links(&a, "T").unwrap().is_empty());
    assert!(f.service.get_links(&b, "T-rev").unwrap().is_empty());
    assert!(f.service.get_links_to(&a, "T-rev").unwrap().is_empty());
    assert_eq!(f.backend.link_count(), 0);
}

// ============================================================================
// 3. Unlink scenarios
// ============================================================================

#[test]
fn test_link_then_unlink_scenario() {
    let f = Fixture::new();
    let (a, b) = (f.doc("A"), f.doc("B"));

    f.service
        .link(&a, &b, "refTo", None, &properties([("note", Value::from("first"))]))
        .unwrap();
    let ids = f
        .service
        .link(&a, &b, "refTo", None, &properties([("note", Value::from("second"))]))
        .unwrap();
    let links = f.service.get_links(&a, "refTo").unwrap();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].properties.get("note"), Some(&Value::from("second")));

    assert!(f.service.unlink(&a, &b, "refTo", None).unwrap());
    assert!(f.service.get_links(&a, "refTo").unwrap().is_empty());
    assert!(f.service.is_tombstoned(ids.forward.unwrap()));

    // nothing left to remove
    assert!(!f.service.unlink(&a, &b, "refTo", None).unwrap());
}

#[test]
fn test_self_loop_unlink() {
    let f = Fixture::new();
    let a = f.doc("A");

    let ids = f.service.link(&a, &a, "T", Some("T-rev"), &PropertyMap::new()).unwrap();
    assert!(ids.is_pair());
    assert_eq!(f.backend.link_count(), 2);

    // relinking a self-loop replaces both records
    let again = f.service.link(&a, &a, "T", Some("T-rev"), &PropertyMap::new()).unwrap();
    assert_eq!(f.backend.link_count(), 2);

    assert!(f.service.unlink(&a, &a, "T", Some("T-rev")).unwrap());
    assert_eq!(f.backend.link_count(), 0);
    assert!(f.service.is_tombstoned(again.forward.unwrap()));
    assert!(f.service.is_tombstoned(again.reverse.unwrap()));
    assert!(f.service.get_links(&a, TypeFilter::All).unwrap().is_empty());
}

#[test]
fn test_self_reverse_self_loop_is_one_record() {
    let f = Fixture::new();
    let a = f.doc("A");

    f.service.link(&a, &a, "T", Some("T"), &PropertyMap::new()).unwrap();
    let ids = f.service.link(&a, &a, "T", Some("T"), &PropertyMap::new()).unwrap();
    assert_eq!(ids.forward, ids.reverse);
    assert_eq!(f.backend.link_count(), 1);

    let links = f.service.get_links(&a, "T").unwrap();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].id, ids.forward);
    assert_eq!(links[0].reverse_id, ids.forward);

    // unmapped simple types are their own reverse
    assert!(f.service.link_simple(&a, &a, "emf:references").unwrap());
    assert!(f.service.link_simple(&a, &a, "emf:references").unwrap());
    assert_eq!(f.service.get_simple_links(&a, "emf:references").unwrap().len(), 1);
    assert_eq!(f.backend.link_count(), 2);

    assert!(f.service.unlink(&a, &a, "T", Some("T")).unwrap());
    assert!(f.service.get_links(&a, "T").unwrap().is_empty());
}

#[test]
fn test_unlink_all_types_between_pair() {
    let f = Fixture::new();
    let (a, b, c) = (f.doc("A"), f.doc("B"), f.doc("C"));
    f.service.link(&a, &b, "T", None, &PropertyMap::new()).unwrap();
    f.service.link(&a, &b, "U", None, &PropertyMap::new()).unwrap();
    f.service.link(&a, &c, "T", None, &PropertyMap::new()).unwrap();

    assert!(f.service.unlink_all(&a, &b).unwrap());
    let left = f.service.get_links(&a, TypeFilter::All).unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].to, c);
}

#[test]
fn test_remove_links_for_instance() {
    let f = Fixture::new();
    let (a, b, c) = (f.doc("A"), f.doc("B"), f.doc("C"));
    f.service.link(&a, &b, "T", Some("T-rev"), &PropertyMap::new()).unwrap();
    f.service.link(&c, &a, "U", None, &PropertyMap::new()).unwrap();
    f.service.link(&b, &c, "T", None, &PropertyMap::new()).unwrap();

    assert!(f.service.remove_links_for(&a).unwrap());
    assert_eq!(f.backend.link_count(), 1);
    assert!(f.service.get_links(&c, "U").unwrap().is_empty());
    assert_eq!(f.service.get_links(&b, TypeFilter::All).unwrap().len(), 1);
    assert!(!f.service.remove_links_for(&a).unwrap());
}

#[test]
fn test_remove_link_record() {
    let f = Fixture::new();
    let (a, b) = (f.doc("A"), f.doc("B"));
    f.service.link(&a, &b, "T", None, &properties([("k", Value::from("v"))])).unwrap();

    let link = f.service.get_links(&a, "T").unwrap().remove(0);
    let id = link.id.unwrap();
    f.service.remove_link(&link).unwrap();

    assert!(f.service.get_links(&a, "T").unwrap().is_empty());
    assert!(f.backend.stored_properties(id).is_none());
    assert!(f.service.get_link_instance(id).unwrap().is_none());
}

// ============================================================================
// 4. Soft no-ops
// ============================================================================

#[test]
fn test_partial_endpoints_do_not_fail() {
    let f = Fixture::new();
    let a = f.doc("A");
    let missing: Option<&Instance> = None;

    assert_eq!(f.service.link(&a, missing, "T", None, &PropertyMap::new()).unwrap(), LinkIds::NONE);
    assert_eq!(f.service.link(missing, &a, "T", None, &PropertyMap::new()).unwrap(), LinkIds::NONE);
    assert!(!f.service.unlink(&a, missing, "T", None).unwrap());
    assert_eq!(f.backend.link_count(), 0);
}

#[test]
fn test_link_instance_resolves_endpoints() {
    let f = Fixture::new();
    let (a, b) = (f.doc("A"), f.doc("B"));
    let id = f.service.link(&a, &b, "T", None, &PropertyMap::new()).unwrap().forward.unwrap();

    let instance = f.service.get_link_instance(id).unwrap().unwrap();
    assert_eq!(instance.from.to_reference(), a);
    assert_eq!(instance.to.to_reference(), b);
    assert_eq!(instance.relation_type, "T");
}
