//! Relation diff: the links to add and remove so that an instance's
//! relations of some types become exactly a desired set.
//!
//! Everything here is pure. [`LinkService::relations_diff`] loads the current
//! relations and calls [`compute`]; [`LinkService::save_relations`] applies
//! the result.
//!
//! [`LinkService::relations_diff`]: crate::LinkService::relations_diff
//! [`LinkService::save_relations`]: crate::LinkService::save_relations

use std::collections::{BTreeMap, BTreeSet};

use crate::model::{InstanceReference, LinkReference};

/// Relation type → targets.
pub type RelationMap = BTreeMap<String, BTreeSet<InstanceReference>>;

/// Links to create and links to remove, all starting at the same source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelationDiff {
    pub to_add: Vec<LinkReference>,
    pub to_remove: Vec<LinkReference>,
}

impl RelationDiff {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// Group links into a [`RelationMap`] keyed by relation type.
pub fn relation_map(links: &[LinkReference]) -> RelationMap {
    let mut map = RelationMap::new();
    for link in links {
        map.entry(link.relation_type.clone()).or_default().insert(link.to.clone());
    }
    map
}

/// `current` with every type named in `desired` overwritten by the desired
/// targets. Types `desired` does not name keep their current targets.
pub fn merge(current: &RelationMap, desired: &RelationMap) -> RelationMap {
    let mut merged = current.clone();
    for (relation_type, targets) in desired {
        merged.insert(relation_type.clone(), targets.clone());
    }
    merged
}

/// Minimal changes turning `current` into [`merge`]`(current, desired)`.
///
/// Output is ordered by relation type, then by target.
pub fn compute(source: &InstanceReference, current: &RelationMap, desired: &RelationMap) -> RelationDiff {
    let merged = merge(current, desired);
    let empty = BTreeSet::new();
    let mut diff = RelationDiff::default();

    let types: BTreeSet<&String> = current.keys().chain(merged.keys()).collect();
    for relation_type in types {
        let before = current.get(relation_type).unwrap_or(&empty);
        let after = merged.get(relation_type).unwrap_or(&empty);
        if before == after {
            continue;
        }
        let link = |target: &InstanceReference| {
            LinkReference::new(source.clone(), target.clone(), relation_type.as_str())
        };
        diff.to_remove.extend(before.difference(after).map(link));
        diff.to_add.extend(after.difference(before).map(link));
    }
    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TypeDescriptor;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn reference(id: &str) -> InstanceReference {
        InstanceReference::new(id, TypeDescriptor::new("documentinstance", "document"))
    }

    fn targets(ids: &[&str]) -> BTreeSet<InstanceReference> {
        ids.iter().map(|id| reference(id)).collect()
    }

    fn pairs(links: &[LinkReference]) -> Vec<(String, String)> {
        links.iter().map(|l| (l.relation_type.clone(), l.to.id.to_string())).collect()
    }

    #[test]
    fn test_replaces_one_target() {
        let current = RelationMap::from([("refTo".to_string(), targets(&["B", "D"]))]);
        let desired = RelationMap::from([("refTo".to_string(), targets(&["B", "C"]))]);

        let diff = compute(&reference("A"), &current, &desired);
        assert_eq!(pairs(&diff.to_add), vec![("refTo".into(), "C".into())]);
        assert_eq!(pairs(&diff.to_remove), vec![("refTo".into(), "D".into())]);
        assert!(diff.to_add.iter().all(|l| l.from == reference("A")));
    }

    #[test]
    fn test_unmentioned_types_untouched() {
        let current = RelationMap::from([
            ("refTo".to_string(), targets(&["B"])),
            ("partOf".to_string(), targets(&["P"])),
        ]);
        let desired = RelationMap::from([("refTo".to_string(), targets(&["B"]))]);
        assert!(compute(&reference("A"), &current, &desired).is_empty());
    }

    #[test]
    fn test_empty_desired_set_removes_everything() {
        let current = RelationMap::from([("refTo".to_string(), targets(&["B", "C"]))]);
        let desired = RelationMap::from([("refTo".to_string(), BTreeSet::new())]);

        let diff = compute(&reference("A"), &current, &desired);
        assert!(diff.to_add.is_empty());
        assert_eq!(diff.to_remove.len(), 2);
    }

    #[test]
    fn test_new_type_is_all_adds() {
        let desired = RelationMap::from([("hasChild".to_string(), targets(&["X", "Y"]))]);
        let diff = compute(&reference("A"), &RelationMap::new(), &desired);
        assert_eq!(diff.to_add.len(), 2);
        assert!(diff.to_remove.is_empty());
    }

    #[test]
    fn test_empty_desired_map_is_noop() {
        let current = RelationMap::from([("refTo".to_string(), targets(&["B"]))]);
        assert!(compute(&reference("A"), &current, &RelationMap::new()).is_empty());
    }

    #[test]
    fn test_relation_map_groups_by_type() {
        let a = reference("A");
        let links = vec![
            LinkReference::new(a.clone(), reference("B"), "refTo"),
            LinkReference::new(a.clone(), reference("C"), "refTo"),
            LinkReference::new(a.clone(), reference("P"), "partOf"),
        ];
        let map = relation_map(&links);
        assert_eq!(map["refTo"], targets(&["B", "C"]));
        assert_eq!(map["partOf"], targets(&["P"]));
    }

    fn apply(current: &RelationMap, diff: &RelationDiff) -> RelationMap {
        let mut result = current.clone();
        for link in &diff.to_add {
            result.entry(link.relation_type.clone()).or_default().insert(link.to.clone());
        }
        for link in &diff.to_remove {
            if let Some(set) = result.get_mut(&link.relation_type) {
                set.remove(&link.to);
            }
        }
        result.retain(|_, set| !set.is_empty());
        result
    }

    fn relation_maps() -> impl Strategy<Value = RelationMap> {
        prop::collection::btree_map(
            "[abc]",
            prop::collection::btree_set("[1-5]", 0..4),
            0..3,
        )
        .prop_map(|map| {
            map.into_iter()
                .map(|(t, ids)| (t, ids.iter().map(|id| reference(id)).collect()))
                .collect::<RelationMap>()
        })
    }

    proptest! {
        #[test]
        fn prop_diff_reaches_merged(current in relation_maps(), desired in relation_maps()) {
            let diff = compute(&reference("S"), &current, &desired);
            let mut expected = merge(&current, &desired);
            expected.retain(|_, set| !set.is_empty());
            prop_assert_eq!(apply(&current, &diff), expected);
        }

        #[test]
        fn prop_diff_is_minimal(current in relation_maps(), desired in relation_maps()) {
            let diff = compute(&reference("S"), &current, &desired);
            let added: BTreeSet<_> = pairs(&diff.to_add).into_iter().collect();
            let removed: BTreeSet<_> = pairs(&diff.to_remove).into_iter().collect();
            prop_assert!(added.is_disjoint(&removed));
            prop_assert_eq!(added.len(), diff.to_add.len());
            prop_assert_eq!(removed.len(), diff.to_remove.len());
            for link in &diff.to_add {
                prop_assert!(!current.get(&link.relation_type).is_some_and(|s| s.contains(&link.to)));
            }
            for link in &diff.to_remove {
                prop_assert!(current[&link.relation_type].contains(&link.to));
            }
        }
    }
}
