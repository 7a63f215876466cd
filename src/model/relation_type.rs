//! Relation-type identifiers: simple-link encoding and the reverse table.

use std::collections::BTreeMap;

/// Suffix that marks a one-directional ("simple") relation type in storage.
pub const SIMPLE_SUFFIX: &str = "-simple";

pub const PART_OF: &str = "emf:partOf";
pub const HAS_CHILD: &str = "emf:hasChild";
pub const PROCESSES: &str = "emf:processes";
pub const PROCESSED_BY: &str = "emf:processedBy";

/// Encode a relation type as its simple-link storage form.
pub fn encode_simple(relation_type: &str) -> String {
    format!("{relation_type}{SIMPLE_SUFFIX}")
}

/// Strip the simple-link suffix if present.
pub fn decode_simple(relation_type: &str) -> &str {
    relation_type.strip_suffix(SIMPLE_SUFFIX).unwrap_or(relation_type)
}

pub fn is_simple(relation_type: &str) -> bool {
    relation_type.ends_with(SIMPLE_SUFFIX)
}

/// Maps relation types to their semantic reverse (`partOf ↔ hasChild`).
///
/// Matching is by suffix of the short name so namespaced identifiers
/// (`emf:partOf`, `ptop:partOf`) resolve the same way. Types with no entry
/// are their own reverse.
#[derive(Debug, Clone)]
pub struct RelationTypes {
    /// (suffix, reverse) pairs, longest suffix first.
    reverse: Vec<(String, String)>,
}

impl Default for RelationTypes {
    fn default() -> Self {
        Self::with_pairs([(PART_OF, HAS_CHILD), (PROCESSES, PROCESSED_BY)])
    }
}

impl RelationTypes {
    /// Build a table from symmetric pairs: each pair is registered both ways.
    pub fn with_pairs<A, B>(pairs: impl IntoIterator<Item = (A, B)>) -> Self
    where
        A: Into<String>,
        B: Into<String>,
    {
        let mut table = Self { reverse: Vec::new() };
        for (a, b) in pairs {
            table.insert(a, b);
        }
        table
    }

    /// Register `a ↔ b`.
    pub fn insert(&mut self, a: impl Into<String>, b: impl Into<String>) {
        let (a, b) = (a.into(), b.into());
        self.reverse.retain(|(k, _)| short_name(k) != short_name(&a) && short_name(k) != short_name(&b));
        self.reverse.push((a.clone(), b.clone()));
        self.reverse.push((b, a));
        self.reverse.sort_by(|(x, _), (y, _)| short_name(y).len().cmp(&short_name(x).len()));
    }

    /// Merge extra pairs, e.g. from configuration.
    pub fn extend(&mut self, pairs: &BTreeMap<String, String>) {
        for (a, b) in pairs {
            self.insert(a.as_str(), b.as_str());
        }
    }

    /// The reverse of `relation_type`, or the type itself when unmapped.
    /// A simple-encoded type yields a simple-encoded reverse.
    pub fn reverse_of(&self, relation_type: &str) -> String {
        if is_simple(relation_type) {
            return encode_simple(&self.reverse_of(decode_simple(relation_type)));
        }
        self.reverse
            .iter()
            .find(|(key, _)| relation_type.ends_with(short_name(key)))
            .map(|(_, rev)| rev.clone())
            .unwrap_or_else(|| relation_type.to_owned())
    }
}

/// Part after the namespace prefix (`emf:partOf` → `partOf`).
fn short_name(relation_type: &str) -> &str {
    relation_type
        .rsplit_once(':')
        .map_or(relation_type, |(_, local)| local)
}
