//! PropertyMap: the ordered key-value store on links and instances.

use std::collections::BTreeMap;
use super::Value;

/// A map of property names to values, iterated in key order.
pub type PropertyMap = BTreeMap<String, Value>;

/// Build a PropertyMap from (key, value) pairs.
pub fn properties<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> PropertyMap
where
    K: Into<String>,
    V: Into<Value>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
}
