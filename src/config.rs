//! Service configuration.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Sizing for one cache tier. Missing fields take the defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of entries held across all shards.
    pub max_entries: usize,
    /// Entries not read for this long are dropped on next access. `0` disables idle expiry.
    pub max_idle_ms: u64,
    /// Number of independently locked shards.
    pub shards: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { max_entries: 2_000, max_idle_ms: 600_000, shards: 8 }
    }
}

impl CacheConfig {
    pub fn max_idle(&self) -> Option<Duration> {
        (self.max_idle_ms > 0).then(|| Duration::from_millis(self.max_idle_ms))
    }
}

/// Configuration for [`LinkService`](crate::LinkService).
///
/// All fields have defaults, so a partial JSON document is enough:
///
/// ```rust
/// let config = relink::LinkServiceConfig::from_json(r#"{"tombstone_capacity": 512}"#).unwrap();
/// assert_eq!(config.tombstone_capacity, 512);
/// assert_eq!(config.endpoint_cache.max_entries, 2000);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkServiceConfig {
    /// Tier-1: endpoint → relation types known for it.
    pub endpoint_cache: CacheConfig,
    /// Tier-2: (relation type, endpoint) → links.
    pub link_cache: CacheConfig,
    /// How many recently deleted link ids are remembered.
    pub tombstone_capacity: usize,
    /// Type filters up to this size read Tier-2 directly instead of loading the endpoint.
    pub direct_type_threshold: usize,
    /// Written as `createdBy` on links created by `save_relations`.
    pub system_actor: String,
    /// Extra reverse pairs on top of the built-in table.
    pub reverse_types: BTreeMap<String, String>,
}

impl Default for LinkServiceConfig {
    fn default() -> Self {
        Self {
            endpoint_cache: CacheConfig::default(),
            link_cache: CacheConfig { max_entries: 10_000, shards: 16, ..CacheConfig::default() },
            tombstone_capacity: 2_048,
            direct_type_threshold: 4,
            system_actor: "system".into(),
            reverse_types: BTreeMap::new(),
        }
    }
}

impl LinkServiceConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("invalid link service config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, cache) in [("endpoint_cache", &self.endpoint_cache), ("link_cache", &self.link_cache)] {
            if cache.max_entries == 0 {
                return Err(Error::Config(format!("{name}.max_entries must be positive")));
            }
            if cache.shards == 0 {
                return Err(Error::Config(format!("{name}.shards must be positive")));
            }
        }
        if self.tombstone_capacity == 0 {
            return Err(Error::Config("tombstone_capacity must be positive".into()));
        }
        Ok(())
    }
}
