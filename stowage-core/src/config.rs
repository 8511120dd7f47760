//! Configuration types
//!
//! Region configuration is explicit: each cached entity type and each cached
//! association names its region, concurrency strategy and optional bounds.
//! Settings are validated once, when the cache is built.

use crate::{CacheError, CacheResult, ConcurrencyStrategy, ConfigError, SharedCacheMode};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

/// Configuration of one cache region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionConfig {
    #[serde(rename = "region")]
    pub name: String,
    pub strategy: ConcurrencyStrategy,
    /// Maximum number of entries; unbounded when absent.
    #[serde(default)]
    pub capacity: Option<usize>,
    /// Entry lifetime in seconds; entries never expire when absent.
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

impl RegionConfig {
    pub fn new(name: impl Into<String>, strategy: ConcurrencyStrategy) -> Self {
        Self {
            name: name.into(),
            strategy,
            capacity: None,
            ttl_secs: None,
        }
    }

    /// Bound the region to `capacity` entries (least recently used evicted first).
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Set the entry TTL, rounded up to whole seconds.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        let partial = u64::from(ttl.subsec_nanos() > 0);
        self.ttl_secs = Some(ttl.as_secs().saturating_add(partial));
        self
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_secs.map(Duration::from_secs)
    }

    fn validate(&self) -> CacheResult<()> {
        if self.name.trim().is_empty() {
            return Err(CacheError::Config(ConfigError::InvalidValue {
                field: "region".to_string(),
                value: self.name.clone(),
                reason: "region name must not be empty".to_string(),
            }));
        }

        if self.capacity == Some(0) {
            return Err(CacheError::Config(ConfigError::InvalidValue {
                field: format!("{}.capacity", self.name),
                value: "0".to_string(),
                reason: "capacity must be greater than 0".to_string(),
            }));
        }

        if self.ttl_secs == Some(0) {
            return Err(CacheError::Config(ConfigError::InvalidValue {
                field: format!("{}.ttl_secs", self.name),
                value: "0".to_string(),
                reason: "ttl must be positive".to_string(),
            }));
        }

        if !self.strategy.is_supported_in_process() {
            return Err(CacheError::Config(ConfigError::UnsupportedStrategy {
                region: self.name.clone(),
                strategy: self.strategy,
                reason: "requires a cluster-aware transactional cache provider".to_string(),
            }));
        }

        Ok(())
    }
}

/// Shared-cache configuration for one entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCacheConfig {
    pub type_name: String,
    #[serde(flatten)]
    pub region: RegionConfig,
}

/// Collection-cache configuration for one association of an owner type.
///
/// `owning_side` records which end of a bidirectional relationship holds the
/// foreign key. The cache itself only uses the owner type and name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssociationCacheConfig {
    pub owner_type: String,
    pub name: String,
    pub target_type: String,
    #[serde(default)]
    pub owning_side: bool,
    #[serde(flatten)]
    pub region: RegionConfig,
}

impl AssociationCacheConfig {
    /// Role name, e.g. `Guide.students`.
    pub fn role(&self) -> String {
        format!("{}.{}", self.owner_type, self.name)
    }
}

fn default_statistics_enabled() -> bool {
    true
}

/// Startup configuration of the whole cache layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default)]
    pub shared_cache_mode: SharedCacheMode,
    #[serde(default = "default_statistics_enabled")]
    pub statistics_enabled: bool,
    /// Entity types known to the persistence runtime. Only consulted by
    /// [`SharedCacheMode::All`].
    #[serde(default)]
    pub entity_types: Vec<String>,
    #[serde(default)]
    pub entities: Vec<EntityCacheConfig>,
    #[serde(default)]
    pub associations: Vec<AssociationCacheConfig>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            shared_cache_mode: SharedCacheMode::default(),
            statistics_enabled: true,
            entity_types: Vec::new(),
            entities: Vec::new(),
            associations: Vec::new(),
        }
    }
}

impl CacheSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mode(mut self, mode: SharedCacheMode) -> Self {
        self.shared_cache_mode = mode;
        self
    }

    pub fn with_statistics(mut self, enabled: bool) -> Self {
        self.statistics_enabled = enabled;
        self
    }

    pub fn declare_entity_type(mut self, type_name: impl Into<String>) -> Self {
        self.entity_types.push(type_name.into());
        self
    }

    /// Cache an entity type in the given region.
    pub fn with_entity(mut self, type_name: impl Into<String>, region: RegionConfig) -> Self {
        self.entities.push(EntityCacheConfig {
            type_name: type_name.into(),
            region,
        });
        self
    }

    /// Cache an association's id list in the given region.
    pub fn with_association(
        mut self,
        owner_type: impl Into<String>,
        name: impl Into<String>,
        target_type: impl Into<String>,
        owning_side: bool,
        region: RegionConfig,
    ) -> Self {
        self.associations.push(AssociationCacheConfig {
            owner_type: owner_type.into(),
            name: name.into(),
            target_type: target_type.into(),
            owning_side,
            region,
        });
        self
    }

    pub fn entity_config(&self, type_name: &str) -> Option<&EntityCacheConfig> {
        self.entities.iter().find(|e| e.type_name == type_name)
    }

    pub fn association_config(&self, owner_type: &str, name: &str) -> Option<&AssociationCacheConfig> {
        self.associations
            .iter()
            .find(|a| a.owner_type == owner_type && a.name == name)
    }

    /// Parse settings from TOML.
    pub fn from_toml_str(source: &str) -> CacheResult<Self> {
        toml::from_str(source).map_err(|e| {
            CacheError::Config(ConfigError::Parse {
                reason: e.to_string(),
            })
        })
    }

    /// Read and parse a TOML settings file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> CacheResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            CacheError::Config(ConfigError::Parse {
                reason: format!("{}: {}", path.display(), e),
            })
        })?;
        Self::from_toml_str(&source)
    }

    /// Validate the settings.
    /// Returns an error if any region or caching requirement is invalid.
    pub fn validate(&self) -> CacheResult<()> {
        let mut entity_types = HashSet::new();
        for entity in &self.entities {
            entity.region.validate()?;
            if !entity_types.insert(entity.type_name.as_str()) {
                return Err(CacheError::Config(ConfigError::DuplicateConfig {
                    what: format!("entity type {}", entity.type_name),
                }));
            }
        }

        let mut roles = HashSet::new();
        for association in &self.associations {
            association.region.validate()?;
            if !roles.insert(association.role()) {
                return Err(CacheError::Config(ConfigError::DuplicateConfig {
                    what: format!("association {}", association.role()),
                }));
            }
        }

        // A region holds one kind of value under one strategy.
        let mut regions: HashMap<&str, (bool, ConcurrencyStrategy)> = HashMap::new();
        let entity_regions = self.entities.iter().map(|e| (&e.region, true));
        let collection_regions = self.associations.iter().map(|a| (&a.region, false));
        for (region, holds_entities) in entity_regions.chain(collection_regions) {
            match regions.get(region.name.as_str()) {
                Some((kind, _)) if *kind != holds_entities => {
                    return Err(CacheError::Config(ConfigError::MixedRegionKind {
                        region: region.name.clone(),
                    }));
                }
                Some((_, strategy)) if *strategy != region.strategy => {
                    return Err(CacheError::Config(ConfigError::ConflictingStrategy {
                        region: region.name.clone(),
                        first: *strategy,
                        second: region.strategy,
                    }));
                }
                Some(_) => {}
                None => {
                    regions.insert(region.name.as_str(), (holds_entities, region.strategy));
                }
            }
        }

        if self.shared_cache_mode == SharedCacheMode::All {
            for type_name in &self.entity_types {
                if !entity_types.contains(type_name.as_str()) {
                    return Err(CacheError::Config(ConfigError::MissingRegion {
                        what: format!("entity type {}", type_name),
                    }));
                }
            }
        }

        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================


// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// A declared type without a region fails validation under `All` only.
        #[test]
        fn prop_mode_all_missing_type(type_name in "[A-Z][a-z]{2,10}") {
            let settings = CacheSettings::new()
                .with_mode(SharedCacheMode::All)
                .declare_entity_type(type_name.clone());
            prop_assert!(settings.validate().is_err());

            let cached = settings.with_entity(
                type_name.clone(),
                RegionConfig::new(type_name, ConcurrencyStrategy::ReadWrite),
            );
            prop_assert!(cached.validate().is_ok());
        }

        /// Any positive capacity is accepted.
        #[test]
        fn prop_positive_capacity_valid(capacity in 1usize..100_000) {
            let settings = CacheSettings::new().with_entity(
                "Guide",
                RegionConfig::new("Guide", ConcurrencyStrategy::NonstrictReadWrite)
                    .with_capacity(capacity),
            );
            prop_assert!(settings.validate().is_ok());
        }
    }
}
