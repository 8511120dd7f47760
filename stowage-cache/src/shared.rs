//! Process-wide shared cache.
//!
//! Maps region names to regions and entity types / association roles to the
//! regions that cache them. Also carries the manual eviction API and the
//! statistics registry.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use stowage_core::{CacheResult, CacheSettings, Clock, EntityKey, Identifier, RegionConfig, SystemClock};
use tracing::{debug, info};

use crate::key::CacheKey;
use crate::region::Region;
use crate::statistics::{Statistics, StatisticsSnapshot};

/// The shared (second-level) cache.
pub struct SharedCache {
    regions: DashMap<String, Arc<Region>>,
    /// Entity type name to region name.
    entity_regions: DashMap<String, String>,
    /// Association role (`Owner.name`) to region name.
    collection_regions: DashMap<String, String>,
    statistics: Statistics,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for SharedCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedCache")
            .field("regions", &self.region_names())
            .field("statistics", &self.statistics)
            .finish()
    }
}

impl Default for SharedCache {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl SharedCache {
    /// Create an empty shared cache with statistics enabled.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            regions: DashMap::new(),
            entity_regions: DashMap::new(),
            collection_regions: DashMap::new(),
            statistics: Statistics::new(true),
            clock,
        }
    }

    /// Build the regions described by validated settings.
    pub fn from_settings(settings: &CacheSettings, clock: Arc<dyn Clock>) -> CacheResult<Self> {
        settings.validate()?;

        let cache = Self::new(clock);
        cache.statistics.set_enabled(settings.statistics_enabled);
        if !settings.shared_cache_mode.is_enabled() {
            info!("shared cache disabled by configuration");
            return Ok(cache);
        }

        for entity in &settings.entities {
            cache.get_region(&entity.region.name, &entity.region);
            cache.register_entity_type(&entity.type_name, &entity.region.name);
        }
        for association in &settings.associations {
            cache.get_region(&association.region.name, &association.region);
            cache.register_collection_role(&association.role(), &association.region.name);
        }

        info!(regions = cache.regions.len(), "shared cache regions built");
        Ok(cache)
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Get a region, creating it with `config` on first use.
    ///
    /// Later calls return the existing region and ignore `config`.
    pub fn get_region(&self, name: &str, config: &RegionConfig) -> Arc<Region> {
        let entry = self.regions.entry(name.to_string()).or_insert_with(|| {
            let mut config = config.clone();
            config.name = name.to_string();
            debug!(region = name, strategy = %config.strategy, capacity = ?config.capacity, "region created");
            Arc::new(Region::new(config, Arc::clone(&self.clock)))
        });
        Arc::clone(entry.value())
    }

    pub fn region(&self, name: &str) -> Option<Arc<Region>> {
        self.regions.get(name).map(|r| Arc::clone(r.value()))
    }

    /// Names of all regions, sorted.
    pub fn region_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.regions.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }

    pub fn register_entity_type(&self, type_name: &str, region_name: &str) {
        self.entity_regions
            .insert(type_name.to_string(), region_name.to_string());
    }

    pub fn register_collection_role(&self, role: &str, region_name: &str) {
        self.collection_regions
            .insert(role.to_string(), region_name.to_string());
    }

    /// Region caching snapshots of `type_name`, if the type is cached.
    pub fn entity_region(&self, type_name: &str) -> Option<Arc<Region>> {
        let region_name = self.entity_regions.get(type_name)?.value().clone();
        self.region(&region_name)
    }

    /// Region caching the `name` association of `owner_type`, if configured.
    pub fn collection_region(&self, owner_type: &str, name: &str) -> Option<Arc<Region>> {
        let role = format!("{}.{}", owner_type, name);
        let region_name = self.collection_regions.get(&role)?.value().clone();
        self.region(&region_name)
    }

    /// Evict every cached instance of an entity type.
    pub fn evict_entity_type(&self, type_name: &str) -> usize {
        let Some(region) = self.entity_region(type_name) else {
            return 0;
        };
        let removed = region.evict_where(
            |key| matches!(key, CacheKey::Entity(entity) if entity.type_name() == type_name),
        );
        debug!(type_name, removed, "evicted entity type");
        removed
    }

    /// Evict one cached entity instance.
    pub fn evict_entity(&self, type_name: &str, id: impl Into<Identifier>) -> bool {
        let key = CacheKey::Entity(EntityKey::new(type_name, id));
        let removed = self
            .entity_region(type_name)
            .map(|region| region.evict(&key))
            .unwrap_or(false);
        debug!(key = %key, removed, "evicted entity");
        removed
    }

    pub fn contains_entity(&self, type_name: &str, id: impl Into<Identifier>) -> bool {
        let key = CacheKey::Entity(EntityKey::new(type_name, id));
        self.entity_region(type_name)
            .map(|region| region.contains(&key))
            .unwrap_or(false)
    }

    /// Evict every cached instance of one association role.
    pub fn evict_collection_role(&self, owner_type: &str, name: &str) -> usize {
        let Some(region) = self.collection_region(owner_type, name) else {
            return 0;
        };
        let removed = region.evict_where(|key| {
            matches!(key, CacheKey::Association(assoc)
                if assoc.owner().type_name() == owner_type && assoc.name() == name)
        });
        debug!(owner_type, name, removed, "evicted collection role");
        removed
    }

    /// Evict the cached id list of one association instance.
    pub fn evict_collection(&self, owner: &EntityKey, name: &str) -> bool {
        let key = CacheKey::Association(owner.association(name));
        self.collection_region(owner.type_name(), name)
            .map(|region| region.evict(&key))
            .unwrap_or(false)
    }

    /// Evict the cached id lists of every association owned by `owner`.
    pub fn evict_collections_of(&self, owner: &EntityKey) -> usize {
        let prefix = format!("{}.", owner.type_name());
        let mut region_names: Vec<String> = self
            .collection_regions
            .iter()
            .filter(|role| role.key().starts_with(&prefix))
            .map(|role| role.value().clone())
            .collect();
        region_names.sort();
        region_names.dedup();

        let removed: usize = region_names
            .iter()
            .filter_map(|name| self.region(name))
            .map(|region| {
                region.evict_where(
                    |key| matches!(key, CacheKey::Association(assoc) if assoc.owner() == owner),
                )
            })
            .sum();
        debug!(owner = %owner, removed, "evicted collections of owner");
        removed
    }

    /// Clear every region.
    pub fn evict_all(&self) {
        for region in self.regions.iter() {
            region.value().evict_all();
        }
        debug!(regions = self.regions.len(), "evicted all regions");
    }

    /// Counter registry shared with the coordinator.
    pub fn statistics_registry(&self) -> &Statistics {
        &self.statistics
    }

    /// Counters of one region, or `None` for an unknown region.
    pub fn statistics(&self, region_name: &str) -> Option<StatisticsSnapshot> {
        let region = self.region(region_name)?;
        Some(self.statistics.snapshot(region_name, region.len()))
    }
}
