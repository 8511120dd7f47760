//! Unit-of-work (first-level) cache.
//!
//! An identity map private to one unit of work. Resolving the same key twice
//! yields the same [`ManagedEntity`]; the loader runs at most once per key.
//! Nothing here is shared between units of work, so no locking is needed.

use std::collections::HashMap;
use std::future::Future;

use stowage_core::{AssociationKey, CacheResult, EntityKey, IdSet};
use tracing::trace;

use crate::entity::ManagedEntity;

#[derive(Debug, Default)]
pub struct UnitOfWorkCache {
    entities: HashMap<EntityKey, ManagedEntity>,
    collections: HashMap<AssociationKey, IdSet>,
}

impl UnitOfWorkCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the managed instance for `key`, calling `load` only on a miss.
    ///
    /// A failed load leaves the cache unchanged.
    pub async fn resolve<F, Fut>(&mut self, key: &EntityKey, load: F) -> CacheResult<ManagedEntity>
    where
        F: FnOnce(EntityKey) -> Fut,
        Fut: Future<Output = CacheResult<ManagedEntity>>,
    {
        if let Some(entity) = self.entities.get(key) {
            trace!(key = %key, "unit-of-work hit");
            return Ok(entity.clone());
        }

        let entity = load(key.clone()).await?;
        self.entities.insert(key.clone(), entity.clone());
        Ok(entity)
    }

    /// Association counterpart of [`UnitOfWorkCache::resolve`].
    pub async fn resolve_collection<F, Fut>(
        &mut self,
        key: &AssociationKey,
        load: F,
    ) -> CacheResult<IdSet>
    where
        F: FnOnce(AssociationKey) -> Fut,
        Fut: Future<Output = CacheResult<IdSet>>,
    {
        if let Some(ids) = self.collections.get(key) {
            trace!(key = %key, "unit-of-work collection hit");
            return Ok(ids.clone());
        }

        let ids = load(key.clone()).await?;
        self.collections.insert(key.clone(), ids.clone());
        Ok(ids)
    }

    pub fn get(&self, key: &EntityKey) -> Option<ManagedEntity> {
        self.entities.get(key).cloned()
    }

    pub fn contains(&self, key: &EntityKey) -> bool {
        self.entities.contains_key(key)
    }

    /// Register an instance created inside this unit of work.
    ///
    /// Returns the instance previously registered under the same key, if any.
    pub fn insert(&mut self, entity: ManagedEntity) -> Option<ManagedEntity> {
        self.entities.insert(entity.key().clone(), entity)
    }

    pub fn remove(&mut self, key: &EntityKey) -> Option<ManagedEntity> {
        self.entities.remove(key)
    }

    pub fn get_collection(&self, key: &AssociationKey) -> Option<IdSet> {
        self.collections.get(key).cloned()
    }

    pub fn remove_collection(&mut self, key: &AssociationKey) -> Option<IdSet> {
        self.collections.remove(key)
    }

    /// Instances with uncommitted field changes, in key order.
    pub fn dirty_entities(&self) -> Vec<ManagedEntity> {
        let mut dirty: Vec<ManagedEntity> = self
            .entities
            .values()
            .filter(|entity| entity.is_dirty())
            .cloned()
            .collect();
        dirty.sort_by(|a, b| a.key().to_string().cmp(&b.key().to_string()));
        dirty
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Drop every managed instance and resolved association.
    pub fn clear(&mut self) {
        self.entities.clear();
        self.collections.clear();
    }
}
