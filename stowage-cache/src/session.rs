//! Units of work.
//!
//! A [`UnitOfWork`] is a short-lived session: it owns a private
//! [`UnitOfWorkCache`], tracks the instances it created or removed, and pushes
//! its changes through the coordinator on [`UnitOfWork::commit`]. It is meant
//! to be driven by one task at a time.

use std::sync::Arc;

use stowage_core::{AssociationKey, CacheError, CacheResult, EntityKey, FieldMap, IdSet, Identifier};
use tracing::{debug, warn};

use crate::coordinator::CacheCoordinator;
use crate::entity::ManagedEntity;
use crate::unit_of_work::UnitOfWorkCache;

/// Counts of the changes written by one commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitSummary {
    pub updated: usize,
    pub inserted: usize,
    pub deleted: usize,
}

impl CommitSummary {
    pub fn is_empty(&self) -> bool {
        self.updated == 0 && self.inserted == 0 && self.deleted == 0
    }
}

pub struct UnitOfWork {
    coordinator: Arc<CacheCoordinator>,
    cache: UnitOfWorkCache,
    inserted: Vec<ManagedEntity>,
    removed: Vec<ManagedEntity>,
    closed: bool,
}

impl std::fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("managed", &self.cache.len())
            .field("inserted", &self.inserted.len())
            .field("removed", &self.removed.len())
            .finish()
    }
}

impl UnitOfWork {
    pub(crate) fn new(coordinator: Arc<CacheCoordinator>) -> Self {
        Self {
            coordinator,
            cache: UnitOfWorkCache::new(),
            inserted: Vec::new(),
            removed: Vec::new(),
            closed: false,
        }
    }

    pub fn coordinator(&self) -> &Arc<CacheCoordinator> {
        &self.coordinator
    }

    /// Find an entity by type and id.
    pub async fn find(
        &mut self,
        type_name: &str,
        id: impl Into<Identifier>,
    ) -> CacheResult<ManagedEntity> {
        self.find_key(&EntityKey::new(type_name, id)).await
    }

    /// Find an entity by key. An instance removed in this unit of work is
    /// reported as not found.
    pub async fn find_key(&mut self, key: &EntityKey) -> CacheResult<ManagedEntity> {
        if self.is_removed(key) {
            return Err(CacheError::NotFound { key: key.clone() });
        }
        self.coordinator.resolve(&mut self.cache, key).await
    }

    /// Child ids of `owner`'s `name` association.
    pub async fn association_ids(&mut self, owner: &EntityKey, name: &str) -> CacheResult<IdSet> {
        let key = AssociationKey::new(owner.clone(), name);
        self.coordinator.resolve_association(&mut self.cache, &key).await
    }

    /// Live children of `owner`'s `name` association, in id-list order.
    ///
    /// Each child is resolved through the same two-level lookup as
    /// [`UnitOfWork::find`].
    pub async fn association(
        &mut self,
        owner: &EntityKey,
        name: &str,
        target_type: &str,
    ) -> CacheResult<Vec<ManagedEntity>> {
        let ids = self.association_ids(owner, name).await?;
        let mut children = Vec::with_capacity(ids.len());
        for id in ids.iter() {
            children.push(self.find(target_type, id.clone()).await?);
        }
        Ok(children)
    }

    /// Register a new instance, written to the source on commit.
    pub fn persist(
        &mut self,
        type_name: &str,
        id: impl Into<Identifier>,
        fields: FieldMap,
    ) -> CacheResult<ManagedEntity> {
        let key = EntityKey::new(type_name, id);
        if self.cache.contains(&key) {
            return Err(CacheError::AlreadyManaged { key });
        }
        self.removed.retain(|entity| entity.key() != &key);

        let entity = ManagedEntity::new(key, fields, None, false);
        self.cache.insert(entity.clone());
        self.inserted.push(entity.clone());
        Ok(entity)
    }

    /// Schedule an instance for deletion on commit.
    ///
    /// Removing an instance persisted in this unit of work just forgets it.
    pub fn remove(&mut self, entity: &ManagedEntity) {
        let key = entity.key();
        self.cache.remove(key);
        let pending = self.inserted.len();
        self.inserted.retain(|inserted| inserted.key() != key);
        if self.inserted.len() == pending && !self.is_removed(key) {
            self.removed.push(entity.clone());
        }
    }

    pub fn contains(&self, key: &EntityKey) -> bool {
        self.cache.contains(key)
    }

    /// Number of instances currently managed.
    pub fn managed_count(&self) -> usize {
        self.cache.len()
    }

    /// Whether commit would write anything.
    pub fn has_pending_changes(&self) -> bool {
        !self.inserted.is_empty() || !self.removed.is_empty() || !self.dirty_updates().is_empty()
    }

    fn is_removed(&self, key: &EntityKey) -> bool {
        self.removed.iter().any(|entity| entity.key() == key)
    }

    fn is_pending_insert(&self, key: &EntityKey) -> bool {
        self.inserted.iter().any(|entity| entity.key() == key)
    }

    fn dirty_updates(&self) -> Vec<ManagedEntity> {
        self.cache
            .dirty_entities()
            .into_iter()
            .filter(|entity| !self.is_pending_insert(entity.key()))
            .collect()
    }

    /// Write every pending change: updates, then inserts, then deletes.
    ///
    /// Stops at the first failure. Changes already written stay written; the
    /// failed change and everything after it remain pending.
    pub async fn commit(&mut self) -> CacheResult<CommitSummary> {
        let mut summary = CommitSummary::default();

        for entity in self.dirty_updates() {
            let version = self
                .coordinator
                .commit_update(entity.key(), &entity.fields(), entity.version())
                .await?;
            entity.mark_committed(version);
            summary.updated += 1;
        }

        while let Some(entity) = self.inserted.first().cloned() {
            let version = self
                .coordinator
                .commit_insert(entity.key(), &entity.fields())
                .await?;
            entity.mark_committed(version);
            self.inserted.remove(0);
            summary.inserted += 1;
        }

        while let Some(entity) = self.removed.first().cloned() {
            self.coordinator
                .commit_delete(entity.key(), entity.version())
                .await?;
            self.removed.remove(0);
            summary.deleted += 1;
        }

        debug!(
            updated = summary.updated,
            inserted = summary.inserted,
            deleted = summary.deleted,
            "unit of work committed"
        );
        Ok(summary)
    }

    /// End the unit of work, discarding its cache and any uncommitted changes.
    pub fn close(mut self) {
        self.discard();
    }

    fn discard(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if self.has_pending_changes() {
            warn!(
                inserted = self.inserted.len(),
                removed = self.removed.len(),
                "unit of work closed with uncommitted changes"
            );
        }
        self.cache.clear();
        self.inserted.clear();
        self.removed.clear();
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        self.discard();
    }
}
