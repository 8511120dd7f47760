//! Two-level lookup and write coordination.
//!
//! Lookups walk `CHECK_UOW -> CHECK_SHARED -> LOAD_FROM_SOURCE -> POPULATE`:
//! the unit-of-work cache first, then the entity type's shared region, then the
//! loader. A load result is written back to the region before the caller gets
//! its live instance. Misses on the same key are coalesced so one load serves
//! every concurrent caller.
//!
//! Committed writes keep the shared cache consistent according to the region's
//! concurrency strategy:
//!
//! | strategy               | update                                 | delete               |
//! |------------------------|----------------------------------------|----------------------|
//! | `read_only`            | rejected with `ReadOnlyViolation`      | write, then evict    |
//! | `read_write`           | soft lock, write, replace entry        | soft lock, write, drop entry |
//! | `nonstrict_read_write` | write, then evict                      | write, then evict    |
//!
//! The shared cache never stores negative results.

use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use stowage_core::{
    AssociationKey, CacheError, CacheResult, CacheSettings, Clock, ConcurrencyStrategy,
    EntityKey, EntityRow, EntitySnapshot, EntitySource, FieldMap, IdSet, SystemClock, Version,
};
use tokio::sync::OnceCell;
use tracing::{debug, trace, warn};

use crate::entity::ManagedEntity;
use crate::key::{CacheKey, CachedValue};
use crate::region::{Lookup, Region, SoftLockGuard};
use crate::session::UnitOfWork;
use crate::shared::SharedCache;
use crate::statistics::{Statistics, StatisticsSnapshot};
use crate::unit_of_work::UnitOfWorkCache;

type InFlight<K, V> = DashMap<K, Arc<OnceCell<CacheResult<V>>>>;

/// Run `load` once for every concurrent caller asking for `key`.
///
/// The first caller to arrive drives `load`; the rest await its result. The
/// marker is removed once the load settles, so a later call loads afresh.
async fn coalesce<K, V, F, Fut>(in_flight: &InFlight<K, V>, key: &K, load: F) -> CacheResult<V>
where
    K: Eq + Hash + Clone,
    V: Clone,
    F: FnOnce() -> Fut,
    Fut: Future<Output = CacheResult<V>>,
{
    let cell = Arc::clone(in_flight.entry(key.clone()).or_default().value());
    let result = cell.get_or_init(load).await.clone();
    in_flight.remove_if(key, |_, current| Arc::ptr_eq(current, &cell));
    result
}

/// Entry point to the two-level cache.
///
/// Owns the shared cache and the backing source. Hand out units of work with
/// [`CacheCoordinator::begin`].
pub struct CacheCoordinator {
    shared: Arc<SharedCache>,
    source: Arc<dyn EntitySource>,
    settings: CacheSettings,
    entity_loads: InFlight<EntityKey, EntityRow>,
    collection_loads: InFlight<AssociationKey, IdSet>,
}

impl fmt::Debug for CacheCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheCoordinator")
            .field("shared", &self.shared)
            .field("entity_loads", &self.entity_loads.len())
            .field("collection_loads", &self.collection_loads.len())
            .finish()
    }
}

impl CacheCoordinator {
    /// Build a coordinator from settings, failing fast on invalid configuration.
    pub fn new(settings: CacheSettings, source: Arc<dyn EntitySource>) -> CacheResult<Self> {
        Self::with_clock(settings, source, Arc::new(SystemClock))
    }

    /// Same as [`CacheCoordinator::new`] with an explicit clock for TTL checks.
    pub fn with_clock(
        settings: CacheSettings,
        source: Arc<dyn EntitySource>,
        clock: Arc<dyn Clock>,
    ) -> CacheResult<Self> {
        let shared = Arc::new(SharedCache::from_settings(&settings, clock)?);
        debug!(
            mode = ?settings.shared_cache_mode,
            regions = ?shared.region_names(),
            "cache coordinator ready"
        );
        Ok(Self {
            shared,
            source,
            settings,
            entity_loads: DashMap::new(),
            collection_loads: DashMap::new(),
        })
    }

    /// Open a new unit of work.
    pub fn begin(self: &Arc<Self>) -> UnitOfWork {
        UnitOfWork::new(Arc::clone(self))
    }

    pub fn shared(&self) -> &Arc<SharedCache> {
        &self.shared
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    /// Counters of one region, or `None` for an unknown region.
    pub fn statistics(&self, region: &str) -> Option<StatisticsSnapshot> {
        self.shared.statistics(region)
    }

    fn stats(&self) -> &Statistics {
        self.shared.statistics_registry()
    }

    /// Whether `type_name` has a shared region.
    pub fn is_cached(&self, type_name: &str) -> bool {
        self.shared.entity_region(type_name).is_some()
    }

    // ========================================================================
    // READ PATH
    // ========================================================================

    /// Resolve `key` to its live instance in `uow`.
    ///
    /// Returns `NotFound` if the source has no row; that outcome is not cached
    /// at either level.
    #[tracing::instrument(level = "debug", skip(self, uow), fields(key = %key))]
    pub async fn resolve(
        &self,
        uow: &mut UnitOfWorkCache,
        key: &EntityKey,
    ) -> CacheResult<ManagedEntity> {
        uow.resolve(key, |key| async move { self.resolve_shared(&key).await })
            .await
    }

    async fn resolve_shared(&self, key: &EntityKey) -> CacheResult<ManagedEntity> {
        let Some(region) = self.shared.entity_region(key.type_name()) else {
            trace!(key = %key, "type not cached, loading from source");
            let row = self.load_entity(key, None).await?;
            return Ok(materialize(key, &EntitySnapshot::from_row(&row), false));
        };

        let read_only = region.strategy() == ConcurrencyStrategy::ReadOnly;
        let cache_key = CacheKey::Entity(key.clone());
        loop {
            match region.get(&cache_key) {
                Lookup::Hit(value) => {
                    if let Some(snapshot) = value.into_snapshot() {
                        self.stats().record_hit(region.name());
                        trace!(key = %key, region = region.name(), "shared cache hit");
                        return Ok(materialize(key, &snapshot, read_only));
                    }
                    break;
                }
                Lookup::Locked(waiter) => {
                    trace!(key = %key, "entry soft-locked, waiting");
                    waiter.wait().await;
                }
                Lookup::Miss => break,
            }
        }

        self.stats().record_miss(region.name());
        trace!(key = %key, region = region.name(), "shared cache miss");
        let row = self.load_entity(key, Some(&region)).await?;
        Ok(materialize(key, &EntitySnapshot::from_row(&row), read_only))
    }

    /// Load one row, coalesced per key, populating `region` when given.
    async fn load_entity(
        &self,
        key: &EntityKey,
        region: Option<&Arc<Region>>,
    ) -> CacheResult<EntityRow> {
        coalesce(&self.entity_loads, key, || async {
            let stamp = region.map(|region| region.begin_load());
            let row = self
                .source
                .load(key)
                .await?
                .ok_or_else(|| CacheError::NotFound { key: key.clone() })?;
            debug!(key = %key, version = ?row.version, "loaded from source");

            if let (Some(region), Some(stamp)) = (region, stamp) {
                let value = CachedValue::Entity(EntitySnapshot::from_row(&row));
                if region.put_from_load(CacheKey::Entity(key.clone()), value, stamp) {
                    self.stats().record_put(region.name());
                    trace!(key = %key, region = region.name(), "shared cache populated");
                }
            }
            Ok(row)
        })
        .await
    }

    /// Resolve the child ids of an association instance.
    ///
    /// The id list is shared-cached only when a collection region is
    /// configured for the association; otherwise every unit of work asks the
    /// loader once.
    #[tracing::instrument(level = "debug", skip(self, uow), fields(key = %key))]
    pub async fn resolve_association(
        &self,
        uow: &mut UnitOfWorkCache,
        key: &AssociationKey,
    ) -> CacheResult<IdSet> {
        uow.resolve_collection(key, |key| async move { self.resolve_collection_shared(&key).await })
            .await
    }

    async fn resolve_collection_shared(&self, key: &AssociationKey) -> CacheResult<IdSet> {
        let Some(region) = self
            .shared
            .collection_region(key.owner().type_name(), key.name())
        else {
            trace!(key = %key, "association not cached, loading from source");
            return self.load_collection(key, None).await;
        };

        let cache_key = CacheKey::Association(key.clone());
        loop {
            match region.get(&cache_key) {
                Lookup::Hit(value) => {
                    if let Some(ids) = value.into_ids() {
                        self.stats().record_hit(region.name());
                        trace!(key = %key, region = region.name(), "collection cache hit");
                        return Ok(ids);
                    }
                    break;
                }
                Lookup::Locked(waiter) => waiter.wait().await,
                Lookup::Miss => break,
            }
        }

        self.stats().record_miss(region.name());
        self.load_collection(key, Some(&region)).await
    }

    async fn load_collection(
        &self,
        key: &AssociationKey,
        region: Option<&Arc<Region>>,
    ) -> CacheResult<IdSet> {
        coalesce(&self.collection_loads, key, || async {
            let stamp = region.map(|region| region.begin_load());
            let ids = IdSet::new(self.source.load_association(key).await?);
            debug!(key = %key, children = ids.len(), "association loaded from source");

            if let (Some(region), Some(stamp)) = (region, stamp) {
                let value = CachedValue::Collection(ids.clone());
                if region.put_from_load(CacheKey::Association(key.clone()), value, stamp) {
                    self.stats().record_put(region.name());
                }
            }
            Ok(ids)
        })
        .await
    }

    // ========================================================================
    // WRITE PATH
    // ========================================================================

    /// Commit new field values for an existing row and reconcile the cache.
    ///
    /// `expected` is the version the caller read. Returns the version after
    /// the write.
    #[tracing::instrument(level = "debug", skip(self, fields), fields(key = %key))]
    pub async fn commit_update(
        &self,
        key: &EntityKey,
        fields: &FieldMap,
        expected: Option<Version>,
    ) -> CacheResult<Option<Version>> {
        let Some(region) = self.shared.entity_region(key.type_name()) else {
            return self.source.update(key, fields, expected).await;
        };

        let cache_key = CacheKey::Entity(key.clone());
        match region.strategy() {
            ConcurrencyStrategy::ReadOnly => {
                Err(CacheError::ReadOnlyViolation { key: key.clone() })
            }
            ConcurrencyStrategy::ReadWrite | ConcurrencyStrategy::Transactional => {
                let guard = acquire_lock(&region, &cache_key).await;
                check_version(&guard, key, expected)?;

                // An error here drops the guard, which restores the old entry.
                let version = self.source.update(key, fields, expected).await?;

                let snapshot = EntitySnapshot::from_fields(fields, version);
                match guard.release_with(CachedValue::Entity(snapshot)) {
                    Ok(()) => {
                        self.stats().record_put(region.name());
                        debug!(key = %key, version = ?version, "shared entry replaced after update");
                    }
                    Err(err) => {
                        warn!(key = %key, error = %err, "could not refresh shared entry after update");
                    }
                }
                Ok(version)
            }
            ConcurrencyStrategy::NonstrictReadWrite => {
                let version = self.source.update(key, fields, expected).await?;
                let evicted = region.evict(&cache_key);
                debug!(key = %key, evicted, "shared entry evicted after update");
                Ok(version)
            }
        }
    }

    /// Insert a new row. `read_only` and `read_write` regions cache it
    /// immediately; other strategies wait for the first read.
    #[tracing::instrument(level = "debug", skip(self, fields), fields(key = %key))]
    pub async fn commit_insert(
        &self,
        key: &EntityKey,
        fields: &FieldMap,
    ) -> CacheResult<Option<Version>> {
        let version = self.source.insert(key, fields).await?;

        if let Some(region) = self.shared.entity_region(key.type_name()) {
            if region.strategy().caches_on_insert() {
                let value = CachedValue::Entity(EntitySnapshot::from_fields(fields, version));
                if region.put(CacheKey::Entity(key.clone()), value) {
                    self.stats().record_put(region.name());
                    trace!(key = %key, "inserted row cached");
                }
            }
        }
        Ok(version)
    }

    /// Delete a row and remove it, and the id lists it owns, from the shared cache.
    #[tracing::instrument(level = "debug", skip(self), fields(key = %key))]
    pub async fn commit_delete(&self, key: &EntityKey, expected: Option<Version>) -> CacheResult<()> {
        match self.shared.entity_region(key.type_name()) {
            Some(region) if region.strategy().uses_soft_locks() => {
                let cache_key = CacheKey::Entity(key.clone());
                let guard = acquire_lock(&region, &cache_key).await;
                check_version(&guard, key, expected)?;
                self.source.delete(key, expected).await?;
                if let Err(err) = guard.release_empty() {
                    warn!(key = %key, error = %err, "could not drop shared entry after delete");
                }
            }
            Some(region) => {
                self.source.delete(key, expected).await?;
                region.evict(&CacheKey::Entity(key.clone()));
            }
            None => self.source.delete(key, expected).await?,
        }
        let collections = self.shared.evict_collections_of(key);
        debug!(key = %key, collections, "shared entries removed after delete");
        Ok(())
    }

    // ========================================================================
    // ADMINISTRATION
    // ========================================================================

    pub fn evict_entity(&self, key: &EntityKey) -> bool {
        self.shared.evict_entity(key.type_name(), key.id().clone())
    }

    pub fn evict_entity_type(&self, type_name: &str) -> usize {
        self.shared.evict_entity_type(type_name)
    }

    pub fn evict_collection(&self, key: &AssociationKey) -> bool {
        self.shared.evict_collection(key.owner(), key.name())
    }

    pub fn evict_all(&self) {
        self.shared.evict_all();
    }
}

fn materialize(key: &EntityKey, snapshot: &EntitySnapshot, read_only: bool) -> ManagedEntity {
    ManagedEntity::from_snapshot(key.clone(), snapshot, read_only)
}

/// Take the soft lock on `key`, waiting out any writer that holds it.
async fn acquire_lock(region: &Arc<Region>, key: &CacheKey) -> SoftLockGuard {
    loop {
        match region.lock(key) {
            Ok(guard) => return guard,
            Err(waiter) => {
                trace!(key = %key, "waiting for concurrent writer");
                waiter.wait().await;
            }
        }
    }
}

/// Refuse a write whose expected version disagrees with the cached one.
///
/// Dropping the guard on error restores the cached entry.
fn check_version(
    guard: &SoftLockGuard,
    key: &EntityKey,
    expected: Option<Version>,
) -> CacheResult<()> {
    match guard.previous_version() {
        Some(cached) if expected != Some(cached) => Err(CacheError::StaleWrite {
            key: key.clone(),
            expected,
            actual: Some(cached),
        }),
        _ => Ok(()),
    }
}
