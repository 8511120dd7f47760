//! Cache regions.
//!
//! A region is a named, independently configured partition of the shared
//! cache. Reads never block each other. Under `read_write` a writer places a
//! per-key soft lock that hides the entry until the write commits; readers
//! that hit the lock wait for it and retry.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use stowage_core::{
    CacheError, CacheResult, Clock, ConcurrencyStrategy, RegionConfig, Timestamp, Version,
};
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::eviction::{policy_for, EvictionPolicy};
use crate::key::{CacheKey, CachedValue};

/// A stored value and when it was stored.
#[derive(Debug, Clone)]
struct CachedItem {
    value: CachedValue,
    cached_at: Timestamp,
}

#[derive(Debug)]
struct SoftLock {
    id: u64,
    /// Entry hidden by the lock, restored if the write is abandoned.
    previous: Option<CachedItem>,
    /// Dropped when the lock goes away, waking every waiter.
    released: watch::Sender<bool>,
}

#[derive(Debug)]
enum Slot {
    Value(CachedItem),
    Locked(SoftLock),
}

/// Result of [`Region::get`].
#[derive(Debug)]
pub enum Lookup {
    Hit(CachedValue),
    Miss,
    /// A writer holds the key. Wait on the waiter, then look again.
    Locked(LockWaiter),
}

/// Handle for waiting until a soft lock is released.
#[derive(Debug)]
pub struct LockWaiter(watch::Receiver<bool>);

impl LockWaiter {
    /// Resolves once the lock is released, evicted, or the region is cleared.
    pub async fn wait(mut self) {
        let _ = self.0.wait_for(|released| *released).await;
    }
}

/// Write epoch observed before a load started.
///
/// A `read_write` region refuses to store a loaded value if any writer locked
/// a key in the region since the stamp was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadStamp(u64);

enum Unlock {
    Replace(CachedValue),
    Restore,
    Remove,
}

/// Named cache partition.
pub struct Region {
    config: RegionConfig,
    entries: DashMap<CacheKey, Slot>,
    policy: Arc<dyn EvictionPolicy>,
    clock: Arc<dyn Clock>,
    next_lock_id: AtomicU64,
    write_epoch: AtomicU64,
}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Region")
            .field("name", &self.config.name)
            .field("strategy", &self.config.strategy)
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl Region {
    /// Create a region with the eviction policy implied by its configuration.
    pub fn new(config: RegionConfig, clock: Arc<dyn Clock>) -> Self {
        let policy = policy_for(&config);
        Self::with_policy(config, clock, policy)
    }

    /// Create a region with an explicit eviction policy.
    pub fn with_policy(
        config: RegionConfig,
        clock: Arc<dyn Clock>,
        policy: Arc<dyn EvictionPolicy>,
    ) -> Self {
        Self {
            config,
            entries: DashMap::new(),
            policy,
            clock,
            next_lock_id: AtomicU64::new(1),
            write_epoch: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn strategy(&self) -> ConcurrencyStrategy {
        self.config.strategy
    }

    pub fn config(&self) -> &RegionConfig {
        &self.config
    }

    fn is_expired(&self, item: &CachedItem) -> bool {
        match self.config.ttl() {
            Some(ttl) => {
                let age = self
                    .clock
                    .now()
                    .signed_duration_since(item.cached_at)
                    .to_std()
                    .unwrap_or_default();
                age >= ttl
            }
            None => false,
        }
    }

    /// Look up a key.
    pub fn get(&self, key: &CacheKey) -> Lookup {
        let live = match self.entries.get(key) {
            None => return Lookup::Miss,
            Some(slot) => match slot.value() {
                Slot::Locked(lock) => return Lookup::Locked(LockWaiter(lock.released.subscribe())),
                Slot::Value(item) if !self.is_expired(item) => Some(item.value.clone()),
                Slot::Value(_) => None,
            },
        };
        if let Some(value) = live {
            self.policy.record_access(key);
            return Lookup::Hit(value);
        }

        if let Entry::Occupied(entry) = self.entries.entry(key.clone()) {
            if matches!(entry.get(), Slot::Value(item) if self.is_expired(item)) {
                self.policy.record_remove(key);
                entry.remove();
                trace!(region = %self.name(), key = %key, "expired entry dropped");
            }
        }
        Lookup::Miss
    }

    /// Whether the key currently holds a live value.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries
            .get(key)
            .map(|slot| matches!(slot.value(), Slot::Value(item) if !self.is_expired(item)))
            .unwrap_or(false)
    }

    /// Take a stamp before loading a value that will be put with
    /// [`Region::put_from_load`].
    pub fn begin_load(&self) -> LoadStamp {
        LoadStamp(self.write_epoch.load(Ordering::Acquire))
    }

    /// Store a value. Returns whether it was stored.
    ///
    /// When the key already holds a value:
    /// - `read_only` keeps the existing value
    /// - `read_write` keeps it unless the new value carries a newer version
    /// - `nonstrict_read_write` replaces it
    ///
    /// Soft-locked keys never accept a put.
    pub fn put(&self, key: CacheKey, value: CachedValue) -> bool {
        self.store(key, value, None)
    }

    /// Store a value read from the source after `stamp` was taken.
    pub fn put_from_load(&self, key: CacheKey, value: CachedValue, stamp: LoadStamp) -> bool {
        self.store(key, value, Some(stamp))
    }

    fn store(&self, key: CacheKey, value: CachedValue, stamp: Option<LoadStamp>) -> bool {
        let strategy = self.strategy();
        if strategy == ConcurrencyStrategy::ReadWrite {
            if let Some(LoadStamp(epoch)) = stamp {
                if epoch != self.write_epoch.load(Ordering::Acquire) {
                    trace!(region = %self.name(), key = %key, "put from load refused, write since load");
                    return false;
                }
            }
        }

        // The policy is updated while the shard guard is held so the two never disagree.
        let victims = match self.entries.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                let replace = match entry.get() {
                    Slot::Locked(_) => false,
                    Slot::Value(item) if self.is_expired(item) => true,
                    Slot::Value(item) => match strategy {
                        ConcurrencyStrategy::ReadOnly => false,
                        ConcurrencyStrategy::NonstrictReadWrite => true,
                        ConcurrencyStrategy::ReadWrite | ConcurrencyStrategy::Transactional => {
                            match (value.version(), item.value.version()) {
                                (Some(new), Some(old)) => new > old,
                                _ => false,
                            }
                        }
                    },
                };
                if !replace {
                    return false;
                }
                entry.insert(Slot::Value(CachedItem {
                    value,
                    cached_at: self.clock.now(),
                }));
                self.policy.record_insert(&key)
            }
            Entry::Vacant(entry) => {
                let _slot = entry.insert(Slot::Value(CachedItem {
                    value,
                    cached_at: self.clock.now(),
                }));
                self.policy.record_insert(&key)
            }
        };

        self.drop_victims(&key, victims);
        true
    }

    fn drop_victims(&self, key: &CacheKey, victims: Vec<CacheKey>) {
        for victim in victims {
            if &victim == key {
                continue;
            }
            let removed = self
                .entries
                .remove_if(&victim, |_, slot| matches!(slot, Slot::Value(_)));
            if removed.is_some() {
                debug!(region = %self.name(), key = %victim, "evicted by capacity");
            }
        }
    }

    /// Place a soft lock on a key, hiding its current value.
    ///
    /// Fails with a waiter if another writer already holds the key.
    pub fn lock(self: &Arc<Self>, key: &CacheKey) -> Result<SoftLockGuard, LockWaiter> {
        let id = self.next_lock_id.fetch_add(1, Ordering::Relaxed);
        let (released, _) = watch::channel(false);
        let lock = SoftLock {
            id,
            previous: None,
            released,
        };

        let previous_version = match self.entries.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                if let Slot::Locked(held) = entry.get() {
                    return Err(LockWaiter(held.released.subscribe()));
                }
                let previous = std::mem::replace(entry.get_mut(), Slot::Locked(lock));
                self.policy.record_remove(key);
                match (previous, entry.get_mut()) {
                    (Slot::Value(item), Slot::Locked(lock)) => {
                        let version = item.value.version();
                        lock.previous = Some(item);
                        version
                    }
                    _ => None,
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(Slot::Locked(lock));
                None
            }
        };

        self.write_epoch.fetch_add(1, Ordering::AcqRel);
        trace!(region = %self.name(), key = %key, lock = id, "soft lock placed");

        Ok(SoftLockGuard {
            region: Arc::clone(self),
            key: key.clone(),
            id,
            previous_version,
            armed: true,
        })
    }

    fn unlock(&self, key: &CacheKey, id: u64, action: Unlock) -> CacheResult<()> {
        let lost = || CacheError::SoftLockLost {
            region: self.name().to_string(),
            key: key.to_string(),
        };

        let victims = match self.entries.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                let previous = match entry.get_mut() {
                    Slot::Locked(lock) if lock.id == id => lock.previous.take(),
                    _ => return Err(lost()),
                };
                let next = match action {
                    Unlock::Replace(value) => Some(CachedItem {
                        value,
                        cached_at: self.clock.now(),
                    }),
                    Unlock::Restore => previous,
                    Unlock::Remove => None,
                };
                match next {
                    Some(item) => {
                        entry.insert(Slot::Value(item));
                        self.policy.record_insert(key)
                    }
                    None => {
                        entry.remove();
                        Vec::new()
                    }
                }
            }
            Entry::Vacant(_) => return Err(lost()),
        };

        trace!(region = %self.name(), key = %key, lock = id, "soft lock released");
        self.drop_victims(key, victims);
        Ok(())
    }

    /// Remove one entry, soft-locked or not. Returns whether anything was removed.
    pub fn evict(&self, key: &CacheKey) -> bool {
        match self.entries.entry(key.clone()) {
            Entry::Occupied(entry) => {
                self.policy.record_remove(key);
                entry.remove();
                true
            }
            Entry::Vacant(_) => false,
        }
    }

    /// Remove every entry whose key matches. Returns the number removed.
    pub fn evict_where(&self, predicate: impl Fn(&CacheKey) -> bool) -> usize {
        let keys: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|entry| predicate(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();

        keys.iter().filter(|key| self.evict(key)).count()
    }

    /// Clear the region.
    pub fn evict_all(&self) {
        self.policy.clear();
        self.entries.clear();
    }

    /// Number of stored values. Soft locks are not counted.
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| matches!(entry.value(), Slot::Value(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusive write access to one region key.
///
/// Dropping the guard without releasing it restores the entry that was
/// hidden when the lock was taken.
#[must_use = "dropping the guard restores the previous entry"]
pub struct SoftLockGuard {
    region: Arc<Region>,
    key: CacheKey,
    id: u64,
    previous_version: Option<Version>,
    armed: bool,
}

impl fmt::Debug for SoftLockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftLockGuard")
            .field("region", &self.region.name())
            .field("key", &self.key)
            .field("id", &self.id)
            .finish()
    }
}

impl SoftLockGuard {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Version of the entry hidden by the lock, if there was one.
    pub fn previous_version(&self) -> Option<Version> {
        self.previous_version
    }

    /// Release the lock, storing `value` in place of the old entry.
    pub fn release_with(mut self, value: CachedValue) -> CacheResult<()> {
        self.armed = false;
        self.region.unlock(&self.key, self.id, Unlock::Replace(value))
    }

    /// Release the lock, leaving the key empty.
    pub fn release_empty(mut self) -> CacheResult<()> {
        self.armed = false;
        self.region.unlock(&self.key, self.id, Unlock::Remove)
    }
}

impl Drop for SoftLockGuard {
    fn drop(&mut self) {
        if self.armed {
            // The lock may already be gone after an evict; nothing to restore then.
            let _ = self.region.unlock(&self.key, self.id, Unlock::Restore);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};
    use parking_lot::Mutex;
    use std::time::Duration;
    use stowage_core::{EntityKey, EntityRow, EntitySnapshot, IdSet, Identifier};

    #[derive(Debug)]
    struct TestClock(Mutex<Timestamp>);

    impl TestClock {
        fn new() -> Arc<Self> {
            Arc::new(Self(Mutex::new(Utc::now())))
        }

        fn advance(&self, by: Duration) {
            let mut now = self.0.lock();
            *now += ChronoDuration::from_std(by).unwrap();
        }
    }

    impl Clock for TestClock {
        fn now(&self) -> Timestamp {
            *self.0.lock()
        }
    }

    fn region(strategy: ConcurrencyStrategy) -> Arc<Region> {
        Arc::new(Region::new(
            RegionConfig::new("Guide", strategy),
            TestClock::new(),
        ))
    }

    fn key(id: i64) -> CacheKey {
        CacheKey::Entity(EntityKey::new("Guide", id))
    }

    fn snapshot(salary: i64, version: u64) -> CachedValue {
        CachedValue::Entity(EntitySnapshot::from_row(
            &EntityRow::new()
                .with("salary", salary)
                .with_version(Version(version)),
        ))
    }

    fn salary(lookup: Lookup) -> Option<i64> {
        match lookup {
            Lookup::Hit(CachedValue::Entity(s)) => s.get("salary").and_then(|v| v.as_int()),
            _ => None,
        }
    }

    #[test]
    fn test_get_put_evict() {
        let region = region(ConcurrencyStrategy::ReadWrite);
        assert!(matches!(region.get(&key(1)), Lookup::Miss));

        assert!(region.put(key(1), snapshot(4000, 1)));
        assert_eq!(salary(region.get(&key(1))), Some(4000));
        assert_eq!(region.len(), 1);

        assert!(region.evict(&key(1)));
        assert!(!region.evict(&key(1)));
        assert!(region.is_empty());
    }

    #[test]
    fn test_read_write_put_keeps_newer_version() {
        let region = region(ConcurrencyStrategy::ReadWrite);
        region.put(key(1), snapshot(4000, 2));

        assert!(!region.put(key(1), snapshot(1000, 1)));
        assert!(!region.put(key(1), snapshot(1000, 2)));
        assert_eq!(salary(region.get(&key(1))), Some(4000));

        assert!(region.put(key(1), snapshot(7000, 3)));
        assert_eq!(salary(region.get(&key(1))), Some(7000));
    }

    #[test]
    fn test_read_only_put_keeps_existing() {
        let region = region(ConcurrencyStrategy::ReadOnly);
        region.put(key(1), snapshot(4000, 1));
        assert!(!region.put(key(1), snapshot(7000, 2)));
        assert_eq!(salary(region.get(&key(1))), Some(4000));
    }

    #[test]
    fn test_nonstrict_put_replaces() {
        let region = region(ConcurrencyStrategy::NonstrictReadWrite);
        region.put(key(1), snapshot(4000, 2));
        assert!(region.put(key(1), snapshot(1000, 1)));
        assert_eq!(salary(region.get(&key(1))), Some(1000));
    }

    #[test]
    fn test_soft_lock_hides_entry_and_refuses_puts() {
        let region = region(ConcurrencyStrategy::ReadWrite);
        region.put(key(1), snapshot(4000, 1));

        let guard = region.lock(&key(1)).unwrap();
        assert_eq!(guard.previous_version(), Some(Version(1)));
        assert!(matches!(region.get(&key(1)), Lookup::Locked(_)));
        assert!(!region.put(key(1), snapshot(9999, 9)));
        assert!(region.lock(&key(1)).is_err());
        assert_eq!(region.len(), 0);

        guard.release_with(snapshot(7000, 2)).unwrap();
        assert_eq!(salary(region.get(&key(1))), Some(7000));
    }

    #[test]
    fn test_dropped_guard_restores_previous_entry() {
        let region = region(ConcurrencyStrategy::ReadWrite);
        region.put(key(1), snapshot(4000, 1));

        drop(region.lock(&key(1)).unwrap());
        assert_eq!(salary(region.get(&key(1))), Some(4000));

        drop(region.lock(&key(2)).unwrap());
        assert!(matches!(region.get(&key(2)), Lookup::Miss));
    }

    #[test]
    fn test_release_empty_removes_entry() {
        let region = region(ConcurrencyStrategy::ReadWrite);
        region.put(key(1), snapshot(4000, 1));
        region.lock(&key(1)).unwrap().release_empty().unwrap();
        assert!(matches!(region.get(&key(1)), Lookup::Miss));
    }

    #[test]
    fn test_evict_all_loses_soft_lock() {
        let region = region(ConcurrencyStrategy::ReadWrite);
        let guard = region.lock(&key(1)).unwrap();
        region.evict_all();

        let result = guard.release_with(snapshot(7000, 2));
        assert!(matches!(result, Err(CacheError::SoftLockLost { .. })));
        assert!(matches!(region.get(&key(1)), Lookup::Miss));
    }

    #[test]
    fn test_put_from_load_refused_after_write() {
        let region = region(ConcurrencyStrategy::ReadWrite);
        let stamp = region.begin_load();
        region.lock(&key(2)).unwrap().release_empty().unwrap();

        assert!(!region.put_from_load(key(1), snapshot(4000, 1), stamp));
        let fresh = region.begin_load();
        assert!(region.put_from_load(key(1), snapshot(4000, 1), fresh));
    }

    #[test]
    fn test_put_from_load_ignores_stamp_for_nonstrict() {
        let region = region(ConcurrencyStrategy::NonstrictReadWrite);
        let stamp = region.begin_load();
        region.lock(&key(2)).unwrap().release_empty().unwrap();
        assert!(region.put_from_load(key(1), snapshot(4000, 1), stamp));
    }

    #[test]
    fn test_ttl_expiry() {
        let clock = TestClock::new();
        let region = Region::new(
            RegionConfig::new("Guide", ConcurrencyStrategy::ReadWrite)
                .with_ttl(Duration::from_secs(60)),
            clock.clone(),
        );
        region.put(key(1), snapshot(4000, 1));

        clock.advance(Duration::from_secs(30));
        assert!(region.contains(&key(1)));

        clock.advance(Duration::from_secs(30));
        assert!(!region.contains(&key(1)));
        assert!(matches!(region.get(&key(1)), Lookup::Miss));
        assert_eq!(region.len(), 0);

        // An expired entry may be replaced even under read_write.
        region.put(key(2), snapshot(1, 5));
        clock.advance(Duration::from_secs(61));
        assert!(region.put(key(2), snapshot(2, 1)));
    }

    #[test]
    fn test_capacity_evicts_least_recently_used() {
        let region = Region::new(
            RegionConfig::new("Guide", ConcurrencyStrategy::NonstrictReadWrite).with_capacity(2),
            TestClock::new(),
        );
        region.put(key(1), snapshot(1, 1));
        region.put(key(2), snapshot(2, 1));
        assert!(matches!(region.get(&key(1)), Lookup::Hit(_)));

        region.put(key(3), snapshot(3, 1));
        assert!(region.contains(&key(1)));
        assert!(!region.contains(&key(2)));
        assert!(region.contains(&key(3)));
        assert_eq!(region.len(), 2);
    }

    #[test]
    fn test_capacity_holds_under_concurrent_put_and_evict() {
        let region = Arc::new(Region::new(
            RegionConfig::new("Guide", ConcurrencyStrategy::NonstrictReadWrite).with_capacity(4),
            TestClock::new(),
        ));

        std::thread::scope(|scope| {
            for worker in 0..4i64 {
                let region = Arc::clone(&region);
                scope.spawn(move || {
                    for round in 0..2_000i64 {
                        let id = (round + worker) % 8;
                        if (round + worker) % 3 == 0 {
                            region.evict(&key(id));
                        } else {
                            region.put(key(id), snapshot(id, 1));
                        }
                    }
                });
            }
        });
        assert!(region.len() <= 4);

        // Every surviving entry is still tracked, so fresh keys push them all out.
        for id in 100..104 {
            region.put(key(id), snapshot(id, 1));
        }
        assert_eq!(region.len(), 4);
        assert!((100..104).all(|id| region.contains(&key(id))));
    }

    #[test]
    fn test_evict_where() {
        let region = region(ConcurrencyStrategy::NonstrictReadWrite);
        region.put(key(1), snapshot(1, 1));
        region.put(key(2), snapshot(2, 1));
        let owner = EntityKey::new("Guide", 1);
        region.put(
            CacheKey::Association(owner.association("students")),
            CachedValue::Collection(IdSet::new(vec![Identifier::Int(1)])),
        );

        let removed = region.evict_where(|k| k.as_entity().is_some());
        assert_eq!(removed, 2);
        assert_eq!(region.len(), 1);
    }

    #[tokio::test]
    async fn test_waiter_wakes_on_release() {
        let region = region(ConcurrencyStrategy::ReadWrite);
        let guard = region.lock(&key(1)).unwrap();

        let waiter = match region.get(&key(1)) {
            Lookup::Locked(waiter) => waiter,
            other => panic!("expected lock, got {:?}", other),
        };
        let reader = tokio::spawn(waiter.wait());

        guard.release_with(snapshot(7000, 2)).unwrap();
        reader.await.unwrap();
        assert_eq!(salary(region.get(&key(1))), Some(7000));
    }
}
