//! Stowage Cache - Two-Level Entity Cache
//!
//! A unit-of-work identity map in front of a process-wide shared cache.
//!
//! - [`UnitOfWorkCache`]: one live instance per key within a unit of work.
//! - [`SharedCache`]: named [`Region`]s of immutable snapshots shared by all
//!   units of work, each governed by a concurrency strategy.
//! - [`CacheCoordinator`]: runs lookups through both levels and keeps the
//!   shared cache consistent when units of work commit.
//!
//! ```ignore
//! let coordinator = Arc::new(CacheCoordinator::new(settings, source)?);
//!
//! let mut uow = coordinator.begin();
//! let guide = uow.find("Guide", 1).await?;
//! guide.set("salary", 4500)?;
//! uow.commit().await?;
//! uow.close();
//!
//! println!("{}", coordinator.statistics("Guide").unwrap_or_default());
//! ```

pub mod coordinator;
pub mod entity;
pub mod eviction;
pub mod key;
pub mod region;
pub mod session;
pub mod shared;
pub mod statistics;
pub mod unit_of_work;

pub use coordinator::CacheCoordinator;
pub use entity::ManagedEntity;
pub use eviction::{EvictionPolicy, LeastRecentlyUsed, Unbounded};
pub use key::{CacheKey, CachedValue};
pub use region::{LoadStamp, LockWaiter, Lookup, Region, SoftLockGuard};
pub use session::{CommitSummary, UnitOfWork};
pub use shared::SharedCache;
pub use statistics::{Statistics, StatisticsSnapshot};
pub use unit_of_work::UnitOfWorkCache;

pub use stowage_core::{
    AssociationKey, CacheError, CacheResult, CacheSettings, Clock, ConcurrencyStrategy, EntityKey,
    EntityRow, EntitySnapshot, EntitySource, FieldMap, FieldValue, IdSet, Identifier,
    RegionConfig, SharedCacheMode, SystemClock, Version,
};
