//! Stowage Core - Entity Cache Types
//!
//! Keys, row data, snapshots, configuration and error types shared by every
//! stowage crate, plus the traits through which the cache reaches the
//! backing store. This crate contains no caching logic.

pub mod clock;
pub mod config;
pub mod entities;
pub mod enums;
pub mod error;
pub mod identity;
pub mod source;

pub use clock::{Clock, SystemClock};
pub use config::{AssociationCacheConfig, CacheSettings, EntityCacheConfig, RegionConfig};
pub use entities::{EntityRow, EntitySnapshot, FieldMap, FieldValue, IdSet};
pub use enums::{ConcurrencyStrategy, SharedCacheMode, StrategyParseError};
pub use error::{CacheError, CacheResult, ConfigError};
pub use identity::{AssociationKey, EntityKey, Identifier, Timestamp, Version};
pub use source::{EntitySource, Loader, SourceWriter};
