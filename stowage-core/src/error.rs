//! Error types for cache operations

use crate::{ConcurrencyStrategy, EntityKey, Version};
use thiserror::Error;

/// Configuration errors. Raised by startup validation, never at lookup time.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("No cache region configured for {what}")]
    MissingRegion { what: String },

    #[error("Duplicate cache configuration for {what}")]
    DuplicateConfig { what: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Region {region} cannot hold both entity snapshots and collections")]
    MixedRegionKind { region: String },

    #[error("Region {region} configured with conflicting strategies {first} and {second}")]
    ConflictingStrategy {
        region: String,
        first: ConcurrencyStrategy,
        second: ConcurrencyStrategy,
    },

    #[error("Strategy {strategy} is not supported for region {region}: {reason}")]
    UnsupportedStrategy {
        region: String,
        strategy: ConcurrencyStrategy,
        reason: String,
    },

    #[error("Failed to parse cache configuration: {reason}")]
    Parse { reason: String },
}

/// Master error type for the cache layer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Entity not found: {key}")]
    NotFound { key: EntityKey },

    #[error("Source unavailable while loading {target}: {reason}")]
    SourceUnavailable { target: String, reason: String },

    #[error("Stale write on {key}: expected {expected:?}, found {actual:?}")]
    StaleWrite {
        key: EntityKey,
        expected: Option<Version>,
        actual: Option<Version>,
    },

    #[error("Entity {key} is cached read-only and cannot be modified")]
    ReadOnlyViolation { key: EntityKey },

    #[error("Entity {key} is already managed by this unit of work")]
    AlreadyManaged { key: EntityKey },

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Soft lock on {key} in region {region} was lost before release")]
    SoftLockLost { region: String, key: String },
}

impl CacheError {
    pub fn source_unavailable(target: impl ToString, reason: impl Into<String>) -> Self {
        CacheError::SourceUnavailable {
            target: target.to_string(),
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::NotFound { .. })
    }

    pub fn is_source_unavailable(&self) -> bool {
        matches!(self, CacheError::SourceUnavailable { .. })
    }
}

/// Result type alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

// =============================================================================
// TESTS
// =============================================================================
