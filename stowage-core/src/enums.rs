//! Cache policy enums.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Governs what a region does when the same key is written concurrently.
///
/// From top to bottom: stronger isolation, lower throughput.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyStrategy {
    /// Cluster-wide cache with a transactional provider. Not available in-process.
    Transactional,
    /// Soft-locked invalidate, commit, repopulate. Read-committed isolation.
    ReadWrite,
    /// Evict after commit with no lock. Tolerates stale repopulation races.
    NonstrictReadWrite,
    /// Immutable reference data. Mutations are rejected.
    ReadOnly,
}

impl ConcurrencyStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConcurrencyStrategy::Transactional => "transactional",
            ConcurrencyStrategy::ReadWrite => "read_write",
            ConcurrencyStrategy::NonstrictReadWrite => "nonstrict_read_write",
            ConcurrencyStrategy::ReadOnly => "read_only",
        }
    }

    /// Whether entities cached under this strategy may be modified.
    pub fn allows_mutation(&self) -> bool {
        !matches!(self, ConcurrencyStrategy::ReadOnly)
    }

    /// Whether writes hold a per-key soft lock from invalidation to repopulation.
    pub fn uses_soft_locks(&self) -> bool {
        matches!(
            self,
            ConcurrencyStrategy::ReadWrite | ConcurrencyStrategy::Transactional
        )
    }

    /// Whether a freshly inserted entity is put into the region after commit.
    pub fn caches_on_insert(&self) -> bool {
        matches!(
            self,
            ConcurrencyStrategy::ReadWrite | ConcurrencyStrategy::ReadOnly
        )
    }

    /// Whether a single-process cache can honor this strategy.
    pub fn is_supported_in_process(&self) -> bool {
        !matches!(self, ConcurrencyStrategy::Transactional)
    }
}

impl fmt::Display for ConcurrencyStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error when parsing an invalid strategy string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyParseError(pub String);

impl fmt::Display for StrategyParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid concurrency strategy: {}", self.0)
    }
}

impl std::error::Error for StrategyParseError {}

impl FromStr for ConcurrencyStrategy {
    type Err = StrategyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "transactional" => Ok(ConcurrencyStrategy::Transactional),
            "read_write" => Ok(ConcurrencyStrategy::ReadWrite),
            "nonstrict_read_write" => Ok(ConcurrencyStrategy::NonstrictReadWrite),
            "read_only" => Ok(ConcurrencyStrategy::ReadOnly),
            _ => Err(StrategyParseError(s.to_string())),
        }
    }
}

/// Which entity types take part in the shared cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SharedCacheMode {
    /// Only types with an explicit region configuration are cached.
    #[default]
    EnableSelective,
    /// Every declared entity type must have a region.
    All,
    /// The shared cache is bypassed entirely.
    None,
}

impl SharedCacheMode {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, SharedCacheMode::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_round_trips_through_str() {
        for strategy in [
            ConcurrencyStrategy::Transactional,
            ConcurrencyStrategy::ReadWrite,
            ConcurrencyStrategy::NonstrictReadWrite,
            ConcurrencyStrategy::ReadOnly,
        ] {
            assert_eq!(strategy.as_str().parse::<ConcurrencyStrategy>(), Ok(strategy));
        }
    }

    #[test]
    fn test_strategy_parse_accepts_upper_and_dashes() {
        assert_eq!(
            "NONSTRICT-READ-WRITE".parse::<ConcurrencyStrategy>(),
            Ok(ConcurrencyStrategy::NonstrictReadWrite)
        );
        assert!("eventual".parse::<ConcurrencyStrategy>().is_err());
    }

    #[test]
    fn test_strategy_capabilities() {
        assert!(!ConcurrencyStrategy::ReadOnly.allows_mutation());
        assert!(ConcurrencyStrategy::ReadWrite.uses_soft_locks());
        assert!(!ConcurrencyStrategy::NonstrictReadWrite.uses_soft_locks());
        assert!(!ConcurrencyStrategy::NonstrictReadWrite.caches_on_insert());
        assert!(!ConcurrencyStrategy::Transactional.is_supported_in_process());
    }

    #[test]
    fn test_shared_cache_mode_default() {
        assert_eq!(SharedCacheMode::default(), SharedCacheMode::EnableSelective);
        assert!(!SharedCacheMode::None.is_enabled());
    }
}
