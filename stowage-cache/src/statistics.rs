//! Per-region hit, miss and put counters.
//!
//! Counters are plain atomics incremented by the coordinator. Reads are
//! eventually consistent with concurrent lookups.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

#[derive(Debug, Default)]
struct RegionCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    puts: AtomicU64,
}

/// Read-only view of one region's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatisticsSnapshot {
    pub hit_count: u64,
    pub miss_count: u64,
    pub put_count: u64,
    /// Entries currently held by the region.
    pub element_count: u64,
}

impl StatisticsSnapshot {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hit_count + self.miss_count;
        if total == 0 {
            0.0
        } else {
            self.hit_count as f64 / total as f64
        }
    }
}

impl fmt::Display for StatisticsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SecondLevelCacheStatistics[hitCount={},missCount={},putCount={},elementCount={}]",
            self.hit_count, self.miss_count, self.put_count, self.element_count
        )
    }
}

/// Counter registry for every region of a shared cache.
#[derive(Debug)]
pub struct Statistics {
    enabled: AtomicBool,
    regions: DashMap<String, Arc<RegionCounters>>,
}

impl Statistics {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            regions: DashMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    fn counters(&self, region: &str) -> Arc<RegionCounters> {
        if let Some(counters) = self.regions.get(region) {
            return Arc::clone(counters.value());
        }
        Arc::clone(
            self.regions
                .entry(region.to_string())
                .or_default()
                .value(),
        )
    }

    fn bump(&self, region: &str, pick: impl Fn(&RegionCounters) -> &AtomicU64) {
        if self.is_enabled() {
            pick(&self.counters(region)).fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_hit(&self, region: &str) {
        self.bump(region, |c| &c.hits);
    }

    pub fn record_miss(&self, region: &str) {
        self.bump(region, |c| &c.misses);
    }

    pub fn record_put(&self, region: &str) {
        self.bump(region, |c| &c.puts);
    }

    /// Current counters for a region, combined with its element count.
    pub fn snapshot(&self, region: &str, element_count: usize) -> StatisticsSnapshot {
        let mut snapshot = StatisticsSnapshot {
            element_count: element_count as u64,
            ..Default::default()
        };
        if let Some(counters) = self.regions.get(region) {
            snapshot.hit_count = counters.hits.load(Ordering::Relaxed);
            snapshot.miss_count = counters.misses.load(Ordering::Relaxed);
            snapshot.put_count = counters.puts.load(Ordering::Relaxed);
        }
        snapshot
    }

    /// Reset every counter.
    pub fn clear(&self) {
        self.regions.clear();
    }
}

impl Default for Statistics {
    fn default() -> Self {
        Self::new(true)
    }
}
