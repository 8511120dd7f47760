//! Shared setup for stowage-cache integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use stowage_cache::{CacheCoordinator, CacheSettings, EntitySource, StatisticsSnapshot};
use stowage_test_utils::fixtures::guide_students_source;
use stowage_test_utils::{init_test_tracing, InMemorySource, ManualClock};

/// A coordinator wired to an inspectable in-memory source.
pub struct Harness {
    pub source: Arc<InMemorySource>,
    pub coordinator: Arc<CacheCoordinator>,
}

impl Harness {
    pub fn stats(&self, region: &str) -> StatisticsSnapshot {
        self.coordinator
            .statistics(region)
            .unwrap_or_else(|| panic!("no region named {}", region))
    }
}

/// Guide/Student source behind `settings`.
pub fn harness(settings: CacheSettings) -> Harness {
    harness_with(settings, guide_students_source())
}

pub fn harness_with(settings: CacheSettings, source: InMemorySource) -> Harness {
    init_test_tracing();
    let source = Arc::new(source);
    let dyn_source: Arc<dyn EntitySource> = source.clone();
    let coordinator = CacheCoordinator::new(settings, dyn_source).expect("valid settings");
    Harness {
        source,
        coordinator: Arc::new(coordinator),
    }
}

pub fn harness_with_clock(settings: CacheSettings, clock: Arc<ManualClock>) -> Harness {
    init_test_tracing();
    let source = Arc::new(guide_students_source());
    let dyn_source: Arc<dyn EntitySource> = source.clone();
    let coordinator =
        CacheCoordinator::with_clock(settings, dyn_source, clock).expect("valid settings");
    Harness {
        source,
        coordinator: Arc::new(coordinator),
    }
}
