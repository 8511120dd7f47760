//! Stowage Test Utilities
//!
//! Shared test infrastructure for the stowage workspace:
//! - An in-memory entity source with call counters and failure injection
//! - A manually advanced clock for TTL tests
//! - Proptest generators for keys, rows and region configuration
//! - The Guide/Student fixture used across integration tests
//! - Custom assertions for cache error variants

pub use stowage_core::{
    AssociationKey, CacheError, CacheResult, CacheSettings, Clock, ConcurrencyStrategy,
    EntityKey, EntityRow, FieldMap, FieldValue, Identifier, Loader, RegionConfig, SourceWriter,
    Timestamp, Version,
};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

// ============================================================================
// TRACING
// ============================================================================

/// Install a test-friendly tracing subscriber once per process.
///
/// Honors `RUST_LOG`; defaults to debug output for the cache crate.
pub fn init_test_tracing() {
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("stowage_cache=debug,info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_test_writer()
        .try_init();
}

// ============================================================================
// MOCK PROVIDERS
// ============================================================================

/// In-memory backing store.
///
/// Rows are versioned: inserts start at [`Version::initial`] and every update
/// bumps the version. Updates and deletes check the caller's expected version
/// and fail with `StaleWrite` on mismatch.
#[derive(Debug, Default)]
pub struct InMemorySource {
    rows: Mutex<HashMap<EntityKey, EntityRow>>,
    associations: Mutex<HashMap<AssociationKey, Vec<Identifier>>>,
    loads: Mutex<HashMap<EntityKey, usize>>,
    association_loads: Mutex<HashMap<AssociationKey, usize>>,
    writes: AtomicUsize,
    unavailable: AtomicBool,
    latency: Mutex<Option<Duration>>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a row, bypassing write counting.
    pub fn with_row(self, key: EntityKey, row: EntityRow) -> Self {
        self.rows.lock().insert(key, row);
        self
    }

    /// Seed the child ids of an association.
    pub fn with_association(self, owner: EntityKey, name: &str, children: Vec<Identifier>) -> Self {
        self.associations.lock().insert(owner.association(name), children);
        self
    }

    /// Delay every load by `latency`.
    pub fn with_latency(self, latency: Duration) -> Self {
        *self.latency.lock() = Some(latency);
        self
    }

    /// Make every call fail with `SourceUnavailable` until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Change a row behind the cache's back, bumping its version.
    pub fn modify_row(&self, key: &EntityKey, field: &str, value: impl Into<FieldValue>) {
        if let Some(row) = self.rows.lock().get_mut(key) {
            row.fields.insert(field.to_string(), value.into());
            row.version = row.version.map(Version::next);
        }
    }

    pub fn row(&self, key: &EntityKey) -> Option<EntityRow> {
        self.rows.lock().get(key).cloned()
    }

    /// Number of `load` calls made for `key`.
    pub fn load_count(&self, key: &EntityKey) -> usize {
        self.loads.lock().get(key).copied().unwrap_or(0)
    }

    /// Number of `load` calls across all keys.
    pub fn total_loads(&self) -> usize {
        self.loads.lock().values().sum()
    }

    /// Number of `load_association` calls made for `key`.
    pub fn association_load_count(&self, key: &AssociationKey) -> usize {
        self.association_loads.lock().get(key).copied().unwrap_or(0)
    }

    /// Number of update, insert and delete calls that reached the store.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn check_available(&self, target: impl ToString) -> CacheResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CacheError::source_unavailable(target, "source marked unavailable"));
        }
        Ok(())
    }

    async fn delay(&self) {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn check_version(
        key: &EntityKey,
        row: &EntityRow,
        expected: Option<Version>,
    ) -> CacheResult<()> {
        match row.version {
            Some(actual) if expected != Some(actual) => Err(CacheError::StaleWrite {
                key: key.clone(),
                expected,
                actual: Some(actual),
            }),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl Loader for InMemorySource {
    async fn load(&self, key: &EntityKey) -> CacheResult<Option<EntityRow>> {
        *self.loads.lock().entry(key.clone()).or_default() += 1;
        self.delay().await;
        self.check_available(key)?;
        Ok(self.rows.lock().get(key).cloned())
    }

    async fn load_association(&self, key: &AssociationKey) -> CacheResult<Vec<Identifier>> {
        *self.association_loads.lock().entry(key.clone()).or_default() += 1;
        self.delay().await;
        self.check_available(key)?;
        Ok(self.associations.lock().get(key).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl SourceWriter for InMemorySource {
    async fn update(
        &self,
        key: &EntityKey,
        fields: &FieldMap,
        expected: Option<Version>,
    ) -> CacheResult<Option<Version>> {
        self.check_available(key)?;
        self.writes.fetch_add(1, Ordering::SeqCst);

        let mut rows = self.rows.lock();
        let row = rows
            .get_mut(key)
            .ok_or_else(|| CacheError::NotFound { key: key.clone() })?;
        Self::check_version(key, row, expected)?;

        for (field, value) in fields {
            row.fields.insert(field.clone(), value.clone());
        }
        row.version = row.version.map(Version::next);
        Ok(row.version)
    }

    async fn insert(&self, key: &EntityKey, fields: &FieldMap) -> CacheResult<Option<Version>> {
        self.check_available(key)?;
        self.writes.fetch_add(1, Ordering::SeqCst);

        let mut rows = self.rows.lock();
        if rows.contains_key(key) {
            return Err(CacheError::source_unavailable(key, "duplicate key"));
        }
        let row = EntityRow {
            fields: fields.clone(),
            version: Some(Version::initial()),
        };
        rows.insert(key.clone(), row);
        Ok(Some(Version::initial()))
    }

    async fn delete(&self, key: &EntityKey, expected: Option<Version>) -> CacheResult<()> {
        self.check_available(key)?;
        self.writes.fetch_add(1, Ordering::SeqCst);

        let mut rows = self.rows.lock();
        let row = rows
            .get(key)
            .ok_or_else(|| CacheError::NotFound { key: key.clone() })?;
        Self::check_version(key, row, expected)?;
        rows.remove(key);
        Ok(())
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock(Mutex<Timestamp>);

impl ManualClock {
    pub fn new() -> Self {
        Self(Mutex::new(Utc::now()))
    }

    pub fn advance(&self, by: Duration) {
        let by = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::zero());
        *self.0.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.0.lock()
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for stowage types.

    use super::*;
    use proptest::prelude::*;
    use uuid::Uuid;

    /// Generate an identifier of any kind.
    pub fn arb_identifier() -> impl Strategy<Value = Identifier> {
        prop_oneof![
            any::<i64>().prop_map(Identifier::Int),
            any::<[u8; 16]>().prop_map(|bytes| Identifier::Uuid(Uuid::from_bytes(bytes))),
            "[A-Z0-9]{1,12}".prop_map(Identifier::Text),
        ]
    }

    /// Generate an entity type name.
    pub fn arb_type_name() -> impl Strategy<Value = String> {
        "[A-Z][a-z]{2,10}"
    }

    /// Generate an entity key.
    pub fn arb_entity_key() -> impl Strategy<Value = EntityKey> {
        (arb_type_name(), arb_identifier()).prop_map(|(type_name, id)| EntityKey::new(type_name, id))
    }

    /// Generate a scalar field value.
    pub fn arb_scalar_value() -> impl Strategy<Value = FieldValue> {
        prop_oneof![
            Just(FieldValue::Null),
            any::<bool>().prop_map(FieldValue::Bool),
            any::<i64>().prop_map(FieldValue::Int),
            "[a-zA-Z ]{0,24}".prop_map(FieldValue::Text),
        ]
    }

    /// Generate a versioned row of scalar fields.
    pub fn arb_entity_row() -> impl Strategy<Value = EntityRow> {
        (
            prop::collection::btree_map("[a-z_]{1,12}", arb_scalar_value(), 0..8),
            1u64..1000,
        )
            .prop_map(|(fields, version)| EntityRow {
                fields,
                version: Some(Version(version)),
            })
    }

    /// Generate a strategy usable by an in-process region.
    pub fn arb_strategy() -> impl Strategy<Value = ConcurrencyStrategy> {
        prop_oneof![
            Just(ConcurrencyStrategy::ReadOnly),
            Just(ConcurrencyStrategy::ReadWrite),
            Just(ConcurrencyStrategy::NonstrictReadWrite),
        ]
    }

    /// Generate a valid region configuration.
    pub fn arb_region_config() -> impl Strategy<Value = RegionConfig> {
        (
            "[A-Za-z][A-Za-z.]{0,20}",
            arb_strategy(),
            prop::option::of(1usize..10_000),
            prop::option::of(1u64..86_400),
        )
            .prop_map(|(name, strategy, capacity, ttl_secs)| {
                let mut config = RegionConfig::new(name, strategy);
                config.capacity = capacity;
                config.ttl_secs = ttl_secs;
                config
            })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! The Guide/Student model: one guide with two students.

    use super::*;

    pub const GUIDE: &str = "Guide";
    pub const STUDENT: &str = "Student";
    pub const STUDENTS: &str = "students";

    pub fn guide_key(id: i64) -> EntityKey {
        EntityKey::new(GUIDE, id)
    }

    pub fn student_key(id: i64) -> EntityKey {
        EntityKey::new(STUDENT, id)
    }

    pub fn homer() -> EntityRow {
        EntityRow::new()
            .with("name", "Homer Simpson")
            .with("salary", 4000i64)
            .with("staff_id", "22233DDFR4433")
            .with_version(Version::initial())
    }

    pub fn student(name: &str, enrollment_id: &str) -> EntityRow {
        EntityRow::new()
            .with("name", name)
            .with("enrollment_id", enrollment_id)
            .with("guide", guide_key(1))
            .with_version(Version::initial())
    }

    /// Source holding Guide 1 (Homer) and Students 1 (Bart) and 2 (Lisa).
    pub fn guide_students_source() -> InMemorySource {
        InMemorySource::new()
            .with_row(guide_key(1), homer())
            .with_row(student_key(1), student("Bart Simpson", "3344HG77"))
            .with_row(student_key(2), student("Lisa Simpson", "3344HG78"))
            .with_association(
                guide_key(1),
                STUDENTS,
                vec![Identifier::Int(1), Identifier::Int(2)],
            )
    }

    /// Settings caching both entity types with `strategy`.
    ///
    /// `Guide.students` gets a `read_write` collection region only when
    /// `cache_students` is set.
    pub fn guide_students_settings(
        strategy: ConcurrencyStrategy,
        cache_students: bool,
    ) -> CacheSettings {
        let settings = CacheSettings::new()
            .with_entity(GUIDE, RegionConfig::new(GUIDE, strategy))
            .with_entity(STUDENT, RegionConfig::new(STUDENT, strategy));
        if cache_students {
            settings.with_association(
                GUIDE,
                STUDENTS,
                STUDENT,
                false,
                RegionConfig::new("Guide.students", ConcurrencyStrategy::ReadWrite),
            )
        } else {
            settings
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for cache error variants.

    use super::*;

    /// Assert that a CacheResult is a NotFound error for `key`.
    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &CacheResult<T>, key: &EntityKey) {
        match result {
            Err(CacheError::NotFound { key: missing }) => {
                assert_eq!(missing, key, "Wrong key in NotFound error");
            }
            other => panic!("Expected NotFound for {}, got: {:?}", key, other),
        }
    }

    /// Assert that a CacheResult is a StaleWrite error.
    #[track_caller]
    pub fn assert_stale_write<T: std::fmt::Debug>(result: &CacheResult<T>) {
        match result {
            Err(CacheError::StaleWrite { .. }) => {}
            other => panic!("Expected StaleWrite error, got: {:?}", other),
        }
    }

    /// Assert that a CacheResult is a ReadOnlyViolation error.
    #[track_caller]
    pub fn assert_read_only_violation<T: std::fmt::Debug>(result: &CacheResult<T>) {
        match result {
            Err(CacheError::ReadOnlyViolation { .. }) => {}
            other => panic!("Expected ReadOnlyViolation error, got: {:?}", other),
        }
    }

    /// Assert that a CacheResult is a SourceUnavailable error.
    #[track_caller]
    pub fn assert_source_unavailable<T: std::fmt::Debug>(result: &CacheResult<T>) {
        match result {
            Err(CacheError::SourceUnavailable { .. }) => {}
            other => panic!("Expected SourceUnavailable error, got: {:?}", other),
        }
    }

    /// Assert that a CacheResult is a Config error.
    #[track_caller]
    pub fn assert_config_error<T: std::fmt::Debug>(result: &CacheResult<T>) {
        match result {
            Err(CacheError::Config(_)) => {}
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
