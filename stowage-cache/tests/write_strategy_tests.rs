//! Integration tests for the commit path under each concurrency strategy
//!
//! Tests verify:
//! - read_write replaces the shared entry after a committed update
//! - Stale writes are refused and leave the cached entry in place
//! - read_only types reject modification before anything is written
//! - nonstrict_read_write evicts after commit
//! - Inserts and deletes keep the shared cache in step with the source

mod support;

use stowage_cache::{CacheError, ConcurrencyStrategy, FieldMap, FieldValue, Version};
use stowage_test_utils::assertions::{
    assert_not_found, assert_read_only_violation, assert_source_unavailable, assert_stale_write,
};
use stowage_test_utils::fixtures::*;
use support::{harness, Harness};

fn settings(strategy: ConcurrencyStrategy) -> stowage_cache::CacheSettings {
    guide_students_settings(strategy, false)
}

fn new_student() -> FieldMap {
    let mut fields = FieldMap::new();
    fields.insert("name".into(), FieldValue::from("Maggie Simpson"));
    fields.insert("enrollment_id".into(), FieldValue::from("3344HG79"));
    fields.insert("guide".into(), FieldValue::from(guide_key(1)));
    fields
}

async fn salary_in_fresh_unit_of_work(h: &Harness) -> Option<FieldValue> {
    let mut uow = h.coordinator.begin();
    let guide = uow.find(GUIDE, 1).await.unwrap();
    guide.get("salary")
}

// ============================================================================
// READ_WRITE
// ============================================================================

#[tokio::test]
async fn test_read_write_update_replaces_shared_entry() {
    let h = harness(settings(ConcurrencyStrategy::ReadWrite));

    let mut uow = h.coordinator.begin();
    let guide = uow.find(GUIDE, 1).await.unwrap();
    guide.set("salary", 4500i64).unwrap();
    let summary = uow.commit().await.unwrap();
    assert_eq!(summary.updated, 1);
    assert_eq!(guide.version(), Some(Version(2)));
    assert!(!guide.is_dirty());
    uow.close();

    assert_eq!(salary_in_fresh_unit_of_work(&h).await, Some(FieldValue::Int(4500)));
    assert_eq!(h.source.load_count(&guide_key(1)), 1);

    let stats = h.stats(GUIDE);
    assert_eq!(stats.hit_count, 1);
    assert_eq!(stats.put_count, 2);
}

#[tokio::test]
async fn test_stale_write_detected_against_cached_version() {
    let h = harness(settings(ConcurrencyStrategy::ReadWrite));

    let mut slow = h.coordinator.begin();
    let slow_guide = slow.find(GUIDE, 1).await.unwrap();

    let mut fast = h.coordinator.begin();
    let fast_guide = fast.find(GUIDE, 1).await.unwrap();
    fast_guide.set("salary", 5000i64).unwrap();
    fast.commit().await.unwrap();

    slow_guide.set("salary", 6000i64).unwrap();
    let result = slow.commit().await;
    assert_stale_write(&result);
    assert!(slow.has_pending_changes());

    // Refused before reaching the source; the winner's entry survives.
    assert_eq!(h.source.write_count(), 1);
    assert_eq!(salary_in_fresh_unit_of_work(&h).await, Some(FieldValue::Int(5000)));
    assert_eq!(h.source.load_count(&guide_key(1)), 1);
}

#[tokio::test]
async fn test_failed_write_restores_previous_entry() {
    let h = harness(settings(ConcurrencyStrategy::ReadWrite));

    let mut uow = h.coordinator.begin();
    let guide = uow.find(GUIDE, 1).await.unwrap();
    h.source.modify_row(&guide_key(1), "salary", 7000i64);

    guide.set("salary", 4100i64).unwrap();
    let result = uow.commit().await;
    assert_stale_write(&result);

    assert!(h.coordinator.shared().contains_entity(GUIDE, 1));
    assert_eq!(salary_in_fresh_unit_of_work(&h).await, Some(FieldValue::Int(4000)));
}

#[tokio::test]
async fn test_read_write_delete_drops_entry() {
    let h = harness(settings(ConcurrencyStrategy::ReadWrite));

    let mut uow = h.coordinator.begin();
    let bart = uow.find(STUDENT, 1).await.unwrap();
    assert!(h.coordinator.shared().contains_entity(STUDENT, 1));

    uow.remove(&bart);
    let missing = uow.find(STUDENT, 1).await;
    assert_not_found(&missing, &student_key(1));

    let summary = uow.commit().await.unwrap();
    assert_eq!(summary.deleted, 1);
    assert!(!h.coordinator.shared().contains_entity(STUDENT, 1));

    let mut uow = h.coordinator.begin();
    let result = uow.find(STUDENT, 1).await;
    assert_not_found(&result, &student_key(1));
}

#[tokio::test]
async fn test_read_write_insert_is_cached() {
    let h = harness(settings(ConcurrencyStrategy::ReadWrite));

    let mut uow = h.coordinator.begin();
    uow.persist(STUDENT, 3, new_student()).unwrap();
    let summary = uow.commit().await.unwrap();
    assert_eq!(summary.inserted, 1);
    assert!(h.coordinator.shared().contains_entity(STUDENT, 3));

    let mut uow = h.coordinator.begin();
    let maggie = uow.find(STUDENT, 3).await.unwrap();
    assert_eq!(maggie.get("name"), Some(FieldValue::from("Maggie Simpson")));
    assert_eq!(maggie.version(), Some(Version::initial()));
    assert_eq!(h.source.load_count(&student_key(3)), 0);
}

// ============================================================================
// READ_ONLY
// ============================================================================

#[tokio::test]
async fn test_read_only_rejects_modification() {
    let h = harness(settings(ConcurrencyStrategy::ReadOnly));

    let mut uow = h.coordinator.begin();
    let guide = uow.find(GUIDE, 1).await.unwrap();
    assert!(guide.is_read_only());
    assert_read_only_violation(&guide.set("salary", 1i64));

    let fields = guide.fields();
    let direct = h
        .coordinator
        .commit_update(guide.key(), &fields, guide.version())
        .await;
    assert_read_only_violation(&direct);
    assert_eq!(h.source.write_count(), 0);
    assert!(!uow.has_pending_changes());
}

#[tokio::test]
async fn test_read_only_insert_is_cached() {
    let h = harness(settings(ConcurrencyStrategy::ReadOnly));

    let mut uow = h.coordinator.begin();
    uow.persist(STUDENT, 3, new_student()).unwrap();
    uow.commit().await.unwrap();

    assert!(h.coordinator.shared().contains_entity(STUDENT, 3));
}

// ============================================================================
// NONSTRICT_READ_WRITE
// ============================================================================

#[tokio::test]
async fn test_nonstrict_update_evicts_entry() {
    let h = harness(settings(ConcurrencyStrategy::NonstrictReadWrite));

    let mut uow = h.coordinator.begin();
    let guide = uow.find(GUIDE, 1).await.unwrap();
    guide.set("salary", 4200i64).unwrap();
    uow.commit().await.unwrap();
    assert!(!h.coordinator.shared().contains_entity(GUIDE, 1));

    assert_eq!(salary_in_fresh_unit_of_work(&h).await, Some(FieldValue::Int(4200)));
    assert_eq!(h.source.load_count(&guide_key(1)), 2);
}

#[tokio::test]
async fn test_nonstrict_insert_waits_for_first_read() {
    let h = harness(settings(ConcurrencyStrategy::NonstrictReadWrite));

    let mut uow = h.coordinator.begin();
    uow.persist(STUDENT, 3, new_student()).unwrap();
    uow.commit().await.unwrap();

    assert!(!h.coordinator.shared().contains_entity(STUDENT, 3));
}

#[tokio::test]
async fn test_nonstrict_delete_evicts_entry() {
    let h = harness(settings(ConcurrencyStrategy::NonstrictReadWrite));

    let mut uow = h.coordinator.begin();
    let lisa = uow.find(STUDENT, 2).await.unwrap();
    uow.remove(&lisa);
    uow.commit().await.unwrap();

    assert!(!h.coordinator.shared().contains_entity(STUDENT, 2));
    assert!(h.source.row(&student_key(2)).is_none());
}

// ============================================================================
// UNIT OF WORK BOOKKEEPING
// ============================================================================

#[tokio::test]
async fn test_persist_existing_key_is_rejected() {
    let h = harness(settings(ConcurrencyStrategy::ReadWrite));

    let mut uow = h.coordinator.begin();
    uow.find(STUDENT, 1).await.unwrap();
    let result = uow.persist(STUDENT, 1, new_student());
    assert!(matches!(result, Err(CacheError::AlreadyManaged { .. })));
}

#[tokio::test]
async fn test_removing_new_instance_writes_nothing() {
    let h = harness(settings(ConcurrencyStrategy::ReadWrite));

    let mut uow = h.coordinator.begin();
    let maggie = uow.persist(STUDENT, 3, new_student()).unwrap();
    uow.remove(&maggie);

    let summary = uow.commit().await.unwrap();
    assert!(summary.is_empty());
    assert_eq!(h.source.write_count(), 0);
}

#[tokio::test]
async fn test_failed_commit_keeps_changes_pending() {
    let h = harness(settings(ConcurrencyStrategy::ReadWrite));

    let mut uow = h.coordinator.begin();
    uow.persist(STUDENT, 3, new_student()).unwrap();

    h.source.set_unavailable(true);
    assert_source_unavailable(&uow.commit().await);
    assert!(uow.has_pending_changes());
    assert!(!h.coordinator.shared().contains_entity(STUDENT, 3));

    h.source.set_unavailable(false);
    let summary = uow.commit().await.unwrap();
    assert_eq!(summary.inserted, 1);
    assert!(!uow.has_pending_changes());
}
