//! Walk through both cache levels with the Guide/Student model.
//!
//! Run with `RUST_LOG=stowage_cache=trace` to see every lookup step.

use std::sync::Arc;

use stowage_cache::{CacheCoordinator, CacheResult, ConcurrencyStrategy, EntitySource};
use stowage_test_utils::fixtures::{
    guide_key, guide_students_settings, guide_students_source, GUIDE, STUDENT, STUDENTS,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> CacheResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("guide_students=debug,stowage_cache=debug,info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let source = Arc::new(guide_students_source());
    let dyn_source: Arc<dyn EntitySource> = source.clone();
    let coordinator = Arc::new(CacheCoordinator::new(
        guide_students_settings(ConcurrencyStrategy::ReadWrite, true),
        dyn_source,
    )?);

    // Miss on first lookup; within the unit of work the key keeps one live instance.
    info!("unit of work 1: identity and shared cache miss");
    let mut uow = coordinator.begin();
    let first = uow.find(GUIDE, 1).await?;
    let second = uow.find(GUIDE, 1).await?;
    info!(same_instance = first.same_instance(&second), "guide 1 found twice");
    uow.commit().await?;
    uow.close();

    // Hit: a fresh instance built from the cached snapshot.
    info!("unit of work 2: shared cache hit");
    let mut uow = coordinator.begin();
    let guide = uow.find(GUIDE, 1).await?;
    let students = uow.association_ids(guide.key(), STUDENTS).await?;
    info!(students = students.len(), "guide 1 served from shared cache");
    uow.commit().await?;
    uow.close();

    // Update: the committed salary replaces the cached entry.
    info!("unit of work 3: update");
    let mut uow = coordinator.begin();
    let guide = uow.find(GUIDE, 1).await?;
    let students = uow.association(guide.key(), STUDENTS, STUDENT).await?;
    info!(students = students.len(), "students resolved");
    guide.set("salary", 7000i64)?;
    uow.commit().await?;
    uow.close();

    for region in [GUIDE, "Guide.students"] {
        if let Some(stats) = coordinator.statistics(region) {
            println!("Statistics => {}: {}", region, stats);
        }
    }
    println!(
        "Source loads => guide 1: {}, Guide.students: {}",
        source.load_count(&guide_key(1)),
        source.association_load_count(&guide_key(1).association(STUDENTS)),
    );

    Ok(())
}
