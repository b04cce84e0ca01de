//! Sync engine integration tests
//!
//! Tests full passes over in-memory platforms including:
//! - Count accounting across mixed outcomes
//! - Idempotence with and without caching
//! - Conflict resolution regardless of which side holds the newer value
//! - Periodic loop startup, state reporting and shutdown

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use common::{at, create_cached_test_engine, create_test_engine, create_test_platforms};
use storefront_sync::config::SyncConfig;
use storefront_sync::engine::EngineState;
use storefront_sync::error::{ErrorKind, PlatformError};
use storefront_sync::models::{
    CanonicalRecord, ConflictResolution, EntityType, InventoryStrategy, PassOutcome, SyncDirection,
};
use storefront_sync::platform::{InMemoryPlatform, Operation};

/// Test 1: Every distinct key is counted exactly once
#[tokio::test]
async fn test_counts_cover_every_distinct_key() {
    let (a, b) = create_test_platforms();
    for record in [
        CanonicalRecord::new("SKU-1").with_price(5.0).with_updated_at(at(9)),
        CanonicalRecord::new("SKU-2").with_name("Mug"),
        CanonicalRecord::new("SKU-3").with_name("Cap").with_updated_at(at(8)),
    ] {
        a.insert(EntityType::Products, record);
    }
    for record in [
        CanonicalRecord::new("SKU-2").with_name("Mug"),
        CanonicalRecord::new("SKU-3").with_name("Hat").with_updated_at(at(11)),
        CanonicalRecord::new("SKU-4").with_price(2.5),
    ] {
        b.insert(EntityType::Products, record);
    }
    // The create of SKU-1 on the target is rejected
    b.fail_next(Operation::Create, PlatformError::Validation("bad sku".to_string()));

    let engine = create_test_engine(SyncConfig::default(), &a, &b).await;
    let result = engine.sync_products().await;

    let distinct: BTreeSet<String> = a
        .records(EntityType::Products)
        .into_iter()
        .chain(b.records(EntityType::Products))
        .map(|r| r.key)
        .collect();

    assert_eq!(result.candidates(), distinct.len() as u64);
    assert_eq!(result.synced_count, 2);
    assert_eq!(result.failed_count, 1);
    assert_eq!(result.skipped_count, 1);
    assert!(!result.success);
    assert_eq!(result.outcome(), PassOutcome::PartiallySynced { failed: 1 });
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].key.as_deref(), Some("SKU-1"));
    assert_eq!(result.errors[0].kind, ErrorKind::Validation);
    assert_eq!(
        a.record(EntityType::Products, "SKU-3")
            .expect("SKU-3 on source")
            .name
            .as_deref(),
        Some("Hat")
    );
}

/// Test 2: Newest wins no matter which side holds it
#[tokio::test]
async fn test_newest_wins_from_either_side() {
    for newer_on_source in [true, false] {
        let (a, b) = create_test_platforms();
        let newer = CanonicalRecord::new("SKU-1").with_price(19.0).with_updated_at(at(12));
        let older = CanonicalRecord::new("SKU-1").with_price(15.0).with_updated_at(at(6));
        let (on_a, on_b) = if newer_on_source {
            (newer, older)
        } else {
            (older, newer)
        };
        a.insert(EntityType::Products, on_a);
        b.insert(EntityType::Products, on_b);

        let engine = create_test_engine(SyncConfig::default(), &a, &b).await;
        let result = engine.sync_products().await;

        assert_eq!(result.synced_count, 1, "newer_on_source={}", newer_on_source);
        for platform in [&a, &b] {
            let record = platform
                .record(EntityType::Products, "SKU-1")
                .expect("SKU-1 present");
            assert_eq!(record.price, Some(19.0));
            assert_eq!(record.updated_at, Some(at(12)));
        }
        let (loser, winner) = if newer_on_source { (&b, &a) } else { (&a, &b) };
        assert_eq!(loser.write_count(), 1);
        assert_eq!(winner.write_count(), 0);
    }
}

/// Test 3: A full cycle settles stock and replicates orders
#[tokio::test]
async fn test_run_cycle_settles_inventory_and_orders() {
    let (a, b) = create_test_platforms();
    a.insert(
        EntityType::Inventory,
        CanonicalRecord::new("SKU-1").with_quantity(10).with_updated_at(at(2)),
    );
    b.insert(
        EntityType::Inventory,
        CanonicalRecord::new("SKU-1")
            .with_quantity(7)
            .with_updated_at(at(1))
            .with_location("warehouse-b"),
    );
    a.insert(EntityType::Orders, CanonicalRecord::new("ORD-1").with_status("paid"));
    a.insert(EntityType::Orders, CanonicalRecord::new("ORD-2").with_status("cancelled"));

    let engine = create_test_engine(SyncConfig::default(), &a, &b).await;
    let results = engine.run_cycle().await.expect("cycle runs");

    let entities: Vec<EntityType> = results.iter().map(|r| r.entity).collect();
    assert_eq!(
        entities,
        vec![EntityType::Products, EntityType::Inventory, EntityType::Orders]
    );

    let inventory = &results[1];
    assert_eq!(inventory.synced_count, 1);
    assert_eq!(inventory.failed_count, 0);
    assert!(inventory.success);
    let level = b.record(EntityType::Inventory, "SKU-1").expect("stock on target");
    assert_eq!(level.quantity, Some(10));
    assert_eq!(level.location_id.as_deref(), Some("warehouse-b"));

    let orders = &results[2];
    assert_eq!(orders.synced_count, 1);
    assert_eq!(orders.skipped_count, 1);
    assert!(b.record(EntityType::Orders, "ORD-1").is_some());
    assert!(b.record(EntityType::Orders, "ORD-2").is_none());

    assert_eq!(engine.get_history(10).len(), 3);
}

/// Test 4: Larger quantity wins under the larger-stock strategy
#[tokio::test]
async fn test_larger_inventory_strategy() {
    let (a, b) = create_test_platforms();
    a.insert(
        EntityType::Inventory,
        CanonicalRecord::new("SKU-1").with_quantity(3).with_updated_at(at(12)),
    );
    b.insert(
        EntityType::Inventory,
        CanonicalRecord::new("SKU-1").with_quantity(8).with_updated_at(at(1)),
    );

    let config = SyncConfig {
        inventory_strategy: InventoryStrategy::Larger,
        ..SyncConfig::default()
    };
    let engine = create_test_engine(config, &a, &b).await;
    let result = engine.sync_inventory().await;

    assert_eq!(result.synced_count, 1);
    assert_eq!(
        a.record(EntityType::Inventory, "SKU-1").expect("stock").quantity,
        Some(8)
    );
    assert_eq!(b.write_count(), 0);
}

/// Test 5: One-way sync never writes to the source
#[tokio::test]
async fn test_one_way_sync_leaves_source_untouched() {
    let (a, b) = create_test_platforms();
    a.insert(EntityType::Products, CanonicalRecord::new("SKU-1").with_name("Mug"));
    b.insert(
        EntityType::Products,
        CanonicalRecord::new("SKU-2").with_name("Cap"),
    );
    b.insert(
        EntityType::Products,
        CanonicalRecord::new("SKU-1").with_name("Old mug").with_updated_at(at(23)),
    );

    let config = SyncConfig {
        sync_direction: SyncDirection::AToB,
        conflict_resolution: ConflictResolution::SourceWins,
        ..SyncConfig::default()
    };
    let engine = create_test_engine(config, &a, &b).await;
    let result = engine.sync_products().await;

    assert_eq!(result.synced_count, 1);
    assert_eq!(result.skipped_count, 1);
    assert_eq!(a.write_count(), 0);
    assert_eq!(
        b.record(EntityType::Products, "SKU-1").expect("SKU-1").name.as_deref(),
        Some("Mug")
    );
}

/// Test 6: Repeating a pass with nothing changed writes nothing
#[tokio::test]
async fn test_passes_are_idempotent() {
    let (a, b) = create_test_platforms();
    a.insert(
        EntityType::Products,
        CanonicalRecord::new("SKU-1").with_price(10.0).with_updated_at(at(10)),
    );
    a.insert(
        EntityType::Inventory,
        CanonicalRecord::new("SKU-1").with_quantity(4).with_updated_at(at(10)),
    );
    b.insert(
        EntityType::Products,
        CanonicalRecord::new("SKU-1").with_price(12.0).with_updated_at(at(8)),
    );
    b.insert(
        EntityType::Inventory,
        CanonicalRecord::new("SKU-1").with_quantity(9).with_updated_at(at(8)),
    );
    a.insert(EntityType::Orders, CanonicalRecord::new("ORD-1").with_status("paid"));

    let engine = create_test_engine(SyncConfig::default(), &a, &b).await;

    let first = engine.run_cycle().await.expect("first cycle");
    assert!(first.iter().all(|r| r.synced_count == 1));
    let writes = a.write_count() + b.write_count();

    let second = engine.run_cycle().await.expect("second cycle");
    for result in &second {
        assert_eq!(result.synced_count, 0, "{} wrote again", result.entity);
        assert_eq!(result.outcome(), PassOutcome::Skipped);
    }
    assert_eq!(a.write_count() + b.write_count(), writes);
}

/// Test 7: Writes invalidate cached reads so the next pass sees them
#[tokio::test]
async fn test_cached_passes_observe_own_writes() {
    let (a, b) = create_test_platforms();
    a.insert(EntityType::Products, CanonicalRecord::new("SKU-1").with_name("Mug"));
    b.insert(EntityType::Products, CanonicalRecord::new("SKU-2").with_name("Cap"));

    let engine = create_cached_test_engine(SyncConfig::default(), &a, &b).await;

    let first = engine.sync_products().await;
    assert_eq!(first.synced_count, 2);
    assert_eq!(a.calls(Operation::List), 1);

    // Both sides were written, so both listings are fetched again
    let second = engine.sync_products().await;
    assert_eq!(second.synced_count, 0);
    assert_eq!(second.skipped_count, 2);
    assert_eq!(a.calls(Operation::List), 2);
    assert_eq!(b.calls(Operation::List), 2);

    // Nothing changed since, so the listings come from cache
    let third = engine.sync_products().await;
    assert_eq!(third.skipped_count, 2);
    assert_eq!(a.calls(Operation::List), 2);
    assert_eq!(b.calls(Operation::List), 2);
}

/// Test 8: The loop runs a cycle per interval until stopped
#[tokio::test(start_paused = true)]
async fn test_periodic_loop_lifecycle() {
    let (a, b) = create_test_platforms();
    a.insert(EntityType::Products, CanonicalRecord::new("SKU-1"));

    let config = SyncConfig {
        sync_interval_secs: 60,
        ..SyncConfig::default()
    };
    let engine = create_test_engine(config, &a, &b).await;
    let mut state = engine.subscribe_state();
    assert_eq!(*state.borrow(), EngineState::Idle);

    engine.start_sync().await.expect("loop starts");
    assert_eq!(*state.borrow_and_update(), EngineState::Running);

    // Ticks at 0s, 60s and 120s
    tokio::time::sleep(Duration::from_secs(150)).await;
    engine.stop_sync().await;
    assert_eq!(engine.state(), EngineState::Idle);

    let history = engine.get_history(100);
    assert_eq!(history.len(), 9);
    assert_eq!(history[0].entity, EntityType::Products);
    assert_eq!(history[0].synced_count, 1);
    assert!(history[3..].iter().all(|r| r.synced_count == 0));

    // Stopping twice is harmless
    engine.stop_sync().await;

    // The loop can be restarted after a stop
    engine.start_sync().await.expect("loop restarts");
    tokio::time::sleep(Duration::from_secs(1)).await;
    engine.stop_sync().await;
    assert_eq!(engine.get_history(100).len(), 12);
}

/// Test 9: Starting twice keeps a single loop
#[tokio::test(start_paused = true)]
async fn test_start_is_idempotent() {
    let (a, b) = create_test_platforms();
    let config = SyncConfig {
        sync_interval_secs: 60,
        ..SyncConfig::default()
    };
    let engine = create_test_engine(config, &a, &b).await;

    engine.start_sync().await.expect("first start");
    engine.start_sync().await.expect("second start");
    tokio::time::sleep(Duration::from_secs(30)).await;
    engine.stop_sync().await;

    assert_eq!(engine.get_history(100).len(), 3);
    assert_eq!(a.calls(Operation::List), 3);
}

/// Test 10: A slow target does not stall the source fetch
#[tokio::test(start_paused = true)]
async fn test_sides_are_fetched_concurrently() {
    let a = Arc::new(
        InMemoryPlatform::new(common::SOURCE)
            .with_latency(Duration::from_secs(4))
            .with_records(
                EntityType::Products,
                vec![CanonicalRecord::new("SKU-1").with_name("Mug")],
            ),
    );
    let b = Arc::new(InMemoryPlatform::new(common::TARGET).with_latency(Duration::from_secs(4)));
    let engine = create_test_engine(SyncConfig::default(), &a, &b).await;

    let started = tokio::time::Instant::now();
    let result = engine.sync_products().await;
    let elapsed = started.elapsed();

    assert_eq!(result.synced_count, 1);
    // Two concurrent reads then one write
    assert!(elapsed >= Duration::from_secs(8));
    assert!(elapsed < Duration::from_secs(12));
}
