//! Pruning of silent devices against an in-memory store.

use chrono::Duration as ChronoDuration;
use integration_tests::{fixtures, mocks::FaultyStore, setup::all_rows};
use pipeline_core::{DeviceState, RetentionThreshold};
use std::sync::Arc;
use timeseries_store::{ActivityTracker, MemoryStore, ReadingStore};
use worker::{LocalLease, PruneConfig, PruningWorker};

fn config(threshold_secs: u64) -> PruneConfig {
    PruneConfig {
        threshold: RetentionThreshold::from_secs(threshold_secs).unwrap(),
        ..PruneConfig::default()
    }
}

async fn seed(store: &dyn ReadingStore, device: &str, offsets: &[i64]) {
    for offset in offsets {
        let scored = fixtures::reading_at(device, "temperature", 20.0, *offset)
            .into_scored(false, 0.0, "zscore-v1");
        store.write(&scored).await.expect("write failed");
    }
}

/// Device last seen at T0 survives a tick at T0+30s and is removed at T0+61s.
#[tokio::test]
async fn test_silent_device_pruned_after_threshold() {
    let store = Arc::new(MemoryStore::new());
    seed(store.as_ref(), "d3", &[-120, -60, 0]).await;

    let pruner = PruningWorker::new(store.clone(), config(60));

    let report = pruner
        .run_at(fixtures::t0() + ChronoDuration::seconds(30))
        .await
        .expect("tick failed");
    assert_eq!(report.devices_pruned, 0);
    assert_eq!(all_rows(store.as_ref(), "d3").await.len(), 3);

    let report = pruner
        .run_at(fixtures::t0() + ChronoDuration::seconds(61))
        .await
        .expect("tick failed");
    assert_eq!(report.devices_pruned, 1);
    assert_eq!(report.rows_pruned, 3);
    assert!(all_rows(store.as_ref(), "d3").await.is_empty());
}

/// After a tick, stale devices have no rows and active devices are untouched.
#[tokio::test]
async fn test_tick_separates_stale_and_active() {
    let store = Arc::new(MemoryStore::new());
    seed(store.as_ref(), "quiet-1", &[0, 1]).await;
    seed(store.as_ref(), "quiet-2", &[5]).await;
    seed(store.as_ref(), "busy", &[0, 100, 200]).await;
    seed(store.as_ref(), "edge", &[140]).await;

    let now = fixtures::t0() + ChronoDuration::seconds(200);
    let pruner = PruningWorker::new(store.clone(), config(60));
    pruner.run_at(now).await.expect("tick failed");

    let tracker = ActivityTracker::new(store.clone());
    let threshold = RetentionThreshold::from_secs(60).unwrap();
    let states = tracker.classify(now, threshold).await.unwrap();

    let remaining: Vec<_> = states.iter().map(|(a, _)| a.device_id.as_str()).collect();
    assert!(!remaining.contains(&"quiet-1"));
    assert!(!remaining.contains(&"quiet-2"));
    // Exactly at the threshold is not beyond it.
    assert!(remaining.contains(&"edge"));
    assert!(states.iter().all(|(_, s)| *s == DeviceState::Active));
    assert_eq!(all_rows(store.as_ref(), "busy").await.len(), 3);
}

/// Pruning twice removes rows once and then reports nothing.
#[tokio::test]
async fn test_prune_idempotent() {
    let store = MemoryStore::new();
    seed(&store, "d3", &[0, 1, 2, 3]).await;

    assert_eq!(store.prune("d3").await.unwrap(), 4);
    assert_eq!(store.prune("d3").await.unwrap(), 0);
}

/// Concurrent ticks never double-count: the lease lets one through.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_ticks_do_not_double_count() {
    let store = Arc::new(MemoryStore::new());
    for d in 0..50 {
        seed(store.as_ref(), &format!("d{}", d), &[0, 1, 2]).await;
    }

    let lease = Arc::new(LocalLease::new());
    let now = fixtures::t0() + ChronoDuration::hours(1);

    let mut handles = Vec::new();
    for _ in 0..4 {
        let pruner = PruningWorker::with_lease(store.clone(), config(60), lease.clone());
        handles.push(tokio::spawn(async move { pruner.run_at(now).await }));
    }

    let mut rows = 0;
    for handle in handles {
        rows += handle.await.unwrap().expect("tick failed").rows_pruned;
    }
    assert_eq!(rows, 150, "Each row is counted by exactly one tick");
    assert_eq!(store.row_count(), 0);
}

/// A device that reports again after being purged is tracked as new.
#[tokio::test]
async fn test_purged_device_returns_as_active() {
    let store = Arc::new(MemoryStore::new());
    seed(store.as_ref(), "d8", &[0]).await;

    let pruner = PruningWorker::new(store.clone(), config(60));
    pruner
        .run_at(fixtures::t0() + ChronoDuration::seconds(120))
        .await
        .unwrap();
    assert!(store.latest("d8").await.unwrap().is_none());

    seed(store.as_ref(), "d8", &[130]).await;
    let tracker = ActivityTracker::new(store.clone());
    let states = tracker
        .classify(
            fixtures::t0() + ChronoDuration::seconds(140),
            RetentionThreshold::from_secs(60).unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(states.len(), 1);
    assert_eq!(states[0].0.row_count, 1);
    assert_eq!(states[0].1, DeviceState::Active);
}

/// Failed prunes are counted and the device is picked up on the next tick.
#[tokio::test]
async fn test_failed_prune_retried_next_tick() {
    let store = Arc::new(FaultyStore::healthy());
    seed(store.as_ref(), "d9", &[0, 1]).await;

    let pruner = PruningWorker::new(store.clone(), config(60));
    let now = fixtures::t0() + ChronoDuration::hours(2);

    store.set_prune_failure(true);
    let report = pruner.run_at(now).await.expect("tick failed");
    assert_eq!(report.failed, 1);
    assert_eq!(store.inner.device_rows("d9"), 2);

    store.set_prune_failure(false);
    let report = pruner.run_at(now).await.expect("tick failed");
    assert_eq!(report.devices_pruned, 1);
    assert_eq!(store.inner.device_rows("d9"), 0);
}
