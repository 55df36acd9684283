//! End-to-end tests for the scoring pipeline.
//!
//! Readings go through the real queue, worker pool and model registry into an
//! in-memory store: enqueue → dequeue → score → write.

use integration_tests::{fixtures, setup::TestContext};
use pipeline_core::SensorKind;
use reading_queue::ReadingQueue;
use std::collections::HashSet;
use std::time::Duration;
use telemetry::metrics;

/// A single normal temperature reading is persisted with its fields intact.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_reading_persisted() {
    let ctx = TestContext::new();

    let reading = fixtures::reading("d1", "temperature", 22.5);
    ctx.enqueue(reading.clone()).await.expect("enqueue failed");

    let rows = ctx.wait_for_rows("d1", 1, Duration::from_secs(5)).await;
    assert_eq!(rows.len(), 1, "Expected one persisted reading for d1");

    let row = &rows[0];
    assert_eq!(row.reading_id, reading.reading_id);
    assert_eq!(row.device_id, "d1");
    assert_eq!(row.sensor_kind, "temperature");
    assert_eq!(row.value, 22.5);
    assert_eq!(row.timestamp, reading.timestamp);
    assert_eq!(row.model_version, "zscore-v1");
    assert!(!row.is_anomaly, "22.5 C on a fresh model is not anomalous");

    ctx.shutdown().await;
}

/// One spike among a steady baseline is the only reading flagged.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_only_spike_flagged() {
    let ctx = TestContext::new();

    let readings = fixtures::series_with_spike("d2", 1000, 600, 500.0);
    let spike_id = readings[600].reading_id;
    ctx.enqueue_all(readings).await.expect("enqueue failed");

    let rows = ctx.wait_for_rows("d2", 1000, Duration::from_secs(10)).await;
    assert_eq!(rows.len(), 1000, "Expected all 1000 readings persisted");

    let anomalies: Vec<_> = rows.iter().filter(|r| r.is_anomaly).collect();
    assert_eq!(anomalies.len(), 1, "Expected exactly one anomaly");
    assert_eq!(anomalies[0].reading_id, spike_id);
    assert_eq!(anomalies[0].value, 500.0);

    ctx.shutdown().await;
}

/// A spike inside the physical range is caught by the learned baseline.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_in_range_spike_flagged_by_baseline() {
    let ctx = TestContext::new();

    let (min, max) = SensorKind::Temperature.physical_bounds();
    assert!(min < 40.0 && 40.0 < max, "Spike must be physically plausible");

    let readings = fixtures::series_with_spike("d6", 1000, 600, 40.0);
    let spike_id = readings[600].reading_id;
    ctx.enqueue_all(readings).await.expect("enqueue failed");

    let rows = ctx.wait_for_rows("d6", 1000, Duration::from_secs(10)).await;
    assert_eq!(rows.len(), 1000, "Expected all 1000 readings persisted");

    let anomalies: Vec<_> = rows.iter().filter(|r| r.is_anomaly).collect();
    assert_eq!(anomalies.len(), 1, "Expected exactly one anomaly");
    assert_eq!(anomalies[0].reading_id, spike_id);
    assert_eq!(anomalies[0].value, 40.0);

    ctx.shutdown().await;
}

/// Unknown sensor kinds are never persisted; other readings still are.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unknown_kind_not_persisted() {
    let ctx = TestContext::new();
    let unknown_before = metrics().unknown_sensor_kinds.get();
    let dropped_before = metrics().readings_dropped.get();

    ctx.enqueue(fixtures::reading("d4", "unknown_kind", 1.0))
        .await
        .expect("enqueue failed");
    ctx.enqueue(fixtures::reading("d5", "humidity", 40.0))
        .await
        .expect("enqueue failed");

    let rows = ctx.wait_for_rows("d5", 1, Duration::from_secs(5)).await;
    assert_eq!(rows.len(), 1);

    ctx.settle().await;
    assert!(ctx.rows("d4").await.is_empty(), "Unknown kind must not be stored");
    assert!(
        ctx.registry.kinds().iter().all(|k| k.as_str() != "unknown_kind"),
        "No model should exist for an unknown kind"
    );
    assert!(
        metrics().unknown_sensor_kinds.get() > unknown_before,
        "Unknown kind drop must be recorded"
    );
    assert!(metrics().readings_dropped.get() > dropped_before);

    ctx.shutdown().await;
}

/// Competing workers persist every reading exactly once.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_every_reading_persisted_once() {
    let ctx = TestContext::new();

    let readings = fixtures::mixed_readings(20, 25);
    let expected: HashSet<_> = readings.iter().map(|r| r.reading_id).collect();
    ctx.enqueue_all(readings).await.expect("enqueue failed");

    let mut seen = Vec::new();
    for d in 0..20 {
        let device = format!("device-{}", d);
        let rows = ctx.wait_for_rows(&device, 25, Duration::from_secs(10)).await;
        seen.extend(rows.into_iter().map(|r| r.reading_id));
    }
    ctx.settle().await;

    let unique: HashSet<_> = seen.iter().copied().collect();
    assert_eq!(seen.len(), 500, "No reading may be stored twice");
    assert_eq!(unique, expected);

    ctx.shutdown().await;
}

/// Same-kind readings from many devices share one model.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_one_model_per_kind() {
    let ctx = TestContext::new();

    ctx.enqueue_all(fixtures::mixed_readings(8, 4))
        .await
        .expect("enqueue failed");
    for d in 0..8 {
        ctx.wait_for_rows(&format!("device-{}", d), 4, Duration::from_secs(5))
            .await;
    }

    assert_eq!(ctx.registry.len(), 4);
    let handle = ctx.registry.get_or_create("temperature").unwrap();
    assert_eq!(handle.calls(), 8, "Every temperature reading went through one handle");

    ctx.shutdown().await;
}

/// Shutdown returns promptly with an idle pool.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_with_idle_pool() {
    let ctx = TestContext::new();

    tokio::time::timeout(Duration::from_secs(2), ctx.shutdown())
        .await
        .expect("Pool did not shut down");
}

/// Readings accepted before shutdown are persisted, not silently discarded.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shutdown_with_backlog() {
    let ctx = TestContext::with_store(std::sync::Arc::new(timeseries_store::MemoryStore::new()), 1);

    let readings = fixtures::mixed_readings(50, 40);
    ctx.enqueue_all(readings).await.expect("enqueue failed");
    let store = ctx.store.clone();
    let queue = ctx.queue.clone();

    let abandoned = tokio::time::timeout(Duration::from_secs(30), ctx.shutdown())
        .await
        .expect("Pool did not shut down");

    assert_eq!(abandoned, 0, "Backlog should drain within the timeout");
    assert!(queue.is_empty());
    let mut persisted = 0;
    for d in 0..50 {
        persisted += integration_tests::setup::all_rows(store.as_ref(), &format!("device-{}", d))
            .await
            .len();
    }
    assert_eq!(persisted, 2000);
}
