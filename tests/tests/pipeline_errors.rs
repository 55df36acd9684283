//! Failure handling in the scoring pipeline.
//!
//! Each dequeued reading must end up persisted once or dropped with a logged
//! error, and no failure may take down the pool.

use integration_tests::{
    fixtures,
    mocks::FaultyStore,
    setup::{standalone_worker, TestContext},
};
use pipeline_core::Error;
use reading_queue::{MemoryQueue, ReadingQueue};
use std::sync::Arc;
use std::time::Duration;
use telemetry::health;
use worker::Outcome;

/// Transient store failures are retried and the reading is stored once.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_transient_store_failure_retried() {
    let store = Arc::new(FaultyStore::flaky(2));
    let ctx = TestContext::with_store(store.clone(), 1);

    ctx.enqueue(fixtures::reading("d1", "temperature", 21.0))
        .await
        .expect("enqueue failed");

    let rows = ctx.wait_for_rows("d1", 1, Duration::from_secs(5)).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(store.write_attempts(), 3, "Two failures then one success");

    ctx.shutdown().await;
}

/// A store that never recovers drops the reading after the retry budget and
/// flips the store health signal once the threshold is reached.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_persistent_store_failure_drops_and_reports() {
    let store = Arc::new(FaultyStore::failing());
    let ctx = TestContext::with_store(store.clone(), 2);

    // 3 readings x 4 attempts crosses the threshold of 10.
    for i in 0..3 {
        ctx.enqueue(fixtures::reading(&format!("d{}", i), "humidity", 40.0))
            .await
            .expect("enqueue failed");
    }
    ctx.settle().await;

    assert_eq!(store.inner.row_count(), 0);
    assert_eq!(store.write_attempts(), 12);
    assert!(!health().store.is_healthy(), "Store should be reported unhealthy");

    ctx.shutdown().await;
}

/// Outcomes partition the readings: persisted or dropped, never both.
#[tokio::test]
async fn test_outcomes_are_exclusive() {
    let store = Arc::new(FaultyStore::healthy());
    let worker = standalone_worker(store.clone());

    let readings = vec![
        fixtures::reading("d1", "temperature", 22.0),
        fixtures::reading("d1", "unknown_kind", 1.0),
        fixtures::reading("d2", "pressure", 1013.0),
        fixtures::reading("d2", "pressure", f64::NAN),
        fixtures::reading("d3", "vibration", 3.2),
    ];

    let mut persisted = Vec::new();
    let mut dropped = Vec::new();
    for reading in readings {
        let id = reading.reading_id;
        match worker.process(reading).await {
            Outcome::Persisted(scored) => {
                assert_eq!(scored.reading_id, id);
                persisted.push(id);
            }
            Outcome::Dropped(e) => dropped.push((id, e)),
        }
    }

    assert_eq!(persisted.len(), 3);
    assert_eq!(dropped.len(), 2);
    assert!(matches!(dropped[0].1, Error::UnknownSensorKind(_)));
    assert_eq!(dropped[0].1.code(), "MODEL_001");
    assert!(matches!(dropped[1].1, Error::Scoring(_)));

    assert_eq!(store.inner.row_count(), 3);
    for (id, _) in &dropped {
        assert!(!persisted.contains(id));
    }
}

/// A panicking worker is replaced and the pool keeps consuming.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_panicked_worker_restarted() {
    let store = Arc::new(FaultyStore::panicking_on("boom"));
    let ctx = TestContext::with_store(store.clone(), 1);

    ctx.enqueue(fixtures::reading("boom", "temperature", 20.0))
        .await
        .expect("enqueue failed");
    for i in 0..5 {
        ctx.enqueue(fixtures::reading("after", "temperature", 20.0 + i as f64 * 0.1))
            .await
            .expect("enqueue failed");
    }

    let rows = ctx.wait_for_rows("after", 5, Duration::from_secs(5)).await;
    assert_eq!(rows.len(), 5, "Single-worker pool must survive the panic");
    assert!(ctx.rows("boom").await.is_empty());

    ctx.shutdown().await;
}

/// A full queue rejects immediately instead of blocking the producer.
#[tokio::test]
async fn test_full_queue_rejects_fast() {
    let queue = MemoryQueue::new(2);
    queue.enqueue(fixtures::reading("d1", "co2", 400.0)).await.unwrap();
    queue.enqueue(fixtures::reading("d1", "co2", 401.0)).await.unwrap();

    let result = tokio::time::timeout(
        Duration::from_millis(100),
        queue.enqueue(fixtures::reading("d1", "co2", 402.0)),
    )
    .await
    .expect("enqueue blocked on a full queue");

    let err = result.unwrap_err();
    assert!(matches!(err, Error::QueueFull { capacity: 2 }));
    assert_eq!(err.code(), "QUEUE_001");
    assert_eq!(queue.len(), 2);
}

/// Readings from the stdin wire format decode back to the same reading.
#[test]
fn test_reading_json_line_decodes() {
    let reading = fixtures::reading("d7", "power", 1500.0);
    let line = fixtures::reading_json(&reading);

    let decoded: pipeline_core::Reading = serde_json::from_str(&line).unwrap();
    assert_eq!(decoded, reading);
    assert!(pipeline_core::validate_reading(&decoded).is_ok());
}
