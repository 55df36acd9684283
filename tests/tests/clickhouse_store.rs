//! ClickHouse store against a real server.
//!
//! Requires Docker (or `PIPELINE_TEST_CLICKHOUSE_URL`); run with
//! `cargo test -p integration-tests -- --ignored`.

use chrono::Duration as ChronoDuration;
use integration_tests::{containers::TestContainers, fixtures};
use pipeline_core::ScoredReading;
use timeseries_store::{health, ClickHouseClient, ClickHouseStore, ReadingStore};

async fn store(containers: &TestContainers) -> ClickHouseStore {
    let client =
        ClickHouseClient::new(containers.clickhouse.clone()).expect("Failed to create client");
    assert!(health::check_connection(&client).await, "ClickHouse not reachable");
    health::init_schema(&client).await.expect("Failed to initialize schema");

    let store = ClickHouseStore::new(client);
    store.truncate().await.expect("Failed to truncate");
    store
}

fn scored(device: &str, offset_secs: i64, value: f64, anomaly: bool) -> ScoredReading {
    fixtures::reading_at(device, "temperature", value, offset_secs).into_scored(
        anomaly,
        if anomaly { 9.5 } else { 0.3 },
        "zscore-v1",
    )
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_clickhouse_write_latest_range() {
    let containers = TestContainers::start().await;
    let store = store(&containers).await;

    for (offset, value) in [(0, 20.0), (10, 21.0), (20, 22.0)] {
        store.write(&scored("d1", offset, value, false)).await.unwrap();
    }
    let spike = scored("d1", 30, 500.0, true);
    store.write(&spike).await.unwrap();

    let latest = store.latest("d1").await.unwrap().expect("latest missing");
    assert_eq!(latest, spike);
    assert!(store.latest("nobody").await.unwrap().is_none());

    let rows = store
        .range(
            "d1",
            fixtures::t0() + ChronoDuration::seconds(10),
            fixtures::t0() + ChronoDuration::seconds(30),
        )
        .await
        .unwrap();
    let values: Vec<f64> = rows.iter().map(|r| r.value).collect();
    assert_eq!(values, vec![21.0, 22.0]);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_clickhouse_prune_and_activity() {
    let containers = TestContainers::start().await;
    let store = store(&containers).await;

    for offset in 0..5 {
        store.write(&scored("d3", offset, 20.0, false)).await.unwrap();
    }
    store.write(&scored("d4", 100, 20.0, false)).await.unwrap();

    let mut activity = store.device_activity().await.unwrap();
    activity.sort_by(|a, b| a.device_id.cmp(&b.device_id));
    assert_eq!(activity.len(), 2);
    assert_eq!(activity[0].row_count, 5);
    assert_eq!(activity[0].last_seen, fixtures::t0() + ChronoDuration::seconds(4));

    assert_eq!(store.prune("d3").await.unwrap(), 5);
    assert_eq!(store.prune("d3").await.unwrap(), 0);
    assert!(store.latest("d3").await.unwrap().is_none());
    assert!(store.latest("d4").await.unwrap().is_some());

    // A device that writes again is pruned from scratch.
    store.write(&scored("d3", 200, 20.0, false)).await.unwrap();
    assert_eq!(store.prune("d3").await.unwrap(), 1);
}
