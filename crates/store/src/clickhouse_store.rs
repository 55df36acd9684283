//! ClickHouse-backed reading store.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use clickhouse::Row;
use pipeline_core::{DeviceActivity, Error, Result, ScoredReading};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use telemetry::metrics;
use tracing::{debug, info};
use uuid::Uuid;

use crate::client::ClickHouseClient;
use crate::schema::READINGS_TABLE;
use crate::ReadingStore;

/// Row of the `scored_readings` table.
#[derive(Debug, Clone, Row, Serialize, Deserialize)]
pub struct ReadingRow {
    pub reading_id: String,
    pub device_id: String,
    pub sensor_kind: String,
    pub value: f64,
    pub timestamp: i64, // DateTime64(3) as milliseconds
    pub is_anomaly: u8,
    pub score: f64,
    pub model_version: String,
}

impl From<&ScoredReading> for ReadingRow {
    fn from(reading: &ScoredReading) -> Self {
        Self {
            reading_id: reading.reading_id.to_string(),
            device_id: reading.device_id.clone(),
            sensor_kind: reading.sensor_kind.clone(),
            value: reading.value,
            timestamp: reading.timestamp.timestamp_millis(),
            is_anomaly: u8::from(reading.is_anomaly),
            score: reading.score,
            model_version: reading.model_version.clone(),
        }
    }
}

impl TryFrom<ReadingRow> for ScoredReading {
    type Error = Error;

    fn try_from(row: ReadingRow) -> Result<Self> {
        let reading_id = Uuid::parse_str(&row.reading_id)
            .map_err(|e| Error::store(format!("Invalid reading_id {}: {}", row.reading_id, e)))?;

        Ok(Self {
            reading_id,
            device_id: row.device_id,
            sensor_kind: row.sensor_kind,
            value: row.value,
            timestamp: from_millis(row.timestamp)?,
            is_anomaly: row.is_anomaly != 0,
            score: row.score,
            model_version: row.model_version,
        })
    }
}

/// Rows of one device as seen when a prune starts.
#[derive(Debug, Clone, Row, Deserialize)]
struct PruneTarget {
    row_count: u64,
    last_ts_ms: i64,
}

/// Per-device aggregate used to derive activity.
#[derive(Debug, Clone, Row, Deserialize)]
struct ActivityRow {
    device_id: String,
    last_seen: i64,
    row_count: u64,
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| Error::store(format!("Timestamp out of range: {}", ms)))
}

const SELECT_COLUMNS: &str = "reading_id, device_id, sensor_kind, value, \
     toUnixTimestamp64Milli(timestamp) AS ts_ms, is_anomaly, score, model_version";

/// Count and newest timestamp of a device's rows.
fn prune_target_sql() -> String {
    format!(
        "SELECT count() AS row_count, toUnixTimestamp64Milli(max(timestamp)) AS last_ts_ms \
         FROM {} WHERE device_id = ?",
        READINGS_TABLE
    )
}

/// Deletes a device's rows up to and including the captured newest timestamp.
fn prune_delete_sql() -> String {
    format!(
        "ALTER TABLE {} DELETE \
         WHERE device_id = ? AND timestamp <= fromUnixTimestamp64Milli(toInt64(?)) \
         SETTINGS mutations_sync = 2",
        READINGS_TABLE
    )
}

/// Reading store on a ClickHouse MergeTree table.
///
/// `prune` runs a synchronous mutation (`mutations_sync = 2`), so the call
/// returns only once every replica has dropped the device's rows. ClickHouse
/// applies a mutation part by part; a read racing it can see a shorter
/// history for that device.
///
/// The mutation is bounded by the newest timestamp seen when the prune
/// started, so readings a device writes while being pruned survive and the
/// returned count matches the rows deleted. A backdated reading inserted in
/// that window is deleted without being counted.
#[derive(Clone)]
pub struct ClickHouseStore {
    client: ClickHouseClient,
}

impl ClickHouseStore {
    pub fn new(client: ClickHouseClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &ClickHouseClient {
        &self.client
    }

    async fn prune_target(&self, device_id: &str) -> Result<PruneTarget> {
        self.client
            .run(
                "prune target",
                self.client
                    .inner()
                    .query(&prune_target_sql())
                    .bind(device_id)
                    .fetch_one::<PruneTarget>(),
            )
            .await
    }

    /// Removes all rows (test cleanup).
    pub async fn truncate(&self) -> Result<()> {
        let sql = format!("TRUNCATE TABLE IF EXISTS {}", READINGS_TABLE);
        self.client
            .run("truncate", self.client.inner().query(&sql).execute())
            .await
    }
}

#[async_trait]
impl ReadingStore for ClickHouseStore {
    async fn write(&self, reading: &ScoredReading) -> Result<()> {
        let start = Instant::now();
        let row = ReadingRow::from(reading);

        self.client
            .run("insert", async {
                let mut insert = self.client.inner().insert(READINGS_TABLE)?;
                insert.write(&row).await?;
                insert.end().await
            })
            .await?;

        metrics()
            .store_write_latency_ms
            .observe(start.elapsed().as_millis() as u64);
        debug!(
            device_id = %reading.device_id,
            reading_id = %reading.reading_id,
            "Inserted scored reading"
        );
        Ok(())
    }

    async fn latest(&self, device_id: &str) -> Result<Option<ScoredReading>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE device_id = ? ORDER BY timestamp DESC, reading_id DESC LIMIT 1",
            SELECT_COLUMNS, READINGS_TABLE
        );
        let row = self
            .client
            .run(
                "latest",
                self.client
                    .inner()
                    .query(&sql)
                    .bind(device_id)
                    .fetch_optional::<ReadingRow>(),
            )
            .await?;

        row.map(ScoredReading::try_from).transpose()
    }

    async fn range(
        &self,
        device_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ScoredReading>> {
        let sql = format!(
            "SELECT {} FROM {} \
             WHERE device_id = ? \
               AND timestamp >= fromUnixTimestamp64Milli(toInt64(?)) \
               AND timestamp < fromUnixTimestamp64Milli(toInt64(?)) \
             ORDER BY timestamp, reading_id",
            SELECT_COLUMNS, READINGS_TABLE
        );
        let rows = self
            .client
            .run(
                "range",
                self.client
                    .inner()
                    .query(&sql)
                    .bind(device_id)
                    .bind(from.timestamp_millis())
                    .bind(to.timestamp_millis())
                    .fetch_all::<ReadingRow>(),
            )
            .await?;

        rows.into_iter().map(ScoredReading::try_from).collect()
    }

    async fn prune(&self, device_id: &str) -> Result<u64> {
        let target = self.prune_target(device_id).await?;
        if target.row_count == 0 {
            return Ok(0);
        }

        self.client
            .run(
                "prune",
                self.client
                    .inner()
                    .query(&prune_delete_sql())
                    .bind(device_id)
                    .bind(target.last_ts_ms)
                    .execute(),
            )
            .await?;

        info!(device_id = %device_id, rows = target.row_count, "Pruned device rows");
        Ok(target.row_count)
    }

    async fn device_activity(&self) -> Result<Vec<DeviceActivity>> {
        let sql = format!(
            "SELECT device_id, toUnixTimestamp64Milli(max(timestamp)) AS last_seen, count() AS row_count \
             FROM {} GROUP BY device_id",
            READINGS_TABLE
        );
        let rows = self
            .client
            .run(
                "device activity",
                self.client.inner().query(&sql).fetch_all::<ActivityRow>(),
            )
            .await?;

        rows.into_iter()
            .map(|row| {
                Ok(DeviceActivity {
                    device_id: row.device_id,
                    last_seen: from_millis(row.last_seen)?,
                    row_count: row.row_count,
                })
            })
            .collect()
    }

    fn backend(&self) -> &'static str {
        "clickhouse"
    }
}
