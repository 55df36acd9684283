//! In-memory reading store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use pipeline_core::{DeviceActivity, Result, ScoredReading};
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;
use telemetry::metrics;
use tracing::{debug, info};
use uuid::Uuid;

use crate::ReadingStore;

type RowKey = (i64, Uuid);

/// Reading store held in process memory.
///
/// Rows are grouped per device and ordered by `(timestamp, reading_id)`, so a
/// repeated write of the same reading overwrites instead of duplicating.
/// Pruning removes the device entry under the write lock, which makes it
/// atomic for readers.
#[derive(Default)]
pub struct MemoryStore {
    devices: RwLock<HashMap<String, BTreeMap<RowKey, ScoredReading>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total rows across all devices.
    pub fn row_count(&self) -> usize {
        self.devices.read().values().map(BTreeMap::len).sum()
    }

    /// Rows stored for one device.
    pub fn device_rows(&self, device_id: &str) -> usize {
        self.devices.read().get(device_id).map_or(0, BTreeMap::len)
    }

    /// Every stored reading of a device, oldest first.
    pub fn readings(&self, device_id: &str) -> Vec<ScoredReading> {
        self.devices
            .read()
            .get(device_id)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ReadingStore for MemoryStore {
    async fn write(&self, reading: &ScoredReading) -> Result<()> {
        let start = Instant::now();
        let key = (reading.timestamp.timestamp_millis(), reading.reading_id);

        self.devices
            .write()
            .entry(reading.device_id.clone())
            .or_default()
            .insert(key, reading.clone());

        metrics()
            .store_write_latency_ms
            .observe(start.elapsed().as_millis() as u64);
        Ok(())
    }

    async fn latest(&self, device_id: &str) -> Result<Option<ScoredReading>> {
        Ok(self
            .devices
            .read()
            .get(device_id)
            .and_then(|rows| rows.values().next_back().cloned()))
    }

    async fn range(
        &self,
        device_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ScoredReading>> {
        if from >= to {
            return Ok(Vec::new());
        }

        let lower = (from.timestamp_millis(), Uuid::nil());
        let upper = (to.timestamp_millis(), Uuid::nil());

        Ok(self
            .devices
            .read()
            .get(device_id)
            .map(|rows| rows.range(lower..upper).map(|(_, r)| r.clone()).collect())
            .unwrap_or_default())
    }

    async fn prune(&self, device_id: &str) -> Result<u64> {
        let removed = self.devices.write().remove(device_id);
        let rows = removed.map_or(0, |rows| rows.len() as u64);

        if rows > 0 {
            info!(device_id = %device_id, rows = rows, "Pruned device rows");
        } else {
            debug!(device_id = %device_id, "Prune found no rows");
        }
        Ok(rows)
    }

    async fn device_activity(&self) -> Result<Vec<DeviceActivity>> {
        Ok(self
            .devices
            .read()
            .iter()
            .filter_map(|(device_id, rows)| {
                let (_, last) = rows.last_key_value()?;
                Some(DeviceActivity {
                    device_id: device_id.clone(),
                    last_seen: last.timestamp,
                    row_count: rows.len() as u64,
                })
            })
            .collect())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
