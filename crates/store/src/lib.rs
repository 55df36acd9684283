//! Time-series store for scored readings.
//!
//! Append-only per device, keyed by `(device_id, timestamp)`. The only
//! deletion is `prune`, which removes every row of one device at once.

pub mod activity;
pub mod clickhouse_store;
pub mod client;
pub mod config;
pub mod health;
pub mod memory;
pub mod schema;

pub use activity::ActivityTracker;
pub use clickhouse_store::ClickHouseStore;
pub use client::ClickHouseClient;
pub use config::*;
pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pipeline_core::{DeviceActivity, Result, ScoredReading};

/// Durable home of scored readings.
#[async_trait]
pub trait ReadingStore: Send + Sync {
    /// Appends one scored reading.
    async fn write(&self, reading: &ScoredReading) -> Result<()>;

    /// Most recent reading of a device, if it has any rows.
    async fn latest(&self, device_id: &str) -> Result<Option<ScoredReading>>;

    /// Readings of a device with `from <= timestamp < to`, oldest first.
    async fn range(
        &self,
        device_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ScoredReading>>;

    /// Deletes every row of a device and returns how many were removed.
    ///
    /// Readers see either all of the device's rows or none of them.
    /// Pruning an absent device returns 0.
    async fn prune(&self, device_id: &str) -> Result<u64>;

    /// Last-seen timestamp and row count for every device with rows.
    async fn device_activity(&self) -> Result<Vec<DeviceActivity>>;

    /// Backend name for logs.
    fn backend(&self) -> &'static str;
}
