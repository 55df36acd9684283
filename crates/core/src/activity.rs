//! Device activity view.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::retention::RetentionThreshold;

/// Last-seen summary for one device, derived from stored rows.
///
/// Never authoritative: always recomputable as max(timestamp) per device_id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceActivity {
    pub device_id: String,
    pub last_seen: DateTime<Utc>,
    pub row_count: u64,
}

/// Lifecycle state of a device with respect to pruning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    /// Has rows within the threshold.
    Active,
    /// Threshold exceeded, eligible for the next prune tick.
    Stale,
    /// Rows removed; device absent from the store.
    Purged,
}

impl DeviceActivity {
    /// Time since the device was last seen.
    pub fn silence(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.last_seen
    }

    /// Classifies the device at `now`.
    pub fn state(&self, now: DateTime<Utc>, threshold: RetentionThreshold) -> DeviceState {
        if self.row_count == 0 {
            DeviceState::Purged
        } else if threshold.is_exceeded_by(self.silence(now)) {
            DeviceState::Stale
        } else {
            DeviceState::Active
        }
    }
}
