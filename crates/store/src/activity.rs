//! Device activity view over a reading store.

use chrono::{DateTime, Utc};
use pipeline_core::{DeviceActivity, DeviceState, Result, RetentionThreshold};
use std::sync::Arc;

use crate::ReadingStore;

/// Derives per-device activity from a store on demand.
///
/// Nothing is cached: each call recomputes from stored rows, so the view can
/// never drift from the data it describes.
#[derive(Clone)]
pub struct ActivityTracker {
    store: Arc<dyn ReadingStore>,
}

impl ActivityTracker {
    pub fn new(store: Arc<dyn ReadingStore>) -> Self {
        Self { store }
    }

    /// Current activity of every device with rows.
    pub async fn snapshot(&self) -> Result<Vec<DeviceActivity>> {
        self.store.device_activity().await
    }

    /// Activity paired with each device's state at `now`.
    pub async fn classify(
        &self,
        now: DateTime<Utc>,
        threshold: RetentionThreshold,
    ) -> Result<Vec<(DeviceActivity, DeviceState)>> {
        Ok(self
            .snapshot()
            .await?
            .into_iter()
            .map(|activity| {
                let state = activity.state(now, threshold);
                (activity, state)
            })
            .collect())
    }

    /// Devices whose silence exceeds `threshold` at `now`, longest-silent first.
    pub async fn stale_devices(
        &self,
        now: DateTime<Utc>,
        threshold: RetentionThreshold,
    ) -> Result<Vec<DeviceActivity>> {
        let mut stale: Vec<_> = self
            .classify(now, threshold)
            .await?
            .into_iter()
            .filter(|(_, state)| *state == DeviceState::Stale)
            .map(|(activity, _)| activity)
            .collect();

        stale.sort_by(|a, b| {
            a.last_seen
                .cmp(&b.last_seen)
                .then_with(|| a.device_id.cmp(&b.device_id))
        });
        Ok(stale)
    }
}
