//! Reading and scored reading definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::error::{Error, Result};
use crate::limits::MAX_FUTURE_SKEW_SECS;

/// One timestamped sensor observation from a device.
///
/// Immutable once enqueued. `sensor_kind` stays a string on the wire so that
/// readings for kinds this build does not know still reach a worker and are
/// dropped there with an explicit error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Reading {
    /// Unique reading ID (assigned by the producer)
    #[serde(default = "Uuid::new_v4")]
    pub reading_id: Uuid,
    /// Max length mirrors `limits::MAX_DEVICE_ID_LEN`
    #[validate(length(min = 1, max = 256))]
    pub device_id: String,
    /// Max length mirrors `limits::MAX_SENSOR_KIND_LEN`
    #[validate(length(min = 1, max = 64))]
    pub sensor_kind: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl Reading {
    pub fn new(
        device_id: impl Into<String>,
        sensor_kind: impl Into<String>,
        value: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            reading_id: Uuid::new_v4(),
            device_id: device_id.into(),
            sensor_kind: sensor_kind.into(),
            value,
            timestamp,
        }
    }

    /// Attaches a verdict, producing the durable record.
    pub fn into_scored(
        self,
        is_anomaly: bool,
        score: f64,
        model_version: impl Into<String>,
    ) -> ScoredReading {
        ScoredReading {
            reading_id: self.reading_id,
            device_id: self.device_id,
            sensor_kind: self.sensor_kind,
            value: self.value,
            timestamp: self.timestamp,
            is_anomaly,
            score,
            model_version: model_version.into(),
        }
    }
}

/// A reading annotated with an anomaly verdict. Written once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredReading {
    pub reading_id: Uuid,
    pub device_id: String,
    pub sensor_kind: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    pub is_anomaly: bool,
    pub score: f64,
    pub model_version: String,
}

/// Validates a reading at the producer boundary.
///
/// Checks field lengths, that the value is a finite number, and that the
/// timestamp is not implausibly far in the future.
pub fn validate_reading(reading: &Reading) -> Result<()> {
    reading.validate()?;

    if reading.device_id.trim().is_empty() {
        return Err(Error::validation("device_id must not be blank"));
    }
    if reading.sensor_kind.trim().is_empty() {
        return Err(Error::validation("sensor_kind must not be blank"));
    }

    if !reading.value.is_finite() {
        return Err(Error::validation(format!(
            "value must be finite, got {}",
            reading.value
        )));
    }

    let skew = reading.timestamp - Utc::now();
    if skew.num_seconds() > MAX_FUTURE_SKEW_SECS {
        return Err(Error::validation(format!(
            "timestamp is {}s in the future",
            skew.num_seconds()
        )));
    }

    Ok(())
}
