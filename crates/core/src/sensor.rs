//! Sensor kind definitions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Category of measurement. Determines which anomaly model scores a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    Temperature,
    Humidity,
    Pressure,
    Vibration,
    Power,
    Co2,
}

impl SensorKind {
    /// All known sensor kinds.
    pub const ALL: [SensorKind; 6] = [
        Self::Temperature,
        Self::Humidity,
        Self::Pressure,
        Self::Vibration,
        Self::Power,
        Self::Co2,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Temperature => "temperature",
            Self::Humidity => "humidity",
            Self::Pressure => "pressure",
            Self::Vibration => "vibration",
            Self::Power => "power",
            Self::Co2 => "co2",
        }
    }

    /// Physically plausible range `(min, max)` for the kind's unit.
    ///
    /// Values outside the range are anomalous regardless of model state.
    pub fn physical_bounds(&self) -> (f64, f64) {
        match self {
            Self::Temperature => (-60.0, 150.0), // °C
            Self::Humidity => (0.0, 100.0),      // % RH
            Self::Pressure => (300.0, 1200.0),   // hPa
            Self::Vibration => (0.0, 100.0),     // mm/s RMS
            Self::Power => (0.0, 1_000_000.0),   // W
            Self::Co2 => (0.0, 10_000.0),        // ppm
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SensorKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "temperature" => Ok(Self::Temperature),
            "humidity" => Ok(Self::Humidity),
            "pressure" => Ok(Self::Pressure),
            "vibration" => Ok(Self::Vibration),
            "power" => Ok(Self::Power),
            "co2" => Ok(Self::Co2),
            _ => Err(Error::unknown_sensor_kind(s)),
        }
    }
}
