//! Retention threshold definition.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};

/// Inactivity threshold after which all rows of a silent device are pruned.
///
/// A single process-wide value, read-only after startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionThreshold(Duration);

impl RetentionThreshold {
    /// Default threshold: 24 hours.
    pub const DEFAULT: Self = Self(Duration::from_secs(24 * 60 * 60));

    /// Creates a threshold. Zero is rejected, it would prune every device on every tick.
    pub fn new(duration: Duration) -> Result<Self> {
        if duration.is_zero() {
            return Err(Error::config("retention threshold must be greater than zero"));
        }
        Ok(Self(duration))
    }

    pub fn from_secs(secs: u64) -> Result<Self> {
        Self::new(Duration::from_secs(secs))
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }

    /// Threshold as a chrono duration for wall-clock arithmetic.
    pub fn as_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.0).unwrap_or(chrono::Duration::MAX)
    }

    /// Returns true if a gap of `silence` exceeds the threshold.
    pub fn is_exceeded_by(&self, silence: chrono::Duration) -> bool {
        silence > self.as_chrono()
    }
}

impl Default for RetentionThreshold {
    fn default() -> Self {
        Self::DEFAULT
    }
}
