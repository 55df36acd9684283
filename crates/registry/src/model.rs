//! Anomaly models.

use pipeline_core::{Error, Result, SensorKind};
use serde::{Deserialize, Serialize};

/// Output of one model evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelScore {
    pub is_anomaly: bool,
    /// Absolute deviation from the baseline in standard deviations.
    pub score: f64,
}

/// A stateful anomaly detector for one sensor kind.
///
/// `score` may update internal state; callers serialize access per instance.
/// A failed call must leave the state untouched so it can be retried.
pub trait AnomalyModel: Send {
    fn version(&self) -> &str;

    fn score(&mut self, value: f64) -> Result<ModelScore>;
}

/// Tuning shared by the built-in models.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// |z| above this is anomalous
    #[serde(default = "default_z_threshold")]
    pub z_threshold: f64,
    /// Observations before z-scores are trusted
    #[serde(default = "default_warmup_samples")]
    pub warmup_samples: u64,
    /// Floor for the standard deviation so a flat baseline does not divide by ~0
    #[serde(default = "default_min_std")]
    pub min_std: f64,
}

fn default_z_threshold() -> f64 {
    4.0
}

fn default_warmup_samples() -> u64 {
    30
}

fn default_min_std() -> f64 {
    0.05
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            z_threshold: default_z_threshold(),
            warmup_samples: default_warmup_samples(),
            min_std: default_min_std(),
        }
    }
}

/// Running z-score detector with hard physical bounds.
///
/// Mean and variance are tracked incrementally (Welford). Values flagged as
/// anomalous are not folded into the baseline, so a single spike does not
/// widen the band for the readings after it.
#[derive(Debug, Clone)]
pub struct ZScoreModel {
    kind: SensorKind,
    bounds: (f64, f64),
    config: ModelConfig,
    count: u64,
    mean: f64,
    m2: f64,
}

impl ZScoreModel {
    pub const VERSION: &'static str = "zscore-v1";

    pub fn new(kind: SensorKind, config: ModelConfig) -> Self {
        Self {
            kind,
            bounds: kind.physical_bounds(),
            config,
            count: 0,
            mean: 0.0,
            m2: 0.0,
        }
    }

    pub fn kind(&self) -> SensorKind {
        self.kind
    }

    /// Observations folded into the baseline so far.
    pub fn observations(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Sample standard deviation, floored at `min_std`.
    pub fn std_dev(&self) -> f64 {
        if self.count < 2 {
            return self.config.min_std;
        }
        (self.m2 / (self.count - 1) as f64)
            .sqrt()
            .max(self.config.min_std)
    }

    fn observe(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }
}

impl AnomalyModel for ZScoreModel {
    fn version(&self) -> &str {
        Self::VERSION
    }

    fn score(&mut self, value: f64) -> Result<ModelScore> {
        if !value.is_finite() {
            return Err(Error::scoring(format!(
                "{} model cannot score non-finite value {}",
                self.kind, value
            )));
        }

        let (min, max) = self.bounds;
        let out_of_bounds = value < min || value > max;

        let z = if self.count >= 2 {
            ((value - self.mean) / self.std_dev()).abs()
        } else {
            0.0
        };
        let warmed_up = self.count >= self.config.warmup_samples;

        let is_anomaly = out_of_bounds || (warmed_up && z > self.config.z_threshold);
        let score = if out_of_bounds {
            z.max(self.config.z_threshold)
        } else {
            z
        };

        if !is_anomaly {
            self.observe(value);
        }

        Ok(ModelScore { is_anomaly, score })
    }
}
