//! Worker pool and scheduler configuration.

use pipeline_core::{Result, RetentionThreshold};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::consumer::InferenceConfig;
use crate::retention::PruneConfig;

/// Worker scheduler configuration.
///
/// Read once at startup; durations are plain integers so they layer cleanly
/// from files and environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Inference workers in the pool
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// How long a worker waits on an empty queue before re-checking shutdown
    #[serde(default = "default_dequeue_timeout_ms")]
    pub dequeue_timeout_ms: u64,
    /// Retries for scoring and for store writes
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base backoff, multiplied by the attempt number
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Consecutive store failures before the store is reported unhealthy
    #[serde(default = "default_store_failure_threshold")]
    pub store_failure_threshold: u64,
    /// Silence after which a device's rows are pruned
    #[serde(default = "default_retention_threshold_secs")]
    pub retention_threshold_secs: u64,
    #[serde(default = "default_prune_interval_secs")]
    pub prune_interval_secs: u64,
    #[serde(default = "default_max_devices_per_tick")]
    pub max_devices_per_tick: usize,
    /// Wall-time budget of one prune tick
    #[serde(default = "default_tick_budget_ms")]
    pub tick_budget_ms: u64,
    /// Evict models unused for this long (0 disables eviction)
    #[serde(default)]
    pub model_idle_secs: u64,
    /// How often a metrics snapshot is logged
    #[serde(default = "default_metrics_interval_secs")]
    pub metrics_interval_secs: u64,
    /// Time workers keep draining queued readings after shutdown
    #[serde(default = "default_shutdown_drain_ms")]
    pub shutdown_drain_ms: u64,
}

fn default_worker_count() -> usize {
    4
}

fn default_dequeue_timeout_ms() -> u64 {
    500
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    100
}

fn default_store_failure_threshold() -> u64 {
    10
}

fn default_retention_threshold_secs() -> u64 {
    RetentionThreshold::DEFAULT.as_duration().as_secs()
}

fn default_prune_interval_secs() -> u64 {
    60
}

fn default_max_devices_per_tick() -> usize {
    1000
}

fn default_tick_budget_ms() -> u64 {
    30_000
}

fn default_metrics_interval_secs() -> u64 {
    60
}

fn default_shutdown_drain_ms() -> u64 {
    5_000
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            dequeue_timeout_ms: default_dequeue_timeout_ms(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            store_failure_threshold: default_store_failure_threshold(),
            retention_threshold_secs: default_retention_threshold_secs(),
            prune_interval_secs: default_prune_interval_secs(),
            max_devices_per_tick: default_max_devices_per_tick(),
            tick_budget_ms: default_tick_budget_ms(),
            model_idle_secs: 0,
            metrics_interval_secs: default_metrics_interval_secs(),
            shutdown_drain_ms: default_shutdown_drain_ms(),
        }
    }
}

impl WorkerConfig {
    /// Settings for each inference worker.
    pub fn inference(&self) -> InferenceConfig {
        InferenceConfig {
            dequeue_timeout: Duration::from_millis(self.dequeue_timeout_ms),
            max_retries: self.max_retries,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            store_failure_threshold: self.store_failure_threshold.max(1),
            drain_timeout: Duration::from_millis(self.shutdown_drain_ms),
        }
    }

    /// Settings for the pruning worker. Fails on a zero retention threshold.
    pub fn pruning(&self) -> Result<PruneConfig> {
        Ok(PruneConfig {
            threshold: RetentionThreshold::from_secs(self.retention_threshold_secs)?,
            max_devices_per_tick: self.max_devices_per_tick.max(1),
            tick_budget: Duration::from_millis(self.tick_budget_ms),
        })
    }

    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.prune_interval_secs.max(1))
    }

    pub fn metrics_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_interval_secs.max(1))
    }

    /// Idle time after which models are evicted, if eviction is enabled.
    pub fn model_idle(&self) -> Option<Duration> {
        (self.model_idle_secs > 0).then(|| Duration::from_secs(self.model_idle_secs))
    }
}
