//! Internal metrics collection.
//!
//! Collects metrics in-memory; the scheduler logs a snapshot periodically.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// A counter metric.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_by(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// A gauge metric (can go up or down).
#[derive(Debug, Default)]
pub struct Gauge(AtomicU64);

impl Gauge {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn set(&self, val: u64) {
        self.0.store(val, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Histogram for latency tracking.
#[derive(Debug)]
pub struct Histogram {
    /// Buckets: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 5s, 10s
    buckets: [AtomicU64; 11],
    sum: AtomicU64,
    count: AtomicU64,
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

impl Histogram {
    const BUCKET_BOUNDS: [u64; 11] = [1, 5, 10, 25, 50, 100, 250, 500, 1000, 5000, 10000];

    pub fn new() -> Self {
        Self {
            buckets: Default::default(),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Records a value in milliseconds.
    pub fn observe(&self, ms: u64) {
        self.sum.fetch_add(ms, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        for (i, &bound) in Self::BUCKET_BOUNDS.iter().enumerate() {
            if ms <= bound {
                self.buckets[i].fetch_add(1, Ordering::Relaxed);
                return;
            }
        }
        // Value exceeds all buckets, add to last
        self.buckets[10].fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn sum(&self) -> u64 {
        self.sum.load(Ordering::Relaxed)
    }

    pub fn mean(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            0.0
        } else {
            self.sum() as f64 / count as f64
        }
    }

    /// Upper bucket bound below which `q` of the observations fall.
    ///
    /// Bucket resolution only; values past the last bound report it.
    pub fn quantile(&self, q: f64) -> u64 {
        let count = self.count();
        if count == 0 {
            return 0;
        }
        let target = ((count as f64) * q.clamp(0.0, 1.0)).ceil().max(1.0) as u64;
        let mut seen = 0;
        for (bound, bucket) in Self::BUCKET_BOUNDS.iter().zip(self.buckets.iter()) {
            seen += bucket.load(Ordering::Relaxed);
            if seen >= target {
                return *bound;
            }
        }
        Self::BUCKET_BOUNDS[Self::BUCKET_BOUNDS.len() - 1]
    }
}

/// Collected metrics for the sensor pipeline.
#[derive(Debug, Default)]
pub struct Metrics {
    // Queue metrics
    pub readings_enqueued: Counter,
    pub readings_rejected_full: Counter,
    pub readings_dequeued: Counter,
    pub queue_decode_errors: Counter,

    // Inference metrics
    pub readings_scored: Counter,
    pub anomalies_detected: Counter,
    pub scoring_errors: Counter,
    pub unknown_sensor_kinds: Counter,
    pub models_created: Counter,
    pub models_evicted: Counter,

    // Store metrics
    pub readings_persisted: Counter,
    pub store_write_errors: Counter,
    pub readings_dropped: Counter,
    pub worker_restarts: Counter,

    // Pruning metrics
    pub prune_ticks: Counter,
    pub prune_errors: Counter,
    pub devices_pruned: Counter,
    pub rows_pruned: Counter,

    // Latency histograms
    pub scoring_latency_ms: Histogram,
    pub store_write_latency_ms: Histogram,
    pub prune_tick_latency_ms: Histogram,

    // Gauges
    pub queue_depth: Gauge,
    pub active_workers: Gauge,
    pub consecutive_store_failures: Gauge,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }
}

/// A snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub readings_enqueued: u64,
    pub readings_rejected_full: u64,
    pub readings_dequeued: u64,
    pub readings_scored: u64,
    pub anomalies_detected: u64,
    pub scoring_errors: u64,
    pub unknown_sensor_kinds: u64,
    pub readings_persisted: u64,
    pub store_write_errors: u64,
    pub readings_dropped: u64,
    pub devices_pruned: u64,
    pub rows_pruned: u64,
    pub scoring_latency_mean_ms: f64,
    pub scoring_latency_p99_ms: u64,
    pub store_write_latency_mean_ms: f64,
    pub store_write_latency_p99_ms: u64,
    pub queue_depth: u64,
    pub active_workers: u64,
}

impl Metrics {
    /// Takes a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: Utc::now(),
            readings_enqueued: self.readings_enqueued.get(),
            readings_rejected_full: self.readings_rejected_full.get(),
            readings_dequeued: self.readings_dequeued.get(),
            readings_scored: self.readings_scored.get(),
            anomalies_detected: self.anomalies_detected.get(),
            scoring_errors: self.scoring_errors.get(),
            unknown_sensor_kinds: self.unknown_sensor_kinds.get(),
            readings_persisted: self.readings_persisted.get(),
            store_write_errors: self.store_write_errors.get(),
            readings_dropped: self.readings_dropped.get(),
            devices_pruned: self.devices_pruned.get(),
            rows_pruned: self.rows_pruned.get(),
            scoring_latency_mean_ms: self.scoring_latency_ms.mean(),
            scoring_latency_p99_ms: self.scoring_latency_ms.quantile(0.99),
            store_write_latency_mean_ms: self.store_write_latency_ms.mean(),
            store_write_latency_p99_ms: self.store_write_latency_ms.quantile(0.99),
            queue_depth: self.queue_depth.get(),
            active_workers: self.active_workers.get(),
        }
    }
}

/// Global metrics registry.
pub static METRICS: std::sync::LazyLock<Metrics> = std::sync::LazyLock::new(Metrics::new);

/// Get the global metrics instance.
pub fn metrics() -> &'static Metrics {
    &METRICS
}
