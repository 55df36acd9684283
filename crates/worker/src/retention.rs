//! Pruning worker: deletes every row of devices that have gone silent.
//!
//! Each tick derives device activity from the store, selects devices whose
//! silence exceeds the retention threshold (longest-silent first) and prunes
//! them one by one. A tick is bounded by a device count and a wall-time
//! budget; whatever is left over waits for the next tick.

use chrono::{DateTime, Utc};
use pipeline_core::{Result, RetentionThreshold};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use telemetry::metrics;
use timeseries_store::{ActivityTracker, ReadingStore};
use tracing::{debug, info, warn};

/// Guarantees a single active pruner.
///
/// Multi-process deployments back this with a distributed lock; in a single
/// process `LocalLease` is enough.
pub trait PruneLease: Send + Sync {
    /// Takes the lease if free. Returns false if another pruner holds it.
    fn try_acquire(&self) -> bool;

    fn release(&self);
}

/// In-process lease.
#[derive(Debug, Default)]
pub struct LocalLease {
    held: AtomicBool,
}

impl LocalLease {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PruneLease for LocalLease {
    fn try_acquire(&self) -> bool {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn release(&self) {
        self.held.store(false, Ordering::Release);
    }
}

struct LeaseGuard<'a>(&'a dyn PruneLease);

impl Drop for LeaseGuard<'_> {
    fn drop(&mut self) {
        self.0.release();
    }
}

/// Pruning worker configuration.
#[derive(Debug, Clone)]
pub struct PruneConfig {
    pub threshold: RetentionThreshold,
    /// Devices pruned per tick at most
    pub max_devices_per_tick: usize,
    /// Wall time after which the tick stops starting new prunes
    pub tick_budget: Duration,
}

impl Default for PruneConfig {
    fn default() -> Self {
        Self {
            threshold: RetentionThreshold::default(),
            max_devices_per_tick: 1000,
            tick_budget: Duration::from_secs(30),
        }
    }
}

/// Summary of one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Tick did not run because another pruner held the lease
    pub skipped: bool,
    /// Stale devices found
    pub stale: usize,
    pub devices_pruned: usize,
    pub rows_pruned: u64,
    /// Stale devices left for a later tick (count or time budget)
    pub deferred: usize,
    /// Devices that turned active again between selection and pruning
    pub reactivated: usize,
    pub failed: usize,
}

/// Worker that prunes silent devices.
pub struct PruningWorker {
    store: Arc<dyn ReadingStore>,
    tracker: ActivityTracker,
    lease: Arc<dyn PruneLease>,
    config: PruneConfig,
}

impl PruningWorker {
    pub fn new(store: Arc<dyn ReadingStore>, config: PruneConfig) -> Self {
        Self::with_lease(store, config, Arc::new(LocalLease::new()))
    }

    pub fn with_lease(
        store: Arc<dyn ReadingStore>,
        config: PruneConfig,
        lease: Arc<dyn PruneLease>,
    ) -> Self {
        Self {
            tracker: ActivityTracker::new(store.clone()),
            store,
            lease,
            config,
        }
    }

    pub fn config(&self) -> &PruneConfig {
        &self.config
    }

    /// Runs one tick against the current wall clock.
    pub async fn run(&self) -> Result<PruneReport> {
        self.run_at(Utc::now()).await
    }

    /// Runs one tick as if the time were `now`.
    ///
    /// Store failures while enumerating abort the tick; failures on a single
    /// device are logged and counted, and the device is retried next tick.
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<PruneReport> {
        if !self.lease.try_acquire() {
            debug!("Prune lease held elsewhere, skipping tick");
            return Ok(PruneReport {
                skipped: true,
                ..PruneReport::default()
            });
        }
        let _lease = LeaseGuard(self.lease.as_ref());

        let start = Instant::now();
        metrics().prune_ticks.inc();

        let stale = match self.tracker.stale_devices(now, self.config.threshold).await {
            Ok(stale) => stale,
            Err(e) => {
                metrics().prune_errors.inc();
                return Err(e);
            }
        };

        let mut report = PruneReport {
            stale: stale.len(),
            ..PruneReport::default()
        };

        for (index, device) in stale.iter().enumerate() {
            if index >= self.config.max_devices_per_tick
                || start.elapsed() >= self.config.tick_budget
            {
                report.deferred = stale.len() - index;
                break;
            }

            if self.reactivated(&device.device_id, now).await {
                report.reactivated += 1;
                continue;
            }

            match self.store.prune(&device.device_id).await {
                Ok(rows) => {
                    if rows > 0 {
                        report.devices_pruned += 1;
                        report.rows_pruned += rows;
                    }
                    debug!(
                        device_id = %device.device_id,
                        last_seen = %device.last_seen,
                        rows = rows,
                        "Pruned silent device"
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    metrics().prune_errors.inc();
                    warn!(device_id = %device.device_id, error = %e, "Failed to prune device");
                }
            }
        }

        metrics().devices_pruned.inc_by(report.devices_pruned as u64);
        metrics().rows_pruned.inc_by(report.rows_pruned);
        metrics()
            .prune_tick_latency_ms
            .observe(start.elapsed().as_millis() as u64);

        if report.stale > 0 {
            info!(
                stale = report.stale,
                devices_pruned = report.devices_pruned,
                rows_pruned = report.rows_pruned,
                deferred = report.deferred,
                reactivated = report.reactivated,
                failed = report.failed,
                elapsed_ms = %start.elapsed().as_millis(),
                "Prune tick complete"
            );
        } else {
            debug!("Prune tick found no silent devices");
        }

        Ok(report)
    }

    /// True if the device wrote a reading within the threshold since it was
    /// selected. A failed lookup counts as not reactivated.
    async fn reactivated(&self, device_id: &str, now: DateTime<Utc>) -> bool {
        match self.store.latest(device_id).await {
            Ok(Some(latest)) => !self.config.threshold.is_exceeded_by(now - latest.timestamp),
            _ => false,
        }
    }
}
