//! Worker scheduler: starts the inference pool and the periodic tasks, and
//! coordinates their shutdown.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use model_registry::ModelRegistry;
use pipeline_core::Result;
use reading_queue::ReadingQueue;
use telemetry::{health, metrics, HealthStatus};
use timeseries_store::ReadingStore;

use crate::config::WorkerConfig;
use crate::consumer::abandon_unprocessed;
use crate::pool::InferencePool;
use crate::retention::{LocalLease, PruneLease, PruningWorker};

/// Background worker scheduler.
pub struct WorkerScheduler {
    config: WorkerConfig,
    queue: Arc<dyn ReadingQueue>,
    registry: Arc<ModelRegistry>,
    pool: InferencePool,
    pruner: Arc<PruningWorker>,
}

impl WorkerScheduler {
    pub fn new(
        config: WorkerConfig,
        queue: Arc<dyn ReadingQueue>,
        registry: Arc<ModelRegistry>,
        store: Arc<dyn ReadingStore>,
    ) -> Result<Self> {
        Self::with_lease(config, queue, registry, store, Arc::new(LocalLease::new()))
    }

    /// Creates a scheduler whose pruning is coordinated through `lease`.
    pub fn with_lease(
        config: WorkerConfig,
        queue: Arc<dyn ReadingQueue>,
        registry: Arc<ModelRegistry>,
        store: Arc<dyn ReadingStore>,
        lease: Arc<dyn PruneLease>,
    ) -> Result<Self> {
        let pruner = Arc::new(PruningWorker::with_lease(
            store.clone(),
            config.pruning()?,
            lease,
        ));
        let pool = InferencePool::new(
            config.worker_count,
            queue.clone(),
            registry.clone(),
            store,
            config.inference(),
        );

        Ok(Self {
            config,
            queue,
            registry,
            pool,
            pruner,
        })
    }

    pub fn pruner(&self) -> &Arc<PruningWorker> {
        &self.pruner
    }

    /// Starts all background workers.
    pub fn start(&self) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let workers = self.pool.start(shutdown_rx.clone());
        let mut tasks = Vec::new();

        tasks.push(tokio::spawn(run_pruning(
            self.pruner.clone(),
            self.config.prune_interval(),
            shutdown_rx.clone(),
        )));
        info!(
            interval_secs = self.config.prune_interval().as_secs(),
            threshold_secs = self.pruner.config().threshold.as_duration().as_secs(),
            "Pruning scheduler started"
        );

        tasks.push(tokio::spawn(run_metrics_log(
            self.queue.clone(),
            self.config.metrics_interval(),
            shutdown_rx.clone(),
        )));

        if let Some(max_idle) = self.config.model_idle() {
            tasks.push(tokio::spawn(run_model_eviction(
                self.registry.clone(),
                max_idle,
                shutdown_rx,
            )));
            info!(max_idle_secs = max_idle.as_secs(), "Model eviction enabled");
        }

        info!("Background workers started");
        SchedulerHandle {
            shutdown: shutdown_tx,
            queue: self.queue.clone(),
            workers,
            tasks,
        }
    }
}

/// Running scheduler. Dropping it without `shutdown` leaves the tasks running.
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    queue: Arc<dyn ReadingQueue>,
    workers: Vec<JoinHandle<()>>,
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Signals shutdown and waits for every worker to drain and exit, then
    /// for the periodic tasks.
    ///
    /// Readings still held when the drain timeout runs out are logged and
    /// counted as dropped; their number is returned.
    pub async fn shutdown(self) -> usize {
        let _ = self.shutdown.send(true);

        for handle in self.workers {
            if let Err(e) = handle.await {
                error!(error = %e, "Inference worker supervisor failed");
            }
        }
        let abandoned = abandon_unprocessed(self.queue.as_ref());
        info!(abandoned = abandoned, "Inference pool stopped");

        for handle in self.tasks {
            if let Err(e) = handle.await {
                error!(error = %e, "Background task failed");
            }
        }
        abandoned
    }
}

async fn run_pruning(pruner: Arc<PruningWorker>, period: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }

        if let Err(e) = pruner.run().await {
            error!(error = %e, "Prune tick failed, retrying next tick");
        }
    }
}

async fn run_metrics_log(
    queue: Arc<dyn ReadingQueue>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(period);
    // First tick fires immediately and would log all zeros.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }

        metrics().queue_depth.set(queue.len() as u64);
        let snapshot = metrics().snapshot();
        info!(
            enqueued = snapshot.readings_enqueued,
            rejected_full = snapshot.readings_rejected_full,
            scored = snapshot.readings_scored,
            anomalies = snapshot.anomalies_detected,
            persisted = snapshot.readings_persisted,
            dropped = snapshot.readings_dropped,
            store_write_errors = snapshot.store_write_errors,
            rows_pruned = snapshot.rows_pruned,
            queue_depth = snapshot.queue_depth,
            scoring_latency_mean_ms = snapshot.scoring_latency_mean_ms,
            scoring_latency_p99_ms = snapshot.scoring_latency_p99_ms,
            store_write_latency_p99_ms = snapshot.store_write_latency_p99_ms,
            "Pipeline metrics"
        );

        if snapshot.queue_depth as usize >= queue.capacity() {
            warn!(capacity = queue.capacity(), "Reading queue is full");
        }

        let report = health().report();
        if report.status != HealthStatus::Healthy {
            warn!(
                status = ?report.status,
                queue = ?report.queue.reason,
                store = ?report.store.reason,
                "Pipeline not healthy"
            );
        }
    }
}

async fn run_model_eviction(
    registry: Arc<ModelRegistry>,
    max_idle: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(max_idle.max(Duration::from_secs(1)));

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }
        registry.evict_idle(max_idle);
    }
}
