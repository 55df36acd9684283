//! Supervised pool of inference workers.

use model_registry::ModelRegistry;
use reading_queue::ReadingQueue;
use std::sync::Arc;
use telemetry::metrics;
use timeseries_store::ReadingStore;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::consumer::{InferenceConfig, InferenceWorker, StoreHealth};

/// Decrements the active worker gauge even if the worker panics.
struct ActiveGuard;

impl ActiveGuard {
    fn enter() -> Self {
        metrics().active_workers.inc();
        ActiveGuard
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        metrics().active_workers.dec();
    }
}

/// Fixed-size pool of competing consumers on one queue.
///
/// Every worker runs under its own supervisor: a panic takes down that worker
/// only, and the supervisor starts a replacement unless shutdown has begun.
pub struct InferencePool {
    size: usize,
    queue: Arc<dyn ReadingQueue>,
    registry: Arc<ModelRegistry>,
    store: Arc<dyn ReadingStore>,
    store_health: Arc<StoreHealth>,
    config: InferenceConfig,
}

impl InferencePool {
    pub fn new(
        size: usize,
        queue: Arc<dyn ReadingQueue>,
        registry: Arc<ModelRegistry>,
        store: Arc<dyn ReadingStore>,
        config: InferenceConfig,
    ) -> Self {
        Self {
            size: size.max(1),
            store_health: Arc::new(StoreHealth::new(config.store_failure_threshold)),
            queue,
            registry,
            store,
            config,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn store_health(&self) -> &Arc<StoreHealth> {
        &self.store_health
    }

    fn worker(&self, id: usize) -> Arc<InferenceWorker> {
        Arc::new(InferenceWorker::new(
            id,
            self.queue.clone(),
            self.registry.clone(),
            self.store.clone(),
            self.store_health.clone(),
            self.config.clone(),
        ))
    }

    /// Starts every worker. Each handle resolves once its worker has exited
    /// after shutdown.
    pub fn start(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let handles = (0..self.size)
            .map(|id| {
                let worker = self.worker(id);
                tokio::spawn(supervise(worker, shutdown.clone()))
            })
            .collect();

        info!(
            workers = self.size,
            queue = self.queue.backend(),
            store = self.store.backend(),
            "Inference pool started"
        );
        handles
    }
}

async fn supervise(worker: Arc<InferenceWorker>, shutdown: watch::Receiver<bool>) {
    let id = worker.id();

    loop {
        let task = {
            let worker = worker.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                let _active = ActiveGuard::enter();
                worker.run(shutdown).await;
            })
        };

        match task.await {
            Ok(()) => break,
            Err(e) if e.is_panic() => {
                metrics().worker_restarts.inc();
                error!(worker = id, "Inference worker panicked, reading in hand lost");
                if *shutdown.borrow() {
                    break;
                }
                info!(worker = id, "Restarting inference worker");
            }
            Err(e) => {
                error!(worker = id, error = %e, "Inference worker cancelled");
                break;
            }
        }
    }
}
