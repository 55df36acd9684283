//! Common test setup functions.

use chrono::{DateTime, Utc};
use model_registry::ModelRegistry;
use pipeline_core::{Reading, Result, ScoredReading};
use reading_queue::{MemoryQueue, ReadingQueue};
use std::sync::Arc;
use std::time::Duration;
use timeseries_store::{MemoryStore, ReadingStore};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use worker::{abandon_unprocessed, InferenceConfig, InferencePool, InferenceWorker, StoreHealth};

/// Pipeline wired against in-memory backends with a running worker pool.
///
/// Retries use a 1ms backoff so failure paths finish quickly.
pub struct TestContext {
    pub queue: Arc<MemoryQueue>,
    pub registry: Arc<ModelRegistry>,
    pub store: Arc<dyn ReadingStore>,
    shutdown: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
}

impl TestContext {
    /// Four workers over a fresh memory store.
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), 4)
    }

    pub fn with_store(store: Arc<dyn ReadingStore>, workers: usize) -> Self {
        telemetry::init_test_tracing();

        let queue = Arc::new(MemoryQueue::new(10_000));
        let registry = Arc::new(ModelRegistry::default());
        let pool = InferencePool::new(
            workers,
            queue.clone(),
            registry.clone(),
            store.clone(),
            inference_config(),
        );

        let (shutdown, rx) = watch::channel(false);
        let workers = pool.start(rx);

        Self {
            queue,
            registry,
            store,
            shutdown,
            workers,
        }
    }

    pub async fn enqueue(&self, reading: Reading) -> Result<()> {
        self.queue.enqueue(reading).await
    }

    pub async fn enqueue_all(&self, readings: impl IntoIterator<Item = Reading>) -> Result<()> {
        for reading in readings {
            self.queue.enqueue(reading).await?;
        }
        Ok(())
    }

    /// Every stored reading of a device, oldest first.
    pub async fn rows(&self, device_id: &str) -> Vec<ScoredReading> {
        all_rows(self.store.as_ref(), device_id).await
    }

    /// Polls until `device_id` has at least `count` rows or `timeout` passes.
    pub async fn wait_for_rows(
        &self,
        device_id: &str,
        count: usize,
        timeout: Duration,
    ) -> Vec<ScoredReading> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let rows = self.rows(device_id).await;
            if rows.len() >= count || tokio::time::Instant::now() >= deadline {
                return rows;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Polls until the queue is empty, then gives in-flight readings time to
    /// finish.
    pub async fn settle(&self) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !self.queue.is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    /// Signals shutdown, waits for every worker to drain and exit, and
    /// returns how many readings were left unprocessed.
    pub async fn shutdown(self) -> usize {
        let _ = self.shutdown.send(true);
        for handle in self.workers {
            let _ = handle.await;
        }
        abandon_unprocessed(self.queue.as_ref())
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Inference settings used by every test context.
pub fn inference_config() -> InferenceConfig {
    InferenceConfig {
        dequeue_timeout: Duration::from_millis(20),
        max_retries: 3,
        retry_backoff: Duration::from_millis(1),
        store_failure_threshold: 10,
        drain_timeout: Duration::from_secs(5),
    }
}

/// A standalone worker for tests that need the per-reading `Outcome`.
pub fn standalone_worker(store: Arc<dyn ReadingStore>) -> InferenceWorker {
    let config = inference_config();
    InferenceWorker::new(
        0,
        Arc::new(MemoryQueue::new(16)),
        Arc::new(ModelRegistry::default()),
        store,
        Arc::new(StoreHealth::new(config.store_failure_threshold)),
        config,
    )
}

/// Every stored reading of a device, regardless of timestamp.
pub async fn all_rows(store: &dyn ReadingStore, device_id: &str) -> Vec<ScoredReading> {
    store
        .range(device_id, DateTime::<Utc>::MIN_UTC, DateTime::<Utc>::MAX_UTC)
        .await
        .unwrap_or_default()
}
