//! Inference worker: takes readings off the queue, scores them and persists
//! the verdicts.
//!
//! Each reading ends in exactly one of two outcomes:
//! 1. persisted once as a `ScoredReading`
//! 2. dropped, with a log line carrying the error code

use model_registry::{ModelHandle, ModelRegistry, Verdict};
use pipeline_core::{Error, Reading, Result, ScoredReading};
use reading_queue::ReadingQueue;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use telemetry::{health, metrics};
use timeseries_store::ReadingStore;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Inference worker configuration.
#[derive(Debug, Clone)]
pub struct InferenceConfig {
    /// Wait on an empty queue before re-checking shutdown
    pub dequeue_timeout: Duration,
    /// Maximum retries for scoring and for store writes
    pub max_retries: u32,
    /// Backoff between retries
    pub retry_backoff: Duration,
    /// Consecutive store failures before the store is reported unhealthy
    pub store_failure_threshold: u64,
    /// After shutdown, how long a worker keeps taking locally held readings
    pub drain_timeout: Duration,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            dequeue_timeout: Duration::from_millis(500),
            max_retries: 3,
            retry_backoff: Duration::from_millis(100),
            store_failure_threshold: 10,
            drain_timeout: Duration::from_secs(5),
        }
    }
}

/// Final state of one dequeued reading.
#[derive(Debug)]
pub enum Outcome {
    Persisted(ScoredReading),
    Dropped(Error),
}

impl Outcome {
    pub fn is_persisted(&self) -> bool {
        matches!(self, Outcome::Persisted(_))
    }
}

/// Consecutive store failures shared by every worker of a pool.
///
/// Crossing the threshold marks the store unhealthy; any success clears it.
#[derive(Debug)]
pub struct StoreHealth {
    consecutive: AtomicU64,
    threshold: u64,
}

impl StoreHealth {
    pub fn new(threshold: u64) -> Self {
        Self {
            consecutive: AtomicU64::new(0),
            threshold: threshold.max(1),
        }
    }

    pub fn record_success(&self) {
        let previous = self.consecutive.swap(0, Ordering::SeqCst);
        metrics().consecutive_store_failures.set(0);
        if previous >= self.threshold {
            health().store.set_healthy();
            info!(after_failures = previous, "Store writes recovered");
        }
    }

    pub fn record_failure(&self, err: &Error) {
        let failures = self.consecutive.fetch_add(1, Ordering::SeqCst) + 1;
        metrics().consecutive_store_failures.set(failures);
        if failures == self.threshold {
            health()
                .store
                .set_unhealthy(format!("{} consecutive write failures: {}", failures, err));
            error!(failures = failures, error = %err, "Store marked unhealthy");
        }
    }

    pub fn consecutive_failures(&self) -> u64 {
        self.consecutive.load(Ordering::SeqCst)
    }
}

/// One member of the inference pool.
pub struct InferenceWorker {
    id: usize,
    queue: Arc<dyn ReadingQueue>,
    registry: Arc<ModelRegistry>,
    store: Arc<dyn ReadingStore>,
    store_health: Arc<StoreHealth>,
    config: InferenceConfig,
}

impl InferenceWorker {
    pub fn new(
        id: usize,
        queue: Arc<dyn ReadingQueue>,
        registry: Arc<ModelRegistry>,
        store: Arc<dyn ReadingStore>,
        store_health: Arc<StoreHealth>,
        config: InferenceConfig,
    ) -> Self {
        Self {
            id,
            queue,
            registry,
            store,
            store_health,
            config,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Main loop: dequeue, score, persist, until `shutdown` flips to true.
    ///
    /// The signal is checked between readings, so a reading already taken off
    /// the queue is always finished. After the signal the worker drains what
    /// the queue still holds locally, within `drain_timeout`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        debug!(worker = self.id, queue = self.queue.backend(), "Inference worker starting");

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            match self.queue.dequeue(self.config.dequeue_timeout).await {
                Ok(Some(reading)) => {
                    self.process(reading).await;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(worker = self.id, error = %e, "Dequeue failed");
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.retry_backoff) => {}
                        _ = shutdown.changed() => {}
                    }
                }
            }
        }

        self.drain().await;
        debug!(worker = self.id, "Inference worker stopped");
    }

    async fn drain(&self) {
        let deadline = Instant::now() + self.config.drain_timeout;
        let mut drained = 0u64;

        while Instant::now() < deadline {
            let Some(reading) = self.queue.try_take() else {
                break;
            };
            self.process(reading).await;
            drained += 1;
        }

        if drained > 0 {
            info!(worker = self.id, drained = drained, "Drained queued readings after shutdown");
        }
    }

    /// Scores and persists one reading. Never panics on bad input.
    pub async fn process(&self, reading: Reading) -> Outcome {
        let reading_id = reading.reading_id;
        let device_id = reading.device_id.clone();
        let sensor_kind = reading.sensor_kind.clone();

        match self.score_and_store(reading).await {
            Ok(scored) => {
                metrics().readings_persisted.inc();
                if scored.is_anomaly {
                    metrics().anomalies_detected.inc();
                    info!(
                        device_id = %scored.device_id,
                        sensor_kind = %scored.sensor_kind,
                        value = scored.value,
                        score = scored.score,
                        "Anomaly detected"
                    );
                }
                Outcome::Persisted(scored)
            }
            Err(e) => {
                metrics().readings_dropped.inc();
                if matches!(e, Error::UnknownSensorKind(_)) {
                    metrics().unknown_sensor_kinds.inc();
                }
                warn!(
                    worker = self.id,
                    reading_id = %reading_id,
                    device_id = %device_id,
                    sensor_kind = %sensor_kind,
                    code = e.code(),
                    error = %e,
                    "Dropped reading"
                );
                Outcome::Dropped(e)
            }
        }
    }

    async fn score_and_store(&self, reading: Reading) -> Result<ScoredReading> {
        let handle = self.registry.get_or_create(&reading.sensor_kind)?;

        let value = reading.value;
        let verdict = self
            .with_retry("score", || score_blocking(handle.clone(), value))
            .await?;

        let scored = reading.into_scored(verdict.is_anomaly, verdict.score, handle.version());
        metrics().readings_scored.inc();

        let row = &scored;
        self.with_retry("store write", || async move {
            let result = self.store.write(row).await;
            match &result {
                Ok(()) => self.store_health.record_success(),
                Err(e) => {
                    metrics().store_write_errors.inc();
                    self.store_health.record_failure(e);
                }
            }
            result
        })
        .await?;

        Ok(scored)
    }

    /// Runs `op` up to `max_retries + 1` times with linear backoff.
    /// Errors that are not retryable end the loop immediately.
    async fn with_retry<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let backoff = self.config.retry_backoff * attempt;
                    warn!(
                        worker = self.id,
                        attempt = attempt,
                        backoff_ms = %backoff.as_millis(),
                        error = %e,
                        "Retrying {}",
                        what
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Takes every reading the queue still holds after the workers stopped and
/// records each as dropped. Returns how many there were.
pub fn abandon_unprocessed(queue: &dyn ReadingQueue) -> usize {
    let readings = queue.take_unprocessed();
    if readings.is_empty() {
        return 0;
    }

    for reading in &readings {
        debug!(
            reading_id = %reading.reading_id,
            device_id = %reading.device_id,
            sensor_kind = %reading.sensor_kind,
            "Dropped reading at shutdown"
        );
    }
    metrics().readings_dropped.inc_by(readings.len() as u64);
    warn!(
        count = readings.len(),
        queue = queue.backend(),
        first = %readings[0].reading_id,
        last = %readings[readings.len() - 1].reading_id,
        "Readings left unprocessed at shutdown"
    );
    readings.len()
}

/// Scores on the blocking pool so slow models do not stall the runtime.
async fn score_blocking(handle: Arc<ModelHandle>, value: f64) -> Result<Verdict> {
    let start = Instant::now();
    let kind = handle.kind();

    let result = tokio::task::spawn_blocking(move || handle.score(value))
        .await
        .map_err(|e| Error::scoring(format!("{} model task failed: {}", kind, e)))
        .and_then(|r| r);

    metrics()
        .scoring_latency_ms
        .observe(start.elapsed().as_millis() as u64);
    if result.is_err() {
        metrics().scoring_errors.inc();
    }
    result
}
