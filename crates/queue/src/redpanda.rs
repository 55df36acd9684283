//! Redpanda-backed reading queue using rskafka.
//!
//! Producer side: `enqueue` stages readings in a bounded buffer and a flush
//! task produces them in batches, keyed by device_id. Consumer side: one
//! worker at a time fetches a record batch into a local hand-off buffer;
//! every worker pops single readings from it, so each record goes to one
//! worker only.
//!
//! All readings go to partition 0, which keeps submission order per device.

use async_trait::async_trait;
use chrono::Utc;
use pipeline_core::{Error, Reading, Result};
use rskafka::client::{
    partition::{Compression, OffsetAt, PartitionClient, UnknownTopicHandling},
    ClientBuilder, Credentials, SaslConfig,
};
use rskafka::record::Record;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use telemetry::metrics;
use tokio::sync::{Mutex, Notify, RwLock};
use tracing::{debug, error, info, warn};

use crate::batch::BoundedBuffer;
use crate::config::{RedpandaConfig, StartOffset};
use crate::ReadingQueue;

const PARTITION: i32 = 0;

/// Creates a TLS configuration for Redpanda Cloud.
fn create_tls_config() -> Arc<rustls::ClientConfig> {
    let root_store =
        rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    Arc::new(config)
}

/// Builds a client builder with TLS and SASL when credentials are configured.
pub(crate) fn client_builder(config: &RedpandaConfig) -> ClientBuilder {
    let mut builder = ClientBuilder::new(vec![config.broker_string()]);

    if let (Some(username), Some(password)) = (&config.sasl_username, &config.sasl_password) {
        builder = builder
            .tls_config(create_tls_config())
            .sasl_config(SaslConfig::ScramSha256(Credentials::new(
                username.clone(),
                password.clone(),
            )));
    }

    builder
}

fn compression(name: &str) -> Compression {
    match name {
        "gzip" => Compression::Gzip,
        "snappy" => Compression::Snappy,
        "lz4" => Compression::Lz4,
        "zstd" => Compression::Zstd,
        _ => Compression::NoCompression,
    }
}

/// Encodes a reading as a record keyed by device_id.
fn encode(reading: &Reading) -> Result<Record> {
    Ok(Record {
        key: Some(reading.device_id.clone().into_bytes()),
        value: Some(serde_json::to_vec(reading)?),
        headers: BTreeMap::new(),
        timestamp: Utc::now(),
    })
}

/// Reading queue on a Redpanda topic.
pub struct RedpandaQueue {
    config: RedpandaConfig,
    /// Readings accepted by `enqueue` but not yet produced
    staging: BoundedBuffer,
    /// Readings fetched from the topic, awaiting a worker
    fetched: BoundedBuffer,
    flush_notify: Notify,
    /// Only one worker fetches from the broker at a time
    fetch_lock: Mutex<()>,
    client: RwLock<Option<Arc<PartitionClient>>>,
    /// Next offset to read
    next_offset: AtomicI64,
    initialized: AtomicBool,
}

impl RedpandaQueue {
    /// Creates a queue; the broker connection is established lazily.
    pub fn new(config: RedpandaConfig, capacity: usize) -> Self {
        info!(
            brokers = %config.broker_string(),
            topic = %config.topic,
            capacity = capacity,
            sasl = config.uses_sasl(),
            "Creating Redpanda reading queue"
        );

        Self {
            staging: BoundedBuffer::new(capacity),
            fetched: BoundedBuffer::new(capacity),
            flush_notify: Notify::new(),
            fetch_lock: Mutex::new(()),
            client: RwLock::new(None),
            next_offset: AtomicI64::new(-1),
            initialized: AtomicBool::new(false),
            config,
        }
    }

    /// Returns the cached partition client, connecting on first use.
    async fn ensure_connected(&self) -> Result<Arc<PartitionClient>> {
        {
            let client = self.client.read().await;
            if let Some(ref c) = *client {
                return Ok(c.clone());
            }
        }

        let client = client_builder(&self.config)
            .build()
            .await
            .map_err(|e| Error::queue(format!("Failed to connect to Redpanda: {}", e)))?;

        let partition_client = client
            .partition_client(self.config.topic.clone(), PARTITION, UnknownTopicHandling::Error)
            .await
            .map_err(|e| Error::queue(format!("Failed to get partition client: {}", e)))?;
        let partition_client = Arc::new(partition_client);

        if !self.initialized.load(Ordering::SeqCst) {
            let at = match self.config.start_offset {
                StartOffset::Earliest => OffsetAt::Earliest,
                StartOffset::Latest => OffsetAt::Latest,
            };
            let offset = partition_client
                .get_offset(at)
                .await
                .map_err(|e| Error::queue(format!("Failed to get offset: {}", e)))?;

            self.next_offset.store(offset, Ordering::SeqCst);
            self.initialized.store(true, Ordering::SeqCst);

            info!(
                topic = %self.config.topic,
                partition = PARTITION,
                offset = offset,
                "Reading queue consumer initialized at offset"
            );
        }

        *self.client.write().await = Some(partition_client.clone());
        Ok(partition_client)
    }

    /// Drops the cached connection so the next call reconnects.
    pub async fn reset_connection(&self) {
        *self.client.write().await = None;
        info!("Redpanda connection reset");
    }

    /// Produces up to one batch of staged readings.
    ///
    /// On failure the batch goes back to the front of the staging buffer.
    pub async fn flush_once(&self) -> Result<usize> {
        let batch = self.staging.take(self.config.batch_size);
        if batch.is_empty() {
            return Ok(0);
        }

        let mut records = Vec::with_capacity(batch.len());
        for reading in &batch {
            records.push(encode(reading)?);
        }

        let client = match self.ensure_connected().await {
            Ok(client) => client,
            Err(e) => {
                self.staging.requeue_front(batch);
                return Err(e);
            }
        };

        let count = records.len();
        let start = std::time::Instant::now();

        match client.produce(records, compression(&self.config.compression)).await {
            Ok(_offsets) => {
                debug!(
                    topic = %self.config.topic,
                    count = count,
                    latency_ms = %start.elapsed().as_millis(),
                    "Produced readings to Redpanda"
                );
                Ok(count)
            }
            Err(e) => {
                error!(count = count, error = %e, "Failed to produce readings to Redpanda");
                self.staging.requeue_front(batch);
                self.reset_connection().await;
                Err(Error::queue(format!("Failed to produce: {}", e)))
            }
        }
    }

    /// Produces every staged reading. Used at shutdown.
    pub async fn flush(&self) -> Result<usize> {
        let mut total = 0;
        while !self.staging.is_empty() {
            total += self.flush_once().await?;
        }
        Ok(total)
    }

    /// Starts the background flush task.
    pub fn start_flush_task(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let interval = Duration::from_millis(self.config.batch_timeout_ms);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = self.flush_notify.notified() => {}
                }

                while !self.staging.is_empty() {
                    if let Err(e) = self.flush_once().await {
                        warn!(error = %e, staged = self.staging.len(), "Flush failed, will retry");
                        break;
                    }
                }
            }
        })
    }

    /// Fetches the next record batch and decodes it.
    async fn fetch(&self, timeout: Duration) -> Result<Vec<Reading>> {
        let client = self.ensure_connected().await?;
        let current = self.next_offset.load(Ordering::SeqCst);
        let max_wait_ms = timeout.as_millis().min(i32::MAX as u128) as i32;

        let (records, _high_watermark) = match client
            .fetch_records(current, 1..self.config.fetch_max_bytes, max_wait_ms)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                error!(offset = current, error = %e, "Fetch error");
                self.reset_connection().await;
                return Err(Error::queue(format!("Failed to fetch records: {}", e)));
            }
        };

        let mut readings = Vec::with_capacity(records.len());
        let mut max_offset = current - 1;

        for record in records {
            max_offset = max_offset.max(record.offset);

            let Some(value) = record.record.value else {
                continue;
            };
            match serde_json::from_slice::<Reading>(&value) {
                Ok(reading) => readings.push(reading),
                Err(e) => {
                    metrics().queue_decode_errors.inc();
                    warn!(offset = record.offset, error = %e, "Skipping undecodable record");
                }
            }
        }

        if max_offset >= current {
            self.next_offset.store(max_offset + 1, Ordering::SeqCst);
        }

        Ok(readings)
    }
}

#[async_trait]
impl ReadingQueue for RedpandaQueue {
    async fn enqueue(&self, reading: Reading) -> Result<()> {
        match self.staging.try_push(reading) {
            Ok(staged) => {
                metrics().readings_enqueued.inc();
                if staged >= self.config.batch_size {
                    self.flush_notify.notify_one();
                }
                Ok(())
            }
            Err(e) => {
                metrics().readings_rejected_full.inc();
                Err(e)
            }
        }
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<Reading>> {
        if let Some(reading) = self.fetched.pop() {
            metrics().readings_dequeued.inc();
            return Ok(Some(reading));
        }

        let _guard = match tokio::time::timeout(timeout, self.fetch_lock.lock()).await {
            Ok(guard) => guard,
            Err(_) => return Ok(None),
        };

        // Another worker may have filled the buffer while we waited.
        if self.fetched.is_empty() {
            let readings = self.fetch(timeout).await?;
            self.fetched.extend(readings);
        }

        let reading = self.fetched.pop();
        if reading.is_some() {
            metrics().readings_dequeued.inc();
        }
        metrics().queue_depth.set(self.len() as u64);
        Ok(reading)
    }

    fn try_take(&self) -> Option<Reading> {
        let reading = self.fetched.pop()?;
        metrics().readings_dequeued.inc();
        Some(reading)
    }

    /// Only the hand-off buffer: its offsets are already consumed. Staged
    /// readings are still produced by `flush`.
    fn take_unprocessed(&self) -> Vec<Reading> {
        self.fetched.take(usize::MAX)
    }

    fn len(&self) -> usize {
        self.staging.len() + self.fetched.len()
    }

    fn capacity(&self) -> usize {
        self.staging.capacity()
    }

    fn backend(&self) -> &'static str {
        "redpanda"
    }
}
