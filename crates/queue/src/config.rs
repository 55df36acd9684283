//! Queue configuration.

use serde::{Deserialize, Serialize};

/// Which queue implementation backs the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    /// In-process bounded queue
    #[default]
    Memory,
    /// Redpanda (Kafka-compatible) topic
    Redpanda,
}

/// Queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default)]
    pub backend: QueueBackend,
    /// Maximum readings held before `enqueue` fails fast
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default)]
    pub redpanda: RedpandaConfig,
}

fn default_capacity() -> usize {
    10_000
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::default(),
            capacity: default_capacity(),
            redpanda: RedpandaConfig::default(),
        }
    }
}

/// Where a fresh consumer starts reading the topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StartOffset {
    Earliest,
    #[default]
    Latest,
}

/// Redpanda queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedpandaConfig {
    /// Broker addresses
    pub brokers: Vec<String>,
    /// Topic carrying readings
    #[serde(default = "default_topic")]
    pub topic: String,
    /// Readings per produce request
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Maximum time a staged reading waits before being produced (ms)
    #[serde(default = "default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,
    /// Compression type (none, gzip, snappy, lz4, zstd)
    #[serde(default = "default_compression")]
    pub compression: String,
    /// Upper bound on bytes per fetch
    #[serde(default = "default_fetch_max_bytes")]
    pub fetch_max_bytes: i32,
    #[serde(default)]
    pub start_offset: StartOffset,
    /// SASL username (for cloud authentication)
    #[serde(default)]
    pub sasl_username: Option<String>,
    /// SASL password (for cloud authentication)
    #[serde(default)]
    pub sasl_password: Option<String>,
}

fn default_topic() -> String {
    "sensor-readings".to_string()
}

fn default_batch_size() -> usize {
    500
}

fn default_batch_timeout_ms() -> u64 {
    50
}

fn default_compression() -> String {
    "lz4".to_string()
}

fn default_fetch_max_bytes() -> i32 {
    1024 * 1024
}

impl Default for RedpandaConfig {
    fn default() -> Self {
        Self {
            brokers: vec!["localhost:9092".to_string()],
            topic: default_topic(),
            batch_size: default_batch_size(),
            batch_timeout_ms: default_batch_timeout_ms(),
            compression: default_compression(),
            fetch_max_bytes: default_fetch_max_bytes(),
            start_offset: StartOffset::default(),
            sasl_username: None,
            sasl_password: None,
        }
    }
}

impl RedpandaConfig {
    /// Returns the broker list as a comma-separated string.
    pub fn broker_string(&self) -> String {
        self.brokers.join(",")
    }

    /// Whether SASL credentials (and therefore TLS) are configured.
    pub fn uses_sasl(&self) -> bool {
        self.sasl_username.is_some() && self.sasl_password.is_some()
    }
}
