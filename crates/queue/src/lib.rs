//! Reading queue for the sensor pipeline.
//!
//! Bounded hand-off channel between producers and the
//! inference workers:
//! - `enqueue` fails fast with `Error::QueueFull` instead of blocking
//! - `dequeue` waits up to a timeout and hands each reading to one consumer
//! - order is preserved per producer

pub mod batch;
pub mod config;
pub mod health;
pub mod memory;
pub mod redpanda;

pub use config::*;
pub use memory::MemoryQueue;
pub use redpanda::RedpandaQueue;

use async_trait::async_trait;
use pipeline_core::{Reading, Result};
use std::time::Duration;

/// Multi-producer, multi-consumer reading queue.
#[async_trait]
pub trait ReadingQueue: Send + Sync {
    /// Hands a reading to the queue. Never blocks on a full queue.
    async fn enqueue(&self, reading: Reading) -> Result<()>;

    /// Takes the next reading, waiting up to `timeout`. `None` means empty.
    async fn dequeue(&self, timeout: Duration) -> Result<Option<Reading>>;

    /// Takes a reading already held in this process without waiting and
    /// without going to a broker. Used to drain at shutdown.
    fn try_take(&self) -> Option<Reading>;

    /// Removes the readings that would be lost if the process exited now:
    /// accepted or fetched, but not yet handed to a worker.
    fn take_unprocessed(&self) -> Vec<Reading>;

    /// Readings currently held locally.
    fn len(&self) -> usize;

    fn capacity(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Backend name for logs.
    fn backend(&self) -> &'static str;
}
