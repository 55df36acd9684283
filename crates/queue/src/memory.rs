//! In-process bounded queue.

use async_trait::async_trait;
use pipeline_core::{Reading, Result};
use std::time::Duration;
use telemetry::metrics;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::batch::BoundedBuffer;
use crate::ReadingQueue;

/// Multi-producer, multi-consumer bounded queue held in memory.
///
/// Each reading is handed to exactly one consumer. Suitable for single-process
/// deployments and tests; readings are lost if the process dies.
pub struct MemoryQueue {
    buffer: BoundedBuffer,
    notify: Notify,
}

impl MemoryQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: BoundedBuffer::new(capacity),
            notify: Notify::new(),
        }
    }
}

#[async_trait]
impl ReadingQueue for MemoryQueue {
    async fn enqueue(&self, reading: Reading) -> Result<()> {
        match self.buffer.try_push(reading) {
            Ok(depth) => {
                metrics().readings_enqueued.inc();
                metrics().queue_depth.set(depth as u64);
                self.notify.notify_one();
                Ok(())
            }
            Err(e) => {
                metrics().readings_rejected_full.inc();
                Err(e)
            }
        }
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<Reading>> {
        let deadline = Instant::now() + timeout;

        loop {
            // Register interest before checking so a push between the check
            // and the wait leaves a permit behind.
            let notified = self.notify.notified();

            if let Some(reading) = self.buffer.pop() {
                metrics().readings_dequeued.inc();
                metrics().queue_depth.set(self.buffer.len() as u64);
                return Ok(Some(reading));
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    fn try_take(&self) -> Option<Reading> {
        let reading = self.buffer.pop()?;
        metrics().readings_dequeued.inc();
        metrics().queue_depth.set(self.buffer.len() as u64);
        Some(reading)
    }

    fn take_unprocessed(&self) -> Vec<Reading> {
        let readings = self.buffer.take(usize::MAX);
        metrics().queue_depth.set(0);
        readings
    }

    fn len(&self) -> usize {
        self.buffer.len()
    }

    fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
