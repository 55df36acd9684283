//! Bounded FIFO buffer of readings.

use parking_lot::Mutex;
use pipeline_core::{Error, Reading, Result};
use std::collections::VecDeque;

/// Bounded FIFO shared by producers and consumers.
///
/// Insertion order is preserved, so readings from one producer (and thus
/// one device) come out in the order they went in.
#[derive(Debug)]
pub struct BoundedBuffer {
    items: Mutex<VecDeque<Reading>>,
    capacity: usize,
}

impl BoundedBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            capacity,
        }
    }

    /// Appends a reading, failing fast when the buffer is at capacity.
    ///
    /// Returns the buffer length after the push.
    pub fn try_push(&self, reading: Reading) -> Result<usize> {
        let mut items = self.items.lock();
        if items.len() >= self.capacity {
            return Err(Error::queue_full(self.capacity));
        }
        items.push_back(reading);
        Ok(items.len())
    }

    /// Pops the oldest reading.
    pub fn pop(&self) -> Option<Reading> {
        self.items.lock().pop_front()
    }

    /// Takes up to `max` readings from the front.
    pub fn take(&self, max: usize) -> Vec<Reading> {
        let mut items = self.items.lock();
        let n = max.min(items.len());
        items.drain(..n).collect()
    }

    /// Puts readings back at the front, keeping their relative order.
    ///
    /// Used when a flush fails. May exceed capacity transiently since these
    /// readings were already accepted.
    pub fn requeue_front(&self, readings: Vec<Reading>) {
        let mut items = self.items.lock();
        for reading in readings.into_iter().rev() {
            items.push_front(reading);
        }
    }

    /// Appends readings regardless of capacity (fetched records, already accepted upstream).
    pub fn extend(&self, readings: Vec<Reading>) {
        self.items.lock().extend(readings);
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
