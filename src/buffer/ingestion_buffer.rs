//! Ingestion buffer with a bounded capacity
//!
//! Producers append validated log entries; the background worker drains
//! them in batches. When the buffer is full the oldest unanalyzed entries are
//! dropped, favouring fresh analysis over completeness.

use crate::events::LogEntry;
use log::{debug, warn};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Entry waiting for analysis, with the moment it was queued
#[derive(Debug)]
struct QueuedEntry {
    entry: LogEntry,
    queued_at: Instant,
}

/// Bounded, thread-safe FIFO of log entries awaiting analysis
///
/// The lock is held only for the duration of a single append or drain, so
/// producers and the worker never wait on each other for longer than that.
#[derive(Debug)]
pub struct IngestionBuffer {
    queue: Mutex<VecDeque<QueuedEntry>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl IngestionBuffer {
    /// Create a buffer holding at most `capacity` entries
    ///
    /// # Examples
    ///
    /// ```
    /// use advisor::buffer::IngestionBuffer;
    ///
    /// let buffer = IngestionBuffer::new(10_000);
    /// assert!(buffer.is_empty());
    /// ```
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    // A poisoned lock still guards a structurally valid queue.
    fn lock(&self) -> MutexGuard<'_, VecDeque<QueuedEntry>> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append entries, evicting the oldest ones if capacity is exceeded
    ///
    /// # Returns
    ///
    /// The buffer size after the append
    pub fn push_all(&self, entries: Vec<LogEntry>) -> usize {
        let now = Instant::now();
        let mut queue = self.lock();
        let mut evicted = 0u64;

        for entry in entries {
            if queue.len() >= self.capacity {
                queue.pop_front();
                evicted += 1;
            }
            queue.push_back(QueuedEntry {
                entry,
                queued_at: now,
            });
        }

        let len = queue.len();
        drop(queue);

        if evicted > 0 {
            let total = self.dropped.fetch_add(evicted, Ordering::Relaxed) + evicted;
            warn!(
                "Ingestion buffer full ({} entries), dropped {} oldest entries ({} total)",
                self.capacity, evicted, total
            );
        }

        len
    }

    /// Drain up to `max` of the oldest entries
    pub fn drain_batch(&self, max: usize) -> Vec<LogEntry> {
        let mut queue = self.lock();
        let take = max.min(queue.len());
        queue.drain(..take).map(|queued| queued.entry).collect()
    }

    /// Drain a batch if one is ready
    ///
    /// A batch is ready once `batch_size` entries are queued, or once the
    /// oldest queued entry has waited at least `max_age`.
    pub fn take_ready_batch(&self, batch_size: usize, max_age: Duration) -> Option<Vec<LogEntry>> {
        let mut queue = self.lock();
        let oldest_age = queue.front().map(|queued| queued.queued_at.elapsed())?;

        if queue.len() < batch_size && oldest_age < max_age {
            return None;
        }

        let take = batch_size.min(queue.len());
        let batch: Vec<LogEntry> = queue.drain(..take).map(|queued| queued.entry).collect();
        debug!(
            "Drained batch of {} entries ({} still queued, oldest waited {:?})",
            batch.len(),
            queue.len(),
            oldest_age
        );
        Some(batch)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total number of entries evicted because the buffer was full
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Fraction of capacity currently in use, within [0, 1]
    pub fn fill_ratio(&self) -> f64 {
        self.len() as f64 / self.capacity as f64
    }
}

impl Default for IngestionBuffer {
    fn default() -> Self {
        Self::new(10_000)
    }
}
