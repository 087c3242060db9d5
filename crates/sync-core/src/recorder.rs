//! Accumulate-then-flush helpers shared by the telemetry pipelines
//!
//! Both types are owned by a single pipeline task, so the
//! push → check threshold → flush → reset sequence never interleaves.

use crate::storage::QueueStorage;
use std::sync::Arc;
use tracing::warn;

/// Tracks queued volume since the last flush
#[derive(Debug, Clone)]
pub struct FlushChecker {
    max_queue_size: usize,
    max_queue_size_bytes: usize,
    pushed_count: usize,
    pushed_bytes: usize,
}

impl FlushChecker {
    pub fn new(max_queue_size: usize, max_queue_size_bytes: usize) -> Self {
        Self {
            max_queue_size,
            max_queue_size_bytes,
            pushed_count: 0,
            pushed_bytes: 0,
        }
    }

    /// Account for one more item; true once a count or byte threshold is crossed
    pub fn check_if_flush_needed(&mut self, size_in_bytes: usize) -> bool {
        self.pushed_count += 1;
        self.pushed_bytes += size_in_bytes;
        self.pushed_count >= self.max_queue_size || self.pushed_bytes >= self.max_queue_size_bytes
    }

    pub fn update(&mut self, count: usize, bytes: usize) {
        self.pushed_count = count;
        self.pushed_bytes = bytes;
    }

    pub fn reset(&mut self) {
        self.update(0, 0);
    }

    pub fn pushed_count(&self) -> usize {
        self.pushed_count
    }
}

/// Pushes items to durable storage and reports when a flush is due
pub struct RecorderSyncHelper<T> {
    storage: Arc<dyn QueueStorage<T>>,
    accumulator: FlushChecker,
}

impl<T> RecorderSyncHelper<T> {
    pub fn new(storage: Arc<dyn QueueStorage<T>>, accumulator: FlushChecker) -> Self {
        Self {
            storage,
            accumulator,
        }
    }

    /// Store the item; true when the accumulated volume calls for a flush
    pub fn push_and_check_flush(&mut self, item: T, size_in_bytes: usize) -> bool {
        if let Err(e) = self.storage.push(item) {
            warn!(error = %e, "Failed to queue item for delivery");
            return false;
        }
        self.accumulator.check_if_flush_needed(size_in_bytes)
    }

    pub fn reset_accumulator(&mut self) {
        self.accumulator.reset();
    }

    pub fn pending(&self) -> usize {
        self.accumulator.pushed_count()
    }
}
