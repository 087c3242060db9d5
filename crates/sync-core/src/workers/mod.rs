//! Worker contracts and scheduling primitives
//!
//! This module provides:
//! - Retryable, periodic and recorder worker traits implemented by the host
//! - An interval-driven periodic worker for hosts without their own scheduler
//! - The single-flight change-number catalog
//! - Named single-slot timers and the reconnection backoff timer

mod catalog;
mod interval;
mod timers;

pub use catalog::ChangeNumberCatalog;
pub use interval::{IntervalConfig, IntervalWorker, IntervalWorkerBuilder, SyncTask};
pub use timers::{BackoffTimer, ReconnectBackoff, TimerName, TimersManager};

pub use async_trait::async_trait;

use crate::error::SyncResult;
use crate::models::{Key, SegmentsChangeNumber};
use std::sync::Arc;

/// Called each time a retryable worker finishes a run
pub type CompletionHandler = Arc<dyn Fn(SyncResult<()>) + Send + Sync>;

/// Fetch worker that retries internally until it succeeds or gives up
pub trait RetryableWorker: Send + Sync {
    fn start(&self);

    fn stop(&self);

    fn set_completion_handler(&self, handler: CompletionHandler);
}

/// Worker that fires on a fixed period until destroyed
pub trait PeriodicWorker: Send + Sync {
    fn start(&self);

    fn stop(&self);

    fn pause(&self);

    fn resume(&self);

    /// Irreversible
    fn destroy(&self);
}

/// Sends everything queued in storage to the backend
pub trait RecorderWorker: Send + Sync {
    fn flush(&self);
}

/// Creates the workers used by the synchronizers
pub trait SyncWorkerFactory: Send + Sync {
    fn flags_sync_worker(&self) -> Arc<dyn RetryableWorker>;

    fn periodic_flags_sync_worker(&self) -> Arc<dyn PeriodicWorker>;

    /// One-shot worker fetching until `change_number` is reached
    fn flags_update_worker(&self, change_number: i64) -> Arc<dyn RetryableWorker>;

    fn segments_sync_worker(&self, key: &Key) -> Arc<dyn RetryableWorker>;

    fn periodic_segments_sync_worker(&self, key: &Key) -> Arc<dyn PeriodicWorker>;

    /// One-shot worker fetching segments until `target` is reached, bypassing caches
    fn segments_update_worker(
        &self,
        key: &Key,
        target: SegmentsChangeNumber,
    ) -> Arc<dyn RetryableWorker>;

    fn impressions_recorder(&self) -> Arc<dyn RecorderWorker>;

    fn periodic_impressions_recorder(&self) -> Arc<dyn PeriodicWorker>;

    fn impressions_count_recorder(&self) -> Arc<dyn RecorderWorker>;

    fn periodic_impressions_count_recorder(&self) -> Arc<dyn PeriodicWorker>;

    fn unique_keys_recorder(&self) -> Arc<dyn RecorderWorker>;

    fn periodic_unique_keys_recorder(&self) -> Arc<dyn PeriodicWorker>;

    fn events_recorder(&self) -> Arc<dyn RecorderWorker>;

    fn periodic_events_recorder(&self) -> Arc<dyn PeriodicWorker>;
}
