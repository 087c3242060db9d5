//! Per-identity segment synchronizer
//!
//! Owns one identity's "segments" and "large segments" caches and their
//! refresh lifecycle:
//! - Full refresh through a single retryable worker, never overlapping
//! - Periodic refresh while polling
//! - Targeted catch-up from streaming notifications, merged monotonically,
//!   optionally delayed and single-flight per merged target

use crate::events::{EventsManager, InternalEvent};
use crate::models::{Key, SegmentsChangeNumber};
use crate::storage::SegmentsStorage;
use crate::workers::{
    ChangeNumberCatalog, PeriodicWorker, RetryableWorker, SyncWorkerFactory, TimerName,
    TimersManager,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tracing::{debug, warn};

pub trait MySegmentsSynchronizer: Send + Sync {
    /// Load both caches from storage in the background
    fn load_segments_from_cache(&self);

    /// Trigger a full refresh unless one is already running
    fn synchronize_segments(&self);

    /// Targeted catch-up to `target`, after `delay`
    fn force_segments_sync(&self, target: SegmentsChangeNumber, delay: Duration);

    fn start_periodic_fetching(&self);

    fn stop_periodic_fetching(&self);

    fn notify_segments_updated(&self);

    fn notify_large_segments_updated(&self);

    fn pause(&self);

    fn resume(&self);

    fn destroy(&self);
}

/// The two segment caches of an identity
#[derive(Clone)]
pub struct SegmentsStorages {
    pub segments: Arc<dyn SegmentsStorage>,
    pub large_segments: Arc<dyn SegmentsStorage>,
}

struct SegmentsSyncState {
    key: Key,
    storages: SegmentsStorages,
    events_manager: Arc<dyn EventsManager>,
    worker_factory: Arc<dyn SyncWorkerFactory>,
    sync_worker: Arc<dyn RetryableWorker>,
    sync_in_flight: AtomicBool,
    periodic_worker: Option<Arc<dyn PeriodicWorker>>,
    catalog: ChangeNumberCatalog<SegmentsChangeNumber>,
    timers: TimersManager,
    target: Mutex<SegmentsChangeNumber>,
    sync_enabled: bool,
    is_destroyed: AtomicBool,
}

impl SegmentsSyncState {
    fn is_destroyed(&self) -> bool {
        self.is_destroyed.load(Ordering::SeqCst)
    }

    fn known_change_numbers(&self) -> SegmentsChangeNumber {
        let matching_key = &self.key.matching_key;
        SegmentsChangeNumber::new(
            self.storages.segments.change_number(matching_key),
            self.storages.large_segments.change_number(matching_key),
        )
    }

    fn merge_target(&self, incoming: SegmentsChangeNumber) -> SegmentsChangeNumber {
        let mut target = match self.target.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *target = target.merge_max(incoming);
        *target
    }

    fn current_target(&self) -> SegmentsChangeNumber {
        match self.target.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Start a one-shot worker for `target` unless one is in flight
    fn run_forced_sync(self: &Arc<Self>, target: SegmentsChangeNumber) {
        if self.is_destroyed() || self.catalog.contains(&target) {
            return;
        }

        let worker = self.worker_factory.segments_update_worker(&self.key, target);
        let state = Arc::downgrade(self);
        worker.set_completion_handler(Arc::new(move |result| {
            let Some(state) = state.upgrade() else {
                return;
            };
            state.catalog.remove(&target);
            match result {
                Ok(()) => debug!(
                    matching_key = %state.key.matching_key,
                    target = %target,
                    "Targeted segments sync completed"
                ),
                Err(e) => warn!(
                    matching_key = %state.key.matching_key,
                    target = %target,
                    error = %e,
                    "Targeted segments sync failed"
                ),
            }
        }));

        if self.catalog.insert_if_absent(target, Arc::clone(&worker)) {
            debug!(matching_key = %self.key.matching_key, target = %target, "Starting targeted segments sync");
            worker.start();
        }
    }
}

/// Default segment synchronizer for one identity
pub struct DefaultMySegmentsSynchronizer {
    state: Arc<SegmentsSyncState>,
}

impl DefaultMySegmentsSynchronizer {
    pub fn new(
        key: Key,
        sync_enabled: bool,
        storages: SegmentsStorages,
        events_manager: Arc<dyn EventsManager>,
        worker_factory: Arc<dyn SyncWorkerFactory>,
    ) -> Self {
        let sync_worker = worker_factory.segments_sync_worker(&key);
        let periodic_worker =
            sync_enabled.then(|| worker_factory.periodic_segments_sync_worker(&key));

        let state = Arc::new(SegmentsSyncState {
            key,
            storages,
            events_manager,
            worker_factory,
            sync_worker,
            sync_in_flight: AtomicBool::new(false),
            periodic_worker,
            catalog: ChangeNumberCatalog::new(),
            timers: TimersManager::new(),
            target: Mutex::new(SegmentsChangeNumber::default()),
            sync_enabled,
            is_destroyed: AtomicBool::new(false),
        });

        let weak: Weak<SegmentsSyncState> = Arc::downgrade(&state);
        state.sync_worker.set_completion_handler(Arc::new(move |result| {
            let Some(state) = weak.upgrade() else {
                return;
            };
            state.sync_in_flight.store(false, Ordering::SeqCst);
            if let Err(e) = result {
                warn!(matching_key = %state.key.matching_key, error = %e, "Segments sync failed");
            }
        }));

        Self { state }
    }

    pub fn key(&self) -> &Key {
        &self.state.key
    }

    /// Number of targeted workers currently in flight
    pub fn in_flight_targets(&self) -> usize {
        self.state.catalog.len()
    }
}

impl MySegmentsSynchronizer for DefaultMySegmentsSynchronizer {
    fn load_segments_from_cache(&self) {
        if self.state.is_destroyed() {
            return;
        }
        let state = Arc::clone(&self.state);
        tokio::task::spawn_blocking(move || {
            let matching_key = &state.key.matching_key;
            if let Err(e) = state.storages.segments.load_local(matching_key) {
                warn!(matching_key = %matching_key, error = %e, "Failed to load segments from cache");
            }
            state
                .events_manager
                .notify_internal_event(InternalEvent::MySegmentsLoadedFromCache);

            if let Err(e) = state.storages.large_segments.load_local(matching_key) {
                warn!(matching_key = %matching_key, error = %e, "Failed to load large segments from cache");
            }
            state
                .events_manager
                .notify_internal_event(InternalEvent::MyLargeSegmentsLoadedFromCache);
        });
    }

    fn synchronize_segments(&self) {
        if self.state.is_destroyed() {
            return;
        }
        if self
            .state
            .sync_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(matching_key = %self.state.key.matching_key, "Segments sync already running");
            return;
        }
        self.state.sync_worker.start();
    }

    fn force_segments_sync(&self, target: SegmentsChangeNumber, delay: Duration) {
        let state = &self.state;
        if state.is_destroyed() || !state.sync_enabled {
            return;
        }

        let known = state.known_change_numbers();
        if !target.is_newer_than(&known) {
            debug!(
                matching_key = %state.key.matching_key,
                incoming = %target,
                known = %known,
                "Ignoring stale segments notification"
            );
            return;
        }

        let merged = state.merge_target(target);
        if state.timers.is_scheduled(TimerName::SyncSegments) || state.catalog.contains(&merged) {
            return;
        }

        if delay.is_zero() {
            state.run_forced_sync(merged);
            return;
        }

        let weak = Arc::downgrade(state);
        state.timers.add(TimerName::SyncSegments, delay, move || {
            if let Some(state) = weak.upgrade() {
                let target = state.current_target();
                state.run_forced_sync(target);
            }
        });
    }

    fn start_periodic_fetching(&self) {
        if self.state.is_destroyed() {
            return;
        }
        if let Some(periodic) = &self.state.periodic_worker {
            periodic.start();
        }
    }

    fn stop_periodic_fetching(&self) {
        if let Some(periodic) = &self.state.periodic_worker {
            periodic.stop();
        }
    }

    fn notify_segments_updated(&self) {
        self.state
            .events_manager
            .notify_internal_event(InternalEvent::MySegmentsUpdated);
    }

    fn notify_large_segments_updated(&self) {
        self.state
            .events_manager
            .notify_internal_event(InternalEvent::MyLargeSegmentsUpdated);
    }

    fn pause(&self) {
        if let Some(periodic) = &self.state.periodic_worker {
            periodic.pause();
        }
    }

    fn resume(&self) {
        if self.state.is_destroyed() {
            return;
        }
        if let Some(periodic) = &self.state.periodic_worker {
            periodic.resume();
        }
    }

    fn destroy(&self) {
        let state = &self.state;
        if state.is_destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        state.sync_worker.stop();
        if let Some(periodic) = &state.periodic_worker {
            periodic.destroy();
        }
        state.timers.destroy();
        for worker in state.catalog.take_all() {
            worker.stop();
        }
        debug!(matching_key = %state.key.matching_key, "Segments synchronizer destroyed");
    }
}
