//! Process-wide flag definitions synchronizer
//!
//! This module provides:
//! - Cache reconciliation against the configured sync filter
//! - The main full-refresh worker and its periodic counterpart
//! - Targeted catch-up per change number, single-flight through the catalog
//! - Kill and update relays towards the events manager

mod filter;

pub use filter::{flag_prefix, SyncFilter};

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::events::{EventsManager, InternalEvent, SyncEventBroadcaster, SyncStatusEvent};
use crate::models::FlagKill;
use crate::storage::FlagsStorage;
use crate::workers::{ChangeNumberCatalog, PeriodicWorker, RetryableWorker, SyncWorkerFactory};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub trait FeatureFlagsSynchronizer: Send + Sync {
    /// Load the cache in the background, then announce it to the manager
    fn load(&self);

    /// Load the cache in the background, then start the main worker
    fn load_and_synchronize(&self);

    fn synchronize(&self);

    /// Catch up to `change_number`; stale numbers are ignored
    fn synchronize_change_number(&self, change_number: i64);

    fn start_periodic_sync(&self);

    fn stop_periodic_sync(&self);

    /// Apply a kill locally so evaluations see it before the next fetch
    fn notify_killed(&self, kill: FlagKill);

    fn notify_updated(&self);

    fn pause(&self);

    fn resume(&self);

    /// Cancel the main worker, the periodic worker and every targeted worker
    fn stop(&self);
}

struct FlagsSyncState {
    storage: Arc<dyn FlagsStorage>,
    filter: SyncFilter,
    events_manager: Arc<dyn EventsManager>,
    broadcaster: SyncEventBroadcaster,
    worker_factory: Arc<dyn SyncWorkerFactory>,
    sync_worker: Arc<dyn RetryableWorker>,
    periodic_worker: Option<Arc<dyn PeriodicWorker>>,
    catalog: ChangeNumberCatalog<i64>,
    sync_enabled: bool,
    is_stopped: AtomicBool,
}

impl FlagsSyncState {
    fn is_stopped(&self) -> bool {
        self.is_stopped.load(Ordering::SeqCst)
    }

    /// Drop cached flags the current filter no longer covers
    fn reconcile_with_filter(&self) -> SyncResult<()> {
        let query = self.filter.query_string();
        if self.storage.filter_query_string().as_deref() == Some(query.as_str()) {
            return Ok(());
        }

        let to_delete = self.filter.flags_to_delete(&self.storage.get_all());
        if !to_delete.is_empty() {
            info!(
                count = to_delete.len(),
                filter = %query,
                "Removing cached flags outside the sync filter"
            );
            self.storage.delete(&to_delete)?;
            self.storage.update_change_number(-1)?;
        }
        self.storage.update_filter_query_string(&query)
    }

    /// Blocking part of both load paths
    fn load_from_cache(&self) {
        if let Err(e) = self.storage.load_local() {
            warn!(error = %e, "Failed to load flags from cache");
        }
        if let Err(e) = self.reconcile_with_filter() {
            warn!(error = %e, "Failed to reconcile cached flags with sync filter");
        }
        if !self.storage.get_all().is_empty() {
            self.events_manager
                .notify_internal_event(InternalEvent::SplitsLoadedFromCache);
        }
    }

    fn start_main_worker(&self) {
        if self.is_stopped() {
            return;
        }
        self.sync_worker.start();
    }
}

pub struct DefaultFeatureFlagsSynchronizer {
    state: Arc<FlagsSyncState>,
}

impl DefaultFeatureFlagsSynchronizer {
    pub fn new(
        config: &SyncConfig,
        storage: Arc<dyn FlagsStorage>,
        worker_factory: Arc<dyn SyncWorkerFactory>,
        broadcaster: SyncEventBroadcaster,
        events_manager: Arc<dyn EventsManager>,
    ) -> Self {
        let sync_worker = worker_factory.flags_sync_worker();
        let periodic_worker = config
            .sync_enabled
            .then(|| worker_factory.periodic_flags_sync_worker());

        let completion_broadcaster = broadcaster.clone();
        sync_worker.set_completion_handler(Arc::new(move |result| match result {
            Ok(()) => completion_broadcaster.push(SyncStatusEvent::SyncExecuted),
            Err(SyncError::UriTooLong) => {
                warn!("Flags fetch URI too long, narrow the sync filter");
                completion_broadcaster.push(SyncStatusEvent::UriTooLongOnSync);
            }
            Err(e) => warn!(error = %e, "Flags sync failed"),
        }));

        Self {
            state: Arc::new(FlagsSyncState {
                storage,
                filter: config.sync_filter.clone(),
                events_manager,
                broadcaster,
                worker_factory,
                sync_worker,
                periodic_worker,
                catalog: ChangeNumberCatalog::new(),
                sync_enabled: config.sync_enabled,
                is_stopped: AtomicBool::new(false),
            }),
        }
    }

    /// Number of targeted workers currently in flight
    pub fn in_flight_targets(&self) -> usize {
        self.state.catalog.len()
    }
}

impl FeatureFlagsSynchronizer for DefaultFeatureFlagsSynchronizer {
    fn load(&self) {
        let state = Arc::clone(&self.state);
        tokio::task::spawn_blocking(move || {
            state.load_from_cache();
            state.broadcaster.push(SyncStatusEvent::SplitLoadedFromCache);
        });
    }

    fn load_and_synchronize(&self) {
        let state = Arc::clone(&self.state);
        tokio::task::spawn_blocking(move || {
            state.load_from_cache();
            state.start_main_worker();
        });
    }

    fn synchronize(&self) {
        self.state.start_main_worker();
    }

    fn synchronize_change_number(&self, change_number: i64) {
        let state = &self.state;
        if state.is_stopped() || !state.sync_enabled {
            return;
        }
        if change_number <= state.storage.change_number() {
            debug!(change_number, "Ignoring stale flags notification");
            return;
        }
        if state.catalog.contains(&change_number) {
            return;
        }

        let worker = state.worker_factory.flags_update_worker(change_number);
        let weak = Arc::downgrade(state);
        worker.set_completion_handler(Arc::new(move |result| {
            let Some(state) = weak.upgrade() else {
                return;
            };
            state.catalog.remove(&change_number);
            match result {
                Ok(()) => state.broadcaster.push(SyncStatusEvent::SyncExecuted),
                Err(e) => warn!(change_number, error = %e, "Targeted flags sync failed"),
            }
        }));

        if state.catalog.insert_if_absent(change_number, Arc::clone(&worker)) {
            debug!(change_number, "Starting targeted flags sync");
            worker.start();
        }
    }

    fn start_periodic_sync(&self) {
        if self.state.is_stopped() {
            return;
        }
        if let Some(periodic) = &self.state.periodic_worker {
            periodic.start();
        }
    }

    fn stop_periodic_sync(&self) {
        if let Some(periodic) = &self.state.periodic_worker {
            periodic.stop();
        }
    }

    fn notify_killed(&self, kill: FlagKill) {
        if self.state.is_stopped() {
            return;
        }
        let state = Arc::clone(&self.state);
        tokio::task::spawn_blocking(move || match state.storage.kill(&kill) {
            Ok(true) => {
                debug!(flag = %kill.name, change_number = kill.change_number, "Flag killed");
                state
                    .events_manager
                    .notify_internal_event(InternalEvent::SplitKilledNotification);
            }
            Ok(false) => debug!(flag = %kill.name, "Kill ignored, stored flag is newer or absent"),
            Err(e) => warn!(flag = %kill.name, error = %e, "Failed to apply flag kill"),
        });
    }

    fn notify_updated(&self) {
        self.state
            .events_manager
            .notify_internal_event(InternalEvent::SplitsUpdated);
    }

    fn pause(&self) {
        if let Some(periodic) = &self.state.periodic_worker {
            periodic.pause();
        }
    }

    fn resume(&self) {
        if self.state.is_stopped() {
            return;
        }
        if let Some(periodic) = &self.state.periodic_worker {
            periodic.resume();
        }
    }

    fn stop(&self) {
        let state = &self.state;
        if state.is_stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        state.sync_worker.stop();
        if let Some(periodic) = &state.periodic_worker {
            periodic.stop();
            periodic.destroy();
        }
        for worker in state.catalog.take_all() {
            worker.stop();
        }
        debug!("Flags synchronizer stopped");
    }
}
