//! Impressions tracker
//!
//! Evaluation threads hand impressions to a single pipeline task through a
//! channel. The task owns the flush accumulators and the periodic recorders,
//! so dedup, enqueue, threshold flushes and recorder lifecycle calls always
//! run in the order they were issued.

use super::{ImpressionsCounter, ImpressionsObserver};
use crate::config::{ImpressionsMode, SyncConfig};
use crate::models::{
    truncate_to_hour, DecoratedImpression, KeyImpression, ESTIMATED_IMPRESSION_SIZE_BYTES,
    ESTIMATED_UNIQUE_KEY_SIZE_BYTES,
};
use crate::observability::{ImpressionsDataKind, TelemetryRecorder};
use crate::recorder::{FlushChecker, RecorderSyncHelper};
use crate::storage::{
    HashedImpressionsStorage, ImpressionsCountStorage, ImpressionsStorage, UniqueKeysTracker,
};
use crate::workers::{PeriodicWorker, RecorderWorker, SyncWorkerFactory};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Process-wide impressions pipeline
pub trait ImpressionsTracker: Send + Sync {
    /// Start the periodic recorders
    fn start(&self);

    fn stop(&self);

    fn push(&self, impression: DecoratedImpression);

    /// Persist counts and unique keys, then suspend the periodic recorders
    fn pause(&self);

    fn resume(&self);

    /// Persist counts and unique keys, then send everything queued
    fn flush(&self);

    fn destroy(&self);

    fn enable_tracking(&self, enable: bool);

    fn enable_persistence(&self, enable: bool);

    fn is_tracking_enabled(&self) -> bool;
}

/// Storages the tracker writes to
#[derive(Clone)]
pub struct ImpressionsStorages {
    pub impressions: Arc<ImpressionsStorage>,
    pub counts: Arc<dyn ImpressionsCountStorage>,
    pub hashes: Option<Arc<dyn HashedImpressionsStorage>>,
    pub unique_keys: Arc<dyn UniqueKeysTracker>,
}

enum TrackerCommand {
    Push(Box<DecoratedImpression>),
    Flush,
    Start,
    Stop,
    Pause,
    Resume,
    Destroy,
}

/// Periodic recorders driven by the pipeline task
struct PeriodicRecorders {
    impressions: Arc<dyn PeriodicWorker>,
    counts: Arc<dyn PeriodicWorker>,
    unique_keys: Arc<dyn PeriodicWorker>,
}

impl PeriodicRecorders {
    fn each(&self, f: impl Fn(&dyn PeriodicWorker)) {
        f(self.impressions.as_ref());
        f(self.counts.as_ref());
        f(self.unique_keys.as_ref());
    }
}

/// Channel-fed tracker; see the module docs for the ordering model
pub struct DefaultImpressionsTracker {
    commands: mpsc::UnboundedSender<TrackerCommand>,
    impressions_storage: Arc<ImpressionsStorage>,
    counter: Arc<ImpressionsCounter>,
    telemetry: Arc<dyn TelemetryRecorder>,
    is_tracking_enabled: AtomicBool,
    is_persistence_enabled: Arc<AtomicBool>,
    is_destroyed: AtomicBool,
}

impl DefaultImpressionsTracker {
    /// Build the tracker and spawn its pipeline task. Must run inside a Tokio runtime.
    pub fn new(
        config: &SyncConfig,
        storages: ImpressionsStorages,
        worker_factory: &dyn SyncWorkerFactory,
        telemetry: Arc<dyn TelemetryRecorder>,
    ) -> Self {
        let observer = Arc::new(match &storages.hashes {
            Some(hashes) => {
                ImpressionsObserver::with_storage(config.observer_capacity, Arc::clone(hashes))
            }
            None => ImpressionsObserver::new(config.observer_capacity),
        });
        let counter = Arc::new(ImpressionsCounter::new());
        let is_persistence_enabled =
            Arc::new(AtomicBool::new(config.user_consent.is_persistence_enabled()));

        let (commands, receiver) = mpsc::unbounded_channel();
        let pipeline = TrackerPipeline {
            mode: config.impressions_mode,
            observer,
            counter: Arc::clone(&counter),
            sync_helper: RecorderSyncHelper::new(
                Arc::clone(&storages.impressions),
                FlushChecker::new(
                    config.impressions_queue_size,
                    config.impressions_queue_size_bytes,
                ),
            ),
            unique_keys_checker: FlushChecker::new(
                config.impressions_queue_size,
                config.impressions_queue_size_bytes,
            ),
            impressions_recorder: worker_factory.impressions_recorder(),
            count_recorder: worker_factory.impressions_count_recorder(),
            unique_keys_recorder: worker_factory.unique_keys_recorder(),
            counts_storage: Arc::clone(&storages.counts),
            unique_keys: Arc::clone(&storages.unique_keys),
            telemetry: Arc::clone(&telemetry),
            is_persistence_enabled: Arc::clone(&is_persistence_enabled),
            periodic: PeriodicRecorders {
                impressions: worker_factory.periodic_impressions_recorder(),
                counts: worker_factory.periodic_impressions_count_recorder(),
                unique_keys: worker_factory.periodic_unique_keys_recorder(),
            },
        };
        // Storages may block, keep the pipeline off the async workers
        tokio::task::spawn_blocking(move || pipeline.run(receiver));

        storages
            .impressions
            .set_persistence(is_persistence_enabled.load(Ordering::SeqCst));

        Self {
            commands,
            impressions_storage: storages.impressions,
            counter,
            telemetry,
            is_tracking_enabled: AtomicBool::new(config.user_consent.is_tracking_enabled()),
            is_persistence_enabled,
            is_destroyed: AtomicBool::new(false),
        }
    }

    fn send(&self, command: TrackerCommand) {
        if self.commands.send(command).is_err() {
            debug!("Impressions pipeline closed, command dropped");
        }
    }

    fn is_destroyed(&self) -> bool {
        self.is_destroyed.load(Ordering::SeqCst)
    }
}

impl ImpressionsTracker for DefaultImpressionsTracker {
    fn start(&self) {
        if self.is_destroyed() {
            return;
        }
        self.send(TrackerCommand::Start);
    }

    fn stop(&self) {
        self.send(TrackerCommand::Stop);
    }

    fn push(&self, impression: DecoratedImpression) {
        if self.is_destroyed() {
            return;
        }
        if !self.is_tracking_enabled() {
            self.telemetry.record_impressions(ImpressionsDataKind::Dropped, 1);
            return;
        }
        self.send(TrackerCommand::Push(Box::new(impression)));
    }

    fn pause(&self) {
        if self.is_destroyed() {
            return;
        }
        self.send(TrackerCommand::Pause);
    }

    fn resume(&self) {
        if self.is_destroyed() {
            return;
        }
        self.send(TrackerCommand::Resume);
    }

    fn flush(&self) {
        if self.is_destroyed() {
            return;
        }
        self.send(TrackerCommand::Flush);
    }

    fn destroy(&self) {
        if self.is_destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.send(TrackerCommand::Destroy);
    }

    fn enable_tracking(&self, enable: bool) {
        self.is_tracking_enabled.store(enable, Ordering::SeqCst);
    }

    fn enable_persistence(&self, enable: bool) {
        self.is_persistence_enabled.store(enable, Ordering::SeqCst);
        self.impressions_storage.set_persistence(enable);
    }

    fn is_tracking_enabled(&self) -> bool {
        self.is_tracking_enabled.load(Ordering::SeqCst)
    }
}

/// State owned by the pipeline task
struct TrackerPipeline {
    mode: ImpressionsMode,
    observer: Arc<ImpressionsObserver>,
    counter: Arc<ImpressionsCounter>,
    sync_helper: RecorderSyncHelper<KeyImpression>,
    unique_keys_checker: FlushChecker,
    impressions_recorder: Arc<dyn RecorderWorker>,
    count_recorder: Arc<dyn RecorderWorker>,
    unique_keys_recorder: Arc<dyn RecorderWorker>,
    counts_storage: Arc<dyn ImpressionsCountStorage>,
    unique_keys: Arc<dyn UniqueKeysTracker>,
    telemetry: Arc<dyn TelemetryRecorder>,
    is_persistence_enabled: Arc<AtomicBool>,
    periodic: PeriodicRecorders,
}

impl TrackerPipeline {
    fn run(mut self, mut receiver: mpsc::UnboundedReceiver<TrackerCommand>) {
        debug!(mode = ?self.mode, "Impressions pipeline started");
        while let Some(command) = receiver.blocking_recv() {
            match command {
                TrackerCommand::Push(impression) => self.handle_push(*impression),
                TrackerCommand::Flush => self.handle_flush(),
                TrackerCommand::Start => self.periodic.each(|worker| worker.start()),
                TrackerCommand::Stop => self.periodic.each(|worker| worker.stop()),
                TrackerCommand::Pause => self.handle_pause(),
                TrackerCommand::Resume => self.periodic.each(|worker| worker.resume()),
                TrackerCommand::Destroy => {
                    self.periodic.each(|worker| worker.destroy());
                    self.save_counts();
                    self.save_unique_keys();
                    self.observer.save_hashes();
                    break;
                }
            }
        }
        debug!("Impressions pipeline stopped");
    }

    fn handle_push(&mut self, decorated: DecoratedImpression) {
        let mut impression = decorated.impression;

        if decorated.impressions_disabled || self.mode == ImpressionsMode::None {
            self.counter.inc(&impression.feature_name, impression.time, 1);
            self.unique_keys
                .track(&impression.key_name, &impression.feature_name);
            if self
                .unique_keys_checker
                .check_if_flush_needed(ESTIMATED_UNIQUE_KEY_SIZE_BYTES)
            {
                debug!("Unique keys threshold reached, flushing");
                self.save_unique_keys();
                self.unique_keys_recorder.flush();
                self.unique_keys_checker.reset();
            }
            return;
        }

        impression.previous_time = self.observer.test_and_set(&impression);

        if self.mode == ImpressionsMode::Optimized {
            self.counter.inc(&impression.feature_name, impression.time, 1);
        }

        let should_queue = self.mode == ImpressionsMode::Debug || is_first_in_hour(&impression);
        if !should_queue {
            self.telemetry
                .record_impressions(ImpressionsDataKind::Deduped, 1);
            return;
        }

        if self
            .sync_helper
            .push_and_check_flush(impression, ESTIMATED_IMPRESSION_SIZE_BYTES)
        {
            debug!("Impressions queue threshold reached, flushing");
            self.impressions_recorder.flush();
            self.sync_helper.reset_accumulator();
        }
        self.telemetry
            .record_impressions(ImpressionsDataKind::Queued, 1);
    }

    fn handle_flush(&mut self) {
        self.save_counts();
        self.impressions_recorder.flush();
        self.sync_helper.reset_accumulator();
        self.count_recorder.flush();
        self.save_unique_keys();
        self.unique_keys_recorder.flush();
        self.unique_keys_checker.reset();
    }

    fn handle_pause(&mut self) {
        self.save_counts();
        self.save_unique_keys();
        self.observer.save_hashes();
        self.periodic.each(|worker| worker.pause());
    }

    fn save_counts(&self) {
        if !self.is_persistence_enabled.load(Ordering::SeqCst) {
            return;
        }
        let counts = self.counter.pop_all();
        if counts.is_empty() {
            return;
        }
        if let Err(e) = self.counts_storage.push_many(counts) {
            warn!(error = %e, "Failed to persist impression counts");
        }
    }

    /// Keys stay in the tracker until persistence is allowed
    fn save_unique_keys(&self) {
        if !self.is_persistence_enabled.load(Ordering::SeqCst) {
            return;
        }
        self.unique_keys.save_and_clear();
    }
}

/// Optimized mode sends an impression once per hour per identity
fn is_first_in_hour(impression: &KeyImpression) -> bool {
    match impression.previous_time {
        None => true,
        Some(previous) => truncate_to_hour(previous) != truncate_to_hour(impression.time),
    }
}
