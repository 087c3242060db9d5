//! Events synchronizer
//!
//! Same accumulate → threshold → flush path as impressions, without dedup
//! or counting. Lifecycle calls only touch the periodic recorder.

use crate::config::SyncConfig;
use crate::models::EventDto;
use crate::observability::{EventsDataKind, TelemetryRecorder};
use crate::recorder::{FlushChecker, RecorderSyncHelper};
use crate::storage::EventsStorage;
use crate::workers::{PeriodicWorker, RecorderWorker, SyncWorkerFactory};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

pub trait EventsSynchronizer: Send + Sync {
    fn start(&self);

    fn stop(&self);

    fn push(&self, event: EventDto);

    fn flush(&self);

    fn pause(&self);

    fn resume(&self);

    fn destroy(&self);
}

enum EventsCommand {
    Push(Box<EventDto>),
    Flush,
}

pub struct DefaultEventsSynchronizer {
    commands: mpsc::UnboundedSender<EventsCommand>,
    periodic_recorder: Arc<dyn PeriodicWorker>,
    telemetry: Arc<dyn TelemetryRecorder>,
    is_destroyed: AtomicBool,
}

impl DefaultEventsSynchronizer {
    /// Must run inside a Tokio runtime
    pub fn new(
        config: &SyncConfig,
        storage: Arc<EventsStorage>,
        worker_factory: &dyn SyncWorkerFactory,
        telemetry: Arc<dyn TelemetryRecorder>,
    ) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let pipeline = EventsPipeline {
            sync_helper: RecorderSyncHelper::new(
                storage,
                FlushChecker::new(config.events_queue_size, config.events_queue_size_bytes),
            ),
            recorder: worker_factory.events_recorder(),
            telemetry: Arc::clone(&telemetry),
        };
        tokio::task::spawn_blocking(move || pipeline.run(receiver));

        Self {
            commands,
            periodic_recorder: worker_factory.periodic_events_recorder(),
            telemetry,
            is_destroyed: AtomicBool::new(false),
        }
    }

    fn send(&self, command: EventsCommand) {
        if self.commands.send(command).is_err() {
            debug!("Events pipeline closed, command dropped");
        }
    }

    fn is_destroyed(&self) -> bool {
        self.is_destroyed.load(Ordering::SeqCst)
    }
}

impl EventsSynchronizer for DefaultEventsSynchronizer {
    fn start(&self) {
        if self.is_destroyed() {
            return;
        }
        self.periodic_recorder.start();
    }

    fn stop(&self) {
        self.periodic_recorder.stop();
    }

    fn push(&self, event: EventDto) {
        if self.is_destroyed() {
            self.telemetry.record_events(EventsDataKind::Dropped, 1);
            return;
        }
        self.send(EventsCommand::Push(Box::new(event)));
    }

    fn flush(&self) {
        if self.is_destroyed() {
            return;
        }
        self.send(EventsCommand::Flush);
    }

    fn pause(&self) {
        self.periodic_recorder.pause();
    }

    fn resume(&self) {
        self.periodic_recorder.resume();
    }

    fn destroy(&self) {
        if self.is_destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.periodic_recorder.destroy();
    }
}

struct EventsPipeline {
    sync_helper: RecorderSyncHelper<EventDto>,
    recorder: Arc<dyn RecorderWorker>,
    telemetry: Arc<dyn TelemetryRecorder>,
}

impl EventsPipeline {
    fn run(mut self, mut receiver: mpsc::UnboundedReceiver<EventsCommand>) {
        while let Some(command) = receiver.blocking_recv() {
            match command {
                EventsCommand::Push(event) => self.handle_push(*event),
                EventsCommand::Flush => {
                    self.recorder.flush();
                    self.sync_helper.reset_accumulator();
                }
            }
        }
        debug!("Events pipeline stopped");
    }

    fn handle_push(&mut self, event: EventDto) {
        let size = event.size_in_bytes();
        if self.sync_helper.push_and_check_flush(event, size) {
            debug!("Events queue threshold reached, flushing");
            self.recorder.flush();
            self.sync_helper.reset_accumulator();
        }
        self.telemetry.record_events(EventsDataKind::Queued, 1);
    }
}
