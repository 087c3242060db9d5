//! Sync status and internal lifecycle events
//!
//! - `SyncStatusEvent` is produced by the streaming collaborator and by the
//!   flag synchronizer, and consumed by the `SyncManager`
//! - `InternalEvent` is produced by this core and consumed by the external
//!   event state machine that derives ready/updated callbacks

use tokio::sync::mpsc;
use tracing::debug;

/// Events that drive the sync state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatusEvent {
    PushSubsystemUp,
    PushSubsystemDown,
    PushSubsystemDisabled,
    PushRetryableError,
    PushNonRetryableError,
    PushReset,
    /// Server advised max silent period, in seconds
    PushDelayReceived(i64),
    SyncExecuted,
    UriTooLongOnSync,
    SplitLoadedFromCache,
}

impl SyncStatusEvent {
    /// Events that only update bookkeeping and never change the transport
    pub fn is_bookkeeping(&self) -> bool {
        matches!(
            self,
            SyncStatusEvent::SyncExecuted | SyncStatusEvent::PushDelayReceived(_)
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            SyncStatusEvent::PushSubsystemUp => "push_subsystem_up",
            SyncStatusEvent::PushSubsystemDown => "push_subsystem_down",
            SyncStatusEvent::PushSubsystemDisabled => "push_subsystem_disabled",
            SyncStatusEvent::PushRetryableError => "push_retryable_error",
            SyncStatusEvent::PushNonRetryableError => "push_non_retryable_error",
            SyncStatusEvent::PushReset => "push_reset",
            SyncStatusEvent::PushDelayReceived(_) => "push_delay_received",
            SyncStatusEvent::SyncExecuted => "sync_executed",
            SyncStatusEvent::UriTooLongOnSync => "uri_too_long_on_sync",
            SyncStatusEvent::SplitLoadedFromCache => "split_loaded_from_cache",
        }
    }
}

/// Lifecycle signals emitted towards the client event state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InternalEvent {
    MySegmentsUpdated,
    MyLargeSegmentsUpdated,
    SplitsUpdated,
    MySegmentsLoadedFromCache,
    MyLargeSegmentsLoadedFromCache,
    SplitsLoadedFromCache,
    AttributesLoadedFromCache,
    SplitKilledNotification,
    SdkReadyTimeoutReached,
    SdkError,
}

/// Consumer of internal lifecycle signals, one per identity
pub trait EventsManager: Send + Sync {
    fn notify_internal_event(&self, event: InternalEvent);

    fn start(&self) {}

    fn stop(&self);
}

/// Fan-in point for `SyncStatusEvent`s
///
/// Cloned into every producer; the receiving half is handed to the
/// `SyncManager` event loop.
#[derive(Debug, Clone)]
pub struct SyncEventBroadcaster {
    sender: mpsc::UnboundedSender<SyncStatusEvent>,
}

impl SyncEventBroadcaster {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SyncStatusEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Push an event; dropped silently once the manager has stopped
    pub fn push(&self, event: SyncStatusEvent) {
        if self.sender.send(event).is_err() {
            debug!(event = event.name(), "Sync event dropped, receiver closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
