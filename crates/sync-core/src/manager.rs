//! Sync manager
//!
//! Top-level state machine. Decides between streaming and polling, owns the
//! streaming reconnection timer and translates lifecycle pause/resume into
//! calls on the synchronizer facade.
//!
//! Transport events arrive through a `SyncEventBroadcaster` and are handled
//! one at a time by a single event loop task. Every call must be made from
//! within a Tokio runtime.

use crate::config::{SyncConfig, UserConsent};
use crate::events::SyncStatusEvent;
use crate::guardian::SyncGuardian;
use crate::health::{components, HealthReport, SyncHealth};
use crate::observability::{StructuredLogger, SyncMetrics, SyncMode, TelemetryRecorder};
use crate::synchronizer::Synchronizer;
use crate::workers::BackoffTimer;
use anyhow::Result;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Streaming connection owned by the host
pub trait PushNotificationManager: Send + Sync {
    fn start(&self);

    fn pause(&self);

    fn resume(&self);

    /// Close the connection for good
    fn stop(&self);

    /// Drop the current connection; a later `start` reconnects
    fn disconnect(&self);
}

/// Derived manager state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    StreamingActive,
    PollingActive,
    ReconnectScheduled,
    Paused,
    Stopped,
}

struct ManagerInner {
    sync_enabled: bool,
    streaming_enabled: bool,
    synchronizer: Arc<dyn Synchronizer>,
    push_manager: Option<Arc<dyn PushNotificationManager>>,
    reconnect_timer: BackoffTimer,
    guardian: SyncGuardian,
    health: SyncHealth,
    telemetry: Arc<dyn TelemetryRecorder>,
    logger: StructuredLogger,
    remote_sync_started: AtomicBool,
    polling_enabled: AtomicBool,
    streaming_active: AtomicBool,
    streaming_stopped: AtomicBool,
    reconnect_deferred: AtomicBool,
    is_paused: AtomicBool,
    is_stopped: AtomicBool,
    dropped_bookkeeping: AtomicUsize,
}

impl ManagerInner {
    fn handle_event(self: &Arc<Self>, event: SyncStatusEvent) {
        self.telemetry.record_streaming_event(&event);
        if self.is_stopped.load(Ordering::SeqCst) {
            return;
        }
        if self.is_paused.load(Ordering::SeqCst) {
            if event.is_bookkeeping() {
                self.dropped_bookkeeping.fetch_add(1, Ordering::SeqCst);
                warn!(
                    event = event.name(),
                    "Sync paused, dropping bookkeeping event; guardian may be stale"
                );
            } else {
                debug!(event = event.name(), "Sync paused, dropping event");
            }
            return;
        }
        debug!(event = ?event, "Handling sync event");

        match event {
            SyncStatusEvent::PushSubsystemUp => {
                self.reconnect_timer.cancel();
                self.synchronizer.sync_all();
                self.synchronizer.stop_periodic_fetching();
                self.polling_enabled.store(false, Ordering::SeqCst);
                self.streaming_active.store(true, Ordering::SeqCst);
                self.health.set_healthy(components::STREAMING);
                self.health.set_healthy(components::POLLING);
                self.set_mode(SyncMode::Streaming, "push subsystem up");
            }
            SyncStatusEvent::PushSubsystemDown => {
                self.reconnect_timer.cancel();
                self.streaming_active.store(false, Ordering::SeqCst);
                self.health
                    .set_degraded(components::STREAMING, "push subsystem down");
                self.enable_polling("push subsystem down");
            }
            SyncStatusEvent::PushSubsystemDisabled => {
                self.stop_streaming("push subsystem disabled");
            }
            SyncStatusEvent::PushRetryableError => {
                self.streaming_active.store(false, Ordering::SeqCst);
                self.health
                    .set_degraded(components::STREAMING, "retryable streaming error");
                self.enable_polling("retryable streaming error");
                self.schedule_reconnection();
            }
            SyncStatusEvent::PushNonRetryableError => {
                self.stop_streaming("non retryable streaming error");
            }
            SyncStatusEvent::PushReset => {
                if let Some(push) = &self.push_manager {
                    push.disconnect();
                }
                self.streaming_active.store(false, Ordering::SeqCst);
                self.schedule_reconnection();
            }
            SyncStatusEvent::PushDelayReceived(seconds) => {
                self.guardian
                    .set_max_sync_period(seconds.saturating_mul(1000));
            }
            SyncStatusEvent::SyncExecuted => {
                self.guardian.update_last_sync_timestamp();
            }
            SyncStatusEvent::UriTooLongOnSync => {
                self.stop_all_transports();
            }
            SyncStatusEvent::SplitLoadedFromCache => {
                self.start_remote_sync();
            }
        }
    }

    fn start_remote_sync(self: &Arc<Self>) {
        if self.remote_sync_started.swap(true, Ordering::SeqCst) {
            return;
        }
        self.health.set_ready(true);
        self.synchronizer.sync_all();
        self.setup_sync_mode();
        if self.synchronizer.user_consent() == UserConsent::Granted {
            self.synchronizer.start_recording_user_data();
        } else {
            self.health
                .set_degraded(components::TELEMETRY, "user consent not granted");
        }
    }

    fn setup_sync_mode(&self) {
        if !self.sync_enabled {
            self.health
                .set_degraded(components::STREAMING, "sync disabled, single fetch only");
            self.health
                .set_degraded(components::POLLING, "sync disabled, single fetch only");
            return;
        }
        match &self.push_manager {
            Some(push) if self.streaming_enabled => push.start(),
            _ => {
                self.streaming_stopped.store(true, Ordering::SeqCst);
                self.enable_polling("streaming disabled");
            }
        }
    }

    fn enable_polling(&self, reason: &str) {
        if !self.polling_enabled.swap(true, Ordering::SeqCst) {
            self.synchronizer.start_periodic_fetching();
            self.health.set_healthy(components::POLLING);
            self.set_mode(SyncMode::Polling, reason);
        }
    }

    fn stop_streaming(&self, reason: &str) {
        self.reconnect_timer.cancel();
        self.streaming_active.store(false, Ordering::SeqCst);
        self.streaming_stopped.store(true, Ordering::SeqCst);
        self.enable_polling(reason);
        if let Some(push) = &self.push_manager {
            push.stop();
        }
        self.health.set_degraded(components::STREAMING, reason);
    }

    /// The caller must narrow the sync filter before anything can be fetched
    fn stop_all_transports(&self) {
        let reason = "flags fetch URI too long";
        self.reconnect_timer.cancel();
        if let Some(push) = &self.push_manager {
            push.stop();
        }
        self.synchronizer.stop_periodic_fetching();
        self.polling_enabled.store(false, Ordering::SeqCst);
        self.streaming_active.store(false, Ordering::SeqCst);
        self.streaming_stopped.store(true, Ordering::SeqCst);
        self.health.set_unhealthy(components::FEATURE_FLAGS, reason);
        self.health.set_unhealthy(components::STREAMING, reason);
        self.health.set_unhealthy(components::POLLING, reason);
        self.logger.log_transports_stopped(reason);
    }

    fn schedule_reconnection(self: &Arc<Self>) {
        let Some(push) = self.push_manager.clone() else {
            return;
        };
        let weak = Arc::downgrade(self);
        let scheduled = self.reconnect_timer.schedule(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if inner.is_stopped.load(Ordering::SeqCst) || inner.is_paused.load(Ordering::SeqCst) {
                return;
            }
            debug!("Reconnecting streaming");
            push.start();
        });
        if let Some(delay) = scheduled {
            self.logger.log_reconnect_scheduled(delay.as_secs());
        }
    }

    fn set_mode(&self, mode: SyncMode, reason: &str) {
        self.telemetry.record_sync_mode(mode);
        self.logger.log_sync_mode_changed(mode, reason);
    }
}

/// Top-level sync state machine; build with [`SyncManagerBuilder`]
pub struct SyncManager {
    inner: Arc<ManagerInner>,
    events: Mutex<Option<mpsc::UnboundedReceiver<SyncStatusEvent>>>,
    shutdown_tx: broadcast::Sender<()>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

impl SyncManager {
    /// Load caches and start handling transport events
    ///
    /// Remote sync begins once the flag cache is announced. Calling this
    /// twice has no effect.
    pub fn start(&self) {
        let receiver = match self.events.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(mut receiver) = receiver else {
            debug!("Sync manager already started");
            return;
        };
        if self.inner.is_stopped.load(Ordering::SeqCst) {
            return;
        }

        self.inner
            .logger
            .log_sync_started(self.inner.sync_enabled, self.inner.streaming_enabled);

        let inner = Arc::clone(&self.inner);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("Sync event loop received shutdown signal");
                        break;
                    }
                    event = receiver.recv() => {
                        match event {
                            Some(event) => inner.handle_event(event),
                            None => {
                                debug!("Sync event channel closed");
                                break;
                            }
                        }
                    }
                }
            }
        });
        if let Ok(mut slot) = self.event_loop.lock() {
            *slot = Some(handle);
        }

        let synchronizer = &self.inner.synchronizer;
        synchronizer.load_flags_from_cache();
        synchronizer.load_segments_from_cache(None);
        synchronizer.load_attributes_from_cache(None);
    }

    /// Suspend the push connection and every periodic worker, keeping state
    pub fn pause(&self) {
        let inner = &self.inner;
        if inner.is_stopped.load(Ordering::SeqCst) || inner.is_paused.swap(true, Ordering::SeqCst)
        {
            return;
        }
        if inner.reconnect_timer.suspend() {
            inner.reconnect_deferred.store(true, Ordering::SeqCst);
        }
        if let Some(push) = &inner.push_manager {
            if !inner.streaming_stopped.load(Ordering::SeqCst) {
                push.pause();
            }
        }
        inner.synchronizer.pause();
        inner.logger.log_paused();
    }

    /// Restore everything `pause` suspended and catch up if data went stale
    pub fn resume(&self) {
        let inner = &self.inner;
        if inner.is_stopped.load(Ordering::SeqCst) || !inner.is_paused.swap(false, Ordering::SeqCst)
        {
            return;
        }
        inner.synchronizer.resume();
        if let Some(push) = &inner.push_manager {
            if !inner.streaming_stopped.load(Ordering::SeqCst) {
                push.resume();
            }
        }
        if inner.reconnect_deferred.swap(false, Ordering::SeqCst) {
            inner.schedule_reconnection();
        }

        // A single initial fetch is all a sync-disabled session gets
        let forced_sync = inner.sync_enabled
            && inner.remote_sync_started.load(Ordering::SeqCst)
            && inner.guardian.must_sync();
        if forced_sync {
            inner.synchronizer.sync_all();
        }
        inner.logger.log_resumed(forced_sync);
    }

    /// Terminal; later calls are no-ops
    pub fn destroy(&self) {
        let inner = &self.inner;
        if inner.is_stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        inner.reconnect_timer.cancel();
        if let Some(push) = &inner.push_manager {
            push.stop();
        }
        inner.synchronizer.destroy();
        inner.health.set_ready(false);
        // No receivers once the loop is gone
        let _ = self.shutdown_tx.send(());
        inner.logger.log_stopped();
    }

    /// Start or stop user data recording according to `consent`
    pub fn set_user_consent(&self, consent: UserConsent) {
        if self.inner.is_stopped.load(Ordering::SeqCst) {
            return;
        }
        self.inner.synchronizer.set_user_consent(consent);
        match consent {
            UserConsent::Granted => self.inner.health.set_healthy(components::TELEMETRY),
            _ => self
                .inner
                .health
                .set_degraded(components::TELEMETRY, "user consent not granted"),
        }
    }

    pub fn state(&self) -> SyncState {
        let inner = &self.inner;
        if inner.is_stopped.load(Ordering::SeqCst) {
            SyncState::Stopped
        } else if inner.is_paused.load(Ordering::SeqCst) {
            SyncState::Paused
        } else if inner.reconnect_timer.is_scheduled() {
            SyncState::ReconnectScheduled
        } else if inner.streaming_active.load(Ordering::SeqCst) {
            SyncState::StreamingActive
        } else if inner.polling_enabled.load(Ordering::SeqCst) {
            SyncState::PollingActive
        } else {
            SyncState::Idle
        }
    }

    pub fn is_reconnect_scheduled(&self) -> bool {
        self.inner.reconnect_timer.is_scheduled()
    }

    pub fn is_polling_enabled(&self) -> bool {
        self.inner.polling_enabled.load(Ordering::SeqCst)
    }

    /// `SyncExecuted` and `PushDelayReceived` events lost to a pause
    pub fn dropped_bookkeeping_events(&self) -> usize {
        self.inner.dropped_bookkeeping.load(Ordering::SeqCst)
    }

    pub fn guardian(&self) -> &SyncGuardian {
        &self.inner.guardian
    }

    pub fn health(&self) -> HealthReport {
        self.inner.health.report()
    }

    /// Wait for the event loop to finish after `destroy`
    pub async fn join(&self) {
        let handle = match self.event_loop.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                info!(error = %e, "Sync event loop ended abnormally");
            }
        }
    }
}

/// Builder for the sync manager
pub struct SyncManagerBuilder {
    config: SyncConfig,
    synchronizer: Option<Arc<dyn Synchronizer>>,
    push_manager: Option<Arc<dyn PushNotificationManager>>,
    events: Option<mpsc::UnboundedReceiver<SyncStatusEvent>>,
    telemetry: Option<Arc<dyn TelemetryRecorder>>,
    reconnect_backoff: Option<(Duration, Duration)>,
    instance: String,
}

impl SyncManagerBuilder {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            synchronizer: None,
            push_manager: None,
            events: None,
            telemetry: None,
            reconnect_backoff: None,
            instance: "default".to_string(),
        }
    }

    pub fn synchronizer(mut self, synchronizer: Arc<dyn Synchronizer>) -> Self {
        self.synchronizer = Some(synchronizer);
        self
    }

    /// Without a push manager the manager always polls
    pub fn push_manager(mut self, push_manager: Arc<dyn PushNotificationManager>) -> Self {
        self.push_manager = Some(push_manager);
        self
    }

    /// Receiving half of the `SyncEventBroadcaster` the producers push to
    pub fn events(mut self, events: mpsc::UnboundedReceiver<SyncStatusEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Defaults to the process-wide prometheus metrics
    pub fn telemetry(mut self, telemetry: Arc<dyn TelemetryRecorder>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Override the configured reconnection backoff
    pub fn reconnect_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.reconnect_backoff = Some((base, max));
        self
    }

    pub fn instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = instance.into();
        self
    }

    pub fn build(self) -> Result<SyncManager> {
        let synchronizer = self
            .synchronizer
            .ok_or_else(|| anyhow::anyhow!("Synchronizer is required"))?;
        let events = self
            .events
            .ok_or_else(|| anyhow::anyhow!("Sync event receiver is required"))?;
        let (base, max) = self.reconnect_backoff.unwrap_or((
            self.config.reconnect_backoff_base(),
            self.config.reconnect_backoff_max(),
        ));
        if base > max {
            return Err(anyhow::anyhow!(
                "Reconnect backoff base {:?} exceeds max {:?}",
                base,
                max
            ));
        }
        let telemetry = self
            .telemetry
            .unwrap_or_else(|| Arc::new(SyncMetrics::new()));

        let (shutdown_tx, _) = broadcast::channel(1);
        let inner = Arc::new(ManagerInner {
            sync_enabled: self.config.sync_enabled,
            streaming_enabled: self.config.streaming_enabled,
            synchronizer,
            push_manager: self.push_manager,
            reconnect_timer: BackoffTimer::new(base, max),
            guardian: SyncGuardian::new(self.config.max_sync_period_ms),
            health: SyncHealth::new(),
            telemetry,
            logger: StructuredLogger::new(self.instance),
            remote_sync_started: AtomicBool::new(false),
            polling_enabled: AtomicBool::new(false),
            streaming_active: AtomicBool::new(false),
            streaming_stopped: AtomicBool::new(false),
            reconnect_deferred: AtomicBool::new(false),
            is_paused: AtomicBool::new(false),
            is_stopped: AtomicBool::new(false),
            dropped_bookkeeping: AtomicUsize::new(0),
        });

        Ok(SyncManager {
            inner,
            events: Mutex::new(Some(events)),
            shutdown_tx,
            event_loop: Mutex::new(None),
        })
    }
}
