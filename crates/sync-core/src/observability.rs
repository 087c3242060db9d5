//! Observability for the sync core
//!
//! Provides:
//! - Prometheus metrics (impressions and events throughput, sync mode, streaming events)
//! - The `TelemetryRecorder` seam the pipelines report through
//! - Structured logging of lifecycle transitions with tracing

use crate::events::SyncStatusEvent;
use prometheus::{register_int_counter_vec, register_int_gauge, IntCounterVec, IntGauge};
use serde::Serialize;
use std::sync::OnceLock;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Impression outcomes reported by the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImpressionsDataKind {
    Queued,
    Deduped,
    Dropped,
}

impl ImpressionsDataKind {
    fn label(&self) -> &'static str {
        match self {
            ImpressionsDataKind::Queued => "queued",
            ImpressionsDataKind::Deduped => "deduped",
            ImpressionsDataKind::Dropped => "dropped",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventsDataKind {
    Queued,
    Dropped,
}

impl EventsDataKind {
    fn label(&self) -> &'static str {
        match self {
            EventsDataKind::Queued => "queued",
            EventsDataKind::Dropped => "dropped",
        }
    }
}

/// Active transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    Streaming,
    Polling,
}

/// Sink for sync telemetry
pub trait TelemetryRecorder: Send + Sync {
    fn record_impressions(&self, kind: ImpressionsDataKind, count: u64);

    fn record_events(&self, kind: EventsDataKind, count: u64);

    fn record_sync_mode(&self, mode: SyncMode);

    fn record_streaming_event(&self, event: &SyncStatusEvent);
}

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<SyncMetricsInner> = OnceLock::new();

struct SyncMetricsInner {
    impressions: IntCounterVec,
    events: IntCounterVec,
    streaming_events: IntCounterVec,
    sync_mode: IntGauge,
}

impl SyncMetricsInner {
    fn new() -> Self {
        Self {
            impressions: register_int_counter_vec!(
                "flag_sync_impressions_total",
                "Impressions seen by the tracker, by outcome",
                &["outcome"]
            )
            .expect("Failed to register impressions_total"),

            events: register_int_counter_vec!(
                "flag_sync_events_total",
                "Tracking events seen by the events synchronizer, by outcome",
                &["outcome"]
            )
            .expect("Failed to register events_total"),

            streaming_events: register_int_counter_vec!(
                "flag_sync_streaming_events_total",
                "Sync status events handled by the sync manager",
                &["event"]
            )
            .expect("Failed to register streaming_events_total"),

            sync_mode: register_int_gauge!(
                "flag_sync_mode",
                "Active transport: 1 for streaming, 0 for polling"
            )
            .expect("Failed to register sync_mode"),
        }
    }
}

/// Prometheus-backed `TelemetryRecorder`
///
/// A lightweight handle to the global metrics instance; clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct SyncMetrics {
    _private: (),
}

impl Default for SyncMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(SyncMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &SyncMetricsInner {
        GLOBAL_METRICS.get_or_init(SyncMetricsInner::new)
    }

    pub fn impressions_count(&self, kind: ImpressionsDataKind) -> u64 {
        self.inner()
            .impressions
            .with_label_values(&[kind.label()])
            .get()
    }

    pub fn events_count(&self, kind: EventsDataKind) -> u64 {
        self.inner().events.with_label_values(&[kind.label()]).get()
    }
}

impl TelemetryRecorder for SyncMetrics {
    fn record_impressions(&self, kind: ImpressionsDataKind, count: u64) {
        self.inner()
            .impressions
            .with_label_values(&[kind.label()])
            .inc_by(count);
    }

    fn record_events(&self, kind: EventsDataKind, count: u64) {
        self.inner()
            .events
            .with_label_values(&[kind.label()])
            .inc_by(count);
    }

    fn record_sync_mode(&self, mode: SyncMode) {
        let value = match mode {
            SyncMode::Streaming => 1,
            SyncMode::Polling => 0,
        };
        self.inner().sync_mode.set(value);
    }

    fn record_streaming_event(&self, event: &SyncStatusEvent) {
        self.inner()
            .streaming_events
            .with_label_values(&[event.name()])
            .inc();
    }
}

/// Install a global tracing subscriber honoring `RUST_LOG` (default `info`).
/// Later calls are ignored.
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let result = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .try_init()
    };
    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

/// Structured logger for sync lifecycle events
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn log_sync_started(&self, sync_enabled: bool, streaming_enabled: bool) {
        info!(
            event = "sync_started",
            instance = %self.instance,
            sync_enabled = sync_enabled,
            streaming_enabled = streaming_enabled,
            "Sync manager started"
        );
    }

    pub fn log_sync_mode_changed(&self, mode: SyncMode, reason: &str) {
        info!(
            event = "sync_mode_changed",
            instance = %self.instance,
            mode = ?mode,
            reason = %reason,
            "Sync mode changed"
        );
    }

    pub fn log_reconnect_scheduled(&self, delay_secs: u64) {
        info!(
            event = "streaming_reconnect_scheduled",
            instance = %self.instance,
            delay_secs = delay_secs,
            "Streaming reconnection scheduled"
        );
    }

    pub fn log_transports_stopped(&self, reason: &str) {
        warn!(
            event = "sync_transports_stopped",
            instance = %self.instance,
            reason = %reason,
            "Streaming and polling stopped"
        );
    }

    pub fn log_paused(&self) {
        info!(event = "sync_paused", instance = %self.instance, "Sync paused");
    }

    pub fn log_resumed(&self, forced_sync: bool) {
        info!(
            event = "sync_resumed",
            instance = %self.instance,
            forced_sync = forced_sync,
            "Sync resumed"
        );
    }

    pub fn log_stopped(&self) {
        info!(event = "sync_stopped", instance = %self.instance, "Sync manager stopped");
    }
}
