//! Synchronization core for a feature flag client SDK
//!
//! This crate provides:
//! - The sync manager deciding between streaming and polling
//! - The synchronizer facade fanning work out to every component
//! - Flag definitions sync with cache reconciliation against the fetch filter
//! - Per-identity segment sync and the key registry holding identities
//! - Impressions dedup, counting and delivery pipelines
//! - Events delivery pipeline
//! - Health reporting and observability
//!
//! Storage, network fetchers and the streaming connection are collaborators
//! supplied by the host through traits. Components spawn background tasks,
//! so they must be created and driven from within a Tokio runtime.

pub mod config;
pub mod error;
pub mod events;
pub mod events_sync;
pub mod feature_flags;
pub mod guardian;
pub mod health;
pub mod impressions;
pub mod manager;
pub mod models;
pub mod observability;
pub mod recorder;
pub mod registry;
pub mod segments;
pub mod storage;
pub mod synchronizer;
pub mod workers;

#[cfg(test)]
#[allow(dead_code)]
pub(crate) mod testing;

pub use config::{ImpressionsMode, RefreshTarget, SyncConfig, UserConsent};
pub use error::{SyncError, SyncResult};
pub use events::{EventsManager, InternalEvent, SyncEventBroadcaster, SyncStatusEvent};
pub use events_sync::{DefaultEventsSynchronizer, EventsSynchronizer};
pub use feature_flags::{DefaultFeatureFlagsSynchronizer, FeatureFlagsSynchronizer, SyncFilter};
pub use guardian::SyncGuardian;
pub use health::{ComponentHealth, ComponentStatus, HealthReport, SyncHealth};
pub use impressions::{DefaultImpressionsTracker, ImpressionsStorages, ImpressionsTracker};
pub use manager::{PushNotificationManager, SyncManager, SyncManagerBuilder, SyncState};
pub use models::*;
pub use observability::{StructuredLogger, SyncMetrics, TelemetryRecorder};
pub use registry::{ClientHandle, IdentityBundle, KeyRegistry};
pub use segments::{DefaultMySegmentsSynchronizer, MySegmentsSynchronizer, SegmentsStorages};
pub use synchronizer::{DefaultSynchronizer, Synchronizer};
