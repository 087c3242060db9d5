//! Sync configuration
//!
//! Loaded from environment variables (prefix `FLAGSYNC`) and an optional
//! config file through the `config` crate. Every field has a default so a
//! partial source is always valid.

use crate::error::{SyncError, SyncResult};
use crate::feature_flags::SyncFilter;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// How impressions are deduplicated before delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImpressionsMode {
    /// One impression per (key, feature, treatment) per hour, plus counts
    Optimized,
    /// Every impression is delivered
    Debug,
    /// Only counts and unique keys are delivered
    None,
}

/// Host-provided consent for recording user data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserConsent {
    Granted,
    Declined,
    Unknown,
}

impl UserConsent {
    /// Impressions and events are tracked unless consent was declined
    pub fn is_tracking_enabled(&self) -> bool {
        *self != UserConsent::Declined
    }

    /// Tracked data is persisted and sent only with explicit consent
    pub fn is_persistence_enabled(&self) -> bool {
        *self == UserConsent::Granted
    }
}

/// Periodic workers whose period comes from [`SyncConfig`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTarget {
    Flags,
    Segments,
    Impressions,
    ImpressionsCount,
    UniqueKeys,
    Events,
}

/// Configuration for the sync core
///
/// The `*_refresh_rate_secs` and `events_push_rate_secs` periods are inputs
/// for the periodic workers the host's factory builds, usually through
/// `IntervalWorkerBuilder::refresh_rate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// When false, a single initial sync runs and nothing is refreshed afterwards
    #[serde(default = "default_true")]
    pub sync_enabled: bool,

    /// Prefer the streaming channel over polling
    #[serde(default = "default_true")]
    pub streaming_enabled: bool,

    #[serde(default = "default_impressions_mode")]
    pub impressions_mode: ImpressionsMode,

    /// Flag definitions polling period in seconds
    #[serde(default = "default_flags_refresh_rate")]
    pub flags_refresh_rate_secs: u64,

    /// Segment memberships polling period in seconds
    #[serde(default = "default_segments_refresh_rate")]
    pub segments_refresh_rate_secs: u64,

    #[serde(default = "default_impressions_refresh_rate")]
    pub impressions_refresh_rate_secs: u64,

    #[serde(default = "default_impressions_count_refresh_rate")]
    pub impressions_count_refresh_rate_secs: u64,

    #[serde(default = "default_unique_keys_refresh_rate")]
    pub unique_keys_refresh_rate_secs: u64,

    #[serde(default = "default_events_push_rate")]
    pub events_push_rate_secs: u64,

    /// Queued impressions that trigger an immediate flush
    #[serde(default = "default_impressions_queue_size")]
    pub impressions_queue_size: usize,

    #[serde(default = "default_queue_size_bytes")]
    pub impressions_queue_size_bytes: usize,

    /// Queued events that trigger an immediate flush
    #[serde(default = "default_events_queue_size")]
    pub events_queue_size: usize,

    #[serde(default = "default_queue_size_bytes")]
    pub events_queue_size_bytes: usize,

    /// Entries kept by the impressions dedup observer
    #[serde(default = "default_observer_capacity")]
    pub observer_capacity: usize,

    #[serde(default = "default_backoff_base")]
    pub push_reconnect_backoff_base_secs: u64,

    #[serde(default = "default_backoff_max")]
    pub push_reconnect_backoff_max_secs: u64,

    /// Silent period after which a resume forces a full sync (ms)
    #[serde(default = "default_max_sync_period")]
    pub max_sync_period_ms: i64,

    #[serde(default = "default_user_consent")]
    pub user_consent: UserConsent,

    #[serde(default)]
    pub sync_filter: SyncFilter,
}

fn default_true() -> bool {
    true
}

fn default_impressions_mode() -> ImpressionsMode {
    ImpressionsMode::Optimized
}

fn default_flags_refresh_rate() -> u64 {
    3600
}

fn default_segments_refresh_rate() -> u64 {
    1800
}

fn default_impressions_refresh_rate() -> u64 {
    1800
}

fn default_impressions_count_refresh_rate() -> u64 {
    1800
}

fn default_unique_keys_refresh_rate() -> u64 {
    900
}

fn default_events_push_rate() -> u64 {
    1800
}

fn default_impressions_queue_size() -> usize {
    30_000
}

fn default_events_queue_size() -> usize {
    10_000
}

fn default_queue_size_bytes() -> usize {
    5 * 1024 * 1024
}

fn default_observer_capacity() -> usize {
    500
}

fn default_backoff_base() -> u64 {
    1
}

fn default_backoff_max() -> u64 {
    1800
}

fn default_max_sync_period() -> i64 {
    30 * 60 * 1000
}

fn default_user_consent() -> UserConsent {
    UserConsent::Granted
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_enabled: default_true(),
            streaming_enabled: default_true(),
            impressions_mode: default_impressions_mode(),
            flags_refresh_rate_secs: default_flags_refresh_rate(),
            segments_refresh_rate_secs: default_segments_refresh_rate(),
            impressions_refresh_rate_secs: default_impressions_refresh_rate(),
            impressions_count_refresh_rate_secs: default_impressions_count_refresh_rate(),
            unique_keys_refresh_rate_secs: default_unique_keys_refresh_rate(),
            events_push_rate_secs: default_events_push_rate(),
            impressions_queue_size: default_impressions_queue_size(),
            impressions_queue_size_bytes: default_queue_size_bytes(),
            events_queue_size: default_events_queue_size(),
            events_queue_size_bytes: default_queue_size_bytes(),
            observer_capacity: default_observer_capacity(),
            push_reconnect_backoff_base_secs: default_backoff_base(),
            push_reconnect_backoff_max_secs: default_backoff_max(),
            max_sync_period_ms: default_max_sync_period(),
            user_consent: default_user_consent(),
            sync_filter: SyncFilter::default(),
        }
    }
}

impl SyncConfig {
    const ENV_PREFIX: &'static str = "FLAGSYNC";

    /// Load configuration from `FLAGSYNC_*` environment variables
    pub fn load() -> SyncResult<Self> {
        let settings = config::Config::builder()
            .add_source(Self::environment())
            .build()?;

        let config: SyncConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file, with environment variables taking precedence
    pub fn from_file(path: impl AsRef<Path>) -> SyncResult<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(Self::environment())
            .build()?;

        let config: SyncConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn environment() -> config::Environment {
        config::Environment::with_prefix(Self::ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
    }

    /// Reject values that would stall the pipelines
    pub fn validate(&self) -> SyncResult<()> {
        if self.impressions_queue_size == 0 || self.events_queue_size == 0 {
            return Err(SyncError::InvalidConfig(
                "queue sizes must be greater than zero".to_string(),
            ));
        }
        if self.observer_capacity == 0 {
            return Err(SyncError::InvalidConfig(
                "observer capacity must be greater than zero".to_string(),
            ));
        }
        if self.push_reconnect_backoff_base_secs > self.push_reconnect_backoff_max_secs {
            return Err(SyncError::InvalidConfig(format!(
                "reconnect backoff base ({}s) exceeds max ({}s)",
                self.push_reconnect_backoff_base_secs, self.push_reconnect_backoff_max_secs
            )));
        }
        self.sync_filter.validate()
    }

    pub fn refresh_rate(&self, target: RefreshTarget) -> Duration {
        let secs = match target {
            RefreshTarget::Flags => self.flags_refresh_rate_secs,
            RefreshTarget::Segments => self.segments_refresh_rate_secs,
            RefreshTarget::Impressions => self.impressions_refresh_rate_secs,
            RefreshTarget::ImpressionsCount => self.impressions_count_refresh_rate_secs,
            RefreshTarget::UniqueKeys => self.unique_keys_refresh_rate_secs,
            RefreshTarget::Events => self.events_push_rate_secs,
        };
        Duration::from_secs(secs)
    }

    pub fn reconnect_backoff_base(&self) -> Duration {
        Duration::from_secs(self.push_reconnect_backoff_base_secs)
    }

    pub fn reconnect_backoff_max(&self) -> Duration {
        Duration::from_secs(self.push_reconnect_backoff_max_secs)
    }
}
