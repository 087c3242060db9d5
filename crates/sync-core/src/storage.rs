//! Storage collaborator contracts
//!
//! Implementations are durable and may block, so the sync core only calls
//! them from background tasks (`spawn_blocking` or pipeline workers).

use crate::error::SyncResult;
use crate::models::{EventDto, FeatureFlag, FlagKill, ImpressionsCountPerFeature, KeyImpression};
use std::collections::{HashMap, HashSet};

/// Flag definitions cache, process-wide
pub trait FlagsStorage: Send + Sync {
    /// Load persisted definitions into memory
    fn load_local(&self) -> SyncResult<()>;

    fn get_all(&self) -> Vec<FeatureFlag>;

    /// Last applied change number, -1 when unknown
    fn change_number(&self) -> i64;

    fn update_change_number(&self, change_number: i64) -> SyncResult<()>;

    fn delete(&self, names: &[String]) -> SyncResult<()>;

    /// Apply a kill; returns false when the stored flag is newer or absent
    fn kill(&self, kill: &FlagKill) -> SyncResult<bool>;

    /// Filter the cached set was fetched with
    fn filter_query_string(&self) -> Option<String>;

    fn update_filter_query_string(&self, query: &str) -> SyncResult<()>;

    fn clear(&self) -> SyncResult<()>;
}

/// Segment memberships, one instance per segment kind, scoped by matching key
pub trait SegmentsStorage: Send + Sync {
    fn load_local(&self, matching_key: &str) -> SyncResult<()>;

    fn get_all(&self, matching_key: &str) -> HashSet<String>;

    fn change_number(&self, matching_key: &str) -> i64;

    fn clear(&self, matching_key: &str) -> SyncResult<()>;
}

/// Client attributes, scoped by matching key
pub trait AttributesStorage: Send + Sync {
    fn load_local(&self, matching_key: &str) -> SyncResult<()>;

    fn get_all(&self, matching_key: &str) -> HashMap<String, serde_json::Value>;

    /// Drop all attributes held for the key
    fn destroy(&self, matching_key: &str);
}

/// Append-only queue of telemetry items awaiting delivery
pub trait QueueStorage<T>: Send + Sync {
    fn push(&self, item: T) -> SyncResult<()>;

    /// Toggle writing to disk; memory-only storages ignore it
    fn set_persistence(&self, _enabled: bool) {}
}

pub type ImpressionsStorage = dyn QueueStorage<KeyImpression>;
pub type EventsStorage = dyn QueueStorage<EventDto>;

/// Durable impression counts, written on pause and flush
pub trait ImpressionsCountStorage: Send + Sync {
    fn push_many(&self, counts: Vec<ImpressionsCountPerFeature>) -> SyncResult<()>;
}

/// Observer entry persisted across process restarts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashedImpression {
    pub hash: u64,
    pub time: i64,
}

pub trait HashedImpressionsStorage: Send + Sync {
    fn get_all(&self) -> SyncResult<Vec<HashedImpression>>;

    fn update(&self, hashes: &[HashedImpression]) -> SyncResult<()>;
}

/// Unique (key, feature) tracking used when impressions are not delivered
pub trait UniqueKeysTracker: Send + Sync {
    fn track(&self, key: &str, feature: &str);

    /// Persist tracked keys and start over
    fn save_and_clear(&self);
}
