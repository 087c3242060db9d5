//! Data models shared across the sync core

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// One hour in milliseconds, the bucket width for impression counts
pub const HOUR_MS: i64 = 3_600_000;

/// Rough serialized size of one impression, used by the flush checker
pub const ESTIMATED_IMPRESSION_SIZE_BYTES: usize = 150;

/// Rough size of one tracked (key, feature) pair
pub const ESTIMATED_UNIQUE_KEY_SIZE_BYTES: usize = 100;

/// Current wall clock time in epoch milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Truncate an epoch-millisecond timestamp to the start of its hour
pub fn truncate_to_hour(timestamp_ms: i64) -> i64 {
    timestamp_ms - timestamp_ms.rem_euclid(HOUR_MS)
}

/// Identity used for evaluation and segment scoping
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Key {
    pub matching_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucketing_key: Option<String>,
}

impl Key {
    pub fn new(matching_key: impl Into<String>) -> Self {
        Self {
            matching_key: matching_key.into(),
            bucketing_key: None,
        }
    }

    pub fn with_bucketing(matching_key: impl Into<String>, bucketing_key: impl Into<String>) -> Self {
        Self {
            matching_key: matching_key.into(),
            bucketing_key: Some(bucketing_key.into()),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.bucketing_key {
            Some(bucketing) => write!(f, "{}:{}", self.matching_key, bucketing),
            None => write!(f, "{}", self.matching_key),
        }
    }
}

/// Cached feature flag definition, reduced to what the sync core inspects
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFlag {
    pub name: String,
    pub change_number: i64,
    #[serde(default)]
    pub sets: BTreeSet<String>,
    #[serde(default)]
    pub killed: bool,
    pub default_treatment: String,
}

/// Kill signal relayed from a streaming notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagKill {
    pub name: String,
    pub default_treatment: String,
    pub change_number: i64,
}

/// Target of a targeted segment catch-up: one change number per segment kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentsChangeNumber {
    pub segments: i64,
    pub large_segments: i64,
}

impl SegmentsChangeNumber {
    pub fn new(segments: i64, large_segments: i64) -> Self {
        Self {
            segments,
            large_segments,
        }
    }

    /// Per kind maximum of two targets
    pub fn merge_max(self, other: SegmentsChangeNumber) -> Self {
        Self {
            segments: self.segments.max(other.segments),
            large_segments: self.large_segments.max(other.large_segments),
        }
    }

    /// True when at least one kind is strictly newer than `known`
    pub fn is_newer_than(&self, known: &SegmentsChangeNumber) -> bool {
        self.segments > known.segments || self.large_segments > known.large_segments
    }
}

impl Default for SegmentsChangeNumber {
    fn default() -> Self {
        Self::new(-1, -1)
    }
}

impl fmt::Display for SegmentsChangeNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "msn_{}_mlsn_{}", self.segments, self.large_segments)
    }
}

/// Record that an identity was evaluated against a flag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyImpression {
    pub key_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucketing_key: Option<String>,
    pub feature_name: String,
    pub treatment: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_number: Option<i64>,
    /// Set by the observer before enqueue
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<String>,
}

impl KeyImpression {
    pub fn new(
        key_name: impl Into<String>,
        feature_name: impl Into<String>,
        treatment: impl Into<String>,
        time: i64,
    ) -> Self {
        Self {
            key_name: key_name.into(),
            bucketing_key: None,
            feature_name: feature_name.into(),
            treatment: treatment.into(),
            label: None,
            time,
            change_number: None,
            previous_time: None,
            properties: None,
        }
    }
}

/// Impression plus the per-flag tracking toggle
#[derive(Debug, Clone, PartialEq)]
pub struct DecoratedImpression {
    pub impression: KeyImpression,
    pub impressions_disabled: bool,
}

impl DecoratedImpression {
    pub fn new(impression: KeyImpression) -> Self {
        Self {
            impression,
            impressions_disabled: false,
        }
    }
}

/// Drained impression count for one (feature, hour) bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpressionsCountPerFeature {
    pub feature: String,
    pub timeframe: i64,
    pub count: i64,
}

/// Custom tracking event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDto {
    pub key: String,
    pub traffic_type_name: String,
    pub event_type_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub properties: HashMap<String, serde_json::Value>,
}

impl EventDto {
    pub fn new(
        key: impl Into<String>,
        traffic_type_name: impl Into<String>,
        event_type_id: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            traffic_type_name: traffic_type_name.into(),
            event_type_id: event_type_id.into(),
            value: None,
            timestamp: now_millis(),
            properties: HashMap::new(),
        }
    }

    /// Approximate serialized size, used for byte thresholds
    pub fn size_in_bytes(&self) -> usize {
        serde_json::to_vec(self).map(|bytes| bytes.len()).unwrap_or(1024)
    }
}
