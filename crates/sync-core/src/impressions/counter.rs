//! Hour-bucketed impression counts per feature

use crate::models::{truncate_to_hour, ImpressionsCountPerFeature};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CountKey {
    feature: String,
    timeframe: i64,
}

/// Accumulates impression volume until the recorder drains it
#[derive(Debug, Default)]
pub struct ImpressionsCounter {
    counts: Mutex<HashMap<CountKey, i64>>,
}

impl ImpressionsCounter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<CountKey, i64>> {
        match self.counts.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Add `amount` to the bucket of `feature` for the hour containing `timeframe`
    pub fn inc(&self, feature: &str, timeframe: i64, amount: i64) {
        let key = CountKey {
            feature: feature.to_string(),
            timeframe: truncate_to_hour(timeframe),
        };
        *self.lock().entry(key).or_insert(0) += amount;
    }

    /// Drain every bucket, leaving the counter empty
    pub fn pop_all(&self) -> Vec<ImpressionsCountPerFeature> {
        let drained = std::mem::take(&mut *self.lock());
        drained
            .into_iter()
            .map(|(key, count)| ImpressionsCountPerFeature {
                feature: key.feature,
                timeframe: key.timeframe,
                count,
            })
            .collect()
    }

    /// Current count for one bucket, without draining
    pub fn count_for(&self, feature: &str, timeframe: i64) -> i64 {
        let key = CountKey {
            feature: feature.to_string(),
            timeframe: truncate_to_hour(timeframe),
        };
        self.lock().get(&key).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
