//! Staleness tracking for catch-up syncs

use crate::models::now_millis;
use std::sync::Mutex;
use tracing::debug;

#[derive(Debug)]
struct GuardianState {
    last_sync_ms: Option<i64>,
    max_sync_period_ms: i64,
}

/// Answers whether enough time passed since the last successful sync to
/// force a full one on resume.
///
/// The max silent period is advised by the server through a push message
/// and replaces the current one as given. Whether a catch-up applies to the
/// active transport is up to the caller.
#[derive(Debug)]
pub struct SyncGuardian {
    state: Mutex<GuardianState>,
}

impl SyncGuardian {
    pub fn new(max_sync_period_ms: i64) -> Self {
        Self {
            state: Mutex::new(GuardianState {
                last_sync_ms: None,
                max_sync_period_ms,
            }),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut GuardianState) -> R) -> R {
        match self.state.lock() {
            Ok(mut state) => f(&mut state),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    pub fn update_last_sync_timestamp(&self) {
        let now = now_millis();
        self.with_state(|state| state.last_sync_ms = Some(now));
    }

    pub fn set_max_sync_period(&self, period_ms: i64) {
        debug!(max_sync_period_ms = period_ms, "Updating max sync period");
        self.with_state(|state| state.max_sync_period_ms = period_ms);
    }

    pub fn max_sync_period(&self) -> i64 {
        self.with_state(|state| state.max_sync_period_ms)
    }

    /// True when never synced, or the last sync is older than the max period
    pub fn must_sync(&self) -> bool {
        let now = now_millis();
        self.with_state(|state| match state.last_sync_ms {
            None => true,
            Some(last) => now - last >= state.max_sync_period_ms,
        })
    }
}
