//! Named cancellable timers and reconnection backoff
//!
//! Each timer name owns a single slot: adding a timer while one with the
//! same name is pending is rejected, the earlier schedule wins.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Logical timer slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerName {
    /// Delayed targeted segment catch-up
    SyncSegments,
    /// Streaming reconnection attempt
    StreamingReconnect,
}

struct ScheduledTimer {
    id: u64,
    handle: JoinHandle<()>,
}

/// Table of pending timers keyed by name
pub struct TimersManager {
    timers: Arc<DashMap<TimerName, ScheduledTimer>>,
    next_id: AtomicU64,
}

impl TimersManager {
    pub fn new() -> Self {
        Self {
            timers: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Schedule `task` after `delay`; returns false if `name` is already pending
    pub fn add<F>(&self, name: TimerName, delay: Duration, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        match self.timers.entry(name) {
            Entry::Occupied(_) => {
                debug!(timer = ?name, "Timer already scheduled, keeping earlier one");
                false
            }
            Entry::Vacant(slot) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let timers = Arc::clone(&self.timers);
                let handle = tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    // Free the slot before running so the task may reschedule itself
                    timers.remove_if(&name, |_, timer| timer.id == id);
                    task();
                });
                slot.insert(ScheduledTimer { id, handle });
                debug!(timer = ?name, delay_ms = delay.as_millis() as u64, "Timer scheduled");
                true
            }
        }
    }

    /// Cancel a pending timer; returns whether one was pending
    pub fn cancel(&self, name: TimerName) -> bool {
        match self.timers.remove(&name) {
            Some((_, timer)) => {
                timer.handle.abort();
                debug!(timer = ?name, "Timer cancelled");
                true
            }
            None => false,
        }
    }

    pub fn is_scheduled(&self, name: TimerName) -> bool {
        self.timers.contains_key(&name)
    }

    /// Cancel every pending timer
    pub fn destroy(&self) {
        let names: Vec<TimerName> = self.timers.iter().map(|r| *r.key()).collect();
        for name in names {
            self.cancel(name);
        }
    }
}

impl Default for TimersManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Exponential backoff: `base * 2^attempt`, capped at `max`
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl ReconnectBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            attempt: 0,
        }
    }

    /// Delay for the next attempt, advancing the counter
    pub fn next_delay(&mut self) -> Duration {
        let factor = 2u32.saturating_pow(self.attempt);
        let delay = self
            .base
            .checked_mul(factor)
            .map_or(self.max, |d| d.min(self.max));
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

/// Single-slot timer whose delay grows on every schedule until cancelled
pub struct BackoffTimer {
    backoff: Mutex<ReconnectBackoff>,
    timers: TimersManager,
}

impl BackoffTimer {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            backoff: Mutex::new(ReconnectBackoff::new(base, max)),
            timers: TimersManager::new(),
        }
    }

    /// Schedule `task` with the next backoff delay; no-op if already pending
    pub fn schedule<F>(&self, task: F) -> Option<Duration>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.timers.is_scheduled(TimerName::StreamingReconnect) {
            return None;
        }
        let delay = match self.backoff.lock() {
            Ok(mut backoff) => backoff.next_delay(),
            Err(poisoned) => poisoned.into_inner().next_delay(),
        };
        self.timers
            .add(TimerName::StreamingReconnect, delay, task)
            .then_some(delay)
    }

    /// Cancel the pending attempt and start the backoff over
    pub fn cancel(&self) {
        self.timers.cancel(TimerName::StreamingReconnect);
        match self.backoff.lock() {
            Ok(mut backoff) => backoff.reset(),
            Err(poisoned) => poisoned.into_inner().reset(),
        }
    }

    /// Cancel the pending attempt but keep the backoff progress.
    /// Returns whether an attempt was pending.
    pub fn suspend(&self) -> bool {
        self.timers.cancel(TimerName::StreamingReconnect)
    }

    pub fn is_scheduled(&self) -> bool {
        self.timers.is_scheduled(TimerName::StreamingReconnect)
    }
}
