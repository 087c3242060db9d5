//! Synchronizer facade
//!
//! The single object the rest of the SDK and the `SyncManager` call. It
//! composes the flag synchronizer, the key registry and the telemetry
//! pipelines. Every call returns immediately; work runs in the background.

use crate::config::UserConsent;
use crate::events_sync::EventsSynchronizer;
use crate::feature_flags::FeatureFlagsSynchronizer;
use crate::impressions::ImpressionsTracker;
use crate::models::{DecoratedImpression, EventDto, FlagKill, Key, SegmentsChangeNumber};
use crate::registry::KeyRegistry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

/// Facade over every synchronization component
///
/// Operations taking `matching_key: Option<&str>` apply to the identities
/// sharing that matching key, or to every identity when `None`.
pub trait Synchronizer: Send + Sync {
    /// Load cached flags; the manager starts remote sync once they are announced
    fn load_flags_from_cache(&self);

    fn load_and_synchronize_flags(&self);

    fn load_segments_from_cache(&self, matching_key: Option<&str>);

    fn load_attributes_from_cache(&self, matching_key: Option<&str>);

    /// Bring a newly created identity up to date
    fn start_by_key(&self, key: &Key);

    /// Full refresh of flags and every identity's segments
    fn sync_all(&self);

    fn synchronize_flags(&self);

    fn synchronize_flags_change_number(&self, change_number: i64);

    fn synchronize_segments(&self, matching_key: Option<&str>);

    fn force_segments_sync(
        &self,
        matching_key: Option<&str>,
        target: SegmentsChangeNumber,
        delay: Duration,
    );

    fn start_periodic_fetching(&self);

    fn stop_periodic_fetching(&self);

    fn start_recording_user_data(&self);

    fn stop_recording_user_data(&self);

    fn set_user_consent(&self, consent: UserConsent);

    fn user_consent(&self) -> UserConsent;

    fn push_impression(&self, impression: DecoratedImpression);

    fn push_event(&self, event: EventDto);

    fn notify_segments_updated(&self, matching_key: Option<&str>);

    fn notify_large_segments_updated(&self, matching_key: Option<&str>);

    fn notify_flags_updated(&self);

    /// Apply a kill locally, then catch up to its change number
    fn notify_flag_killed(&self, kill: FlagKill);

    fn pause(&self);

    fn resume(&self);

    fn flush(&self);

    fn destroy(&self);
}

/// Default facade
pub struct DefaultSynchronizer {
    flags_sync: Arc<dyn FeatureFlagsSynchronizer>,
    registry: Arc<KeyRegistry>,
    impressions_tracker: Arc<dyn ImpressionsTracker>,
    events_sync: Arc<dyn EventsSynchronizer>,
    user_consent: Mutex<UserConsent>,
    is_destroyed: AtomicBool,
}

impl DefaultSynchronizer {
    pub fn new(
        flags_sync: Arc<dyn FeatureFlagsSynchronizer>,
        registry: Arc<KeyRegistry>,
        impressions_tracker: Arc<dyn ImpressionsTracker>,
        events_sync: Arc<dyn EventsSynchronizer>,
        user_consent: UserConsent,
    ) -> Self {
        Self {
            flags_sync,
            registry,
            impressions_tracker,
            events_sync,
            user_consent: Mutex::new(user_consent),
            is_destroyed: AtomicBool::new(false),
        }
    }

    pub fn registry(&self) -> &Arc<KeyRegistry> {
        &self.registry
    }

    fn is_destroyed(&self) -> bool {
        self.is_destroyed.load(Ordering::SeqCst)
    }
}

impl Synchronizer for DefaultSynchronizer {
    fn load_flags_from_cache(&self) {
        if self.is_destroyed() {
            return;
        }
        self.flags_sync.load();
    }

    fn load_and_synchronize_flags(&self) {
        if self.is_destroyed() {
            return;
        }
        self.flags_sync.load_and_synchronize();
    }

    fn load_segments_from_cache(&self, matching_key: Option<&str>) {
        if self.is_destroyed() {
            return;
        }
        self.registry.load_segments_from_cache(matching_key);
    }

    fn load_attributes_from_cache(&self, matching_key: Option<&str>) {
        if self.is_destroyed() {
            return;
        }
        self.registry.load_attributes_from_cache(matching_key);
    }

    fn start_by_key(&self, key: &Key) {
        if self.is_destroyed() {
            return;
        }
        self.registry.start_sync(key);
    }

    fn sync_all(&self) {
        if self.is_destroyed() {
            return;
        }
        self.flags_sync.synchronize();
        self.registry.sync_segments(None);
    }

    fn synchronize_flags(&self) {
        if self.is_destroyed() {
            return;
        }
        self.flags_sync.synchronize();
    }

    fn synchronize_flags_change_number(&self, change_number: i64) {
        if self.is_destroyed() {
            return;
        }
        self.flags_sync.synchronize_change_number(change_number);
    }

    fn synchronize_segments(&self, matching_key: Option<&str>) {
        if self.is_destroyed() {
            return;
        }
        self.registry.sync_segments(matching_key);
    }

    fn force_segments_sync(
        &self,
        matching_key: Option<&str>,
        target: SegmentsChangeNumber,
        delay: Duration,
    ) {
        if self.is_destroyed() {
            return;
        }
        self.registry.force_segments_sync(matching_key, target, delay);
    }

    fn start_periodic_fetching(&self) {
        if self.is_destroyed() {
            return;
        }
        self.flags_sync.start_periodic_sync();
        self.registry.start_periodic_sync();
    }

    fn stop_periodic_fetching(&self) {
        self.flags_sync.stop_periodic_sync();
        self.registry.stop_periodic_sync();
    }

    fn start_recording_user_data(&self) {
        if self.is_destroyed() {
            return;
        }
        self.impressions_tracker.start();
        self.events_sync.start();
    }

    fn stop_recording_user_data(&self) {
        self.impressions_tracker.stop();
        self.events_sync.stop();
    }

    fn set_user_consent(&self, consent: UserConsent) {
        if self.is_destroyed() {
            return;
        }
        {
            let mut current = match self.user_consent.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *current = consent;
        }
        info!(consent = ?consent, "User consent changed");
        self.impressions_tracker
            .enable_tracking(consent.is_tracking_enabled());
        self.impressions_tracker
            .enable_persistence(consent.is_persistence_enabled());
        if consent == UserConsent::Granted {
            self.start_recording_user_data();
        } else {
            self.stop_recording_user_data();
        }
    }

    fn user_consent(&self) -> UserConsent {
        match self.user_consent.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn push_impression(&self, impression: DecoratedImpression) {
        if self.is_destroyed() {
            return;
        }
        self.impressions_tracker.push(impression);
    }

    fn push_event(&self, event: EventDto) {
        if self.is_destroyed() {
            return;
        }
        if !self.user_consent().is_tracking_enabled() {
            debug!(event_type = %event.event_type_id, "Event dropped, user declined tracking");
            return;
        }
        self.events_sync.push(event);
    }

    fn notify_segments_updated(&self, matching_key: Option<&str>) {
        self.registry.notify_segments_updated(matching_key);
    }

    fn notify_large_segments_updated(&self, matching_key: Option<&str>) {
        self.registry.notify_large_segments_updated(matching_key);
    }

    fn notify_flags_updated(&self) {
        self.flags_sync.notify_updated();
    }

    fn notify_flag_killed(&self, kill: FlagKill) {
        if self.is_destroyed() {
            return;
        }
        let change_number = kill.change_number;
        self.flags_sync.notify_killed(kill);
        self.flags_sync.synchronize_change_number(change_number);
    }

    fn pause(&self) {
        if self.is_destroyed() {
            return;
        }
        self.flags_sync.pause();
        self.registry.pause();
        self.impressions_tracker.pause();
        self.events_sync.pause();
    }

    fn resume(&self) {
        if self.is_destroyed() {
            return;
        }
        self.flags_sync.resume();
        self.registry.resume();
        self.impressions_tracker.resume();
        self.events_sync.resume();
    }

    fn flush(&self) {
        if self.is_destroyed() {
            return;
        }
        self.impressions_tracker.flush();
        self.events_sync.flush();
    }

    fn destroy(&self) {
        if self.is_destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.flags_sync.stop();
        self.registry.stop();
        self.impressions_tracker.destroy();
        self.events_sync.destroy();
        info!("Synchronizer destroyed");
    }
}
