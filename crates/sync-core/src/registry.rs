//! Key registry
//!
//! Holds one component bundle per identity and fans operations out either
//! to every bundle sharing a matching key or to every registered bundle.
//! Safe for concurrent register/unregister/lookup from any thread.

use crate::events::{EventsManager, InternalEvent};
use crate::models::{Key, SegmentsChangeNumber};
use crate::segments::MySegmentsSynchronizer;
use crate::storage::AttributesStorage;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Client-side handle of an identity, owned by the host SDK
pub trait ClientHandle: Send + Sync {
    fn key(&self) -> &Key;
}

/// Per-identity components, created on first use of a key
#[derive(Clone)]
pub struct IdentityBundle {
    pub client: Arc<dyn ClientHandle>,
    pub events_manager: Arc<dyn EventsManager>,
    pub segments_sync: Arc<dyn MySegmentsSynchronizer>,
    pub attributes: Arc<dyn AttributesStorage>,
}

impl IdentityBundle {
    fn teardown(&self, matching_key: &str) {
        self.segments_sync.stop_periodic_fetching();
        self.segments_sync.destroy();
        self.attributes.destroy(matching_key);
        self.events_manager.stop();
    }
}

/// Registry of identity bundles
pub struct KeyRegistry {
    bundles: DashMap<Key, IdentityBundle>,
    polling_enabled: AtomicBool,
}

impl KeyRegistry {
    pub fn new() -> Self {
        Self {
            bundles: DashMap::new(),
            polling_enabled: AtomicBool::new(false),
        }
    }

    /// Register a bundle; a bundle already held for the key is replaced and torn down
    pub fn register(&self, key: Key, bundle: IdentityBundle) {
        debug!(key = %key, "Registering identity");
        if let Some(previous) = self.bundles.insert(key.clone(), bundle) {
            warn!(key = %key, "Identity registered twice, replacing bundle");
            previous.teardown(&key.matching_key);
        }
    }

    /// Tear down and remove the bundle for `key`, returning how many remain
    pub fn unregister_and_count(&self, key: &Key) -> Option<usize> {
        let (key, bundle) = self.bundles.remove(key)?;
        bundle.teardown(&key.matching_key);
        debug!(key = %key, remaining = self.bundles.len(), "Identity unregistered");
        Some(self.bundles.len())
    }

    pub fn lookup(&self, key: &Key) -> Option<IdentityBundle> {
        self.bundles.get(key).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }

    pub fn matching_keys(&self) -> HashSet<String> {
        self.bundles
            .iter()
            .map(|entry| entry.key().matching_key.clone())
            .collect()
    }

    pub fn is_polling_enabled(&self) -> bool {
        self.polling_enabled.load(Ordering::SeqCst)
    }

    /// Snapshot of the bundles in scope; `None` means every bundle.
    /// Callers act on the snapshot so no map guard is held across callouts.
    fn bundles_in_scope(&self, matching_key: Option<&str>) -> Vec<(Key, IdentityBundle)> {
        self.bundles
            .iter()
            .filter(|entry| matching_key.map_or(true, |mk| entry.key().matching_key == mk))
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    fn for_each<F>(&self, matching_key: Option<&str>, action: F)
    where
        F: Fn(&Key, &IdentityBundle),
    {
        for (key, bundle) in self.bundles_in_scope(matching_key) {
            action(&key, &bundle);
        }
    }

    pub fn load_segments_from_cache(&self, matching_key: Option<&str>) {
        self.for_each(matching_key, |_, bundle| {
            bundle.segments_sync.load_segments_from_cache();
        });
    }

    /// Load attributes off the caller's thread, then notify each identity
    pub fn load_attributes_from_cache(&self, matching_key: Option<&str>) {
        self.for_each(matching_key, |key, bundle| {
            let matching_key = key.matching_key.clone();
            let bundle = bundle.clone();
            tokio::task::spawn_blocking(move || {
                if let Err(e) = bundle.attributes.load_local(&matching_key) {
                    warn!(matching_key = %matching_key, error = %e, "Failed to load attributes from cache");
                }
                bundle
                    .events_manager
                    .notify_internal_event(InternalEvent::AttributesLoadedFromCache);
            });
        });
    }

    /// Bring a newly registered identity up to date
    pub fn start_sync(&self, key: &Key) {
        self.load_segments_from_cache(Some(&key.matching_key));
        self.load_attributes_from_cache(Some(&key.matching_key));
        self.sync_key(key);
        if self.is_polling_enabled() {
            if let Some(bundle) = self.lookup(key) {
                bundle.segments_sync.start_periodic_fetching();
            }
        }
    }

    /// Full segments refresh for exactly one identity
    pub fn sync_key(&self, key: &Key) {
        if let Some(bundle) = self.lookup(key) {
            bundle.segments_sync.synchronize_segments();
        }
    }

    pub fn sync_segments(&self, matching_key: Option<&str>) {
        self.for_each(matching_key, |_, bundle| {
            bundle.segments_sync.synchronize_segments();
        });
    }

    pub fn force_segments_sync(
        &self,
        matching_key: Option<&str>,
        target: SegmentsChangeNumber,
        delay: Duration,
    ) {
        self.for_each(matching_key, |_, bundle| {
            bundle.segments_sync.force_segments_sync(target, delay);
        });
    }

    pub fn notify_segments_updated(&self, matching_key: Option<&str>) {
        self.for_each(matching_key, |_, bundle| {
            bundle.segments_sync.notify_segments_updated();
        });
    }

    pub fn notify_large_segments_updated(&self, matching_key: Option<&str>) {
        self.for_each(matching_key, |_, bundle| {
            bundle.segments_sync.notify_large_segments_updated();
        });
    }

    /// Enable polling for current and future identities
    pub fn start_periodic_sync(&self) {
        self.polling_enabled.store(true, Ordering::SeqCst);
        self.for_each(None, |_, bundle| bundle.segments_sync.start_periodic_fetching());
    }

    pub fn stop_periodic_sync(&self) {
        self.polling_enabled.store(false, Ordering::SeqCst);
        self.for_each(None, |_, bundle| bundle.segments_sync.stop_periodic_fetching());
    }

    pub fn pause(&self) {
        self.for_each(None, |_, bundle| bundle.segments_sync.pause());
    }

    pub fn resume(&self) {
        self.for_each(None, |_, bundle| bundle.segments_sync.resume());
    }

    /// Tear down every identity
    pub fn stop(&self) {
        let keys: Vec<Key> = self.bundles.iter().map(|entry| entry.key().clone()).collect();
        for key in &keys {
            if let Some((key, bundle)) = self.bundles.remove(key) {
                bundle.teardown(&key.matching_key);
            }
        }
        info!(identities = keys.len(), "Key registry stopped");
    }
}

impl Default for KeyRegistry {
    fn default() -> Self {
        Self::new()
    }
}
