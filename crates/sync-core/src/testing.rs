//! Test doubles shared by the unit tests
//!
//! Every mock counts the calls it receives; collaborators that take data
//! keep it so assertions can inspect it.

use crate::config::UserConsent;
use crate::error::{SyncError, SyncResult};
use crate::events::{EventsManager, InternalEvent, SyncStatusEvent};
use crate::events_sync::EventsSynchronizer;
use crate::feature_flags::FeatureFlagsSynchronizer;
use crate::impressions::ImpressionsTracker;
use crate::manager::PushNotificationManager;
use crate::models::{
    DecoratedImpression, EventDto, FeatureFlag, FlagKill, ImpressionsCountPerFeature, Key,
    SegmentsChangeNumber,
};
use crate::observability::{EventsDataKind, ImpressionsDataKind, SyncMode, TelemetryRecorder};
use crate::registry::ClientHandle;
use crate::segments::MySegmentsSynchronizer;
use crate::storage::{
    AttributesStorage, FlagsStorage, HashedImpression, HashedImpressionsStorage,
    ImpressionsCountStorage, QueueStorage, SegmentsStorage, UniqueKeysTracker,
};
use crate::synchronizer::Synchronizer;
use crate::workers::{
    CompletionHandler, PeriodicWorker, RecorderWorker, RetryableWorker, SyncWorkerFactory,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::SeqCst);
}

fn read(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
}

/// Poll `cond` until it holds or two seconds pass
pub async fn eventually(cond: impl Fn() -> bool) -> bool {
    for _ in 0..400 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}

// Workers

#[derive(Default)]
pub struct MockRetryableWorker {
    starts: AtomicUsize,
    stops: AtomicUsize,
    handler: Mutex<Option<CompletionHandler>>,
    calls: Mutex<Vec<&'static str>>,
}

impl MockRetryableWorker {
    /// Lifecycle calls in the order received
    pub fn calls(&self) -> Vec<&'static str> {
        lock(&self.calls).clone()
    }

    fn log(&self, call: &'static str) {
        lock(&self.calls).push(call);
    }

    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_count(&self) -> usize {
        read(&self.starts)
    }

    pub fn stop_count(&self) -> usize {
        read(&self.stops)
    }

    /// Finish a run, invoking the completion handler on the caller's thread
    pub fn complete(&self, result: SyncResult<()>) {
        let handler = lock(&self.handler).clone();
        if let Some(handler) = handler {
            handler(result);
        }
    }
}

impl RetryableWorker for MockRetryableWorker {
    fn start(&self) {
        bump(&self.starts);
        self.log("start");
    }

    fn stop(&self) {
        bump(&self.stops);
        self.log("stop");
    }

    fn set_completion_handler(&self, handler: CompletionHandler) {
        *lock(&self.handler) = Some(handler);
    }
}

#[derive(Default)]
pub struct MockPeriodicWorker {
    starts: AtomicUsize,
    stops: AtomicUsize,
    pauses: AtomicUsize,
    resumes: AtomicUsize,
    destroys: AtomicUsize,
    calls: Mutex<Vec<&'static str>>,
}

impl MockPeriodicWorker {
    /// Lifecycle calls in the order received
    pub fn calls(&self) -> Vec<&'static str> {
        lock(&self.calls).clone()
    }

    fn log(&self, call: &'static str) {
        lock(&self.calls).push(call);
    }

    pub fn start_count(&self) -> usize {
        read(&self.starts)
    }

    pub fn stop_count(&self) -> usize {
        read(&self.stops)
    }

    pub fn pause_count(&self) -> usize {
        read(&self.pauses)
    }

    pub fn resume_count(&self) -> usize {
        read(&self.resumes)
    }

    pub fn destroy_count(&self) -> usize {
        read(&self.destroys)
    }
}

impl PeriodicWorker for MockPeriodicWorker {
    fn start(&self) {
        bump(&self.starts);
        self.log("start");
    }

    fn stop(&self) {
        bump(&self.stops);
        self.log("stop");
    }

    fn pause(&self) {
        bump(&self.pauses);
        self.log("pause");
    }

    fn resume(&self) {
        bump(&self.resumes);
        self.log("resume");
    }

    fn destroy(&self) {
        bump(&self.destroys);
        self.log("destroy");
    }
}

#[derive(Default)]
pub struct MockRecorderWorker {
    flushes: AtomicUsize,
}

impl MockRecorderWorker {
    pub fn flush_count(&self) -> usize {
        read(&self.flushes)
    }
}

impl RecorderWorker for MockRecorderWorker {
    fn flush(&self) {
        bump(&self.flushes);
    }
}

/// Hands out fixed workers and records the per-target ones it creates
pub struct MockWorkerFactory {
    pub flags_sync_worker: Arc<MockRetryableWorker>,
    pub periodic_flags_worker: Arc<MockPeriodicWorker>,
    pub impressions_recorder: Arc<MockRecorderWorker>,
    pub periodic_impressions_recorder: Arc<MockPeriodicWorker>,
    pub impressions_count_recorder: Arc<MockRecorderWorker>,
    pub periodic_count_recorder: Arc<MockPeriodicWorker>,
    pub unique_keys_recorder: Arc<MockRecorderWorker>,
    pub periodic_unique_keys_recorder: Arc<MockPeriodicWorker>,
    pub events_recorder: Arc<MockRecorderWorker>,
    pub periodic_events_recorder: Arc<MockPeriodicWorker>,
    flags_update: Mutex<Vec<(i64, Arc<MockRetryableWorker>)>>,
    segments_sync: Mutex<HashMap<Key, Arc<MockRetryableWorker>>>,
    periodic_segments: Mutex<HashMap<Key, Arc<MockPeriodicWorker>>>,
    segments_update: Mutex<Vec<(Key, SegmentsChangeNumber, Arc<MockRetryableWorker>)>>,
}

impl MockWorkerFactory {
    pub fn new() -> Self {
        Self {
            flags_sync_worker: Arc::default(),
            periodic_flags_worker: Arc::default(),
            impressions_recorder: Arc::default(),
            periodic_impressions_recorder: Arc::default(),
            impressions_count_recorder: Arc::default(),
            periodic_count_recorder: Arc::default(),
            unique_keys_recorder: Arc::default(),
            periodic_unique_keys_recorder: Arc::default(),
            events_recorder: Arc::default(),
            periodic_events_recorder: Arc::default(),
            flags_update: Mutex::new(Vec::new()),
            segments_sync: Mutex::new(HashMap::new()),
            periodic_segments: Mutex::new(HashMap::new()),
            segments_update: Mutex::new(Vec::new()),
        }
    }

    pub fn flags_update_workers(&self) -> Vec<(i64, Arc<MockRetryableWorker>)> {
        lock(&self.flags_update).clone()
    }

    pub fn segments_update_workers(&self) -> Vec<(Key, SegmentsChangeNumber, Arc<MockRetryableWorker>)> {
        lock(&self.segments_update).clone()
    }

    pub fn segments_sync_worker_for(&self, key: &Key) -> Option<Arc<MockRetryableWorker>> {
        lock(&self.segments_sync).get(key).cloned()
    }

    pub fn periodic_segments_worker_for(&self, key: &Key) -> Option<Arc<MockPeriodicWorker>> {
        lock(&self.periodic_segments).get(key).cloned()
    }
}

impl SyncWorkerFactory for MockWorkerFactory {
    fn flags_sync_worker(&self) -> Arc<dyn RetryableWorker> {
        self.flags_sync_worker.clone()
    }

    fn periodic_flags_sync_worker(&self) -> Arc<dyn PeriodicWorker> {
        self.periodic_flags_worker.clone()
    }

    fn flags_update_worker(&self, change_number: i64) -> Arc<dyn RetryableWorker> {
        let worker = Arc::new(MockRetryableWorker::new());
        lock(&self.flags_update).push((change_number, Arc::clone(&worker)));
        worker
    }

    fn segments_sync_worker(&self, key: &Key) -> Arc<dyn RetryableWorker> {
        let worker = Arc::new(MockRetryableWorker::new());
        lock(&self.segments_sync).insert(key.clone(), Arc::clone(&worker));
        worker
    }

    fn periodic_segments_sync_worker(&self, key: &Key) -> Arc<dyn PeriodicWorker> {
        let worker = Arc::new(MockPeriodicWorker::default());
        lock(&self.periodic_segments).insert(key.clone(), Arc::clone(&worker));
        worker
    }

    fn segments_update_worker(
        &self,
        key: &Key,
        target: SegmentsChangeNumber,
    ) -> Arc<dyn RetryableWorker> {
        let worker = Arc::new(MockRetryableWorker::new());
        lock(&self.segments_update).push((key.clone(), target, Arc::clone(&worker)));
        worker
    }

    fn impressions_recorder(&self) -> Arc<dyn RecorderWorker> {
        self.impressions_recorder.clone()
    }

    fn periodic_impressions_recorder(&self) -> Arc<dyn PeriodicWorker> {
        self.periodic_impressions_recorder.clone()
    }

    fn impressions_count_recorder(&self) -> Arc<dyn RecorderWorker> {
        self.impressions_count_recorder.clone()
    }

    fn periodic_impressions_count_recorder(&self) -> Arc<dyn PeriodicWorker> {
        self.periodic_count_recorder.clone()
    }

    fn unique_keys_recorder(&self) -> Arc<dyn RecorderWorker> {
        self.unique_keys_recorder.clone()
    }

    fn periodic_unique_keys_recorder(&self) -> Arc<dyn PeriodicWorker> {
        self.periodic_unique_keys_recorder.clone()
    }

    fn events_recorder(&self) -> Arc<dyn RecorderWorker> {
        self.events_recorder.clone()
    }

    fn periodic_events_recorder(&self) -> Arc<dyn PeriodicWorker> {
        self.periodic_events_recorder.clone()
    }
}

// Storages

#[derive(Default)]
pub struct MockFlagsStorage {
    flags: Mutex<Vec<FeatureFlag>>,
    change_number: AtomicI64,
    query: Mutex<Option<String>>,
    deleted: Mutex<Vec<String>>,
    killed: Mutex<Vec<String>>,
}

impl MockFlagsStorage {
    pub fn with_flags(flags: Vec<FeatureFlag>, change_number: i64) -> Self {
        Self {
            flags: Mutex::new(flags),
            change_number: AtomicI64::new(change_number),
            ..Default::default()
        }
    }

    pub fn deleted(&self) -> Vec<String> {
        lock(&self.deleted).clone()
    }

    pub fn killed(&self) -> Vec<String> {
        lock(&self.killed).clone()
    }
}

impl FlagsStorage for MockFlagsStorage {
    fn load_local(&self) -> SyncResult<()> {
        Ok(())
    }

    fn get_all(&self) -> Vec<FeatureFlag> {
        lock(&self.flags).clone()
    }

    fn change_number(&self) -> i64 {
        self.change_number.load(Ordering::SeqCst)
    }

    fn update_change_number(&self, change_number: i64) -> SyncResult<()> {
        self.change_number.store(change_number, Ordering::SeqCst);
        Ok(())
    }

    fn delete(&self, names: &[String]) -> SyncResult<()> {
        lock(&self.flags).retain(|flag| !names.contains(&flag.name));
        lock(&self.deleted).extend(names.iter().cloned());
        Ok(())
    }

    fn kill(&self, kill: &FlagKill) -> SyncResult<bool> {
        let mut flags = lock(&self.flags);
        let Some(flag) = flags.iter_mut().find(|flag| flag.name == kill.name) else {
            return Ok(false);
        };
        if flag.change_number >= kill.change_number {
            return Ok(false);
        }
        flag.killed = true;
        flag.default_treatment = kill.default_treatment.clone();
        flag.change_number = kill.change_number;
        lock(&self.killed).push(kill.name.clone());
        Ok(true)
    }

    fn filter_query_string(&self) -> Option<String> {
        lock(&self.query).clone()
    }

    fn update_filter_query_string(&self, query: &str) -> SyncResult<()> {
        *lock(&self.query) = Some(query.to_string());
        Ok(())
    }

    fn clear(&self) -> SyncResult<()> {
        lock(&self.flags).clear();
        self.change_number.store(-1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct MockSegmentsStorage {
    change_numbers: Mutex<HashMap<String, i64>>,
    loads: Mutex<HashMap<String, usize>>,
}

impl MockSegmentsStorage {
    pub fn set_change_number(&self, matching_key: &str, change_number: i64) {
        lock(&self.change_numbers).insert(matching_key.to_string(), change_number);
    }

    pub fn load_count(&self, matching_key: &str) -> usize {
        lock(&self.loads).get(matching_key).copied().unwrap_or(0)
    }
}

impl SegmentsStorage for MockSegmentsStorage {
    fn load_local(&self, matching_key: &str) -> SyncResult<()> {
        *lock(&self.loads).entry(matching_key.to_string()).or_insert(0) += 1;
        Ok(())
    }

    fn get_all(&self, _matching_key: &str) -> HashSet<String> {
        HashSet::new()
    }

    fn change_number(&self, matching_key: &str) -> i64 {
        lock(&self.change_numbers)
            .get(matching_key)
            .copied()
            .unwrap_or(-1)
    }

    fn clear(&self, matching_key: &str) -> SyncResult<()> {
        lock(&self.change_numbers).remove(matching_key);
        Ok(())
    }
}

#[derive(Default)]
pub struct MockAttributesStorage {
    loads: AtomicUsize,
    destroyed: Mutex<Vec<String>>,
}

impl MockAttributesStorage {
    pub fn load_count(&self) -> usize {
        read(&self.loads)
    }

    pub fn destroyed(&self) -> Vec<String> {
        lock(&self.destroyed).clone()
    }
}

impl AttributesStorage for MockAttributesStorage {
    fn load_local(&self, _matching_key: &str) -> SyncResult<()> {
        bump(&self.loads);
        Ok(())
    }

    fn get_all(&self, _matching_key: &str) -> HashMap<String, serde_json::Value> {
        HashMap::new()
    }

    fn destroy(&self, matching_key: &str) {
        lock(&self.destroyed).push(matching_key.to_string());
    }
}

pub struct MockQueueStorage<T> {
    items: Mutex<Vec<T>>,
    fail: bool,
    persistence: AtomicBool,
}

impl<T> Default for MockQueueStorage<T> {
    fn default() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            fail: false,
            persistence: AtomicBool::new(false),
        }
    }
}

impl<T: Clone> MockQueueStorage<T> {
    /// Storage whose every push fails
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn items(&self) -> Vec<T> {
        lock(&self.items).clone()
    }

    pub fn persistence_enabled(&self) -> bool {
        self.persistence.load(Ordering::SeqCst)
    }
}

impl<T: Send> QueueStorage<T> for MockQueueStorage<T> {
    fn push(&self, item: T) -> SyncResult<()> {
        if self.fail {
            return Err(SyncError::Storage("queue unavailable".to_string()));
        }
        lock(&self.items).push(item);
        Ok(())
    }

    fn set_persistence(&self, enabled: bool) {
        self.persistence.store(enabled, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct MockCountStorage {
    saved: Mutex<Vec<ImpressionsCountPerFeature>>,
}

impl MockCountStorage {
    pub fn saved(&self) -> Vec<ImpressionsCountPerFeature> {
        lock(&self.saved).clone()
    }
}

impl ImpressionsCountStorage for MockCountStorage {
    fn push_many(&self, counts: Vec<ImpressionsCountPerFeature>) -> SyncResult<()> {
        lock(&self.saved).extend(counts);
        Ok(())
    }
}

#[derive(Default)]
pub struct MockHashedImpressionsStorage {
    saved: Mutex<Vec<HashedImpression>>,
}

impl MockHashedImpressionsStorage {
    pub fn saved(&self) -> Vec<HashedImpression> {
        lock(&self.saved).clone()
    }
}

impl HashedImpressionsStorage for MockHashedImpressionsStorage {
    fn get_all(&self) -> SyncResult<Vec<HashedImpression>> {
        Ok(self.saved())
    }

    fn update(&self, hashes: &[HashedImpression]) -> SyncResult<()> {
        *lock(&self.saved) = hashes.to_vec();
        Ok(())
    }
}

#[derive(Default)]
pub struct MockUniqueKeysTracker {
    tracked: Mutex<Vec<(String, String)>>,
    saves: AtomicUsize,
}

impl MockUniqueKeysTracker {
    pub fn tracked(&self) -> Vec<(String, String)> {
        lock(&self.tracked).clone()
    }

    pub fn save_count(&self) -> usize {
        read(&self.saves)
    }
}

impl UniqueKeysTracker for MockUniqueKeysTracker {
    fn track(&self, key: &str, feature: &str) {
        lock(&self.tracked).push((key.to_string(), feature.to_string()));
    }

    fn save_and_clear(&self) {
        bump(&self.saves);
    }
}

// Events and telemetry

#[derive(Default)]
pub struct MockEventsManager {
    received: Mutex<Vec<InternalEvent>>,
    stops: AtomicUsize,
    calls: Mutex<Vec<&'static str>>,
}

impl MockEventsManager {
    /// Lifecycle calls in the order received
    pub fn calls(&self) -> Vec<&'static str> {
        lock(&self.calls).clone()
    }

    fn log(&self, call: &'static str) {
        lock(&self.calls).push(call);
    }

    pub fn received(&self) -> Vec<InternalEvent> {
        lock(&self.received).clone()
    }

    pub fn stop_count(&self) -> usize {
        read(&self.stops)
    }
}

impl EventsManager for MockEventsManager {
    fn notify_internal_event(&self, event: InternalEvent) {
        lock(&self.received).push(event);
    }

    fn stop(&self) {
        bump(&self.stops);
        self.log("stop");
    }
}

#[derive(Default)]
pub struct MockTelemetry {
    impressions: Mutex<HashMap<ImpressionsDataKind, u64>>,
    events: Mutex<HashMap<EventsDataKind, u64>>,
    sync_mode: Mutex<Option<SyncMode>>,
    streaming_events: AtomicUsize,
}

impl MockTelemetry {
    pub fn impressions(&self, kind: ImpressionsDataKind) -> u64 {
        lock(&self.impressions).get(&kind).copied().unwrap_or(0)
    }

    pub fn events(&self, kind: EventsDataKind) -> u64 {
        lock(&self.events).get(&kind).copied().unwrap_or(0)
    }

    /// Last recorded transport
    pub fn sync_mode(&self) -> Option<SyncMode> {
        *lock(&self.sync_mode)
    }

    pub fn streaming_events(&self) -> usize {
        read(&self.streaming_events)
    }
}

impl TelemetryRecorder for MockTelemetry {
    fn record_impressions(&self, kind: ImpressionsDataKind, count: u64) {
        *lock(&self.impressions).entry(kind).or_insert(0) += count;
    }

    fn record_events(&self, kind: EventsDataKind, count: u64) {
        *lock(&self.events).entry(kind).or_insert(0) += count;
    }

    fn record_sync_mode(&self, mode: SyncMode) {
        *lock(&self.sync_mode) = Some(mode);
    }

    fn record_streaming_event(&self, _event: &SyncStatusEvent) {
        bump(&self.streaming_events);
    }
}

// Components

pub struct MockClientHandle {
    key: Key,
}

impl MockClientHandle {
    pub fn new(key: Key) -> Self {
        Self { key }
    }
}

impl ClientHandle for MockClientHandle {
    fn key(&self) -> &Key {
        &self.key
    }
}

#[derive(Default)]
pub struct MockSegmentsSynchronizer {
    loads: AtomicUsize,
    syncs: AtomicUsize,
    forced: Mutex<Vec<SegmentsChangeNumber>>,
    periodic_starts: AtomicUsize,
    periodic_stops: AtomicUsize,
    updated: AtomicUsize,
    large_updated: AtomicUsize,
    pauses: AtomicUsize,
    resumes: AtomicUsize,
    destroys: AtomicUsize,
    calls: Mutex<Vec<&'static str>>,
}

impl MockSegmentsSynchronizer {
    /// Lifecycle calls in the order received
    pub fn calls(&self) -> Vec<&'static str> {
        lock(&self.calls).clone()
    }

    fn log(&self, call: &'static str) {
        lock(&self.calls).push(call);
    }

    pub fn load_count(&self) -> usize {
        read(&self.loads)
    }

    pub fn sync_count(&self) -> usize {
        read(&self.syncs)
    }

    pub fn forced_targets(&self) -> Vec<SegmentsChangeNumber> {
        lock(&self.forced).clone()
    }

    pub fn periodic_start_count(&self) -> usize {
        read(&self.periodic_starts)
    }

    pub fn periodic_stop_count(&self) -> usize {
        read(&self.periodic_stops)
    }

    pub fn updated_count(&self) -> usize {
        read(&self.updated)
    }

    pub fn large_updated_count(&self) -> usize {
        read(&self.large_updated)
    }

    pub fn pause_count(&self) -> usize {
        read(&self.pauses)
    }

    pub fn resume_count(&self) -> usize {
        read(&self.resumes)
    }

    pub fn destroy_count(&self) -> usize {
        read(&self.destroys)
    }
}

impl MySegmentsSynchronizer for MockSegmentsSynchronizer {
    fn load_segments_from_cache(&self) {
        bump(&self.loads);
    }

    fn synchronize_segments(&self) {
        bump(&self.syncs);
    }

    fn force_segments_sync(&self, target: SegmentsChangeNumber, _delay: Duration) {
        lock(&self.forced).push(target);
    }

    fn start_periodic_fetching(&self) {
        bump(&self.periodic_starts);
    }

    fn stop_periodic_fetching(&self) {
        bump(&self.periodic_stops);
    }

    fn notify_segments_updated(&self) {
        bump(&self.updated);
    }

    fn notify_large_segments_updated(&self) {
        bump(&self.large_updated);
    }

    fn pause(&self) {
        bump(&self.pauses);
        self.log("pause");
    }

    fn resume(&self) {
        bump(&self.resumes);
        self.log("resume");
    }

    fn destroy(&self) {
        bump(&self.destroys);
        self.log("destroy");
    }
}

#[derive(Default)]
pub struct MockFlagsSynchronizer {
    loads: AtomicUsize,
    syncs: AtomicUsize,
    change_numbers: Mutex<Vec<i64>>,
    periodic_starts: AtomicUsize,
    periodic_stops: AtomicUsize,
    killed: Mutex<Vec<String>>,
    updated: AtomicUsize,
    pauses: AtomicUsize,
    resumes: AtomicUsize,
    stops: AtomicUsize,
    calls: Mutex<Vec<&'static str>>,
}

impl MockFlagsSynchronizer {
    /// Lifecycle calls in the order received
    pub fn calls(&self) -> Vec<&'static str> {
        lock(&self.calls).clone()
    }

    fn log(&self, call: &'static str) {
        lock(&self.calls).push(call);
    }

    pub fn load_count(&self) -> usize {
        read(&self.loads)
    }

    pub fn sync_count(&self) -> usize {
        read(&self.syncs)
    }

    pub fn change_numbers(&self) -> Vec<i64> {
        lock(&self.change_numbers).clone()
    }

    pub fn periodic_start_count(&self) -> usize {
        read(&self.periodic_starts)
    }

    pub fn periodic_stop_count(&self) -> usize {
        read(&self.periodic_stops)
    }

    pub fn killed(&self) -> Vec<String> {
        lock(&self.killed).clone()
    }

    pub fn updated_count(&self) -> usize {
        read(&self.updated)
    }

    pub fn pause_count(&self) -> usize {
        read(&self.pauses)
    }

    pub fn resume_count(&self) -> usize {
        read(&self.resumes)
    }

    pub fn stop_count(&self) -> usize {
        read(&self.stops)
    }
}

impl FeatureFlagsSynchronizer for MockFlagsSynchronizer {
    fn load(&self) {
        bump(&self.loads);
    }

    fn load_and_synchronize(&self) {
        bump(&self.loads);
        bump(&self.syncs);
    }

    fn synchronize(&self) {
        bump(&self.syncs);
    }

    fn synchronize_change_number(&self, change_number: i64) {
        lock(&self.change_numbers).push(change_number);
    }

    fn start_periodic_sync(&self) {
        bump(&self.periodic_starts);
    }

    fn stop_periodic_sync(&self) {
        bump(&self.periodic_stops);
    }

    fn notify_killed(&self, kill: FlagKill) {
        lock(&self.killed).push(kill.name);
    }

    fn notify_updated(&self) {
        bump(&self.updated);
    }

    fn pause(&self) {
        bump(&self.pauses);
        self.log("pause");
    }

    fn resume(&self) {
        bump(&self.resumes);
        self.log("resume");
    }

    fn stop(&self) {
        bump(&self.stops);
        self.log("stop");
    }
}

pub struct MockImpressionsTracker {
    starts: AtomicUsize,
    stops: AtomicUsize,
    pushed: AtomicUsize,
    flushes: AtomicUsize,
    pauses: AtomicUsize,
    resumes: AtomicUsize,
    destroys: AtomicUsize,
    tracking: AtomicBool,
    persistence: AtomicBool,
    calls: Mutex<Vec<&'static str>>,
}

impl Default for MockImpressionsTracker {
    fn default() -> Self {
        Self {
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            pushed: AtomicUsize::new(0),
            flushes: AtomicUsize::new(0),
            pauses: AtomicUsize::new(0),
            resumes: AtomicUsize::new(0),
            destroys: AtomicUsize::new(0),
            tracking: AtomicBool::new(true),
            persistence: AtomicBool::new(true),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl MockImpressionsTracker {
    /// Lifecycle calls in the order received
    pub fn calls(&self) -> Vec<&'static str> {
        lock(&self.calls).clone()
    }

    fn log(&self, call: &'static str) {
        lock(&self.calls).push(call);
    }

    pub fn start_count(&self) -> usize {
        read(&self.starts)
    }

    pub fn stop_count(&self) -> usize {
        read(&self.stops)
    }

    pub fn pushed(&self) -> usize {
        read(&self.pushed)
    }

    pub fn flush_count(&self) -> usize {
        read(&self.flushes)
    }

    pub fn pause_count(&self) -> usize {
        read(&self.pauses)
    }

    pub fn resume_count(&self) -> usize {
        read(&self.resumes)
    }

    pub fn destroy_count(&self) -> usize {
        read(&self.destroys)
    }

    pub fn is_persistence_enabled(&self) -> bool {
        self.persistence.load(Ordering::SeqCst)
    }
}

impl ImpressionsTracker for MockImpressionsTracker {
    fn start(&self) {
        bump(&self.starts);
        self.log("start");
    }

    fn stop(&self) {
        bump(&self.stops);
        self.log("stop");
    }

    fn push(&self, _impression: DecoratedImpression) {
        bump(&self.pushed);
    }

    fn pause(&self) {
        bump(&self.pauses);
        self.log("pause");
    }

    fn resume(&self) {
        bump(&self.resumes);
        self.log("resume");
    }

    fn flush(&self) {
        bump(&self.flushes);
    }

    fn destroy(&self) {
        bump(&self.destroys);
        self.log("destroy");
    }

    fn enable_tracking(&self, enable: bool) {
        self.tracking.store(enable, Ordering::SeqCst);
    }

    fn enable_persistence(&self, enable: bool) {
        self.persistence.store(enable, Ordering::SeqCst);
    }

    fn is_tracking_enabled(&self) -> bool {
        self.tracking.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct MockEventsSynchronizer {
    starts: AtomicUsize,
    stops: AtomicUsize,
    pushed: AtomicUsize,
    flushes: AtomicUsize,
    pauses: AtomicUsize,
    resumes: AtomicUsize,
    destroys: AtomicUsize,
    calls: Mutex<Vec<&'static str>>,
}

impl MockEventsSynchronizer {
    /// Lifecycle calls in the order received
    pub fn calls(&self) -> Vec<&'static str> {
        lock(&self.calls).clone()
    }

    fn log(&self, call: &'static str) {
        lock(&self.calls).push(call);
    }

    pub fn start_count(&self) -> usize {
        read(&self.starts)
    }

    pub fn stop_count(&self) -> usize {
        read(&self.stops)
    }

    pub fn pushed(&self) -> usize {
        read(&self.pushed)
    }

    pub fn flush_count(&self) -> usize {
        read(&self.flushes)
    }

    pub fn pause_count(&self) -> usize {
        read(&self.pauses)
    }

    pub fn resume_count(&self) -> usize {
        read(&self.resumes)
    }

    pub fn destroy_count(&self) -> usize {
        read(&self.destroys)
    }
}

impl EventsSynchronizer for MockEventsSynchronizer {
    fn start(&self) {
        bump(&self.starts);
        self.log("start");
    }

    fn stop(&self) {
        bump(&self.stops);
        self.log("stop");
    }

    fn push(&self, _event: EventDto) {
        bump(&self.pushed);
    }

    fn flush(&self) {
        bump(&self.flushes);
    }

    fn pause(&self) {
        bump(&self.pauses);
        self.log("pause");
    }

    fn resume(&self) {
        bump(&self.resumes);
        self.log("resume");
    }

    fn destroy(&self) {
        bump(&self.destroys);
        self.log("destroy");
    }
}

/// Facade double for the sync manager tests
pub struct MockSynchronizer {
    consent: Mutex<UserConsent>,
    load_flags: AtomicUsize,
    load_segments: AtomicUsize,
    load_attributes: AtomicUsize,
    sync_all: AtomicUsize,
    start_periodic: AtomicUsize,
    stop_periodic: AtomicUsize,
    start_recording: AtomicUsize,
    stop_recording: AtomicUsize,
    pauses: AtomicUsize,
    resumes: AtomicUsize,
    destroys: AtomicUsize,
    calls: Mutex<Vec<&'static str>>,
}

impl MockSynchronizer {
    /// Lifecycle calls in the order received
    pub fn calls(&self) -> Vec<&'static str> {
        lock(&self.calls).clone()
    }

    fn log(&self, call: &'static str) {
        lock(&self.calls).push(call);
    }

    pub fn new(consent: UserConsent) -> Self {
        Self {
            consent: Mutex::new(consent),
            load_flags: AtomicUsize::new(0),
            load_segments: AtomicUsize::new(0),
            load_attributes: AtomicUsize::new(0),
            sync_all: AtomicUsize::new(0),
            start_periodic: AtomicUsize::new(0),
            stop_periodic: AtomicUsize::new(0),
            start_recording: AtomicUsize::new(0),
            stop_recording: AtomicUsize::new(0),
            pauses: AtomicUsize::new(0),
            resumes: AtomicUsize::new(0),
            destroys: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn load_flags_count(&self) -> usize {
        read(&self.load_flags)
    }

    pub fn load_segments_count(&self) -> usize {
        read(&self.load_segments)
    }

    pub fn load_attributes_count(&self) -> usize {
        read(&self.load_attributes)
    }

    pub fn sync_all_count(&self) -> usize {
        read(&self.sync_all)
    }

    pub fn start_periodic_count(&self) -> usize {
        read(&self.start_periodic)
    }

    pub fn stop_periodic_count(&self) -> usize {
        read(&self.stop_periodic)
    }

    pub fn start_recording_count(&self) -> usize {
        read(&self.start_recording)
    }

    pub fn stop_recording_count(&self) -> usize {
        read(&self.stop_recording)
    }

    pub fn pause_count(&self) -> usize {
        read(&self.pauses)
    }

    pub fn resume_count(&self) -> usize {
        read(&self.resumes)
    }

    pub fn destroy_count(&self) -> usize {
        read(&self.destroys)
    }
}

impl Synchronizer for MockSynchronizer {
    fn load_flags_from_cache(&self) {
        bump(&self.load_flags);
    }

    fn load_and_synchronize_flags(&self) {
        bump(&self.load_flags);
    }

    fn load_segments_from_cache(&self, _matching_key: Option<&str>) {
        bump(&self.load_segments);
    }

    fn load_attributes_from_cache(&self, _matching_key: Option<&str>) {
        bump(&self.load_attributes);
    }

    fn start_by_key(&self, _key: &Key) {}

    fn sync_all(&self) {
        bump(&self.sync_all);
    }

    fn synchronize_flags(&self) {}

    fn synchronize_flags_change_number(&self, _change_number: i64) {}

    fn synchronize_segments(&self, _matching_key: Option<&str>) {}

    fn force_segments_sync(
        &self,
        _matching_key: Option<&str>,
        _target: SegmentsChangeNumber,
        _delay: Duration,
    ) {
    }

    fn start_periodic_fetching(&self) {
        bump(&self.start_periodic);
    }

    fn stop_periodic_fetching(&self) {
        bump(&self.stop_periodic);
    }

    fn start_recording_user_data(&self) {
        bump(&self.start_recording);
    }

    fn stop_recording_user_data(&self) {
        bump(&self.stop_recording);
    }

    fn set_user_consent(&self, consent: UserConsent) {
        *lock(&self.consent) = consent;
    }

    fn user_consent(&self) -> UserConsent {
        *lock(&self.consent)
    }

    fn push_impression(&self, _impression: DecoratedImpression) {}

    fn push_event(&self, _event: EventDto) {}

    fn notify_segments_updated(&self, _matching_key: Option<&str>) {}

    fn notify_large_segments_updated(&self, _matching_key: Option<&str>) {}

    fn notify_flags_updated(&self) {}

    fn notify_flag_killed(&self, _kill: FlagKill) {}

    fn pause(&self) {
        bump(&self.pauses);
        self.log("pause");
    }

    fn resume(&self) {
        bump(&self.resumes);
        self.log("resume");
    }

    fn flush(&self) {}

    fn destroy(&self) {
        bump(&self.destroys);
        self.log("destroy");
    }
}

#[derive(Default)]
pub struct MockPushManager {
    starts: AtomicUsize,
    pauses: AtomicUsize,
    resumes: AtomicUsize,
    stops: AtomicUsize,
    disconnects: AtomicUsize,
    calls: Mutex<Vec<&'static str>>,
}

impl MockPushManager {
    /// Lifecycle calls in the order received
    pub fn calls(&self) -> Vec<&'static str> {
        lock(&self.calls).clone()
    }

    fn log(&self, call: &'static str) {
        lock(&self.calls).push(call);
    }

    pub fn start_count(&self) -> usize {
        read(&self.starts)
    }

    pub fn pause_count(&self) -> usize {
        read(&self.pauses)
    }

    pub fn resume_count(&self) -> usize {
        read(&self.resumes)
    }

    pub fn stop_count(&self) -> usize {
        read(&self.stops)
    }

    pub fn disconnect_count(&self) -> usize {
        read(&self.disconnects)
    }
}

impl PushNotificationManager for MockPushManager {
    fn start(&self) {
        bump(&self.starts);
        self.log("start");
    }

    fn pause(&self) {
        bump(&self.pauses);
        self.log("pause");
    }

    fn resume(&self) {
        bump(&self.resumes);
        self.log("resume");
    }

    fn stop(&self) {
        bump(&self.stops);
        self.log("stop");
    }

    fn disconnect(&self) {
        bump(&self.disconnects);
    }
}
