//! Single-flight registry of in-flight targeted workers

use super::RetryableWorker;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::Arc;
use tracing::debug;

/// Map from a pending change-number target to the worker resolving it
///
/// Written by the thread that starts a catch-up and by the completion
/// callback that finishes it. At most one worker per target.
pub struct ChangeNumberCatalog<K> {
    workers: DashMap<K, Arc<dyn RetryableWorker>>,
}

impl<K> ChangeNumberCatalog<K>
where
    K: Eq + Hash + Clone + Display,
{
    pub fn new() -> Self {
        Self {
            workers: DashMap::new(),
        }
    }

    /// Insert `worker` unless one is already registered for `target`
    pub fn insert_if_absent(&self, target: K, worker: Arc<dyn RetryableWorker>) -> bool {
        match self.workers.entry(target) {
            Entry::Occupied(entry) => {
                debug!(target = %entry.key(), "Worker already in flight for target");
                false
            }
            Entry::Vacant(entry) => {
                entry.insert(worker);
                true
            }
        }
    }

    pub fn contains(&self, target: &K) -> bool {
        self.workers.contains_key(target)
    }

    pub fn remove(&self, target: &K) -> Option<Arc<dyn RetryableWorker>> {
        self.workers.remove(target).map(|(_, worker)| worker)
    }

    /// Remove and return every registered worker
    pub fn take_all(&self) -> Vec<Arc<dyn RetryableWorker>> {
        let targets: Vec<K> = self.workers.iter().map(|r| r.key().clone()).collect();
        targets
            .iter()
            .filter_map(|target| self.remove(target))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

impl<K> Default for ChangeNumberCatalog<K>
where
    K: Eq + Hash + Clone + Display,
{
    fn default() -> Self {
        Self::new()
    }
}
