//! Recently seen impressions, for deduplication
//!
//! - Fixed capacity with oldest-inserted-first eviction
//! - Entries keyed by a SHA-256 derived hash of the impression identity
//! - Optional persistence of the hashes across restarts

use crate::models::KeyImpression;
use crate::storage::{HashedImpression, HashedImpressionsStorage};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Hash of (key, feature, treatment, label, change number, properties)
pub fn hash_impression(impression: &KeyImpression) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(impression.key_name.as_bytes());
    hasher.update(b":");
    hasher.update(impression.feature_name.as_bytes());
    hasher.update(b":");
    hasher.update(impression.treatment.as_bytes());
    hasher.update(b":");
    hasher.update(impression.label.as_deref().unwrap_or_default().as_bytes());
    hasher.update(b":");
    hasher.update(impression.change_number.unwrap_or_default().to_be_bytes());
    hasher.update(b":");
    hasher.update(impression.properties.as_deref().unwrap_or_default().as_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    time: i64,
    seq: u64,
}

/// Insertion-ordered bounded map
///
/// `order` may hold stale positions for re-inserted hashes; a position is
/// live only while its sequence number matches the map entry.
#[derive(Debug)]
struct ObserverCache {
    capacity: usize,
    entries: HashMap<u64, Slot>,
    order: VecDeque<(u64, u64)>,
    next_seq: u64,
}

impl ObserverCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            next_seq: 0,
        }
    }

    fn test_and_set(&mut self, hash: u64, time: i64) -> Option<i64> {
        let seq = self.next_seq;
        self.next_seq += 1;

        let previous = self.entries.insert(hash, Slot { time, seq }).map(|slot| slot.time);
        self.order.push_back((hash, seq));
        self.evict();
        self.compact();
        previous
    }

    fn is_live(&self, hash: u64, seq: u64) -> bool {
        self.entries.get(&hash).map(|slot| slot.seq) == Some(seq)
    }

    fn evict(&mut self) {
        while self.entries.len() > self.capacity {
            match self.order.pop_front() {
                Some((hash, seq)) => {
                    if self.is_live(hash, seq) {
                        self.entries.remove(&hash);
                    }
                }
                None => break,
            }
        }
    }

    fn compact(&mut self) {
        if self.order.len() > self.capacity * 2 {
            let entries = &self.entries;
            self.order
                .retain(|(hash, seq)| entries.get(hash).map(|slot| slot.seq) == Some(*seq));
        }
    }

    fn snapshot(&self) -> Vec<HashedImpression> {
        self.order
            .iter()
            .filter(|(hash, seq)| self.is_live(*hash, *seq))
            .filter_map(|(hash, _)| {
                self.entries.get(hash).map(|slot| HashedImpression {
                    hash: *hash,
                    time: slot.time,
                })
            })
            .collect()
    }
}

/// Answers "seen before, and when" for impressions
pub struct ImpressionsObserver {
    cache: Mutex<ObserverCache>,
    storage: Option<Arc<dyn HashedImpressionsStorage>>,
}

impl ImpressionsObserver {
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: Mutex::new(ObserverCache::new(capacity.max(1))),
            storage: None,
        }
    }

    /// Observer seeded with persisted hashes, oldest first
    pub fn with_storage(capacity: usize, storage: Arc<dyn HashedImpressionsStorage>) -> Self {
        let mut cache = ObserverCache::new(capacity.max(1));
        match storage.get_all() {
            Ok(hashes) => {
                debug!(count = hashes.len(), "Loaded persisted impression hashes");
                for hashed in hashes {
                    cache.test_and_set(hashed.hash, hashed.time);
                }
            }
            Err(e) => warn!(error = %e, "Failed to load persisted impression hashes"),
        }

        Self {
            cache: Mutex::new(cache),
            storage: Some(storage),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ObserverCache> {
        match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Store the impression time and return the previously stored one
    pub fn test_and_set(&self, impression: &KeyImpression) -> Option<i64> {
        let hash = hash_impression(impression);
        self.lock().test_and_set(hash, impression.time)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Persist current hashes, if a storage was provided
    pub fn save_hashes(&self) {
        let Some(storage) = &self.storage else {
            return;
        };
        let snapshot = self.lock().snapshot();
        if let Err(e) = storage.update(&snapshot) {
            warn!(error = %e, "Failed to persist impression hashes");
        }
    }
}
