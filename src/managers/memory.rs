//! Bounded in-memory cache with a 2Q admission policy.

use std::fmt;
use std::sync::{Mutex, MutexGuard};

use bytes::Bytes;
use lru::LruCache;

use crate::error::{CacheError, Result};
use crate::managers::CacheManager;

/// Fraction of the byte capacity reserved for entries seen once.
const DEFAULT_RECENT_RATIO: f64 = 0.30;
/// Fraction of the byte capacity reserved for entries hit again.
const DEFAULT_FREQUENT_RATIO: f64 = 0.60;

/// An in-memory [`CacheManager`] bounded by the total bytes of stored
/// values, suitable as the primary tier of a [`TwoTierManager`].
///
/// Admission follows a 2Q-style policy: first-time insertions land in a
/// small recent queue, and an entry hit again (read or rewritten) is
/// promoted to the larger frequent queue. Inserting into a full queue
/// evicts that queue's least-recently-used members until the entry fits;
/// an entry larger than its whole queue is not admitted. Scans therefore
/// churn only the recent queue and cannot flush the frequently used set.
///
/// [`TwoTierManager`]: crate::TwoTierManager
pub struct TwoQueueManager {
    queues: Mutex<Queues>,
}

struct Queues {
    recent: LruCache<String, Bytes>,
    frequent: LruCache<String, Bytes>,
    recent_bytes: usize,
    frequent_bytes: usize,
    recent_capacity: usize,
    frequent_capacity: usize,
}

impl TwoQueueManager {
    /// Creates a cache holding at most `capacity` bytes of values, split
    /// 30% recent / 60% frequent.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::build(capacity, DEFAULT_RECENT_RATIO, DEFAULT_FREQUENT_RATIO)
    }

    /// Creates a cache with custom queue ratios. Each ratio must lie in
    /// `(0, 1)` and their sum must not exceed 1.
    pub fn with_ratios(
        capacity: usize,
        recent_ratio: f64,
        frequent_ratio: f64,
    ) -> Result<Self> {
        if capacity == 0 {
            return Err(CacheError::Configuration("capacity must be non-zero"));
        }
        if !(recent_ratio > 0.0 && recent_ratio < 1.0)
            || !(frequent_ratio > 0.0 && frequent_ratio < 1.0)
            || recent_ratio + frequent_ratio > 1.0
        {
            return Err(CacheError::Configuration(
                "queue ratios must lie in (0, 1) and sum to at most 1",
            ));
        }
        Ok(Self::build(capacity, recent_ratio, frequent_ratio))
    }

    fn build(capacity: usize, recent_ratio: f64, frequent_ratio: f64) -> Self {
        TwoQueueManager {
            queues: Mutex::new(Queues {
                recent: LruCache::unbounded(),
                frequent: LruCache::unbounded(),
                recent_bytes: 0,
                frequent_bytes: 0,
                recent_capacity: (capacity as f64 * recent_ratio) as usize,
                frequent_capacity: (capacity as f64 * frequent_ratio) as usize,
            }),
        }
    }

    /// Bytes of values currently resident.
    pub fn size(&self) -> usize {
        let queues = self.lock();
        queues.recent_bytes + queues.frequent_bytes
    }

    /// Number of entries currently resident.
    pub fn len(&self) -> usize {
        let queues = self.lock();
        queues.recent.len() + queues.frequent.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Queues> {
        match self.queues.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Queues {
    fn remove(&mut self, key: &str) {
        if let Some(old) = self.recent.pop(key) {
            self.recent_bytes -= old.len();
        }
        if let Some(old) = self.frequent.pop(key) {
            self.frequent_bytes -= old.len();
        }
    }

    fn insert_recent(&mut self, key: String, value: Bytes) {
        if value.len() > self.recent_capacity {
            return;
        }
        while self.recent_bytes + value.len() > self.recent_capacity {
            match self.recent.pop_lru() {
                Some((_, evicted)) => self.recent_bytes -= evicted.len(),
                None => break,
            }
        }
        self.recent_bytes += value.len();
        self.recent.put(key, value);
    }

    fn insert_frequent(&mut self, key: String, value: Bytes) {
        if value.len() > self.frequent_capacity {
            return;
        }
        while self.frequent_bytes + value.len() > self.frequent_capacity {
            match self.frequent.pop_lru() {
                Some((_, evicted)) => self.frequent_bytes -= evicted.len(),
                None => break,
            }
        }
        self.frequent_bytes += value.len();
        self.frequent.put(key, value);
    }
}

impl CacheManager for TwoQueueManager {
    fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let mut queues = self.lock();
        if let Some(value) = queues.frequent.get(key) {
            return Ok(Some(value.clone()));
        }
        // A second hit promotes the entry out of the recent queue.
        if let Some(value) = queues.recent.pop(key) {
            queues.recent_bytes -= value.len();
            queues.insert_frequent(key.to_string(), value.clone());
            return Ok(Some(value));
        }
        Ok(None)
    }

    fn put(&self, key: &str, value: Bytes) -> Result<()> {
        let mut queues = self.lock();
        if queues.frequent.contains(key) {
            queues.remove(key);
            queues.insert_frequent(key.to_string(), value);
        } else if queues.recent.contains(key) {
            // Rewriting a once-seen entry counts as a re-hit.
            queues.remove(key);
            queues.insert_frequent(key.to_string(), value);
        } else {
            queues.insert_recent(key.to_string(), value);
        }
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.lock().remove(key);
        Ok(())
    }
}

impl fmt::Debug for TwoQueueManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let queues = self.lock();
        f.debug_struct("TwoQueueManager")
            .field("recent_bytes", &queues.recent_bytes)
            .field("recent_capacity", &queues.recent_capacity)
            .field("frequent_bytes", &queues.frequent_bytes)
            .field("frequent_capacity", &queues.frequent_capacity)
            .finish_non_exhaustive()
    }
}
