//! Unbounded concurrent in-memory store.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;

use crate::error::Result;
use crate::managers::CacheManager;

/// An unbounded [`CacheManager`] over a concurrent hash map.
///
/// This is the reference implementation of the backing-store contract;
/// it works as the secondary tier of a [`TwoTierManager`] when
/// persistence across restarts is not required.
///
/// [`TwoTierManager`]: crate::TwoTierManager
#[derive(Clone, Default)]
pub struct DashManager {
    cache: Arc<DashMap<String, Bytes>>,
}

impl DashManager {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears out the entire store.
    pub fn clear(&self) {
        self.cache.clear();
    }

    /// Number of entries currently stored.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

impl CacheManager for DashManager {
    fn get(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self.cache.get(key).map(|entry| entry.value().clone()))
    }

    fn put(&self, key: &str, value: Bytes) -> Result<()> {
        self.cache.insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.cache.remove(key);
        Ok(())
    }
}

impl fmt::Debug for DashManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DashManager")
            .field("entries", &self.cache.len())
            .finish_non_exhaustive()
    }
}
