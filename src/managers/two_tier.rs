//! Composition of a fast bounded tier over a persistent backing tier.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::{CacheError, Result};
use crate::managers::CacheManager;

/// A [`CacheManager`] layering a fast bounded primary tier (typically a
/// [`TwoQueueManager`]) over a larger, usually persistent secondary tier.
///
/// Reads prefer the primary; a secondary hit is promoted into the
/// primary on the way out. Writes go to the secondary and then remove
/// the primary copy, so a reader can never be handed a primary value
/// older than a completed write; the next read re-promotes the fresh
/// value. The primary is only a hint.
///
/// [`TwoQueueManager`]: crate::TwoQueueManager
pub struct TwoTierManager {
    primary: Arc<dyn CacheManager>,
    secondary: Arc<dyn CacheManager>,
}

impl TwoTierManager {
    /// Composes `primary` and `secondary`. The two tiers must be
    /// distinct objects.
    pub fn new(
        primary: Arc<dyn CacheManager>,
        secondary: Arc<dyn CacheManager>,
    ) -> Result<Self> {
        if Arc::ptr_eq(&primary, &secondary) {
            return Err(CacheError::Configuration(
                "primary and secondary tiers must be distinct",
            ));
        }
        Ok(TwoTierManager { primary, secondary })
    }
}

impl CacheManager for TwoTierManager {
    fn get(&self, key: &str) -> Result<Option<Bytes>> {
        match self.primary.get(key) {
            Ok(Some(value)) => return Ok(Some(value)),
            Ok(None) => {}
            Err(err) => {
                log::warn!("primary tier read failed for {key}: {err}");
            }
        }
        let Some(value) = self.secondary.get(key)? else {
            return Ok(None);
        };
        if let Err(err) = self.primary.put(key, value.clone()) {
            log::warn!("primary tier promotion failed for {key}: {err}");
        }
        Ok(Some(value))
    }

    fn put(&self, key: &str, value: Bytes) -> Result<()> {
        let written = self.secondary.put(key, value);
        // Invalidate the primary even when the write failed, so a stale
        // primary copy cannot outlive whatever the secondary now holds.
        if let Err(err) = self.primary.delete(key) {
            log::warn!("primary tier invalidation failed for {key}: {err}");
        }
        written
    }

    fn delete(&self, key: &str) -> Result<()> {
        let secondary = self.secondary.delete(key);
        let primary = self.primary.delete(key);
        secondary.and(primary)
    }
}

impl fmt::Debug for TwoTierManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TwoTierManager").finish_non_exhaustive()
    }
}
