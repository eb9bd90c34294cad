//! Cache storage backends.
//!
//! Backends store opaque entry bytes against string keys and are
//! best-effort by contract: the transport maps a failed `get` to a miss
//! and swallows (and logs) failed `put`/`delete` calls. Implementations
//! must be safe for concurrent callers.

mod dash;
mod memory;
mod two_tier;

pub use dash::DashManager;
pub use memory::TwoQueueManager;
pub use two_tier::TwoTierManager;

use bytes::Bytes;

use crate::error::Result;

/// A backend used by the transport to store and retrieve serialized
/// responses.
pub trait CacheManager: Send + Sync {
    /// Returns the entry stored against `key`, if any.
    fn get(&self, key: &str) -> Result<Option<Bytes>>;
    /// Stores `value` against `key`, replacing any previous entry.
    fn put(&self, key: &str, value: Bytes) -> Result<()>;
    /// Removes the entry stored against `key`, if any.
    fn delete(&self, key: &str) -> Result<()>;
}
