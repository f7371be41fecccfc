//! Pluggable key-value store with TTL semantics.
//!
//! The cache, rate limiter, and embedding cache all sit on this trait so
//! the backing store can be swapped without touching the layers above.
//! [`MemoryStore`] is the in-process default; a networked backend only
//! has to implement the same six operations.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// Backend-agnostic storage operations.
///
/// All TTLs are optional: `None` means the key never expires. Expired
/// keys behave exactly like absent keys from the caller's perspective.
#[async_trait]
pub trait Store: Send + Sync {
    /// Fetch a value, or `None` if the key is absent or expired.
    async fn get(&self, key: &str) -> crate::error::Result<Option<Value>>;

    /// Store a value, replacing any existing entry and its TTL.
    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> crate::error::Result<()>;

    /// Remaining lifetime of a key, or `None` if absent or non-expiring.
    async fn ttl(&self, key: &str) -> crate::error::Result<Option<Duration>>;

    /// Atomically increment a counter, setting it to expire `window` from
    /// the first increment. Returns the post-increment count.
    ///
    /// The expiry is pinned at window start so the whole window shares one
    /// deadline.
    async fn incr_with_expiry(&self, key: &str, window: Duration) -> crate::error::Result<u64>;

    /// Delete a key. Returns whether a live entry was removed.
    async fn delete(&self, key: &str) -> crate::error::Result<bool>;

    /// Delete every key starting with `prefix`. Returns how many were
    /// removed.
    async fn delete_prefix(&self, prefix: &str) -> crate::error::Result<u64>;
}
