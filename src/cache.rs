//! Response cache for capability invocations.
//!
//! Keys are derived from the operation name plus a digest of its
//! arguments, so identical requests within the TTL are served without
//! touching the external system. Only successful outcomes are stored;
//! failures always re-execute.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::core::outcome::Outcome;
use crate::store::Store;

const KEY_PREFIX: &str = "cache:";

/// Hex digest of a serialized JSON value, truncated for key brevity.
///
/// `serde_json::Map` keeps keys in sorted order, so semantically equal
/// argument objects serialize identically and hash to the same key.
pub(crate) fn digest_hex(value: &Value) -> String {
    let serialized = value.to_string();
    let digest = Sha256::digest(serialized.as_bytes());
    let mut hex = String::with_capacity(32);
    for byte in &digest[..16] {
        hex.push_str(&format!("{:02x}", byte));
    }
    hex
}

/// Build the store key for an operation and its arguments.
pub fn cache_key(operation: &str, args: &Value) -> String {
    format!("{}{}:{}", KEY_PREFIX, operation, digest_hex(args))
}

/// Read-through cache over a [`Store`].
#[derive(Clone)]
pub struct ResponseCache {
    store: Arc<dyn Store>,
    default_ttl: Duration,
    enabled: bool,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn Store>, default_ttl: Duration, enabled: bool) -> Self {
        Self {
            store,
            default_ttl,
            enabled,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Return the cached outcome for `key`, or run `compute` and store the
    /// result if it succeeded.
    ///
    /// Store failures are logged and swallowed: a broken cache degrades to
    /// always-compute rather than failing the task.
    pub async fn get_or_compute<F, Fut>(&self, key: &str, ttl: Option<Duration>, compute: F) -> Outcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Outcome>,
    {
        if !self.enabled {
            return compute().await;
        }

        match self.store.get(key).await {
            Ok(Some(stored)) => match serde_json::from_value::<Outcome>(stored) {
                Ok(outcome) => {
                    debug!(key, "cache hit");
                    return outcome;
                }
                Err(err) => {
                    warn!(key, %err, "discarding undecodable cache entry");
                    let _ = self.store.delete(key).await;
                }
            },
            Ok(None) => {}
            Err(err) => {
                warn!(key, %err, "cache read failed, computing");
            }
        }

        let outcome = compute().await;
        if outcome.is_success() {
            let ttl = ttl.unwrap_or(self.default_ttl);
            match serde_json::to_value(&outcome) {
                Ok(value) => {
                    if let Err(err) = self.store.set(key, value, Some(ttl)).await {
                        warn!(key, %err, "cache write failed");
                    }
                }
                Err(err) => warn!(key, %err, "cache serialization failed"),
            }
        }
        outcome
    }

    /// Drop every cached entry whose operation name starts with `prefix`.
    pub async fn invalidate_prefix(&self, prefix: &str) -> crate::error::Result<u64> {
        let removed = self
            .store
            .delete_prefix(&format!("{}{}", KEY_PREFIX, prefix))
            .await?;
        debug!(prefix, removed, "cache invalidated");
        Ok(removed)
    }
}
