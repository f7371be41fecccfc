//! Fixed-window rate limiting backed by the store.
//!
//! Each resource key gets an atomic counter that expires at the end of
//! its window. A request is granted while the count stays within the
//! profile's limit plus burst allowance; rejections carry the remaining
//! window as a wait hint.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::error::{Error, Result};
use crate::store::Store;

const KEY_PREFIX: &str = "ratelimit:";

/// Per-resource rate limit parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateProfile {
    /// Steady-state requests allowed per window.
    pub limit: u64,
    /// Window length in seconds.
    pub window_secs: u64,
    /// Extra requests tolerated beyond the limit within one window.
    pub burst: u64,
}

impl Default for RateProfile {
    fn default() -> Self {
        Self {
            limit: 60,
            window_secs: 60,
            burst: 10,
        }
    }
}

impl RateProfile {
    pub fn new(limit: u64, window_secs: u64, burst: u64) -> Self {
        Self {
            limit,
            window_secs,
            burst,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Total grants allowed within one window.
    pub fn capacity(&self) -> u64 {
        self.limit + self.burst
    }

    pub fn validate(&self) -> Result<()> {
        if self.limit == 0 {
            return Err(Error::Validation("rate profile limit must be positive".to_string()));
        }
        if self.window_secs == 0 {
            return Err(Error::Validation(
                "rate profile window must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// The limiter's answer for one acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub granted: bool,
    /// Remaining window time; how long a rejected caller should wait.
    pub wait_hint: Duration,
    /// Post-increment count within the current window.
    pub count: u64,
}

/// Fixed-window limiter over a shared [`Store`].
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn Store>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Count one request against `resource` and decide whether it may
    /// proceed under `profile`.
    pub async fn acquire(&self, resource: &str, profile: &RateProfile) -> Result<RateDecision> {
        let key = format!("{}{}", KEY_PREFIX, resource);
        let count = self.store.incr_with_expiry(&key, profile.window()).await?;
        let granted = count <= profile.capacity();

        let wait_hint = if granted {
            Duration::ZERO
        } else {
            self.store
                .ttl(&key)
                .await?
                .unwrap_or_else(|| profile.window())
        };

        if !granted {
            debug!(resource, count, capacity = profile.capacity(), "rate limit exceeded");
        }
        Ok(RateDecision {
            granted,
            wait_hint,
            count,
        })
    }
}
