//! Retry with exponential backoff and jitter.
//!
//! The policy retries only outcomes whose error kind is retryable.
//! Rate-limit rejections carry their own wait hint, which overrides the
//! computed backoff when it is longer.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::core::outcome::Outcome;
use crate::error::{Error, Result};

/// Exponential backoff retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first. Always at least 1.
    pub max_attempts: u32,
    /// Base delay; doubled on each retry.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Validation(
                "retry policy needs at least one attempt".to_string(),
            ));
        }
        Ok(())
    }

    /// Delay before retry number `attempt` (zero-based count of completed
    /// attempts): `base * 2^attempt` plus jitter in `[0, base)`. A longer
    /// wait hint from the failed outcome takes precedence.
    fn backoff_delay(&self, attempt: u32, wait_hint: Option<Duration>) -> Duration {
        // Cap the shift so large attempt counts cannot overflow.
        let exp = attempt.min(16);
        let backoff = self.base_delay.saturating_mul(1u32 << exp);
        let jitter = if self.base_delay.is_zero() {
            Duration::ZERO
        } else {
            let jitter_ms = rand::thread_rng().gen_range(0..self.base_delay.as_millis().max(1));
            Duration::from_millis(jitter_ms as u64)
        };
        let computed = backoff.saturating_add(jitter);
        match wait_hint {
            Some(hint) if hint > computed => hint,
            _ => computed,
        }
    }

    /// Run `op` until it succeeds, fails non-retryably, or the attempt
    /// budget runs out. The closure receives the zero-based attempt index.
    ///
    /// The final outcome preserves the last failure's kind and detail, so
    /// exhaustion surfaces the underlying error rather than a generic one.
    pub async fn run<F, Fut>(&self, mut op: F) -> Outcome
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Outcome>,
    {
        let attempts = self.max_attempts.max(1);
        let mut last = None;

        for attempt in 0..attempts {
            let outcome = op(attempt).await;
            if outcome.is_success() || !outcome.is_retryable() {
                return outcome;
            }

            if attempt + 1 < attempts {
                let delay = self.backoff_delay(attempt, outcome.wait_hint());
                debug!(
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "retrying after failure"
                );
                tokio::time::sleep(delay).await;
            }
            last = Some(outcome);
        }

        // attempts >= 1, so at least one outcome was recorded.
        last.unwrap_or_else(|| {
            Outcome::failure(
                crate::core::outcome::ErrorKind::TransientExternal,
                "retry budget exhausted",
            )
        })
    }
}
