//! Normalized result type for capability invocations.
//!
//! Every external call (capability invocation, rate-limit acquisition,
//! cache lookup, sub-task execution) resolves to an [`Outcome`] carrying
//! either a payload or a classified failure. Failure handling is a data
//! contract threaded through every layer, not a control-flow side effect.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Error taxonomy for classified failures.
///
/// The retry layer consults [`ErrorKind::is_retryable`] to decide whether
/// another attempt is worthwhile; terminal task states preserve the kind
/// for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network timeout or 5xx from an external system.
    TransientExternal,
    /// Rejected by the rate limiter; retryable after the wait hint.
    RateLimited,
    /// Malformed task or unknown capability; retrying cannot help.
    PermanentInput,
    /// The planner produced an invalid dependency graph.
    Decomposition,
    /// 4xx other than rate-limit from an external system.
    PermanentExternal,
}

impl ErrorKind {
    /// Whether a failure of this kind is worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::TransientExternal | ErrorKind::RateLimited)
    }

    /// Classify an external system's HTTP status code.
    ///
    /// 5xx and anything unrecognized are treated as transient; 429 maps to
    /// the rate-limited kind; remaining 4xx are permanent.
    pub fn from_http_status(status: u16) -> Self {
        match status {
            429 => ErrorKind::RateLimited,
            s if s >= 500 => ErrorKind::TransientExternal,
            s if s >= 400 => ErrorKind::PermanentExternal,
            _ => ErrorKind::TransientExternal,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::TransientExternal => "transient_external",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::PermanentInput => "permanent_input",
            ErrorKind::Decomposition => "decomposition",
            ErrorKind::PermanentExternal => "permanent_external",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The normalized result of any capability invocation.
///
/// Serializable because successful outcomes are what the response cache
/// stores. Failures carry their classified kind and, for rate-limit
/// rejections, a hint for how long to wait before trying again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum Outcome {
    Success {
        payload: Value,
    },
    Failure {
        kind: ErrorKind,
        detail: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        wait_hint_ms: Option<u64>,
    },
}

impl Outcome {
    pub fn success(payload: Value) -> Self {
        Outcome::Success { payload }
    }

    pub fn failure(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Outcome::Failure {
            kind,
            detail: detail.into(),
            wait_hint_ms: None,
        }
    }

    /// A rate-limit rejection with its wait hint attached.
    pub fn rate_limited(detail: impl Into<String>, wait_hint: Duration) -> Self {
        Outcome::Failure {
            kind: ErrorKind::RateLimited,
            detail: detail.into(),
            wait_hint_ms: Some(wait_hint.as_millis() as u64),
        }
    }

    /// Convert an infrastructure error into a classified failure outcome.
    pub fn from_error(err: &crate::error::Error) -> Self {
        Outcome::failure(err.classify(), err.to_string())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    pub fn is_failure(&self) -> bool {
        !self.is_success()
    }

    pub fn payload(&self) -> Option<&Value> {
        match self {
            Outcome::Success { payload } => Some(payload),
            Outcome::Failure { .. } => None,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Outcome::Success { .. } => None,
            Outcome::Failure { kind, .. } => Some(*kind),
        }
    }

    pub fn error_detail(&self) -> Option<&str> {
        match self {
            Outcome::Success { .. } => None,
            Outcome::Failure { detail, .. } => Some(detail),
        }
    }

    pub fn wait_hint(&self) -> Option<Duration> {
        match self {
            Outcome::Failure {
                wait_hint_ms: Some(ms),
                ..
            } => Some(Duration::from_millis(*ms)),
            _ => None,
        }
    }

    /// Whether the retry layer should attempt this operation again.
    pub fn is_retryable(&self) -> bool {
        self.error_kind().map(|k| k.is_retryable()).unwrap_or(false)
    }

    /// Label value for metric samples ("ok" or "error").
    pub fn label(&self) -> &'static str {
        if self.is_success() {
            "ok"
        } else {
            "error"
        }
    }
}
