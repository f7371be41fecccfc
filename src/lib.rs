//! foreman: a task-routing and execution runtime.
//!
//! Natural-language task descriptions are routed to registered
//! capabilities by embedding similarity, then executed through a shared
//! resilience pipeline of response caching, retry with backoff, and
//! fixed-window rate limiting. Complex tasks decompose into dependency
//! DAGs that run with bounded concurrency and settle into per-node
//! outcomes.
//!
//! The [`orchestration::Orchestrator`] is the entry point; everything
//! else is a layer it composes.

pub mod cache;
pub mod config;
pub mod core;
pub mod error;
pub mod metrics;
pub mod orchestration;
pub mod ratelimit;
pub mod retry;
pub mod routing;
pub mod store;
pub mod telemetry;

pub use config::Config;
pub use core::{ErrorKind, Outcome, Task, TaskError, TaskId, TaskStatus};
pub use error::{Error, Result};
pub use metrics::MetricsCollector;
pub use orchestration::{Decomposer, Orchestrator, Plan, PlanNode, TaskEvent};
pub use ratelimit::{RateLimiter, RateProfile};
pub use retry::RetryPolicy;
pub use routing::{Capability, CapabilityInvoker, CapabilityRouter, EmbeddingCache, EmbeddingProvider};
pub use store::{MemoryStore, Store};
