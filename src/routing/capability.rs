//! Capability definitions.
//!
//! A capability is a named executor with a natural-language description
//! of what it handles. The description is what routing scores against,
//! so it should read like the tasks it expects ("trigger and monitor
//! builds, check build status and queue state").

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::core::outcome::Outcome;

/// Executes a task on behalf of the runtime.
///
/// Invokers never panic and never return a Result; every failure mode is
/// expressed as a classified failure [`Outcome`].
#[async_trait]
pub trait CapabilityInvoker: Send + Sync {
    async fn invoke(&self, description: &str, context: &Value) -> Outcome;
}

/// A registered capability: routing metadata plus its invoker.
#[derive(Clone)]
pub struct Capability {
    pub name: String,
    pub description: String,
    pub invoker: Arc<dyn CapabilityInvoker>,
}

impl Capability {
    pub fn new(name: &str, description: &str, invoker: Arc<dyn CapabilityInvoker>) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            invoker,
        }
    }
}

impl std::fmt::Debug for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capability")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}
