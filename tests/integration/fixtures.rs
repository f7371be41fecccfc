//! Shared test doubles and harness setup.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};

use foreman::core::ErrorKind;
use foreman::orchestration::{Decomposer, Orchestrator, Plan, TaskEvent};
use foreman::routing::{Capability, CapabilityInvoker, CapabilityRouter, EmbeddingCache, EmbeddingProvider};
use foreman::store::{MemoryStore, Store};
use foreman::{Config, MetricsCollector, Outcome, Result};

/// Deterministic embedder: each vocabulary word is one axis, so
/// descriptions sharing a word score 1.0 against that capability and
/// 0.0 against the rest.
pub struct AxisEmbedder {
    calls: Arc<AtomicUsize>,
}

const VOCAB: [&str; 5] = ["build", "log", "pipeline", "plugin", "user"];

#[async_trait]
impl EmbeddingProvider for AxisEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let lower = text.to_lowercase();
        let mut vector = vec![0.0f32; VOCAB.len()];
        for (i, word) in VOCAB.iter().enumerate() {
            if lower.contains(word) {
                vector[i] = 1.0;
            }
        }
        Ok(vector)
    }
}

/// What a [`ScriptedInvoker`] does on each call.
#[derive(Clone)]
pub enum Script {
    Succeed(Value),
    FailAlways(ErrorKind),
    /// Fail the first `failures` calls, then succeed.
    FailThenSucceed { failures: usize, payload: Value },
    /// Block on the semaphore before succeeding.
    Gated(Arc<Semaphore>),
}

pub struct ScriptedInvoker {
    script: Script,
    pub calls: Arc<AtomicUsize>,
}

impl ScriptedInvoker {
    pub fn new(script: Script) -> (Arc<Self>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Arc::new(Self {
                script,
                calls: calls.clone(),
            }),
            calls,
        )
    }
}

#[async_trait]
impl CapabilityInvoker for ScriptedInvoker {
    async fn invoke(&self, _description: &str, _context: &Value) -> Outcome {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            Script::Succeed(payload) => Outcome::success(payload.clone()),
            Script::FailAlways(kind) => Outcome::failure(*kind, "scripted failure"),
            Script::FailThenSucceed { failures, payload } => {
                if call < *failures {
                    Outcome::failure(ErrorKind::TransientExternal, "scripted transient failure")
                } else {
                    Outcome::success(payload.clone())
                }
            }
            Script::Gated(gate) => match gate.acquire().await {
                Ok(permit) => {
                    permit.forget();
                    Outcome::success(json!({"gated": true}))
                }
                Err(_) => Outcome::failure(ErrorKind::TransientExternal, "gate closed"),
            },
        }
    }
}

/// Returns a fixed plan regardless of the description.
pub struct StaticDecomposer {
    plan: Plan,
}

impl StaticDecomposer {
    pub fn new(plan: Plan) -> Arc<Self> {
        Arc::new(Self { plan })
    }
}

#[async_trait]
impl Decomposer for StaticDecomposer {
    async fn decompose(&self, _description: &str, _context: &Value) -> Result<Plan> {
        Ok(self.plan.clone())
    }
}

pub struct Harness {
    pub orchestrator: Orchestrator,
    pub events: mpsc::Receiver<TaskEvent>,
    pub embed_calls: Arc<AtomicUsize>,
}

/// Config tuned so retries back off in milliseconds, not seconds.
pub fn fast_config() -> Config {
    let mut config = Config::default();
    config.retry.base_delay_ms = 1;
    config
}

/// Build an orchestrator over a fresh in-memory store with the given
/// capabilities registered in order.
pub async fn harness(
    config: Config,
    capabilities: Vec<(&str, &str, Arc<dyn CapabilityInvoker>)>,
    decomposer: Option<Arc<dyn Decomposer>>,
) -> Harness {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let embed_calls = Arc::new(AtomicUsize::new(0));
    let embeddings = EmbeddingCache::new(
        Arc::new(AxisEmbedder {
            calls: embed_calls.clone(),
        }),
        store.clone(),
        config.routing.embedding_ttl(),
    );

    let mut router =
        CapabilityRouter::new(embeddings, config.routing.threshold, config.routing.epsilon);
    for (name, description, invoker) in capabilities {
        router
            .register(Capability::new(name, description, invoker))
            .await
            .expect("capability registration");
    }

    let metrics = Arc::new(MetricsCollector::new(config.metrics.retention()));
    let (orchestrator, events) = Orchestrator::new(router, store, metrics, decomposer, config);
    Harness {
        orchestrator,
        events,
        embed_calls,
    }
}
