//! The runtime entry point.
//!
//! The orchestrator owns the routing, resilience, and execution layers
//! and exposes the task lifecycle: submit, observe, cancel, wait. Every
//! capability invocation flows through the same pipeline: cache lookup,
//! then retry around rate-limit acquisition and a timed invocation.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cache::{cache_key, ResponseCache};
use crate::config::Config;
use crate::core::outcome::{ErrorKind, Outcome};
use crate::core::task::{Task, TaskError, TaskId, TaskStatus};
use crate::error::{Error, Result};
use crate::metrics::{label_set, spawn_sweeper, MetricsCollector};
use crate::orchestration::decompose::{build_dag, Decomposer};
use crate::orchestration::executor::DagExecutor;
use crate::ratelimit::RateLimiter;
use crate::retry::RetryPolicy;
use crate::routing::CapabilityRouter;
use crate::store::Store;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Lifecycle notifications emitted as tasks progress.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    /// A simple task was routed to a capability.
    Routed { task_id: TaskId, capability: String },
    /// A complex task's plan validated into a DAG.
    Planned { task_id: TaskId, subtasks: usize },
    /// Execution began.
    Started { task_id: TaskId },
    /// The task reached a terminal status.
    Completed { task_id: TaskId, status: TaskStatus },
}

struct Inner {
    router: CapabilityRouter,
    limiter: RateLimiter,
    cache: ResponseCache,
    retry: RetryPolicy,
    metrics: Arc<MetricsCollector>,
    decomposer: Option<Arc<dyn Decomposer>>,
    config: Config,
    tasks: RwLock<HashMap<TaskId, Task>>,
    cancels: RwLock<HashMap<TaskId, CancellationToken>>,
    completion: Notify,
    event_tx: mpsc::Sender<TaskEvent>,
    // Stops the metrics retention sweeper when the runtime is dropped.
    shutdown: CancellationToken,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Task-routing and execution runtime.
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    /// Build the runtime from its configured layers.
    ///
    /// The router must already hold its capability registrations. Returns
    /// the orchestrator and the receiving end of its event stream.
    ///
    /// Starts the metrics retention sweeper; it runs until the last clone
    /// of the orchestrator is dropped. Must be called within a tokio
    /// runtime.
    pub fn new(
        router: CapabilityRouter,
        store: Arc<dyn Store>,
        metrics: Arc<MetricsCollector>,
        decomposer: Option<Arc<dyn Decomposer>>,
        config: Config,
    ) -> (Self, mpsc::Receiver<TaskEvent>) {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let cache = ResponseCache::new(
            store.clone(),
            config.cache.default_ttl(),
            config.cache.enabled,
        );
        let shutdown = CancellationToken::new();
        let _sweeper = spawn_sweeper(
            metrics.clone(),
            config.metrics.sweep_interval(),
            shutdown.child_token(),
        );
        let inner = Inner {
            router,
            limiter: RateLimiter::new(store),
            cache,
            retry: config.retry.policy(),
            metrics,
            decomposer,
            config,
            tasks: RwLock::new(HashMap::new()),
            cancels: RwLock::new(HashMap::new()),
            completion: Notify::new(),
            event_tx,
            shutdown,
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            event_rx,
        )
    }

    /// Submit a simple task: route to one capability and execute.
    pub async fn submit(&self, description: &str, context: Value) -> TaskId {
        let task = Task::new(description, context);
        let id = task.id;
        let cancel = CancellationToken::new();
        {
            self.inner.tasks.write().await.insert(id, task);
            self.inner.cancels.write().await.insert(id, cancel.clone());
        }
        info!(task = %id.short(), "task submitted");

        let inner = self.inner.clone();
        tokio::spawn(async move {
            Inner::run_simple(inner, id, cancel).await;
        });
        id
    }

    /// Submit a complex task: decompose into a sub-task DAG and execute
    /// with bounded concurrency.
    ///
    /// # Errors
    /// Fails immediately when no decomposer is configured.
    pub async fn submit_complex(&self, description: &str, context: Value) -> Result<TaskId> {
        if self.inner.decomposer.is_none() {
            return Err(Error::Validation(
                "complex tasks need a configured decomposer".to_string(),
            ));
        }
        let task = Task::new(description, context);
        let id = task.id;
        let cancel = CancellationToken::new();
        {
            self.inner.tasks.write().await.insert(id, task);
            self.inner.cancels.write().await.insert(id, cancel.clone());
        }
        info!(task = %id.short(), "complex task submitted");

        let inner = self.inner.clone();
        tokio::spawn(async move {
            Inner::run_complex(inner, id, cancel).await;
        });
        Ok(id)
    }

    /// Current state of a task.
    pub async fn get_status(&self, id: TaskId) -> Result<Task> {
        let tasks = self.inner.tasks.read().await;
        tasks.get(&id).cloned().ok_or(Error::TaskNotFound(id))
    }

    /// Request cooperative cancellation of a task.
    ///
    /// In-flight invocations finish but their results are discarded; the
    /// task settles as cancelled unless it already reached a terminal
    /// state.
    pub async fn cancel(&self, id: TaskId) -> Result<()> {
        let token = {
            let cancels = self.inner.cancels.read().await;
            cancels.get(&id).cloned()
        };
        match token {
            Some(token) => {
                info!(task = %id.short(), "cancellation requested");
                token.cancel();
                Ok(())
            }
            None => {
                // Already settled, or never existed.
                let tasks = self.inner.tasks.read().await;
                if tasks.contains_key(&id) {
                    Ok(())
                } else {
                    Err(Error::TaskNotFound(id))
                }
            }
        }
    }

    /// Block until the task reaches a terminal state, returning it.
    pub async fn wait(&self, id: TaskId) -> Result<Task> {
        loop {
            // Arm the notification before checking, so a completion that
            // lands between the check and the await is not missed.
            let notified = self.inner.completion.notified();
            {
                let tasks = self.inner.tasks.read().await;
                let task = tasks.get(&id).ok_or(Error::TaskNotFound(id))?;
                if task.is_terminal() {
                    return Ok(task.clone());
                }
            }
            notified.await;
        }
    }

    /// Drop cached responses whose operation name starts with `prefix`.
    pub async fn invalidate_cache(&self, prefix: &str) -> Result<u64> {
        self.inner.cache.invalidate_prefix(prefix).await
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.inner.metrics
    }
}

impl Inner {
    async fn run_simple(inner: Arc<Inner>, id: TaskId, cancel: CancellationToken) {
        let (description, context) = match inner.task_input(id).await {
            Some(input) => input,
            None => return,
        };

        let capability = match Self::route_with_fallback(&inner, &description).await {
            Ok(capability) => capability,
            Err(err) => {
                let kind = err.classify();
                inner.metrics.record(
                    "task.route",
                    0.0,
                    label_set([("outcome", "error")]),
                );
                inner
                    .update_task(id, |task| {
                        task.fail(TaskError::new(kind, err.to_string()));
                    })
                    .await;
                inner.finish(id).await;
                return;
            }
        };

        inner.metrics.record("task.route", 1.0, label_set([("outcome", "ok")]));
        inner
            .update_task(id, |task| task.route(&capability))
            .await;
        inner
            .emit(TaskEvent::Routed {
                task_id: id,
                capability: capability.clone(),
            })
            .await;

        inner.update_task(id, |task| task.start()).await;
        inner.emit(TaskEvent::Started { task_id: id }).await;

        let started = tokio::time::Instant::now();
        let outcome = inner
            .execute_capability(&capability, &description, &context)
            .await;
        let elapsed_ms = started.elapsed().as_millis() as f64;

        inner.metrics.record(
            "task.duration",
            elapsed_ms,
            label_set([("mode", "simple"), ("outcome", outcome.label())]),
        );

        inner
            .update_task(id, |task| {
                if cancel.is_cancelled() {
                    // A result landing after cancellation is discarded.
                    task.cancel();
                    return;
                }
                match outcome {
                    Outcome::Success { payload } => task.succeed(payload),
                    Outcome::Failure { kind, detail, .. } => {
                        task.fail(TaskError::new(kind, detail).with_origin(&capability));
                    }
                }
            })
            .await;
        inner.finish(id).await;
    }

    async fn run_complex(inner: Arc<Inner>, id: TaskId, cancel: CancellationToken) {
        let (description, context) = match inner.task_input(id).await {
            Some(input) => input,
            None => return,
        };
        // Checked at submission.
        let Some(decomposer) = inner.decomposer.clone() else {
            return;
        };

        let dag = match decomposer.decompose(&description, &context).await {
            Ok(plan) => build_dag(&plan, &inner.router),
            Err(err) => Err(err),
        };
        let mut dag = match dag {
            Ok(dag) => dag,
            Err(err) => {
                warn!(task = %id.short(), %err, "decomposition failed");
                let kind = err.classify();
                inner
                    .update_task(id, |task| {
                        task.fail(TaskError::new(kind, err.to_string()));
                    })
                    .await;
                inner.finish(id).await;
                return;
            }
        };

        inner.update_task(id, |task| task.route_plan()).await;
        inner
            .emit(TaskEvent::Planned {
                task_id: id,
                subtasks: dag.len(),
            })
            .await;
        inner.update_task(id, |task| task.start()).await;
        inner.emit(TaskEvent::Started { task_id: id }).await;

        let started = tokio::time::Instant::now();
        let executor = DagExecutor::new(inner.config.orchestrator.fan_out, cancel.child_token());
        let status = {
            let invoke_inner = inner.clone();
            let parent_context = context.clone();
            executor
                .run(&mut dag, move |node| {
                    let inner = invoke_inner.clone();
                    let context = parent_context.clone();
                    async move {
                        inner
                            .execute_capability(&node.capability, &node.description, &context)
                            .await
                    }
                })
                .await
        };
        let elapsed_ms = started.elapsed().as_millis() as f64;

        let outcome_label = match status {
            TaskStatus::Succeeded => "ok",
            TaskStatus::Cancelled => "cancelled",
            _ => "error",
        };
        inner.metrics.record(
            "task.duration",
            elapsed_ms,
            label_set([("mode", "complex"), ("outcome", outcome_label)]),
        );

        let report = dag.node_report();
        let failure = dag
            .first_failure()
            .map(|(node, kind, detail)| {
                TaskError::new(kind, detail).with_origin(node)
            });
        inner
            .update_task(id, |task| match status {
                TaskStatus::Succeeded => task.succeed(report),
                TaskStatus::Cancelled => task.cancel(),
                TaskStatus::Partial => {
                    let error = failure.unwrap_or_else(|| {
                        TaskError::new(ErrorKind::TransientExternal, "sub-task did not complete")
                    });
                    task.complete_partial(report, error);
                }
                _ => {
                    let error = failure.unwrap_or_else(|| {
                        TaskError::new(ErrorKind::TransientExternal, "no sub-task succeeded")
                    });
                    task.result = Some(report);
                    task.fail(error);
                }
            })
            .await;
        inner.finish(id).await;
    }

    /// Similarity routing with configured fallbacks.
    ///
    /// When no capability clears the threshold, a keyword table is
    /// consulted, then the default capability. Only registered names are
    /// ever returned.
    async fn route_with_fallback(inner: &Inner, description: &str) -> Result<String> {
        let miss = match inner.router.route(description).await {
            Ok(decision) => return Ok(decision.capability),
            Err(err @ Error::NoConfidentMatch { .. }) => err,
            Err(err) => return Err(err),
        };

        let lower = description.to_lowercase();
        for route in &inner.config.routing.keyword_routes {
            let hit = route
                .keywords
                .iter()
                .any(|keyword| lower.contains(&keyword.to_lowercase()));
            if hit && inner.router.contains(&route.capability) {
                info!(capability = %route.capability, "routed via keyword fallback");
                return Ok(route.capability.clone());
            }
        }

        if let Some(default) = &inner.config.routing.default_capability {
            if inner.router.contains(default) {
                info!(capability = %default, "routed to default capability");
                return Ok(default.clone());
            }
        }
        Err(miss)
    }

    /// The shared invocation pipeline: cache, retry, rate limit, timeout.
    async fn execute_capability(
        &self,
        capability: &str,
        description: &str,
        context: &Value,
    ) -> Outcome {
        let Some(entry) = self.router.get(capability) else {
            return Outcome::failure(
                ErrorKind::PermanentInput,
                format!("unknown capability: {}", capability),
            );
        };
        let invoker = entry.invoker.clone();
        let profile = self.config.rate_limits.resolve(capability);
        let timeout = self.config.orchestrator.invoke_timeout();
        let key = cache_key(
            &format!("{}.invoke", capability),
            &json!({ "description": description, "context": context }),
        );

        let outcome = self
            .cache
            .get_or_compute(&key, None, || async {
                self.retry
                    .run(|_attempt| {
                        let invoker = invoker.clone();
                        async move {
                            let resource = format!("capability:{}", capability);
                            match self.limiter.acquire(&resource, &profile).await {
                                Ok(decision) if !decision.granted => {
                                    return Outcome::rate_limited(
                                        format!("rate limit exceeded for {}", capability),
                                        decision.wait_hint,
                                    );
                                }
                                Ok(_) => {}
                                Err(err) => return Outcome::from_error(&err),
                            }

                            match tokio::time::timeout(
                                timeout,
                                invoker.invoke(description, context),
                            )
                            .await
                            {
                                Ok(outcome) => outcome,
                                Err(_) => Outcome::failure(
                                    ErrorKind::TransientExternal,
                                    format!("invocation exceeded {:?}", timeout),
                                ),
                            }
                        }
                    })
                    .await
            })
            .await;

        self.metrics.record(
            "capability.invoke",
            1.0,
            label_set([("capability", capability), ("outcome", outcome.label())]),
        );
        outcome
    }

    async fn task_input(&self, id: TaskId) -> Option<(String, Value)> {
        let tasks = self.tasks.read().await;
        tasks
            .get(&id)
            .map(|task| (task.description.clone(), task.context.clone()))
    }

    async fn update_task(&self, id: TaskId, f: impl FnOnce(&mut Task)) {
        let mut tasks = self.tasks.write().await;
        if let Some(task) = tasks.get_mut(&id) {
            f(task);
        }
    }

    async fn emit(&self, event: TaskEvent) {
        // A full or dropped receiver never stalls execution.
        let _ = self.event_tx.try_send(event);
    }

    async fn finish(&self, id: TaskId) {
        self.cancels.write().await.remove(&id);
        let status = {
            let tasks = self.tasks.read().await;
            tasks.get(&id).map(|task| task.status)
        };
        if let Some(status) = status {
            info!(task = %id.short(), %status, "task settled");
            self.emit(TaskEvent::Completed {
                task_id: id,
                status,
            })
            .await;
        }
        self.completion.notify_waiters();
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("router", &self.inner.router)
            .finish_non_exhaustive()
    }
}
