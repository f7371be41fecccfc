//! Concurrent DAG execution.
//!
//! Ready sub-tasks run concurrently up to the fan-out limit. A failed
//! node skips its transitive dependents while independent branches keep
//! running to completion. Cancellation is cooperative: in-flight
//! sub-tasks are awaited and their results discarded.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::dag::{NodeStatus, SubtaskDag, SubtaskNode};
use crate::core::outcome::{ErrorKind, Outcome};
use crate::core::task::TaskStatus;

/// Runs a [`SubtaskDag`] to completion with bounded concurrency.
pub struct DagExecutor {
    fan_out: usize,
    cancel: CancellationToken,
}

impl DagExecutor {
    pub fn new(fan_out: usize, cancel: CancellationToken) -> Self {
        Self {
            fan_out: fan_out.max(1),
            cancel,
        }
    }

    /// Execute every node, invoking `invoke` for each as its dependencies
    /// succeed. Returns the folded task status.
    pub async fn run<F, Fut>(&self, dag: &mut SubtaskDag, invoke: F) -> TaskStatus
    where
        F: Fn(SubtaskNode) -> Fut,
        Fut: Future<Output = Outcome> + Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.fan_out));
        let mut join_set: JoinSet<Outcome> = JoinSet::new();
        // Maps spawned task ids back to their DAG node.
        let mut running: HashMap<tokio::task::Id, String> = HashMap::new();

        loop {
            if self.cancel.is_cancelled() {
                return self.drain_cancelled(dag, &mut join_set, &mut running).await;
            }

            // Dispatch as many ready nodes as the fan-out allows.
            for node_id in dag.ready_nodes() {
                let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                    break;
                };
                let node = match dag.node_mut(&node_id) {
                    Some(node) => {
                        node.start();
                        node.clone()
                    }
                    None => continue,
                };
                debug!(node = %node_id, capability = %node.capability, "dispatching sub-task");
                let fut = invoke(node);
                let handle = join_set.spawn(async move {
                    let _permit = permit;
                    fut.await
                });
                running.insert(handle.id(), node_id);
            }

            if join_set.is_empty() {
                // Nothing running and nothing ready: every node is settled.
                break;
            }

            tokio::select! {
                _ = self.cancel.cancelled() => continue,
                joined = join_set.join_next_with_id() => {
                    let node_id = match &joined {
                        Some(Ok((id, _))) => running.remove(id),
                        Some(Err(join_err)) => running.remove(&join_err.id()),
                        None => break,
                    };
                    let Some(node_id) = node_id else { continue };

                    // A result that lands after cancellation is discarded,
                    // never recorded.
                    if self.cancel.is_cancelled() {
                        if let Some(node) = dag.node_mut(&node_id) {
                            node.cancel();
                        }
                        continue;
                    }

                    match joined {
                        Some(Ok((_, outcome))) => self.settle(dag, &node_id, outcome),
                        Some(Err(join_err)) => {
                            warn!(node = %node_id, %join_err, "sub-task panicked");
                            self.settle(
                                dag,
                                &node_id,
                                Outcome::failure(
                                    ErrorKind::TransientExternal,
                                    format!("sub-task aborted: {}", join_err),
                                ),
                            );
                        }
                        None => {}
                    }
                }
            }
        }

        dag.final_status()
    }

    fn settle(&self, dag: &mut SubtaskDag, node_id: &str, outcome: Outcome) {
        match outcome {
            Outcome::Success { payload } => {
                if let Some(node) = dag.node_mut(node_id) {
                    node.succeed(payload);
                }
                debug!(node = %node_id, "sub-task succeeded");
            }
            Outcome::Failure { kind, detail, .. } => {
                if let Some(node) = dag.node_mut(node_id) {
                    node.fail(kind, detail.clone());
                }
                let skipped = dag.skip_dependents(node_id, &format!("dependency {} failed", node_id));
                debug!(node = %node_id, %kind, skipped = skipped.len(), "sub-task failed");
            }
        }
    }

    /// Await in-flight sub-tasks, discard their results, and mark every
    /// unfinished node cancelled.
    async fn drain_cancelled(
        &self,
        dag: &mut SubtaskDag,
        join_set: &mut JoinSet<Outcome>,
        running: &mut HashMap<tokio::task::Id, String>,
    ) -> TaskStatus {
        debug!(in_flight = running.len(), "cancelling DAG execution");
        while join_set.join_next().await.is_some() {}
        for node_id in running.drain().map(|(_, id)| id) {
            if let Some(node) = dag.node_mut(&node_id) {
                if node.status == NodeStatus::Running {
                    node.cancel();
                }
            }
        }
        dag.cancel_pending();
        TaskStatus::Cancelled
    }
}
