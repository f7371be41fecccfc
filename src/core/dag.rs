//! Sub-task dependency graph for complex tasks.
//!
//! A decomposed task becomes a [`SubtaskDag`]: nodes are sub-tasks, edges
//! are dependencies, and the executor dispatches nodes as soon as all of
//! their predecessors have succeeded. The DAG is owned exclusively by one
//! task execution for its lifetime.

use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::core::outcome::ErrorKind;
use crate::core::task::TaskStatus;
use crate::error::{Error, Result};

/// Sub-task status within a DAG execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum NodeStatus {
    /// Waiting for dependencies to be satisfied.
    Pending,
    /// Dispatched to its capability.
    Running,
    /// Completed successfully.
    Succeeded,
    /// Failed with a classified error.
    Failed { kind: ErrorKind, detail: String },
    /// Never attempted because a dependency failed.
    Skipped { reason: String },
    /// Cancelled before reaching a terminal outcome.
    Cancelled,
}

impl NodeStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, NodeStatus::Pending | NodeStatus::Running)
    }

    pub fn is_succeeded(&self) -> bool {
        matches!(self, NodeStatus::Succeeded)
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeStatus::Pending => write!(f, "pending"),
            NodeStatus::Running => write!(f, "running"),
            NodeStatus::Succeeded => write!(f, "succeeded"),
            NodeStatus::Failed { kind, detail } => write!(f, "failed ({}): {}", kind, detail),
            NodeStatus::Skipped { reason } => write!(f, "skipped: {}", reason),
            NodeStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A single sub-task in the dependency graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtaskNode {
    /// Plan-assigned identifier, unique within the DAG.
    pub id: String,
    /// Capability that executes this node.
    pub capability: String,
    /// Description passed to the capability.
    pub description: String,
    /// Ids of nodes that must succeed before this one starts.
    pub depends_on: Vec<String>,
    /// Current execution status.
    pub status: NodeStatus,
    /// Payload from a successful invocation.
    pub result: Option<Value>,
}

impl SubtaskNode {
    pub fn new(id: &str, capability: &str, description: &str, depends_on: Vec<String>) -> Self {
        Self {
            id: id.to_string(),
            capability: capability.to_string(),
            description: description.to_string(),
            depends_on,
            status: NodeStatus::Pending,
            result: None,
        }
    }

    pub fn start(&mut self) {
        self.status = NodeStatus::Running;
    }

    pub fn succeed(&mut self, result: Value) {
        self.status = NodeStatus::Succeeded;
        self.result = Some(result);
    }

    pub fn fail(&mut self, kind: ErrorKind, detail: impl Into<String>) {
        self.status = NodeStatus::Failed {
            kind,
            detail: detail.into(),
        };
    }

    pub fn skip(&mut self, reason: impl Into<String>) {
        self.status = NodeStatus::Skipped {
            reason: reason.into(),
        };
    }

    pub fn cancel(&mut self) {
        self.status = NodeStatus::Cancelled;
    }
}

/// The sub-task dependency graph.
///
/// Uses petgraph's DiGraph with an id-to-index map for fast lookups.
/// Edges point from a dependency to its dependent, so `Incoming`
/// neighbors are prerequisites.
pub struct SubtaskDag {
    graph: DiGraph<SubtaskNode, ()>,
    index: HashMap<String, NodeIndex>,
}

impl SubtaskDag {
    /// Create a new empty DAG.
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            index: HashMap::new(),
        }
    }

    /// Add a node to the DAG.
    ///
    /// # Errors
    /// Returns a validation error if a node with the same id exists.
    pub fn add_node(&mut self, node: SubtaskNode) -> Result<()> {
        if self.index.contains_key(&node.id) {
            return Err(Error::Validation(format!(
                "duplicate sub-task id: {}",
                node.id
            )));
        }
        let id = node.id.clone();
        let idx = self.graph.add_node(node);
        self.index.insert(id, idx);
        Ok(())
    }

    /// Add a dependency edge: `from` must succeed before `to` starts.
    ///
    /// # Errors
    /// Returns a validation error if either node is missing or the edge
    /// would create a cycle.
    pub fn add_dependency(&mut self, from: &str, to: &str) -> Result<()> {
        let from_idx = *self
            .index
            .get(from)
            .ok_or_else(|| Error::Validation(format!("unresolvable dependency: {}", from)))?;
        let to_idx = *self
            .index
            .get(to)
            .ok_or_else(|| Error::Validation(format!("unresolvable dependency: {}", to)))?;

        // Add the edge, then back it out if it closes a cycle.
        let edge = self.graph.add_edge(from_idx, to_idx, ());
        if is_cyclic_directed(&self.graph) {
            self.graph.remove_edge(edge);
            return Err(Error::Validation(format!(
                "dependency from {} to {} would create a cycle",
                from, to
            )));
        }
        Ok(())
    }

    pub fn node(&self, id: &str) -> Option<&SubtaskNode> {
        self.index.get(id).and_then(|&idx| self.graph.node_weight(idx))
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut SubtaskNode> {
        if let Some(&idx) = self.index.get(id) {
            self.graph.node_weight_mut(idx)
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn all_nodes(&self) -> impl Iterator<Item = &SubtaskNode> {
        self.graph.node_weights()
    }

    /// Ids of pending nodes whose dependencies have all succeeded.
    ///
    /// Nodes downstream of a failure never appear here because
    /// [`SubtaskDag::skip_dependents`] marks them terminal at the moment
    /// the failure settles.
    pub fn ready_nodes(&self) -> Vec<String> {
        self.graph
            .node_indices()
            .filter_map(|idx| {
                let node = self.graph.node_weight(idx)?;
                if node.status != NodeStatus::Pending {
                    return None;
                }
                let deps_satisfied = self
                    .graph
                    .neighbors_directed(idx, petgraph::Direction::Incoming)
                    .all(|dep| {
                        self.graph
                            .node_weight(dep)
                            .map(|n| n.status.is_succeeded())
                            .unwrap_or(false)
                    });
                if deps_satisfied {
                    Some(node.id.clone())
                } else {
                    None
                }
            })
            .collect()
    }

    /// Mark all not-yet-started transitive dependents of a failed node as
    /// skipped. Independent branches are untouched.
    ///
    /// Returns the ids that were skipped.
    pub fn skip_dependents(&mut self, failed: &str, reason: &str) -> Vec<String> {
        let Some(&start) = self.index.get(failed) else {
            return Vec::new();
        };

        let mut skipped = Vec::new();
        let mut stack = vec![start];
        while let Some(idx) = stack.pop() {
            let dependents: Vec<NodeIndex> = self
                .graph
                .neighbors_directed(idx, petgraph::Direction::Outgoing)
                .collect();
            for dep_idx in dependents {
                if let Some(node) = self.graph.node_weight_mut(dep_idx) {
                    if node.status == NodeStatus::Pending {
                        node.skip(reason);
                        skipped.push(node.id.clone());
                        stack.push(dep_idx);
                    }
                }
            }
        }
        skipped
    }

    /// Mark every still-pending node as cancelled.
    ///
    /// Returns the ids that were cancelled. Running nodes are left for the
    /// executor, which discards their results cooperatively.
    pub fn cancel_pending(&mut self) -> Vec<String> {
        let mut cancelled = Vec::new();
        for node in self.graph.node_weights_mut() {
            if node.status == NodeStatus::Pending {
                node.cancel();
                cancelled.push(node.id.clone());
            }
        }
        cancelled
    }

    /// Whether every node has reached a terminal status.
    pub fn all_terminal(&self) -> bool {
        self.graph.node_weights().all(|n| n.status.is_terminal())
    }

    /// Fold node statuses into the task's final status.
    ///
    /// Succeeded only if every node succeeded; Failed if none succeeded;
    /// Partial when at least one node succeeded and at least one did not.
    pub fn final_status(&self) -> TaskStatus {
        let total = self.graph.node_count();
        let succeeded = self
            .graph
            .node_weights()
            .filter(|n| n.status.is_succeeded())
            .count();

        if succeeded == total {
            TaskStatus::Succeeded
        } else if succeeded == 0 {
            TaskStatus::Failed
        } else {
            TaskStatus::Partial
        }
    }

    /// The first failed node, if any, for surfacing in the task error.
    pub fn first_failure(&self) -> Option<(&str, ErrorKind, &str)> {
        self.graph.node_weights().find_map(|n| match &n.status {
            NodeStatus::Failed { kind, detail } => Some((n.id.as_str(), *kind, detail.as_str())),
            _ => None,
        })
    }

    /// Per-node outcome report attached to the task result.
    pub fn node_report(&self) -> Value {
        let nodes: Vec<Value> = self
            .graph
            .node_weights()
            .map(|n| {
                serde_json::json!({
                    "id": n.id,
                    "capability": n.capability,
                    "status": n.status,
                    "result": n.result,
                })
            })
            .collect();
        Value::Array(nodes)
    }
}

impl Default for SubtaskDag {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SubtaskDag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubtaskDag")
            .field("nodes", &self.len())
            .field("dependencies", &self.dependency_count())
            .finish()
    }
}
