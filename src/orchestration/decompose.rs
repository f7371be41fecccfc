//! Complex-task decomposition into a validated sub-task plan.
//!
//! A [`Decomposer`] turns a task description into a [`Plan`]; the plan is
//! then validated against the registered capabilities and materialized as
//! a [`SubtaskDag`]. Every way a plan can be malformed surfaces as a
//! decomposition error, which is terminal and never retried.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

use crate::core::dag::{SubtaskDag, SubtaskNode};
use crate::error::{Error, Result};
use crate::routing::CapabilityRouter;

/// One planned sub-task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanNode {
    /// Plan-unique identifier, referenced by `depends_on`.
    pub id: String,
    /// Capability that should execute this sub-task.
    pub capability: String,
    /// Description passed to the capability.
    pub description: String,
    /// Ids of sub-tasks that must succeed first.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// A decomposition result: an ordered list of sub-tasks with explicit
/// dependencies.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Plan {
    pub nodes: Vec<PlanNode>,
}

impl Plan {
    pub fn new(nodes: Vec<PlanNode>) -> Self {
        Self { nodes }
    }

    /// Parse a plan from a JSON value, e.g. a planner model's output.
    pub fn from_json(value: Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| Error::Decomposition(format!("unparseable plan: {}", e)))
    }
}

/// Splits a complex task into a plan of capability-sized sub-tasks.
#[async_trait]
pub trait Decomposer: Send + Sync {
    async fn decompose(&self, description: &str, context: &Value) -> Result<Plan>;
}

/// Validate a plan against the router and build its execution DAG.
///
/// # Errors
/// Returns a decomposition error for an empty plan, duplicate ids,
/// unknown capabilities, unresolvable dependencies, or cycles.
pub fn build_dag(plan: &Plan, router: &CapabilityRouter) -> Result<SubtaskDag> {
    if plan.nodes.is_empty() {
        return Err(Error::Decomposition("plan has no sub-tasks".to_string()));
    }

    let mut seen = HashSet::new();
    for node in &plan.nodes {
        if !seen.insert(node.id.as_str()) {
            return Err(Error::Decomposition(format!(
                "duplicate sub-task id: {}",
                node.id
            )));
        }
        if !router.contains(&node.capability) {
            return Err(Error::Decomposition(format!(
                "sub-task {} names unknown capability: {}",
                node.id, node.capability
            )));
        }
    }

    let mut dag = SubtaskDag::new();
    for node in &plan.nodes {
        dag.add_node(SubtaskNode::new(
            &node.id,
            &node.capability,
            &node.description,
            node.depends_on.clone(),
        ))
        .map_err(|e| Error::Decomposition(e.to_string()))?;
    }
    for node in &plan.nodes {
        for dep in &node.depends_on {
            dag.add_dependency(dep, &node.id)
                .map_err(|e| Error::Decomposition(e.to_string()))?;
        }
    }
    Ok(dag)
}
