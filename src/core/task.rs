//! Task data model for the execution runtime.
//!
//! Tasks are the units of work submitted through the orchestrator. Each
//! task tracks its status, routed capability, timing, and final result
//! or classified error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::core::outcome::ErrorKind;

/// Unique identifier for a submitted task.
///
/// Uses UUID v4 for generation and provides a short form display
/// for human-readable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Create a new unique task identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Task status in its lifecycle.
///
/// Tasks progress `Pending → Routed → Running` and then reach exactly one
/// terminal state. `Partial` is reserved for complex tasks where some but
/// not all sub-tasks succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Submitted but not yet routed to a capability.
    Pending,
    /// A capability has been selected (or a sub-task plan validated).
    Routed,
    /// Execution is in progress.
    Running,
    /// Terminal: execution succeeded.
    Succeeded,
    /// Terminal: execution failed.
    Failed,
    /// Terminal: some sub-tasks succeeded and at least one did not.
    Partial,
    /// Terminal: the task was cancelled before completing.
    Cancelled,
}

impl TaskStatus {
    /// Whether this status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Partial | TaskStatus::Cancelled
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Routed => "routed",
            TaskStatus::Running => "running",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
            TaskStatus::Partial => "partial",
            TaskStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Classified error attached to a failed task.
///
/// `origin` names the capability or sub-task node that produced the
/// failure, so callers see what failed and why, never a bare trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: ErrorKind,
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

impl TaskError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
            origin: None,
        }
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.origin {
            Some(origin) => write!(f, "{} in {}: {}", self.kind, origin, self.detail),
            None => write!(f, "{}: {}", self.kind, self.detail),
        }
    }
}

/// A submitted task and its progress through the runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier for this task.
    pub id: TaskId,
    /// Natural-language description of the work.
    pub description: String,
    /// Opaque caller-supplied context passed through to capabilities.
    pub context: Value,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// Capability selected by the router (simple tasks only).
    pub assigned_capability: Option<String>,
    /// When the task was submitted.
    pub created_at: DateTime<Utc>,
    /// When the task reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    /// Final payload; for complex tasks, the per-node outcome report.
    pub result: Option<Value>,
    /// Classified error when the task failed or completed partially.
    pub error: Option<TaskError>,
}

impl Task {
    /// Create a new pending task.
    pub fn new(description: &str, context: Value) -> Self {
        Self {
            id: TaskId::new(),
            description: description.to_string(),
            context,
            status: TaskStatus::Pending,
            assigned_capability: None,
            created_at: Utc::now(),
            completed_at: None,
            result: None,
            error: None,
        }
    }

    /// Record the routing decision and transition to Routed.
    pub fn route(&mut self, capability: &str) {
        self.status = TaskStatus::Routed;
        self.assigned_capability = Some(capability.to_string());
    }

    /// Mark a complex task as routed once its plan validated.
    pub fn route_plan(&mut self) {
        self.status = TaskStatus::Routed;
    }

    /// Transition to Running.
    pub fn start(&mut self) {
        self.status = TaskStatus::Running;
    }

    /// Terminal transition: success with a result payload.
    pub fn succeed(&mut self, result: Value) {
        self.status = TaskStatus::Succeeded;
        self.result = Some(result);
        self.completed_at = Some(Utc::now());
    }

    /// Terminal transition: failure with a classified error.
    ///
    /// A result payload may still be attached (e.g. per-node outcomes of a
    /// fully failed DAG) so callers can inspect what was attempted.
    pub fn fail(&mut self, error: TaskError) {
        self.status = TaskStatus::Failed;
        self.error = Some(error);
        self.completed_at = Some(Utc::now());
    }

    /// Terminal transition: partial completion of a complex task.
    ///
    /// Carries the per-node outcome report and the first failure so the
    /// caller can retry only the failed branch.
    pub fn complete_partial(&mut self, result: Value, error: TaskError) {
        self.status = TaskStatus::Partial;
        self.result = Some(result);
        self.error = Some(error);
        self.completed_at = Some(Utc::now());
    }

    /// Terminal transition: cancelled before completion.
    pub fn cancel(&mut self) {
        self.status = TaskStatus::Cancelled;
        self.completed_at = Some(Utc::now());
    }

    /// Whether the task has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
