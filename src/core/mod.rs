//! Core data model: tasks, outcomes, and the sub-task dependency graph.

pub mod dag;
pub mod outcome;
pub mod task;

pub use dag::{NodeStatus, SubtaskDag, SubtaskNode};
pub use outcome::{ErrorKind, Outcome};
pub use task::{Task, TaskError, TaskId, TaskStatus};
