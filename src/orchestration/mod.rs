//! Task orchestration: decomposition, DAG execution, and the runtime
//! entry point.

pub mod decompose;
pub mod executor;
pub mod orchestrator;

pub use decompose::{build_dag, Decomposer, Plan, PlanNode};
pub use executor::DagExecutor;
pub use orchestrator::{Orchestrator, TaskEvent};
