//! Complex-task decomposition and DAG execution.

use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use foreman::core::{ErrorKind, NodeStatus};
use foreman::orchestration::{Plan, PlanNode, TaskEvent};
use foreman::{TaskId, TaskStatus};

use crate::fixtures::{fast_config, harness, Harness, Script, ScriptedInvoker, StaticDecomposer};

fn plan_node(id: &str, capability: &str, deps: &[&str]) -> PlanNode {
    PlanNode {
        id: id.to_string(),
        capability: capability.to_string(),
        description: format!("{} {}", capability, id),
        depends_on: deps.iter().map(|s| s.to_string()).collect(),
    }
}

/// a(build) fans out to b(log) and c(pipeline).
fn fan_plan() -> Plan {
    Plan::new(vec![
        plan_node("a", "build", &[]),
        plan_node("b", "log", &["a"]),
        plan_node("c", "pipeline", &["a"]),
    ])
}

async fn wait_until_running(harness: &Harness, id: TaskId) {
    loop {
        let task = harness.orchestrator.get_status(id).await.unwrap();
        if task.status == TaskStatus::Running {
            return;
        }
        assert!(!task.is_terminal(), "task settled before running: {}", task.status);
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

#[tokio::test]
async fn complex_task_runs_whole_dag() {
    let (build, _) = ScriptedInvoker::new(Script::Succeed(json!({"number": 7})));
    let (log, _) = ScriptedInvoker::new(Script::Succeed(json!({"errors": 0})));
    let (pipeline, _) = ScriptedInvoker::new(Script::Succeed(json!({"stages": 3})));
    let mut harness = harness(
        fast_config(),
        vec![
            ("build", "trigger build jobs", build),
            ("log", "analyze log output", log),
            ("pipeline", "manage pipeline runs", pipeline),
        ],
        Some(StaticDecomposer::new(fan_plan())),
    )
    .await;

    let id = harness
        .orchestrator
        .submit_complex("rebuild and analyze everything", json!({}))
        .await
        .unwrap();
    let task = harness.orchestrator.wait(id).await.unwrap();

    assert_eq!(task.status, TaskStatus::Succeeded);
    let report = task.result.unwrap();
    let nodes = report.as_array().unwrap();
    assert_eq!(nodes.len(), 3);
    for node in nodes {
        assert_eq!(node["status"]["state"], "succeeded");
    }

    let mut events = Vec::new();
    while let Ok(event) = harness.events.try_recv() {
        events.push(event);
    }
    assert_eq!(
        events,
        vec![
            TaskEvent::Planned {
                task_id: id,
                subtasks: 3
            },
            TaskEvent::Started { task_id: id },
            TaskEvent::Completed {
                task_id: id,
                status: TaskStatus::Succeeded
            },
        ]
    );
}

#[tokio::test]
async fn failed_branch_settles_partial() {
    let (build, _) = ScriptedInvoker::new(Script::Succeed(json!({"number": 7})));
    let (log, _) = ScriptedInvoker::new(Script::FailAlways(ErrorKind::PermanentExternal));
    let (pipeline, pipeline_calls) = ScriptedInvoker::new(Script::Succeed(json!({"stages": 3})));
    let harness = harness(
        fast_config(),
        vec![
            ("build", "trigger build jobs", build),
            ("log", "analyze log output", log),
            ("pipeline", "manage pipeline runs", pipeline),
        ],
        Some(StaticDecomposer::new(fan_plan())),
    )
    .await;

    let id = harness
        .orchestrator
        .submit_complex("rebuild and analyze everything", json!({}))
        .await
        .unwrap();
    let task = harness.orchestrator.wait(id).await.unwrap();

    // The independent branch completed despite the failure.
    assert_eq!(task.status, TaskStatus::Partial);
    assert_eq!(pipeline_calls.load(Ordering::SeqCst), 1);

    let error = task.error.unwrap();
    assert_eq!(error.kind, ErrorKind::PermanentExternal);
    assert_eq!(error.origin.as_deref(), Some("b"));

    let report = task.result.unwrap();
    let nodes = report.as_array().unwrap();
    let state_of = |id: &str| {
        nodes
            .iter()
            .find(|n| n["id"] == id)
            .map(|n| n["status"]["state"].as_str().unwrap().to_string())
            .unwrap()
    };
    assert_eq!(state_of("a"), "succeeded");
    assert_eq!(state_of("b"), "failed");
    assert_eq!(state_of("c"), "succeeded");
}

#[tokio::test]
async fn failed_root_skips_dependents() {
    let (build, _) = ScriptedInvoker::new(Script::FailAlways(ErrorKind::PermanentInput));
    let (log, log_calls) = ScriptedInvoker::new(Script::Succeed(json!({})));
    let (pipeline, pipeline_calls) = ScriptedInvoker::new(Script::Succeed(json!({})));
    let harness = harness(
        fast_config(),
        vec![
            ("build", "trigger build jobs", build),
            ("log", "analyze log output", log),
            ("pipeline", "manage pipeline runs", pipeline),
        ],
        Some(StaticDecomposer::new(fan_plan())),
    )
    .await;

    let id = harness
        .orchestrator
        .submit_complex("rebuild and analyze everything", json!({}))
        .await
        .unwrap();
    let task = harness.orchestrator.wait(id).await.unwrap();

    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error.unwrap().origin.as_deref(), Some("a"));
    assert_eq!(log_calls.load(Ordering::SeqCst), 0);
    assert_eq!(pipeline_calls.load(Ordering::SeqCst), 0);

    // The report is still attached so callers see what was attempted.
    let report = task.result.unwrap();
    let skipped = report
        .as_array()
        .unwrap()
        .iter()
        .filter(|n| n["status"]["state"] == "skipped")
        .count();
    assert_eq!(skipped, 2);
}

#[tokio::test]
async fn invalid_plan_fails_decomposition() {
    let (build, build_calls) = ScriptedInvoker::new(Script::Succeed(json!({})));
    let plan = Plan::new(vec![plan_node("a", "deploy", &[])]);
    let harness = harness(
        fast_config(),
        vec![("build", "trigger build jobs", build)],
        Some(StaticDecomposer::new(plan)),
    )
    .await;

    let id = harness
        .orchestrator
        .submit_complex("deploy the release", json!({}))
        .await
        .unwrap();
    let task = harness.orchestrator.wait(id).await.unwrap();

    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error.unwrap().kind, ErrorKind::Decomposition);
    assert_eq!(build_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn cyclic_plan_fails_decomposition() {
    let (build, _) = ScriptedInvoker::new(Script::Succeed(json!({})));
    let plan = Plan::new(vec![
        plan_node("a", "build", &["b"]),
        plan_node("b", "build", &["a"]),
    ]);
    let harness = harness(
        fast_config(),
        vec![("build", "trigger build jobs", build)],
        Some(StaticDecomposer::new(plan)),
    )
    .await;

    let id = harness
        .orchestrator
        .submit_complex("build twice", json!({}))
        .await
        .unwrap();
    let task = harness.orchestrator.wait(id).await.unwrap();

    assert_eq!(task.status, TaskStatus::Failed);
    let error = task.error.unwrap();
    assert_eq!(error.kind, ErrorKind::Decomposition);
    assert!(error.detail.contains("cycle"));
}

#[tokio::test]
async fn cancelled_complex_task_discards_results() {
    let gate = Arc::new(Semaphore::new(0));
    let (build, _) = ScriptedInvoker::new(Script::Gated(gate.clone()));
    let plan = Plan::new(vec![
        plan_node("a", "build", &[]),
        plan_node("b", "build", &["a"]),
    ]);
    let harness = harness(
        fast_config(),
        vec![("build", "trigger build jobs", build)],
        Some(StaticDecomposer::new(plan)),
    )
    .await;

    let id = harness
        .orchestrator
        .submit_complex("long running rebuild", json!({}))
        .await
        .unwrap();
    wait_until_running(&harness, id).await;

    harness.orchestrator.cancel(id).await.unwrap();
    // Unblock the in-flight sub-task; its result must still be dropped.
    gate.add_permits(8);

    let task = harness.orchestrator.wait(id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);
    assert!(task.result.is_none());
    assert!(task.completed_at.is_some());
}

#[tokio::test]
async fn cancelled_simple_task_discards_results() {
    let gate = Arc::new(Semaphore::new(0));
    let (build, _) = ScriptedInvoker::new(Script::Gated(gate.clone()));
    let harness = harness(
        fast_config(),
        vec![("build", "trigger build jobs", build)],
        None,
    )
    .await;

    let id = harness.orchestrator.submit("slow build", json!({})).await;
    wait_until_running(&harness, id).await;

    harness.orchestrator.cancel(id).await.unwrap();
    gate.add_permits(8);

    let task = harness.orchestrator.wait(id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);
    assert!(task.result.is_none());
}

// NodeStatus appears in reports as tagged JSON; keep the contract pinned.
#[test]
fn node_status_report_tag_format() {
    let status = NodeStatus::Skipped {
        reason: "dependency a failed".to_string(),
    };
    let value = serde_json::to_value(&status).unwrap();
    assert_eq!(value["state"], "skipped");
    assert_eq!(value["reason"], "dependency a failed");
}
