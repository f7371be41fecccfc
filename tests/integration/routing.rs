//! Routing behavior through the public API.

use serde_json::json;
use std::sync::atomic::Ordering;

use foreman::core::ErrorKind;
use foreman::orchestration::TaskEvent;
use foreman::TaskStatus;

use crate::fixtures::{fast_config, harness, Script, ScriptedInvoker};

#[tokio::test]
async fn routes_to_most_similar_capability() {
    let (build, build_calls) = ScriptedInvoker::new(Script::Succeed(json!({"queued": true})));
    let (log, log_calls) = ScriptedInvoker::new(Script::Succeed(json!({"lines": 12})));
    let harness = harness(
        fast_config(),
        vec![
            ("build", "trigger build jobs", build),
            ("log", "analyze log output", log),
        ],
        None,
    )
    .await;

    let id = harness
        .orchestrator
        .submit("trigger a build for api-service", json!({"job": "api-service"}))
        .await;
    let task = harness.orchestrator.wait(id).await.unwrap();

    assert_eq!(task.status, TaskStatus::Succeeded);
    assert_eq!(task.assigned_capability.as_deref(), Some("build"));
    assert_eq!(build_calls.load(Ordering::SeqCst), 1);
    assert_eq!(log_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn emits_lifecycle_events_in_order() {
    let (build, _) = ScriptedInvoker::new(Script::Succeed(json!({})));
    let mut harness = harness(
        fast_config(),
        vec![("build", "trigger build jobs", build)],
        None,
    )
    .await;

    let id = harness.orchestrator.submit("run the build", json!({})).await;
    harness.orchestrator.wait(id).await.unwrap();

    let mut events = Vec::new();
    while let Ok(event) = harness.events.try_recv() {
        events.push(event);
    }
    assert_eq!(
        events,
        vec![
            TaskEvent::Routed {
                task_id: id,
                capability: "build".to_string()
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
async fn reuses_cached_task_embeddings() {
    let (build, _) = ScriptedInvoker::new(Script::Succeed(json!({})));
    let mut config = fast_config();
    // Response caching off so the second submission actually re-routes.
    config.cache.enabled = false;
    let harness = harness(
        config,
        vec![("build", "trigger build jobs", build)],
        None,
    )
    .await;

    // One embedding call per registered capability.
    let after_setup = harness.embed_calls.load(Ordering::SeqCst);
    assert_eq!(after_setup, 1);

    let id = harness.orchestrator.submit("run the build again", json!({})).await;
    harness.orchestrator.wait(id).await.unwrap();
    assert_eq!(harness.embed_calls.load(Ordering::SeqCst), after_setup + 1);

    // Same description: served from the embedding cache.
    let id = harness.orchestrator.submit("run the build again", json!({})).await;
    harness.orchestrator.wait(id).await.unwrap();
    assert_eq!(harness.embed_calls.load(Ordering::SeqCst), after_setup + 1);
}

#[tokio::test]
async fn unroutable_task_fails_with_permanent_input() {
    let (build, build_calls) = ScriptedInvoker::new(Script::Succeed(json!({})));
    let harness = harness(
        fast_config(),
        vec![("build", "trigger build jobs", build)],
        None,
    )
    .await;

    let id = harness
        .orchestrator
        .submit("order a pizza for the team", json!({}))
        .await;
    let task = harness.orchestrator.wait(id).await.unwrap();

    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error.unwrap().kind, ErrorKind::PermanentInput);
    assert_eq!(build_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn keyword_fallback_rescues_low_similarity() {
    let (plugin, plugin_calls) = ScriptedInvoker::new(Script::Succeed(json!({"installed": true})));
    let mut config = fast_config();
    config.routing.keyword_routes = vec![foreman::config::KeywordRoute {
        capability: "plugin".to_string(),
        keywords: vec!["install".to_string(), "extension".to_string()],
    }];
    let harness = harness(
        config,
        vec![("plugin", "manage plugin installs", plugin)],
        None,
    )
    .await;

    // "install the git extension" shares no vocabulary with the
    // capability description, so similarity alone cannot route it.
    let id = harness
        .orchestrator
        .submit("install the git extension", json!({}))
        .await;
    let task = harness.orchestrator.wait(id).await.unwrap();

    assert_eq!(task.status, TaskStatus::Succeeded);
    assert_eq!(task.assigned_capability.as_deref(), Some("plugin"));
    assert_eq!(plugin_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn default_capability_used_as_last_resort() {
    let (user, _) = ScriptedInvoker::new(Script::Succeed(json!({"ok": true})));
    let mut config = fast_config();
    config.routing.default_capability = Some("user".to_string());
    let harness = harness(
        config,
        vec![("user", "manage user accounts", user)],
        None,
    )
    .await;

    let id = harness
        .orchestrator
        .submit("something entirely different", json!({}))
        .await;
    let task = harness.orchestrator.wait(id).await.unwrap();

    assert_eq!(task.status, TaskStatus::Succeeded);
    assert_eq!(task.assigned_capability.as_deref(), Some("user"));
}
