//! End-to-end conductor scenarios over in-memory stores.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use trellis_contracts::{ActionResult, ActionStatus};
use trellis_engine::executor::{DispatchingExecutor, LocalActionRegistry, RemoteActionExecutor};
use trellis_engine::model::ExecutionStatus;

use common::{conductor_harness, doc, run_to_completion, test_config, ScriptedExecutor};

#[tokio::test]
async fn linear_workflow_succeeds_with_echo_outputs() {
    // Two core.echo steps run in order through the real dispatcher
    let document = doc(json!({
        "id": "simple-linear",
        "displayName": "Simple linear",
        "startNode": "step1",
        "nodes": [
            {
                "id": "step1",
                "actionType": "core.echo",
                "parameters": {"message": "Hello"},
                "edges": [{"targetNode": "step2", "when": "success"}]
            },
            {
                "id": "step2",
                "actionType": "core.echo",
                "parameters": {"message": "World"}
            }
        ]
    }));

    let config = test_config();
    let (conductor, stores) = {
        let stores = trellis_engine::store::Stores::in_memory();
        common::seed_catalog_for(&stores, &document).await;
        let registry = Arc::new(trellis_engine::catalog::ActionCatalogRegistry::new(
            stores.catalog.clone(),
        ));
        registry.refresh().await.unwrap();
        let executor = Arc::new(DispatchingExecutor::new(
            Arc::new(LocalActionRegistry::with_builtins()),
            Arc::clone(&registry),
            RemoteActionExecutor::new(Duration::from_secs(1)).unwrap(),
            Default::default(),
        ));
        (
            trellis_engine::conductor::Conductor::new(
                stores.clone(),
                executor,
                registry,
                Arc::new(config),
            ),
            stores,
        )
    };

    let (execution, attempts) =
        run_to_completion(&conductor, &stores, document, json!({}), json!({})).await;

    assert_eq!(execution.status, ExecutionStatus::Succeeded);
    assert_eq!(attempts.len(), 2);
    let step1 = &attempts[0];
    assert_eq!(step1.node_id, "step1");
    assert_eq!(step1.attempt, 1);
    assert_eq!(step1.status, ActionStatus::Succeeded);
    assert_eq!(step1.outputs.as_ref().unwrap()["echo"], json!("Hello"));
    let step2 = &attempts[1];
    assert_eq!(step2.node_id, "step2");
    assert_eq!(step2.status, ActionStatus::Succeeded);
    assert_eq!(step2.outputs.as_ref().unwrap()["echo"], json!("World"));

    // The final snapshot carries outputs by node id
    let snapshot = execution.context_snapshot.unwrap();
    assert_eq!(snapshot["step1"]["echo"], json!("Hello"));
    assert_eq!(snapshot["step2"]["echo"], json!("World"));
}

#[tokio::test]
async fn fan_out_joins_exactly_once_after_all_parents() {
    let document = doc(json!({
        "id": "fanout", "displayName": "Fanout", "startNode": "start",
        "nodes": [
            {"id": "start", "actionType": "test.work", "edges": [
                {"targetNode": "parallel-a"},
                {"targetNode": "parallel-b"},
                {"targetNode": "parallel-c"}
            ]},
            {"id": "parallel-a", "actionType": "test.work", "edges": [{"targetNode": "join"}]},
            {"id": "parallel-b", "actionType": "test.work", "edges": [{"targetNode": "join"}]},
            {"id": "parallel-c", "actionType": "test.work", "edges": [{"targetNode": "join"}]},
            {"id": "join", "actionType": "test.work"}
        ]
    }));

    let executor = Arc::new(ScriptedExecutor::new());
    let (conductor, stores) =
        conductor_harness(&document, executor.clone(), test_config()).await;
    let (execution, attempts) =
        run_to_completion(&conductor, &stores, document, json!({}), json!({})).await;

    assert_eq!(execution.status, ExecutionStatus::Succeeded);
    let join_rows: Vec<_> = attempts.iter().filter(|a| a.node_id == "join").collect();
    assert_eq!(join_rows.len(), 1, "join must run exactly once");
    assert_eq!(join_rows[0].status, ActionStatus::Succeeded);

    // The join starts only after every parent finished
    let join_start = join_rows[0].start_time.unwrap();
    for parent in ["parallel-a", "parallel-b", "parallel-c"] {
        let row = attempts.iter().find(|a| a.node_id == parent).unwrap();
        assert_eq!(row.status, ActionStatus::Succeeded);
        assert!(row.end_time.unwrap() <= join_start);
    }
}

#[tokio::test]
async fn conditional_branch_follows_the_outputs() {
    let document = doc(json!({
        "id": "branching", "displayName": "Branching", "startNode": "check-status",
        "nodes": [
            {"id": "check-status", "actionType": "test.check", "edges": [
                {"targetNode": "approved-path",
                 "condition": "context.data['check-status'].status === 'approved'"},
                {"targetNode": "rejected-path",
                 "condition": "context.data['check-status'].status === 'rejected'"}
            ]},
            {"id": "approved-path", "actionType": "test.work"},
            {"id": "rejected-path", "actionType": "test.work"}
        ]
    }));

    let executor = Arc::new(ScriptedExecutor::new());
    let mut outputs = serde_json::Map::new();
    outputs.insert("status".to_string(), json!("approved"));
    executor.script("check-status", vec![ActionResult::succeeded(outputs)]);

    let (conductor, stores) =
        conductor_harness(&document, executor.clone(), test_config()).await;
    let (execution, attempts) =
        run_to_completion(&conductor, &stores, document, json!({}), json!({})).await;

    assert_eq!(execution.status, ExecutionStatus::Succeeded);
    assert!(attempts.iter().any(|a| a.node_id == "approved-path"));
    assert!(
        !attempts.iter().any(|a| a.node_id == "rejected-path"),
        "the unsatisfied branch must not run"
    );
}

#[tokio::test]
async fn retries_reuse_first_attempt_parameters_byte_for_byte() {
    let document = doc(json!({
        "id": "flaky", "displayName": "Flaky", "startNode": "flake",
        "nodes": [
            {"id": "flake", "actionType": "test.flaky",
             "parameters": {"x": "{{trigger.id}}"},
             "policies": {"rerenderOnRetry": false}}
        ]
    }));

    let executor = Arc::new(ScriptedExecutor::new());
    executor.script(
        "flake",
        vec![
            ActionResult::retriable("busy"),
            ActionResult::retriable("busy"),
            ActionResult::succeeded(serde_json::Map::new()),
        ],
    );

    let (conductor, stores) =
        conductor_harness(&document, executor.clone(), test_config()).await;
    let (execution, attempts) =
        run_to_completion(&conductor, &stores, document, json!({"id": "abc"}), json!({})).await;

    assert_eq!(execution.status, ExecutionStatus::Succeeded);
    assert_eq!(attempts.len(), 3);
    for (index, row) in attempts.iter().enumerate() {
        assert_eq!(row.attempt, index as i32 + 1);
        assert_eq!(row.retry_count, index as i32);
        assert_eq!(
            row.parameters_json.as_deref(),
            Some(r#"{"x":"abc"}"#),
            "every attempt must carry attempt 1's bytes"
        );
    }
    assert_eq!(attempts[0].status, ActionStatus::RetriableFailure);
    assert_eq!(attempts[1].status, ActionStatus::RetriableFailure);
    assert_eq!(attempts[2].status, ActionStatus::Succeeded);
}

#[tokio::test]
async fn rerender_on_retry_sees_fresh_context() {
    // With rerenderOnRetry=true the parameters are rendered per attempt;
    // the executor still receives identical values here, but the recorded
    // rows come from fresh renders rather than replay.
    let document = doc(json!({
        "id": "rerender", "displayName": "Rerender", "startNode": "flake",
        "nodes": [
            {"id": "flake", "actionType": "test.flaky",
             "parameters": {"x": "{{trigger.id}}"},
             "policies": {"rerenderOnRetry": true}}
        ]
    }));

    let executor = Arc::new(ScriptedExecutor::new());
    executor.script(
        "flake",
        vec![
            ActionResult::retriable("busy"),
            ActionResult::succeeded(serde_json::Map::new()),
        ],
    );

    let (conductor, stores) =
        conductor_harness(&document, executor.clone(), test_config()).await;
    let (execution, attempts) =
        run_to_completion(&conductor, &stores, document, json!({"id": "abc"}), json!({})).await;

    assert_eq!(execution.status, ExecutionStatus::Succeeded);
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[1].parameters_json.as_deref(), Some(r#"{"x":"abc"}"#));
}

#[tokio::test]
async fn fatal_failure_cancels_unstarted_siblings() {
    let document = doc(json!({
        "id": "fatal", "displayName": "Fatal", "startNode": "start",
        "nodes": [
            {"id": "start", "actionType": "test.work", "edges": [
                {"targetNode": "boom"},
                {"targetNode": "slow-b"},
                {"targetNode": "slow-c"}
            ]},
            {"id": "boom", "actionType": "test.boom"},
            {"id": "slow-b", "actionType": "test.work"},
            {"id": "slow-c", "actionType": "test.work"}
        ]
    }));

    let executor = Arc::new(ScriptedExecutor::new());
    executor.script("boom", vec![ActionResult::failed("exploded")]);

    // One worker slot: 'boom' fails before the siblings can start
    let mut config = test_config();
    config.max_parallel_actions = 1;

    let (conductor, stores) = conductor_harness(&document, executor.clone(), config).await;
    let (execution, attempts) =
        run_to_completion(&conductor, &stores, document, json!({}), json!({})).await;

    assert_eq!(execution.status, ExecutionStatus::Failed);
    let boom = attempts.iter().find(|a| a.node_id == "boom").unwrap();
    assert_eq!(boom.status, ActionStatus::Failed);
    for sibling in ["slow-b", "slow-c"] {
        let rows: Vec<_> = attempts.iter().filter(|a| a.node_id == sibling).collect();
        assert!(
            rows.is_empty() || rows.iter().all(|r| r.status == ActionStatus::Skipped),
            "unstarted siblings must have no rows or only Skipped rows"
        );
    }
}

#[tokio::test]
async fn retries_stop_at_max_attempts_and_keep_the_last_error() {
    let document = doc(json!({
        "id": "exhausted", "displayName": "Exhausted", "startNode": "flake",
        "nodes": [{"id": "flake", "actionType": "test.flaky"}]
    }));

    let executor = Arc::new(ScriptedExecutor::new());
    executor.script(
        "flake",
        vec![
            ActionResult::retriable("first"),
            ActionResult::retriable("second"),
            ActionResult::retriable("third"),
        ],
    );

    let (conductor, stores) =
        conductor_harness(&document, executor.clone(), test_config()).await;
    let (execution, attempts) =
        run_to_completion(&conductor, &stores, document, json!({}), json!({})).await;

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(attempts.len(), 3, "no attempts beyond the budget");
    let last = &attempts[2];
    assert_eq!(last.status, ActionStatus::Failed);
    assert_eq!(last.error.as_ref().unwrap()["message"], json!("third"));
}

#[tokio::test]
async fn first_match_emits_only_the_first_satisfied_edge() {
    let document = doc(json!({
        "id": "first-match", "displayName": "First match", "startNode": "router",
        "nodes": [
            {"id": "router", "actionType": "test.work", "routePolicy": "firstMatch", "edges": [
                {"targetNode": "one"},
                {"targetNode": "two"}
            ]},
            {"id": "one", "actionType": "test.work"},
            {"id": "two", "actionType": "test.work"}
        ]
    }));

    let executor = Arc::new(ScriptedExecutor::new());
    let (conductor, stores) =
        conductor_harness(&document, executor.clone(), test_config()).await;
    let (execution, attempts) =
        run_to_completion(&conductor, &stores, document, json!({}), json!({})).await;

    assert_eq!(execution.status, ExecutionStatus::Succeeded);
    assert!(attempts.iter().any(|a| a.node_id == "one"));
    assert!(!attempts.iter().any(|a| a.node_id == "two"));
}

#[tokio::test]
async fn first_match_with_no_satisfied_edge_ends_the_branch() {
    let document = doc(json!({
        "id": "no-match", "displayName": "No match", "startNode": "router",
        "nodes": [
            {"id": "router", "actionType": "test.work", "routePolicy": "firstMatch", "edges": [
                {"targetNode": "one", "condition": "trigger.kind === 'a'"},
                {"targetNode": "two", "condition": "trigger.kind === 'b'"}
            ]},
            {"id": "one", "actionType": "test.work"},
            {"id": "two", "actionType": "test.work"}
        ]
    }));

    let executor = Arc::new(ScriptedExecutor::new());
    let (conductor, stores) =
        conductor_harness(&document, executor.clone(), test_config()).await;
    let (execution, attempts) = run_to_completion(
        &conductor,
        &stores,
        document,
        json!({"kind": "neither"}),
        json!({}),
    )
    .await;

    assert_eq!(execution.status, ExecutionStatus::Succeeded);
    assert_eq!(attempts.len(), 1, "only the router itself ran");
}

#[tokio::test]
async fn on_failure_handler_contains_the_failure() {
    let document = doc(json!({
        "id": "handled", "displayName": "Handled", "startNode": "risky",
        "nodes": [
            {"id": "risky", "actionType": "test.boom", "onFailure": "cleanup"},
            {"id": "cleanup", "actionType": "test.work"}
        ]
    }));

    let executor = Arc::new(ScriptedExecutor::new());
    executor.script(
        "risky",
        vec![
            ActionResult::failed("exploded"),
        ],
    );

    let (conductor, stores) =
        conductor_harness(&document, executor.clone(), test_config()).await;
    let (execution, attempts) =
        run_to_completion(&conductor, &stores, document, json!({}), json!({})).await;

    assert_eq!(execution.status, ExecutionStatus::Succeeded);
    assert!(attempts.iter().any(|a| a.node_id == "cleanup"));
}

#[tokio::test]
async fn failure_edges_route_failures_instead_of_aborting() {
    let document = doc(json!({
        "id": "failure-edge", "displayName": "Failure edge", "startNode": "risky",
        "nodes": [
            {"id": "risky", "actionType": "test.boom", "edges": [
                {"targetNode": "recover", "when": "failure"},
                {"targetNode": "celebrate", "when": "success"}
            ]},
            {"id": "recover", "actionType": "test.work"},
            {"id": "celebrate", "actionType": "test.work"}
        ]
    }));

    let executor = Arc::new(ScriptedExecutor::new());
    executor.script("risky", vec![ActionResult::failed("exploded")]);

    let (conductor, stores) =
        conductor_harness(&document, executor.clone(), test_config()).await;
    let (execution, attempts) =
        run_to_completion(&conductor, &stores, document, json!({}), json!({})).await;

    assert_eq!(execution.status, ExecutionStatus::Succeeded);
    assert!(attempts.iter().any(|a| a.node_id == "recover"));
    assert!(!attempts.iter().any(|a| a.node_id == "celebrate"));
}

#[tokio::test]
async fn joins_resolve_when_a_parent_branch_never_runs() {
    // Diamond where one branch is condition-skipped: the join still fires
    // off the surviving branch once both incoming edges are decided.
    let document = doc(json!({
        "id": "diamond", "displayName": "Diamond", "startNode": "start",
        "nodes": [
            {"id": "start", "actionType": "test.work", "edges": [
                {"targetNode": "skipped", "condition": "trigger.take === 'other'"},
                {"targetNode": "taken"}
            ]},
            {"id": "skipped", "actionType": "test.work", "edges": [{"targetNode": "join"}]},
            {"id": "taken", "actionType": "test.work", "edges": [{"targetNode": "join"}]},
            {"id": "join", "actionType": "test.work"}
        ]
    }));

    let executor = Arc::new(ScriptedExecutor::new());
    let (conductor, stores) =
        conductor_harness(&document, executor.clone(), test_config()).await;
    let (execution, attempts) = run_to_completion(
        &conductor,
        &stores,
        document,
        json!({"take": "this"}),
        json!({}),
    )
    .await;

    assert_eq!(execution.status, ExecutionStatus::Succeeded);
    assert!(!attempts.iter().any(|a| a.node_id == "skipped"));
    assert_eq!(
        attempts.iter().filter(|a| a.node_id == "join").count(),
        1,
        "the join fires exactly once off the surviving branch"
    );
}

#[tokio::test]
async fn connector_reported_skip_ends_the_branch_without_retry() {
    // A real connector runtime reports Skipped over HTTP 200; the conductor
    // must take it as terminal, leave the outgoing edges unsatisfied and
    // never retry.
    struct SkipAction;

    #[async_trait::async_trait]
    impl trellis_connector::ConnectorAction for SkipAction {
        fn descriptor(&self) -> trellis_contracts::ActionCatalogEntry {
            common::catalog_entry("audit.skip")
        }

        async fn execute(
            &self,
            _parameters: serde_json::Map<String, serde_json::Value>,
            _context: trellis_contracts::ExecutionContext,
        ) -> trellis_connector::ConnectorResult<ActionResult> {
            Ok(ActionResult::skipped())
        }
    }

    let runtime = Arc::new(
        trellis_connector::ConnectorRuntime::new("audit").with_action(Arc::new(SkipAction)),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, runtime.router()).await.unwrap();
    });

    let document = doc(json!({
        "id": "skip-branch", "displayName": "Skip branch", "startNode": "audit",
        "nodes": [
            {"id": "audit", "actionType": "audit.skip", "edges": [{"targetNode": "after"}]},
            {"id": "after", "actionType": "core.echo", "parameters": {"message": "hi"}}
        ]
    }));

    let stores = trellis_engine::store::Stores::in_memory();
    common::seed_catalog_for(&stores, &document).await;
    let registry = Arc::new(trellis_engine::catalog::ActionCatalogRegistry::new(
        stores.catalog.clone(),
    ));
    registry.refresh().await.unwrap();
    let mut urls = std::collections::HashMap::new();
    urls.insert("audit".to_string(), format!("http://{}", addr));
    let executor = Arc::new(DispatchingExecutor::new(
        Arc::new(LocalActionRegistry::with_builtins()),
        Arc::clone(&registry),
        RemoteActionExecutor::new(Duration::from_secs(2)).unwrap(),
        urls,
    ));
    let conductor = trellis_engine::conductor::Conductor::new(
        stores.clone(),
        executor,
        registry,
        Arc::new(test_config()),
    );

    let (execution, attempts) =
        run_to_completion(&conductor, &stores, document, json!({}), json!({})).await;

    assert_eq!(execution.status, ExecutionStatus::Succeeded);
    let audit_rows: Vec<_> = attempts.iter().filter(|a| a.node_id == "audit").collect();
    assert_eq!(audit_rows.len(), 1, "a reported skip is terminal, not retried");
    assert_eq!(audit_rows[0].status, ActionStatus::Skipped);
    assert!(
        !attempts.iter().any(|a| a.node_id == "after"),
        "a skipped node leaves its outgoing edges unsatisfied"
    );
}

#[tokio::test]
async fn in_flight_nodes_never_exceed_the_semaphore() {
    let nodes: Vec<_> = (0..8)
        .map(|i| json!({"id": format!("n{}", i), "actionType": "test.work"}))
        .collect();
    let mut all = vec![json!({
        "id": "start", "actionType": "test.work",
        "edges": (0..8).map(|i| json!({"targetNode": format!("n{}", i)})).collect::<Vec<_>>()
    })];
    all.extend(nodes);
    let document = doc(json!({
        "id": "bounded", "displayName": "Bounded", "startNode": "start", "nodes": all
    }));

    let executor = Arc::new(ScriptedExecutor::with_delay(Duration::from_millis(25)));
    let mut config = test_config();
    config.max_parallel_actions = 2;

    let (conductor, stores) = conductor_harness(&document, executor.clone(), config).await;
    let (execution, attempts) =
        run_to_completion(&conductor, &stores, document, json!({}), json!({})).await;

    assert_eq!(execution.status, ExecutionStatus::Succeeded);
    assert_eq!(attempts.len(), 9);
    assert!(
        executor.max_in_flight.load(Ordering::SeqCst) <= 2,
        "concurrency must stay within MaxParallelActions"
    );
}

#[tokio::test]
async fn workflow_timeout_cancels_the_run() {
    let document = doc(json!({
        "id": "slow", "displayName": "Slow", "startNode": "slow",
        "nodes": [{"id": "slow", "actionType": "test.work"}]
    }));

    let executor = Arc::new(ScriptedExecutor::with_delay(Duration::from_millis(500)));
    let mut config = test_config();
    config.default_workflow_timeout = Duration::from_millis(50);

    let (conductor, stores) = conductor_harness(&document, executor.clone(), config).await;
    let (execution, _attempts) =
        run_to_completion(&conductor, &stores, document, json!({}), json!({})).await;

    assert_eq!(execution.status, ExecutionStatus::Cancelled);
    assert!(execution.end_time.is_some());
}

#[tokio::test]
async fn strict_template_failures_exhaust_retries_then_fail() {
    let document = doc(json!({
        "id": "bad-template", "displayName": "Bad template", "startNode": "render",
        "nodes": [
            {"id": "render", "actionType": "test.work",
             "parameters": {"x": "{{trigger.absent}}"}}
        ]
    }));

    let executor = Arc::new(ScriptedExecutor::new());
    let (conductor, stores) =
        conductor_harness(&document, executor.clone(), test_config()).await;
    let (execution, attempts) =
        run_to_completion(&conductor, &stores, document, json!({}), json!({})).await;

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(attempts.len(), 3);
    assert_eq!(attempts[0].status, ActionStatus::RetriableFailure);
    assert_eq!(attempts[2].status, ActionStatus::Failed);
    assert!(attempts[2].error.as_ref().unwrap()["message"]
        .as_str()
        .unwrap()
        .contains("template render failed"));
    assert!(
        executor.calls.lock().is_empty(),
        "nothing may dispatch when rendering fails"
    );
}
