//! End-to-end loop behavior over scripted collaborators.

use orchestrator::collaborators::{CollaboratorReply, EvaluationVerdict, StructuredResult, Subtask};
use orchestrator::config::EngineConfig;
use orchestrator::core::{OverallOutcome, RecommendedAction};
use orchestrator::engine::Engine;
use orchestrator::looping::{LoopStop, run_loop};
use orchestrator::managers::NodeUpdate;
use orchestrator::step::StepAdvance;
use orchestrator::store::CancelToken;
use orchestrator::test_support::{scripted_set, uniform_set};
use orchestrator::tree::NodeStatus;
use orchestrator::types::TaskStatus;
use serde_json::json;

fn engine_with_task() -> Engine {
    let engine = Engine::new(EngineConfig::default());
    engine
        .begin_task("task-1", "list all users", "app_db", None)
        .expect("begin task");
    engine
}

fn structured(result: StructuredResult) -> CollaboratorReply {
    CollaboratorReply::Structured(result)
}

fn good_evaluation() -> CollaboratorReply {
    structured(StructuredResult::Evaluation {
        verdict: EvaluationVerdict::Good,
        payload: json!({"verdict": "good"}),
    })
}

#[test]
fn single_node_happy_path_completes_in_three_steps() {
    let engine = engine_with_task();
    let collaborators = uniform_set(EvaluationVerdict::Good);

    let outcome = run_loop(&engine, &collaborators, &CancelToken::new(), |_| {})
        .expect("loop");
    // Link, generate, evaluate: one dispatch per step.
    assert_eq!(outcome.iterations, 3);
    assert_eq!(outcome.stop, LoopStop::Complete(OverallOutcome::Success));

    // Well inside the per-node dispatch budget.
    let max_retries = engine.config().max_retries;
    assert!(outcome.iterations <= max_retries + 1);

    assert!(engine.context().is_completed().expect("completed"));
    let root = engine.tree().get_node("root").expect("get").expect("root");
    assert_eq!(root.status, NodeStatus::Good);
    assert!(root.generation_result.is_some());
}

#[test]
fn decomposition_processes_parent_before_children_in_order() {
    let engine = engine_with_task();
    let collaborators = scripted_set(vec![
        structured(StructuredResult::SchemaLinking(json!({"tables": ["users", "orders"]}))),
        structured(StructuredResult::Decomposition {
            payload: json!({"plan": "split by table"}),
            subtasks: vec![
                Subtask {
                    intent: "count users".to_string(),
                    evidence: None,
                },
                Subtask {
                    intent: "count orders".to_string(),
                    evidence: None,
                },
            ],
        }),
        structured(StructuredResult::Generation(json!({"artifact": "root"}))),
        good_evaluation(),
        structured(StructuredResult::SchemaLinking(json!({"tables": ["users"]}))),
        structured(StructuredResult::Generation(json!({"artifact": "q1"}))),
        good_evaluation(),
        structured(StructuredResult::SchemaLinking(json!({"tables": ["orders"]}))),
        structured(StructuredResult::Generation(json!({"artifact": "q2"}))),
        good_evaluation(),
    ]);

    let mut steps: Vec<(String, RecommendedAction)> = Vec::new();
    let outcome = run_loop(&engine, &collaborators, &CancelToken::new(), |step: &StepAdvance| {
        steps.push((step.node_id.clone(), step.action));
    })
    .expect("loop");

    assert_eq!(outcome.stop, LoopStop::Complete(OverallOutcome::Success));
    assert_eq!(outcome.iterations, 10);

    let visited: Vec<&str> = steps.iter().map(|(node_id, _)| node_id.as_str()).collect();
    // The root stays in focus until it goes good, then children in creation
    // order.
    assert_eq!(
        visited,
        vec![
            "root", "root", "root", "root", "node-1", "node-1", "node-1", "node-2", "node-2",
            "node-2",
        ]
    );
    assert_eq!(steps[1].1, RecommendedAction::NeedsGeneration);

    for node_id in ["root", "node-1", "node-2"] {
        let node = engine.tree().get_node(node_id).expect("get").expect("node");
        assert_eq!(node.status, NodeStatus::Good);
    }
}

#[test]
fn parse_failure_consumes_one_retry_then_recovers() {
    let engine = engine_with_task();
    let collaborators = scripted_set(vec![
        structured(StructuredResult::SchemaLinking(json!({}))),
        structured(StructuredResult::Generation(json!({"artifact": "q1"}))),
        CollaboratorReply::ParseFailure("truncated reply".to_string()),
        structured(StructuredResult::Generation(json!({"artifact": "q2"}))),
        good_evaluation(),
    ]);

    let outcome = run_loop(&engine, &collaborators, &CancelToken::new(), |_| {})
        .expect("loop");
    assert_eq!(outcome.stop, LoopStop::Complete(OverallOutcome::Success));
    assert_eq!(outcome.iterations, 5);

    assert_eq!(engine.history().get_retry_count("root").expect("count"), 1);
    let root = engine.tree().get_node("root").expect("get").expect("root");
    assert_eq!(root.status, NodeStatus::Good);
    assert_eq!(root.generation_result, Some(json!({"artifact": "q2"})));
}

#[test]
fn persistent_bad_evaluations_exhaust_retries_and_fail() {
    let engine = engine_with_task();
    let collaborators = uniform_set(EvaluationVerdict::Bad);

    let outcome = run_loop(&engine, &collaborators, &CancelToken::new(), |_| {})
        .expect("loop");
    assert_eq!(outcome.stop, LoopStop::Complete(OverallOutcome::Failure));
    // Worst case for one node: one schema link, then a generate/evaluate
    // pair per consumed retry. Termination does not depend on the ceiling.
    let max_retries = engine.config().max_retries;
    assert_eq!(outcome.iterations, 1 + 2 * max_retries);
    assert!(outcome.iterations < engine.config().max_iterations);

    assert!(engine.context().is_failed().expect("failed"));
    let root = engine.tree().get_node("root").expect("get").expect("root");
    assert_eq!(root.status, NodeStatus::RetriesExhausted);
    assert_eq!(
        engine.history().get_retry_count("root").expect("count"),
        engine.config().max_retries
    );
}

#[test]
fn good_root_with_exhausted_child_is_partial() {
    let engine = engine_with_task();
    engine
        .tree()
        .update_node("root", &NodeUpdate::status(NodeStatus::Good))
        .expect("root good");
    engine
        .tree()
        .add_node("root", "count users", None)
        .expect("add child");

    let collaborators = uniform_set(EvaluationVerdict::Bad);
    let outcome = run_loop(&engine, &collaborators, &CancelToken::new(), |_| {})
        .expect("loop");

    assert_eq!(outcome.stop, LoopStop::Complete(OverallOutcome::Partial));
    assert!(engine.context().is_completed().expect("completed"));
    let child = engine.tree().get_node("node-1").expect("get").expect("child");
    assert_eq!(child.status, NodeStatus::RetriesExhausted);
}

#[test]
fn pre_cancelled_token_stops_before_any_dispatch() {
    let engine = engine_with_task();
    let cancel = CancelToken::new();
    cancel.cancel();

    let collaborators = uniform_set(EvaluationVerdict::Good);
    let outcome = run_loop(&engine, &collaborators, &cancel, |_| {}).expect("loop");

    assert_eq!(outcome.iterations, 0);
    assert_eq!(outcome.stop, LoopStop::Cancelled);

    // Cancellation leaves the task mid-flight, not failed.
    assert_eq!(
        engine.context().status().expect("status"),
        Some(TaskStatus::Processing)
    );
    let root = engine.tree().get_node("root").expect("get").expect("root");
    assert_eq!(root.status, NodeStatus::NoResult);
    assert!(root.schema_linking_result.is_none());
}

#[test]
fn iteration_ceiling_fails_the_task() {
    let config = EngineConfig {
        max_iterations: 2,
        ..EngineConfig::default()
    };
    let engine = Engine::new(config);
    engine
        .begin_task("task-1", "list all users", "app_db", None)
        .expect("begin task");

    let collaborators = uniform_set(EvaluationVerdict::Good);
    let outcome = run_loop(&engine, &collaborators, &CancelToken::new(), |_| {})
        .expect("loop");

    assert_eq!(
        outcome.stop,
        LoopStop::IterationLimitExceeded {
            iterations: 2,
            max_iterations: 2,
        }
    );
    assert!(engine.context().is_failed().expect("failed"));
}

#[test]
fn collaborator_failure_aborts_the_loop_and_fails_the_task() {
    let engine = engine_with_task();
    // Empty script: the first dispatch is an infrastructure failure.
    let collaborators = scripted_set(vec![]);

    let err = run_loop(&engine, &collaborators, &CancelToken::new(), |_| {})
        .expect_err("loop should abort");
    let fatal = err
        .downcast_ref::<orchestrator::step::FatalStepError>()
        .expect("fatal step error");
    assert_eq!(fatal.report.focus_node_id.as_deref(), Some("root"));
    assert!(engine.context().is_failed().expect("failed"));
}

#[test]
fn exported_store_round_trips_through_a_file() {
    let engine = engine_with_task();
    let collaborators = uniform_set(EvaluationVerdict::Good);
    run_loop(&engine, &collaborators, &CancelToken::new(), |_| {}).expect("loop");

    let exported = engine.store().export();
    assert!(exported.contains_key("taskContext"));
    assert!(exported.contains_key("taskTree"));
    assert!(exported.contains_key("nodeHistory"));

    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("store.json");
    let raw = serde_json::to_string_pretty(&exported).expect("serialize");
    std::fs::write(&path, raw).expect("write");

    let loaded: std::collections::BTreeMap<String, Vec<orchestrator::store::ExportedVersion>> =
        serde_json::from_str(&std::fs::read_to_string(&path).expect("read")).expect("deserialize");
    assert_eq!(loaded, exported);

    // The tree record was written once per mutation; every version survives.
    assert!(loaded["taskTree"].len() > 1);
}
