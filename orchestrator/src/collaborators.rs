//! Trait seams for the opaque external reasoning components.
//!
//! The engine never embeds reasoning logic; collaborators are injected
//! strategies with a request/response contract. A collaborator either returns
//! a tagged structured result or a parse failure; the loop's control flow
//! stays uniform regardless of how individual collaborators fail.

use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::status::RecommendedAction;
use crate::tree::Node;
use crate::types::{NodeOperation, SchemaDescription, TaskContext};

/// Quality verdict produced by an evaluation-kind collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvaluationVerdict {
    Good,
    Bad,
}

/// A child sub-task requested through a decomposition result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtask {
    pub intent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
}

/// Tagged structured result. The payloads stay opaque to the engine; the tag
/// tells the step driver which result slot and status transition to apply.
#[derive(Debug, Clone, PartialEq)]
pub enum StructuredResult {
    /// Written to the node's schema-linking slot.
    SchemaLinking(Value),
    /// Written to the node's decomposition slot; `subtasks` become children.
    Decomposition { payload: Value, subtasks: Vec<Subtask> },
    /// Written to the node's generation slot; the node then awaits evaluation.
    Generation(Value),
    /// Written to the node's evaluation slot; the verdict decides good/bad.
    Evaluation { verdict: EvaluationVerdict, payload: Value },
}

/// What a reasoning collaborator hands back: a structured result, or a parse
/// failure recovered locally as a bad evaluation (never fatal to the loop).
#[derive(Debug, Clone, PartialEq)]
pub enum CollaboratorReply {
    Structured(StructuredResult),
    ParseFailure(String),
}

/// Context assembled for a collaborator invocation, strictly through manager
/// getters (never raw store access).
#[derive(Debug, Clone)]
pub struct NodeContext {
    pub node: Node,
    pub task: Option<TaskContext>,
    pub schema: Option<SchemaDescription>,
    pub retry_count: u32,
    pub history: Vec<NodeOperation>,
    /// Configured timeout for evaluation-kind collaborators to hand to their
    /// [`ExecutionCollaborator`].
    pub execution_timeout: Duration,
}

/// External reasoning component, one per recommended-action kind.
///
/// An `Err` from `invoke` is an infrastructure failure and aborts the loop; a
/// malformed model output must be reported as
/// [`CollaboratorReply::ParseFailure`] instead.
pub trait ReasoningCollaborator {
    fn invoke(&self, context: &NodeContext) -> Result<CollaboratorReply>;
}

/// External reader producing the data-schema description for a target.
/// Consumed once by the schema cache manager.
pub trait SchemaSource {
    fn load_schema(&self, target_name: &str) -> Result<SchemaDescription>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Error,
}

/// Result of executing a generated artifact against the target. Opaque to the
/// engine beyond `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutcome {
    pub status: ExecutionStatus,
    #[serde(default)]
    pub rows: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// External execution backend, consumed by evaluation-kind collaborators.
pub trait ExecutionCollaborator {
    fn execute(
        &self,
        artifact: &Value,
        target_name: &str,
        timeout: Duration,
    ) -> Result<ExecutionOutcome>;
}

/// One reasoning collaborator per recommended-action kind.
pub struct CollaboratorSet {
    pub schema_linking: Box<dyn ReasoningCollaborator>,
    pub generation: Box<dyn ReasoningCollaborator>,
    pub evaluation: Box<dyn ReasoningCollaborator>,
    pub regeneration: Box<dyn ReasoningCollaborator>,
}

impl CollaboratorSet {
    pub fn for_action(&self, action: RecommendedAction) -> &dyn ReasoningCollaborator {
        match action {
            RecommendedAction::NeedsSchemaLinking => self.schema_linking.as_ref(),
            RecommendedAction::NeedsGeneration => self.generation.as_ref(),
            RecommendedAction::NeedsEvaluation => self.evaluation.as_ref(),
            RecommendedAction::NeedsRegeneration => self.regeneration.as_ref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FixedExecutor;
    use serde_json::json;

    /// Evaluator that turns an execution outcome into a verdict, the way a
    /// real evaluation collaborator consumes its execution backend.
    struct ExecutingEvaluator {
        executor: FixedExecutor,
    }

    impl ReasoningCollaborator for ExecutingEvaluator {
        fn invoke(&self, context: &NodeContext) -> Result<CollaboratorReply> {
            let artifact = context
                .node
                .generation_result
                .clone()
                .unwrap_or(Value::Null);
            let outcome = self
                .executor
                .execute(&artifact, "app_db", context.execution_timeout)?;
            let verdict = match outcome.status {
                ExecutionStatus::Success => EvaluationVerdict::Good,
                ExecutionStatus::Error => EvaluationVerdict::Bad,
            };
            Ok(CollaboratorReply::Structured(StructuredResult::Evaluation {
                verdict,
                payload: serde_json::to_value(&outcome)?,
            }))
        }
    }

    fn context() -> NodeContext {
        let mut node = crate::tree::Node::new("root", "goal", None, None);
        node.generation_result = Some(json!({"artifact": "q"}));
        NodeContext {
            node,
            task: None,
            schema: None,
            retry_count: 0,
            history: Vec::new(),
            execution_timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn evaluator_maps_execution_status_to_verdict() {
        let good = ExecutingEvaluator {
            executor: FixedExecutor::success(vec![json!({"count": 3})]),
        };
        match good.invoke(&context()).expect("invoke") {
            CollaboratorReply::Structured(StructuredResult::Evaluation { verdict, .. }) => {
                assert_eq!(verdict, EvaluationVerdict::Good);
            }
            other => panic!("unexpected reply: {other:?}"),
        }

        let bad = ExecutingEvaluator {
            executor: FixedExecutor::error("no such column"),
        };
        match bad.invoke(&context()).expect("invoke") {
            CollaboratorReply::Structured(StructuredResult::Evaluation { verdict, payload }) => {
                assert_eq!(verdict, EvaluationVerdict::Bad);
                assert_eq!(payload["error"], "no such column");
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[test]
    fn execution_outcome_wire_format() {
        let outcome = ExecutionOutcome {
            status: ExecutionStatus::Success,
            rows: vec![json!({"id": 1})],
            error: None,
        };
        let value = serde_json::to_value(&outcome).expect("serialize");
        assert_eq!(value["status"], "success");
        assert!(value.get("error").is_none());
        let loaded: ExecutionOutcome = serde_json::from_value(value).expect("deserialize");
        assert_eq!(loaded, outcome);
    }
}
