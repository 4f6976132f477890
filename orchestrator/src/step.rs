//! One orchestration step: analyze, dispatch one collaborator, apply the
//! result through the managers.

use std::fmt;

use anyhow::{Context, Result};
use serde_json::json;

use crate::checker::check_status;
use crate::collaborators::{
    CollaboratorReply, CollaboratorSet, EvaluationVerdict, NodeContext, StructuredResult,
};
use crate::core::{OverallOutcome, RecommendedAction, StatusReport};
use crate::engine::Engine;
use crate::error::TreeError;
use crate::managers::NodeUpdate;
use crate::tree::NodeStatus;
use crate::types::NodeOperationType;

/// What one step did to the tree.
#[derive(Debug, Clone, PartialEq)]
pub enum AppliedResult {
    SchemaLinked,
    Decomposed { children: Vec<String> },
    Generated,
    Evaluated { verdict: EvaluationVerdict },
    ParseFailure { message: String },
}

/// A step that dispatched a collaborator and applied its reply.
#[derive(Debug, Clone, PartialEq)]
pub struct StepAdvance {
    pub node_id: String,
    pub action: RecommendedAction,
    pub applied: AppliedResult,
}

/// Result of one step: either the task is already complete, or the tree
/// advanced by exactly one applied collaborator reply.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Complete(OverallOutcome),
    Advanced(StepAdvance),
}

/// Infrastructure failure raised after the status analysis succeeded. Carries
/// the report so callers can see where the loop stood when it died.
pub struct FatalStepError {
    pub report: StatusReport,
    pub source: anyhow::Error,
}

impl fmt::Debug for FatalStepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FatalStepError")
            .field("report", &self.report)
            .field("source", &self.source)
            .finish()
    }
}

impl fmt::Display for FatalStepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.report.focus_node_id {
            Some(node_id) => write!(f, "step failed at node '{node_id}': {}", self.source),
            None => write!(f, "step failed: {}", self.source),
        }
    }
}

impl std::error::Error for FatalStepError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// Run one step: check status, and when work remains, dispatch the matching
/// collaborator for the focus node and apply its reply.
///
/// An `Err` from the collaborator or from applying its reply is wrapped in
/// [`FatalStepError`] and aborts the step without retry accounting; a parse
/// failure reply is recovered as a bad evaluation instead.
pub fn run_step(engine: &Engine, collaborators: &CollaboratorSet) -> Result<StepOutcome> {
    let report = check_status(engine)?;
    if report.complete {
        let outcome = report
            .overall_outcome
            .ok_or_else(|| anyhow::anyhow!("complete report without outcome"))?;
        return Ok(StepOutcome::Complete(outcome));
    }

    let (node_id, action) = match (&report.focus_node_id, report.recommended_action) {
        (Some(node_id), Some(action)) => (node_id.clone(), action),
        _ => return Err(anyhow::anyhow!("incomplete report without focus or action")),
    };

    let step = dispatch(engine, collaborators, &node_id, action);
    step.map_err(|source| {
        FatalStepError {
            report: report.clone(),
            source,
        }
        .into()
    })
}

fn dispatch(
    engine: &Engine,
    collaborators: &CollaboratorSet,
    node_id: &str,
    action: RecommendedAction,
) -> Result<StepOutcome> {
    let context = assemble_context(engine, node_id)?;
    tracing::info!(node_id, ?action, retry_count = context.retry_count, "dispatching collaborator");

    let reply = collaborators
        .for_action(action)
        .invoke(&context)
        .with_context(|| format!("collaborator for {action:?} failed"))?;
    let applied = apply_reply(engine, node_id, action, reply)?;

    Ok(StepOutcome::Advanced(StepAdvance {
        node_id: node_id.to_string(),
        action,
        applied,
    }))
}

/// Collaborator input, assembled strictly through manager getters.
fn assemble_context(engine: &Engine, node_id: &str) -> Result<NodeContext> {
    let node = engine
        .tree()
        .get_node(node_id)?
        .ok_or_else(|| TreeError::NodeNotFound(node_id.to_string()))?;
    Ok(NodeContext {
        node,
        task: engine.context().get_context()?,
        schema: engine.schema().get_schema()?,
        retry_count: engine.history().get_retry_count(node_id)?,
        history: engine.history().get_history(node_id)?,
        execution_timeout: engine.config().execution_timeout(),
    })
}

fn apply_reply(
    engine: &Engine,
    node_id: &str,
    action: RecommendedAction,
    reply: CollaboratorReply,
) -> Result<AppliedResult> {
    let result = match reply {
        CollaboratorReply::Structured(result) => result,
        CollaboratorReply::ParseFailure(message) => {
            return apply_parse_failure(engine, node_id, message);
        }
    };

    match result {
        StructuredResult::SchemaLinking(payload) => {
            engine.tree().update_node(
                node_id,
                &NodeUpdate {
                    schema_linking_result: Some(payload.clone()),
                    ..NodeUpdate::default()
                },
            )?;
            engine
                .history()
                .record(node_id, NodeOperationType::SchemaLink, payload)?;
            Ok(AppliedResult::SchemaLinked)
        }
        StructuredResult::Decomposition { payload, subtasks } => {
            engine.tree().update_node(
                node_id,
                &NodeUpdate {
                    decomposition_result: Some(payload.clone()),
                    ..NodeUpdate::default()
                },
            )?;
            engine
                .history()
                .record(node_id, NodeOperationType::Decompose, payload)?;

            let mut children = Vec::with_capacity(subtasks.len());
            for subtask in subtasks {
                let child_id =
                    engine
                        .tree()
                        .add_node(node_id, &subtask.intent, subtask.evidence.clone())?;
                engine.history().record(
                    &child_id,
                    NodeOperationType::Create,
                    json!({ "intent": subtask.intent }),
                )?;
                children.push(child_id);
            }
            Ok(AppliedResult::Decomposed { children })
        }
        StructuredResult::Generation(payload) => {
            engine.tree().update_node(
                node_id,
                &NodeUpdate {
                    generation_result: Some(payload.clone()),
                    status: Some(NodeStatus::NeedsEvaluation),
                    ..NodeUpdate::default()
                },
            )?;
            let operation = if action == RecommendedAction::NeedsRegeneration {
                NodeOperationType::Revise
            } else {
                NodeOperationType::Generate
            };
            engine.history().record(node_id, operation, payload)?;
            Ok(AppliedResult::Generated)
        }
        StructuredResult::Evaluation { verdict, payload } => {
            let status = match verdict {
                EvaluationVerdict::Good => NodeStatus::Good,
                EvaluationVerdict::Bad => NodeStatus::Bad,
            };
            engine.tree().update_node(
                node_id,
                &NodeUpdate {
                    evaluation_result: Some(payload.clone()),
                    status: Some(status),
                    ..NodeUpdate::default()
                },
            )?;
            engine
                .history()
                .record(node_id, NodeOperationType::Evaluate, payload)?;
            if verdict == EvaluationVerdict::Bad {
                engine.history().increment_retry(node_id)?;
            }
            Ok(AppliedResult::Evaluated { verdict })
        }
    }
}

/// A malformed collaborator reply counts as a bad evaluation: the node goes
/// bad, one retry is consumed, and the loop carries on.
fn apply_parse_failure(engine: &Engine, node_id: &str, message: String) -> Result<AppliedResult> {
    tracing::warn!(node_id, %message, "collaborator reply failed to parse");
    let payload = json!({ "parseFailure": message });
    engine.tree().update_node(
        node_id,
        &NodeUpdate {
            evaluation_result: Some(payload.clone()),
            status: Some(NodeStatus::Bad),
            ..NodeUpdate::default()
        },
    )?;
    engine
        .history()
        .record(node_id, NodeOperationType::Evaluate, payload)?;
    engine.history().increment_retry(node_id)?;
    Ok(AppliedResult::ParseFailure { message })
}
