//! Test-only helpers: deterministic tree constructors, scripted collaborators
//! and a canned schema source.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use anyhow::Result;
use serde_json::{Value, json};

use crate::collaborators::{
    CollaboratorReply, CollaboratorSet, EvaluationVerdict, NodeContext, ReasoningCollaborator,
    SchemaSource, StructuredResult,
};
use crate::tree::{Node, NodeStatus, TaskTree};
use crate::types::{ColumnInfo, ColumnRef, SchemaDescription, TableSchema};

/// Create a deterministic node with the given links and status.
pub fn node_with_status(
    id: &str,
    parent: Option<&str>,
    children: &[&str],
    status: NodeStatus,
) -> Node {
    let mut node = Node::new(
        id,
        &format!("{id} intent"),
        None,
        parent.map(str::to_string),
    );
    node.child_ids = children.iter().map(|child| (*child).to_string()).collect();
    node.status = status;
    node
}

/// Assemble a tree from nodes. The first node is the root.
pub fn tree_of(nodes: Vec<Node>) -> TaskTree {
    let root_id = nodes
        .first()
        .map(|node| node.node_id.clone())
        .unwrap_or_else(|| "root".to_string());
    TaskTree {
        root_id,
        focus_id: None,
        nodes: nodes
            .into_iter()
            .map(|node| (node.node_id.clone(), node))
            .collect(),
    }
}

/// Replays a fixed reply sequence; errors once the script is exhausted, which
/// doubles as a fake infrastructure failure in tests.
#[derive(Debug, Clone)]
pub struct ScriptedCollaborator {
    replies: Rc<RefCell<VecDeque<CollaboratorReply>>>,
}

impl ScriptedCollaborator {
    pub fn new(replies: Vec<CollaboratorReply>) -> Self {
        Self {
            replies: Rc::new(RefCell::new(replies.into_iter().collect())),
        }
    }
}

impl ReasoningCollaborator for ScriptedCollaborator {
    fn invoke(&self, _context: &NodeContext) -> Result<CollaboratorReply> {
        self.replies
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("scripted collaborator exhausted"))
    }
}

/// A collaborator set where all four slots replay one shared script in order,
/// regardless of which action is dispatched.
pub fn scripted_set(replies: Vec<CollaboratorReply>) -> CollaboratorSet {
    let script = ScriptedCollaborator::new(replies);
    CollaboratorSet {
        schema_linking: Box::new(script.clone()),
        generation: Box::new(script.clone()),
        evaluation: Box::new(script.clone()),
        regeneration: Box::new(script),
    }
}

/// Always returns an empty schema-linking result.
#[derive(Debug, Clone, Copy)]
pub struct AlwaysLink;

impl ReasoningCollaborator for AlwaysLink {
    fn invoke(&self, context: &NodeContext) -> Result<CollaboratorReply> {
        Ok(CollaboratorReply::Structured(
            StructuredResult::SchemaLinking(json!({ "node": context.node.node_id })),
        ))
    }
}

/// Always returns a generation result derived from the node id.
#[derive(Debug, Clone, Copy)]
pub struct AlwaysGenerate;

impl ReasoningCollaborator for AlwaysGenerate {
    fn invoke(&self, context: &NodeContext) -> Result<CollaboratorReply> {
        Ok(CollaboratorReply::Structured(StructuredResult::Generation(
            json!({ "artifact": format!("artifact for {}", context.node.node_id) }),
        )))
    }
}

/// Always returns the same evaluation verdict.
#[derive(Debug, Clone, Copy)]
pub struct AlwaysEvaluate(pub EvaluationVerdict);

impl ReasoningCollaborator for AlwaysEvaluate {
    fn invoke(&self, _context: &NodeContext) -> Result<CollaboratorReply> {
        Ok(CollaboratorReply::Structured(StructuredResult::Evaluation {
            verdict: self.0,
            payload: json!({ "verdict": self.0 }),
        }))
    }
}

/// A set that drives every node straight through link, generate and a fixed
/// evaluation verdict.
pub fn uniform_set(verdict: EvaluationVerdict) -> CollaboratorSet {
    CollaboratorSet {
        schema_linking: Box::new(AlwaysLink),
        generation: Box::new(AlwaysGenerate),
        evaluation: Box::new(AlwaysEvaluate(verdict)),
        regeneration: Box::new(AlwaysGenerate),
    }
}

/// Execution backend returning a canned outcome for every artifact.
#[derive(Debug, Clone)]
pub struct FixedExecutor {
    outcome: crate::collaborators::ExecutionOutcome,
}

impl FixedExecutor {
    pub fn new(outcome: crate::collaborators::ExecutionOutcome) -> Self {
        Self { outcome }
    }

    pub fn success(rows: Vec<Value>) -> Self {
        Self::new(crate::collaborators::ExecutionOutcome {
            status: crate::collaborators::ExecutionStatus::Success,
            rows,
            error: None,
        })
    }

    pub fn error(message: &str) -> Self {
        Self::new(crate::collaborators::ExecutionOutcome {
            status: crate::collaborators::ExecutionStatus::Error,
            rows: Vec::new(),
            error: Some(message.to_string()),
        })
    }
}

impl crate::collaborators::ExecutionCollaborator for FixedExecutor {
    fn execute(
        &self,
        _artifact: &Value,
        _target_name: &str,
        _timeout: std::time::Duration,
    ) -> Result<crate::collaborators::ExecutionOutcome> {
        Ok(self.outcome.clone())
    }
}

/// Schema source backed by an in-memory description.
#[derive(Debug, Clone)]
pub struct StaticSchemaSource {
    schema: SchemaDescription,
}

impl StaticSchemaSource {
    pub fn new(schema: SchemaDescription) -> Self {
        Self { schema }
    }

    /// Two tables (`users`, `orders`) with a foreign key between them.
    pub fn sample() -> Self {
        Self::new(sample_schema())
    }
}

impl SchemaSource for StaticSchemaSource {
    fn load_schema(&self, _target_name: &str) -> Result<SchemaDescription> {
        Ok(self.schema.clone())
    }
}

fn column(data_type: &str, is_primary_key: bool) -> ColumnInfo {
    ColumnInfo {
        data_type: data_type.to_string(),
        nullable: !is_primary_key,
        is_primary_key,
        is_foreign_key: false,
        references: None,
        typical_values: None,
    }
}

/// Deterministic two-table schema used across tests.
pub fn sample_schema() -> SchemaDescription {
    let users = TableSchema {
        columns: BTreeMap::from([
            ("id".to_string(), column("integer", true)),
            ("name".to_string(), column("text", false)),
        ]),
        sample_data: Some(vec![BTreeMap::from([
            ("id".to_string(), Value::from(1)),
            ("name".to_string(), Value::from("ada")),
        ])]),
        metadata: None,
    };

    let mut user_id = column("integer", false);
    user_id.is_foreign_key = true;
    user_id.references = Some(ColumnRef {
        table: "users".to_string(),
        column: "id".to_string(),
    });
    let orders = TableSchema {
        columns: BTreeMap::from([
            ("id".to_string(), column("integer", true)),
            ("user_id".to_string(), user_id),
        ]),
        sample_data: None,
        metadata: None,
    };

    SchemaDescription {
        tables: BTreeMap::from([
            ("users".to_string(), users),
            ("orders".to_string(), orders),
        ]),
    }
}
