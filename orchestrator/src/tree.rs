//! Task tree data model: nodes, node statuses and the flat tree record.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Processing status of one node in the task tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// No usable result produced yet.
    NoResult,
    /// An artifact was generated and awaits evaluation.
    NeedsEvaluation,
    /// Evaluation accepted the node's artifact.
    Good,
    /// Evaluation rejected the node's artifact; may be retried.
    Bad,
    /// Retry budget consumed; terminal.
    RetriesExhausted,
}

/// One unit of decomposed work.
///
/// The four result slots are opaque payloads written by external reasoning
/// collaborators; the engine never interprets them beyond presence checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub node_id: String,
    pub intent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
    /// Absent only for the root node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Ordered; child processing order is the insertion order.
    #[serde(default)]
    pub child_ids: Vec<String>,
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_linking_result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decomposition_result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation_result: Option<Value>,
}

impl Node {
    /// Fresh node with status [`NodeStatus::NoResult`] and empty result slots.
    pub fn new(node_id: &str, intent: &str, evidence: Option<String>, parent_id: Option<String>) -> Self {
        Self {
            node_id: node_id.to_string(),
            intent: intent.to_string(),
            evidence,
            parent_id,
            child_ids: Vec::new(),
            status: NodeStatus::NoResult,
            schema_linking_result: None,
            decomposition_result: None,
            generation_result: None,
            evaluation_result: None,
        }
    }
}

/// The whole task tree, stored as a flat map keyed by node id plus the focus
/// pointer the orchestration loop uses to remember where it left off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskTree {
    pub root_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focus_id: Option<String>,
    pub nodes: BTreeMap<String, Node>,
}

impl TaskTree {
    pub fn get(&self, node_id: &str) -> Option<&Node> {
        self.nodes.get(node_id)
    }

    pub fn root(&self) -> Option<&Node> {
        self.nodes.get(&self.root_id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
