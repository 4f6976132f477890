//! Shared data-model types: task context, node history and the cached schema
//! description.
//!
//! Wire names are camelCase to keep the store's exported layout stable for
//! inspection tools.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Status of the overall incoming task. Advances monotonically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Initializing,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Transition table: `Initializing -> Processing -> {Completed, Failed}`.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Initializing, TaskStatus::Processing)
                | (TaskStatus::Processing, TaskStatus::Completed)
                | (TaskStatus::Processing, TaskStatus::Failed)
        )
    }
}

/// Lifecycle record for the overall incoming task. Created once per request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskContext {
    pub task_id: String,
    pub original_request: String,
    pub target_name: String,
    pub start_time: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
}

/// Kinds of manager-mediated node mutations recorded in the history log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeOperationType {
    Create,
    SchemaLink,
    Decompose,
    Generate,
    Evaluate,
    Revise,
    Retry,
}

/// Append-only history entry: one record per manager-mediated mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeOperation {
    pub timestamp: String,
    pub node_id: String,
    pub operation: NodeOperationType,
    #[serde(default)]
    pub data: Value,
}

/// Reference from a foreign-key column to the column it points at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnRef {
    pub table: String,
    pub column: String,
}

/// Description of one column of the target's data schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnInfo {
    pub data_type: String,
    pub nullable: bool,
    pub is_primary_key: bool,
    pub is_foreign_key: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<ColumnRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typical_values: Option<Vec<Value>>,
}

/// Description of one table of the target's data schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSchema {
    pub columns: BTreeMap<String, ColumnInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_data: Option<Vec<BTreeMap<String, Value>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, Value>>,
}

/// Data-schema description supplied by an external schema source and exposed
/// read-only to reasoning collaborators.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaDescription {
    pub tables: BTreeMap<String, TableSchema>,
}
