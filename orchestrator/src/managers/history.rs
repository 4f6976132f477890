//! Append-only node operation log and retry bookkeeping.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::managers::tree::{NodeUpdate, TaskTreeManager};
use crate::store::KeyValueStore;
use crate::tree::NodeStatus;
use crate::types::{NodeOperation, NodeOperationType};

const NODE_HISTORY_KEY: &str = "nodeHistory";

/// Aggregate view over the whole operation log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistorySummary {
    pub total_operations: usize,
    pub unique_nodes: usize,
    pub operation_counts: BTreeMap<NodeOperationType, usize>,
}

/// Manages node operation history in the store.
///
/// `record` is the only way node history grows; entries are never edited or
/// removed. Retry counts are derived from the log itself (one `retry` record
/// per consumed attempt), so they can only increase.
#[derive(Debug, Clone)]
pub struct NodeHistoryManager {
    store: Arc<KeyValueStore>,
    max_retries: u32,
}

impl NodeHistoryManager {
    pub fn new(store: Arc<KeyValueStore>, max_retries: u32) -> Self {
        Self { store, max_retries }
    }

    /// Append one operation record for `node_id`.
    pub fn record(&self, node_id: &str, operation: NodeOperationType, data: Value) -> Result<()> {
        let mut history = self.all_operations()?;
        history.push(NodeOperation {
            timestamp: Utc::now().to_rfc3339(),
            node_id: node_id.to_string(),
            operation,
            data,
        });
        self.save(&history)?;
        tracing::info!(node_id, ?operation, "recorded node operation");
        Ok(())
    }

    /// All operations across all nodes, in chronological order.
    pub fn all_operations(&self) -> Result<Vec<NodeOperation>> {
        match self.store.get(NODE_HISTORY_KEY, None) {
            Some(value) => serde_json::from_value(value).context("deserialize node history"),
            None => Ok(Vec::new()),
        }
    }

    /// All operations for `node_id`, in chronological order.
    pub fn get_history(&self, node_id: &str) -> Result<Vec<NodeOperation>> {
        Ok(self
            .all_operations()?
            .into_iter()
            .filter(|op| op.node_id == node_id)
            .collect())
    }

    pub fn operations_by_type(&self, operation: NodeOperationType) -> Result<Vec<NodeOperation>> {
        Ok(self
            .all_operations()?
            .into_iter()
            .filter(|op| op.operation == operation)
            .collect())
    }

    /// Latest operation for a node, optionally filtered by type.
    pub fn latest_operation(
        &self,
        node_id: &str,
        operation: Option<NodeOperationType>,
    ) -> Result<Option<NodeOperation>> {
        Ok(self
            .get_history(node_id)?
            .into_iter()
            .filter(|op| operation.is_none_or(|wanted| op.operation == wanted))
            .next_back())
    }

    /// Number of retries consumed by `node_id`.
    pub fn get_retry_count(&self, node_id: &str) -> Result<u32> {
        Ok(self
            .get_history(node_id)?
            .iter()
            .filter(|op| op.operation == NodeOperationType::Retry)
            .count() as u32)
    }

    /// Consume one retry for `node_id` and return the new count.
    ///
    /// Never errors on the limit: when the count reaches `max_retries` the
    /// node's status flips to `retries_exhausted` as a side effect, which
    /// guarantees retries cannot loop forever.
    pub fn increment_retry(&self, node_id: &str) -> Result<u32> {
        self.record(node_id, NodeOperationType::Retry, Value::Null)?;
        let count = self.get_retry_count(node_id)?;
        if count >= self.max_retries {
            let tree = TaskTreeManager::new(Arc::clone(&self.store));
            tree.update_node(node_id, &NodeUpdate::status(NodeStatus::RetriesExhausted))?;
            tracing::info!(node_id, count, "retry budget exhausted");
        }
        Ok(count)
    }

    /// Retry counts for every node that has consumed at least one retry.
    pub fn retry_counts(&self) -> Result<BTreeMap<String, u32>> {
        let mut counts: BTreeMap<String, u32> = BTreeMap::new();
        for op in self.operations_by_type(NodeOperationType::Retry)? {
            *counts.entry(op.node_id).or_insert(0) += 1;
        }
        Ok(counts)
    }

    pub fn summary(&self) -> Result<HistorySummary> {
        let operations = self.all_operations()?;
        let mut operation_counts: BTreeMap<NodeOperationType, usize> = BTreeMap::new();
        let mut unique_nodes: BTreeSet<String> = BTreeSet::new();
        for op in &operations {
            *operation_counts.entry(op.operation).or_insert(0) += 1;
            unique_nodes.insert(op.node_id.clone());
        }
        Ok(HistorySummary {
            total_operations: operations.len(),
            unique_nodes: unique_nodes.len(),
            operation_counts,
        })
    }

    fn save(&self, history: &[NodeOperation]) -> Result<()> {
        let value = serde_json::to_value(history).context("serialize node history")?;
        self.store.set(NODE_HISTORY_KEY, value, None, None);
        Ok(())
    }
}
