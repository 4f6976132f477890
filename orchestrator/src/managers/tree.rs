//! CRUD and traversal over the task tree record.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;

use crate::error::TreeError;
use crate::store::KeyValueStore;
use crate::tree::{Node, NodeStatus, TaskTree};

const TASK_TREE_KEY: &str = "taskTree";

/// Partial node update: callers pass only the fields they are writing;
/// unspecified fields are preserved.
#[derive(Debug, Clone, Default)]
pub struct NodeUpdate {
    pub intent: Option<String>,
    pub evidence: Option<String>,
    pub status: Option<NodeStatus>,
    pub schema_linking_result: Option<Value>,
    pub decomposition_result: Option<Value>,
    pub generation_result: Option<Value>,
    pub evaluation_result: Option<Value>,
}

impl NodeUpdate {
    pub fn status(status: NodeStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}

/// Manages the task tree in the store. Nodes are never physically deleted; an
/// unwanted node is marked terminal instead, preserving history integrity.
#[derive(Debug, Clone)]
pub struct TaskTreeManager {
    store: Arc<KeyValueStore>,
}

impl TaskTreeManager {
    pub fn new(store: Arc<KeyValueStore>) -> Self {
        Self { store }
    }

    /// Create the root node (id `root`, status `no_result`).
    ///
    /// Fails with [`TreeError::TreeAlreadyInitialized`] if a tree exists.
    pub fn initialize_tree(&self, root_intent: &str, evidence: Option<String>) -> Result<String> {
        if self.get_tree()?.is_some() {
            return Err(TreeError::TreeAlreadyInitialized.into());
        }
        let root_id = "root".to_string();
        let root = Node::new(&root_id, root_intent, evidence, None);
        let tree = TaskTree {
            root_id: root_id.clone(),
            focus_id: Some(root_id.clone()),
            nodes: BTreeMap::from([(root_id.clone(), root)]),
        };
        self.save(&tree)?;
        tracing::info!(%root_id, "initialized task tree");
        Ok(root_id)
    }

    /// Create a child of `parent_id` and append its id to the parent's
    /// ordered child list. Node ids are deterministic (`node-N` by creation
    /// order).
    pub fn add_node(&self, parent_id: &str, intent: &str, evidence: Option<String>) -> Result<String> {
        let mut tree = self.require_tree()?;
        if !tree.nodes.contains_key(parent_id) {
            return Err(TreeError::ParentNotFound(parent_id.to_string()).into());
        }

        let node_id = format!("node-{}", tree.nodes.len());
        if tree.nodes.contains_key(&node_id) {
            return Err(
                TreeError::TreeIntegrity(format!("duplicate node id '{node_id}'")).into(),
            );
        }

        let node = Node::new(&node_id, intent, evidence, Some(parent_id.to_string()));
        tree.nodes.insert(node_id.clone(), node);
        if let Some(parent) = tree.nodes.get_mut(parent_id) {
            parent.child_ids.push(node_id.clone());
        }
        ensure_acyclic(&tree, &node_id)?;

        self.save(&tree)?;
        tracing::info!(%node_id, parent_id, "added node");
        Ok(node_id)
    }

    /// Merge `update` into the existing node record.
    pub fn update_node(&self, node_id: &str, update: &NodeUpdate) -> Result<()> {
        let mut tree = self.require_tree()?;
        let node = tree
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| TreeError::NodeNotFound(node_id.to_string()))?;

        if let Some(intent) = &update.intent {
            node.intent = intent.clone();
        }
        if let Some(evidence) = &update.evidence {
            node.evidence = Some(evidence.clone());
        }
        if let Some(status) = update.status {
            node.status = status;
        }
        if let Some(result) = &update.schema_linking_result {
            node.schema_linking_result = Some(result.clone());
        }
        if let Some(result) = &update.decomposition_result {
            node.decomposition_result = Some(result.clone());
        }
        if let Some(result) = &update.generation_result {
            node.generation_result = Some(result.clone());
        }
        if let Some(result) = &update.evaluation_result {
            node.evaluation_result = Some(result.clone());
        }

        self.save(&tree)?;
        tracing::debug!(node_id, "updated node");
        Ok(())
    }

    pub fn get_node(&self, node_id: &str) -> Result<Option<Node>> {
        Ok(self
            .get_tree()?
            .and_then(|tree| tree.nodes.get(node_id).cloned()))
    }

    /// The whole tree record, or absent when uninitialized.
    pub fn get_tree(&self) -> Result<Option<TaskTree>> {
        match self.store.get(TASK_TREE_KEY, None) {
            Some(value) => {
                let tree = serde_json::from_value(value).context("deserialize task tree")?;
                Ok(Some(tree))
            }
            None => Ok(None),
        }
    }

    /// Move the loop's focus pointer.
    pub fn set_focus(&self, node_id: &str) -> Result<()> {
        let mut tree = self.require_tree()?;
        if !tree.nodes.contains_key(node_id) {
            return Err(TreeError::NodeNotFound(node_id.to_string()).into());
        }
        tree.focus_id = Some(node_id.to_string());
        self.save(&tree)?;
        Ok(())
    }

    pub fn get_focus(&self) -> Result<Option<String>> {
        Ok(self.get_tree()?.and_then(|tree| tree.focus_id))
    }

    pub fn root_id(&self) -> Result<Option<String>> {
        Ok(self.get_tree()?.map(|tree| tree.root_id))
    }

    /// Children of `node_id` in their stored (processing) order.
    pub fn get_children(&self, node_id: &str) -> Result<Vec<Node>> {
        let tree = self.require_tree()?;
        let node = tree
            .nodes
            .get(node_id)
            .ok_or_else(|| TreeError::NodeNotFound(node_id.to_string()))?;
        Ok(node
            .child_ids
            .iter()
            .filter_map(|child_id| tree.nodes.get(child_id).cloned())
            .collect())
    }

    pub fn get_parent(&self, node_id: &str) -> Result<Option<Node>> {
        let tree = self.require_tree()?;
        let node = tree
            .nodes
            .get(node_id)
            .ok_or_else(|| TreeError::NodeNotFound(node_id.to_string()))?;
        Ok(node
            .parent_id
            .as_ref()
            .and_then(|parent_id| tree.nodes.get(parent_id).cloned()))
    }

    fn require_tree(&self) -> Result<TaskTree> {
        self.get_tree()?
            .ok_or_else(|| TreeError::TreeNotInitialized.into())
    }

    fn save(&self, tree: &TaskTree) -> Result<()> {
        let value = serde_json::to_value(tree).context("serialize task tree")?;
        self.store.set(TASK_TREE_KEY, value, None, None);
        Ok(())
    }
}

/// Defensive cycle check: the parent chain from `start_id` must reach the
/// root without revisiting a node. Should be unreachable under correct use.
fn ensure_acyclic(tree: &TaskTree, start_id: &str) -> Result<()> {
    let mut seen = vec![start_id.to_string()];
    let mut current = tree.nodes.get(start_id).and_then(|n| n.parent_id.clone());
    while let Some(id) = current {
        if seen.contains(&id) {
            return Err(TreeError::TreeIntegrity(format!(
                "cycle through node '{id}'"
            ))
            .into());
        }
        seen.push(id.clone());
        current = tree.nodes.get(&id).and_then(|n| n.parent_id.clone());
    }
    Ok(())
}
