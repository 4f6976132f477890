//! Engine facade: one store, one manager of each kind, one config.

use std::sync::Arc;

use anyhow::Result;
use serde_json::json;

use crate::collaborators::SchemaSource;
use crate::config::EngineConfig;
use crate::managers::{
    NodeHistoryManager, SchemaCacheManager, TaskContextManager, TaskTreeManager,
};
use crate::store::KeyValueStore;
use crate::types::{NodeOperationType, SchemaDescription};

/// Owns the store and the managers layered over it. One engine per task.
pub struct Engine {
    store: Arc<KeyValueStore>,
    config: EngineConfig,
    context: TaskContextManager,
    schema: SchemaCacheManager,
    tree: TaskTreeManager,
    history: NodeHistoryManager,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let store = Arc::new(KeyValueStore::new());
        Self {
            context: TaskContextManager::new(Arc::clone(&store)),
            schema: SchemaCacheManager::new(Arc::clone(&store)),
            tree: TaskTreeManager::new(Arc::clone(&store)),
            history: NodeHistoryManager::new(Arc::clone(&store), config.max_retries),
            store,
            config,
        }
    }

    /// Initialize the task context and the tree in one step. The root node's
    /// intent is the original request. Returns the root node id.
    pub fn begin_task(
        &self,
        task_id: &str,
        original_request: &str,
        target_name: &str,
        evidence: Option<String>,
    ) -> Result<String> {
        self.context
            .initialize(task_id, original_request, target_name, evidence.clone())?;
        let root_id = self.tree.initialize_tree(original_request, evidence)?;
        self.history.record(
            &root_id,
            NodeOperationType::Create,
            json!({ "intent": original_request }),
        )?;
        tracing::info!(task_id, %root_id, "task begun");
        Ok(root_id)
    }

    /// Load and cache the schema for the task's target from `source`.
    pub fn load_schema(
        &self,
        source: &dyn SchemaSource,
        target_name: &str,
    ) -> Result<SchemaDescription> {
        self.schema.load_from(source, target_name)
    }

    pub fn store(&self) -> &Arc<KeyValueStore> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn context(&self) -> &TaskContextManager {
        &self.context
    }

    pub fn schema(&self) -> &SchemaCacheManager {
        &self.schema
    }

    pub fn tree(&self) -> &TaskTreeManager {
        &self.tree
    }

    pub fn history(&self) -> &NodeHistoryManager {
        &self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TreeError;
    use crate::tree::NodeStatus;
    use crate::types::TaskStatus;

    #[test]
    fn begin_task_initializes_context_tree_and_history() {
        let engine = Engine::new(EngineConfig::default());
        let root_id = engine
            .begin_task("task-1", "list all users", "app_db", None)
            .expect("begin");
        assert_eq!(root_id, "root");

        let context = engine
            .context()
            .get_context()
            .expect("context")
            .expect("present");
        assert_eq!(context.status, TaskStatus::Initializing);
        assert_eq!(context.original_request, "list all users");

        let root = engine.tree().get_node("root").expect("get").expect("root");
        assert_eq!(root.intent, "list all users");
        assert_eq!(root.status, NodeStatus::NoResult);

        let ops = engine.history().get_history("root").expect("history");
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].operation, NodeOperationType::Create);
    }

    #[test]
    fn begin_task_twice_fails() {
        let engine = Engine::new(EngineConfig::default());
        engine
            .begin_task("task-1", "request", "target", None)
            .expect("first");
        let err = engine
            .begin_task("task-2", "request", "target", None)
            .expect_err("second");
        assert_eq!(
            err.downcast_ref::<TreeError>(),
            Some(&TreeError::AlreadyInitialized)
        );
    }
}
