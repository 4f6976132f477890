//! Lifecycle manager for the overall incoming task.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;

use crate::error::TreeError;
use crate::store::KeyValueStore;
use crate::types::{TaskContext, TaskStatus};

const TASK_CONTEXT_KEY: &str = "taskContext";

/// Manages the task context record in the store.
#[derive(Debug, Clone)]
pub struct TaskContextManager {
    store: Arc<KeyValueStore>,
}

impl TaskContextManager {
    pub fn new(store: Arc<KeyValueStore>) -> Self {
        Self { store }
    }

    /// Create the task context with status `Initializing`.
    ///
    /// Fails with [`TreeError::AlreadyInitialized`] when called twice for the
    /// same store instance.
    pub fn initialize(
        &self,
        task_id: &str,
        original_request: &str,
        target_name: &str,
        evidence: Option<String>,
    ) -> Result<TaskContext> {
        if self.get_context()?.is_some() {
            return Err(TreeError::AlreadyInitialized.into());
        }
        let context = TaskContext {
            task_id: task_id.to_string(),
            original_request: original_request.to_string(),
            target_name: target_name.to_string(),
            start_time: Utc::now().to_rfc3339(),
            status: TaskStatus::Initializing,
            evidence,
        };
        self.put(&context)?;
        tracing::info!(task_id, target_name, "initialized task context");
        Ok(context)
    }

    /// The current task context, or absent when uninitialized.
    pub fn get_context(&self) -> Result<Option<TaskContext>> {
        match self.store.get(TASK_CONTEXT_KEY, None) {
            Some(value) => {
                let context = serde_json::from_value(value).context("deserialize task context")?;
                Ok(Some(context))
            }
            None => Ok(None),
        }
    }

    /// Advance the task status along the transition table
    /// `Initializing -> Processing -> {Completed, Failed}`.
    pub fn update_status(&self, status: TaskStatus) -> Result<()> {
        let mut context = self
            .get_context()?
            .ok_or_else(|| anyhow::anyhow!("no task context found to update"))?;
        if !context.status.can_transition_to(status) {
            return Err(TreeError::InvalidTransition {
                from: context.status,
                to: status,
            }
            .into());
        }
        context.status = status;
        self.put(&context)?;
        tracing::info!(?status, "updated task status");
        Ok(())
    }

    pub fn task_id(&self) -> Result<Option<String>> {
        Ok(self.get_context()?.map(|context| context.task_id))
    }

    pub fn status(&self) -> Result<Option<TaskStatus>> {
        Ok(self.get_context()?.map(|context| context.status))
    }

    pub fn is_completed(&self) -> Result<bool> {
        Ok(self.status()? == Some(TaskStatus::Completed))
    }

    pub fn is_failed(&self) -> Result<bool> {
        Ok(self.status()? == Some(TaskStatus::Failed))
    }

    fn put(&self, context: &TaskContext) -> Result<()> {
        let value = serde_json::to_value(context).context("serialize task context")?;
        self.store.set(TASK_CONTEXT_KEY, value, None, None);
        Ok(())
    }
}
