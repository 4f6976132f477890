//! Error taxonomy for manager-level failures.
//!
//! Rejected or structurally fatal conditions are typed so callers can match on
//! them through `anyhow`'s downcasting. Recoverable conditions (parse
//! failures, bad evaluations within the retry budget) are not errors at all;
//! they flow through node state and history instead.

use thiserror::Error;

use crate::types::TaskStatus;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    /// The task context was already created for this store instance.
    #[error("task context already initialized")]
    AlreadyInitialized,

    /// Illegal task status change; rejected, not retried.
    #[error("invalid task status transition {from:?} -> {to:?}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },

    /// Tree operations require `initialize_tree` first.
    #[error("task tree not initialized")]
    TreeNotInitialized,

    /// A tree already exists for this store instance.
    #[error("task tree already initialized")]
    TreeAlreadyInitialized,

    /// `add_node` named a parent that is not in the tree.
    #[error("parent node '{0}' not found")]
    ParentNotFound(String),

    /// A node lookup or update named an unknown node.
    #[error("node '{0}' not found")]
    NodeNotFound(String),

    /// Structural violation (duplicate id, broken link, cycle). Fatal.
    #[error("tree integrity violated: {0}")]
    TreeIntegrity(String),
}
