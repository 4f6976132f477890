//! Managers built on the shared store.
//!
//! Every manager holds only a reference to the [`crate::store::KeyValueStore`]
//! and derives all views from it; the store is the single source of truth and
//! the sole unit of persistence. All node mutation is manager-mediated.

pub mod context;
pub mod history;
pub mod schema;
pub mod tree;

pub use context::TaskContextManager;
pub use history::NodeHistoryManager;
pub use schema::SchemaCacheManager;
pub use tree::{NodeUpdate, TaskTreeManager};
