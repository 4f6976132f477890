//! Deterministic task tree orchestration engine.
//!
//! The engine decomposes one incoming request into a tree of sub-tasks and
//! drives injected reasoning collaborators over it until every node is
//! terminal. The architecture enforces a strict separation:
//!
//! - **[`store`]**: versioned key-value persistence, the single source of
//!   truth. Everything above it is a derived view.
//! - **[`managers`]**: typed CRUD over the store's well-known records (task
//!   context, schema cache, task tree, node history).
//! - **[`core`]**: pure, deterministic analysis (status, integrity). No store
//!   access, fully testable in isolation.
//!
//! Orchestration modules ([`checker`], [`step`], [`looping`]) coordinate core
//! logic with the managers to run the loop; [`collaborators`] holds the trait
//! seams for the opaque external reasoning components.

pub mod checker;
pub mod collaborators;
pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod logging;
pub mod looping;
pub mod managers;
pub mod step;
pub mod store;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod tree;
pub mod types;
