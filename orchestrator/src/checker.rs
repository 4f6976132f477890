//! Bridge between the pure status analysis and the stored tree.

use anyhow::Result;

use crate::core::{StatusReport, analyze, validate_integrity};
use crate::engine::Engine;
use crate::error::TreeError;

/// Snapshot the tree, derive retry counts from the history log, and run the
/// pure analysis. When the report names a focus node the stored focus pointer
/// is moved there, so the persisted tree always reflects the last analysis.
///
/// Structural integrity is validated on every check; a violated tree halts
/// the loop with [`TreeError::TreeIntegrity`] instead of analyzing garbage.
pub fn check_status(engine: &Engine) -> Result<StatusReport> {
    let tree = engine
        .tree()
        .get_tree()?
        .ok_or(TreeError::TreeNotInitialized)?;
    let violations = validate_integrity(&tree);
    if !violations.is_empty() {
        return Err(TreeError::TreeIntegrity(violations.join("; ")).into());
    }
    let retries = engine.history().retry_counts()?;
    let report = analyze(&tree, &retries, engine.config().max_retries);

    if let Some(focus_node_id) = &report.focus_node_id {
        engine.tree().set_focus(focus_node_id)?;
    }
    tracing::debug!(
        complete = report.complete,
        focus = report.focus_node_id.as_deref(),
        action = ?report.recommended_action,
        outcome = ?report.overall_outcome,
        "status checked"
    );
    Ok(report)
}
