//! Pure tree analysis: no store access, no side effects.

pub mod invariants;
pub mod status;

pub use invariants::validate_integrity;
pub use status::{OverallOutcome, RecommendedAction, RetryCounts, StatusReport, analyze};
