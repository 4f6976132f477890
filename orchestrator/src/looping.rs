//! The orchestration loop: repeated steps until completion, cancellation or
//! the iteration ceiling.

use anyhow::Result;

use crate::collaborators::CollaboratorSet;
use crate::core::OverallOutcome;
use crate::engine::Engine;
use crate::step::{StepAdvance, StepOutcome, run_step};
use crate::store::CancelToken;
use crate::types::TaskStatus;

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStop {
    /// The status analysis found nothing left to process.
    Complete(OverallOutcome),
    /// The cancel token was observed before a dispatch.
    Cancelled,
    /// The global iteration ceiling was hit with work still pending.
    IterationLimitExceeded { iterations: u32, max_iterations: u32 },
}

/// Terminal loop summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopOutcome {
    pub iterations: u32,
    pub stop: LoopStop,
}

/// Drive the engine until the task completes, the token cancels, or the
/// configured iteration ceiling is reached. `on_step` observes every applied
/// step in order.
///
/// Cancellation is cooperative: the token is checked between steps, never
/// mid-dispatch, and leaves the task context in `processing`. Every other
/// stop path moves the context to its terminal status first.
pub fn run_loop(
    engine: &Engine,
    collaborators: &CollaboratorSet,
    cancel: &CancelToken,
    mut on_step: impl FnMut(&StepAdvance),
) -> Result<LoopOutcome> {
    if engine.context().status()? == Some(TaskStatus::Initializing) {
        engine.context().update_status(TaskStatus::Processing)?;
    }

    let max_iterations = engine.config().max_iterations;
    let mut iterations = 0;
    while iterations < max_iterations {
        if cancel.is_cancelled() {
            tracing::info!(iterations, "loop cancelled");
            return Ok(LoopOutcome {
                iterations,
                stop: LoopStop::Cancelled,
            });
        }

        let outcome = match run_step(engine, collaborators) {
            Ok(outcome) => outcome,
            Err(err) => {
                mark_failed(engine);
                return Err(err);
            }
        };
        match outcome {
            StepOutcome::Complete(overall) => {
                let status = match overall {
                    OverallOutcome::Success | OverallOutcome::Partial => TaskStatus::Completed,
                    OverallOutcome::Failure => TaskStatus::Failed,
                };
                engine.context().update_status(status)?;
                tracing::info!(iterations, ?overall, "loop complete");
                return Ok(LoopOutcome {
                    iterations,
                    stop: LoopStop::Complete(overall),
                });
            }
            StepOutcome::Advanced(advance) => {
                iterations += 1;
                on_step(&advance);
            }
        }
    }

    tracing::warn!(max_iterations, "iteration ceiling reached with work pending");
    engine.context().update_status(TaskStatus::Failed)?;
    Ok(LoopOutcome {
        iterations,
        stop: LoopStop::IterationLimitExceeded {
            iterations,
            max_iterations,
        },
    })
}

/// Best effort: a failure to record the failure must not mask the original
/// error.
fn mark_failed(engine: &Engine) {
    if let Err(err) = engine.context().update_status(TaskStatus::Failed) {
        tracing::warn!(error = %err, "could not mark task failed");
    }
}
