//! Pure transition rules for the batch progress timeline.
//!
//! Each batch carries four fixed steps, one per lifecycle status. The store
//! persists the steps; this module decides how they move. The original
//! collection app showed a fifth "Verified" step that its own status enum
//! never produced; verification is folded into `Collected` here so the
//! timeline and the status field can never disagree.

use crate::error::RegistryError;
use crate::model::{BatchStatus, TimelineStep};
use chrono::{DateTime, Utc};

/// Step titles in lifecycle order, indexed by `BatchStatus::step_position`.
pub const STEP_TITLES: [&str; 4] = ["Collected", "Processing", "Quality Test", "Packaging"];

/// Steps for a freshly registered batch: everything pending except the
/// first step, which the batch is working through while `active`.
pub fn initial_steps() -> Vec<TimelineStep> {
    STEP_TITLES
        .iter()
        .enumerate()
        .map(|(i, title)| TimelineStep {
            position: i as i64,
            title: (*title).to_string(),
            completed: false,
            in_progress: i == 0,
            completed_at: None,
        })
        .collect()
}

/// Check that `to` is the immediate successor of `from`.
pub fn check_transition(from: BatchStatus, to: BatchStatus) -> Result<(), RegistryError> {
    match from.successor() {
        Some(next) if next == to => Ok(()),
        _ => Err(RegistryError::InvalidTransition { from, to }),
    }
}

/// Mutate `steps` for a validated `from -> to` transition.
///
/// The in-progress step completes with `now`; the successor step takes over,
/// except when `to` is `Completed`, which also completes the final step and
/// leaves nothing in progress.
pub fn apply_transition(
    steps: &mut [TimelineStep],
    from: BatchStatus,
    to: BatchStatus,
    now: DateTime<Utc>,
) {
    let done = from.step_position() as usize;
    if let Some(step) = steps.get_mut(done) {
        step.completed = true;
        step.in_progress = false;
        step.completed_at = Some(now);
    }
    let next = to.step_position() as usize;
    if let Some(step) = steps.get_mut(next) {
        if to == BatchStatus::Completed {
            step.completed = true;
            step.in_progress = false;
            step.completed_at = Some(now);
        } else {
            step.in_progress = true;
        }
    }
}

/// Timeline shape invariant: at most one in-progress step, everything before
/// it completed, everything after it untouched.
#[cfg(test)]
pub fn is_well_formed(steps: &[TimelineStep]) -> bool {
    let in_progress: Vec<usize> = steps
        .iter()
        .enumerate()
        .filter(|(_, s)| s.in_progress)
        .map(|(i, _)| i)
        .collect();
    if in_progress.len() > 1 {
        return false;
    }
    let boundary = match in_progress.first() {
        Some(&i) => {
            if steps[i].completed {
                return false;
            }
            i
        }
        // All-completed (finished batch) or all-pending prefixes also count
        None => steps.iter().take_while(|s| s.completed).count(),
    };
    steps[..boundary].iter().all(|s| s.completed)
        && steps[boundary..].iter().skip(1).all(|s| !s.completed && !s.in_progress)
}
