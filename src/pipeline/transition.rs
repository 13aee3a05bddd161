//! The pure transition function driving a generation run.

use super::state::Phase;

/// The next thing the orchestrator does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Analyze,
    Generate,
    Validate,
    Fix,
    Persist,
    Complete,
    Fail,
    Stop,
}

/// Decide the next action from the current phase.
///
/// `attempt` counts failed validations so far and `bound` is the retry bound; a fix
/// is only requested while `attempt < bound` and something actionable remains.
pub fn next_action(
    phase: Phase,
    accepted: bool,
    attempt: u32,
    actionable_count: usize,
    bound: u32,
) -> Action {
    match phase {
        Phase::Initialized => Action::Analyze,
        Phase::Analyzed => Action::Generate,
        Phase::Generated | Phase::Fixed => Action::Validate,
        Phase::Validated if accepted => Action::Persist,
        Phase::Validated => Action::Fail,
        Phase::ValidationFailed if attempt < bound && actionable_count > 0 => Action::Fix,
        Phase::ValidationFailed => Action::Fail,
        Phase::Saved => Action::Complete,
        Phase::SaveFailed => Action::Fail,
        Phase::Rejected | Phase::Completed | Phase::Failed => Action::Stop,
    }
}

/// Upper bound on collaborator stages for a run: analyze, generate, up to
/// `bound - 1` fixes and one persist.
pub fn max_stages(bound: u32) -> u32 {
    bound.max(1) + 2
}
