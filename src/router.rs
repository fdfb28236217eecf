//! Stage routing.
//!
//! [`route`] is a pure function of the current stage and state. The iteration
//! bound lives here rather than in the stages, so a stage that never reports a
//! pass still cannot keep the loop alive past `max_iterations`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::state::RunState;

/// A workflow stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Score the current artifact.
    Assess,
    /// Produce an improved artifact.
    Improve,
    /// Render the final output.
    Finalize,
    /// The run is over.
    Terminal,
}

impl Stage {
    /// Name used in step records and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Assess => "assess",
            Stage::Improve => "improve",
            Stage::Finalize => "finalize",
            Stage::Terminal => "terminal",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The routing decision after a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// Stage to run next.
    pub next: Stage,
    /// Set when assessment never passed and the iteration bound forced finalization.
    pub forced_exit: bool,
}

impl Transition {
    fn to(next: Stage) -> Self {
        Self {
            next,
            forced_exit: false,
        }
    }
}

/// Choose the stage that follows `current`.
///
/// # Example
///
/// ```rust
/// use artifact_refinery::{route, RunState, Stage};
///
/// let mut state = RunState::new("in.pgm", 2);
/// assert_eq!(route(Stage::Assess, &state).next, Stage::Improve);
///
/// state.iteration = 2;
/// let t = route(Stage::Assess, &state);
/// assert_eq!(t.next, Stage::Finalize);
/// assert!(t.forced_exit);
/// ```
pub fn route(current: Stage, state: &RunState) -> Transition {
    match current {
        Stage::Assess if state.passed => Transition::to(Stage::Finalize),
        Stage::Assess if state.iteration >= state.max_iterations => Transition {
            next: Stage::Finalize,
            forced_exit: true,
        },
        Stage::Assess => Transition::to(Stage::Improve),
        Stage::Improve => Transition::to(Stage::Assess),
        Stage::Finalize | Stage::Terminal => Transition::to(Stage::Terminal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pass_goes_to_finalize() {
        let mut state = RunState::new("a.pgm", 3);
        state.passed = true;
        assert_eq!(
            route(Stage::Assess, &state),
            Transition {
                next: Stage::Finalize,
                forced_exit: false
            }
        );
    }

    #[test]
    fn test_pass_wins_over_exhausted_bound() {
        let mut state = RunState::new("a.pgm", 1);
        state.passed = true;
        state.iteration = 1;
        assert!(!route(Stage::Assess, &state).forced_exit);
    }

    #[test]
    fn test_zero_limit_forces_exit_immediately() {
        let state = RunState::new("a.pgm", 0);
        let t = route(Stage::Assess, &state);
        assert_eq!(t.next, Stage::Finalize);
        assert!(t.forced_exit);
    }

    #[test]
    fn test_fixed_edges() {
        let state = RunState::new("a.pgm", 3);
        assert_eq!(route(Stage::Improve, &state).next, Stage::Assess);
        assert_eq!(route(Stage::Finalize, &state).next, Stage::Terminal);
        assert_eq!(route(Stage::Terminal, &state).next, Stage::Terminal);
    }
}
