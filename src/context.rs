//! Per-run execution context.
//!
//! A [`RunContext`] is created when a run starts and passed by `&mut` to every
//! stage. It owns the run's [`StepRecorder`], so no other run (on any thread or
//! task) can observe or disturb it until the replayer drains it.

use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::recorder::{StepRecord, StepRecorder};

/// Context owned by a single run.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use artifact_refinery::{RunContext, StepRecord, StatusCode};
///
/// let mut ctx = RunContext::new();
/// ctx.record(StepRecord {
///     stage: "assess".to_string(),
///     input: "{}".to_string(),
///     output: "{}".to_string(),
///     duration: Duration::from_millis(3),
///     status: StatusCode::OK,
/// });
///
/// assert_eq!(ctx.steps().len(), 1);
/// ```
#[derive(Debug)]
pub struct RunContext {
    run_id: Uuid,
    started: Instant,
    steps: StepRecorder,
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RunContext {
    /// Start a new run with a fresh id and an empty step log.
    #[must_use]
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started: Instant::now(),
            steps: StepRecorder::new(),
        }
    }

    /// Identifier of this run.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Time since the run started.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Append a step record.
    pub fn record(&mut self, record: StepRecord) {
        self.steps.push(record);
    }

    /// The run's step log.
    pub fn steps(&self) -> &StepRecorder {
        &self.steps
    }

    /// Mutable access to the step log, used by the replayer to drain it.
    pub fn steps_mut(&mut self) -> &mut StepRecorder {
        &mut self.steps
    }
}
