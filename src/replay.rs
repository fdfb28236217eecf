//! Atomic replay of a finished run into the telemetry backend.
//!
//! A run's steps are buffered locally while it executes and sent only once it
//! ends: begin → every step in order → conclude, all while holding the
//! client's transmission lock. The run's buffer is drained before anything is
//! sent, so the same steps can never be transmitted twice. When a remote call
//! fails, the rest of the replay is skipped and the backend is told to abandon
//! the open workflow, so a partial workflow never becomes uploadable.

use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::context::RunContext;
use crate::recorder::{StatusCode, StepRecord};
use crate::telemetry::{bounded, Metadata, StepPayload, TelemetryClient};
use crate::Result;

/// Workflow-level data sent alongside the steps.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowSummary {
    /// Workflow name.
    pub name: String,
    /// Serialized run input.
    pub input: String,
    /// Serialized run output.
    pub output: String,
    /// Total run duration.
    pub duration: Duration,
    /// Set to an error code when the pipeline itself failed.
    pub status_override: Option<StatusCode>,
}

impl WorkflowSummary {
    /// Aggregate status: a failing override wins, then any failing step, else 200.
    pub fn resolve_status(&self, has_errors: bool) -> StatusCode {
        match self.status_override {
            Some(code) if code.is_error() => code,
            _ if has_errors => StatusCode::ERROR,
            _ => StatusCode::OK,
        }
    }
}

/// What a replay did. Replays never fail; this is for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayOutcome {
    /// The full workflow was transmitted.
    Replayed {
        /// Number of steps sent.
        steps: usize,
        /// Aggregate status sent with the conclusion.
        status: StatusCode,
    },
    /// Telemetry is disabled; the steps were discarded.
    Skipped,
    /// A remote call failed; the workflow was abandoned.
    Failed,
}

/// Transmits finished runs to a [`TelemetryClient`].
#[derive(Debug, Clone)]
pub struct Replayer {
    client: TelemetryClient,
}

impl Replayer {
    /// Create a replayer for `client`.
    pub fn new(client: TelemetryClient) -> Self {
        Self { client }
    }

    /// The client this replayer sends to.
    pub fn client(&self) -> &TelemetryClient {
        &self.client
    }

    /// Drain `ctx`'s steps and transmit them as one workflow.
    #[instrument(skip_all, fields(run_id = %ctx.run_id()))]
    pub async fn replay(&self, ctx: &mut RunContext, summary: WorkflowSummary) -> ReplayOutcome {
        let steps = ctx.steps_mut().drain();
        let has_errors = steps.iter().any(|s| s.status.is_error());
        let status = summary.resolve_status(has_errors);

        let mut slot = self.client.lock_initialized().await;
        if !slot.backend.is_enabled() {
            return ReplayOutcome::Skipped;
        }

        let timeout = self.client.remote_timeout();
        let metadata = Metadata::from([
            ("framework".to_string(), env!("CARGO_PKG_NAME").to_string()),
            ("has_errors".to_string(), has_errors.to_string()),
            ("workflow_status".to_string(), status.to_string()),
            ("run_id".to_string(), ctx.run_id().to_string()),
        ]);

        let sent: Result<()> = async {
            bounded(
                timeout,
                "begin_workflow",
                slot.backend
                    .begin_workflow(&summary.input, &summary.name, metadata),
            )
            .await?;
            for step in &steps {
                bounded(timeout, "add_step", slot.backend.add_step(payload(step))).await?;
            }
            bounded(
                timeout,
                "conclude_workflow",
                slot.backend
                    .conclude_workflow(&summary.output, summary.duration, status),
            )
            .await
        }
        .await;

        match sent {
            Ok(()) => {
                info!(
                    steps = steps.len(),
                    duration_ms = summary.duration.as_millis() as u64,
                    %status,
                    "replayed workflow"
                );
                ReplayOutcome::Replayed {
                    steps: steps.len(),
                    status,
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to replay workflow, dropping it");
                slot.backend.abandon_workflow().await;
                ReplayOutcome::Failed
            }
        }
    }
}

fn payload(step: &StepRecord) -> StepPayload {
    StepPayload {
        name: step.stage.clone(),
        input: step.input.clone(),
        output: step.output.clone(),
        duration_ns: step.duration_ns(),
        status_code: step.status,
        metadata: Metadata::from([
            ("node".to_string(), step.stage.clone()),
            ("status".to_string(), step.status.label().to_string()),
        ]),
    }
}
