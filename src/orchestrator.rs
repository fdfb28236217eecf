//! The assess → improve → finalize state machine.

use std::sync::Arc;

use tracing::{error, info, instrument, warn};

use crate::collaborator::{Assessor, Finalizer, Improver};
use crate::config::PipelineConfig;
use crate::context::RunContext;
use crate::instrumented::InstrumentedNode;
use crate::node::{AssessNode, FinalizeNode, ImproveNode};
use crate::recorder::StatusCode;
use crate::replay::{Replayer, WorkflowSummary};
use crate::router::{route, Stage};
use crate::state::RunState;
use crate::telemetry::TelemetryClient;
use crate::uploader::UploadMode;
use crate::Result;

/// Per-call overrides of the orchestrator's configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Return node failures as `Err` (after replay) instead of a tagged state.
    pub raise_on_error: bool,
    /// Upload immediately or leave the workflow pending.
    pub upload: UploadMode,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

impl From<&PipelineConfig> for RunOptions {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            raise_on_error: config.raise_on_error,
            upload: config.upload,
        }
    }
}

/// Drives one artifact through the workflow and reports it to telemetry.
///
/// Each run is strictly sequential. Separate runs may execute concurrently on
/// the same orchestrator; they share only the telemetry client.
pub struct Orchestrator {
    assess: InstrumentedNode<AssessNode>,
    improve: InstrumentedNode<ImproveNode>,
    finalize: InstrumentedNode<FinalizeNode>,
    replayer: Replayer,
    config: PipelineConfig,
}

impl Orchestrator {
    /// Assemble an orchestrator from its collaborators.
    pub fn new(
        assessor: Arc<dyn Assessor>,
        improver: Arc<dyn Improver>,
        finalizer: Arc<dyn Finalizer>,
        telemetry: TelemetryClient,
        config: PipelineConfig,
    ) -> Self {
        let deadline = config.stage_timeout;
        Self {
            assess: InstrumentedNode::new(
                Stage::Assess,
                AssessNode::new(assessor, config.pass_threshold),
                deadline,
            ),
            improve: InstrumentedNode::new(Stage::Improve, ImproveNode::new(improver), deadline),
            finalize: InstrumentedNode::new(
                Stage::Finalize,
                FinalizeNode::new(finalizer),
                deadline,
            ),
            replayer: Replayer::new(telemetry),
            config,
        }
    }

    /// The telemetry client runs report to.
    pub fn telemetry(&self) -> &TelemetryClient {
        self.replayer.client()
    }

    /// The orchestrator's configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run with the configured [`RunOptions`].
    pub async fn run(&self, initial: RunState) -> Result<RunState> {
        self.run_with(initial, RunOptions::from(&self.config)).await
    }

    /// Run one artifact to completion.
    ///
    /// The run is replayed to telemetry whether it succeeds or fails. On a node
    /// failure the returned state (or the state replayed before the error is
    /// returned) carries a `PIPELINE_ERROR` status.
    #[instrument(skip_all, fields(artifact = %initial.artifact))]
    pub async fn run_with(&self, initial: RunState, options: RunOptions) -> Result<RunState> {
        let mut ctx = RunContext::new();
        let input = initial.snapshot();
        let mut state = initial;

        let outcome = self.drive(&mut ctx, &mut state).await;
        let duration = ctx.elapsed();

        if let Err(err) = &outcome {
            error!(error = %err, steps = ctx.steps().len(), "pipeline halted");
            state.mark_pipeline_error(err);
        } else {
            info!(
                passed = state.passed,
                iterations = state.iteration,
                duration_ms = duration.as_millis() as u64,
                "pipeline complete"
            );
        }

        let summary = WorkflowSummary {
            name: self.config.workflow_name.clone(),
            input,
            output: state.snapshot(),
            duration,
            status_override: outcome.is_err().then_some(StatusCode::ERROR),
        };
        self.replayer.replay(&mut ctx, summary).await;

        if options.upload == UploadMode::PerRun {
            self.replayer.client().flush().await;
        }

        match outcome {
            Err(err) if options.raise_on_error => Err(err),
            _ => Ok(state),
        }
    }

    async fn drive(&self, ctx: &mut RunContext, state: &mut RunState) -> Result<()> {
        let mut stage = Stage::Assess;
        while stage != Stage::Terminal {
            match stage {
                Stage::Assess => {
                    let update = self.assess.observe(ctx, state).await?;
                    state.apply_assess(update);
                }
                Stage::Improve => {
                    let update = self.improve.observe(ctx, state).await?;
                    state.apply_improve(update);
                }
                Stage::Finalize => {
                    let update = self.finalize.observe(ctx, state).await?;
                    state.apply_finalize(update);
                }
                Stage::Terminal => break,
            }

            let transition = route(stage, state);
            if transition.forced_exit {
                warn!(
                    iteration = state.iteration,
                    max_iterations = state.max_iterations,
                    "iteration limit reached without passing, finalizing anyway"
                );
            }
            stage = transition.next;
        }
        Ok(())
    }
}
