//! Stage nodes.
//!
//! A [`Node`] reads the run state and returns a typed update; it never writes
//! the state itself. The three stage nodes adapt the collaborator traits to
//! that shape.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::collaborator::{Assessor, Finalizer, Improver};
use crate::state::{AssessUpdate, Assessment, FinalizeUpdate, ImproveUpdate, RunState};
use crate::{Error, Result};

/// One unit of stage logic.
#[async_trait]
pub trait Node: Send + Sync {
    /// The update this node produces.
    type Update: Serialize + Send;

    /// Run against the current state.
    async fn run(&self, state: &RunState) -> Result<Self::Update>;
}

/// Scores the current artifact and decides pass/fail.
pub struct AssessNode {
    assessor: Arc<dyn Assessor>,
    pass_threshold: f64,
}

impl AssessNode {
    /// Pass when the overall score reaches `pass_threshold`.
    pub fn new(assessor: Arc<dyn Assessor>, pass_threshold: f64) -> Self {
        Self {
            assessor,
            pass_threshold,
        }
    }
}

#[async_trait]
impl Node for AssessNode {
    type Update = AssessUpdate;

    async fn run(&self, state: &RunState) -> Result<AssessUpdate> {
        let metrics = self.assessor.assess(&state.artifact).await?;
        let assessment = Assessment::from_metrics(metrics);
        let passed = assessment.overall >= self.pass_threshold;
        let verdict = if passed { "passed" } else { "failed" };
        tracing::info!(
            iteration = state.iteration,
            overall = assessment.overall,
            "assessment {verdict}"
        );
        Ok(AssessUpdate {
            status: format!("Assessment {verdict} (overall={})", assessment.overall),
            assessment,
            passed,
        })
    }
}

/// Writes an improved artifact based on the latest assessment.
pub struct ImproveNode {
    improver: Arc<dyn Improver>,
}

impl ImproveNode {
    /// Wrap an improver.
    pub fn new(improver: Arc<dyn Improver>) -> Self {
        Self { improver }
    }
}

#[async_trait]
impl Node for ImproveNode {
    type Update = ImproveUpdate;

    async fn run(&self, state: &RunState) -> Result<ImproveUpdate> {
        let assessment = state
            .assessment
            .as_ref()
            .ok_or_else(|| Error::Validation("improve requires a prior assessment".into()))?;
        let iteration = state.iteration + 1;
        let improvement = self
            .improver
            .improve(&state.artifact, assessment, iteration)
            .await?;
        if improvement.artifact == state.artifact {
            return Err(Error::node(
                "improve",
                "improver returned the input artifact instead of a new one",
            ));
        }
        Ok(ImproveUpdate {
            status: format!(
                "Improved artifact (iteration {iteration}): {}",
                improvement.applied.join(", ")
            ),
            artifact: improvement.artifact,
            applied: improvement.applied,
        })
    }
}

/// Renders the final output.
pub struct FinalizeNode {
    finalizer: Arc<dyn Finalizer>,
}

impl FinalizeNode {
    /// Wrap a finalizer.
    pub fn new(finalizer: Arc<dyn Finalizer>) -> Self {
        Self { finalizer }
    }
}

#[async_trait]
impl Node for FinalizeNode {
    type Update = FinalizeUpdate;

    async fn run(&self, state: &RunState) -> Result<FinalizeUpdate> {
        let output = self.finalizer.finalize(&state.artifact).await?;
        Ok(FinalizeUpdate {
            status: format!("Output rendered at {output}"),
            output,
        })
    }
}
