//! Many runs against one shared telemetry client.
//!
//! Three scheduling modes compare upload strategies:
//!
//! - `sequential-per-run`: runs back to back, the client is reset before each
//!   run and every run uploads its own workflow
//! - `sequential-batch`: runs back to back with deferred upload, then one flush
//! - `concurrent-batch`: up to `workers` runs at once, then one flush

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::collaborator::ArtifactRef;
use crate::orchestrator::{Orchestrator, RunOptions};
use crate::pgm::synth;
use crate::state::RunState;
use crate::uploader::{BatchUploader, UploadMode};
use crate::{Error, Result};

/// How a bulk job schedules its runs and uploads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum BulkMode {
    /// Sequential runs, each uploading on its own.
    SequentialPerRun,
    /// Sequential runs, one upload at the end.
    #[default]
    SequentialBatch,
    /// Concurrent runs, one upload at the end.
    ConcurrentBatch,
}

/// Settings for a bulk job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkConfig {
    /// Scheduling mode.
    pub mode: BulkMode,
    /// Concurrent runs allowed in `concurrent-batch` mode.
    pub workers: usize,
    /// Improvement bound for each run.
    pub max_iterations: u32,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            mode: BulkMode::SequentialBatch,
            workers: 4,
            max_iterations: 3,
        }
    }
}

/// Result of one run in a bulk job.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    /// The artifact the run started from.
    pub artifact: ArtifactRef,
    /// Whether the final assessment passed.
    pub passed: bool,
    /// Improvement passes completed.
    pub iterations: u32,
    /// Final status text, or the error that ended the run.
    pub status: String,
    /// Whether the run ended in an error or its worker panicked.
    pub failed: bool,
}

impl RunSummary {
    fn from_state(state: &RunState) -> Self {
        Self {
            artifact: state.original_artifact.clone(),
            passed: state.passed,
            iterations: state.iteration,
            status: state.status.clone(),
            failed: state.is_pipeline_error(),
        }
    }

    fn from_error(artifact: ArtifactRef, err: &Error) -> Self {
        Self {
            artifact,
            passed: false,
            iterations: 0,
            status: format!("{}: {}", err.kind(), err),
            failed: true,
        }
    }

    fn panicked(artifact: ArtifactRef) -> Self {
        Self {
            artifact,
            passed: false,
            iterations: 0,
            status: "Panic: bulk worker panicked".to_string(),
            failed: true,
        }
    }
}

/// Aggregate outcome of a bulk job.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkReport {
    /// Mode the job ran in.
    pub mode: BulkMode,
    /// One summary per input artifact, in input order.
    pub runs: Vec<RunSummary>,
    /// Workflows sent by the final flush; `None` when each run uploaded itself.
    pub uploaded: Option<usize>,
    /// Wall time of the whole job, upload included.
    pub elapsed: Duration,
}

impl BulkReport {
    /// Runs that passed assessment.
    pub fn passed(&self) -> usize {
        self.runs.iter().filter(|r| r.passed).count()
    }

    /// Runs that ended in a pipeline error.
    pub fn failed(&self) -> usize {
        self.runs.iter().filter(|r| r.failed).count()
    }
}

/// Write `count` synthetic samples into `dir`, cycling through palettes.
///
/// Every other sample is blurred so all three metrics get exercised.
pub async fn prepare_samples(dir: &Path, count: usize) -> Result<Vec<ArtifactRef>> {
    tokio::fs::create_dir_all(dir).await?;
    let writes = (0..count).map(|i| {
        let path = dir.join(format!("sample_{i:03}.pgm"));
        async move { synth::write_sample(&path, i, i % 2 == 1).await }
    });
    futures::future::try_join_all(writes).await
}

/// Run every artifact through `orchestrator` using `config.mode`.
///
/// Individual run failures are captured in the report and never abort the job.
pub async fn run_bulk(
    orchestrator: Arc<Orchestrator>,
    artifacts: Vec<ArtifactRef>,
    config: BulkConfig,
) -> BulkReport {
    let started = Instant::now();
    info!(mode = ?config.mode, runs = artifacts.len(), "starting bulk job");

    let (runs, uploaded) = match config.mode {
        BulkMode::SequentialPerRun => {
            let mut runs = Vec::with_capacity(artifacts.len());
            for artifact in artifacts {
                orchestrator.telemetry().reset().await;
                runs.push(run_one(&orchestrator, artifact, config, UploadMode::PerRun).await);
            }
            (runs, None)
        }
        BulkMode::SequentialBatch => {
            let mut runs = Vec::with_capacity(artifacts.len());
            for artifact in artifacts {
                runs.push(run_one(&orchestrator, artifact, config, UploadMode::Deferred).await);
            }
            let uploaded = BatchUploader::new(orchestrator.telemetry().clone()).flush().await;
            (runs, Some(uploaded))
        }
        BulkMode::ConcurrentBatch => {
            let runs = run_concurrent(&orchestrator, artifacts, config).await;
            let uploaded = BatchUploader::new(orchestrator.telemetry().clone()).flush().await;
            (runs, Some(uploaded))
        }
    };

    let report = BulkReport {
        mode: config.mode,
        runs,
        uploaded,
        elapsed: started.elapsed(),
    };
    info!(
        passed = report.passed(),
        failed = report.failed(),
        uploaded = ?report.uploaded,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "bulk job finished"
    );
    report
}

async fn run_one(
    orchestrator: &Orchestrator,
    artifact: ArtifactRef,
    config: BulkConfig,
    upload: UploadMode,
) -> RunSummary {
    let options = RunOptions {
        raise_on_error: false,
        upload,
    };
    let initial = RunState::new(artifact.clone(), config.max_iterations);
    match orchestrator.run_with(initial, options).await {
        Ok(state) => RunSummary::from_state(&state),
        Err(err) => RunSummary::from_error(artifact, &err),
    }
}

/// Runs every artifact on the worker pool. A worker that panics still leaves
/// a failed summary at its artifact's position.
async fn run_concurrent(
    orchestrator: &Arc<Orchestrator>,
    artifacts: Vec<ArtifactRef>,
    config: BulkConfig,
) -> Vec<RunSummary> {
    let permits = Arc::new(Semaphore::new(config.workers.max(1)));
    let mut set = JoinSet::new();

    for (index, artifact) in artifacts.iter().cloned().enumerate() {
        let permits = Arc::clone(&permits);
        let orchestrator = Arc::clone(orchestrator);
        set.spawn(async move {
            // the semaphore is never closed
            let _permit = permits.acquire_owned().await.ok();
            let summary = run_one(&orchestrator, artifact, config, UploadMode::Deferred).await;
            (index, summary)
        });
    }

    let mut slots: Vec<Option<RunSummary>> = vec![None; artifacts.len()];
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, summary)) => slots[index] = Some(summary),
            Err(err) => warn!(error = %err, "bulk worker panicked"),
        }
    }
    slots
        .into_iter()
        .zip(artifacts)
        .map(|(slot, artifact)| slot.unwrap_or_else(|| RunSummary::panicked(artifact)))
        .collect()
}
