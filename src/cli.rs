//! Command-line interface for the refinery.
//!
//! Provides commands for refining a single artifact, running bulk jobs, and
//! running the anomaly suite.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use crate::anomaly;
use crate::bulk::{self, BulkConfig, BulkMode};
use crate::config::{PipelineConfig, TelemetryConfig, DEFAULT_MAX_ITERATIONS};
use crate::orchestrator::{Orchestrator, RunOptions};
use crate::pgm::{synth, LevelsAssessor, LevelsImprover, ZoomFinalizer};
use crate::state::RunState;
use crate::telemetry::TelemetryClient;

/// Clip length and frame rate for anomaly fixtures, some of which are huge.
const PREVIEW_CLIP: (Duration, u32) = (Duration::from_secs(1), 4);

/// refine - bounded assess/improve/finalize runs with workflow telemetry
#[derive(Parser, Debug)]
#[command(name = "refine")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub telemetry: TelemetryArgs,

    /// Directory for samples, fixtures and final outputs
    #[arg(long, global = true, default_value = "output")]
    pub output_dir: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

/// Telemetry overrides. Unset flags fall back to `REFINERY_*` variables.
#[derive(Args, Debug, Default)]
pub struct TelemetryArgs {
    /// Telemetry API key
    #[arg(long, env = "REFINERY_API_KEY", global = true, hide_env_values = true)]
    pub api_key: Option<String>,

    /// Telemetry project name
    #[arg(long, env = "REFINERY_PROJECT", global = true)]
    pub project: Option<String>,

    /// Telemetry endpoint base URL
    #[arg(long, env = "REFINERY_ENDPOINT", global = true)]
    pub endpoint: Option<String>,

    /// Run without telemetry
    #[arg(long, global = true)]
    pub no_telemetry: bool,
}

impl TelemetryArgs {
    /// Environment settings with flag overrides applied.
    pub fn config(&self) -> TelemetryConfig {
        let mut config = TelemetryConfig::from_env();
        if let Some(key) = &self.api_key {
            config.api_key = Some(key.clone());
        }
        if let Some(project) = &self.project {
            config.project = project.clone();
        }
        if let Some(endpoint) = &self.endpoint {
            config.endpoint = endpoint.clone();
        }
        config
    }

    /// Build the shared telemetry client.
    pub fn client(&self) -> TelemetryClient {
        if self.no_telemetry {
            TelemetryClient::disabled()
        } else {
            TelemetryClient::from_config(self.config())
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Refine one artifact (a generated sample if none is given)
    Run {
        /// Binary PGM file to refine
        artifact: Option<PathBuf>,

        /// Maximum number of improvement passes
        #[arg(short, long, default_value_t = DEFAULT_MAX_ITERATIONS)]
        max_iterations: u32,
    },

    /// Refine many generated samples on one telemetry client
    Bulk {
        /// Number of samples
        #[arg(short, long, default_value = "20")]
        count: usize,

        /// Scheduling and upload strategy
        #[arg(short, long, value_enum, default_value_t = BulkMode::SequentialBatch)]
        mode: BulkMode,

        /// Concurrent runs in concurrent-batch mode
        #[arg(short, long, default_value = "4")]
        workers: usize,

        /// Maximum number of improvement passes per run
        #[arg(long, default_value = "3")]
        max_iterations: u32,
    },

    /// Run malformed and edge-case artifacts and compare against expectations
    Anomaly {
        /// Maximum number of improvement passes per case
        #[arg(long, default_value = "3")]
        max_iterations: u32,
    },
}

impl Cli {
    /// Execute the CLI command.
    pub async fn execute(self) -> Result<()> {
        let client = self.telemetry.client();
        match self.command {
            Commands::Run {
                artifact,
                max_iterations,
            } => run_single(client, &self.output_dir, artifact, max_iterations).await,
            Commands::Bulk {
                count,
                mode,
                workers,
                max_iterations,
            } => {
                let config = BulkConfig {
                    mode,
                    workers,
                    max_iterations,
                };
                run_bulk(client, &self.output_dir, count, config).await
            }
            Commands::Anomaly { max_iterations } => {
                run_anomaly(client, &self.output_dir, max_iterations).await
            }
        }
    }
}

fn pgm_orchestrator(client: TelemetryClient, finalizer: ZoomFinalizer) -> Orchestrator {
    Orchestrator::new(
        Arc::new(LevelsAssessor),
        Arc::new(LevelsImprover::beside_input()),
        Arc::new(finalizer),
        client,
        PipelineConfig::default(),
    )
}

async fn run_single(
    client: TelemetryClient,
    output_dir: &Path,
    artifact: Option<PathBuf>,
    max_iterations: u32,
) -> Result<()> {
    let artifact = match artifact {
        Some(path) => {
            if !path.is_file() {
                anyhow::bail!("Artifact not found: {}", path.display());
            }
            path
        }
        None => {
            let path = output_dir.join("samples").join("sample.pgm");
            synth::write_sample(&path, 0, true)
                .await
                .context("Failed to generate sample artifact")?;
            println!("Generated sample artifact: {}", path.display());
            path
        }
    };

    let orchestrator = pgm_orchestrator(client, ZoomFinalizer::new(output_dir.join("final")));
    let options = RunOptions {
        raise_on_error: false,
        ..RunOptions::from(orchestrator.config())
    };
    let state = orchestrator
        .run_with(RunState::new(artifact, max_iterations), options)
        .await?;

    println!("Passed:      {}", state.passed);
    println!("Iterations:  {}/{}", state.iteration, state.max_iterations);
    println!("Final image: {}", state.artifact);
    match &state.output {
        Some(output) => println!("Output:      {output}"),
        None => println!("Output:      -"),
    }
    println!("Status:      {}", state.status);
    if !state.history.is_empty() {
        println!("History:");
        for entry in &state.history {
            println!(
                "  {:>2}. {} -> {}",
                entry.iteration,
                entry.applied.join(", "),
                entry.output
            );
        }
    }
    Ok(())
}

async fn run_bulk(
    client: TelemetryClient,
    output_dir: &Path,
    count: usize,
    config: BulkConfig,
) -> Result<()> {
    let samples = bulk::prepare_samples(&output_dir.join("bulk"), count)
        .await
        .context("Failed to generate bulk samples")?;
    let finalizer = ZoomFinalizer::new(output_dir.join("final"));
    let orchestrator = Arc::new(pgm_orchestrator(client, finalizer));
    let report = bulk::run_bulk(orchestrator, samples, config).await;

    for run in &report.runs {
        println!(
            "{:<40} passed={:<5} iterations={} {}",
            run.artifact.to_string(),
            run.passed,
            run.iterations,
            run.status
        );
    }
    println!(
        "{} runs: {} passed, {} failed in {:.2}s",
        report.runs.len(),
        report.passed(),
        report.failed(),
        report.elapsed.as_secs_f64()
    );
    if let Some(uploaded) = report.uploaded {
        println!("Uploaded {uploaded} workflows in one batch");
    }
    Ok(())
}

async fn run_anomaly(
    client: TelemetryClient,
    output_dir: &Path,
    max_iterations: u32,
) -> Result<()> {
    let cases = anomaly::write_fixtures(&output_dir.join("anomaly"))
        .await
        .context("Failed to write anomaly fixtures")?;
    let (duration, fps) = PREVIEW_CLIP;
    let finalizer = ZoomFinalizer::new(output_dir.join("final")).with_clip(duration, fps);
    let orchestrator = pgm_orchestrator(client, finalizer);
    let report = anomaly::run_suite(&orchestrator, cases, max_iterations).await;
    print!("{}", report.render());
    Ok(())
}
