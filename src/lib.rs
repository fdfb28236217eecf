//! # artifact-refinery
//!
//! Bounded assess → improve → finalize workflows with atomic telemetry replay.
//!
//! A run scores an artifact, improves it until it passes or the iteration
//! bound is hit, and renders a final output. Every stage invocation is
//! recorded in the run's own context and, once the run ends, replayed to a
//! shared telemetry backend as one indivisible workflow.
//!
//! ## Core Concepts
//!
//! - **Orchestrator**: drives the state machine for one artifact per run
//! - **route**: the pure transition function that enforces the iteration bound
//! - **InstrumentedNode**: wraps a stage so each call leaves one step record
//! - **RunContext**: per-run step buffer, passed explicitly through stages
//! - **Replayer**: sends a finished run as begin/steps/conclude under one lock
//! - **TelemetryClient**: lazily initialized, shared, no-op when disabled
//! - **BatchUploader**: one upload for many deferred runs
//!
//! ## Example: Scripted Collaborators
//!
//! ```rust
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use artifact_refinery::{
//!     ArtifactRef, Assessment, Assessor, Finalizer, Improvement, Improver, MetricScore,
//!     Orchestrator, PipelineConfig, Result, RunState, TelemetryClient,
//! };
//!
//! struct Length;
//!
//! #[async_trait]
//! impl Assessor for Length {
//!     async fn assess(&self, a: &ArtifactRef) -> Result<BTreeMap<String, MetricScore>> {
//!         let score = a.to_string().len() as f64 / 10.0;
//!         Ok(BTreeMap::from([("length".to_string(), MetricScore::new(score, score))]))
//!     }
//! }
//!
//! struct Append;
//!
//! #[async_trait]
//! impl Improver for Append {
//!     async fn improve(&self, a: &ArtifactRef, _: &Assessment, _: u32) -> Result<Improvement> {
//!         Ok(Improvement { artifact: ArtifactRef::new(format!("{a}xx")), applied: vec!["append".into()] })
//!     }
//! }
//!
//! struct Keep;
//!
//! #[async_trait]
//! impl Finalizer for Keep {
//!     async fn finalize(&self, a: &ArtifactRef) -> Result<ArtifactRef> {
//!         Ok(a.clone())
//!     }
//! }
//!
//! # tokio_test::block_on(async {
//! let orchestrator = Orchestrator::new(
//!     Arc::new(Length),
//!     Arc::new(Append),
//!     Arc::new(Keep),
//!     TelemetryClient::disabled(),
//!     PipelineConfig::default(),
//! );
//!
//! let state = orchestrator.run(RunState::new("abcd", 5)).await.unwrap();
//! assert!(state.passed);
//! assert_eq!(state.iteration, 1); // "abcdxx" scores 0.6
//! # });
//! ```

pub mod anomaly;
pub mod bulk;
pub mod cli;
pub mod collaborator;
pub mod config;
pub mod context;
pub mod error;
pub mod instrumented;
pub mod node;
pub mod orchestrator;
pub mod pgm;
pub mod recorder;
pub mod replay;
pub mod router;
pub mod state;
pub mod telemetry;
pub mod uploader;

pub use collaborator::{ArtifactRef, Assessor, Finalizer, Improvement, Improver};
pub use config::{PipelineConfig, TelemetryConfig};
pub use context::RunContext;
pub use error::{Error, Result};
pub use instrumented::InstrumentedNode;
pub use node::{AssessNode, FinalizeNode, ImproveNode, Node};
pub use orchestrator::{Orchestrator, RunOptions};
pub use recorder::{StatusCode, StepRecord, StepRecorder};
pub use replay::{ReplayOutcome, Replayer, WorkflowSummary};
pub use router::{route, Stage, Transition};
pub use state::{Assessment, ImprovementEntry, MetricScore, RunState};
pub use telemetry::{ClientState, DisabledBackend, TelemetryBackend, TelemetryClient};
pub use uploader::{BatchUploader, UploadMode};
