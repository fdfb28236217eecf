//! Malformed and edge-case artifacts run through the full pipeline.
//!
//! Every case runs with `raise_on_error = false` and deferred upload, so a bad
//! input shows up as a `PIPELINE_ERROR` state instead of aborting the suite.
//! One flush at the end uploads all ten workflows.

use std::fmt::Write as _;
use std::path::Path;

use tracing::info;

use crate::collaborator::ArtifactRef;
use crate::orchestrator::{Orchestrator, RunOptions};
use crate::pgm::{synth, Graymap};
use crate::state::RunState;
use crate::uploader::{BatchUploader, UploadMode};
use crate::Result;

/// Dimensions of the oversized fixture.
pub const HUGE_DIMENSIONS: (usize, usize) = (2048, 1536);

/// One fixture and whether the pipeline should reject it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnomalyCase {
    /// Short identifier, also the fixture's file stem.
    pub name: &'static str,
    /// What is wrong with the fixture.
    pub description: &'static str,
    /// Whether the run should end in a pipeline error.
    pub expect_error: bool,
    /// Fixture location. May not exist.
    pub artifact: ArtifactRef,
}

/// What happened when a case ran.
#[derive(Debug, Clone, PartialEq)]
pub struct CaseOutcome {
    /// The case that ran.
    pub case: AnomalyCase,
    /// Whether the run ended in a pipeline error.
    pub errored: bool,
    /// Improvement passes completed before the run ended.
    pub iterations: u32,
    /// Final status text of the run.
    pub status: String,
}

impl CaseOutcome {
    /// Whether the run behaved as the case expected.
    pub fn as_expected(&self) -> bool {
        self.errored == self.case.expect_error
    }
}

/// Outcome of the whole suite.
#[derive(Debug, Clone, PartialEq)]
pub struct AnomalyReport {
    /// One outcome per case, in fixture order.
    pub outcomes: Vec<CaseOutcome>,
    /// Workflows sent by the final flush.
    pub uploaded: usize,
}

impl AnomalyReport {
    /// Cases whose outcome differed from the expectation.
    pub fn mismatches(&self) -> Vec<&CaseOutcome> {
        self.outcomes.iter().filter(|o| !o.as_expected()).collect()
    }

    /// Plain-text expected-vs-actual table.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:<18} {:<9} {:<9} {:<8} status",
            "case",
            "expected",
            "actual",
            "verdict"
        );
        for o in &self.outcomes {
            let label = |error: bool| if error { "error" } else { "ok" };
            let _ = writeln!(
                out,
                "{:<18} {:<9} {:<9} {:<8} {}",
                o.case.name,
                label(o.case.expect_error),
                label(o.errored),
                if o.as_expected() { "MATCH" } else { "MISMATCH" },
                o.status
            );
        }
        let _ = writeln!(
            out,
            "{}/{} cases as expected, {} workflows uploaded",
            self.outcomes.len() - self.mismatches().len(),
            self.outcomes.len(),
            self.uploaded
        );
        out
    }
}

/// Write the ten fixtures into `dir`.
///
/// `missing_file` points at a path that is deliberately never created.
pub async fn write_fixtures(dir: &Path) -> Result<Vec<AnomalyCase>> {
    tokio::fs::create_dir_all(dir).await?;

    let mut corrupted = synth::noise(4096, 0x0BAD_F00D);
    corrupted[0] = 0xFF;

    let sample = synth::scene(synth::SAMPLE_WIDTH, synth::SAMPLE_HEIGHT, 4, false);
    let mut truncated = sample.encode();
    truncated.truncate(truncated.len() - sample.pixels().len() / 2);

    let small = synth::scene(64, 48, 2, false);
    let mut low_depth = b"P5\n64 48\n15\n".to_vec();
    low_depth.extend(small.pixels().iter().map(|p| p / 17));

    let mut annotated = b"P5\n# scanner: bench-7\n# gain: 2\n64 48\n255\n".to_vec();
    annotated.extend_from_slice(small.pixels());
    annotated.extend_from_slice(b"trailing bytes");

    let (huge_w, huge_h) = HUGE_DIMENSIONS;
    let fixtures: Vec<(&'static str, &'static str, bool, Option<Vec<u8>>)> = vec![
        ("missing_file", "path that does not exist", true, None),
        ("zero_byte", "empty file", true, Some(Vec::new())),
        ("corrupted_random", "random bytes", true, Some(corrupted)),
        ("truncated", "raster cut in half", true, Some(truncated)),
        (
            "wrong_format_txt",
            "plain text with an image name",
            true,
            Some(b"this is not an image\n".to_vec()),
        ),
        ("tiny_1x1", "single pixel", false, Some(tiny()?.encode())),
        (
            "huge",
            "oversized image",
            false,
            Some(synth::scene(huge_w, huge_h, 4, false).encode()),
        ),
        ("low_bit_depth", "maxval 15", false, Some(low_depth)),
        ("annotated_header", "header comments and trailing data", false, Some(annotated)),
        ("normal_control", "ordinary sample", false, Some(sample.encode())),
    ];

    let mut cases = Vec::with_capacity(fixtures.len());
    for (name, description, expect_error, bytes) in fixtures {
        let ext = if name == "wrong_format_txt" { "txt" } else { "pgm" };
        let path = dir.join(format!("{name}.{ext}"));
        if let Some(bytes) = bytes {
            tokio::fs::write(&path, bytes).await?;
        }
        cases.push(AnomalyCase {
            name,
            description,
            expect_error,
            artifact: ArtifactRef::new(path),
        });
    }
    Ok(cases)
}

fn tiny() -> Result<Graymap> {
    Graymap::filled(1, 1, 128)
}

/// Run every case and upload the results in one batch.
pub async fn run_suite(
    orchestrator: &Orchestrator,
    cases: Vec<AnomalyCase>,
    max_iterations: u32,
) -> AnomalyReport {
    let options = RunOptions {
        raise_on_error: false,
        upload: UploadMode::Deferred,
    };

    let mut outcomes = Vec::with_capacity(cases.len());
    for case in cases {
        info!(case = case.name, "running anomaly case");
        let initial = RunState::new(case.artifact.clone(), max_iterations);
        let outcome = match orchestrator.run_with(initial, options).await {
            Ok(state) => CaseOutcome {
                errored: state.is_pipeline_error(),
                iterations: state.iteration,
                status: state.status,
                case,
            },
            Err(err) => CaseOutcome {
                errored: true,
                iterations: 0,
                status: err.to_string(),
                case,
            },
        };
        outcomes.push(outcome);
    }

    let uploaded = BatchUploader::new(orchestrator.telemetry().clone())
        .flush()
        .await;
    AnomalyReport { outcomes, uploaded }
}
