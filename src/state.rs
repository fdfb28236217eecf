//! Run state and the typed updates each stage may apply to it.
//!
//! Stages never mutate [`RunState`] directly. Each returns its own update type
//! and the orchestrator merges it, so the set of fields a stage can touch is
//! fixed by the type:
//!
//! | stage    | update            | fields                                  |
//! |----------|-------------------|-----------------------------------------|
//! | assess   | [`AssessUpdate`]  | `assessment`, `passed`, `status`        |
//! | improve  | [`ImproveUpdate`] | `artifact`, `status` (+ `iteration`, `history` by the orchestrator) |
//! | finalize | [`FinalizeUpdate`]| `output`, `status`                      |

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::collaborator::ArtifactRef;
use crate::Error;

/// Prefix of the status string of a run that halted on a node failure.
pub const PIPELINE_ERROR: &str = "PIPELINE_ERROR";

/// Raw measurement and its normalised 0..=1 score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricScore {
    /// The measured value.
    pub raw: f64,
    /// Normalised score in `0.0..=1.0`.
    pub score: f64,
}

impl MetricScore {
    /// Build a score, clamping it into `0.0..=1.0`.
    pub fn new(raw: f64, score: f64) -> Self {
        Self {
            raw,
            score: score.clamp(0.0, 1.0),
        }
    }
}

/// Outcome of one assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    /// Per-metric scores, keyed by metric name.
    pub metrics: BTreeMap<String, MetricScore>,
    /// Mean of the metric scores, rounded to three decimals.
    pub overall: f64,
}

impl Assessment {
    /// Aggregate metric scores into an assessment.
    ///
    /// An empty metric set scores `0.0`.
    pub fn from_metrics(metrics: BTreeMap<String, MetricScore>) -> Self {
        let overall = if metrics.is_empty() {
            0.0
        } else {
            let sum: f64 = metrics.values().map(|m| m.score).sum();
            round3(sum / metrics.len() as f64)
        };
        Self { metrics, overall }
    }

    /// Score of a named metric, if present.
    pub fn score(&self, metric: &str) -> Option<f64> {
        self.metrics.get(metric).map(|m| m.score)
    }
}

/// One applied improvement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImprovementEntry {
    /// 1-based iteration number.
    pub iteration: u32,
    /// What was applied.
    pub applied: Vec<String>,
    /// Artifact written by this iteration.
    pub output: ArtifactRef,
}

/// Mutable state of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    /// Current (possibly improved) artifact.
    pub artifact: ArtifactRef,
    /// The artifact the run started from.
    pub original_artifact: ArtifactRef,
    /// Most recent assessment.
    pub assessment: Option<Assessment>,
    /// Whether the most recent assessment passed.
    pub passed: bool,
    /// Improvements applied so far.
    pub iteration: u32,
    /// Upper bound on improvements.
    pub max_iterations: u32,
    /// Improvements applied, in order.
    pub history: Vec<ImprovementEntry>,
    /// Final derived output.
    pub output: Option<ArtifactRef>,
    /// Human-readable status.
    pub status: String,
}

impl RunState {
    /// Initial state for an artifact.
    pub fn new(artifact: impl Into<ArtifactRef>, max_iterations: u32) -> Self {
        let artifact = artifact.into();
        Self {
            original_artifact: artifact.clone(),
            artifact,
            assessment: None,
            passed: false,
            iteration: 0,
            max_iterations,
            history: Vec::new(),
            output: None,
            status: "Starting pipeline".to_string(),
        }
    }

    /// JSON snapshot with the improvement history left out.
    pub fn snapshot(&self) -> String {
        let mut value = match serde_json::to_value(self) {
            Ok(value) => value,
            Err(_) => return "<serialization_error>".to_string(),
        };
        if let Some(map) = value.as_object_mut() {
            map.remove("history");
        }
        value.to_string()
    }

    /// Tag this state as halted by `err`.
    pub fn mark_pipeline_error(&mut self, err: &Error) {
        self.status = format!("{PIPELINE_ERROR}: {}: {}", err.kind(), err);
    }

    /// Whether the run halted on a node failure.
    pub fn is_pipeline_error(&self) -> bool {
        self.status.starts_with(PIPELINE_ERROR)
    }

    pub(crate) fn apply_assess(&mut self, update: AssessUpdate) {
        self.assessment = Some(update.assessment);
        self.passed = update.passed;
        self.status = update.status;
    }

    pub(crate) fn apply_improve(&mut self, update: ImproveUpdate) {
        self.iteration += 1;
        self.history.push(ImprovementEntry {
            iteration: self.iteration,
            applied: update.applied,
            output: update.artifact.clone(),
        });
        self.artifact = update.artifact;
        self.status = update.status;
    }

    pub(crate) fn apply_finalize(&mut self, update: FinalizeUpdate) {
        self.output = Some(update.output);
        self.status = update.status;
    }
}

/// Update produced by the assess stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessUpdate {
    /// The new assessment.
    pub assessment: Assessment,
    /// Whether it met the pass threshold.
    pub passed: bool,
    /// Status message.
    pub status: String,
}

/// Update produced by the improve stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImproveUpdate {
    /// The improved artifact.
    pub artifact: ArtifactRef,
    /// What was applied.
    pub applied: Vec<String>,
    /// Status message.
    pub status: String,
}

/// Update produced by the finalize stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalizeUpdate {
    /// The rendered output.
    pub output: ArtifactRef,
    /// Status message.
    pub status: String,
}

pub(crate) fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_excludes_history() {
        let mut state = RunState::new(ArtifactRef::new("a.pgm"), 3);
        state.apply_improve(ImproveUpdate {
            artifact: ArtifactRef::new("a_iter1.pgm"),
            applied: vec!["Contrast x1.20".into()],
            status: "Enhanced".into(),
        });

        let snapshot: serde_json::Value = serde_json::from_str(&state.snapshot()).unwrap();
        assert!(snapshot.get("history").is_none());
        assert_eq!(snapshot["iteration"], 1);
        assert_eq!(snapshot["artifact"], "a_iter1.pgm");
    }

    #[test]
    fn test_improve_merge_increments_and_logs() {
        let mut state = RunState::new(ArtifactRef::new("a.pgm"), 3);
        for n in 1..=2 {
            state.apply_improve(ImproveUpdate {
                artifact: ArtifactRef::new(format!("a_iter{n}.pgm")),
                applied: vec![],
                status: String::new(),
            });
        }
        assert_eq!(state.iteration, 2);
        assert_eq!(state.history[1].iteration, 2);
        assert_eq!(state.original_artifact, ArtifactRef::new("a.pgm"));
    }

    #[test]
    fn test_overall_is_rounded_mean() {
        let metrics = BTreeMap::from([
            ("a".to_string(), MetricScore::new(1.0, 1.0)),
            ("b".to_string(), MetricScore::new(1.0, 0.5)),
            ("c".to_string(), MetricScore::new(1.0, 0.0)),
        ]);
        assert_eq!(Assessment::from_metrics(metrics).overall, 0.5);
        assert_eq!(Assessment::from_metrics(BTreeMap::new()).overall, 0.0);
        assert_eq!(MetricScore::new(3.0, 1.7).score, 1.0);
    }

    #[test]
    fn test_pipeline_error_tag() {
        let mut state = RunState::new(ArtifactRef::new("a.pgm"), 3);
        assert!(!state.is_pipeline_error());
        state.mark_pipeline_error(&Error::Artifact("empty file".into()));
        assert_eq!(
            state.status,
            "PIPELINE_ERROR: ArtifactError: malformed artifact: empty file"
        );
        assert!(state.is_pipeline_error());
    }
}
