//! Ordered step log for a single run.
//!
//! Every stage invocation produces exactly one [`StepRecord`]. Records are
//! appended to the run's [`StepRecorder`] in execution order and drained once
//! by the replayer when the run ends.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// HTTP-style status code attached to steps and workflows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusCode(pub u16);

impl StatusCode {
    /// The step or workflow completed normally.
    pub const OK: StatusCode = StatusCode(200);
    /// The step or workflow failed.
    pub const ERROR: StatusCode = StatusCode(500);

    /// Whether this code signals a failure (`>= 400`).
    pub fn is_error(self) -> bool {
        self.0 >= 400
    }

    /// `"error"` or `"ok"`.
    pub fn label(self) -> &'static str {
        if self.is_error() {
            "error"
        } else {
            "ok"
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One executed stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Stage name (`assess`, `improve`, `finalize`).
    pub stage: String,
    /// JSON snapshot of the state the stage received.
    pub input: String,
    /// JSON snapshot of the stage's update, or `ERROR: <kind>: <message>`.
    pub output: String,
    /// Wall-clock time spent inside the stage.
    pub duration: Duration,
    /// 200 on success, 500 on failure.
    pub status: StatusCode,
}

impl StepRecord {
    /// Duration in nanoseconds, saturating at `u64::MAX`.
    pub fn duration_ns(&self) -> u64 {
        u64::try_from(self.duration.as_nanos()).unwrap_or(u64::MAX)
    }
}

/// Append-only log of steps, owned by exactly one run.
#[derive(Debug, Default, Clone)]
pub struct StepRecorder {
    records: Vec<StepRecord>,
}

impl StepRecorder {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record.
    pub fn push(&mut self, record: StepRecord) {
        let tag = if record.status.is_error() { "ERROR" } else { "OK" };
        tracing::debug!(
            stage = %record.stage,
            duration_ms = record.duration.as_millis() as u64,
            "collected step [{tag}]"
        );
        self.records.push(record);
    }

    /// Records collected so far, in execution order.
    pub fn records(&self) -> &[StepRecord] {
        &self.records
    }

    /// Number of collected records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Whether any collected step failed.
    pub fn has_errors(&self) -> bool {
        self.records.iter().any(|r| r.status.is_error())
    }

    /// Take every record out, leaving the recorder empty.
    pub fn drain(&mut self) -> Vec<StepRecord> {
        std::mem::take(&mut self.records)
    }

    /// Discard all records.
    pub fn clear(&mut self) {
        self.records.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(stage: &str, status: StatusCode) -> StepRecord {
        StepRecord {
            stage: stage.to_string(),
            input: "{}".to_string(),
            output: "{}".to_string(),
            duration: Duration::from_nanos(1_500),
            status,
        }
    }

    #[test]
    fn test_drain_preserves_order_and_empties() {
        let mut recorder = StepRecorder::new();
        recorder.push(record("assess", StatusCode::OK));
        recorder.push(record("improve", StatusCode::OK));
        recorder.push(record("assess", StatusCode::OK));

        let drained = recorder.drain();
        let names: Vec<_> = drained.iter().map(|r| r.stage.as_str()).collect();
        assert_eq!(names, ["assess", "improve", "assess"]);
        assert!(recorder.is_empty());
        assert!(recorder.drain().is_empty());
    }

    #[test]
    fn test_has_errors() {
        let mut recorder = StepRecorder::new();
        recorder.push(record("assess", StatusCode::OK));
        assert!(!recorder.has_errors());
        recorder.push(record("improve", StatusCode(404)));
        assert!(recorder.has_errors());
    }

    #[test]
    fn test_status_code_serializes_as_number() {
        let json = serde_json::to_string(&record("finalize", StatusCode::ERROR)).unwrap();
        assert!(json.contains("\"status\":500"));
        assert_eq!(record("x", StatusCode::OK).duration_ns(), 1_500);
    }
}
