//! Workflow records as the backend sees them, and the staging buffer shared by
//! the buffering backends.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::recorder::StatusCode;
use crate::{Error, Result};

/// Free-form string metadata attached to workflows and steps.
pub type Metadata = BTreeMap<String, String>;

/// One step as transmitted to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepPayload {
    /// Stage name.
    pub name: String,
    /// Serialized input.
    pub input: String,
    /// Serialized output or error description.
    pub output: String,
    /// Duration in nanoseconds.
    pub duration_ns: u64,
    /// Step status.
    pub status_code: StatusCode,
    /// Extra labels.
    pub metadata: Metadata,
}

/// A concluded workflow, ready for upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowRecord {
    /// Workflow name.
    pub name: String,
    /// Serialized run input.
    pub input: String,
    /// Serialized run output.
    pub output: String,
    /// Total duration in nanoseconds.
    pub duration_ns: u64,
    /// Aggregate status.
    pub status_code: StatusCode,
    /// Extra labels.
    pub metadata: Metadata,
    /// Steps in execution order.
    pub steps: Vec<StepPayload>,
}

#[derive(Debug, Clone)]
struct OpenWorkflow {
    name: String,
    input: String,
    metadata: Metadata,
    steps: Vec<StepPayload>,
}

/// Stages workflows between `begin` and `conclude`.
///
/// Only concluded workflows become uploadable. An open workflow is dropped by
/// [`abandon`](WorkflowBuffer::abandon) or by the next
/// [`begin`](WorkflowBuffer::begin), so a workflow that never concluded is
/// never uploaded.
#[derive(Debug, Default, Clone)]
pub struct WorkflowBuffer {
    open: Option<OpenWorkflow>,
    completed: Vec<WorkflowRecord>,
}

impl WorkflowBuffer {
    /// Create an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new workflow, discarding any workflow left open.
    pub fn begin(&mut self, input: &str, name: &str, metadata: Metadata) {
        if let Some(stale) = self.open.take() {
            tracing::warn!(
                workflow = %stale.name,
                steps = stale.steps.len(),
                "discarding workflow that was never concluded"
            );
        }
        self.open = Some(OpenWorkflow {
            name: name.to_string(),
            input: input.to_string(),
            metadata,
            steps: Vec::new(),
        });
    }

    /// Append a step to the open workflow.
    pub fn add_step(&mut self, step: StepPayload) -> Result<()> {
        match self.open.as_mut() {
            Some(open) => {
                open.steps.push(step);
                Ok(())
            }
            None => Err(Error::Telemetry("add_step without an open workflow".into())),
        }
    }

    /// Close the open workflow and queue it for upload.
    pub fn conclude(&mut self, output: &str, duration: Duration, status: StatusCode) -> Result<()> {
        let open = self
            .open
            .take()
            .ok_or_else(|| Error::Telemetry("conclude without an open workflow".into()))?;
        self.completed.push(WorkflowRecord {
            name: open.name,
            input: open.input,
            output: output.to_string(),
            duration_ns: u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX),
            status_code: status,
            metadata: open.metadata,
            steps: open.steps,
        });
        Ok(())
    }

    /// Drop the open workflow, if any.
    pub fn abandon(&mut self) {
        self.open = None;
    }

    /// Whether a workflow is currently open.
    pub fn has_open(&self) -> bool {
        self.open.is_some()
    }

    /// Concluded workflows not yet uploaded.
    pub fn pending(&self) -> &[WorkflowRecord] {
        &self.completed
    }

    /// Remove and return every concluded workflow.
    pub fn take_completed(&mut self) -> Vec<WorkflowRecord> {
        std::mem::take(&mut self.completed)
    }

    /// Put workflows back at the front of the queue after a failed upload.
    pub fn restore(&mut self, mut workflows: Vec<WorkflowRecord>) {
        workflows.append(&mut self.completed);
        self.completed = workflows;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(name: &str) -> StepPayload {
        StepPayload {
            name: name.to_string(),
            input: "{}".to_string(),
            output: "{}".to_string(),
            duration_ns: 10,
            status_code: StatusCode::OK,
            metadata: Metadata::new(),
        }
    }

    #[test]
    fn test_only_concluded_workflows_are_pending() {
        let mut buffer = WorkflowBuffer::new();
        buffer.begin("in", "wf", Metadata::new());
        buffer.add_step(step("assess")).unwrap();
        assert!(buffer.pending().is_empty());

        buffer
            .conclude("out", Duration::from_millis(1), StatusCode::OK)
            .unwrap();
        assert_eq!(buffer.pending().len(), 1);
        assert_eq!(buffer.pending()[0].steps.len(), 1);
        assert!(!buffer.has_open());
    }

    #[test]
    fn test_begin_discards_dangling_workflow() {
        let mut buffer = WorkflowBuffer::new();
        buffer.begin("first", "wf", Metadata::new());
        buffer.add_step(step("assess")).unwrap();
        buffer.begin("second", "wf", Metadata::new());
        buffer
            .conclude("out", Duration::ZERO, StatusCode::OK)
            .unwrap();

        let done = buffer.take_completed();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].input, "second");
        assert!(done[0].steps.is_empty());
    }

    #[test]
    fn test_step_without_begin_is_rejected() {
        let mut buffer = WorkflowBuffer::new();
        assert!(buffer.add_step(step("assess")).is_err());
        assert!(buffer.conclude("x", Duration::ZERO, StatusCode::OK).is_err());
    }

    #[test]
    fn test_restore_keeps_original_order() {
        let mut buffer = WorkflowBuffer::new();
        for input in ["a", "b"] {
            buffer.begin(input, "wf", Metadata::new());
            buffer.conclude("", Duration::ZERO, StatusCode::OK).unwrap();
        }
        let taken = buffer.take_completed();
        buffer.begin("c", "wf", Metadata::new());
        buffer.conclude("", Duration::ZERO, StatusCode::OK).unwrap();
        buffer.restore(taken);

        let inputs: Vec<_> = buffer.pending().iter().map(|w| w.input.as_str()).collect();
        assert_eq!(inputs, ["a", "b", "c"]);
    }
}
