//! In-process telemetry backend.
//!
//! Clones share one store, so a caller can hand a clone to a
//! [`TelemetryClient`](super::TelemetryClient) and inspect what arrived through
//! another. Failures can be scripted with [`FailurePoint`] to exercise the
//! error paths of replay and upload.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::record::{Metadata, StepPayload, WorkflowBuffer, WorkflowRecord};
use super::TelemetryBackend;
use crate::recorder::StatusCode;
use crate::{Error, Result};

/// A remote call as seen by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    /// `begin_workflow`
    Begin,
    /// `add_step` with the step name.
    Step(String),
    /// `conclude_workflow`
    Conclude,
    /// `upload`
    Upload,
    /// `abandon_workflow`
    Abandon,
}

/// Where a scripted failure should occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePoint {
    /// Every `begin_workflow`.
    Begin,
    /// The n-th (0-based) `add_step` of each workflow.
    Step(usize),
    /// Every `conclude_workflow`.
    Conclude,
    /// Every `upload`.
    Upload,
}

#[derive(Debug, Default)]
struct Store {
    buffer: WorkflowBuffer,
    uploaded: Vec<WorkflowRecord>,
    calls: Vec<BackendCall>,
    failures: Vec<FailurePoint>,
    steps_in_open: usize,
}

/// Telemetry backend that keeps everything in memory.
#[derive(Debug, Default, Clone)]
pub struct InMemoryBackend {
    store: Arc<Mutex<Store>>,
}

impl InMemoryBackend {
    /// Create an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every call matching `point`.
    #[must_use]
    pub fn failing_at(self, point: FailurePoint) -> Self {
        self.store().failures.push(point);
        self
    }

    /// Remove all scripted failures.
    pub fn heal(&self) {
        self.store().failures.clear();
    }

    /// Every call received so far, in order.
    pub fn calls(&self) -> Vec<BackendCall> {
        self.store().calls.clone()
    }

    /// Concluded workflows waiting for upload.
    pub fn pending(&self) -> Vec<WorkflowRecord> {
        self.store().buffer.pending().to_vec()
    }

    /// Workflows uploaded so far.
    pub fn uploaded(&self) -> Vec<WorkflowRecord> {
        self.store().uploaded.clone()
    }

    /// Whether a workflow is open (begun but not concluded or abandoned).
    pub fn has_open_workflow(&self) -> bool {
        self.store().buffer.has_open()
    }

    fn store(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Store {
    fn check(&self, point: FailurePoint) -> Result<()> {
        if self.failures.contains(&point) {
            Err(Error::Telemetry(format!("injected failure at {point:?}")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl TelemetryBackend for InMemoryBackend {
    async fn begin_workflow(&mut self, input: &str, name: &str, metadata: Metadata) -> Result<()> {
        let mut store = self.store();
        store.calls.push(BackendCall::Begin);
        store.check(FailurePoint::Begin)?;
        store.buffer.begin(input, name, metadata);
        store.steps_in_open = 0;
        Ok(())
    }

    async fn add_step(&mut self, step: StepPayload) -> Result<()> {
        let mut store = self.store();
        store.calls.push(BackendCall::Step(step.name.clone()));
        let index = store.steps_in_open;
        store.steps_in_open += 1;
        store.check(FailurePoint::Step(index))?;
        store.buffer.add_step(step)
    }

    async fn conclude_workflow(
        &mut self,
        output: &str,
        duration: Duration,
        status: StatusCode,
    ) -> Result<()> {
        let mut store = self.store();
        store.calls.push(BackendCall::Conclude);
        store.check(FailurePoint::Conclude)?;
        store.buffer.conclude(output, duration, status)
    }

    async fn upload(&mut self) -> Result<usize> {
        let mut store = self.store();
        store.calls.push(BackendCall::Upload);
        store.check(FailurePoint::Upload)?;
        let mut batch = store.buffer.take_completed();
        let count = batch.len();
        store.uploaded.append(&mut batch);
        Ok(count)
    }

    async fn abandon_workflow(&mut self) {
        let mut store = self.store();
        store.calls.push(BackendCall::Abandon);
        store.buffer.abandon();
    }
}
