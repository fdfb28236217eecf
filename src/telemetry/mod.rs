//! Remote telemetry: the backend capability and the shared client.
//!
//! A [`TelemetryClient`] is built once per process (or per logical session) and
//! cloned into every orchestrator that should report to it. The backend behind
//! it is constructed lazily on first use. If construction fails, for example
//! because no API key is configured, the client falls back to
//! [`DisabledBackend`] and stays that way until [`TelemetryClient::reset`].
//!
//! The client's lock is also the transmission lock: a replay holds it across
//! its begin/steps/conclude calls, so concurrent runs never interleave.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

use crate::config::TelemetryConfig;
use crate::recorder::StatusCode;
use crate::{Error, Result};

pub mod http;
pub mod memory;
pub mod record;

pub use http::HttpBackend;
pub use memory::{BackendCall, FailurePoint, InMemoryBackend};
pub use record::{Metadata, StepPayload, WorkflowBuffer, WorkflowRecord};

/// Operations a remote observability backend offers.
///
/// Any call may fail. Callers catch and log failures; they never turn into
/// pipeline errors.
#[async_trait]
pub trait TelemetryBackend: Send {
    /// Open a workflow record.
    async fn begin_workflow(&mut self, input: &str, name: &str, metadata: Metadata) -> Result<()>;

    /// Append a step to the open workflow.
    async fn add_step(&mut self, step: StepPayload) -> Result<()>;

    /// Close the open workflow.
    async fn conclude_workflow(
        &mut self,
        output: &str,
        duration: Duration,
        status: StatusCode,
    ) -> Result<()>;

    /// Persist every concluded workflow, returning how many were uploaded.
    async fn upload(&mut self) -> Result<usize>;

    /// Drop a workflow that was opened but will not be concluded.
    async fn abandon_workflow(&mut self) {}

    /// `false` only for the disabled backend.
    fn is_enabled(&self) -> bool {
        true
    }
}

/// Backend used when telemetry is unavailable. Every call succeeds and does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledBackend;

#[async_trait]
impl TelemetryBackend for DisabledBackend {
    async fn begin_workflow(
        &mut self,
        _input: &str,
        _name: &str,
        _metadata: Metadata,
    ) -> Result<()> {
        Ok(())
    }

    async fn add_step(&mut self, _step: StepPayload) -> Result<()> {
        Ok(())
    }

    async fn conclude_workflow(
        &mut self,
        _output: &str,
        _duration: Duration,
        _status: StatusCode,
    ) -> Result<()> {
        Ok(())
    }

    async fn upload(&mut self) -> Result<usize> {
        Ok(0)
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

/// Lifecycle of a [`TelemetryClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// No backend has been constructed yet.
    Uninitialized,
    /// A working backend is in place.
    Active,
    /// Construction failed or telemetry was switched off.
    Disabled,
}

type BackendFactory = dyn Fn() -> Result<Box<dyn TelemetryBackend>> + Send + Sync;

pub(crate) struct Slot {
    pub(crate) backend: Box<dyn TelemetryBackend>,
    initialized: bool,
}

impl Slot {
    fn empty() -> Self {
        Self {
            backend: Box::new(DisabledBackend),
            initialized: false,
        }
    }
}

struct Inner {
    factory: Box<BackendFactory>,
    slot: Mutex<Slot>,
}

/// Shared handle to the telemetry backend.
///
/// # Example
///
/// ```rust
/// use artifact_refinery::{ClientState, TelemetryClient};
///
/// # tokio_test::block_on(async {
/// let client = TelemetryClient::disabled();
/// assert_eq!(client.state().await, ClientState::Uninitialized);
/// assert_eq!(client.flush().await, 0);
/// assert_eq!(client.state().await, ClientState::Disabled);
/// # });
/// ```
#[derive(Clone)]
pub struct TelemetryClient {
    inner: Arc<Inner>,
    remote_timeout: Duration,
}

impl std::fmt::Debug for TelemetryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryClient")
            .field("remote_timeout", &self.remote_timeout)
            .finish_non_exhaustive()
    }
}

impl TelemetryClient {
    /// Create a client that builds its backend with `factory` on first use.
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Result<Box<dyn TelemetryBackend>> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                factory: Box::new(factory),
                slot: Mutex::new(Slot::empty()),
            }),
            remote_timeout: TelemetryConfig::default().remote_timeout,
        }
    }

    /// Create a client reporting to an HTTP backend described by `config`.
    ///
    /// Without an API key the client initializes as disabled.
    pub fn from_config(config: TelemetryConfig) -> Self {
        let remote_timeout = config.remote_timeout;
        Self::new(move || {
            let backend = HttpBackend::new(&config)?;
            Ok(Box::new(backend) as Box<dyn TelemetryBackend>)
        })
        .with_remote_timeout(remote_timeout)
    }

    /// Create a client that never reports anything.
    pub fn disabled() -> Self {
        Self::new(|| Ok(Box::new(DisabledBackend) as Box<dyn TelemetryBackend>))
    }

    /// Set the deadline applied to each remote call.
    #[must_use]
    pub fn with_remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout = timeout;
        self
    }

    /// Deadline applied to each remote call.
    pub fn remote_timeout(&self) -> Duration {
        self.remote_timeout
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> ClientState {
        let slot = self.inner.slot.lock().await;
        if !slot.initialized {
            ClientState::Uninitialized
        } else if slot.backend.is_enabled() {
            ClientState::Active
        } else {
            ClientState::Disabled
        }
    }

    /// Forget the current backend so the next use constructs a fresh one.
    ///
    /// Workflows replayed but not yet uploaded are dropped with the old backend.
    pub async fn reset(&self) {
        let mut slot = self.inner.slot.lock().await;
        *slot = Slot::empty();
    }

    /// Upload every workflow replayed so far. Returns the number uploaded.
    ///
    /// Failures are logged and reported as zero.
    pub async fn flush(&self) -> usize {
        let mut slot = self.lock_initialized().await;
        if !slot.backend.is_enabled() {
            return 0;
        }
        match bounded(self.remote_timeout, "upload", slot.backend.upload()).await {
            Ok(count) => {
                info!(uploaded = count, "telemetry upload complete");
                count
            }
            Err(err) => {
                warn!(error = %err, "failed to upload workflows");
                0
            }
        }
    }

    /// Acquire the transmission lock, constructing the backend if needed.
    pub(crate) async fn lock_initialized(&self) -> MutexGuard<'_, Slot> {
        let mut slot = self.inner.slot.lock().await;
        if !slot.initialized {
            slot.backend = match (self.inner.factory)() {
                Ok(backend) => {
                    if backend.is_enabled() {
                        info!("telemetry backend initialised");
                    }
                    backend
                }
                Err(err) => {
                    warn!(error = %err, "telemetry unavailable, running without observability");
                    Box::new(DisabledBackend)
                }
            };
            slot.initialized = true;
        }
        slot
    }
}

/// Run a remote call under `timeout`.
pub(crate) async fn bounded<T>(
    timeout: Duration,
    op: &str,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout {
            stage: op.to_string(),
            after: timeout,
        }),
    }
}
