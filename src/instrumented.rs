//! Instrumented node wrapper for automatic step recording.

use std::time::{Duration, Instant};

use crate::context::RunContext;
use crate::node::Node;
use crate::recorder::{StatusCode, StepRecord};
use crate::router::Stage;
use crate::state::RunState;
use crate::{Error, Result};

/// Wraps a node so every invocation leaves exactly one [`StepRecord`].
///
/// For each call, `InstrumentedNode`:
/// - snapshots the input state (improvement history excluded)
/// - runs the node under the stage deadline
/// - records the serialized update, or `ERROR: <kind>: <message>` on failure
/// - returns the node's result untouched
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use async_trait::async_trait;
/// use artifact_refinery::{InstrumentedNode, Node, RunContext, RunState, Stage, StatusCode};
///
/// struct Noop;
///
/// #[async_trait]
/// impl Node for Noop {
///     type Update = u32;
///     async fn run(&self, state: &RunState) -> artifact_refinery::Result<u32> {
///         Ok(state.iteration)
///     }
/// }
///
/// # tokio_test::block_on(async {
/// let node = InstrumentedNode::new(Stage::Assess, Noop, Duration::from_secs(1));
/// let mut ctx = RunContext::new();
/// let state = RunState::new("in.pgm", 3);
///
/// assert_eq!(node.observe(&mut ctx, &state).await.unwrap(), 0);
/// assert_eq!(ctx.steps().records()[0].status, StatusCode::OK);
/// # });
/// ```
pub struct InstrumentedNode<N> {
    inner: N,
    stage: Stage,
    deadline: Duration,
}

impl<N: Node> InstrumentedNode<N> {
    /// Wrap `inner` as `stage`, failing calls that exceed `deadline`.
    pub fn new(stage: Stage, inner: N, deadline: Duration) -> Self {
        Self {
            inner,
            stage,
            deadline,
        }
    }

    /// The stage this node runs as.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Access the inner node.
    pub fn inner(&self) -> &N {
        &self.inner
    }

    /// Run the node and record the step in `ctx`.
    pub async fn observe(&self, ctx: &mut RunContext, state: &RunState) -> Result<N::Update> {
        let input = state.snapshot();

        let start = Instant::now();
        let result = match tokio::time::timeout(self.deadline, self.inner.run(state)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                stage: self.stage.to_string(),
                after: self.deadline,
            }),
        };
        let duration = start.elapsed();

        let (output, status) = match &result {
            Ok(update) => (
                serde_json::to_string(update)
                    .unwrap_or_else(|_| "<serialization_error>".to_string()),
                StatusCode::OK,
            ),
            Err(e) => (format!("ERROR: {}: {}", e.kind(), e), StatusCode::ERROR),
        };

        ctx.record(StepRecord {
            stage: self.stage.to_string(),
            input,
            output,
            duration,
            status,
        });

        result
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;

    struct Failing;

    #[async_trait]
    impl Node for Failing {
        type Update = ();

        async fn run(&self, _state: &RunState) -> Result<()> {
            Err(Error::Artifact("truncated pixel data".into()))
        }
    }

    struct Slow;

    #[async_trait]
    impl Node for Slow {
        type Update = ();

        async fn run(&self, _state: &RunState) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failure_is_recorded_and_returned() {
        let node = InstrumentedNode::new(Stage::Assess, Failing, Duration::from_secs(1));
        let mut ctx = RunContext::new();
        let state = RunState::new("broken.pgm", 3);

        let err = node.observe(&mut ctx, &state).await.unwrap_err();
        assert!(matches!(err, Error::Artifact(_)));

        let records = ctx.steps().records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, StatusCode::ERROR);
        assert_eq!(
            records[0].output,
            "ERROR: ArtifactError: malformed artifact: truncated pixel data"
        );
        assert!(records[0].input.contains("broken.pgm"));
    }

    #[tokio::test]
    async fn test_deadline_becomes_timeout_step() {
        let node = InstrumentedNode::new(Stage::Finalize, Slow, Duration::from_millis(20));
        let mut ctx = RunContext::new();

        let err = node
            .observe(&mut ctx, &RunState::new("a.pgm", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
        assert!(ctx.steps().records()[0].output.starts_with("ERROR: Timeout:"));
    }
}
