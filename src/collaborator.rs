//! Contracts for the black-box collaborators driven by the orchestrator.
//!
//! The orchestrator never inspects artifact contents itself. It hands an
//! [`ArtifactRef`] to an [`Assessor`], an [`Improver`] and a [`Finalizer`] and
//! merges what they return into the run state.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::state::{Assessment, MetricScore};
use crate::Result;

/// Reference to an artifact on disk.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactRef(PathBuf);

impl ArtifactRef {
    /// Wrap a path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    /// The underlying path.
    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl From<PathBuf> for ArtifactRef {
    fn from(path: PathBuf) -> Self {
        Self(path)
    }
}

impl From<&Path> for ArtifactRef {
    fn from(path: &Path) -> Self {
        Self(path.to_path_buf())
    }
}

impl From<&str> for ArtifactRef {
    fn from(path: &str) -> Self {
        Self(PathBuf::from(path))
    }
}

impl From<String> for ArtifactRef {
    fn from(path: String) -> Self {
        Self(PathBuf::from(path))
    }
}

/// Scores an artifact.
///
/// Implementations must be deterministic for identical artifact bytes.
#[async_trait]
pub trait Assessor: Send + Sync {
    /// Compute per-metric raw values and normalised scores.
    async fn assess(&self, artifact: &ArtifactRef) -> Result<BTreeMap<String, MetricScore>>;
}

/// Result of one improvement pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Improvement {
    /// The newly written artifact.
    pub artifact: ArtifactRef,
    /// Human-readable descriptions of what was applied.
    pub applied: Vec<String>,
}

/// Produces a new artifact from an existing one and its assessment.
///
/// Implementations must not modify the input artifact in place.
#[async_trait]
pub trait Improver: Send + Sync {
    /// Write an improved copy of `artifact` for the given 1-based `iteration`.
    async fn improve(
        &self,
        artifact: &ArtifactRef,
        assessment: &Assessment,
        iteration: u32,
    ) -> Result<Improvement>;
}

/// Renders the terminal derived output of a run.
#[async_trait]
pub trait Finalizer: Send + Sync {
    /// Produce the final output for `artifact`.
    async fn finalize(&self, artifact: &ArtifactRef) -> Result<ArtifactRef>;
}
