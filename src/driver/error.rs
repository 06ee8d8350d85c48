//! Error taxonomy for a single run.
//!
//! Every variant is fatal to the run and ends it `ERROR`. Per-issue and
//! publish failures never become a `RunError`; the driver logs them and
//! carries on.

use std::time::Duration;

use crate::registry::RegistryError;

/// Errors that terminate a run.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// The source control tool cannot be invoked.
    #[error("Git not available - {0}")]
    ToolUnavailable(String),

    #[error("{0:#}")]
    Clone(anyhow::Error),

    #[error("{0:#}")]
    Branch(anyhow::Error),

    #[error("Scan failed: {0:#}")]
    Scan(anyhow::Error),

    /// The test collaborator itself failed (not a failing test suite).
    #[error("Test execution failed: {0:#}")]
    Tests(anyhow::Error),

    /// A collaborator step exceeded its time budget.
    #[error("{step} timed out after {secs}s")]
    Timeout { step: &'static str, secs: u64 },

    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RunError {
    /// Creates a `Timeout` error for `step` with the budget it exceeded.
    pub fn timeout(step: &'static str, limit: Duration) -> Self {
        Self::Timeout {
            step,
            secs: limit.as_secs(),
        }
    }

    /// Returns true if a step ran past its time budget.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns true if the run was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
