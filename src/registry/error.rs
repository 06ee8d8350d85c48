//! Error types for registry operations.
//!
//! Typed errors let the driver and the HTTP layer tell an unknown run apart
//! from a write against a run that has already been finalized.

use super::model::RunId;

/// Errors that can occur when reading or mutating the run registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// No run with this identifier has been registered.
    #[error("Unknown run: {run_id}")]
    UnknownRun { run_id: RunId },

    /// A run with this identifier already exists.
    #[error("Run already exists: {run_id}")]
    DuplicateRun { run_id: RunId },

    /// The run was finalized and no longer accepts writes.
    #[error("Run {run_id} is already finalized")]
    RunFinalized { run_id: RunId },

    /// No CI record with this identifier exists in the run.
    #[error("Unknown CI run {cicd_id} in run {run_id}")]
    UnknownCicdRun { run_id: RunId, cicd_id: u64 },

    /// No fix record with this identifier exists in the run.
    #[error("Unknown fix {fix_id} in run {run_id}")]
    UnknownFix { run_id: RunId, fix_id: String },

    /// Writing or reading the persisted snapshot failed.
    #[error("Failed to persist snapshot for run {run_id}: {message}")]
    Persist { run_id: RunId, message: String },
}

impl RegistryError {
    /// Creates an `UnknownRun` error.
    pub fn unknown_run(run_id: RunId) -> Self {
        Self::UnknownRun { run_id }
    }

    /// Creates a `Persist` error.
    pub fn persist(run_id: RunId, message: impl Into<String>) -> Self {
        Self::Persist {
            run_id,
            message: message.into(),
        }
    }

    /// Returns true if the run identifier was not recognized.
    pub fn is_unknown_run(&self) -> bool {
        matches!(self, Self::UnknownRun { .. })
    }

    /// Returns true if the write was rejected because the run is finalized.
    pub fn is_finalized(&self) -> bool {
        matches!(self, Self::RunFinalized { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_run_error() {
        let id = RunId::new();
        let err = RegistryError::unknown_run(id);
        assert!(err.is_unknown_run());
        assert!(!err.is_finalized());
        assert_eq!(err.to_string(), format!("Unknown run: {id}"));
    }

    #[test]
    fn test_finalized_error() {
        let run_id = RunId::new();
        let err = RegistryError::RunFinalized { run_id };
        assert!(err.is_finalized());
        assert!(!err.is_unknown_run());
    }

    #[test]
    fn test_persist_error_message() {
        let id = RunId::new();
        let err = RegistryError::persist(id, "disk full");
        assert!(err.to_string().contains("disk full"));
        assert!(err.to_string().contains(&id.to_string()));
    }
}
