//! Error types for Trueno-AB
//!
//! Toyota Way: Clear error messages with actionable guidance (Respect for People)

use thiserror::Error;

use crate::experiment::ExperimentStatus;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Trueno-AB error types
#[derive(Error, Debug)]
pub enum Error {
    /// Variant weights do not sum to 100 (rejected, never normalized)
    #[error("Invalid allocation for experiment '{experiment_id}': variant weights sum to {total}, expected exactly 100")]
    InvalidAllocation {
        /// Experiment being created or imported
        experiment_id: String,
        /// Observed weight total
        total: f64,
    },

    /// An experiment with this ID is already registered
    #[error("Experiment '{0}' already exists\nPick a new identifier or delete the existing experiment first")]
    DuplicateExperiment(String),

    /// Unknown experiment
    #[error("Experiment not found: {0}")]
    ExperimentNotFound(String),

    /// Unknown variant within a known experiment
    #[error("Variant '{variant_id}' not found in experiment '{experiment_id}'")]
    VariantNotFound {
        /// Parent experiment
        experiment_id: String,
        /// Requested variant
        variant_id: String,
    },

    /// Illegal lifecycle change
    #[error("Invalid transition for experiment '{experiment_id}': {from} -> {to}\nLifecycle is draft -> running -> completed|stopped")]
    InvalidTransition {
        /// Experiment being transitioned
        experiment_id: String,
        /// Current status
        from: ExperimentStatus,
        /// Requested status
        to: ExperimentStatus,
    },

    /// Structurally invalid experiment definition
    #[error("Invalid experiment definition: {0}")]
    InvalidExperiment(String),

    /// Invalid input parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Snapshot storage error
    #[error("Storage error: {0}")]
    StorageError(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// True for the `NotFound` family (unknown experiment or variant).
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ExperimentNotFound(_) | Self::VariantNotFound { .. }
        )
    }
}
