use ndarray_linalg::error::LinalgError;
use thiserror::Error;

/// Errors raised while propagating the ensemble.
///
/// Only `ConfigurationMismatch`, `UndefinedAlgorithm` and `Linalg` abort a run. The other two
/// variants describe per-trajectory conditions that the step resolves locally; they are built
/// for logging and never leave `compute_dynamics`.
#[derive(Error, Debug)]
pub enum DynamicsError {
    #[error("Configuration mismatch: {0}")]
    ConfigurationMismatch(String),

    #[error("Undefined {kind} algorithm with id {id}")]
    UndefinedAlgorithm { kind: &'static str, id: i32 },

    #[error("Degenerate time-overlap matrix for trajectory {traj}, using the identity permutation")]
    NumericalDegeneracy { traj: usize },

    #[error("Norm of trajectory {traj} drifted to {norm}, renormalizing")]
    NormalizationDrift { traj: usize, norm: f64 },

    #[error("Linear algebra failure: {0}")]
    Linalg(#[from] LinalgError),
}

impl DynamicsError {
    pub fn mismatch(message: impl Into<String>) -> Self {
        DynamicsError::ConfigurationMismatch(message.into())
    }

    pub fn undefined(kind: &'static str, id: i32) -> Self {
        DynamicsError::UndefinedAlgorithm { kind, id }
    }
}
