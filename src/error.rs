//! Configuration errors reported by the policies and the engine.
//!
//! Numerical trouble during a run is not an error: it is recovered locally or
//! reported through [`TerminationReason`](crate::cmaes::TerminationReason).

use thiserror::Error;

/// Errors surfaced while building policies or starting a run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CmaesError {
    #[error("the initial coordinates are empty")]
    EmptyCoordinates,

    #[error("initial coordinate {index} is not finite ({value})")]
    NonFiniteCoordinate { index: usize, value: f64 },

    #[error("bound vectors must contain at least one entry")]
    EmptyBounds,

    #[error("lower bound has {lower} entries but upper bound has {upper}")]
    BoundLengthMismatch { lower: usize, upper: usize },

    #[error("bounds have {bounds} entries but the coordinates only have {coordinates}")]
    DimensionMismatch { bounds: usize, coordinates: usize },

    #[error("invalid bounds at index {index}: lower {lower} must be finite and not above upper {upper}")]
    InvalidBounds { index: usize, lower: f64, upper: f64 },

    #[error("population size must be 0 (automatic) or at least 2, got {0}")]
    InvalidPopulationSize(usize),

    #[error("number of parents {mu} must lie in 1..={lambda}")]
    InvalidParentNumber { mu: usize, lambda: usize },

    #[error("step size must be positive and finite, got {0}")]
    InvalidStepSize(f64),

    #[error("subset size must select at least one addend")]
    InvalidSubsetSize,

    #[error("invalid value for `{name}`: {value}")]
    InvalidParameter { name: &'static str, value: f64 },
}

/// Raised by the covariance decomposition; handled inside the engine.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub(crate) enum DecompositionError {
    #[error("covariance matrix contains non-finite entries")]
    NonFinite,

    #[error("covariance matrix is not positive definite (largest eigenvalue {0})")]
    NotPositiveDefinite(f64),

    #[error("covariance condition number {0:e} exceeds the ceiling")]
    IllConditioned(f64),
}
