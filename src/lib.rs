pub mod cmaes;
pub mod error;
pub mod objective;
mod restart;
mod sampling;
pub mod selection;
pub mod state;
pub mod transformation;

#[cfg(test)]
mod test_functions;
#[cfg(test)]
mod restart_test;
#[cfg(test)]
mod selection_test;
#[cfg(test)]
mod transformation_test;

// Re-export key types for easier access
pub use cmaes::{
    ApproxCmaes, Cmaes, CmaesConfig, CmaesResult, CmaesRun, CovarianceUpdate, RestartStrategy,
    TerminationReason,
};
pub use error::CmaesError;
pub use nalgebra::{DMatrix, DVector};
pub use objective::{AddendSum, DecomposableObjective, Objective, Optimizer};
pub use selection::{FullSelection, RandomSelection, SelectionPolicy, SubsetSize};
pub use state::{SearchState, Weights};
pub use transformation::{BoundaryBoxConstraint, IdentityTransformation, TransformationPolicy};
