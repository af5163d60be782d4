//! Contracts between the optimizers and the functions they minimize.

use crate::error::CmaesError;

/// A function to minimize. Lower values are better.
///
/// Any `Fn(&[f64]) -> f64 + Sync` closure is an objective, so the simplest use is
/// `cmaes.optimize(&|x: &[f64]| x.iter().map(|v| v * v).sum::<f64>(), &x0)`.
///
/// Non-finite return values are treated as the worst possible fitness.
pub trait Objective: Sync {
    fn evaluate(&self, coordinates: &[f64]) -> f64;
}

impl<F> Objective for F
where
    F: Fn(&[f64]) -> f64 + Sync + ?Sized,
{
    fn evaluate(&self, coordinates: &[f64]) -> f64 {
        self(coordinates)
    }
}

/// An objective that is a sum over indexable addends (e.g. a per-sample loss).
///
/// [`Objective::evaluate`] must return the sum over all `num_functions()` addends,
/// so that full and subsampled evaluation agree in expectation.
pub trait DecomposableObjective: Objective {
    /// Number of addends.
    fn num_functions(&self) -> usize;

    /// Sum of the addends listed in `indices`.
    fn evaluate_subset(&self, coordinates: &[f64], indices: &[usize]) -> f64;
}

/// Builds a [`DecomposableObjective`] from a per-addend closure.
///
/// ```rust
/// use active_cmaes::objective::{AddendSum, DecomposableObjective, Objective};
///
/// let targets = [1.0, 2.0, 3.0];
/// let loss = AddendSum::new(targets.len(), |x: &[f64], i: usize| (x[0] - targets[i]).powi(2));
///
/// assert_eq!(loss.num_functions(), 3);
/// assert_eq!(loss.evaluate(&[2.0]), 2.0);
/// assert_eq!(loss.evaluate_subset(&[2.0], &[0]), 1.0);
/// ```
pub struct AddendSum<F> {
    count: usize,
    addend: F,
}

impl<F> AddendSum<F>
where
    F: Fn(&[f64], usize) -> f64 + Sync,
{
    pub fn new(count: usize, addend: F) -> Self {
        Self { count, addend }
    }
}

impl<F> Objective for AddendSum<F>
where
    F: Fn(&[f64], usize) -> f64 + Sync,
{
    fn evaluate(&self, coordinates: &[f64]) -> f64 {
        (0..self.count).map(|i| (self.addend)(coordinates, i)).sum()
    }
}

impl<F> DecomposableObjective for AddendSum<F>
where
    F: Fn(&[f64], usize) -> f64 + Sync,
{
    fn num_functions(&self) -> usize {
        self.count
    }

    fn evaluate_subset(&self, coordinates: &[f64], indices: &[usize]) -> f64 {
        indices.iter().map(|&i| (self.addend)(coordinates, i)).sum()
    }
}

/// The driver contract shared by optimizers: start from `initial` and return a
/// result describing the optimized coordinates.
pub trait Optimizer<O: ?Sized> {
    type Output;

    fn optimize(&self, objective: &O, initial: &[f64]) -> Result<Self::Output, CmaesError>;
}
