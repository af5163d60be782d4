//! Selection policies: decide how much of the objective is evaluated for each
//! generation.

use nalgebra::DVector;
use rand::Rng;
use rayon::prelude::*;

use crate::error::CmaesError;
use crate::objective::{DecomposableObjective, Objective};

/// Computes one fitness value per population member, in population order.
///
/// The engine calls `select` exactly once per generation with the whole
/// population, so a policy that subsamples can keep its subset fixed within a
/// generation.
pub trait SelectionPolicy<O: ?Sized> {
    fn select<R: Rng + ?Sized>(
        &self,
        objective: &O,
        population: &[DVector<f64>],
        parallel: bool,
        rng: &mut R,
    ) -> Vec<f64>;
}

/// Evaluate `f` on every point, optionally on the rayon pool. Results keep the
/// order of `points` either way.
fn evaluate_points<F>(points: &[DVector<f64>], parallel: bool, f: F) -> Vec<f64>
where
    F: Fn(&[f64]) -> f64 + Sync + Send,
{
    if parallel {
        points.par_iter().map(|p| f(p.as_slice())).collect()
    } else {
        points.iter().map(|p| f(p.as_slice())).collect()
    }
}

/// Evaluate the complete objective for every member.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FullSelection;

impl<O: Objective + ?Sized> SelectionPolicy<O> for FullSelection {
    fn select<R: Rng + ?Sized>(
        &self,
        objective: &O,
        population: &[DVector<f64>],
        parallel: bool,
        _rng: &mut R,
    ) -> Vec<f64> {
        evaluate_points(population, parallel, |x| objective.evaluate(x))
    }
}

/// How many addends [`RandomSelection`] draws per generation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SubsetSize {
    Count(usize),
    /// Fraction of `num_functions()`, rounded up.
    Fraction(f64),
}

/// Evaluate a random subset of a decomposable objective's addends.
///
/// One subset is drawn per generation and shared by every member, so ranking
/// within a generation compares like with like. Subset sums are scaled by
/// `num_functions / subset_size` to estimate the full sum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RandomSelection {
    size: SubsetSize,
}

impl Default for RandomSelection {
    fn default() -> Self {
        Self {
            size: SubsetSize::Fraction(0.3),
        }
    }
}

impl RandomSelection {
    /// Draw `count` addends per generation.
    pub fn new(count: usize) -> Result<Self, CmaesError> {
        if count == 0 {
            return Err(CmaesError::InvalidSubsetSize);
        }
        Ok(Self {
            size: SubsetSize::Count(count),
        })
    }

    /// Draw `fraction` of the addends per generation.
    pub fn with_fraction(fraction: f64) -> Result<Self, CmaesError> {
        if !(fraction > 0.0 && fraction <= 1.0) {
            return Err(CmaesError::InvalidParameter {
                name: "fraction",
                value: fraction,
            });
        }
        Ok(Self {
            size: SubsetSize::Fraction(fraction),
        })
    }

    pub fn subset_size(&self) -> SubsetSize {
        self.size
    }

    /// Number of addends drawn out of `total`.
    pub fn resolve(&self, total: usize) -> usize {
        let wanted = match self.size {
            SubsetSize::Count(count) => count,
            SubsetSize::Fraction(fraction) => (fraction * total as f64).ceil() as usize,
        };
        wanted.clamp(1, total.max(1))
    }
}

impl<O: DecomposableObjective + ?Sized> SelectionPolicy<O> for RandomSelection {
    fn select<R: Rng + ?Sized>(
        &self,
        objective: &O,
        population: &[DVector<f64>],
        parallel: bool,
        rng: &mut R,
    ) -> Vec<f64> {
        let total = objective.num_functions();
        let amount = self.resolve(total);
        if amount >= total {
            return evaluate_points(population, parallel, |x| objective.evaluate(x));
        }

        let mut subset = rand::seq::index::sample(rng, total, amount).into_vec();
        subset.sort_unstable();
        let scale = total as f64 / amount as f64;
        log::trace!("random selection drew {} of {} addends", amount, total);

        evaluate_points(population, parallel, |x| {
            scale * objective.evaluate_subset(x, &subset)
        })
    }
}
