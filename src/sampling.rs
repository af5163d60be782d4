//! Population sampling and ranking.

use nalgebra::DVector;
use rand::Rng;
use rand_distr::StandardNormal;

use crate::state::SearchState;

/// A sampled point of one generation.
#[derive(Debug, Clone)]
pub(crate) struct Candidate {
    /// Sampled point in the unconstrained search space.
    pub point: DVector<f64>,
    /// Standardized step `(point - mean) / sigma`.
    pub step: DVector<f64>,
    pub fitness: f64,
}

/// Draw `lambda` candidates from `N(mean, sigma² C)`.
///
/// Normal variates are consumed from `rng` in candidate order, so a fixed seed
/// gives a fixed population regardless of how it is evaluated later.
pub(crate) fn sample_population<R: Rng + ?Sized>(
    state: &SearchState,
    lambda: usize,
    rng: &mut R,
) -> Vec<Candidate> {
    let dim = state.dimension();
    let mut population = Vec::with_capacity(lambda);
    for _ in 0..lambda {
        let mut z = DVector::zeros(dim);
        for zi in z.iter_mut() {
            *zi = rng.sample(StandardNormal);
        }
        let step = state.shape(&z);
        let point = &state.mean + state.step_size * &step;
        population.push(Candidate {
            point,
            step,
            fitness: f64::INFINITY,
        });
    }
    population
}

/// Non-finite fitness values rank as the worst possible.
pub(crate) fn sanitize(fitness: f64) -> f64 {
    if fitness.is_finite() {
        fitness
    } else {
        f64::INFINITY
    }
}

/// Indices of `population` ordered by ascending fitness; ties keep sample order.
pub(crate) fn rank(population: &[Candidate]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..population.len()).collect();
    order.sort_by(|&a, &b| population[a].fitness.total_cmp(&population[b].fitness));
    order
}
