//! Adaptive search state of a CMA-ES run and the rules that evolve it.

use nalgebra::{Cholesky, DMatrix, DVector};

use crate::cmaes::{CmaesConfig, CovarianceUpdate};
use crate::error::{CmaesError, DecompositionError};

/// Recombination weights and the learning rates derived from them.
///
/// Built once per run from `(lambda, mu, n)` and the configuration; never
/// changed afterwards.
#[derive(Debug, Clone)]
pub struct Weights {
    /// One weight per rank, best first. The first `mu` are positive and sum to
    /// one; the rest are negative (Active update) or zero.
    pub weights: Vec<f64>,
    /// Number of parents.
    pub mu: usize,
    /// Variance effective selection mass of the positive weights.
    pub mu_eff: f64,
    /// Same for the negative weights (0 when there are none).
    pub mu_eff_neg: f64,
    /// Learning rate of the rank-one update.
    pub c1: f64,
    /// Learning rate of the rank-mu update.
    pub c_mu: f64,
    /// Cumulation constant of the step-size path.
    pub c_sigma: f64,
    /// Damping of the step-size update.
    pub d_sigma: f64,
    /// Cumulation constant of the covariance path.
    pub c_c: f64,
    /// Expected norm of an n-dimensional standard normal vector.
    pub chi_n: f64,
    /// Sum of all weights, negative ones included.
    pub weight_sum: f64,
}

/// Approx chi(dim).
pub(crate) fn chi_dim(n: f64) -> f64 {
    n.sqrt() * (1.0 - 1.0 / (4.0 * n) + 1.0 / (21.0 * n * n))
}

fn selection_mass(weights: &[f64]) -> f64 {
    let sum: f64 = weights.iter().sum();
    let sum_sq: f64 = weights.iter().map(|w| w * w).sum();
    if sum_sq > 0.0 {
        sum * sum / sum_sq
    } else {
        0.0
    }
}

impl Weights {
    pub fn new(
        dim: usize,
        lambda: usize,
        mu: usize,
        config: &CmaesConfig,
    ) -> Result<Self, CmaesError> {
        if lambda < 2 {
            return Err(CmaesError::InvalidPopulationSize(lambda));
        }
        if mu == 0 || mu > lambda {
            return Err(CmaesError::InvalidParentNumber { mu, lambda });
        }

        let n = dim as f64;
        let raw: Vec<f64> = (1..=lambda)
            .map(|i| (mu as f64 + 0.5).ln() - (i as f64).ln())
            .collect();
        let (positive, negative) = raw.split_at(mu);

        let mu_eff = selection_mass(positive);
        let mu_eff_neg = selection_mass(negative);

        let c_sigma = config
            .c_sigma
            .unwrap_or_else(|| (mu_eff + 2.0) / (n + mu_eff + 5.0));
        let d_sigma = config.d_sigma.unwrap_or_else(|| {
            1.0 + 2.0 * (((mu_eff - 1.0) / (n + 1.0)).sqrt() - 1.0).max(0.0) + c_sigma
        });
        let c_c = config
            .c_c
            .unwrap_or_else(|| (4.0 + mu_eff / n) / (n + 4.0 + 2.0 * mu_eff / n));
        let alpha_cov = config.alpha_cov;
        let c1 = config
            .c1
            .unwrap_or_else(|| alpha_cov / ((n + 1.3).powi(2) + mu_eff));
        let c_mu = config.c_mu.unwrap_or_else(|| {
            (1.0 - c1).min(
                alpha_cov * (mu_eff - 2.0 + 1.0 / mu_eff)
                    / ((n + 2.0).powi(2) + alpha_cov * mu_eff / 2.0),
            )
        });

        let positive_sum: f64 = positive.iter().sum();
        let mut weights: Vec<f64> = positive.iter().map(|w| w / positive_sum).collect();

        let negative_sum: f64 = negative.iter().map(|w| w.abs()).sum();
        let active = config.covariance_update == CovarianceUpdate::Active;
        if active && negative_sum > 0.0 && c_mu > 0.0 {
            let alpha_mu = 1.0 + c1 / c_mu;
            let alpha_mu_eff = 1.0 + 2.0 * mu_eff_neg / (mu_eff + 2.0);
            let alpha_posdef = ((1.0 - c1 - c_mu) / (n * c_mu)).max(0.0);
            let scale = alpha_mu.min(alpha_mu_eff).min(alpha_posdef) / negative_sum;
            weights.extend(negative.iter().map(|w| w * scale));
        } else {
            weights.extend(std::iter::repeat(0.0).take(negative.len()));
        }

        let weight_sum = weights.iter().sum();

        Ok(Self {
            weights,
            mu,
            mu_eff,
            mu_eff_neg,
            c1,
            c_mu,
            c_sigma,
            d_sigma,
            c_c,
            chi_n: chi_dim(n),
            weight_sum,
        })
    }

    /// Population size these weights were built for.
    pub fn lambda(&self) -> usize {
        self.weights.len()
    }

    /// Weights of the `mu` parents.
    pub fn positive(&self) -> &[f64] {
        &self.weights[..self.mu]
    }

    /// Weights of the remaining ranks.
    pub fn negative(&self) -> &[f64] {
        &self.weights[self.mu..]
    }

    /// Default number of generations between eigendecompositions.
    pub fn decomposition_interval(&self, dim: usize) -> usize {
        let rate = 10.0 * dim as f64 * (self.c1 + self.c_mu);
        if rate > 0.0 {
            ((1.0 / rate).floor() as usize).max(1)
        } else {
            1
        }
    }
}

/// Cached eigendecomposition `C = B diag(D²) Bᵀ`.
#[derive(Debug, Clone)]
pub(crate) struct Decomposition {
    /// Eigenvectors as columns.
    basis: DMatrix<f64>,
    /// Square roots of the eigenvalues.
    scales: DVector<f64>,
    inv_sqrt: DMatrix<f64>,
    /// Generations since the decomposition was computed.
    age: usize,
}

impl Decomposition {
    fn identity(dim: usize) -> Self {
        Self {
            basis: DMatrix::identity(dim, dim),
            scales: DVector::from_element(dim, 1.0),
            inv_sqrt: DMatrix::identity(dim, dim),
            age: 0,
        }
    }
}

/// Mean, covariance, step size and evolution paths of a run.
#[derive(Debug, Clone)]
pub struct SearchState {
    pub mean: DVector<f64>,
    pub covariance: DMatrix<f64>,
    pub step_size: f64,
    pub path_sigma: DVector<f64>,
    pub path_c: DVector<f64>,
    pub generation: usize,
    decomposition: Decomposition,
}

impl SearchState {
    pub fn new(mean: DVector<f64>, step_size: f64) -> Self {
        let dim = mean.len();
        Self {
            mean,
            covariance: DMatrix::identity(dim, dim),
            step_size,
            path_sigma: DVector::zeros(dim),
            path_c: DVector::zeros(dim),
            generation: 0,
            decomposition: Decomposition::identity(dim),
        }
    }

    pub fn dimension(&self) -> usize {
        self.mean.len()
    }

    /// Generations since the covariance was last eigendecomposed.
    pub fn decomposition_age(&self) -> usize {
        self.decomposition.age
    }

    /// Square roots of the eigenvalues from the latest decomposition.
    pub fn axis_scales(&self) -> &DVector<f64> {
        &self.decomposition.scales
    }

    /// Ratio of the largest to the smallest eigenvalue, from the latest decomposition.
    pub fn condition_number(&self) -> f64 {
        let max = self.decomposition.scales.max();
        let min = self.decomposition.scales.min();
        (max / min).powi(2)
    }

    /// Map a standard normal vector to a step `B (D ∘ z)` with covariance `C`.
    pub(crate) fn shape(&self, z: &DVector<f64>) -> DVector<f64> {
        &self.decomposition.basis * z.component_mul(&self.decomposition.scales)
    }

    /// Apply one generation of recombination, step-size adaptation and
    /// covariance adaptation. `steps` are the standardized steps
    /// `(x - mean) / sigma` of the whole population, best first.
    pub(crate) fn update(
        &mut self,
        steps: &[&DVector<f64>],
        weights: &Weights,
        hsig_threshold_factor: f64,
    ) {
        let dim = self.dimension();
        let n = dim as f64;
        let cs = weights.c_sigma;
        let cc = weights.c_c;

        // Recombination.
        let mut y_w: DVector<f64> = DVector::zeros(dim);
        for (&w, y) in weights.positive().iter().zip(steps) {
            y_w.axpy(w, *y, 1.0);
        }
        self.mean.axpy(self.step_size, &y_w, 1.0);

        // Cumulative step-length adaptation path.
        let whitened = &self.decomposition.inv_sqrt * &y_w;
        self.path_sigma = (1.0 - cs) * &self.path_sigma
            + (cs * (2.0 - cs) * weights.mu_eff).sqrt() * whitened;
        let ps_norm = self.path_sigma.norm();

        // Stall the covariance path while the step-size path is anomalously long.
        let correction = (1.0 - (1.0 - cs).powi(2 * (self.generation as i32 + 1))).sqrt();
        let h_sigma = if ps_norm / correction < (hsig_threshold_factor + 2.0 / (n + 1.0)) * weights.chi_n {
            1.0
        } else {
            0.0
        };
        self.path_c = (1.0 - cc) * &self.path_c
            + h_sigma * (cc * (2.0 - cc) * weights.mu_eff).sqrt() * &y_w;
        let delta_h = (1.0 - h_sigma) * cc * (2.0 - cc);

        let mut rank_mu: DMatrix<f64> = DMatrix::zeros(dim, dim);
        for (&w, y) in weights.weights.iter().zip(steps) {
            let w = if w < 0.0 {
                let norm_sq = (&self.decomposition.inv_sqrt * *y).norm_squared();
                if norm_sq > 0.0 {
                    w * n / norm_sq
                } else {
                    0.0
                }
            } else {
                w
            };
            if w != 0.0 {
                rank_mu.ger(w, *y, *y, 1.0);
            }
        }

        let decay = 1.0 + weights.c1 * delta_h - weights.c1 - weights.c_mu * weights.weight_sum;
        self.covariance *= decay;
        self.covariance.ger(weights.c1, &self.path_c, &self.path_c, 1.0);
        self.covariance += weights.c_mu * rank_mu;
        self.symmetrize();

        self.step_size *= ((cs / weights.d_sigma) * (ps_norm / weights.chi_n - 1.0)).exp();

        self.generation += 1;
        self.decomposition.age += 1;
    }

    fn symmetrize(&mut self) {
        let transposed = self.covariance.transpose();
        self.covariance += transposed;
        self.covariance *= 0.5;
    }

    /// Keep the covariance numerically positive definite.
    ///
    /// Runs a Cholesky check every call and a full eigendecomposition once the
    /// cached one is `interval` generations old or the check fails.
    pub(crate) fn maintain(
        &mut self,
        interval: usize,
        condition_ceiling: f64,
    ) -> Result<(), DecompositionError> {
        let due = self.decomposition.age >= interval;
        if due || Cholesky::new(self.covariance.clone()).is_none() {
            self.refresh_decomposition(condition_ceiling)?;
        }
        Ok(())
    }

    /// Recompute `B`, `D` and `C^{-1/2}` from the current covariance.
    pub(crate) fn refresh_decomposition(
        &mut self,
        condition_ceiling: f64,
    ) -> Result<(), DecompositionError> {
        if self.covariance.iter().any(|v| !v.is_finite()) {
            return Err(DecompositionError::NonFinite);
        }

        let eigen = self.covariance.clone().symmetric_eigen();
        let max = eigen.eigenvalues.max();
        let min = eigen.eigenvalues.min();
        if !(max > 0.0) || !max.is_finite() {
            return Err(DecompositionError::NotPositiveDefinite(max));
        }
        if !(min > 0.0) || max / min > condition_ceiling {
            return Err(DecompositionError::IllConditioned(max / min.max(0.0)));
        }

        let scales = eigen.eigenvalues.map(f64::sqrt);
        let inv_scales = scales.map(|d| 1.0 / d);
        let inv_sqrt = &eigen.eigenvectors
            * DMatrix::from_diagonal(&inv_scales)
            * eigen.eigenvectors.transpose();

        self.decomposition = Decomposition {
            basis: eigen.eigenvectors,
            scales,
            inv_sqrt,
            age: 0,
        };
        Ok(())
    }

    /// Reset the distribution shape to the identity, keeping mean and step size.
    pub(crate) fn regularize(&mut self) {
        let dim = self.dimension();
        self.covariance = DMatrix::identity(dim, dim);
        self.path_sigma = DVector::zeros(dim);
        self.path_c = DVector::zeros(dim);
        self.decomposition = Decomposition::identity(dim);
    }
}
