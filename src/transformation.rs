//! Transformation policies: map unconstrained search coordinates into the
//! feasible region before they reach the objective.
//!
//! The engine adapts its distribution in the unconstrained space and only the
//! evaluated points go through the transformation, so every policy must be
//! continuous.

use nalgebra::DVector;

use crate::error::CmaesError;

/// Maps sampled coordinates into the feasible region.
pub trait TransformationPolicy {
    /// Map `x` into the feasible region.
    fn transform(&self, x: &DVector<f64>) -> DVector<f64>;

    /// Step size used when the caller does not provide one.
    fn initial_step_size(&self) -> f64;

    /// Called once per run with the problem dimension.
    fn check_dimension(&self, _dimension: usize) -> Result<(), CmaesError> {
        Ok(())
    }
}

/// Identity transformation, for problems without bound constraints.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct IdentityTransformation;

impl TransformationPolicy for IdentityTransformation {
    fn transform(&self, x: &DVector<f64>) -> DVector<f64> {
        x.clone()
    }

    fn initial_step_size(&self) -> f64 {
        1.0
    }
}

/// Smooth boundary handling for box constraints `lower <= x <= upper`.
///
/// Each coordinate is first folded into a pre-image `[lower - al, upper + au]`
/// and then mapped into `[lower, upper]`. The map is the identity on
/// `[lower + al, upper - au]` and quadratic inside the margin bands, so it is
/// continuously differentiable everywhere. Margins are
/// `al = min((upper - lower) / 2, (1 + |lower|) / 20)` and likewise for `au`.
///
/// When the bound vectors are shorter than the coordinates, coordinate `i`
/// uses bound entry `min(i, len - 1)`; a single-entry box therefore applies
/// the same bounds to every dimension.
///
/// ```rust
/// use active_cmaes::transformation::{BoundaryBoxConstraint, TransformationPolicy};
/// use active_cmaes::DVector;
///
/// let b = BoundaryBoxConstraint::uniform(0.0, 2.0).unwrap();
/// let y = b.transform(&DVector::from_vec(vec![-7.3, 1.0, 42.0]));
/// assert!(y.iter().all(|&v| (0.0..=2.0).contains(&v)));
/// assert_eq!(y[1], 1.0);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryBoxConstraint {
    lower: Vec<f64>,
    upper: Vec<f64>,
}

/// Per-coordinate quantities derived from one (lower, upper) pair.
#[derive(Debug, Clone, Copy)]
struct Margins {
    lower: f64,
    upper: f64,
    half_range: f64,
    al: f64,
    au: f64,
}

impl Margins {
    fn new(lower: f64, upper: f64) -> Self {
        let half_range = (upper - lower) / 2.0;
        Self {
            lower,
            upper,
            half_range,
            al: half_range.min((1.0 + lower.abs()) / 20.0),
            au: half_range.min((1.0 + upper.abs()) / 20.0),
        }
    }

    fn is_degenerate(&self) -> bool {
        self.half_range <= 0.0
    }

    fn transform(&self, x: f64) -> f64 {
        let Margins { lower, upper, half_range, al, au } = *self;
        if self.is_degenerate() {
            return lower;
        }

        let xlow = lower - 2.0 * al - half_range;
        let xup = upper + 2.0 * au + half_range;
        let period = 2.0 * (2.0 * half_range + al + au);

        // Fold into [xlow, xup]; a single reflection then suffices. The
        // remainder is exact, so huge inputs keep their position in the period.
        let mut y = x;
        if y < xlow || y > xup {
            y = (xlow + (y - xlow).rem_euclid(period)).clamp(xlow, xup);
        }
        if y < lower - al {
            y += 2.0 * (lower - al - y);
        }
        if y > upper + au {
            y -= 2.0 * (y - upper - au);
        }

        let y = if y < lower + al {
            lower + (y - (lower - al)).powi(2) / (4.0 * al)
        } else if y > upper - au {
            upper - (y - (upper + au)).powi(2) / (4.0 * au)
        } else {
            y
        };
        y.clamp(lower, upper)
    }

    fn inverse(&self, y: f64) -> f64 {
        let Margins { lower, upper, al, au, .. } = *self;
        if self.is_degenerate() {
            return lower;
        }

        let y = y.clamp(lower, upper);
        if y < lower + al {
            (lower - al) + 2.0 * (al * (y - lower)).sqrt()
        } else if y > upper - au {
            (upper + au) - 2.0 * (au * (upper - y)).sqrt()
        } else {
            y
        }
    }
}

impl BoundaryBoxConstraint {
    /// Box with per-dimension bounds.
    pub fn new(lower: Vec<f64>, upper: Vec<f64>) -> Result<Self, CmaesError> {
        if lower.is_empty() || upper.is_empty() {
            return Err(CmaesError::EmptyBounds);
        }
        if lower.len() != upper.len() {
            return Err(CmaesError::BoundLengthMismatch {
                lower: lower.len(),
                upper: upper.len(),
            });
        }
        for (index, (&lo, &hi)) in lower.iter().zip(upper.iter()).enumerate() {
            if !lo.is_finite() || !hi.is_finite() || lo > hi {
                return Err(CmaesError::InvalidBounds {
                    index,
                    lower: lo,
                    upper: hi,
                });
            }
        }
        Ok(Self { lower, upper })
    }

    /// Box with the same bounds on every dimension.
    pub fn uniform(lower: f64, upper: f64) -> Result<Self, CmaesError> {
        Self::new(vec![lower], vec![upper])
    }

    pub fn lower_bound(&self) -> &[f64] {
        &self.lower
    }

    pub fn upper_bound(&self) -> &[f64] {
        &self.upper
    }

    fn margins(&self, index: usize) -> Margins {
        let i = index.min(self.lower.len() - 1);
        Margins::new(self.lower[i], self.upper[i])
    }

    /// Map a feasible point back into the pre-image, so that
    /// `transform(&inverse(&y)) == y` for every `y` inside the box.
    /// Points outside the box are clamped first.
    pub fn inverse(&self, y: &DVector<f64>) -> DVector<f64> {
        DVector::from_fn(y.len(), |i, _| self.margins(i).inverse(y[i]))
    }
}

impl TransformationPolicy for BoundaryBoxConstraint {
    fn transform(&self, x: &DVector<f64>) -> DVector<f64> {
        DVector::from_fn(x.len(), |i, _| self.margins(i).transform(x[i]))
    }

    /// `0.3` times the narrowest range of the box.
    fn initial_step_size(&self) -> f64 {
        0.3 * self
            .lower
            .iter()
            .zip(self.upper.iter())
            .map(|(lo, hi)| hi - lo)
            .fold(f64::INFINITY, f64::min)
    }

    fn check_dimension(&self, dimension: usize) -> Result<(), CmaesError> {
        if self.lower.len() > dimension {
            return Err(CmaesError::DimensionMismatch {
                bounds: self.lower.len(),
                coordinates: dimension,
            });
        }
        Ok(())
    }
}
