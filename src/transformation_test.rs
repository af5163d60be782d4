// Tests for the transformation policies

use nalgebra::DVector;

use crate::error::CmaesError;
use crate::transformation::{BoundaryBoxConstraint, IdentityTransformation, TransformationPolicy};

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use proptest::prelude::*;

    fn point(values: &[f64]) -> DVector<f64> {
        DVector::from_column_slice(values)
    }

    #[test]
    fn test_identity_is_identity() {
        let x = point(&[-1e9, 0.0, 3.5]);
        assert_eq!(IdentityTransformation.transform(&x), x);
        assert_eq!(IdentityTransformation.initial_step_size(), 1.0);
        assert!(IdentityTransformation.check_dimension(1).is_ok());
    }

    #[test]
    fn test_interior_points_are_unchanged() {
        // Margins: al = min(1, 1/20) = 0.05, au = min(1, 3/20) = 0.15.
        let b = BoundaryBoxConstraint::uniform(0.0, 2.0).unwrap();
        let x = point(&[0.05, 1.0, 1.85, 0.3]);
        assert_eq!(b.transform(&x), x);
    }

    #[test]
    fn test_margin_bands_are_quadratic() {
        let b = BoundaryBoxConstraint::uniform(0.0, 2.0).unwrap();

        // Lower band: 0 + (y + 0.05)^2 / 0.2
        let y = b.transform(&point(&[0.0]));
        assert_relative_eq!(y[0], 0.0125, epsilon = 1e-12);
        let y = b.transform(&point(&[-0.05]));
        assert_eq!(y[0], 0.0);

        // Upper band: 2 - (y - 2.15)^2 / 0.6
        let y = b.transform(&point(&[2.0]));
        assert_relative_eq!(y[0], 2.0 - 0.0225 / 0.6, epsilon = 1e-12);
        let y = b.transform(&point(&[2.15]));
        assert_eq!(y[0], 2.0);
    }

    #[test]
    fn test_reflection_outside_preimage() {
        let b = BoundaryBoxConstraint::uniform(0.0, 2.0).unwrap();
        // -1.2 folds by one period (4.4) to 3.2, then reflects at 2.15 to 1.1.
        let y = b.transform(&point(&[-1.2]));
        assert_relative_eq!(y[0], 1.1, epsilon = 1e-12);
        // Far-away points fold back by whole periods.
        let far = b.transform(&point(&[1.1 + 4.4 * 1000.0]));
        assert_relative_eq!(far[0], 1.1, epsilon = 1e-8);
        let far = b.transform(&point(&[1.1 - 4.4 * 1000.0]));
        assert_relative_eq!(far[0], 1.1, epsilon = 1e-8);
    }

    #[test]
    fn test_single_bound_broadcasts() {
        let uniform = BoundaryBoxConstraint::uniform(-1.0, 3.0).unwrap();
        let full = BoundaryBoxConstraint::new(vec![-1.0; 4], vec![3.0; 4]).unwrap();
        let x = point(&[-10.0, -0.99, 2.0, 17.3]);
        assert_eq!(uniform.transform(&x), full.transform(&x));
    }

    #[test]
    fn test_short_bounds_reuse_last_entry() {
        let b = BoundaryBoxConstraint::new(vec![0.0, 10.0], vec![1.0, 20.0]).unwrap();
        let y = b.transform(&point(&[100.0, 100.0, 100.0]));
        assert!((0.0..=1.0).contains(&y[0]));
        assert!((10.0..=20.0).contains(&y[1]));
        assert!((10.0..=20.0).contains(&y[2]));
        assert!(b.check_dimension(3).is_ok());
        assert!(b.check_dimension(1).is_err());
    }

    #[test]
    fn test_degenerate_dimension_returns_lower() {
        let b = BoundaryBoxConstraint::new(vec![0.0, 5.0], vec![1.0, 5.0]).unwrap();
        for v in [-3.0, 0.0, 5.0, 42.0] {
            let y = b.transform(&point(&[0.5, v]));
            assert_eq!(y[1], 5.0);
            assert_eq!(y[0], 0.5);
        }
        assert_eq!(b.inverse(&point(&[0.5, 5.0]))[1], 5.0);
    }

    #[test]
    fn test_initial_step_size_uses_narrowest_range() {
        let b = BoundaryBoxConstraint::new(vec![0.0, -4.0], vec![10.0, 4.0]).unwrap();
        assert_relative_eq!(b.initial_step_size(), 2.4);
        assert_eq!(b.lower_bound(), &[0.0, -4.0]);
        assert_eq!(b.upper_bound(), &[10.0, 4.0]);
    }

    #[test]
    fn test_invalid_bounds() {
        assert_eq!(
            BoundaryBoxConstraint::new(vec![], vec![]),
            Err(CmaesError::EmptyBounds)
        );
        assert_eq!(
            BoundaryBoxConstraint::new(vec![0.0, 0.0], vec![1.0]),
            Err(CmaesError::BoundLengthMismatch { lower: 2, upper: 1 })
        );
        assert!(matches!(
            BoundaryBoxConstraint::new(vec![0.0, 2.0], vec![1.0, 1.0]),
            Err(CmaesError::InvalidBounds { index: 1, .. })
        ));
        assert!(BoundaryBoxConstraint::uniform(f64::NEG_INFINITY, 0.0).is_err());
        assert!(BoundaryBoxConstraint::uniform(0.0, f64::NAN).is_err());
    }

    proptest! {
        #[test]
        fn prop_transform_stays_in_box(
            lo in -100.0f64..100.0,
            width in 1e-3f64..50.0,
            x in -1e6f64..1e6,
        ) {
            let hi = lo + width;
            let b = BoundaryBoxConstraint::uniform(lo, hi).unwrap();
            let y = b.transform(&point(&[x]))[0];
            prop_assert!(y >= lo && y <= hi, "{} mapped to {} outside [{}, {}]", x, y, lo, hi);
        }

        #[test]
        fn prop_transform_stays_in_box_for_any_finite_input(
            lo in -1e3f64..1e3,
            width in 1e-6f64..1e3,
            x in proptest::num::f64::NORMAL,
        ) {
            let hi = lo + width;
            let b = BoundaryBoxConstraint::uniform(lo, hi).unwrap();
            let y = b.transform(&point(&[x]))[0];
            prop_assert!(y >= lo && y <= hi, "{:e} mapped to {} outside [{}, {}]", x, y, lo, hi);
        }

        #[test]
        fn prop_inverse_round_trips_inside_box(
            lo in -100.0f64..100.0,
            width in 1e-2f64..50.0,
            t in 0.0f64..=1.0,
        ) {
            let hi = lo + width;
            let b = BoundaryBoxConstraint::uniform(lo, hi).unwrap();
            let y = point(&[lo + t * width]);
            let back = b.transform(&b.inverse(&y));
            prop_assert!((back[0] - y[0]).abs() <= 1e-9 * (1.0 + y[0].abs()));
        }

        #[test]
        fn prop_transform_is_continuous(
            lo in -10.0f64..10.0,
            width in 0.1f64..20.0,
            x in -200.0f64..200.0,
        ) {
            let b = BoundaryBoxConstraint::uniform(lo, lo + width).unwrap();
            let h = 1e-7;
            let a = b.transform(&point(&[x]))[0];
            let c = b.transform(&point(&[x + h]))[0];
            // The map is 1-Lipschitz.
            prop_assert!((a - c).abs() <= 1.01 * h + 1e-12 * (1.0 + x.abs()));
        }
    }

    #[test]
    fn test_huge_inputs_stay_in_box() {
        let b = BoundaryBoxConstraint::new(vec![0.0, -3.0], vec![2.0, 1e-3]).unwrap();
        for exponent in 15..=300 {
            let magnitude = 10f64.powi(exponent);
            for x in [magnitude, -magnitude, 1.7 * magnitude, -f64::MAX / 3.0] {
                let y = b.transform(&point(&[x, x]));
                assert!((0.0..=2.0).contains(&y[0]), "{:e} mapped to {}", x, y[0]);
                assert!((-3.0..=1e-3).contains(&y[1]), "{:e} mapped to {}", x, y[1]);
            }
        }
        let y = b.transform(&point(&[f64::MAX, f64::MIN]));
        assert!((0.0..=2.0).contains(&y[0]));
        assert!((-3.0..=1e-3).contains(&y[1]));
    }

    #[test]
    fn test_transform_is_periodic() {
        let b = BoundaryBoxConstraint::uniform(-1.0, 1.0).unwrap();
        // al = au = min(1, 2/20) = 0.1, period = 2 * (2 + 0.2) = 4.4
        for &x in &[-0.95, -0.3, 0.0, 0.7, 1.05] {
            let y = b.transform(&point(&[x]))[0];
            let shifted = b.transform(&point(&[x + 4.4]))[0];
            assert_abs_diff_eq!(y, shifted, epsilon = 1e-12);
        }
    }
}
