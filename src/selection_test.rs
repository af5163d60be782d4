// Tests for the selection policies

use nalgebra::DVector;
use rand::SeedableRng;
use rand_pcg::Pcg64;

use crate::error::CmaesError;
use crate::objective::{AddendSum, Objective};
use crate::selection::{FullSelection, RandomSelection, SelectionPolicy, SubsetSize};

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn population(values: &[f64]) -> Vec<DVector<f64>> {
        values.iter().map(|&v| DVector::from_element(2, v)).collect()
    }

    /// Addend `i` contributes `x[0] * 2^i`, so a subset sum identifies its indices.
    fn binary_addends(count: usize) -> AddendSum<impl Fn(&[f64], usize) -> f64 + Sync> {
        AddendSum::new(count, |x: &[f64], i: usize| x[0] * 2f64.powi(i as i32))
    }

    #[test]
    fn test_full_selection_evaluates_in_order() {
        let objective = |x: &[f64]| x[0] * 10.0 + x[1];
        let points = population(&[3.0, -1.0, 0.5, 7.0]);
        let mut rng = Pcg64::seed_from_u64(1);

        let sequential = FullSelection.select(&objective, &points, false, &mut rng);
        let parallel = FullSelection.select(&objective, &points, true, &mut rng);

        assert_eq!(sequential, vec![33.0, -11.0, 5.5, 77.0]);
        assert_eq!(sequential, parallel);
    }

    #[test]
    fn test_random_selection_shares_subset_within_generation() {
        let objective = binary_addends(10);
        let selection = RandomSelection::new(3).unwrap();
        let points = population(&[1.0, 2.0, 4.0, 0.5]);
        let mut rng = Pcg64::seed_from_u64(99);

        let fitness = selection.select(&objective, &points, false, &mut rng);

        let scale = 10.0 / 3.0;
        let mask = (fitness[0] / scale).round() as u32;
        assert_eq!(mask.count_ones(), 3);
        for (value, point) in fitness.iter().zip(&points) {
            assert_relative_eq!(*value, scale * point[0] * mask as f64, max_relative = 1e-12);
        }
    }

    #[test]
    fn test_random_selection_draws_new_subsets_across_generations() {
        let objective = binary_addends(12);
        let selection = RandomSelection::new(4).unwrap();
        let points = population(&[1.0]);
        let mut rng = Pcg64::seed_from_u64(5);

        let draws: Vec<f64> = (0..20)
            .map(|_| selection.select(&objective, &points, false, &mut rng)[0])
            .collect();

        assert!(draws.iter().any(|&d| d != draws[0]));
    }

    #[test]
    fn test_random_selection_is_scaled_to_full_sum() {
        let objective = AddendSum::new(10, |_: &[f64], _: usize| 1.0);
        let points = population(&[0.0, 1.0]);
        let mut rng = Pcg64::seed_from_u64(3);

        for count in 1..=10 {
            let selection = RandomSelection::new(count).unwrap();
            for value in selection.select(&objective, &points, false, &mut rng) {
                assert_relative_eq!(value, 10.0, max_relative = 1e-12);
            }
        }
    }

    #[test]
    fn test_whole_subset_matches_full_objective() {
        let objective = binary_addends(6);
        let selection = RandomSelection::new(50).unwrap();
        let points = population(&[1.5, -2.0]);
        let mut rng = Pcg64::seed_from_u64(0);

        let fitness = selection.select(&objective, &points, true, &mut rng);

        assert_eq!(fitness, vec![objective.evaluate(&[1.5, 1.5]), objective.evaluate(&[-2.0, -2.0])]);
    }

    #[test]
    fn test_parallel_random_selection_matches_sequential() {
        let objective = binary_addends(16);
        let selection = RandomSelection::with_fraction(0.25).unwrap();
        let points = population(&[1.0, 3.0, -2.0, 0.25, 8.0]);

        let a = selection.select(&objective, &points, false, &mut Pcg64::seed_from_u64(11));
        let b = selection.select(&objective, &points, true, &mut Pcg64::seed_from_u64(11));

        assert_eq!(a, b);
    }

    #[test]
    fn test_subset_size_resolution() {
        let default = RandomSelection::default();
        assert_eq!(default.subset_size(), SubsetSize::Fraction(0.3));
        assert_eq!(default.resolve(10), 3);
        assert_eq!(default.resolve(7), 3);
        assert_eq!(default.resolve(1), 1);

        let fixed = RandomSelection::new(5).unwrap();
        assert_eq!(fixed.resolve(100), 5);
        assert_eq!(fixed.resolve(3), 3);
    }

    #[test]
    fn test_invalid_subset_sizes() {
        assert_eq!(RandomSelection::new(0), Err(CmaesError::InvalidSubsetSize));
        assert!(RandomSelection::with_fraction(0.0).is_err());
        assert!(RandomSelection::with_fraction(1.5).is_err());
        assert!(RandomSelection::with_fraction(f64::NAN).is_err());
        assert!(RandomSelection::with_fraction(1.0).is_ok());
    }
}
