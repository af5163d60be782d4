// Tests for the restart schedules

use crate::restart::small_run_settings;

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_small_run_at_u_zero_uses_defaults() {
        let (population, step) = small_run_settings(10, 40, 1, 3.0, 0.0);
        assert_eq!(population, 10);
        assert_relative_eq!(step, 3.0);
    }

    #[test]
    fn test_small_run_step_shrinks_by_two_decades() {
        let (population, step) = small_run_settings(10, 40, 1, 3.0, 1.0);
        assert_eq!(population, 20);
        assert_relative_eq!(step, 0.03, max_relative = 1e-12);

        let (_, step) = small_run_settings(10, 10, 1, 2.0, 0.5);
        assert_relative_eq!(step, 0.2, max_relative = 1e-12);
    }

    #[test]
    fn test_small_run_population_floor() {
        // Half the default population, but never below a fixed parent number.
        assert_eq!(small_run_settings(10, 10, 1, 1.0, 1.0).0, 5);
        assert_eq!(small_run_settings(10, 10, 15, 1.0, 1.0).0, 15);
        assert_eq!(small_run_settings(3, 3, 1, 1.0, 1.0).0, 2);
    }
}
