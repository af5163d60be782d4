//! IPOP and BIPOP restart schedules.
//!
//! Each run is an independent CMA-ES run from the same initial point with its
//! own seed (`seed + run index`); the evaluation budget is shared.

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;

use crate::cmaes::{default_population_size, Cmaes, CmaesResult, RunSettings};
use crate::error::CmaesError;
use crate::selection::SelectionPolicy;
use crate::transformation::TransformationPolicy;

/// Accumulates totals across runs and keeps the result with the best solution.
struct RestartSummary {
    budget: usize,
    evaluations: usize,
    generations: usize,
    runs: usize,
    best: CmaesResult,
}

impl RestartSummary {
    fn new(first: CmaesResult, budget: usize) -> Self {
        Self {
            budget,
            evaluations: first.evaluations_used,
            generations: first.generations_used,
            runs: 1,
            best: first,
        }
    }

    /// Evaluation limit for the next run: `Some(0)` means unlimited, `None`
    /// means the budget is spent.
    fn next_limit(&self) -> Option<usize> {
        if self.budget == 0 {
            Some(0)
        } else if self.evaluations >= self.budget {
            None
        } else {
            Some(self.budget - self.evaluations)
        }
    }

    fn absorb(&mut self, result: CmaesResult) {
        self.evaluations += result.evaluations_used;
        self.generations += result.generations_used;
        self.runs += 1;
        if result.best_solution.0 < self.best.best_solution.0 {
            self.best = result;
        }
    }

    fn finish(self) -> CmaesResult {
        CmaesResult {
            generations_used: self.generations,
            evaluations_used: self.evaluations,
            restarts_used: self.runs - 1,
            ..self.best
        }
    }
}

fn base_population(population_size: usize, dim: usize) -> usize {
    if population_size == 0 {
        default_population_size(dim)
    } else {
        population_size
    }
}

/// Population and step size of a small BIPOP run for a uniform draw `u`:
/// `λ_def (λ_large / 2λ_def)^{u²}` and `σ_def 10^{-2u}`. The population never
/// drops below two or below `min_population` (a fixed parent number).
pub(crate) fn small_run_settings(
    default_population: usize,
    large_population: usize,
    min_population: usize,
    default_step_size: f64,
    u: f64,
) -> (usize, f64) {
    let ratio = 0.5 * large_population as f64 / default_population as f64;
    let population_size = (default_population as f64 * ratio.powf(u * u)).floor() as usize;
    (
        population_size.max(min_population).max(2),
        default_step_size * 10f64.powf(-2.0 * u),
    )
}

/// IPOP-CMA-ES: restart with the population multiplied by
/// `population_increase_factor` each time.
pub(crate) fn run_ipop<T, S, O>(
    engine: &Cmaes<T, S>,
    objective: &O,
    initial: &[f64],
) -> Result<CmaesResult, CmaesError>
where
    T: TransformationPolicy,
    S: SelectionPolicy<O>,
    O: ?Sized,
{
    let config = engine.config();
    let mut population_size = base_population(config.population_size, initial.len());

    let first = engine.run_once(
        objective,
        initial,
        RunSettings {
            population_size,
            ..RunSettings::from_config(config)
        },
    )?;
    log::info!(
        "IPOP run 0 (pop_size={}) finished: {}, best={:.8}",
        population_size,
        first.termination_reason,
        first.best_solution.0
    );
    let mut summary = RestartSummary::new(first, config.max_evaluations);

    for run in 1..=config.restarts {
        let Some(limit) = summary.next_limit() else {
            log::info!("IPOP: evaluation budget exhausted after {} runs", summary.runs);
            break;
        };
        population_size =
            (population_size as f64 * config.population_increase_factor).round() as usize;

        let result = engine.run_once(
            objective,
            initial,
            RunSettings {
                population_size,
                seed: config.seed.wrapping_add(run as u64),
                step_size: config.step_size,
                evaluation_limit: limit,
            },
        )?;
        log::info!(
            "IPOP run {} (pop_size={}) finished: {}, best={:.8}",
            run,
            population_size,
            result.termination_reason,
            result.best_solution.0
        );
        summary.absorb(result);
    }

    Ok(summary.finish())
}

/// BIPOP-CMA-ES: alternate between an IPOP-style large-population regime and
/// short runs with a small population and step size, always giving the next run
/// to the regime that has spent fewer evaluations so far.
pub(crate) fn run_bipop<T, S, O>(
    engine: &Cmaes<T, S>,
    objective: &O,
    initial: &[f64],
) -> Result<CmaesResult, CmaesError>
where
    T: TransformationPolicy,
    S: SelectionPolicy<O>,
    O: ?Sized,
{
    let config = engine.config();
    let default_population = base_population(config.population_size, initial.len());
    let default_step_size = engine.default_step_size();
    // Separate stream for the regime draws so the runs' own seeds stay `seed + run`.
    let mut rng = Pcg64::seed_from_u64(config.seed.wrapping_add(config.restarts as u64 + 1));

    let first = engine.run_once(
        objective,
        initial,
        RunSettings {
            population_size: default_population,
            ..RunSettings::from_config(config)
        },
    )?;
    log::info!(
        "BIPOP run 0 (pop_size={}) finished: {}, best={:.8}",
        default_population,
        first.termination_reason,
        first.best_solution.0
    );

    let mut large_population = default_population;
    let mut large_evaluations = first.evaluations_used;
    let mut small_evaluations = 0usize;
    let mut summary = RestartSummary::new(first, config.max_evaluations);

    for run in 1..=config.restarts {
        let Some(limit) = summary.next_limit() else {
            log::info!("BIPOP: evaluation budget exhausted after {} runs", summary.runs);
            break;
        };
        let seed = config.seed.wrapping_add(run as u64);

        if small_evaluations < large_evaluations {
            let u: f64 = rng.gen();
            let (population_size, step_size) = small_run_settings(
                default_population,
                large_population,
                config.mu.unwrap_or(1),
                default_step_size,
                u,
            );

            let result = engine.run_once(
                objective,
                initial,
                RunSettings {
                    population_size,
                    seed,
                    step_size: Some(step_size),
                    evaluation_limit: limit,
                },
            )?;
            log::info!(
                "BIPOP run {} (small, pop_size={}, sigma={:.3e}) finished: {}, best={:.8}",
                run,
                population_size,
                step_size,
                result.termination_reason,
                result.best_solution.0
            );
            small_evaluations += result.evaluations_used;
            summary.absorb(result);
        } else {
            large_population =
                (large_population as f64 * config.population_increase_factor).round() as usize;

            let result = engine.run_once(
                objective,
                initial,
                RunSettings {
                    population_size: large_population,
                    seed,
                    step_size: config.step_size,
                    evaluation_limit: limit,
                },
            )?;
            log::info!(
                "BIPOP run {} (large, pop_size={}) finished: {}, best={:.8}",
                run,
                large_population,
                result.termination_reason,
                result.best_solution.0
            );
            large_evaluations += result.evaluations_used;
            summary.absorb(result);
        }
    }

    Ok(summary.finish())
}
