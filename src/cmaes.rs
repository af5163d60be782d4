use std::collections::VecDeque;
use std::fmt;

use nalgebra::DVector;
use rand::SeedableRng;
use rand_pcg::Pcg64;

use crate::error::CmaesError;
use crate::objective::Optimizer;
use crate::restart;
use crate::sampling;
use crate::selection::{FullSelection, RandomSelection, SelectionPolicy};
use crate::state::{SearchState, Weights};
use crate::transformation::{BoundaryBoxConstraint, IdentityTransformation, TransformationPolicy};

/// How the covariance matrix learns from a ranked population.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CovarianceUpdate {
    /// Rank-one and rank-mu updates from the `mu` best candidates.
    #[default]
    Standard,
    /// Additionally shrink variance along the steps of the worst candidates
    /// (negative recombination weights).
    Active,
}

/// Restart schedule used when [`CmaesConfig::restarts`] is positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RestartStrategy {
    /// Grow the population after every run.
    #[default]
    Ipop,
    /// Interleave large-population runs with short small-population runs.
    Bipop,
}

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// The generation-best fitness stayed within `tolerance` over the history window.
    FunctionTolerance,
    /// The search distribution became narrower than `step_tolerance`.
    StepTolerance,
    /// `max_generations` reached.
    MaxGenerations,
    /// The evaluation budget is spent.
    MaxEvaluations,
    /// No improvement of the best-ever fitness for `stagnation_limit` generations.
    Stagnation,
    /// The step size became non-finite, non-positive or exceeded `step_size_ceiling`.
    StepSizeDiverged,
    /// The covariance kept failing its decomposition after `max_regularizations` resets.
    IllConditioned,
    /// The caller finished the run before any criterion was met.
    Stopped,
}

impl TerminationReason {
    /// A tolerance criterion was met.
    pub fn is_converged(&self) -> bool {
        matches!(self, Self::FunctionTolerance | Self::StepTolerance)
    }

    /// The search became numerically unusable.
    pub fn is_diverged(&self) -> bool {
        matches!(self, Self::StepSizeDiverged | Self::IllConditioned)
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::FunctionTolerance => "fitness range below tolerance",
            Self::StepTolerance => "step size below tolerance",
            Self::MaxGenerations => "maximum generations reached",
            Self::MaxEvaluations => "evaluation budget exhausted",
            Self::Stagnation => "no improvement within the stagnation limit",
            Self::StepSizeDiverged => "step size diverged",
            Self::IllConditioned => "covariance matrix ill-conditioned",
            Self::Stopped => "stopped by caller",
        };
        f.write_str(text)
    }
}

/// Output of a CMA-ES optimization.
///
/// All coordinates are in the feasible (transformed) space.
#[derive(Debug, Clone)]
pub struct CmaesResult {
    /// Best (objective, parameters) evaluated over the entire run (or across restarts).
    pub best_solution: (f64, Vec<f64>),
    /// Mean of the final search distribution.
    pub final_mean: Vec<f64>,
    /// Fitness of `final_mean` as reported by the selection policy.
    pub final_fitness: f64,
    /// Total number of generations performed (summed across all restarts).
    pub generations_used: usize,
    /// Total number of points handed to the selection policy.
    pub evaluations_used: usize,
    /// Number of restarts performed after the first run.
    pub restarts_used: usize,
    /// Reason for final termination.
    pub termination_reason: TerminationReason,
    /// The last ranked population as (fitness, point), best first.
    pub final_population: Option<Vec<(f64, Vec<f64>)>>,
}

impl CmaesResult {
    pub fn converged(&self) -> bool {
        self.termination_reason.is_converged()
    }
}

/// Configuration for CMA-ES and Active CMA-ES.
///
/// Most parameters have sensible defaults and can be left as `None` to use automatic values.
///
/// # Basic Parameters
///
/// The most important parameters for typical usage are:
/// - `population_size`: Controls exploration vs exploitation trade-off
/// - `max_generations`: Maximum number of generations to run
/// - `tolerance`: Fitness range that counts as converged
/// - `step_size`: Initial step size (otherwise taken from the transformation policy)
/// - `covariance_update`: Standard or Active covariance learning
///
/// # Advanced Parameters
///
/// Learning rates, numerical ceilings, the decomposition schedule and restarts.
///
/// # Example
///
/// ```rust
/// use active_cmaes::cmaes::{CmaesConfig, CovarianceUpdate, RestartStrategy};
///
/// // Active CMA-ES with a fixed population
/// let config = CmaesConfig {
///     population_size: 32,
///     tolerance: 1e-3,
///     step_size: Some(0.075),
///     ..CmaesConfig::active()
/// };
/// assert_eq!(config.covariance_update, CovarianceUpdate::Active);
///
/// // IPOP restarts within an evaluation budget
/// let restarting = CmaesConfig {
///     restarts: 4,
///     restart_strategy: RestartStrategy::Ipop,
///     max_evaluations: 100_000,
///     ..Default::default()
/// };
/// assert!(restarting.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct CmaesConfig {
    /// Population size (number of candidate solutions per generation).
    ///
    /// **Default**: 0 (automatic: 4 + ⌊3 ln(n)⌋ where n is problem dimension)
    ///
    /// **Larger values**: Better global exploration, slower convergence, more robust
    /// **Smaller values**: Faster convergence, risk of premature convergence
    pub population_size: usize,

    /// Number of parents used for recombination.
    ///
    /// **Default**: None (population_size / 2)
    pub mu: Option<usize>,

    /// Maximum number of generations per run; 0 disables the cap.
    ///
    /// **Default**: 1000
    pub max_generations: usize,

    /// Budget of evaluated points, shared across restarts; 0 disables it.
    ///
    /// **Default**: 0
    ///
    /// Checked between generations, so a run may overshoot by one population.
    pub max_evaluations: usize,

    /// Fitness tolerance: a run converges once the best fitness of each of the
    /// last `fitness_history_len` generations lies within this range.
    ///
    /// **Default**: 1e-5
    pub tolerance: f64,

    /// Coordinate tolerance on `sigma * sqrt(max diag C)` and `sigma * max |p_c|`.
    ///
    /// **Default**: None (1e-12 times the initial step size)
    pub step_tolerance: Option<f64>,

    /// Number of generations the fitness tolerance looks back over.
    ///
    /// **Default**: None (10 + ⌈30 n / population_size⌉)
    pub fitness_history_len: Option<usize>,

    /// Stop after this many generations without improving the best-ever fitness.
    ///
    /// **Default**: None (disabled)
    pub stagnation_limit: Option<usize>,

    /// Initial step size (sigma).
    ///
    /// **Default**: None (taken from the transformation policy: 1 for the identity,
    /// 0.3 times the narrowest range for a boundary box)
    pub step_size: Option<f64>,

    /// Random seed for reproducible results.
    ///
    /// **Default**: 42
    ///
    /// A run draws everything from one stream seeded with this value, so equal
    /// seeds give identical trajectories with or without `parallel_eval`.
    pub seed: u64,

    /// Standard or Active covariance update.
    ///
    /// **Default**: Standard
    pub covariance_update: CovarianceUpdate,

    /// Learning rate for rank-one update of covariance matrix.
    ///
    /// **Default**: None (automatic: alpha_cov/((n+1.3)² + μ_eff))
    pub c1: Option<f64>,

    /// Learning rate for rank-μ update of covariance matrix.
    ///
    /// **Default**: None (automatic: depends on μ_eff and problem dimension)
    ///
    /// Must be balanced with c1 to ensure proper covariance matrix updates.
    pub c_mu: Option<f64>,

    /// Learning rate for cumulation path for step-size control.
    ///
    /// **Default**: None (automatic: (μ_eff + 2)/(n + μ_eff + 5))
    pub c_sigma: Option<f64>,

    /// Damping parameter for step-size update.
    ///
    /// **Default**: None (automatic: 1 + 2max(0, √((μ_eff-1)/(n+1)) - 1) + c_sigma)
    pub d_sigma: Option<f64>,

    /// Learning rate for the cumulation path of the covariance.
    ///
    /// **Default**: None (automatic: (4 + μ_eff/n)/(n + 4 + 2μ_eff/n))
    pub c_c: Option<f64>,

    /// Scale of the automatic c1 and c_mu.
    ///
    /// **Default**: 2.0
    pub alpha_cov: f64,

    /// Threshold factor for the evolution path test in step-size control.
    ///
    /// **Default**: 1.4
    ///
    /// Controls when to halt the cumulation of the covariance path based on
    /// the length of the step-size path.
    pub hsig_threshold_factor: f64,

    /// Enable parallel evaluation of candidate solutions.
    ///
    /// **Default**: false
    ///
    /// When true, each generation is evaluated in parallel using Rayon.
    /// Recommended for expensive objective functions. Disable for very fast
    /// functions where parallelization overhead exceeds benefits.
    pub parallel_eval: bool,

    /// Maximum number of generations between eigendecompositions of the covariance.
    ///
    /// **Default**: None (automatic: max(1, ⌊1/(10 n (c1 + c_mu))⌋))
    ///
    /// Positive definiteness is still checked every generation; a failed check
    /// forces an early decomposition.
    pub decomposition_interval: Option<usize>,

    /// Largest accepted condition number of the covariance.
    ///
    /// **Default**: 1e14
    pub condition_ceiling: f64,

    /// Step sizes above this value count as divergence.
    ///
    /// **Default**: 1e14
    pub step_size_ceiling: f64,

    /// How many times a failed decomposition may reset the covariance to the
    /// identity before the run gives up.
    ///
    /// **Default**: 3
    pub max_regularizations: usize,

    /// Number of restarts after the first run.
    ///
    /// **Default**: 0 (single run)
    pub restarts: usize,

    /// Restart schedule.
    ///
    /// **Default**: Ipop
    pub restart_strategy: RestartStrategy,

    /// Factor by which the population grows for each IPOP run (and each large BIPOP run).
    ///
    /// **Default**: 2.0
    pub population_increase_factor: f64,
}

impl Default for CmaesConfig {
    fn default() -> Self {
        Self {
            population_size: 0,
            mu: None,
            max_generations: 1000,
            max_evaluations: 0,
            tolerance: 1e-5,
            step_tolerance: None,
            fitness_history_len: None,
            stagnation_limit: None,
            step_size: None,
            seed: 42,
            covariance_update: CovarianceUpdate::Standard,
            c1: None,
            c_mu: None,
            c_sigma: None,
            d_sigma: None,
            c_c: None,
            alpha_cov: 2.0,
            hsig_threshold_factor: 1.4,
            parallel_eval: false,
            decomposition_interval: None,
            condition_ceiling: 1e14,
            step_size_ceiling: 1e14,
            max_regularizations: 3,
            restarts: 0,
            restart_strategy: RestartStrategy::Ipop,
            population_increase_factor: 2.0,
        }
    }
}

fn ensure(valid: bool, name: &'static str, value: f64) -> Result<(), CmaesError> {
    if valid {
        Ok(())
    } else {
        Err(CmaesError::InvalidParameter { name, value })
    }
}

fn in_unit_interval(value: Option<f64>) -> bool {
    value.map_or(true, |v| (0.0..=1.0).contains(&v))
}

impl CmaesConfig {
    /// Default configuration with the Active covariance update.
    pub fn active() -> Self {
        Self {
            covariance_update: CovarianceUpdate::Active,
            ..Default::default()
        }
    }

    /// Check every option that does not depend on the problem dimension.
    pub fn validate(&self) -> Result<(), CmaesError> {
        if self.population_size == 1 {
            return Err(CmaesError::InvalidPopulationSize(self.population_size));
        }
        if let Some(mu) = self.mu {
            if mu == 0 || (self.population_size > 0 && mu > self.population_size) {
                return Err(CmaesError::InvalidParentNumber {
                    mu,
                    lambda: self.population_size,
                });
            }
        }
        if let Some(step_size) = self.step_size {
            if !(step_size > 0.0 && step_size.is_finite()) {
                return Err(CmaesError::InvalidStepSize(step_size));
            }
        }

        ensure(self.tolerance >= 0.0 && self.tolerance.is_finite(), "tolerance", self.tolerance)?;
        if let Some(tol) = self.step_tolerance {
            ensure(tol >= 0.0 && tol.is_finite(), "step_tolerance", tol)?;
        }
        if let Some(len) = self.fitness_history_len {
            ensure(len > 0, "fitness_history_len", len as f64)?;
        }
        if let Some(interval) = self.decomposition_interval {
            ensure(interval > 0, "decomposition_interval", interval as f64)?;
        }

        ensure(in_unit_interval(self.c1), "c1", self.c1.unwrap_or_default())?;
        ensure(in_unit_interval(self.c_mu), "c_mu", self.c_mu.unwrap_or_default())?;
        if let (Some(c1), Some(c_mu)) = (self.c1, self.c_mu) {
            ensure(c1 + c_mu <= 1.0, "c1 + c_mu", c1 + c_mu)?;
        }
        if let Some(c_sigma) = self.c_sigma {
            ensure(c_sigma > 0.0 && c_sigma < 1.0, "c_sigma", c_sigma)?;
        }
        if let Some(d_sigma) = self.d_sigma {
            ensure(d_sigma > 0.0 && d_sigma.is_finite(), "d_sigma", d_sigma)?;
        }
        if let Some(c_c) = self.c_c {
            ensure(c_c > 0.0 && c_c <= 1.0, "c_c", c_c)?;
        }

        ensure(self.alpha_cov > 0.0 && self.alpha_cov.is_finite(), "alpha_cov", self.alpha_cov)?;
        ensure(
            self.hsig_threshold_factor > 0.0 && self.hsig_threshold_factor.is_finite(),
            "hsig_threshold_factor",
            self.hsig_threshold_factor,
        )?;
        ensure(self.condition_ceiling > 1.0, "condition_ceiling", self.condition_ceiling)?;
        ensure(self.step_size_ceiling > 0.0, "step_size_ceiling", self.step_size_ceiling)?;
        ensure(
            self.population_increase_factor >= 1.0 && self.population_increase_factor.is_finite(),
            "population_increase_factor",
            self.population_increase_factor,
        )?;
        Ok(())
    }
}

/// Default population size for dimension `dim`: 4 + ⌊3 ln(dim)⌋.
pub fn default_population_size(dim: usize) -> usize {
    4 + (3.0 * (dim.max(1) as f64).ln()) as usize
}

/// Per-run settings; restarts vary these while the configuration stays fixed.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RunSettings {
    pub population_size: usize,
    pub seed: u64,
    pub step_size: Option<f64>,
    pub evaluation_limit: usize,
}

impl RunSettings {
    pub(crate) fn from_config(config: &CmaesConfig) -> Self {
        Self {
            population_size: config.population_size,
            seed: config.seed,
            step_size: config.step_size,
            evaluation_limit: config.max_evaluations,
        }
    }
}

/// CMA-ES engine combining a transformation policy `T` and a selection policy `S`.
///
/// The covariance update mode (standard or Active) comes from the configuration;
/// approximate CMA-ES is the same engine with [`RandomSelection`].
///
/// # Example
///
/// ```rust
/// use active_cmaes::{Cmaes, CmaesConfig, FullSelection};
///
/// let sphere = |x: &[f64]| x.iter().map(|v| v * v).sum::<f64>();
/// let config = CmaesConfig { max_generations: 300, ..CmaesConfig::active() };
/// let cmaes = Cmaes::bounded(config, &[-5.0], &[5.0], FullSelection).unwrap();
///
/// let result = cmaes.optimize(&sphere, &[3.0, -2.0, 1.0]).unwrap();
/// assert!(result.best_solution.0 < 1e-3);
/// ```
#[derive(Debug, Clone)]
pub struct Cmaes<T = IdentityTransformation, S = FullSelection> {
    config: CmaesConfig,
    transformation: T,
    selection: S,
}

/// CMA-ES evaluating a random subset of a decomposable objective per generation.
pub type ApproxCmaes<T = IdentityTransformation> = Cmaes<T, RandomSelection>;

impl<T: TransformationPolicy, S> Cmaes<T, S> {
    pub fn new(config: CmaesConfig, transformation: T, selection: S) -> Result<Self, CmaesError> {
        config.validate()?;
        Ok(Self {
            config,
            transformation,
            selection,
        })
    }

    pub fn config(&self) -> &CmaesConfig {
        &self.config
    }

    pub fn transformation(&self) -> &T {
        &self.transformation
    }

    pub fn selection(&self) -> &S {
        &self.selection
    }

    /// Step size a run starts with unless a restart overrides it.
    pub(crate) fn default_step_size(&self) -> f64 {
        self.config
            .step_size
            .unwrap_or_else(|| self.transformation.initial_step_size())
    }

    /// Start a single run that the caller drives with [`CmaesRun::step`].
    /// Restart settings are ignored.
    pub fn start<'a, O>(
        &'a self,
        objective: &'a O,
        initial: &[f64],
    ) -> Result<CmaesRun<'a, T, S, O>, CmaesError>
    where
        O: ?Sized,
        S: SelectionPolicy<O>,
    {
        CmaesRun::new(self, objective, initial, RunSettings::from_config(&self.config))
    }

    /// Minimize `objective` starting from `initial`, with restarts if configured.
    pub fn optimize<O>(&self, objective: &O, initial: &[f64]) -> Result<CmaesResult, CmaesError>
    where
        O: ?Sized,
        S: SelectionPolicy<O>,
    {
        if self.config.restarts == 0 {
            return self.run_once(objective, initial, RunSettings::from_config(&self.config));
        }
        match self.config.restart_strategy {
            RestartStrategy::Ipop => restart::run_ipop(self, objective, initial),
            RestartStrategy::Bipop => restart::run_bipop(self, objective, initial),
        }
    }

    pub(crate) fn run_once<O>(
        &self,
        objective: &O,
        initial: &[f64],
        settings: RunSettings,
    ) -> Result<CmaesResult, CmaesError>
    where
        O: ?Sized,
        S: SelectionPolicy<O>,
    {
        let mut run = CmaesRun::new(self, objective, initial, settings)?;
        while run.step().is_none() {}
        Ok(run.finish())
    }
}

impl<T: TransformationPolicy> Cmaes<T, FullSelection> {
    /// Engine evaluating the full objective every generation.
    pub fn with_transformation(config: CmaesConfig, transformation: T) -> Result<Self, CmaesError> {
        Self::new(config, transformation, FullSelection)
    }
}

impl<S> Cmaes<BoundaryBoxConstraint, S> {
    /// Engine with a [`BoundaryBoxConstraint`] built from raw bounds. Single-entry
    /// bounds apply to every dimension.
    pub fn bounded(
        config: CmaesConfig,
        lower: &[f64],
        upper: &[f64],
        selection: S,
    ) -> Result<Self, CmaesError> {
        let transformation = BoundaryBoxConstraint::new(lower.to_vec(), upper.to_vec())?;
        Self::new(config, transformation, selection)
    }
}

impl<T, S, O> Optimizer<O> for Cmaes<T, S>
where
    T: TransformationPolicy,
    S: SelectionPolicy<O>,
    O: ?Sized,
{
    type Output = CmaesResult;

    fn optimize(&self, objective: &O, initial: &[f64]) -> Result<CmaesResult, CmaesError> {
        Cmaes::optimize(self, objective, initial)
    }
}

/// One optimization run, advanced a generation at a time.
///
/// ```rust
/// use active_cmaes::{Cmaes, CmaesConfig, IdentityTransformation};
///
/// let sphere = |x: &[f64]| x.iter().map(|v| v * v).sum::<f64>();
/// let cmaes = Cmaes::with_transformation(CmaesConfig::default(), IdentityTransformation).unwrap();
/// let mut run = cmaes.start(&sphere, &[1.0, 1.0]).unwrap();
///
/// while run.step().is_none() {
///     assert!(run.state().step_size > 0.0);
/// }
/// let result = run.finish();
/// assert!(result.converged());
/// ```
pub struct CmaesRun<'a, T, S, O: ?Sized> {
    engine: &'a Cmaes<T, S>,
    objective: &'a O,
    state: SearchState,
    weights: Weights,
    rng: Pcg64,
    decomposition_interval: usize,
    /// Best fitness of each recent generation, oldest first.
    history: VecDeque<f64>,
    history_len: usize,
    step_tolerance: f64,
    evaluation_limit: usize,
    evaluations: usize,
    regularizations: usize,
    no_improvement_count: usize,
    best: Option<(f64, DVector<f64>)>,
    last_population: Vec<(f64, DVector<f64>)>,
    termination: Option<TerminationReason>,
}

impl<'a, T, S, O> CmaesRun<'a, T, S, O>
where
    T: TransformationPolicy,
    S: SelectionPolicy<O>,
    O: ?Sized,
{
    fn new(
        engine: &'a Cmaes<T, S>,
        objective: &'a O,
        initial: &[f64],
        settings: RunSettings,
    ) -> Result<Self, CmaesError> {
        let dim = initial.len();
        if dim == 0 {
            return Err(CmaesError::EmptyCoordinates);
        }
        if let Some((index, &value)) = initial.iter().enumerate().find(|(_, v)| !v.is_finite()) {
            return Err(CmaesError::NonFiniteCoordinate { index, value });
        }
        engine.transformation.check_dimension(dim)?;

        let config = &engine.config;
        let lambda = if settings.population_size == 0 {
            default_population_size(dim)
        } else {
            settings.population_size
        };
        let mu = config.mu.unwrap_or(lambda / 2);
        let weights = Weights::new(dim, lambda, mu, config)?;

        let step_size = settings
            .step_size
            .unwrap_or_else(|| engine.transformation.initial_step_size());
        if !(step_size > 0.0 && step_size.is_finite()) {
            return Err(CmaesError::InvalidStepSize(step_size));
        }

        let decomposition_interval = config
            .decomposition_interval
            .unwrap_or_else(|| weights.decomposition_interval(dim));
        let history_len = config
            .fitness_history_len
            .unwrap_or_else(|| 10 + (30.0 * dim as f64 / lambda as f64).ceil() as usize);

        log::debug!(
            "CMA-ES run: dim={}, pop_size={}, mu={}, mu_eff={:.3}, sigma={:.5}, seed={}, update={:?}",
            dim,
            lambda,
            mu,
            weights.mu_eff,
            step_size,
            settings.seed,
            config.covariance_update
        );

        Ok(Self {
            engine,
            objective,
            state: SearchState::new(DVector::from_column_slice(initial), step_size),
            weights,
            rng: Pcg64::seed_from_u64(settings.seed),
            decomposition_interval,
            history: VecDeque::with_capacity(history_len + 1),
            history_len,
            step_tolerance: config.step_tolerance.unwrap_or(1e-12 * step_size),
            evaluation_limit: settings.evaluation_limit,
            evaluations: 0,
            regularizations: 0,
            no_improvement_count: 0,
            best: None,
            last_population: Vec::new(),
            termination: None,
        })
    }

    pub fn state(&self) -> &SearchState {
        &self.state
    }

    pub fn weights(&self) -> &Weights {
        &self.weights
    }

    pub fn population_size(&self) -> usize {
        self.weights.lambda()
    }

    pub fn decomposition_interval(&self) -> usize {
        self.decomposition_interval
    }

    pub fn evaluations(&self) -> usize {
        self.evaluations
    }

    /// How many times the covariance has been reset to the identity.
    pub fn regularizations(&self) -> usize {
        self.regularizations
    }

    /// Best-ever fitness and its feasible point.
    pub fn best(&self) -> Option<(f64, &DVector<f64>)> {
        self.best.as_ref().map(|(fitness, point)| (*fitness, point))
    }

    pub fn termination(&self) -> Option<TerminationReason> {
        self.termination
    }

    /// Run one generation. Returns the termination reason once the run is over;
    /// further calls do nothing.
    pub fn step(&mut self) -> Option<TerminationReason> {
        if self.termination.is_some() {
            return self.termination;
        }
        let engine = self.engine;
        let config = &engine.config;

        // Sample, then evaluate the transformed candidates together with the
        // current mean so both see the same selection.
        let mut population =
            sampling::sample_population(&self.state, self.weights.lambda(), &mut self.rng);
        let mut feasible: Vec<DVector<f64>> = population
            .iter()
            .map(|c| engine.transformation.transform(&c.point))
            .collect();
        feasible.push(engine.transformation.transform(&self.state.mean));

        let fitness = engine.selection.select(
            self.objective,
            &feasible,
            config.parallel_eval,
            &mut self.rng,
        );
        debug_assert_eq!(fitness.len(), feasible.len());
        self.evaluations += feasible.len();

        let mut fitness = fitness.into_iter().map(sampling::sanitize);
        for candidate in population.iter_mut() {
            candidate.fitness = fitness.next().unwrap_or(f64::INFINITY);
        }
        let mean_fitness = fitness.next().unwrap_or(f64::INFINITY);

        let order = sampling::rank(&population);
        let best_index = order[0];
        let generation_best = population[best_index].fitness;

        let mut improved = false;
        if let Some(mean_point) = feasible.pop() {
            improved |= self.record(mean_fitness, mean_point);
        }
        improved |= self.record(generation_best, feasible[best_index].clone());
        if improved {
            self.no_improvement_count = 0;
        } else {
            self.no_improvement_count += 1;
        }

        self.history.push_back(generation_best);
        if self.history.len() > self.history_len {
            self.history.pop_front();
        }
        self.last_population = order
            .iter()
            .map(|&i| (population[i].fitness, feasible[i].clone()))
            .collect();

        let steps: Vec<&DVector<f64>> = order.iter().map(|&i| &population[i].step).collect();
        self.state
            .update(&steps, &self.weights, config.hsig_threshold_factor);

        if let Err(error) = self
            .state
            .maintain(self.decomposition_interval, config.condition_ceiling)
        {
            self.regularizations += 1;
            if self.regularizations > config.max_regularizations {
                log::warn!(
                    "[CMA-ES Gen {}] {}; giving up after {} regularizations",
                    self.state.generation,
                    error,
                    config.max_regularizations
                );
                return self.terminate(TerminationReason::IllConditioned);
            }
            log::warn!(
                "[CMA-ES Gen {}] {}; resetting covariance to identity",
                self.state.generation,
                error
            );
            self.state.regularize();
        }

        let generation = self.state.generation;
        log::debug!(
            "[CMA-ES Gen {}] gen_best={:.8}, mean_fitness={:.8}, sigma={:.5e}",
            generation,
            generation_best,
            mean_fitness,
            self.state.step_size
        );
        if generation % 10 == 0 {
            log::info!(
                "[CMA-ES Gen {}] best={:.8}, sigma={:.5}, no_improv={}, evals_used={}",
                generation,
                self.best.as_ref().map_or(f64::INFINITY, |b| b.0),
                self.state.step_size,
                self.no_improvement_count,
                self.evaluations
            );
        }

        match self.check_termination() {
            Some(reason) => self.terminate(reason),
            None => None,
        }
    }

    /// Record an evaluated feasible point; returns whether it is a new best.
    fn record(&mut self, fitness: f64, point: DVector<f64>) -> bool {
        let better = fitness.is_finite() && self.best.as_ref().map_or(true, |(best, _)| fitness < *best);
        if better {
            self.best = Some((fitness, point));
        }
        better
    }

    fn check_termination(&self) -> Option<TerminationReason> {
        let config = &self.engine.config;
        let sigma = self.state.step_size;

        if !(sigma > 0.0) || !sigma.is_finite() || sigma > config.step_size_ceiling {
            return Some(TerminationReason::StepSizeDiverged);
        }

        if self.history.len() >= self.history_len {
            let (lo, hi) = self
                .history
                .iter()
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &f| (lo.min(f), hi.max(f)));
            if hi - lo < config.tolerance {
                return Some(TerminationReason::FunctionTolerance);
            }
        }

        let max_std = self
            .state
            .covariance
            .diagonal()
            .iter()
            .fold(0.0_f64, |m, &c| m.max(c.sqrt()));
        if sigma * max_std < self.step_tolerance
            && sigma * self.state.path_c.amax() < self.step_tolerance
        {
            return Some(TerminationReason::StepTolerance);
        }

        if let Some(limit) = config.stagnation_limit {
            if self.no_improvement_count >= limit {
                return Some(TerminationReason::Stagnation);
            }
        }
        if self.evaluation_limit > 0 && self.evaluations >= self.evaluation_limit {
            return Some(TerminationReason::MaxEvaluations);
        }
        if config.max_generations > 0 && self.state.generation >= config.max_generations {
            return Some(TerminationReason::MaxGenerations);
        }
        None
    }

    fn terminate(&mut self, reason: TerminationReason) -> Option<TerminationReason> {
        if reason.is_diverged() {
            log::warn!(
                "CMA-ES diverged after {} generations (sigma={:e}): {}",
                self.state.generation,
                self.state.step_size,
                reason
            );
        } else {
            log::info!(
                "CMA-ES terminated after {} generations ({} evaluations): {}",
                self.state.generation,
                self.evaluations,
                reason
            );
        }
        self.termination = Some(reason);
        self.termination
    }

    /// Evaluate the final mean and assemble the result.
    pub fn finish(mut self) -> CmaesResult {
        let engine = self.engine;
        let final_mean = engine.transformation.transform(&self.state.mean);
        let final_fitness = engine
            .selection
            .select(
                self.objective,
                std::slice::from_ref(&final_mean),
                false,
                &mut self.rng,
            )
            .first()
            .copied()
            .map_or(f64::INFINITY, sampling::sanitize);
        self.evaluations += 1;
        self.record(final_fitness, final_mean.clone());

        let best_solution = match self.best.take() {
            Some((fitness, point)) => (fitness, point.as_slice().to_vec()),
            None => (f64::INFINITY, final_mean.as_slice().to_vec()),
        };
        let final_population = if self.last_population.is_empty() {
            None
        } else {
            Some(
                self.last_population
                    .into_iter()
                    .map(|(fitness, point)| (fitness, point.as_slice().to_vec()))
                    .collect(),
            )
        };

        CmaesResult {
            best_solution,
            final_mean: final_mean.as_slice().to_vec(),
            final_fitness,
            generations_used: self.state.generation,
            evaluations_used: self.evaluations,
            restarts_used: 0,
            termination_reason: self.termination.unwrap_or(TerminationReason::Stopped),
            final_population,
        }
    }
}
