//! Posterior mode search and the curvature at the mode.
//!
//! The search runs in the unbounded free space of the problem's transformations. Once a
//! mode is found, the Hessian of the negative log posterior is computed in free space by
//! central differences and carried back to natural space through the transformations, where
//! its pseudo-inverse becomes the posterior covariance used by the sampler.

use std::collections::BTreeMap;

use argmin::core::observers::ObserverMode;
use argmin::core::{Executor, State, TerminationReason, TerminationStatus};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::neldermead::NelderMead;
use argmin::solver::quasinewton::LBFGS;
use argmin_observer_slog::SlogLogger;
use finitediff::FiniteDiff;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::linalg::psd_pseudo_inverse;
use crate::optim::error::OptimizeError;
use crate::optim::objective::ObjectiveProvider;
use crate::optim::observer::{IterationObserver, ProgressCallback};
use crate::optim::problem::EstimationProblem;
use crate::optim::report::{ModeEstimate, PosteriorEstimate};
use crate::optim::system::PosteriorObjective;

/// Solver used for the mode search.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModeSolver {
    /// Limited-memory BFGS with a More-Thuente line search.
    #[default]
    Lbfgs,
    /// Derivative-free simplex search.
    NelderMead,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, bon::Builder)]
#[serde(default)]
pub struct OptimizerConfig {
    #[builder(default = 500)]
    pub max_iterations: u64,
    /// Every cost evaluation counts, including those spent on finite-difference gradients.
    #[builder(default = 20_000)]
    pub max_function_evaluations: u64,
    #[builder(default)]
    pub solver: ModeSolver,
    /// Number of correction pairs kept by L-BFGS.
    #[builder(default = 7)]
    pub lbfgs_memory: usize,
    /// Sufficient decrease constant of the line search.
    #[builder(default = 1e-4)]
    pub c1: f64,
    /// Curvature constant of the line search.
    #[builder(default = 0.9)]
    pub c2: f64,
    #[builder(default = 1e-6)]
    pub tolerance_grad: f64,
    #[builder(default = 1e-12)]
    pub tolerance_cost: f64,
    /// Edge length of the initial Nelder-Mead simplex in free space.
    #[builder(default = 0.1)]
    pub simplex_step: f64,
    /// Stop Nelder-Mead once the standard deviation of the simplex costs falls below this.
    #[builder(default = 1e-10)]
    pub simplex_tolerance: f64,
    #[builder(default)]
    pub show_progress: bool,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Finds the posterior mode of an [`EstimationProblem`].
///
/// ```no_run
/// use bayesian_estimation::prelude::*;
///
/// # fn run<P: ObjectiveProvider>(problem: EstimationProblem<P>) -> Result<(), OptimizeError> {
/// let optimizer = PosteriorModeOptimizer::new(OptimizerConfig::default());
/// let posterior = optimizer.maximize(problem)?;
/// println!("{}", posterior.estimate());
/// # Ok(())
/// # }
/// ```
pub struct PosteriorModeOptimizer {
    config: OptimizerConfig,
    callback: Option<ProgressCallback>,
}

enum SolveOutcome {
    Finished(TerminationStatus),
    Failed(argmin::core::Error),
}

impl PosteriorModeOptimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        Self {
            config,
            callback: None,
        }
    }

    /// Installs a callback invoked after every iteration. Returning `Break` stops the search,
    /// which then finishes from the best point found so far.
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Maximizes the posterior, consuming the problem into the returned estimate.
    ///
    /// Running out of iterations or evaluations, solver failures and cancellation are not
    /// errors: the best point evaluated so far is used and the estimate is flagged as not
    /// converged. Errors are reserved for outcomes that leave no usable estimate.
    pub fn maximize<P: ObjectiveProvider>(
        mut self,
        problem: EstimationProblem<P>,
    ) -> Result<PosteriorEstimate<P>, OptimizeError> {
        let start = problem.free_start();
        log::info!(
            "Searching posterior mode of {} parameters with {:?}",
            problem.dim(),
            self.config.solver
        );

        let objective = PosteriorObjective::new(&problem, self.config.max_function_evaluations);
        let tracker = objective.tracker();
        let (observer, iterations) = IterationObserver::new(self.callback.take());

        let outcome = match self.config.solver {
            ModeSolver::Lbfgs => self.run_lbfgs(objective, observer, start.clone())?,
            ModeSolver::NelderMead => self.run_nelder_mead(objective, observer, &start)?,
        };

        let converged = match outcome {
            SolveOutcome::Finished(TerminationStatus::Terminated(
                TerminationReason::SolverConverged | TerminationReason::TargetCostReached,
            )) => true,
            SolveOutcome::Finished(status) => {
                log::warn!("Mode search stopped before convergence: {status:?}");
                false
            }
            SolveOutcome::Failed(error) => {
                log::warn!("Mode search stopped before convergence: {error}");
                false
            }
        };

        let iterations = iterations.load(std::sync::atomic::Ordering::Relaxed);
        let evaluations = tracker.evaluations();
        let free_mode = tracker.best().map(|(param, _)| param).unwrap_or(start);
        log::debug!("Mode search used {iterations} iterations and {evaluations} evaluations");

        let estimate = Self::estimate_at(&problem, &free_mode, converged, iterations, evaluations)?;
        Ok(PosteriorEstimate::new(problem, estimate))
    }

    fn run_lbfgs<P: ObjectiveProvider>(
        &self,
        objective: PosteriorObjective<'_, P>,
        observer: IterationObserver,
        start: Array1<f64>,
    ) -> Result<SolveOutcome, OptimizeError> {
        let linesearch = MoreThuenteLineSearch::new()
            .with_c(self.config.c1, self.config.c2)
            .map_err(OptimizeError::ArgMinError)?;
        let solver = LBFGS::new(linesearch, self.config.lbfgs_memory)
            .with_tolerance_grad(self.config.tolerance_grad)
            .map_err(OptimizeError::ArgMinError)?
            .with_tolerance_cost(self.config.tolerance_cost)
            .map_err(OptimizeError::ArgMinError)?;

        let max_iters = self.config.max_iterations;
        let mut executor = Executor::new(objective, solver)
            .configure(|state| state.param(start).max_iters(max_iters))
            .add_observer(observer, ObserverMode::Always);
        if self.config.show_progress {
            executor = executor.add_observer(SlogLogger::term(), ObserverMode::Always);
        }

        Ok(match executor.run() {
            Ok(res) => SolveOutcome::Finished(res.state().get_termination_status().clone()),
            Err(error) => SolveOutcome::Failed(error),
        })
    }

    fn run_nelder_mead<P: ObjectiveProvider>(
        &self,
        objective: PosteriorObjective<'_, P>,
        observer: IterationObserver,
        start: &Array1<f64>,
    ) -> Result<SolveOutcome, OptimizeError> {
        let mut simplex = vec![start.clone()];
        for i in 0..start.len() {
            let mut vertex = start.clone();
            vertex[i] += self.config.simplex_step;
            simplex.push(vertex);
        }
        let solver = NelderMead::new(simplex)
            .with_sd_tolerance(self.config.simplex_tolerance)
            .map_err(OptimizeError::ArgMinError)?;

        let max_iters = self.config.max_iterations;
        let mut executor = Executor::new(objective, solver)
            .configure(|state| state.max_iters(max_iters))
            .add_observer(observer, ObserverMode::Always);
        if self.config.show_progress {
            executor = executor.add_observer(SlogLogger::term(), ObserverMode::Always);
        }

        Ok(match executor.run() {
            Ok(res) => SolveOutcome::Finished(res.state().get_termination_status().clone()),
            Err(error) => SolveOutcome::Failed(error),
        })
    }

    /// Builds the estimate at a free-space point: natural mode, posterior terms, Hessians
    /// and covariance.
    fn estimate_at<P: ObjectiveProvider>(
        problem: &EstimationProblem<P>,
        free_mode: &Array1<f64>,
        converged: bool,
        iterations: u64,
        function_evaluations: u64,
    ) -> Result<ModeEstimate, OptimizeError> {
        let mode = problem.expand(free_mode);
        let natural = mode.to_vec();
        if let Some(i) = problem.bound_violation(&natural) {
            let spec = &problem.specs()[i];
            return Err(OptimizeError::BoundViolation {
                param: spec.name().to_string(),
                value: mode[i],
                lower: spec.lower(),
                upper: spec.upper(),
            });
        }

        let evaluation = problem
            .evaluate_natural(&natural)
            .map_err(OptimizeError::ModeEvaluation)?;

        let hessian_total = natural_hessian(problem, free_mode)?;
        let hessian_prior = prior_hessian(problem, &mode);
        let hessian_data = &hessian_total - &hessian_prior;

        let (covariance, dropped) = psd_pseudo_inverse(&hessian_total);
        if dropped > 0 {
            log::warn!(
                "Hessian at the mode is not positive definite, {dropped} direction(s) dropped from the covariance"
            );
        }

        Ok(ModeEstimate {
            names: problem.names(),
            mode,
            covariance,
            hessian_total,
            hessian_prior,
            hessian_data,
            variance_factor: evaluation.variance_factor,
            concentrated: evaluation.concentrated.into_iter().collect::<BTreeMap<_, _>>(),
            shock_std: problem.specs().iter().map(|s| s.is_shock_std()).collect(),
            neg_log_posterior: evaluation.neg_log_posterior,
            neg_log_lik: evaluation.neg_log_lik,
            ln_prior: evaluation.ln_prior,
            converged,
            iterations,
            function_evaluations,
        })
    }
}

/// Hessian of the negative log posterior in natural space at the free point `z`.
///
/// With x = T(z) componentwise, d²f/dz_i dz_j = F_ij T'_i T'_j + δ_ij F_i T''_i, where F is
/// the objective in natural space. The free-space gradient supplies F_i = (df/dz_i) / T'_i.
fn natural_hessian<P: ObjectiveProvider>(
    problem: &EstimationProblem<P>,
    z: &Array1<f64>,
) -> Result<Array2<f64>, OptimizeError> {
    let f = |free: &Array1<f64>| problem.neg_log_posterior(free);
    let curvature = free_hessian(&f, z);
    let free_gradient = z.central_diff(&f);

    let transformations = problem.transformations();
    let jacobian: Vec<f64> = transformations
        .iter()
        .zip(z.iter())
        .map(|(t, zi)| t.jacobian(*zi))
        .collect();

    let n = z.len();
    let mut hessian = Array2::zeros((n, n));
    for i in 0..n {
        for j in 0..n {
            let mut value = curvature[[i, j]];
            if i == j {
                value -= free_gradient[i] * transformations[i].second_derivative(z[i]) / jacobian[i];
            }
            hessian[[i, j]] = value / (jacobian[i] * jacobian[j]);
        }
    }

    if hessian.iter().any(|v| !v.is_finite()) {
        return Err(OptimizeError::HessianNotFinite);
    }
    Ok((&hessian + &hessian.t()) * 0.5)
}

/// Hessian of `f` at `z` from central differences of central-difference gradients.
///
/// finitediff steps by ε^(1/2) in every coordinate. Differencing in the scaled coordinates
/// u_i = (x_i - z_i) / c_i with c_i = ε^(-1/4) max(|z_i|, 1) turns that into a step of
/// ε^(1/4) max(|z_i|, 1) in z, and H_ij = H^u_ij / (c_i c_j).
fn free_hessian(f: &dyn Fn(&Array1<f64>) -> f64, z: &Array1<f64>) -> Array2<f64> {
    let scale = z.mapv(|v| f64::EPSILON.powf(-0.25) * v.abs().max(1.0));
    let scaled = |u: &Array1<f64>| f(&(z + &(u * &scale)));
    let gradient = |u: &Array1<f64>| u.central_diff(&scaled);

    let n = z.len();
    let hessian = Array1::<f64>::zeros(n).central_hessian(&gradient);
    Array2::from_shape_fn((n, n), |(i, j)| hessian[[i, j]] / (scale[i] * scale[j]))
}

/// Diagonal Hessian of the negative log prior.
fn prior_hessian<P: ObjectiveProvider>(
    problem: &EstimationProblem<P>,
    mode: &Array1<f64>,
) -> Array2<f64> {
    let diagonal: Array1<f64> = problem
        .specs()
        .iter()
        .zip(mode.iter())
        .map(|(spec, x)| {
            let curvature = spec.prior().map_or(0.0, |p| -p.ln_density_hess(*x));
            if curvature.is_finite() {
                curvature
            } else {
                0.0
            }
        })
        .collect();
    Array2::from_diag(&diagonal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optim::objective::ProviderError;
    use crate::optim::parameter::ParameterSpec;
    use crate::optim::problem::tests::ConstantProvider;
    use crate::priors::{Family, Prior};
    use approx::assert_relative_eq;
    use ndarray::array;

    /// Independent Gaussian likelihood centred at `center` with unit variances.
    struct QuadraticProvider {
        center: Vec<f64>,
    }

    impl ObjectiveProvider for QuadraticProvider {
        fn parameter_names(&self) -> Vec<String> {
            (0..self.center.len()).map(|i| format!("x{i}")).collect()
        }

        fn current_values(&self) -> Vec<f64> {
            vec![0.0; self.center.len()]
        }

        fn raw_neg_log_lik(&self, params: &[f64]) -> Result<f64, ProviderError> {
            Ok(params
                .iter()
                .zip(&self.center)
                .map(|(x, c)| 0.5 * (x - c).powi(2))
                .sum())
        }
    }

    fn bounded_scenario() -> EstimationProblem<ConstantProvider> {
        EstimationProblem::builder()
            .provider(ConstantProvider {
                names: vec!["x".into()],
                current: vec![0.3],
                value: 0.0,
            })
            .specs(vec![ParameterSpec::builder()
                .name("x")
                .lower(0.0)
                .upper(1.0)
                .prior(Prior::from_mean_std(Family::Normal, 0.5, 0.1).unwrap())
                .build()
                .unwrap()])
            .build()
            .unwrap()
    }

    fn quadratic_problem(lower: Option<f64>) -> EstimationProblem<QuadraticProvider> {
        let specs = (0..2)
            .map(|i| {
                ParameterSpec::builder()
                    .name(format!("x{i}"))
                    .maybe_lower(lower)
                    .build()
                    .unwrap()
            })
            .collect();
        EstimationProblem::builder()
            .provider(QuadraticProvider {
                center: vec![1.5, 2.5],
            })
            .specs(specs)
            .build()
            .unwrap()
    }

    #[test]
    fn test_free_hessian_of_quadratic() {
        let a = array![[4.0, 1.0], [1.0, 3.0]];
        let f = |x: &Array1<f64>| 0.5 * x.dot(&a.dot(x)) + 2.0 * x[0];
        let hessian = free_hessian(&f, &array![0.3, -1.2]);

        for i in 0..2 {
            for j in 0..2 {
                assert_relative_eq!(hessian[[i, j]], a[[i, j]], max_relative = 1e-5);
            }
        }
        assert_relative_eq!(hessian[[0, 1]], hessian[[1, 0]], max_relative = 1e-12);
    }

    #[test]
    fn test_free_hessian_of_nonquadratic() {
        let f = |x: &Array1<f64>| x[0].exp() + x[0] * x[1] * x[1];
        let hessian = free_hessian(&f, &array![0.5, 2.0]);

        assert_relative_eq!(hessian[[0, 0]], 0.5f64.exp(), max_relative = 1e-5);
        assert_relative_eq!(hessian[[0, 1]], 4.0, max_relative = 1e-5);
        assert_relative_eq!(hessian[[1, 1]], 1.0, max_relative = 1e-5);
    }

    #[test]
    fn test_prior_only_posterior_on_bounded_parameter() {
        let posterior = PosteriorModeOptimizer::new(OptimizerConfig::default())
            .maximize(bounded_scenario())
            .unwrap();

        assert_relative_eq!(posterior.mode()[0], 0.5, epsilon = 1e-5);
        assert_relative_eq!(posterior.covariance()[[0, 0]], 0.01, max_relative = 1e-3);
        let estimate = posterior.estimate();
        assert_relative_eq!(estimate.hessian_prior[[0, 0]], 100.0, max_relative = 1e-9);
        assert_relative_eq!(estimate.hessian_data[[0, 0]], 0.0, epsilon = 0.1);
    }

    #[test]
    fn test_lbfgs_and_nelder_mead_agree() {
        for solver in [ModeSolver::Lbfgs, ModeSolver::NelderMead] {
            let config = OptimizerConfig::builder()
                .solver(solver)
                .max_iterations(2_000)
                .build();
            let posterior = PosteriorModeOptimizer::new(config)
                .maximize(quadratic_problem(Some(-10.0)))
                .unwrap();

            assert_relative_eq!(posterior.mode()[0], 1.5, epsilon = 1e-4);
            assert_relative_eq!(posterior.mode()[1], 2.5, epsilon = 1e-4);
            assert_relative_eq!(posterior.covariance()[[0, 0]], 1.0, max_relative = 1e-3);
            assert_relative_eq!(posterior.covariance()[[0, 1]], 0.0, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_exhausted_budget_returns_best_point_unconverged() {
        let config = OptimizerConfig::builder().max_function_evaluations(12).build();
        let posterior = PosteriorModeOptimizer::new(config)
            .maximize(quadratic_problem(None))
            .unwrap();

        let estimate = posterior.estimate();
        assert!(!estimate.converged);
        assert!(estimate.function_evaluations <= 12);
        let start_cost = 0.5 * (1.5f64.powi(2) + 2.5f64.powi(2));
        assert!(estimate.neg_log_posterior <= start_cost);
    }

    #[test]
    fn test_cancelled_search_is_unconverged() {
        let optimizer = PosteriorModeOptimizer::new(OptimizerConfig::default())
            .with_progress(Box::new(|_| std::ops::ControlFlow::Break(())));
        let posterior = optimizer.maximize(quadratic_problem(None)).unwrap();
        assert!(!posterior.converged());
        assert_eq!(posterior.estimate().iterations, 1);
    }

    #[test]
    fn test_iteration_limit_is_unconverged() {
        let config = OptimizerConfig::builder()
            .solver(ModeSolver::NelderMead)
            .max_iterations(1)
            .build();
        let posterior = PosteriorModeOptimizer::new(config)
            .maximize(quadratic_problem(None))
            .unwrap();
        assert!(!posterior.converged());
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: OptimizerConfig =
            serde_json::from_str(r#"{"max_iterations": 50, "solver": "nelder-mead"}"#).unwrap();
        assert_eq!(config.max_iterations, 50);
        assert_eq!(config.solver, ModeSolver::NelderMead);
        assert_eq!(config.max_function_evaluations, 20_000);
        assert_eq!(config.lbfgs_memory, 7);
    }
}
