//! Adaptive random-walk Metropolis sampler.
//!
//! Proposals are `current + s·L·z` with `z` standard normal, where `L` starts as a factor of
//! the posterior covariance at the mode. During adaptation the log scale follows a
//! Robbins-Monro recursion towards the target acceptance rate and, optionally, `L` tracks
//! the running covariance of the chain.

use std::ops::ControlFlow;

use indicatif::ProgressBar;
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use statrs::distribution::Normal;

use crate::linalg::{cholesky, psd_factor};
use crate::mcmc::error::MCMCError;
use crate::mcmc::output::Chain;
use crate::optim::{EstimationProblem, ObjectiveProvider, PosteriorEstimate};
use crate::progress::progress_bar;

/// Ridge added to the empirical covariance before factorizing it, relative to its mean
/// diagonal.
const COVARIANCE_RIDGE: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, bon::Builder)]
#[serde(default)]
pub struct SamplerConfig {
    #[builder(default = 0.234)]
    pub target_acceptance_ratio: f64,
    /// Gain of the scale recursion, 0 keeps the scale fixed.
    #[builder(default = 1.0)]
    pub adaptive_scale_factor: f64,
    /// Exponent of the decaying gain `factor · (i + 1)^(-decay)`.
    #[builder(default = 0.8)]
    pub adaptation_decay: f64,
    #[builder(default = 1.0 / 3.0)]
    pub initial_scale: f64,
    /// Replace the proposal shape by the running chain covariance during adaptation.
    #[builder(default)]
    pub adapt_proposal_covariance: bool,
    #[builder(default = 0.2)]
    pub burn_in_fraction: f64,
    /// Number of adapting iterations, the burn-in length when unset.
    pub adaptation_draws: Option<usize>,
    #[builder(default)]
    pub random_seed: u64,
    /// Iterations between progress callback invocations.
    #[builder(default = 1)]
    pub progress_interval: usize,
    #[builder(default)]
    pub show_progress: bool,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl SamplerConfig {
    pub fn validate(&self) -> Result<(), MCMCError> {
        let invalid = |message: String| Err(MCMCError::InvalidConfig(message));
        if !(self.target_acceptance_ratio > 0.0 && self.target_acceptance_ratio < 1.0) {
            return invalid(format!(
                "target acceptance ratio {} must lie in (0, 1)",
                self.target_acceptance_ratio
            ));
        }
        if !(self.adaptive_scale_factor >= 0.0 && self.adaptive_scale_factor.is_finite()) {
            return invalid(format!(
                "adaptive scale factor {} must be finite and non-negative",
                self.adaptive_scale_factor
            ));
        }
        if !(self.adaptation_decay > 0.0 && self.adaptation_decay <= 1.0) {
            return invalid(format!(
                "adaptation decay {} must lie in (0, 1]",
                self.adaptation_decay
            ));
        }
        if !(self.initial_scale > 0.0 && self.initial_scale.is_finite()) {
            return invalid(format!("initial scale {} must be positive", self.initial_scale));
        }
        if !(0.0..1.0).contains(&self.burn_in_fraction) {
            return invalid(format!(
                "burn-in fraction {} must lie in [0, 1)",
                self.burn_in_fraction
            ));
        }
        Ok(())
    }

    /// Draws discarded from a run of `num_draws` iterations.
    pub fn burn_in(&self, num_draws: usize) -> usize {
        ((self.burn_in_fraction * num_draws as f64).round() as usize).min(num_draws)
    }

    fn adaptation_draws(&self, num_draws: usize) -> usize {
        self.adaptation_draws
            .unwrap_or_else(|| self.burn_in(num_draws))
    }
}

/// Progress reported every `progress_interval` iterations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerProgress {
    pub iteration: usize,
    pub total: usize,
    pub acceptance_ratio: f64,
    pub scale: f64,
}

pub type SamplerCallback<'a> = &'a mut dyn FnMut(SamplerProgress) -> ControlFlow<()>;

/// Result of one sampler run.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplerOutput {
    /// Draws kept after the burn-in.
    pub chain: Chain,
    /// Running acceptance ratio after every iteration, burn-in included.
    pub acceptance_trace: Vec<f64>,
    pub acceptance_ratio: f64,
    pub final_scale: f64,
    /// Iterations run, burn-in included.
    pub total_draws: usize,
    pub burn_in: usize,
    pub cancelled: bool,
}

/// Runs one chain of `num_draws` iterations from the posterior mode.
///
/// ```no_run
/// use bayesian_estimation::prelude::*;
///
/// # fn run<P: ObjectiveProvider>(posterior: &PosteriorEstimate<P>) -> Result<(), MCMCError> {
/// let config = SamplerConfig::builder().random_seed(7).build();
/// let output = sample(posterior, 10_000, &config, None)?;
/// println!("acceptance ratio {:.3}", output.acceptance_ratio);
/// # Ok(())
/// # }
/// ```
pub fn sample<P: ObjectiveProvider>(
    posterior: &PosteriorEstimate<P>,
    num_draws: usize,
    config: &SamplerConfig,
    progress: Option<SamplerCallback<'_>>,
) -> Result<SamplerOutput, MCMCError> {
    let bar = progress_bar("Sampling", num_draws as u64, config.show_progress);
    let mut sampler = AdaptiveMetropolis::new(
        posterior.problem(),
        posterior.mode().clone(),
        posterior.covariance(),
        config,
    )?;
    let output = sampler.run(num_draws, &bar, progress);
    Ok(output)
}

/// State of one adaptive Metropolis chain.
pub(crate) struct AdaptiveMetropolis<'a, P: ObjectiveProvider> {
    problem: &'a EstimationProblem<P>,
    config: &'a SamplerConfig,
    rng: StdRng,
    normal: Normal,
    current: Array1<f64>,
    current_log_posterior: f64,
    factor: Array2<f64>,
    log_scale: f64,
    running: RunningCovariance,
}

impl<'a, P: ObjectiveProvider> AdaptiveMetropolis<'a, P> {
    pub(crate) fn new(
        problem: &'a EstimationProblem<P>,
        start: Array1<f64>,
        covariance: &Array2<f64>,
        config: &'a SamplerConfig,
    ) -> Result<Self, MCMCError> {
        config.validate()?;
        let dim = problem.dim();
        if start.len() != dim || covariance.dim() != (dim, dim) {
            return Err(MCMCError::DimensionMismatch {
                expected: dim,
                found: start.len(),
            });
        }

        let current_log_posterior = problem
            .evaluate_natural(&start.to_vec())
            .map(|e| -e.neg_log_posterior)
            .map_err(MCMCError::InfeasibleStart)?;
        let normal = Normal::new(0.0, 1.0)
            .map_err(|e| MCMCError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            problem,
            config,
            rng: StdRng::seed_from_u64(config.random_seed),
            normal,
            current: start,
            current_log_posterior,
            factor: psd_factor(covariance),
            log_scale: config.initial_scale.ln(),
            running: RunningCovariance::new(dim),
        })
    }

    /// Log posterior of a candidate, `None` for rejected-without-evaluation or failed points.
    fn candidate_log_posterior(&self, candidate: &[f64]) -> Option<f64> {
        if self.problem.bound_violation(candidate).is_some() {
            return None;
        }
        match self.problem.evaluate_natural(candidate) {
            Ok(evaluation) => Some(-evaluation.neg_log_posterior),
            Err(failure) => {
                log::trace!("Rejecting proposal: {failure}");
                None
            }
        }
    }

    pub(crate) fn run(
        &mut self,
        num_draws: usize,
        bar: &ProgressBar,
        mut progress: Option<SamplerCallback<'_>>,
    ) -> SamplerOutput {
        let dim = self.problem.dim();
        let adaptation_draws = self.config.adaptation_draws(num_draws);
        let interval = self.config.progress_interval.max(1);
        let min_shape_draws = 2 * dim + 2;

        let mut draws = Array2::zeros((num_draws, dim));
        let mut log_posterior = Array1::zeros(num_draws);
        let mut acceptance_trace = Vec::with_capacity(num_draws);
        let mut accepted = 0usize;
        let mut recorded = 0usize;
        let mut cancelled = false;

        log::debug!(
            "Sampling {num_draws} draws, adapting during the first {adaptation_draws}"
        );

        for i in 0..num_draws {
            let z = Array1::from_shape_fn(dim, |_| self.rng.sample(self.normal));
            let scale = self.log_scale.exp();
            let candidate = &self.current + &(self.factor.dot(&z) * scale);

            let candidate_lp = self.candidate_log_posterior(&candidate.to_vec());
            let alpha = candidate_lp.map_or(0.0, |lp| {
                (lp - self.current_log_posterior).exp().min(1.0)
            });
            let u: f64 = self.rng.gen();
            if let Some(lp) = candidate_lp.filter(|_| u < alpha) {
                self.current = candidate;
                self.current_log_posterior = lp;
                accepted += 1;
            }

            draws.row_mut(i).assign(&self.current);
            log_posterior[i] = self.current_log_posterior;
            recorded = i + 1;
            let acceptance_ratio = accepted as f64 / recorded as f64;
            acceptance_trace.push(acceptance_ratio);

            if i < adaptation_draws {
                if self.config.adaptive_scale_factor > 0.0 {
                    let gain = self.config.adaptive_scale_factor
                        * ((i + 1) as f64).powf(-self.config.adaptation_decay);
                    self.log_scale += gain * (alpha - self.config.target_acceptance_ratio);
                }
                if self.config.adapt_proposal_covariance {
                    self.running.push(&self.current);
                    if self.running.count >= min_shape_draws {
                        if let Some(l) = self.running.factor() {
                            self.factor = l;
                        }
                    }
                }
            }

            bar.inc(1);
            if (i + 1) % interval == 0 || i + 1 == num_draws {
                bar.set_message(format!("acceptance {acceptance_ratio:.3}"));
                if let Some(callback) = progress.as_mut() {
                    let report = SamplerProgress {
                        iteration: i + 1,
                        total: num_draws,
                        acceptance_ratio,
                        scale: self.log_scale.exp(),
                    };
                    if callback(report).is_break() {
                        cancelled = true;
                        break;
                    }
                }
            }
        }

        if cancelled {
            log::warn!("Sampling cancelled after {recorded} of {num_draws} draws");
            bar.abandon_with_message("Cancelled");
        } else {
            bar.finish_with_message("Done");
        }

        let burn_in = self.config.burn_in(num_draws).min(recorded);
        let draws = draws.slice(ndarray::s![burn_in..recorded, ..]).to_owned();
        let log_posterior = log_posterior.slice(ndarray::s![burn_in..recorded]).to_owned();
        let acceptance_ratio = if recorded > 0 {
            accepted as f64 / recorded as f64
        } else {
            0.0
        };

        SamplerOutput {
            chain: Chain::from_parts(self.problem.names(), draws, log_posterior),
            acceptance_trace,
            acceptance_ratio,
            final_scale: self.log_scale.exp(),
            total_draws: recorded,
            burn_in,
            cancelled,
        }
    }
}

/// Welford accumulator for the chain mean and covariance.
struct RunningCovariance {
    count: usize,
    mean: Array1<f64>,
    scatter: Array2<f64>,
}

impl RunningCovariance {
    fn new(dim: usize) -> Self {
        Self {
            count: 0,
            mean: Array1::zeros(dim),
            scatter: Array2::zeros((dim, dim)),
        }
    }

    fn push(&mut self, x: &Array1<f64>) {
        self.count += 1;
        let delta = x - &self.mean;
        self.mean.scaled_add(1.0 / self.count as f64, &delta);
        let delta_after = x - &self.mean;
        let n = x.len();
        for i in 0..n {
            for j in 0..n {
                self.scatter[[i, j]] += delta[i] * delta_after[j];
            }
        }
    }

    /// Cholesky factor of the sample covariance plus a small ridge.
    fn factor(&self) -> Option<Array2<f64>> {
        if self.count < 2 {
            return None;
        }
        let mut covariance = &self.scatter / (self.count - 1) as f64;
        let n = covariance.nrows();
        let mean_diag = covariance.diag().sum() / n as f64;
        let ridge = COVARIANCE_RIDGE * mean_diag.max(f64::MIN_POSITIVE);
        for i in 0..n {
            covariance[[i, i]] += ridge;
        }
        cholesky(&covariance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optim::objective::ProviderError;
    use crate::optim::{ModeEstimate, ParameterSpec};
    use approx::assert_relative_eq;
    use ndarray::array;

    /// Standard normal likelihood in every coordinate.
    struct StandardNormal {
        dim: usize,
    }

    impl ObjectiveProvider for StandardNormal {
        fn parameter_names(&self) -> Vec<String> {
            (0..self.dim).map(|i| format!("x{i}")).collect()
        }

        fn current_values(&self) -> Vec<f64> {
            vec![0.0; self.dim]
        }

        fn raw_neg_log_lik(&self, params: &[f64]) -> Result<f64, ProviderError> {
            Ok(0.5 * params.iter().map(|x| x * x).sum::<f64>())
        }
    }

    fn posterior(dim: usize, lower: Option<f64>) -> PosteriorEstimate<StandardNormal> {
        let specs = (0..dim)
            .map(|i| {
                ParameterSpec::builder()
                    .name(format!("x{i}"))
                    .maybe_lower(lower)
                    .build()
                    .unwrap()
            })
            .collect();
        let problem = EstimationProblem::builder()
            .provider(StandardNormal { dim })
            .specs(specs)
            .build()
            .unwrap();
        let identity = Array2::eye(dim);
        let estimate = ModeEstimate {
            names: problem.names(),
            mode: Array1::from_elem(dim, 0.1),
            covariance: identity.clone(),
            hessian_total: identity.clone(),
            hessian_prior: Array2::zeros((dim, dim)),
            hessian_data: identity,
            variance_factor: 1.0,
            concentrated: Default::default(),
            shock_std: vec![false; dim],
            neg_log_posterior: 0.0,
            neg_log_lik: 0.0,
            ln_prior: 0.0,
            converged: true,
            iterations: 0,
            function_evaluations: 0,
        };
        PosteriorEstimate::from_mode_estimate(problem, estimate).unwrap()
    }

    #[test]
    fn test_zero_draws_give_empty_output() {
        let output = sample(&posterior(2, None), 0, &SamplerConfig::default(), None).unwrap();
        assert!(output.chain.is_empty());
        assert!(output.acceptance_trace.is_empty());
        assert_eq!(output.total_draws, 0);
    }

    #[test]
    fn test_burn_in_is_trimmed() {
        let output = sample(&posterior(2, None), 100, &SamplerConfig::default(), None).unwrap();
        assert_eq!(output.total_draws, 100);
        assert_eq!(output.burn_in, 20);
        assert_eq!(output.chain.len(), 80);
        assert_eq!(output.chain.dim(), 2);
        assert_eq!(output.acceptance_trace.len(), 100);
    }

    #[test]
    fn test_same_seed_gives_identical_chains() {
        let config = SamplerConfig::builder()
            .random_seed(42)
            .adapt_proposal_covariance(true)
            .build();
        let posterior = posterior(3, None);
        let first = sample(&posterior, 500, &config, None).unwrap();
        let second = sample(&posterior, 500, &config, None).unwrap();
        assert_eq!(first, second);

        let other = SamplerConfig::builder().random_seed(43).build();
        let third = sample(&posterior, 500, &other, None).unwrap();
        assert_ne!(first.chain.draws(), third.chain.draws());
    }

    #[test]
    fn test_draws_respect_bounds() {
        let posterior = posterior(2, Some(0.0));
        let config = SamplerConfig::builder().initial_scale(2.0).build();
        let output = sample(&posterior, 2_000, &config, None).unwrap();
        assert!(output.chain.draws().iter().all(|x| *x >= 0.0));
        assert!(output.chain.log_posterior().iter().all(|lp| lp.is_finite()));
    }

    #[test]
    fn test_fixed_scale_without_adaptation() {
        let config = SamplerConfig::builder().adaptive_scale_factor(0.0).build();
        let output = sample(&posterior(1, None), 200, &config, None).unwrap();
        assert_relative_eq!(output.final_scale, 1.0 / 3.0, max_relative = 1e-12);
    }

    #[test]
    fn test_cancellation_keeps_recorded_draws() {
        let mut stop = |p: SamplerProgress| {
            if p.iteration == 50 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        };
        let output = sample(
            &posterior(2, None),
            1_000,
            &SamplerConfig::default(),
            Some(&mut stop),
        )
        .unwrap();
        assert!(output.cancelled);
        assert_eq!(output.total_draws, 50);
        assert_eq!(output.acceptance_trace.len(), 50);
        assert!(output.chain.is_empty());
    }

    #[test]
    fn test_invalid_config_and_infeasible_start() {
        let config = SamplerConfig::builder().target_acceptance_ratio(1.5).build();
        assert!(matches!(
            sample(&posterior(1, None), 10, &config, None),
            Err(MCMCError::InvalidConfig(_))
        ));

        let posterior = posterior(1, None);
        let config = SamplerConfig::default();
        let sampler = AdaptiveMetropolis::new(
            posterior.problem(),
            array![f64::NAN],
            posterior.covariance(),
            &config,
        );
        assert!(matches!(sampler, Err(MCMCError::InfeasibleStart(_))));
    }

    #[test]
    fn test_running_covariance() {
        let mut running = RunningCovariance::new(2);
        for x in [array![1.0, 2.0], array![3.0, 2.0], array![5.0, 8.0]] {
            running.push(&x);
        }
        assert_eq!(running.mean, array![3.0, 4.0]);
        let covariance = &running.scatter / 2.0;
        assert_relative_eq!(covariance[[0, 0]], 4.0, epsilon = 1e-12);
        assert_relative_eq!(covariance[[0, 1]], 6.0, epsilon = 1e-12);
        assert_relative_eq!(covariance[[1, 1]], 12.0, epsilon = 1e-12);
    }
}
