//! Independent chains run in parallel.
//!
//! Every chain owns its sampler state and random stream (`seed + chain index`), so the
//! result does not depend on the number of threads or on scheduling.

use indicatif::MultiProgress;
use ndarray::Array1;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::mcmc::error::MCMCError;
use crate::mcmc::sampler::{AdaptiveMetropolis, SamplerConfig, SamplerOutput};
use crate::optim::{EstimationProblem, ObjectiveProvider, PosteriorEstimate};
use crate::progress::progress_bar;

/// Attempts at drawing a feasible prior-dispersed start before falling back to the mode.
const MAX_START_ATTEMPTS: usize = 100;

/// Offset separating the start-point stream from the sampling stream of a chain.
const START_STREAM: u64 = 0x5EED_57A7;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, bon::Builder)]
#[serde(default)]
pub struct RunnerConfig {
    #[builder(default = 4)]
    pub num_chains: usize,
    /// Worker threads, all available threads when unset (or -1).
    pub num_threads: Option<i32>,
    /// Start every chain from a draw of the priors instead of the mode.
    #[builder(default)]
    pub disperse_starts: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Runs `config.num_chains` chains of `num_draws` iterations each.
///
/// # Arguments
///
/// * `posterior` - Mode estimate providing the start point and proposal covariance
/// * `num_draws` - Iterations per chain, burn-in included
/// * `sampler` - Sampler settings shared by all chains; chain `k` uses seed `random_seed + k`
/// * `config` - Number of chains, threads and start dispersion
///
/// # Returns
///
/// One `SamplerOutput` per chain, in chain order.
pub fn run_chains<P: ObjectiveProvider>(
    posterior: &PosteriorEstimate<P>,
    num_draws: usize,
    sampler: &SamplerConfig,
    config: &RunnerConfig,
) -> Result<Vec<SamplerOutput>, MCMCError> {
    if config.num_chains == 0 {
        return Err(MCMCError::NoChains);
    }
    sampler.validate()?;
    let num_threads = determine_num_parallel(config.num_threads)?;
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build()
        .map_err(|e| MCMCError::ThreadPoolError(e.to_string()))?;

    log::info!(
        "Running {} chains of {num_draws} draws on {num_threads} threads",
        config.num_chains
    );

    let multi_progress = MultiProgress::new();
    let bars: Vec<_> = (0..config.num_chains)
        .map(|chain_id| {
            let bar = progress_bar(
                &format!("Chain {chain_id:02}"),
                num_draws as u64,
                sampler.show_progress,
            );
            if sampler.show_progress {
                multi_progress.add(bar)
            } else {
                bar
            }
        })
        .collect();

    pool.install(|| {
        bars.into_par_iter()
            .enumerate()
            .map(|(chain_id, bar)| {
                let chain_config = SamplerConfig {
                    random_seed: sampler.random_seed.wrapping_add(chain_id as u64),
                    ..sampler.clone()
                };
                let start = if config.disperse_starts {
                    dispersed_start(posterior, chain_config.random_seed)
                } else {
                    posterior.mode().clone()
                };
                let mut chain = AdaptiveMetropolis::new(
                    posterior.problem(),
                    start,
                    posterior.covariance(),
                    &chain_config,
                )?;
                let output = chain.run(num_draws, &bar, None);
                log::debug!(
                    "Chain {chain_id} finished with acceptance ratio {:.3}",
                    output.acceptance_ratio
                );
                Ok(output)
            })
            .collect()
    })
}

/// Start point drawn independently from each proper prior, kept only where the posterior
/// can be evaluated. Parameters without a proper prior stay at the mode.
fn dispersed_start<P: ObjectiveProvider>(posterior: &PosteriorEstimate<P>, seed: u64) -> Array1<f64> {
    let problem: &EstimationProblem<P> = posterior.problem();
    let mut rng = StdRng::seed_from_u64(seed ^ START_STREAM);

    for _ in 0..MAX_START_ATTEMPTS {
        let candidate: Array1<f64> = problem
            .specs()
            .iter()
            .zip(posterior.mode().iter())
            .map(|(spec, mode)| {
                spec.prior()
                    .and_then(|prior| prior.sample(&mut rng))
                    .filter(|x| spec.contains(*x))
                    .unwrap_or(*mode)
            })
            .collect();
        if problem.log_posterior(&candidate.to_vec()).is_some() {
            return candidate;
        }
    }
    log::warn!("No feasible prior draw found, starting chain at the mode");
    posterior.mode().clone()
}

fn determine_num_parallel(num_parallel: Option<i32>) -> Result<usize, MCMCError> {
    let available_threads = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);

    match num_parallel.unwrap_or(-1) {
        -1 => Ok(available_threads),
        n if n <= 0 => Err(MCMCError::InvalidParallelism(n)),
        n => {
            let n = n as usize;
            if n > available_threads {
                Err(MCMCError::TooManyThreads {
                    requested: n,
                    available: available_threads,
                })
            } else {
                Ok(n)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_count_validation() {
        assert!(determine_num_parallel(None).unwrap() >= 1);
        assert_eq!(determine_num_parallel(Some(1)).unwrap(), 1);
        assert!(matches!(
            determine_num_parallel(Some(0)),
            Err(MCMCError::InvalidParallelism(0))
        ));
        assert!(matches!(
            determine_num_parallel(Some(i32::MAX)),
            Err(MCMCError::TooManyThreads { .. })
        ));
    }
}
