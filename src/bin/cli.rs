//! Command-line interface for Bayesian estimation
//!
//! # Usage
//!
//! ```bash
//! # Mode search, neighbourhood check and sampling of a Gaussian regression
//! bayesest estimate --config config.json --data data.json --out-dir results --chains 4
//!
//! # Statistics of a saved chain
//! bayesest summarize --chain results/chain_0.json --stats mean std "hpdi(0.9)"
//! ```

use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use bayesian_estimation::prelude::*;
use clap::{Parser, Subcommand};
use colored::Colorize;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Estimate a Gaussian regression: mode, neighbourhood sweep and MCMC
    Estimate {
        /// Path to the JSON run configuration
        #[arg(short, long)]
        config: PathBuf,

        /// Path to the JSON regression data
        #[arg(short, long)]
        data: PathBuf,

        /// Output directory for estimates and chains
        #[arg(short, long, default_value = ".")]
        out_dir: PathBuf,

        /// Iterations per chain, overriding the configuration
        #[arg(long)]
        draws: Option<usize>,

        /// Number of chains, overriding the configuration
        #[arg(long)]
        chains: Option<usize>,

        /// Worker threads, all available when unset
        #[arg(long)]
        threads: Option<i32>,

        /// Random seed, overriding the configuration
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Compute statistics of a saved chain
    Summarize {
        /// Path to a chain written by `estimate`
        #[arg(long)]
        chain: PathBuf,

        /// Mode estimate enabling the Laplace marginal data density
        #[arg(long)]
        estimate: Option<PathBuf>,

        /// Statistics to compute, e.g. `mean`, `hpdi(0.9)`, `percentiles(5, 95)`
        #[arg(long, num_args = 1..)]
        stats: Vec<RequestedStat>,
    },
}

fn heading(title: &str) {
    println!("\n{}", title.bold().green());
}

fn estimate(
    config: &Path,
    data: &Path,
    out_dir: &Path,
    draws: Option<usize>,
    chains: Option<usize>,
    threads: Option<i32>,
    seed: Option<u64>,
) -> Result<(), Box<dyn Error>> {
    let mut config = EstimationConfig::from_file(config)?;
    if let Some(draws) = draws {
        config.num_draws = draws;
    }
    if let Some(chains) = chains {
        config.runner.num_chains = chains;
    }
    if threads.is_some() {
        config.runner.num_threads = threads;
    }
    if let Some(seed) = seed {
        config.sampler.random_seed = seed;
    }

    let provider = GaussianRegression::from_data(&RegressionData::from_file(data)?)?;
    log::info!(
        "Loaded {} observations of {} regressors",
        provider.num_observations(),
        provider.num_regressors()
    );

    let problem = EstimationProblem::builder()
        .provider(provider)
        .specs(config.parameter_specs()?)
        .out_of_lik(config.out_of_lik.clone())
        .variance_factor(config.variance_factor)
        .build()?;

    std::fs::create_dir_all(out_dir)?;

    let posterior = PosteriorModeOptimizer::new(config.optimizer.clone()).maximize(problem)?;
    heading("Posterior mode");
    println!("{}", posterior.estimate());
    if let Err(e) = save_estimate(out_dir.join("estimate.json"), posterior.estimate()) {
        log::error!("Failed to save the mode estimate: {e}");
    }

    let grid = neighbourhood(&posterior, &config.neighbourhood, None);
    heading("Neighbourhood of the mode");
    println!("{grid}");
    if let Err(e) = save_neighbourhood(out_dir.join("neighbourhood.json"), &grid) {
        log::error!("Failed to save the neighbourhood sweep: {e}");
    }

    let outputs = run_chains(&posterior, config.num_draws, &config.sampler, &config.runner)?;
    for (k, output) in outputs.iter().enumerate() {
        heading(&format!(
            "Chain {k} (acceptance ratio {:.3})",
            output.acceptance_ratio
        ));
        println!(
            "{}",
            stats(Some(posterior.estimate()), &output.chain, &config.stats.requested)
        );
        if let Err(e) = save_chain(out_dir.join(format!("chain_{k}.json")), &output.chain) {
            log::error!("Failed to save chain {k}: {e}");
        }
    }

    if outputs.len() > 1 {
        let chains: Vec<Chain> = outputs.into_iter().map(|o| o.chain).collect();
        match Diagnostics::from_chains(&chains) {
            Ok(diagnostics) => {
                heading("Convergence diagnostics");
                println!("{diagnostics}");
            }
            Err(e) => log::warn!("Diagnostics unavailable: {e}"),
        }
    }

    Ok(())
}

fn summarize(
    chain: &Path,
    estimate: Option<&Path>,
    requested: &[RequestedStat],
) -> Result<(), Box<dyn Error>> {
    let chain = load_chain(chain)?;
    let estimate = estimate.map(load_estimate).transpose()?;
    let requested = if requested.is_empty() {
        RequestedStat::defaults()
    } else {
        requested.to_vec()
    };

    heading(&format!("Chain statistics ({} draws)", chain.len()));
    let statistics = stats(estimate.as_ref(), &chain, &requested);
    println!("{statistics}");
    for (stat, error) in statistics.failures() {
        log::warn!("{stat} unavailable: {error}");
    }
    Ok(())
}

pub fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::Estimate {
            config,
            data,
            out_dir,
            draws,
            chains,
            threads,
            seed,
        } => estimate(config, data, out_dir, *draws, *chains, *threads, *seed),
        Commands::Summarize {
            chain,
            estimate,
            stats,
        } => summarize(chain, estimate.as_deref(), stats),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {e}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}
