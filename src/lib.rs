//! Bayesian estimation of structural model parameters
//!
//! This library estimates model parameters from an opaque likelihood, including:
//! - Priors from named families, specified by moments or shape parameters
//! - Posterior mode search with Hessian-based covariance
//! - Neighbourhood (mode-check) sweeps around the mode
//! - Adaptive random-walk Metropolis sampling, single or multi-chain
//! - Chain statistics, marginal data densities and convergence diagnostics
//! - JSON persistence of estimates and chains

#![warn(unused_imports)]

/// Commonly used types and functionality re-exported for convenience
pub mod prelude {
    pub use crate::config::*;
    pub use crate::identifiability::{
        neighbourhood, MultiplierGrid, NeighbourhoodConfig, NeighbourhoodError, NeighbourhoodGrid,
    };
    pub use crate::io::*;
    pub use crate::mcmc::{
        run_chains, sample, stats, Chain, ChainStatistics, Diagnostics, MCMCError, RequestedStat,
        RunnerConfig, SamplerConfig, SamplerOutput, StatError, StatValue, StatsConfig,
    };
    pub use crate::optim::objective::{LikelihoodEvaluation, ProviderError, ResidualTerms};
    pub use crate::optim::{
        ConfigurationError, EstimationProblem, EvaluationFailure, ModeEstimate, ModeSolver,
        ObjectiveProvider, OptimizeError, OptimizerConfig, ParameterSpec, PosteriorEstimate,
        PosteriorModeOptimizer, StartValue,
    };
    pub use crate::priors::*;
    pub use crate::providers::*;
}

/// Prior distributions and moment matching
pub mod priors;

/// Posterior mode estimation
pub mod optim {
    pub use crate::optim::error::*;
    pub use crate::optim::mode::*;
    pub use crate::optim::objective::ObjectiveProvider;
    pub use crate::optim::observer::{OptimizationCancelled, OptimizerProgress, ProgressCallback};
    pub use crate::optim::parameter::*;
    pub use crate::optim::problem::*;
    pub use crate::optim::report::*;
    pub use crate::optim::transformation::*;
    use argmin_math as _;

    /// Error types for configuration, evaluation and optimization failures
    pub mod error;
    /// Numerical curvature
    /// Optimizer driver and settings
    pub mod mode;
    /// The likelihood provider interface
    pub mod objective;
    /// Iteration observer
    pub mod observer;
    /// Estimated-parameter specifications
    pub mod parameter;
    /// Parameters, priors and provider bound together
    pub mod problem;
    /// Mode estimates and their serializable form
    pub mod report;
    /// argmin problem wrapper
    pub mod system;
    /// Bound-respecting reparameterizations
    pub mod transformation;
}

/// Local identifiability checks around the mode
pub mod identifiability {
    pub use crate::identifiability::error::*;
    pub use crate::identifiability::grid::*;
    pub use crate::identifiability::neighbourhood::*;
    pub use crate::identifiability::results::*;

    pub mod error;
    pub mod grid;
    pub mod neighbourhood;
    pub mod results;
}

/// Markov chain Monte Carlo sampling and chain analysis
pub mod mcmc {
    pub use crate::mcmc::diagnostics::{Diagnostics, ParameterDiagnostics, RHAT_THRESHOLD};
    pub use crate::mcmc::error::*;
    pub use crate::mcmc::output::*;
    pub use crate::mcmc::runner::*;
    pub use crate::mcmc::sampler::{
        sample, SamplerCallback, SamplerConfig, SamplerOutput, SamplerProgress,
    };
    pub use crate::mcmc::stats::*;

    /// Convergence diagnostics across chains
    pub mod diagnostics;
    pub mod error;
    /// Stored chains
    pub mod output;
    /// Independent multi-chain runs
    pub mod runner;
    /// Adaptive random-walk Metropolis
    pub mod sampler;
    /// Posterior statistics and marginal data densities
    pub mod stats;
}

/// Run configuration files
pub mod config;

/// IO functionality
pub mod io;

/// Reference objective providers
pub mod providers;

pub(crate) mod linalg;
pub(crate) mod progress;
