use thiserror::Error;

use crate::optim::EvaluationFailure;

/// Errors raised by the sampler and the multi-chain runner.
///
/// Failures of individual proposals are not errors: they are rejected and the chain stays
/// where it is.
#[derive(Debug, Error)]
pub enum MCMCError {
    #[error("Invalid sampler configuration: {0}")]
    InvalidConfig(String),

    #[error("Posterior cannot be evaluated at the starting point: {0}")]
    InfeasibleStart(EvaluationFailure),

    #[error("Expected {expected} values, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("Chain has {rows} draws but {log_posterior} log posterior values")]
    ChainShape { rows: usize, log_posterior: usize },

    #[error("At least one chain is required")]
    NoChains,

    #[error("Chains have different parameters: {expected:?} vs {found:?}")]
    NameMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("Invalid number of parallel threads requested: {0}")]
    InvalidParallelism(i32),

    #[error("Requested more parallel threads than available: requested={requested}, available={available}")]
    TooManyThreads { requested: usize, available: usize },

    #[error("Failed to initialize thread pool: {0}")]
    ThreadPoolError(String),
}
