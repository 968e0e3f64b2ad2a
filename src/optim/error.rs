use thiserror::Error;

use crate::optim::objective::ProviderError;
use crate::priors::PriorError;

/// Malformed estimation setup. Always raised at construction time.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Invalid bounds for parameter {param}: lower {lower} must be below upper {upper}")]
    InvalidBounds { param: String, lower: f64, upper: f64 },
    #[error("Start value {start} of parameter {param} lies outside [{lower}, {upper}]")]
    StartOutOfBounds {
        param: String,
        start: f64,
        lower: f64,
        upper: f64,
    },
    #[error("Start value of parameter {0} must be finite or 'use current'")]
    NonFiniteStart(String),
    #[error("Parameter {0} is specified more than once")]
    DuplicateParameter(String),
    #[error("Unknown parameter {0}: not offered by the objective provider")]
    UnknownParameter(String),
    #[error("Parameter {0} cannot be both estimated and concentrated out of the likelihood")]
    OutOfLikCollision(String),
    #[error("Objective provider cannot concentrate parameter {0} out of the likelihood")]
    UnknownOutOfLik(String),
    #[error("Estimation problem has no parameters")]
    NoParameters,
    #[error("Objective provider reports {names} names but {values} current values")]
    ProviderShape { names: usize, values: usize },
    #[error("Invalid prior for parameter {param}: {source}")]
    InvalidPrior {
        param: String,
        #[source]
        source: PriorError,
    },
    #[error(transparent)]
    Prior(#[from] PriorError),
}

/// Why the posterior could not be evaluated at a point.
///
/// Never surfaced as a hard failure by the optimizer, sampler or neighbourhood sweep: each
/// maps it to a penalty, a rejection or a NaN entry.
#[derive(Error, Debug)]
pub enum EvaluationFailure {
    #[error("Parameter {param} = {value} lies outside [{lower}, {upper}]")]
    OutOfBounds {
        param: String,
        value: f64,
        lower: f64,
        upper: f64,
    },
    #[error("Objective provider failed: {0}")]
    Provider(#[from] ProviderError),
    #[error("Non-finite negative log likelihood {0}")]
    NonFiniteLikelihood(f64),
    #[error("Prior of parameter {param} has zero density at {value}")]
    ZeroPriorDensity { param: String, value: f64 },
    #[error("Variance factor mode requires residual terms from the objective provider")]
    MissingResiduals,
    #[error("Expected {expected} parameter values, got {found}")]
    DimensionMismatch { expected: usize, found: usize },
}

#[derive(Error, Debug)]
pub enum OptimizeError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("Error optimizing: {0}")]
    ArgMinError(argmin::core::Error),
    #[error(
        "Mode of parameter {param} = {value} violates its bounds [{lower}, {upper}] after reparameterization"
    )]
    BoundViolation {
        param: String,
        value: f64,
        lower: f64,
        upper: f64,
    },
    #[error("Posterior cannot be evaluated at the mode: {0}")]
    ModeEvaluation(EvaluationFailure),
    #[error("Hessian at the mode has non-finite entries")]
    HessianNotFinite,
    #[error("Expected {expected} values for the mode estimate, found {found}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("Mode estimate names {found:?} do not match the problem parameters {expected:?}")]
    NameMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },
}
