//! The objective-function provider seam.
//!
//! The estimation core never solves or filters the structural model itself. Everything it
//! knows about the data comes through [`ObjectiveProvider`], which evaluates the negative log
//! likelihood of a full model parameter vector.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::priors::LN_SQRT_2PI;

/// Failure reported by an objective provider.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Model does not solve at the given parameters: {0}")]
    ModelNotSolved(String),
    #[error("Numerical failure while evaluating the likelihood: {0}")]
    Numerical(String),
    #[error("Provider does not support {0}")]
    Unsupported(&'static str),
    #[error("Expected {expected} parameters, got {found}")]
    ParameterCount { expected: usize, found: usize },
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Pieces of a Gaussian likelihood needed to concentrate out a common variance factor.
///
/// For a likelihood with covariance `c·Ω`, `log_det` is ln|Ω| and `weighted_rss` is the
/// quadratic form of the residuals in Ω⁻¹.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResidualTerms {
    pub n_obs: usize,
    pub weighted_rss: f64,
    pub log_det: f64,
}

impl ResidualTerms {
    /// Maximum-likelihood variance factor `rss / n`.
    pub fn variance_factor(&self) -> f64 {
        self.weighted_rss / self.n_obs as f64
    }

    /// Negative log likelihood with the variance factor concentrated out:
    /// `0.5 (n ln 2π + ln|Ω| + n ln(rss / n) + n)`.
    pub fn concentrated_neg_log_lik(&self) -> Option<f64> {
        if self.n_obs == 0
            || self.weighted_rss.is_nan()
            || self.weighted_rss <= 0.0
            || !self.log_det.is_finite()
        {
            return None;
        }
        let n = self.n_obs as f64;
        Some(n * LN_SQRT_2PI + 0.5 * (self.log_det + n * self.variance_factor().ln() + n))
    }
}

/// Result of one likelihood evaluation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LikelihoodEvaluation {
    pub neg_log_lik: f64,
    /// Residual decomposition, required by variance-factor mode.
    pub residuals: Option<ResidualTerms>,
    /// Parameters the provider solved in closed form, keyed by name.
    pub concentrated: HashMap<String, f64>,
}

impl LikelihoodEvaluation {
    pub fn new(neg_log_lik: f64) -> Self {
        Self {
            neg_log_lik,
            ..Default::default()
        }
    }
}

/// Capability interface of the model-plus-data likelihood.
///
/// Parameter vectors passed to the provider always hold every model parameter in the order
/// of [`ObjectiveProvider::parameter_names`]. Parameters that are not estimated keep their
/// [`ObjectiveProvider::current_values`].
pub trait ObjectiveProvider: Send + Sync {
    /// Names of all model parameters.
    fn parameter_names(&self) -> Vec<String>;

    /// Current model parameterization. Non-finite entries mean "unknown".
    fn current_values(&self) -> Vec<f64>;

    /// Negative log likelihood at `params`.
    fn raw_neg_log_lik(&self, params: &[f64]) -> Result<f64, ProviderError>;

    /// Names of parameters this provider can concentrate out of the likelihood.
    fn out_of_lik_names(&self) -> Vec<String> {
        Vec::new()
    }

    /// Full evaluation including residual terms and concentrated parameters.
    fn evaluate(&self, params: &[f64]) -> Result<LikelihoodEvaluation, ProviderError> {
        self.raw_neg_log_lik(params).map(LikelihoodEvaluation::new)
    }
}

impl<T: ObjectiveProvider + ?Sized> ObjectiveProvider for &T {
    fn parameter_names(&self) -> Vec<String> {
        (**self).parameter_names()
    }

    fn current_values(&self) -> Vec<f64> {
        (**self).current_values()
    }

    fn raw_neg_log_lik(&self, params: &[f64]) -> Result<f64, ProviderError> {
        (**self).raw_neg_log_lik(params)
    }

    fn out_of_lik_names(&self) -> Vec<String> {
        (**self).out_of_lik_names()
    }

    fn evaluate(&self, params: &[f64]) -> Result<LikelihoodEvaluation, ProviderError> {
        (**self).evaluate(params)
    }
}

impl<T: ObjectiveProvider + ?Sized> ObjectiveProvider for Arc<T> {
    fn parameter_names(&self) -> Vec<String> {
        (**self).parameter_names()
    }

    fn current_values(&self) -> Vec<f64> {
        (**self).current_values()
    }

    fn raw_neg_log_lik(&self, params: &[f64]) -> Result<f64, ProviderError> {
        (**self).raw_neg_log_lik(params)
    }

    fn out_of_lik_names(&self) -> Vec<String> {
        (**self).out_of_lik_names()
    }

    fn evaluate(&self, params: &[f64]) -> Result<LikelihoodEvaluation, ProviderError> {
        (**self).evaluate(params)
    }
}
