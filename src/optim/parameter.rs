//! Estimated-parameter specifications.

use serde::{Deserialize, Serialize};

use crate::optim::error::ConfigurationError;
use crate::optim::transformation::Transformation;
use crate::priors::Prior;

/// Where the optimizer starts for one parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum StartValue {
    Value(f64),
    /// Take the objective provider's current value.
    Current,
}

/// One estimated parameter: start value, bounds and prior.
///
/// Bounds default to the whole real line. A missing prior means a flat prior that
/// contributes nothing to the posterior.
///
/// ```
/// use bayesian_estimation::prelude::*;
///
/// let alpha = ParameterSpec::builder()
///     .name("alpha")
///     .lower(0.0)
///     .upper(1.0)
///     .prior(Prior::from_mean_std(Family::Beta, 0.5, 0.1).unwrap())
///     .build()
///     .unwrap();
///
/// assert_eq!(alpha.start(), StartValue::Current);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSpec {
    name: String,
    start: StartValue,
    lower: f64,
    upper: f64,
    prior: Option<Prior>,
    shock_std: bool,
}

#[bon::bon]
impl ParameterSpec {
    /// Validates and creates a parameter specification.
    ///
    /// A missing or NaN `start` means "use the current model value". `shock_std` marks
    /// standard deviations of structural shocks, rescaled when a common variance factor is
    /// concentrated out.
    #[builder]
    pub fn new(
        #[builder(into)] name: String,
        start: Option<f64>,
        lower: Option<f64>,
        upper: Option<f64>,
        prior: Option<Prior>,
        #[builder(default)] shock_std: bool,
    ) -> Result<Self, ConfigurationError> {
        let lower = lower.unwrap_or(f64::NEG_INFINITY);
        let upper = upper.unwrap_or(f64::INFINITY);

        if lower.is_nan() || upper.is_nan() || lower >= upper {
            return Err(ConfigurationError::InvalidBounds {
                param: name,
                lower,
                upper,
            });
        }

        let start = match start {
            None => StartValue::Current,
            Some(value) if value.is_nan() => StartValue::Current,
            Some(value) if value.is_infinite() => {
                return Err(ConfigurationError::NonFiniteStart(name))
            }
            Some(value) if value < lower || value > upper => {
                return Err(ConfigurationError::StartOutOfBounds {
                    param: name,
                    start: value,
                    lower,
                    upper,
                })
            }
            Some(value) => StartValue::Value(value),
        };

        Ok(Self {
            name,
            start,
            lower,
            upper,
            prior,
            shock_std,
        })
    }
}

impl ParameterSpec {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn start(&self) -> StartValue {
        self.start
    }

    pub fn lower(&self) -> f64 {
        self.lower
    }

    pub fn upper(&self) -> f64 {
        self.upper
    }

    pub fn prior(&self) -> Option<&Prior> {
        self.prior.as_ref()
    }

    pub fn is_shock_std(&self) -> bool {
        self.shock_std
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower && value <= self.upper
    }

    pub fn transformation(&self) -> Transformation {
        Transformation::from_bounds(self.lower, self.upper)
    }

    /// Log prior density, 0 without a prior.
    pub fn ln_prior(&self, value: f64) -> f64 {
        self.prior.as_ref().map_or(0.0, |p| p.ln_density(value))
    }

    /// Resolves the starting point given the provider's current value.
    ///
    /// An unusable current value falls back to the prior mean (when inside the bounds), the
    /// midpoint of finite bounds, one unit inside a single finite bound, and finally zero.
    pub fn resolve_start(&self, current: Option<f64>) -> Result<f64, ConfigurationError> {
        let value = match self.start {
            StartValue::Value(value) => return Ok(value),
            StartValue::Current => current.filter(|v| v.is_finite()),
        };

        match value {
            Some(value) if self.contains(value) => Ok(value),
            Some(value) => Err(ConfigurationError::StartOutOfBounds {
                param: self.name.clone(),
                start: value,
                lower: self.lower,
                upper: self.upper,
            }),
            None => {
                let fallback = self.fallback_start();
                log::warn!(
                    "No current value for parameter {}, starting from {fallback}",
                    self.name
                );
                Ok(fallback)
            }
        }
    }

    fn fallback_start(&self) -> f64 {
        if let Some(mean) = self.prior().and_then(|p| p.mean()) {
            if mean.is_finite() && self.contains(mean) {
                return mean;
            }
        }
        match (self.lower.is_finite(), self.upper.is_finite()) {
            (true, true) => 0.5 * (self.lower + self.upper),
            (true, false) => self.lower + 1.0,
            (false, true) => self.upper - 1.0,
            (false, false) => 0.0,
        }
    }
}
