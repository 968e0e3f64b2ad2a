//! Prior distributions for Bayesian parameter estimation.
//!
//! A [`Prior`] wraps one of the `statrs` continuous distributions (or the improper flat
//! prior) and exposes the pieces the estimation core needs: a log density that is defined on
//! the whole real line, analytic first and second derivatives of that log density, moment
//! accessors and sampling.
//!
//! Priors are usually configured from their first two moments with
//! [`Prior::from_mean_std`]. An infinite standard deviation is the sentinel for an improper
//! flat prior on the family's natural support, available for the normal, gamma and inverse
//! gamma families.
//!
//! Priors can also be parsed from strings that use the native parameters of each family:
//!
//! - `Normal(mean, std)` or `N(mean, std)`
//! - `Beta(a, b)` or `B(a, b)`
//! - `Gamma(shape, rate)` or `G(shape, rate)`
//! - `InvGamma(shape, scale)`, `InverseGamma(shape, scale)` or `IG(shape, scale)`
//! - `Uniform(min, max)` or `U(min, max)`
//! - `LogNormal(location, scale)`, `LogN(location, scale)` or `LN(location, scale)`
//! - `Improper()`, `Flat()` or `Improper(lower, upper)`

use std::fmt;
use std::str::FromStr;

use rand::distributions::Distribution as _;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use statrs::{
    distribution::{Beta, Continuous, Gamma, InverseGamma, LogNormal, Normal, Uniform},
    statistics::{Distribution as _, Max, Min},
};
use thiserror::Error;

/// Errors raised while constructing a prior.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PriorError {
    #[error("Infeasible moments for {family} prior (mean {mean}, std {std}): {reason}")]
    InvalidMoments {
        family: Family,
        mean: f64,
        std: f64,
        reason: &'static str,
    },
    #[error("Invalid parameters for {family} prior: {message}")]
    InvalidParameters { family: Family, message: String },
    #[error("Failed to parse prior '{input}': {message}")]
    Parse { input: String, message: String },
}

/// Distribution family tag used by moment-based construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    Normal,
    Beta,
    Gamma,
    #[serde(alias = "invgamma", alias = "inverse_gamma")]
    InverseGamma,
    Uniform,
    #[serde(alias = "log_normal")]
    LogNormal,
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Family::Normal => "normal",
            Family::Beta => "beta",
            Family::Gamma => "gamma",
            Family::InverseGamma => "inverse gamma",
            Family::Uniform => "uniform",
            Family::LogNormal => "log-normal",
        };
        write!(f, "{name}")
    }
}

/// Univariate prior distribution of a single estimated parameter.
///
/// The log density is `-inf` outside the support (and for NaN input), never NaN and never
/// `+inf`. The open families (beta, gamma, inverse gamma, log-normal) exclude the end points
/// of their support.
#[derive(Debug, Clone, PartialEq)]
pub enum Prior {
    Normal(Normal),
    Beta(Beta),
    Gamma(Gamma),
    /// Inverse gamma with shape `α` and scale `β`, density ∝ x^(−α−1) e^(−β/x).
    InverseGamma(InverseGamma),
    Uniform(Uniform),
    LogNormal(LogNormal),
    /// Flat prior with log density 0 on `[lower, upper]`.
    Improper { lower: f64, upper: f64 },
}

#[derive(Debug)]
struct DistSpec {
    name: String,
    params: Vec<f64>,
}

impl Prior {
    pub const AVAILABLE_PRIORS: [&str; 7] = [
        "normal",
        "beta",
        "gamma",
        "invgamma",
        "uniform",
        "lognormal",
        "improper",
    ];

    /// Builds a prior of the given family whose mean and standard deviation match the
    /// requested moments.
    ///
    /// `std = f64::INFINITY` requests an improper flat prior: over the real line for the
    /// normal family and over `(0, ∞)` for the gamma and inverse gamma families.
    pub fn from_mean_std(family: Family, mean: f64, std: f64) -> Result<Self, PriorError> {
        let invalid = |reason: &'static str| PriorError::InvalidMoments {
            family,
            mean,
            std,
            reason,
        };

        if !mean.is_finite() {
            return Err(invalid("mean must be finite"));
        }
        if std.is_nan() || std <= 0.0 {
            return Err(invalid("std must be positive"));
        }

        if std.is_infinite() {
            return match family {
                Family::Normal => Ok(Prior::Improper {
                    lower: f64::NEG_INFINITY,
                    upper: f64::INFINITY,
                }),
                Family::Gamma | Family::InverseGamma if mean > 0.0 => Ok(Prior::Improper {
                    lower: 0.0,
                    upper: f64::INFINITY,
                }),
                Family::Gamma | Family::InverseGamma => Err(invalid("mean must be positive")),
                _ => Err(invalid(
                    "an infinite std is only supported by the normal, gamma and inverse gamma families",
                )),
            };
        }

        let var = std * std;
        let params_err = |e: &dyn fmt::Display| PriorError::InvalidParameters {
            family,
            message: e.to_string(),
        };

        match family {
            Family::Normal => Normal::new(mean, std)
                .map(Prior::Normal)
                .map_err(|e| params_err(&e)),
            Family::Beta => {
                if mean <= 0.0 || mean >= 1.0 {
                    return Err(invalid("mean must lie in (0, 1)"));
                }
                if var >= mean * (1.0 - mean) {
                    return Err(invalid("variance must be below mean * (1 - mean)"));
                }
                let k = mean * (1.0 - mean) / var - 1.0;
                Beta::new(mean * k, (1.0 - mean) * k)
                    .map(Prior::Beta)
                    .map_err(|e| params_err(&e))
            }
            Family::Gamma => {
                if mean <= 0.0 {
                    return Err(invalid("mean must be positive"));
                }
                Gamma::new(mean * mean / var, mean / var)
                    .map(Prior::Gamma)
                    .map_err(|e| params_err(&e))
            }
            Family::InverseGamma => {
                if mean <= 0.0 {
                    return Err(invalid("mean must be positive"));
                }
                let shape = 2.0 + mean * mean / var;
                InverseGamma::new(shape, mean * (shape - 1.0))
                    .map(Prior::InverseGamma)
                    .map_err(|e| params_err(&e))
            }
            Family::Uniform => {
                let half_width = 3f64.sqrt() * std;
                Uniform::new(mean - half_width, mean + half_width)
                    .map(Prior::Uniform)
                    .map_err(|e| params_err(&e))
            }
            Family::LogNormal => {
                if mean <= 0.0 {
                    return Err(invalid("mean must be positive"));
                }
                let sigma2 = (1.0 + var / (mean * mean)).ln();
                LogNormal::new(mean.ln() - 0.5 * sigma2, sigma2.sqrt())
                    .map(Prior::LogNormal)
                    .map_err(|e| params_err(&e))
            }
        }
    }

    /// Flat prior over `[lower, upper]`.
    pub fn improper(lower: f64, upper: f64) -> Result<Self, PriorError> {
        if lower.is_nan() || upper.is_nan() || lower >= upper {
            return Err(PriorError::Parse {
                input: format!("Improper({lower}, {upper})"),
                message: "lower must be below upper".to_string(),
            });
        }
        Ok(Prior::Improper { lower, upper })
    }

    /// Closed support interval `(lower, upper)`; open families exclude both end points.
    pub fn support(&self) -> (f64, f64) {
        match self {
            Prior::Normal(_) => (f64::NEG_INFINITY, f64::INFINITY),
            Prior::Beta(_) => (0.0, 1.0),
            Prior::Gamma(_) | Prior::InverseGamma(_) | Prior::LogNormal(_) => (0.0, f64::INFINITY),
            Prior::Uniform(d) => (d.min(), d.max()),
            Prior::Improper { lower, upper } => (*lower, *upper),
        }
    }

    /// Whether `x` lies in the support of the prior.
    pub fn contains(&self, x: f64) -> bool {
        if x.is_nan() {
            return false;
        }
        let (lower, upper) = self.support();
        match self {
            Prior::Normal(_) => x.is_finite(),
            Prior::Beta(_) | Prior::Gamma(_) | Prior::InverseGamma(_) | Prior::LogNormal(_) => {
                x > lower && x < upper
            }
            Prior::Uniform(_) | Prior::Improper { .. } => x >= lower && x <= upper,
        }
    }

    /// Log density at `x`, `-inf` outside the support.
    pub fn ln_density(&self, x: f64) -> f64 {
        if !self.contains(x) {
            return f64::NEG_INFINITY;
        }
        let lp = match self {
            Prior::Normal(d) => d.ln_pdf(x),
            Prior::Beta(d) => d.ln_pdf(x),
            Prior::Gamma(d) => d.ln_pdf(x),
            Prior::InverseGamma(d) => d.ln_pdf(x),
            Prior::Uniform(d) => d.ln_pdf(x),
            Prior::LogNormal(d) => d.ln_pdf(x),
            Prior::Improper { .. } => 0.0,
        };
        if lp.is_nan() || lp == f64::INFINITY {
            f64::NEG_INFINITY
        } else {
            lp
        }
    }

    pub fn density(&self, x: f64) -> f64 {
        self.ln_density(x).exp()
    }

    /// First derivative of the log density. NaN outside the support.
    pub fn ln_density_grad(&self, x: f64) -> f64 {
        if !self.contains(x) {
            return f64::NAN;
        }
        match self {
            Prior::Normal(d) => {
                let (mu, sigma) = normal_params(d);
                -(x - mu) / (sigma * sigma)
            }
            Prior::Beta(d) => (d.shape_a() - 1.0) / x - (d.shape_b() - 1.0) / (1.0 - x),
            Prior::Gamma(d) => (d.shape() - 1.0) / x - d.rate(),
            Prior::InverseGamma(d) => -(d.shape() + 1.0) / x + d.rate() / (x * x),
            Prior::LogNormal(d) => {
                let (mu, sigma) = lognormal_params(d);
                -(1.0 + (x.ln() - mu) / (sigma * sigma)) / x
            }
            Prior::Uniform(_) | Prior::Improper { .. } => 0.0,
        }
    }

    /// Second derivative of the log density. NaN outside the support.
    pub fn ln_density_hess(&self, x: f64) -> f64 {
        if !self.contains(x) {
            return f64::NAN;
        }
        match self {
            Prior::Normal(d) => {
                let (_, sigma) = normal_params(d);
                -1.0 / (sigma * sigma)
            }
            Prior::Beta(d) => {
                -(d.shape_a() - 1.0) / (x * x) - (d.shape_b() - 1.0) / ((1.0 - x) * (1.0 - x))
            }
            Prior::Gamma(d) => -(d.shape() - 1.0) / (x * x),
            Prior::InverseGamma(d) => (d.shape() + 1.0) / (x * x) - 2.0 * d.rate() / (x * x * x),
            Prior::LogNormal(d) => {
                let (mu, sigma) = lognormal_params(d);
                (1.0 + (x.ln() - mu - 1.0) / (sigma * sigma)) / (x * x)
            }
            Prior::Uniform(_) | Prior::Improper { .. } => 0.0,
        }
    }

    /// Mean of the prior, `None` when improper or undefined.
    pub fn mean(&self) -> Option<f64> {
        match self {
            Prior::Normal(d) => d.mean(),
            Prior::Beta(d) => d.mean(),
            Prior::Gamma(d) => d.mean(),
            Prior::InverseGamma(d) => d.mean(),
            Prior::Uniform(d) => d.mean(),
            Prior::LogNormal(d) => d.mean(),
            Prior::Improper { .. } => None,
        }
    }

    /// Standard deviation of the prior, `None` when improper or undefined.
    pub fn std(&self) -> Option<f64> {
        match self {
            Prior::Normal(d) => d.std_dev(),
            Prior::Beta(d) => d.std_dev(),
            Prior::Gamma(d) => d.std_dev(),
            Prior::InverseGamma(d) => d.std_dev(),
            Prior::Uniform(d) => d.std_dev(),
            Prior::LogNormal(d) => d.std_dev(),
            Prior::Improper { .. } => None,
        }
    }

    pub fn is_improper(&self) -> bool {
        matches!(self, Prior::Improper { .. })
    }

    /// Draws a value from the prior. Improper priors cannot be sampled.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<f64> {
        match self {
            Prior::Normal(d) => Some(d.sample(rng)),
            Prior::Beta(d) => Some(d.sample(rng)),
            Prior::Gamma(d) => Some(d.sample(rng)),
            Prior::InverseGamma(d) => Some(d.sample(rng)),
            Prior::Uniform(d) => Some(d.sample(rng)),
            Prior::LogNormal(d) => Some(d.sample(rng)),
            Prior::Improper { .. } => None,
        }
    }

    fn parse_distribution(s: &str) -> Result<DistSpec, PriorError> {
        let s = s.trim();
        let parse_err = |message: String| PriorError::Parse {
            input: s.to_string(),
            message,
        };

        let paren_regex = Regex::new(r"^([a-zA-Z]+)\s*\(\s*([^)]*)\s*\)$")
            .map_err(|e| parse_err(format!("Regex compilation error: {e}")))?;

        let captures = paren_regex.captures(s).ok_or_else(|| {
            parse_err("Invalid format. Use 'DistributionName(param1, param2, ...)'".to_string())
        })?;

        let name = captures[1].to_lowercase();
        let params_str = captures[2].trim();
        let params = if params_str.is_empty() {
            Vec::new()
        } else {
            params_str
                .split(',')
                .map(|p| {
                    p.trim()
                        .parse::<f64>()
                        .map_err(|_| parse_err(format!("Invalid parameter '{}'", p.trim())))
                })
                .collect::<Result<Vec<_>, _>>()?
        };

        Ok(DistSpec { name, params })
    }

    fn validate_param_count(spec: &DistSpec, expected: usize, input: &str) -> Result<(), PriorError> {
        if spec.params.len() != expected {
            return Err(PriorError::Parse {
                input: input.to_string(),
                message: format!(
                    "'{}' expects {expected} parameter(s), got {}",
                    spec.name,
                    spec.params.len()
                ),
            });
        }
        Ok(())
    }
}

fn normal_params(d: &Normal) -> (f64, f64) {
    (
        d.mean().unwrap_or(f64::NAN),
        d.std_dev().unwrap_or(f64::NAN),
    )
}

/// Location and scale of the underlying normal, recovered from the log-normal moments.
fn lognormal_params(d: &LogNormal) -> (f64, f64) {
    let mean = d.mean().unwrap_or(f64::NAN);
    let var = d.variance().unwrap_or(f64::NAN);
    let sigma2 = (1.0 + var / (mean * mean)).ln();
    (mean.ln() - 0.5 * sigma2, sigma2.sqrt())
}

impl FromStr for Prior {
    type Err = PriorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let spec = Self::parse_distribution(s)?;
        let params_err = |family: Family, e: &dyn fmt::Display| PriorError::InvalidParameters {
            family,
            message: e.to_string(),
        };

        match spec.name.as_str() {
            "normal" | "n" => {
                Self::validate_param_count(&spec, 2, s)?;
                Normal::new(spec.params[0], spec.params[1])
                    .map(Prior::Normal)
                    .map_err(|e| params_err(Family::Normal, &e))
            }
            "beta" | "b" => {
                Self::validate_param_count(&spec, 2, s)?;
                Beta::new(spec.params[0], spec.params[1])
                    .map(Prior::Beta)
                    .map_err(|e| params_err(Family::Beta, &e))
            }
            "gamma" | "g" => {
                Self::validate_param_count(&spec, 2, s)?;
                Gamma::new(spec.params[0], spec.params[1])
                    .map(Prior::Gamma)
                    .map_err(|e| params_err(Family::Gamma, &e))
            }
            "invgamma" | "inversegamma" | "ig" => {
                Self::validate_param_count(&spec, 2, s)?;
                InverseGamma::new(spec.params[0], spec.params[1])
                    .map(Prior::InverseGamma)
                    .map_err(|e| params_err(Family::InverseGamma, &e))
            }
            "uniform" | "u" => {
                Self::validate_param_count(&spec, 2, s)?;
                Uniform::new(spec.params[0], spec.params[1])
                    .map(Prior::Uniform)
                    .map_err(|e| params_err(Family::Uniform, &e))
            }
            "lognormal" | "logn" | "ln" => {
                Self::validate_param_count(&spec, 2, s)?;
                LogNormal::new(spec.params[0], spec.params[1])
                    .map(Prior::LogNormal)
                    .map_err(|e| params_err(Family::LogNormal, &e))
            }
            "improper" | "flat" => match spec.params.len() {
                0 => Ok(Prior::Improper {
                    lower: f64::NEG_INFINITY,
                    upper: f64::INFINITY,
                }),
                2 => Prior::improper(spec.params[0], spec.params[1]),
                n => Err(PriorError::Parse {
                    input: s.to_string(),
                    message: format!("'{}' expects 0 or 2 parameters, got {n}", spec.name),
                }),
            },
            other => Err(PriorError::Parse {
                input: s.to_string(),
                message: format!(
                    "Unknown distribution '{other}'. Available: {}",
                    Self::AVAILABLE_PRIORS.join(", ")
                ),
            }),
        }
    }
}

impl fmt::Display for Prior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Prior::Normal(d) => {
                let (mu, sigma) = normal_params(d);
                write!(f, "Normal({mu}, {sigma})")
            }
            Prior::Beta(d) => write!(f, "Beta({}, {})", d.shape_a(), d.shape_b()),
            Prior::Gamma(d) => write!(f, "Gamma({}, {})", d.shape(), d.rate()),
            Prior::InverseGamma(d) => write!(f, "InvGamma({}, {})", d.shape(), d.rate()),
            Prior::Uniform(d) => write!(f, "Uniform({}, {})", d.min(), d.max()),
            Prior::LogNormal(d) => {
                let (mu, sigma) = lognormal_params(d);
                write!(f, "LogNormal({mu}, {sigma})")
            }
            Prior::Improper { lower, upper } => write!(f, "Improper({lower}, {upper})"),
        }
    }
}

/// Normalising constant of the standard normal, used by Gaussian log densities.
pub(crate) const LN_SQRT_2PI: f64 = 0.918_938_533_204_672_8;
