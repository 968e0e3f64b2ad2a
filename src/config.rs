//! Run configuration loaded from JSON.
//!
//! A configuration file names the estimated parameters with their bounds and priors and
//! optionally tunes every stage of the workflow. Stage sections fall back to their defaults
//! when omitted.
//!
//! ```json
//! {
//!   "parameters": [
//!     { "name": "beta_0", "prior": "Normal(0, 10)" },
//!     { "name": "sigma", "lower": 0.0, "prior": { "family": "invgamma", "mean": 1.0, "std": null } }
//!   ],
//!   "sampler": { "random_seed": 7 },
//!   "num_draws": 5000
//! }
//! ```

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::identifiability::NeighbourhoodConfig;
use crate::io::PersistError;
use crate::mcmc::{RunnerConfig, SamplerConfig, StatsConfig};
use crate::optim::{ConfigurationError, OptimizerConfig, ParameterSpec};
use crate::priors::{Family, Prior, PriorError};

/// A prior written either as an expression such as `"Beta(2, 5)"` or by its moments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PriorConfig {
    Expression(String),
    /// A `null` std requests the improper prior of the family.
    Moments {
        family: Family,
        mean: f64,
        std: Option<f64>,
    },
}

impl PriorConfig {
    pub fn to_prior(&self) -> Result<Prior, PriorError> {
        match self {
            PriorConfig::Expression(expression) => expression.parse(),
            PriorConfig::Moments { family, mean, std } => {
                Prior::from_mean_std(*family, *mean, std.unwrap_or(f64::INFINITY))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterConfig {
    pub name: String,
    #[serde(default)]
    pub start: Option<f64>,
    #[serde(default)]
    pub lower: Option<f64>,
    #[serde(default)]
    pub upper: Option<f64>,
    #[serde(default)]
    pub prior: Option<PriorConfig>,
    #[serde(default)]
    pub shock_std: bool,
}

impl ParameterConfig {
    pub fn to_spec(&self) -> Result<ParameterSpec, ConfigurationError> {
        let prior = self
            .prior
            .as_ref()
            .map(PriorConfig::to_prior)
            .transpose()
            .map_err(|source| ConfigurationError::InvalidPrior {
                param: self.name.clone(),
                source,
            })?;

        ParameterSpec::builder()
            .name(self.name.clone())
            .maybe_start(self.start)
            .maybe_lower(self.lower)
            .maybe_upper(self.upper)
            .maybe_prior(prior)
            .shock_std(self.shock_std)
            .build()
    }
}

fn default_num_draws() -> usize {
    10_000
}

/// Settings of a complete estimation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimationConfig {
    pub parameters: Vec<ParameterConfig>,
    /// Parameters the provider concentrates out of the likelihood.
    #[serde(default)]
    pub out_of_lik: Vec<String>,
    #[serde(default)]
    pub variance_factor: bool,
    /// Iterations per chain, burn-in included.
    #[serde(default = "default_num_draws")]
    pub num_draws: usize,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    #[serde(default)]
    pub neighbourhood: NeighbourhoodConfig,
    #[serde(default)]
    pub sampler: SamplerConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub stats: StatsConfig,
}

impl EstimationConfig {
    /// Reads a configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        let file = File::open(path.as_ref())?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    /// Parameter specifications in configuration order.
    pub fn parameter_specs(&self) -> Result<Vec<ParameterSpec>, ConfigurationError> {
        self.parameters.iter().map(ParameterConfig::to_spec).collect()
    }
}
