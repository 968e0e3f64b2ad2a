//! Posterior statistics of a single chain.
//!
//! Every requested statistic is computed on its own: one that cannot be computed (too few
//! draws, a singular covariance) is reported as an error next to the others.

use std::fmt;
use std::str::FromStr;

use itertools::Itertools;
use ndarray::{Array1, Array2, Axis};
use regex::Regex;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF};
use tabled::{builder::Builder, settings::Style};
use thiserror::Error;
use variantly::Variantly;

use crate::linalg::{cholesky, inv_quad_form, ln_det_pd};
use crate::mcmc::diagnostics::{
    effective_sample_size, hpd_interval, mean, quantile, sorted, split_rhat, variance,
};
use crate::mcmc::output::Chain;
use crate::optim::ModeEstimate;

/// Default coverage of `hpdi` without an argument.
pub const DEFAULT_HPD_PROB: f64 = 0.9;

/// Truncation probabilities of the modified harmonic mean estimator.
const HARMONIC_TRUNCATIONS: [f64; 9] = [0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9];

const LN_2PI: f64 = 1.837_877_066_409_345_3;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StatError {
    #[error("{stat} needs at least {needed} draws, the chain has {available}")]
    Insufficient {
        stat: String,
        needed: usize,
        available: usize,
    },
    #[error("{0}")]
    Numerical(String),
    #[error("{0} requires a mode estimate")]
    MissingEstimate(String),
    #[error("Invalid statistic '{input}': {message}")]
    Parse { input: String, message: String },
}

/// A statistic to compute from a chain.
///
/// Parsed from names such as `mean`, `hpdi(0.8)` or `percentiles(5, 50, 95)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RequestedStat {
    Mean,
    Std,
    Median,
    /// Highest posterior density interval with the given coverage
    Hpdi(f64),
    /// Percentiles in percent
    Percentiles(Vec<f64>),
    /// Laplace approximation of the log marginal data density at the mode
    MddLaplace,
    /// Modified harmonic mean estimate of the log marginal data density
    MddHarmonic,
    Ess,
    Rhat,
}

impl RequestedStat {
    /// Default selection used by the command line tool.
    pub fn defaults() -> Vec<RequestedStat> {
        vec![
            RequestedStat::Mean,
            RequestedStat::Std,
            RequestedStat::Hpdi(DEFAULT_HPD_PROB),
            RequestedStat::MddLaplace,
            RequestedStat::MddHarmonic,
        ]
    }

    /// Minimum number of draws for a chain of dimension `dim`.
    pub fn min_draws(&self, dim: usize) -> usize {
        match self {
            RequestedStat::Mean | RequestedStat::Median | RequestedStat::Percentiles(_) => 1,
            RequestedStat::Std => 2,
            RequestedStat::Hpdi(_) => 10,
            RequestedStat::MddLaplace => 0,
            RequestedStat::MddHarmonic => 2 * dim + 3,
            RequestedStat::Ess | RequestedStat::Rhat => 8,
        }
    }
}

impl fmt::Display for RequestedStat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestedStat::Mean => write!(f, "mean"),
            RequestedStat::Std => write!(f, "std"),
            RequestedStat::Median => write!(f, "median"),
            RequestedStat::Hpdi(p) => write!(f, "hpdi({p})"),
            RequestedStat::Percentiles(ps) => write!(f, "percentiles({})", ps.iter().join(", ")),
            RequestedStat::MddLaplace => write!(f, "mdd_laplace"),
            RequestedStat::MddHarmonic => write!(f, "mdd_harmonic"),
            RequestedStat::Ess => write!(f, "ess"),
            RequestedStat::Rhat => write!(f, "rhat"),
        }
    }
}

impl FromStr for RequestedStat {
    type Err = StatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let input = s.trim().to_lowercase();
        let error = |message: &str| StatError::Parse {
            input: s.to_string(),
            message: message.to_string(),
        };
        let pattern = Regex::new(r"^([a-z_]+)\s*(?:\(\s*([^)]*)\s*\))?$")
            .map_err(|e| error(&format!("Regex compilation error: {e}")))?;
        let captures = pattern
            .captures(&input)
            .ok_or_else(|| error("expected name or name(arguments)"))?;
        let name = &captures[1];
        let args: Vec<f64> = match captures.get(2) {
            Some(args) if !args.as_str().trim().is_empty() => args
                .as_str()
                .split(',')
                .map(|a| a.trim().parse::<f64>())
                .collect::<Result<_, _>>()
                .map_err(|e| error(&e.to_string()))?,
            _ => Vec::new(),
        };

        let no_args = |stat: RequestedStat| {
            if args.is_empty() {
                Ok(stat)
            } else {
                Err(error("takes no arguments"))
            }
        };

        match name {
            "mean" => no_args(RequestedStat::Mean),
            "std" => no_args(RequestedStat::Std),
            "median" => no_args(RequestedStat::Median),
            "hpdi" | "hpd" => match args.as_slice() {
                [] => Ok(RequestedStat::Hpdi(DEFAULT_HPD_PROB)),
                [p] if *p > 0.0 && *p < 1.0 => Ok(RequestedStat::Hpdi(*p)),
                [_] => Err(error("coverage must lie in (0, 1)")),
                _ => Err(error("takes a single coverage probability")),
            },
            "percentiles" => {
                if args.is_empty() {
                    Err(error("needs at least one percentile"))
                } else if args.iter().any(|p| !(0.0..=100.0).contains(p)) {
                    Err(error("percentiles must lie in [0, 100]"))
                } else {
                    Ok(RequestedStat::Percentiles(args.clone()))
                }
            }
            "mdd_laplace" => no_args(RequestedStat::MddLaplace),
            "mdd_harmonic" => no_args(RequestedStat::MddHarmonic),
            "ess" => no_args(RequestedStat::Ess),
            "rhat" => no_args(RequestedStat::Rhat),
            _ => Err(error("unknown statistic")),
        }
    }
}

impl TryFrom<String> for RequestedStat {
    type Error = StatError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RequestedStat> for String {
    fn from(stat: RequestedStat) -> Self {
        stat.to_string()
    }
}

/// Value of one statistic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Variantly)]
pub enum StatValue {
    /// One value per parameter
    PerParameter(Vec<f64>),
    /// One interval per parameter
    Intervals(Vec<(f64, f64)>),
    /// One row of percentiles per parameter
    Quantiles(Vec<Vec<f64>>),
    /// A single value for the whole chain
    Scalar(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, bon::Builder)]
#[serde(default)]
pub struct StatsConfig {
    #[builder(default = RequestedStat::defaults())]
    pub requested: Vec<RequestedStat>,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Results of [`stats`], in the order they were requested.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainStatistics {
    names: Vec<String>,
    draws: usize,
    entries: Vec<(RequestedStat, Result<StatValue, StatError>)>,
}

impl ChainStatistics {
    /// Looks a statistic up by its display name, for example `"hpdi(0.9)"`.
    pub fn get(&self, name: &str) -> Option<&Result<StatValue, StatError>> {
        self.entries
            .iter()
            .find(|(stat, _)| stat.to_string() == name)
            .map(|(_, value)| value)
    }

    pub fn get_stat(&self, stat: &RequestedStat) -> Option<&Result<StatValue, StatError>> {
        self.entries
            .iter()
            .find(|(s, _)| s == stat)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RequestedStat, &Result<StatValue, StatError>)> {
        self.entries.iter().map(|(s, v)| (s, v))
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn failures(&self) -> impl Iterator<Item = (&RequestedStat, &StatError)> {
        self.entries
            .iter()
            .filter_map(|(s, v)| v.as_ref().err().map(|e| (s, e)))
    }
}

impl fmt::Display for ChainStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut builder = Builder::default();
        let mut header = vec!["Statistic".to_string()];
        header.extend(self.names.iter().cloned());
        builder.push_record(header);

        let columns = self.names.len();
        for (stat, value) in &self.entries {
            let mut row = vec![stat.to_string()];
            match value {
                Ok(StatValue::PerParameter(values)) => {
                    row.extend(values.iter().map(|v| format!("{v:.4}")));
                }
                Ok(StatValue::Intervals(intervals)) => {
                    row.extend(intervals.iter().map(|(l, u)| format!("[{l:.4}, {u:.4}]")));
                }
                Ok(StatValue::Quantiles(rows)) => {
                    row.extend(rows.iter().map(|q| q.iter().map(|v| format!("{v:.4}")).join(" / ")));
                }
                Ok(StatValue::Scalar(v)) => row.push(format!("{v:.4}")),
                Err(e) => row.push(format!("unavailable: {e}")),
            }
            row.resize(columns + 1, String::new());
            builder.push_record(row);
        }

        let mut table = builder.build();
        table.with(Style::rounded());
        writeln!(f, "Draws: {}", self.draws)?;
        write!(f, "{table}")
    }
}

/// Computes the requested statistics of a chain.
///
/// # Arguments
///
/// * `estimate` - Mode estimate, needed by `mdd_laplace` only
/// * `chain` - Draws and their log posterior values
/// * `requested` - Statistics to compute
pub fn stats(
    estimate: Option<&ModeEstimate>,
    chain: &Chain,
    requested: &[RequestedStat],
) -> ChainStatistics {
    let columns: Vec<Vec<f64>> = (0..chain.dim()).map(|i| chain.column(i).to_vec()).collect();
    let entries = requested
        .iter()
        .map(|stat| {
            let value = compute(stat, estimate, chain, &columns);
            if let Err(e) = &value {
                log::warn!("Statistic {stat} unavailable: {e}");
            }
            (stat.clone(), value)
        })
        .collect();

    ChainStatistics {
        names: chain.names().to_vec(),
        draws: chain.len(),
        entries,
    }
}

fn compute(
    stat: &RequestedStat,
    estimate: Option<&ModeEstimate>,
    chain: &Chain,
    columns: &[Vec<f64>],
) -> Result<StatValue, StatError> {
    let needed = stat.min_draws(chain.dim());
    if chain.len() < needed {
        return Err(StatError::Insufficient {
            stat: stat.to_string(),
            needed,
            available: chain.len(),
        });
    }

    let per_parameter = |f: &dyn Fn(&[f64]) -> f64| {
        StatValue::PerParameter(columns.iter().map(|c| f(c)).collect())
    };

    let value = match stat {
        RequestedStat::Mean => per_parameter(&mean),
        RequestedStat::Std => per_parameter(&|c| variance(c).sqrt()),
        RequestedStat::Median => per_parameter(&|c| quantile(&sorted(c), 0.5)),
        RequestedStat::Hpdi(p) => StatValue::Intervals(
            columns.iter().map(|c| hpd_interval(&sorted(c), *p)).collect(),
        ),
        RequestedStat::Percentiles(ps) => StatValue::Quantiles(
            columns
                .iter()
                .map(|c| {
                    let s = sorted(c);
                    ps.iter().map(|p| quantile(&s, p / 100.0)).collect()
                })
                .collect(),
        ),
        RequestedStat::MddLaplace => {
            let estimate = estimate.ok_or_else(|| StatError::MissingEstimate(stat.to_string()))?;
            StatValue::Scalar(mdd_laplace(estimate)?)
        }
        RequestedStat::MddHarmonic => StatValue::Scalar(mdd_harmonic(chain)?),
        RequestedStat::Ess => per_parameter(&|c| effective_sample_size(&[c.to_vec()])),
        RequestedStat::Rhat => per_parameter(&|c| split_rhat(&[c.to_vec()])),
    };
    Ok(value)
}

/// ln p(Y) ≈ ln p(θ̂|Y) + d/2 ln 2π + ½ ln |Σ|.
fn mdd_laplace(estimate: &ModeEstimate) -> Result<f64, StatError> {
    let d = estimate.dim() as f64;
    let ln_det = ln_det_pd(&estimate.covariance).ok_or_else(|| {
        StatError::Numerical("covariance at the mode is not positive definite".into())
    })?;
    Ok(estimate.log_posterior() + 0.5 * d * LN_2PI + 0.5 * ln_det)
}

/// Geweke's modified harmonic mean with a truncated normal weighting density.
///
/// For each truncation probability p the weighting density is the normal fitted to the draws,
/// restricted to its `p` highest-density ellipsoid. The result is the average of the log
/// estimates over the truncation probabilities.
fn mdd_harmonic(chain: &Chain) -> Result<f64, StatError> {
    let dim = chain.dim();
    let draws = chain.draws();
    let log_posterior = chain.log_posterior();
    if log_posterior.iter().any(|lp| !lp.is_finite()) {
        return Err(StatError::Numerical(
            "chain contains non-finite log posterior values".into(),
        ));
    }

    let n = draws.nrows();
    let center = draws
        .mean_axis(Axis(0))
        .ok_or_else(|| StatError::Numerical("empty chain".into()))?;
    let deviations = draws - &center;
    let covariance: Array2<f64> = deviations.t().dot(&deviations) / (n - 1) as f64;
    let factor = cholesky(&covariance).ok_or_else(|| {
        StatError::Numerical("sample covariance of the draws is not positive definite".into())
    })?;
    let ln_det = 2.0 * factor.diag().iter().map(|d| d.ln()).sum::<f64>();

    let quadratic: Array1<f64> = deviations
        .axis_iter(Axis(0))
        .map(|row| inv_quad_form(&factor, &row.to_owned()))
        .collect();
    let chi_squared = ChiSquared::new(dim as f64)
        .map_err(|e| StatError::Numerical(e.to_string()))?;

    let mut estimates = Vec::with_capacity(HARMONIC_TRUNCATIONS.len());
    for p in HARMONIC_TRUNCATIONS {
        let critical = chi_squared.inverse_cdf(p);
        // ln f(θ) - ln p(θ|Y) for the draws inside the ellipsoid
        let terms: Vec<f64> = quadratic
            .iter()
            .zip(log_posterior.iter())
            .filter(|(q, _)| **q <= critical)
            .map(|(q, lp)| -p.ln() - 0.5 * (dim as f64 * LN_2PI + ln_det + q) - lp)
            .collect();
        if terms.is_empty() {
            continue;
        }
        let ln_mean = log_sum_exp(&terms) - (n as f64).ln();
        estimates.push(-ln_mean);
    }

    if estimates.is_empty() {
        return Err(StatError::Numerical(
            "no draw falls inside any truncation region".into(),
        ));
    }
    Ok(mean(&estimates))
}

fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}
