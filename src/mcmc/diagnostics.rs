//! Convergence diagnostics across chains.
//!
//! The main components are:
//! - `Diagnostics`: per-parameter summary over several chains
//! - R-hat on split sequences and the rank-normalized effective sample size
//! - Highest posterior density intervals
//!
//! The numerical helpers operate on plain sequences and are shared with the single-chain
//! statistics.

use std::fmt::{self, Display};

use colored::Colorize;
use ordered_float::OrderedFloat;
use tabled::{builder::Builder, settings::Style};

use crate::mcmc::error::MCMCError;
use crate::mcmc::output::Chain;

/// R-hat below this value counts as converged.
pub const RHAT_THRESHOLD: f64 = 1.1;

/// Probability mass of the intervals reported by [`Diagnostics`].
pub const DIAGNOSTICS_HPD_PROB: f64 = 0.9;

/// Per-parameter diagnostics over a set of chains.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostics {
    num_chains: usize,
    /// Draws summed over all chains
    num_draws: usize,
    names: Vec<String>,
    parameters: Vec<ParameterDiagnostics>,
}

/// Diagnostic statistics for a single parameter across all chains.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterDiagnostics {
    pub mean: f64,
    pub median: f64,
    pub std: f64,
    /// Split R-hat (should be < 1.1 for convergence)
    pub rhat: f64,
    pub ess: f64,
    /// Monte Carlo standard error of the mean
    pub mcse: f64,
    pub hpd_low: f64,
    pub hpd_high: f64,
}

impl Diagnostics {
    /// Computes diagnostics for chains sharing the same parameters.
    ///
    /// # Errors
    ///
    /// * `MCMCError::NoChains` - If `chains` is empty
    /// * `MCMCError::NameMismatch` - If the chains disagree on parameter names
    pub fn from_chains(chains: &[Chain]) -> Result<Self, MCMCError> {
        let first = chains.first().ok_or(MCMCError::NoChains)?;
        for chain in &chains[1..] {
            if chain.names() != first.names() {
                return Err(MCMCError::NameMismatch {
                    expected: first.names().to_vec(),
                    found: chain.names().to_vec(),
                });
            }
        }

        let parameters = (0..first.dim())
            .map(|i| {
                let sequences: Vec<Vec<f64>> = chains.iter().map(|c| c.column(i).to_vec()).collect();
                parameter_diagnostics(&sequences)
            })
            .collect();

        Ok(Self {
            num_chains: chains.len(),
            num_draws: chains.iter().map(Chain::len).sum(),
            names: first.names().to_vec(),
            parameters,
        })
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterDiagnostics> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| &self.parameters[i])
    }

    pub fn num_chains(&self) -> usize {
        self.num_chains
    }

    pub fn num_draws(&self) -> usize {
        self.num_draws
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// True if every parameter has R-hat below [`RHAT_THRESHOLD`].
    pub fn is_converged(&self) -> bool {
        self.parameters.iter().all(|d| d.rhat < RHAT_THRESHOLD)
    }
}

impl Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut builder = Builder::default();
        builder.push_record([
            "Parameter".to_string(),
            "Mean".to_string(),
            "Std".to_string(),
            "Median".to_string(),
            format!("HPD {:.0}%", DIAGNOSTICS_HPD_PROB * 100.0),
            "R-hat".to_string(),
            "ESS".to_string(),
            "MCSE".to_string(),
            "Converged".to_string(),
        ]);

        for (name, diag) in self.names.iter().zip(&self.parameters) {
            builder.push_record([
                name.clone(),
                format!("{:.4}", diag.mean),
                format!("{:.4}", diag.std),
                format!("{:.4}", diag.median),
                format!("[{:.4}, {:.4}]", diag.hpd_low, diag.hpd_high),
                format!("{:.4}", diag.rhat),
                format!("{:.1}", diag.ess),
                format!("{:.4}", diag.mcse),
                if diag.rhat < RHAT_THRESHOLD { "✅" } else { "❌" }.to_string(),
            ]);
        }

        let mut table = builder.build();
        table.with(Style::rounded());

        let status = if self.is_converged() {
            "Yes".green()
        } else {
            "No".yellow()
        };
        writeln!(
            f,
            "Chains: {}, total draws: {}, converged: {status}",
            self.num_chains, self.num_draws
        )?;
        write!(f, "{table}")
    }
}

impl Display for ParameterDiagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Mean: {:.4}, Std: {:.4}, R-hat: {:.4}, ESS: {:.1}, HPD: [{:.4}, {:.4}]",
            self.mean, self.std, self.rhat, self.ess, self.hpd_low, self.hpd_high
        )
    }
}

fn parameter_diagnostics(sequences: &[Vec<f64>]) -> ParameterDiagnostics {
    let all_values: Vec<f64> = sequences.iter().flatten().copied().collect();
    let mean = mean(&all_values);
    let std = variance(&all_values).sqrt();
    let sorted = sorted(&all_values);
    let ess = effective_sample_size(sequences);
    let mcse = if ess > 0.0 { std / ess.sqrt() } else { f64::NAN };
    let (hpd_low, hpd_high) = hpd_interval(&sorted, DIAGNOSTICS_HPD_PROB);

    ParameterDiagnostics {
        mean,
        median: quantile(&sorted, 0.5),
        std,
        rhat: split_rhat(sequences),
        ess,
        mcse,
        hpd_low,
        hpd_high,
    }
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Unbiased sample variance, `NaN` below two values.
pub(crate) fn variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return f64::NAN;
    }
    let m = mean(values);
    values.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64
}

pub(crate) fn sorted(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by_key(|v| OrderedFloat(*v));
    sorted
}

/// Quantile of sorted values by linear interpolation between order statistics.
pub(crate) fn quantile(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let position = p.clamp(0.0, 1.0) * (n - 1) as f64;
            let low = position.floor() as usize;
            let high = (low + 1).min(n - 1);
            let weight = position - low as f64;
            sorted[low] + weight * (sorted[high] - sorted[low])
        }
    }
}

/// Shortest interval of sorted values covering `prob` of the draws.
pub(crate) fn hpd_interval(sorted: &[f64], prob: f64) -> (f64, f64) {
    let n = sorted.len();
    if n == 0 {
        return (f64::NAN, f64::NAN);
    }
    let include = ((prob * n as f64 - 1e-9).ceil() as usize).clamp(1, n);

    let mut best_low = 0;
    let mut best_width = f64::INFINITY;
    for low in 0..=(n - include) {
        let width = sorted[low + include - 1] - sorted[low];
        if width < best_width {
            best_width = width;
            best_low = low;
        }
    }

    (sorted[best_low], sorted[best_low + include - 1])
}

/// Splits every sequence into a leading and a trailing half.
///
/// All halves take the length of the shortest one, so longer sequences lose their middle
/// draws.
fn split_sequences(sequences: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let half = sequences.iter().map(|v| v.len() / 2).min().unwrap_or(0);
    sequences
        .iter()
        .flat_map(|values| {
            [
                values[..half].to_vec(),
                values[values.len() - half..].to_vec(),
            ]
        })
        .collect()
}

/// Gelman-Rubin R-hat on split sequences.
///
/// Formula: R-hat = sqrt(((n-1)/n * W + B/n) / W), with W the mean within-sequence variance
/// and B the between-sequence variance of the sequence means.
pub(crate) fn split_rhat(sequences: &[Vec<f64>]) -> f64 {
    let split = split_sequences(sequences);
    let n = split.first().map_or(0, Vec::len);
    if n < 2 || split.len() < 2 {
        return f64::NAN;
    }

    let means: Vec<f64> = split.iter().map(|s| mean(s)).collect();
    let within = split.iter().map(|s| variance(s)).sum::<f64>() / split.len() as f64;
    let between = variance(&means) * n as f64;

    let n = n as f64;
    let var_plus = ((n - 1.0) / n) * within + between / n;
    (var_plus / within).sqrt()
}

/// Effective sample size of rank-normalized split sequences.
///
/// Autocorrelations are averaged over sequences and summed in pairs until a pair turns
/// non-positive (initial positive sequence). The result never exceeds the number of draws.
pub(crate) fn effective_sample_size(sequences: &[Vec<f64>]) -> f64 {
    let split = rank_normalize(split_sequences(sequences));
    let m = split.len();
    let n = split.first().map_or(0, Vec::len);
    if n < 4 {
        return f64::NAN;
    }

    let centred: Vec<Vec<f64>> = split
        .iter()
        .map(|s| {
            let m = mean(s);
            s.iter().map(|x| x - m).collect()
        })
        .collect();
    let variances: Vec<f64> = centred
        .iter()
        .map(|s| (s.iter().map(|x| x * x).sum::<f64>() / n as f64).max(1e-12))
        .collect();

    let autocorrelation = |lag: usize| {
        centred
            .iter()
            .zip(&variances)
            .map(|(s, v)| {
                let sum: f64 = (0..n - lag).map(|t| s[t] * s[t + lag]).sum();
                sum / (n as f64 * v)
            })
            .sum::<f64>()
            / m as f64
    };

    // tau = -1 + 2 Σ_k (ρ_2k + ρ_2k+1)
    let mut tau = -1.0;
    let mut lag = 0;
    while lag + 1 < n {
        let pair = autocorrelation(lag) + autocorrelation(lag + 1);
        if pair <= 0.0 {
            break;
        }
        tau += 2.0 * pair;
        lag += 2;
    }

    let total = (m * n) as f64;
    (total / tau.max(1e-12)).min(total)
}

/// Replaces values by normal scores Φ⁻¹((rank + 1/2) / N) over all sequences jointly.
fn rank_normalize(draws: Vec<Vec<f64>>) -> Vec<Vec<f64>> {
    let total: usize = draws.iter().map(Vec::len).sum();
    let mut indices: Vec<(usize, usize)> = draws
        .iter()
        .enumerate()
        .flat_map(|(s, seq)| (0..seq.len()).map(move |t| (s, t)))
        .collect();
    indices.sort_by_key(|&(s, t)| OrderedFloat(draws[s][t]));

    let mut normalized = draws.clone();
    for (rank, (s, t)) in indices.into_iter().enumerate() {
        let p = (rank as f64 + 0.5) / total as f64;
        normalized[s][t] = statrs::function::erf::erf_inv(2.0 * p - 1.0) * std::f64::consts::SQRT_2;
    }
    normalized
}
