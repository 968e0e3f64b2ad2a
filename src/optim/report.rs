//! Results of the posterior mode search.

use std::collections::BTreeMap;
use std::fmt;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use tabled::{builder::Builder, settings::Style};

use crate::optim::error::OptimizeError;
use crate::optim::objective::ObjectiveProvider;
use crate::optim::problem::EstimationProblem;

/// Serializable part of a posterior estimate.
///
/// All vectors and matrices follow the order of `names`. Hessians are those of the negative
/// log posterior in natural parameter space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeEstimate {
    pub names: Vec<String>,
    pub mode: Array1<f64>,
    pub covariance: Array2<f64>,
    pub hessian_total: Array2<f64>,
    /// Diagonal contribution of the independent priors.
    pub hessian_prior: Array2<f64>,
    pub hessian_data: Array2<f64>,
    /// Concentrated common variance factor, 1 when not estimated.
    pub variance_factor: f64,
    #[serde(with = "crate::io::nullable_map")]
    pub concentrated: BTreeMap<String, f64>,
    pub shock_std: Vec<bool>,
    pub neg_log_posterior: f64,
    pub neg_log_lik: f64,
    pub ln_prior: f64,
    pub converged: bool,
    pub iterations: u64,
    pub function_evaluations: u64,
}

impl ModeEstimate {
    pub fn dim(&self) -> usize {
        self.names.len()
    }

    /// Log posterior kernel at the mode.
    pub fn log_posterior(&self) -> f64 {
        -self.neg_log_posterior
    }

    /// Standard deviations implied by the covariance diagonal.
    pub fn std_errors(&self) -> Array1<f64> {
        self.covariance.diag().mapv(|v| v.max(0.0).sqrt())
    }

    /// Mode values of the shock standard deviations rescaled by the square root of the
    /// variance factor.
    pub fn scaled_shock_stds(&self) -> Vec<(String, f64)> {
        let scale = self.variance_factor.sqrt();
        self.names
            .iter()
            .zip(self.mode.iter())
            .zip(&self.shock_std)
            .filter(|(_, is_shock)| **is_shock)
            .map(|((name, value), _)| (name.clone(), value * scale))
            .collect()
    }

    pub(crate) fn validate(&self) -> Result<(), OptimizeError> {
        let n = self.dim();
        let shapes_ok = self.mode.len() == n
            && self.covariance.dim() == (n, n)
            && self.hessian_total.dim() == (n, n)
            && self.hessian_prior.dim() == (n, n)
            && self.hessian_data.dim() == (n, n)
            && self.shock_std.len() == n;
        if !shapes_ok {
            return Err(OptimizeError::DimensionMismatch {
                expected: n,
                found: self.mode.len(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for ModeEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut builder = Builder::default();
        builder.push_record(["Parameter", "Mode", "Std. error"]);
        for ((name, mode), se) in self.names.iter().zip(self.mode.iter()).zip(self.std_errors()) {
            builder.push_record([name.clone(), format!("{mode:.6}"), format!("{se:.6}")]);
        }
        for (name, value) in &self.concentrated {
            builder.push_record([format!("{name} (concentrated)"), format!("{value:.6}"), "-".into()]);
        }
        let mut table = builder.build();
        table.with(Style::rounded());

        writeln!(f, "{table}")?;
        writeln!(f, "Log posterior at mode: {:.6}", self.log_posterior())?;
        if self.variance_factor != 1.0 {
            writeln!(f, "Variance factor: {:.6}", self.variance_factor)?;
        }
        write!(
            f,
            "Converged: {} ({} iterations, {} evaluations)",
            self.converged, self.iterations, self.function_evaluations
        )
    }
}

/// A mode estimate bound to the problem it was computed for.
#[derive(Debug, Clone)]
pub struct PosteriorEstimate<P: ObjectiveProvider> {
    problem: EstimationProblem<P>,
    estimate: ModeEstimate,
}

impl<P: ObjectiveProvider> PosteriorEstimate<P> {
    pub(crate) fn new(problem: EstimationProblem<P>, estimate: ModeEstimate) -> Self {
        Self { problem, estimate }
    }

    /// Re-binds a (typically deserialized) mode estimate to a problem.
    ///
    /// Parameter names must match in order and the mode must respect the bounds.
    pub fn from_mode_estimate(
        problem: EstimationProblem<P>,
        estimate: ModeEstimate,
    ) -> Result<Self, OptimizeError> {
        let names = problem.names();
        if names != estimate.names {
            return Err(OptimizeError::NameMismatch {
                expected: names,
                found: estimate.names,
            });
        }
        estimate.validate()?;

        let mode = estimate.mode.to_vec();
        if let Some(i) = problem.bound_violation(&mode) {
            let spec = &problem.specs()[i];
            return Err(OptimizeError::BoundViolation {
                param: spec.name().to_string(),
                value: mode[i],
                lower: spec.lower(),
                upper: spec.upper(),
            });
        }

        Ok(Self { problem, estimate })
    }

    pub fn problem(&self) -> &EstimationProblem<P> {
        &self.problem
    }

    pub fn estimate(&self) -> &ModeEstimate {
        &self.estimate
    }

    pub fn into_parts(self) -> (EstimationProblem<P>, ModeEstimate) {
        (self.problem, self.estimate)
    }

    pub fn mode(&self) -> &Array1<f64> {
        &self.estimate.mode
    }

    pub fn covariance(&self) -> &Array2<f64> {
        &self.estimate.covariance
    }

    pub fn names(&self) -> &[String] {
        &self.estimate.names
    }

    pub fn dim(&self) -> usize {
        self.estimate.dim()
    }

    pub fn converged(&self) -> bool {
        self.estimate.converged
    }
}
