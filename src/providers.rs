//! Reference objective provider: Gaussian linear regression.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::io::PersistError;
use crate::optim::objective::{LikelihoodEvaluation, ProviderError, ResidualTerms};
use crate::optim::ObjectiveProvider;
use crate::priors::LN_SQRT_2PI;

/// Name of the closed-form intercept reported as an out-of-likelihood parameter.
pub const INTERCEPT: &str = "intercept";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegressionDataError {
    #[error("Regression data has no observations")]
    Empty,
    #[error("Design matrix has {rows} rows but {observations} observations were given")]
    RowMismatch { rows: usize, observations: usize },
    #[error("Row {row} has {found} regressors, expected {expected}")]
    RaggedRow {
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("Expected {expected} current values, got {found}")]
    CurrentValues { expected: usize, found: usize },
}

/// Regression data as stored on disk: one row of regressors per observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionData {
    pub x: Vec<Vec<f64>>,
    pub y: Vec<f64>,
    #[serde(default)]
    pub intercept: bool,
}

impl RegressionData {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        let file = File::open(path.as_ref())?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }
}

/// `y = c + X·β + ε` with `ε ~ N(0, σ²)`.
///
/// Parameters are `beta_0 .. beta_{k-1}` followed by `sigma`. When the intercept `c` is
/// enabled it is solved in closed form for every `(β, σ)` and reported under [`INTERCEPT`].
#[derive(Debug, Clone)]
pub struct GaussianRegression {
    x: Array2<f64>,
    y: Array1<f64>,
    intercept: bool,
    current: Vec<f64>,
}

#[bon::bon]
impl GaussianRegression {
    #[builder]
    pub fn new(
        x: Array2<f64>,
        y: Array1<f64>,
        #[builder(default)] intercept: bool,
        // unknown (NaN) when unset
        current: Option<Vec<f64>>,
    ) -> Result<Self, RegressionDataError> {
        if y.is_empty() {
            return Err(RegressionDataError::Empty);
        }
        if x.nrows() != y.len() {
            return Err(RegressionDataError::RowMismatch {
                rows: x.nrows(),
                observations: y.len(),
            });
        }

        let expected = x.ncols() + 1;
        let current = current.unwrap_or_else(|| vec![f64::NAN; expected]);
        if current.len() != expected {
            return Err(RegressionDataError::CurrentValues {
                expected,
                found: current.len(),
            });
        }

        Ok(Self {
            x,
            y,
            intercept,
            current,
        })
    }
}

impl GaussianRegression {
    pub fn from_data(data: &RegressionData) -> Result<Self, RegressionDataError> {
        let k = data.x.first().map_or(0, Vec::len);
        if let Some((row, found)) = data
            .x
            .iter()
            .map(Vec::len)
            .enumerate()
            .find(|(_, len)| *len != k)
        {
            return Err(RegressionDataError::RaggedRow {
                row,
                expected: k,
                found,
            });
        }

        let flat: Vec<f64> = data.x.iter().flatten().copied().collect();
        let x = Array2::from_shape_vec((data.x.len(), k), flat).map_err(|_| {
            RegressionDataError::RowMismatch {
                rows: data.x.len(),
                observations: data.y.len(),
            }
        })?;

        Self::builder()
            .x(x)
            .y(Array1::from(data.y.clone()))
            .intercept(data.intercept)
            .build()
    }

    pub fn num_regressors(&self) -> usize {
        self.x.ncols()
    }

    pub fn num_observations(&self) -> usize {
        self.y.len()
    }

    /// Residuals `y - c - X·β` and the fitted intercept (0 when disabled).
    fn residuals(&self, beta: ArrayView1<'_, f64>) -> (Array1<f64>, f64) {
        let mut residuals = &self.y - &self.x.dot(&beta);
        if !self.intercept {
            return (residuals, 0.0);
        }
        let c = residuals.mean().unwrap_or(0.0);
        residuals -= c;
        (residuals, c)
    }

    fn split<'a>(&self, params: &'a [f64]) -> Result<(ArrayView1<'a, f64>, f64), ProviderError> {
        let k = self.num_regressors();
        if params.len() != k + 1 {
            return Err(ProviderError::ParameterCount {
                expected: k + 1,
                found: params.len(),
            });
        }
        let sigma = params[k];
        if sigma.is_nan() || sigma <= 0.0 {
            return Err(ProviderError::Numerical(format!(
                "sigma must be positive, got {sigma}"
            )));
        }
        Ok((ArrayView1::from(&params[..k]), sigma))
    }
}

impl ObjectiveProvider for GaussianRegression {
    fn parameter_names(&self) -> Vec<String> {
        (0..self.num_regressors())
            .map(|j| format!("beta_{j}"))
            .chain(std::iter::once("sigma".to_string()))
            .collect()
    }

    fn current_values(&self) -> Vec<f64> {
        self.current.clone()
    }

    fn raw_neg_log_lik(&self, params: &[f64]) -> Result<f64, ProviderError> {
        self.evaluate(params).map(|e| e.neg_log_lik)
    }

    fn out_of_lik_names(&self) -> Vec<String> {
        if self.intercept {
            vec![INTERCEPT.to_string()]
        } else {
            Vec::new()
        }
    }

    fn evaluate(&self, params: &[f64]) -> Result<LikelihoodEvaluation, ProviderError> {
        let (beta, sigma) = self.split(params)?;
        let (residuals, c) = self.residuals(beta);

        let n = self.num_observations() as f64;
        let variance = sigma * sigma;
        let rss = residuals.dot(&residuals);
        let neg_log_lik = n * (LN_SQRT_2PI + sigma.ln()) + 0.5 * rss / variance;
        if !neg_log_lik.is_finite() {
            return Err(ProviderError::Numerical(format!(
                "negative log likelihood is {neg_log_lik}"
            )));
        }

        let mut concentrated = HashMap::new();
        if self.intercept {
            concentrated.insert(INTERCEPT.to_string(), c);
        }

        Ok(LikelihoodEvaluation {
            neg_log_lik,
            residuals: Some(ResidualTerms {
                n_obs: self.num_observations(),
                weighted_rss: rss / variance,
                log_det: n * variance.ln(),
            }),
            concentrated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn line() -> GaussianRegression {
        // y = 1 + 2 x exactly
        GaussianRegression::builder()
            .x(array![[0.0], [1.0], [2.0], [3.0]])
            .y(array![1.0, 3.0, 5.0, 7.0])
            .intercept(true)
            .build()
            .unwrap()
    }

    #[test]
    fn test_names_and_intercept() {
        let provider = line();
        assert_eq!(provider.parameter_names(), vec!["beta_0", "sigma"]);
        assert_eq!(provider.out_of_lik_names(), vec![INTERCEPT]);

        let evaluation = provider.evaluate(&[2.0, 1.0]).unwrap();
        assert_relative_eq!(evaluation.concentrated[INTERCEPT], 1.0, epsilon = 1e-12);
        assert_relative_eq!(evaluation.neg_log_lik, 4.0 * LN_SQRT_2PI, epsilon = 1e-12);
        assert_eq!(evaluation.residuals.unwrap().n_obs, 4);
    }

    #[test]
    fn test_gaussian_log_likelihood() {
        let provider = GaussianRegression::builder()
            .x(array![[1.0], [2.0]])
            .y(array![1.0, 1.0])
            .build()
            .unwrap();

        // residuals 0 and -1, sigma 2
        let nll = provider.raw_neg_log_lik(&[1.0, 2.0]).unwrap();
        assert_relative_eq!(nll, 2.0 * (LN_SQRT_2PI + 2f64.ln()) + 0.125, epsilon = 1e-12);
        assert!(provider.out_of_lik_names().is_empty());
    }

    #[test]
    fn test_non_positive_sigma_fails() {
        let provider = line();
        assert!(matches!(
            provider.raw_neg_log_lik(&[2.0, 0.0]),
            Err(ProviderError::Numerical(_))
        ));
        assert!(matches!(
            provider.raw_neg_log_lik(&[2.0]),
            Err(ProviderError::ParameterCount { expected: 2, found: 1 })
        ));
    }

    #[test]
    fn test_from_data_rejects_ragged_rows() {
        let data = RegressionData {
            x: vec![vec![1.0, 2.0], vec![1.0]],
            y: vec![0.0, 1.0],
            intercept: false,
        };
        assert_eq!(
            GaussianRegression::from_data(&data).unwrap_err(),
            RegressionDataError::RaggedRow {
                row: 1,
                expected: 2,
                found: 1
            }
        );
    }
}
