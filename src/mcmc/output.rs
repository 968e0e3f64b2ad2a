//! Storage for the draws of one Markov chain.

use ndarray::{s, Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

use crate::mcmc::error::MCMCError;

/// Draws of one chain: one row per kept iteration, one column per parameter.
///
/// `log_posterior` holds the log posterior kernel of every row. Values that could not be
/// evaluated are stored as `NaN` and written as JSON `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chain {
    names: Vec<String>,
    draws: Array2<f64>,
    #[serde(with = "crate::io::nullable_array")]
    log_posterior: Array1<f64>,
}

impl Chain {
    /// Creates a chain, checking that the shapes agree.
    ///
    /// # Arguments
    ///
    /// * `names` - Parameter names, one per column of `draws`
    /// * `draws` - Matrix of draws with shape `(n_draws, n_params)`
    /// * `log_posterior` - Log posterior of each draw
    pub fn new(
        names: Vec<String>,
        draws: Array2<f64>,
        log_posterior: Array1<f64>,
    ) -> Result<Self, MCMCError> {
        if draws.ncols() != names.len() {
            return Err(MCMCError::DimensionMismatch {
                expected: names.len(),
                found: draws.ncols(),
            });
        }
        if draws.nrows() != log_posterior.len() {
            return Err(MCMCError::ChainShape {
                rows: draws.nrows(),
                log_posterior: log_posterior.len(),
            });
        }
        Ok(Self {
            names,
            draws,
            log_posterior,
        })
    }

    /// Assembles a chain from parts already known to agree in shape.
    pub(crate) fn from_parts(
        names: Vec<String>,
        draws: Array2<f64>,
        log_posterior: Array1<f64>,
    ) -> Self {
        debug_assert_eq!(draws.nrows(), log_posterior.len());
        Self {
            names,
            draws,
            log_posterior,
        }
    }

    /// An empty chain over `names`.
    pub fn empty(names: Vec<String>) -> Self {
        let dim = names.len();
        Self {
            names,
            draws: Array2::zeros((0, dim)),
            log_posterior: Array1::zeros(0),
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn draws(&self) -> &Array2<f64> {
        &self.draws
    }

    pub fn log_posterior(&self) -> &Array1<f64> {
        &self.log_posterior
    }

    /// Number of draws.
    pub fn len(&self) -> usize {
        self.draws.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of parameters.
    pub fn dim(&self) -> usize {
        self.names.len()
    }

    pub fn column(&self, index: usize) -> ArrayView1<'_, f64> {
        self.draws.column(index)
    }

    pub fn parameter(&self, name: &str) -> Option<ArrayView1<'_, f64>> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.draws.column(i))
    }

    /// Per-parameter sample means, `NaN` for an empty chain.
    pub fn means(&self) -> Array1<f64> {
        self.draws
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::from_elem(self.dim(), f64::NAN))
    }

    /// Drops the first `n` draws.
    pub fn discard_front(&self, n: usize) -> Self {
        let n = n.min(self.len());
        Self {
            names: self.names.clone(),
            draws: self.draws.slice(s![n.., ..]).to_owned(),
            log_posterior: self.log_posterior.slice(s![n..]).to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn chain() -> Chain {
        Chain::new(
            vec!["a".into(), "b".into()],
            array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]],
            array![-1.0, f64::NAN, -3.0],
        )
        .unwrap()
    }

    #[test]
    fn test_shape_validation() {
        let result = Chain::new(vec!["a".into()], array![[1.0, 2.0]], array![0.0]);
        assert!(matches!(result, Err(MCMCError::DimensionMismatch { .. })));

        let result = Chain::new(vec!["a".into()], array![[1.0], [2.0]], array![0.0]);
        assert!(matches!(result, Err(MCMCError::ChainShape { .. })));
    }

    #[test]
    fn test_access_and_trim() {
        let chain = chain();
        assert_eq!(chain.len(), 3);
        assert_eq!(chain.parameter("b").unwrap().to_vec(), vec![2.0, 4.0, 6.0]);
        assert_eq!(chain.means(), array![3.0, 4.0]);

        let trimmed = chain.discard_front(2);
        assert_eq!(trimmed.len(), 1);
        assert_eq!(trimmed.column(0)[0], 5.0);
        assert!(chain.discard_front(10).is_empty());
        assert!(Chain::empty(vec!["a".into()]).means()[0].is_nan());
    }

    #[test]
    fn test_nan_log_posterior_survives_json() {
        let chain = chain();
        let json = serde_json::to_string(&chain).unwrap();
        assert!(json.contains("null"));
        let back: Chain = serde_json::from_str(&json).unwrap();
        assert!(back.log_posterior()[1].is_nan());
        assert_eq!(back.draws(), chain.draws());
    }
}
