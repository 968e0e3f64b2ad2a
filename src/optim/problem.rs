//! The estimation problem: parameter specifications bound to an objective provider.

use std::collections::{HashMap, HashSet};

use ndarray::Array1;

use crate::optim::error::{ConfigurationError, EvaluationFailure};
use crate::optim::objective::ObjectiveProvider;
use crate::optim::parameter::ParameterSpec;
use crate::optim::transformation::Transformation;

/// Penalty substituted for the negative log posterior where it cannot be evaluated.
pub const DEFAULT_PENALTY: f64 = 1e10;

/// Posterior terms at one natural-space point.
#[derive(Debug, Clone, PartialEq)]
pub struct PosteriorEvaluation {
    pub neg_log_posterior: f64,
    /// Data term, after concentrating out the variance factor when enabled.
    pub neg_log_lik: f64,
    pub ln_prior: f64,
    /// Closed-form variance factor, 1 when variance-factor mode is off.
    pub variance_factor: f64,
    /// Requested out-of-likelihood parameters, in the order they were requested.
    pub concentrated: Vec<(String, f64)>,
}

/// Estimated parameters, their priors and the likelihood they feed.
///
/// Vectors handed to and returned from the problem follow the order of the parameter
/// specifications given at construction. The provider always receives its full model
/// vector, built from its current values with the estimated entries overwritten.
#[derive(Debug, Clone)]
pub struct EstimationProblem<P: ObjectiveProvider> {
    specs: Vec<ParameterSpec>,
    provider: P,
    /// Position of every spec in the provider's parameter vector
    model_index: Vec<usize>,
    base_vector: Vec<f64>,
    transformations: Vec<Transformation>,
    start: Array1<f64>,
    out_of_lik: Vec<String>,
    variance_factor: bool,
    penalty: f64,
}

#[bon::bon]
impl<P: ObjectiveProvider> EstimationProblem<P> {
    /// Validates the specifications against the provider and resolves the start vector.
    #[builder]
    pub fn new(
        provider: P,
        specs: Vec<ParameterSpec>,
        #[builder(default)] out_of_lik: Vec<String>,
        #[builder(default)] variance_factor: bool,
        #[builder(default = DEFAULT_PENALTY)] penalty: f64,
    ) -> Result<Self, ConfigurationError> {
        if specs.is_empty() {
            return Err(ConfigurationError::NoParameters);
        }

        let model_names = provider.parameter_names();
        let base_vector = provider.current_values();
        if model_names.len() != base_vector.len() {
            return Err(ConfigurationError::ProviderShape {
                names: model_names.len(),
                values: base_vector.len(),
            });
        }

        let positions: HashMap<&str, usize> = model_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();

        let mut seen = HashSet::new();
        let mut model_index = Vec::with_capacity(specs.len());
        for spec in &specs {
            if !seen.insert(spec.name()) {
                return Err(ConfigurationError::DuplicateParameter(spec.name().to_string()));
            }
            let index = positions
                .get(spec.name())
                .ok_or_else(|| ConfigurationError::UnknownParameter(spec.name().to_string()))?;
            model_index.push(*index);
        }

        let offered = provider.out_of_lik_names();
        for name in &out_of_lik {
            if seen.contains(name.as_str()) {
                return Err(ConfigurationError::OutOfLikCollision(name.clone()));
            }
            if !offered.contains(name) {
                return Err(ConfigurationError::UnknownOutOfLik(name.clone()));
            }
        }

        let start = specs
            .iter()
            .zip(&model_index)
            .map(|(spec, &i)| spec.resolve_start(base_vector.get(i).copied()))
            .collect::<Result<Vec<_>, _>>()?;

        let transformations = specs.iter().map(|s| s.transformation()).collect();

        Ok(Self {
            specs,
            provider,
            model_index,
            base_vector,
            transformations,
            start: Array1::from(start),
            out_of_lik,
            variance_factor,
            penalty,
        })
    }
}

impl<P: ObjectiveProvider> EstimationProblem<P> {
    pub fn dim(&self) -> usize {
        self.specs.len()
    }

    pub fn specs(&self) -> &[ParameterSpec] {
        &self.specs
    }

    pub fn names(&self) -> Vec<String> {
        self.specs.iter().map(|s| s.name().to_string()).collect()
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn out_of_lik(&self) -> &[String] {
        &self.out_of_lik
    }

    pub fn variance_factor_mode(&self) -> bool {
        self.variance_factor
    }

    pub fn penalty(&self) -> f64 {
        self.penalty
    }

    pub fn transformations(&self) -> &[Transformation] {
        &self.transformations
    }

    /// Resolved natural-space start vector.
    pub fn start(&self) -> &Array1<f64> {
        &self.start
    }

    /// Free-space start vector.
    pub fn free_start(&self) -> Array1<f64> {
        self.inverse_expand(&self.start)
    }

    /// Maps a free optimization vector to natural parameter space.
    pub fn expand(&self, free: &Array1<f64>) -> Array1<f64> {
        free.iter()
            .zip(&self.transformations)
            .map(|(z, t)| t.apply_forward(*z))
            .collect()
    }

    /// Maps a natural-space vector to the free optimization space.
    pub fn inverse_expand(&self, natural: &Array1<f64>) -> Array1<f64> {
        natural
            .iter()
            .zip(&self.transformations)
            .map(|(x, t)| t.apply_back(*x))
            .collect()
    }

    /// Full provider vector with the estimated entries set to `natural`.
    pub fn model_vector(&self, natural: &[f64]) -> Vec<f64> {
        let mut vector = self.base_vector.clone();
        for (&i, &value) in self.model_index.iter().zip(natural) {
            vector[i] = value;
        }
        vector
    }

    /// Index of the first parameter outside its bounds.
    pub fn bound_violation(&self, natural: &[f64]) -> Option<usize> {
        natural
            .iter()
            .zip(&self.specs)
            .position(|(value, spec)| !spec.contains(*value))
    }

    /// Sum of the log priors, `-inf` when any prior has zero density.
    pub fn ln_prior(&self, natural: &[f64]) -> f64 {
        natural
            .iter()
            .zip(&self.specs)
            .map(|(value, spec)| spec.ln_prior(*value))
            .sum()
    }

    /// Evaluates the posterior at a natural-space point, reporting every failure.
    pub fn evaluate_natural(&self, natural: &[f64]) -> Result<PosteriorEvaluation, EvaluationFailure> {
        if natural.len() != self.dim() {
            return Err(EvaluationFailure::DimensionMismatch {
                expected: self.dim(),
                found: natural.len(),
            });
        }
        if let Some(i) = self.bound_violation(natural) {
            let spec = &self.specs[i];
            return Err(EvaluationFailure::OutOfBounds {
                param: spec.name().to_string(),
                value: natural[i],
                lower: spec.lower(),
                upper: spec.upper(),
            });
        }

        let mut ln_prior = 0.0;
        for (value, spec) in natural.iter().zip(&self.specs) {
            let lp = spec.ln_prior(*value);
            if lp == f64::NEG_INFINITY {
                return Err(EvaluationFailure::ZeroPriorDensity {
                    param: spec.name().to_string(),
                    value: *value,
                });
            }
            ln_prior += lp;
        }

        let evaluation = self.provider.evaluate(&self.model_vector(natural))?;

        let (neg_log_lik, variance_factor) = if self.variance_factor {
            let terms = evaluation
                .residuals
                .ok_or(EvaluationFailure::MissingResiduals)?;
            let nll = terms
                .concentrated_neg_log_lik()
                .ok_or(EvaluationFailure::NonFiniteLikelihood(f64::NAN))?;
            (nll, terms.variance_factor())
        } else {
            (evaluation.neg_log_lik, 1.0)
        };

        if !neg_log_lik.is_finite() {
            return Err(EvaluationFailure::NonFiniteLikelihood(neg_log_lik));
        }

        let concentrated = self
            .out_of_lik
            .iter()
            .map(|name| {
                let value = evaluation.concentrated.get(name).copied().unwrap_or(f64::NAN);
                (name.clone(), value)
            })
            .collect();

        Ok(PosteriorEvaluation {
            neg_log_posterior: neg_log_lik - ln_prior,
            neg_log_lik,
            ln_prior,
            variance_factor,
            concentrated,
        })
    }

    /// Log posterior at a natural-space point, `None` where it cannot be evaluated.
    pub fn log_posterior(&self, natural: &[f64]) -> Option<f64> {
        self.evaluate_natural(natural)
            .ok()
            .map(|e| -e.neg_log_posterior)
    }

    /// Negative log posterior at a free-space point.
    ///
    /// Points where the posterior cannot be evaluated get the finite penalty, so gradient
    /// based searches keep going.
    pub fn neg_log_posterior(&self, free: &Array1<f64>) -> f64 {
        let natural = self.expand(free).to_vec();
        self.neg_log_posterior_natural(&natural)
    }

    /// Penalized negative log posterior at a natural-space point.
    pub fn neg_log_posterior_natural(&self, natural: &[f64]) -> f64 {
        match self.evaluate_natural(natural) {
            Ok(evaluation) => evaluation.neg_log_posterior.min(self.penalty),
            Err(failure) => {
                log::trace!("Penalizing infeasible point: {failure}");
                self.penalty
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::optim::objective::{LikelihoodEvaluation, ProviderError, ResidualTerms};
    use crate::priors::{Family, Prior};
    use approx::assert_relative_eq;
    use ndarray::array;

    /// Provider whose likelihood does not depend on the parameters.
    pub(crate) struct ConstantProvider {
        pub names: Vec<String>,
        pub current: Vec<f64>,
        pub value: f64,
    }

    impl ObjectiveProvider for ConstantProvider {
        fn parameter_names(&self) -> Vec<String> {
            self.names.clone()
        }

        fn current_values(&self) -> Vec<f64> {
            self.current.clone()
        }

        fn raw_neg_log_lik(&self, _params: &[f64]) -> Result<f64, ProviderError> {
            Ok(self.value)
        }
    }

    /// Fails whenever the first parameter exceeds a threshold.
    struct FailingProvider;

    impl ObjectiveProvider for FailingProvider {
        fn parameter_names(&self) -> Vec<String> {
            vec!["a".into(), "b".into()]
        }

        fn current_values(&self) -> Vec<f64> {
            vec![0.5, 2.0]
        }

        fn raw_neg_log_lik(&self, params: &[f64]) -> Result<f64, ProviderError> {
            if params[0] > 1.0 {
                return Err(ProviderError::ModelNotSolved("indeterminacy".into()));
            }
            Ok(params[0] * params[0] + params[1])
        }

        fn out_of_lik_names(&self) -> Vec<String> {
            vec!["scale".into()]
        }

        fn evaluate(&self, params: &[f64]) -> Result<LikelihoodEvaluation, ProviderError> {
            let nll = self.raw_neg_log_lik(params)?;
            Ok(LikelihoodEvaluation {
                neg_log_lik: nll,
                residuals: Some(ResidualTerms {
                    n_obs: 10,
                    weighted_rss: 5.0 * params[1],
                    log_det: 0.0,
                }),
                concentrated: [("scale".to_string(), 3.0)].into_iter().collect(),
            })
        }
    }

    fn spec(name: &str, lower: f64, upper: f64) -> ParameterSpec {
        ParameterSpec::builder()
            .name(name)
            .lower(lower)
            .upper(upper)
            .build()
            .unwrap()
    }

    #[test]
    fn test_unknown_and_duplicate_parameters() {
        let result = EstimationProblem::builder()
            .provider(FailingProvider)
            .specs(vec![spec("c", 0.0, 1.0)])
            .build();
        assert!(matches!(result, Err(ConfigurationError::UnknownParameter(_))));

        let result = EstimationProblem::builder()
            .provider(FailingProvider)
            .specs(vec![spec("a", 0.0, 1.0), spec("a", 0.0, 1.0)])
            .build();
        assert!(matches!(result, Err(ConfigurationError::DuplicateParameter(_))));

        let result = EstimationProblem::builder()
            .provider(FailingProvider)
            .specs(vec![spec("a", 0.0, 2.0)])
            .out_of_lik(vec!["a".to_string()])
            .build();
        assert!(matches!(result, Err(ConfigurationError::OutOfLikCollision(_))));
    }

    #[test]
    fn test_current_value_outside_bounds_is_rejected() {
        let result = EstimationProblem::builder()
            .provider(FailingProvider)
            .specs(vec![spec("b", 0.0, 1.0)])
            .build();
        assert!(matches!(
            result,
            Err(ConfigurationError::StartOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_neg_log_posterior_is_pure_and_penalizes_failures() {
        let problem = EstimationProblem::builder()
            .provider(FailingProvider)
            .specs(vec![
                ParameterSpec::builder()
                    .name("a")
                    .lower(0.0)
                    .upper(2.0)
                    .prior(Prior::from_mean_std(Family::Normal, 0.5, 0.5).unwrap())
                    .build()
                    .unwrap(),
            ])
            .build()
            .unwrap();

        let free = problem.inverse_expand(&array![0.7]);
        let first = problem.neg_log_posterior(&free);
        let second = problem.neg_log_posterior(&free);
        assert_eq!(first.to_bits(), second.to_bits());

        let prior = Prior::from_mean_std(Family::Normal, 0.5, 0.5).unwrap();
        assert_relative_eq!(
            first,
            0.49 + 2.0 - prior.ln_density(0.7),
            max_relative = 1e-12
        );

        let infeasible = problem.inverse_expand(&array![1.5]);
        assert_eq!(problem.neg_log_posterior(&infeasible), DEFAULT_PENALTY);
        assert!(problem.evaluate_natural(&[1.5]).is_err());
        assert!(matches!(
            problem.evaluate_natural(&[2.5]),
            Err(EvaluationFailure::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_model_vector_keeps_fixed_parameters() {
        let problem = EstimationProblem::builder()
            .provider(FailingProvider)
            .specs(vec![spec("a", 0.0, 2.0)])
            .build()
            .unwrap();
        assert_eq!(problem.model_vector(&[0.9]), vec![0.9, 2.0]);
        assert_eq!(problem.start(), &array![0.5]);
    }

    #[test]
    fn test_variance_factor_and_out_of_lik() {
        let problem = EstimationProblem::builder()
            .provider(FailingProvider)
            .specs(vec![spec("a", 0.0, 2.0)])
            .out_of_lik(vec!["scale".to_string()])
            .variance_factor(true)
            .build()
            .unwrap();

        let evaluation = problem.evaluate_natural(&[0.5]).unwrap();
        assert_relative_eq!(evaluation.variance_factor, 1.0);
        assert_eq!(evaluation.concentrated, vec![("scale".to_string(), 3.0)]);

        let expected = ResidualTerms {
            n_obs: 10,
            weighted_rss: 10.0,
            log_det: 0.0,
        }
        .concentrated_neg_log_lik()
        .unwrap();
        assert_relative_eq!(evaluation.neg_log_lik, expected);
    }

    #[test]
    fn test_variance_factor_without_residuals_fails() {
        let problem = EstimationProblem::builder()
            .provider(ConstantProvider {
                names: vec!["x".into()],
                current: vec![0.0],
                value: 1.0,
            })
            .specs(vec![spec("x", -1.0, 1.0)])
            .variance_factor(true)
            .build()
            .unwrap();
        assert!(matches!(
            problem.evaluate_natural(&[0.0]),
            Err(EvaluationFailure::MissingResiduals)
        ));
    }
}
