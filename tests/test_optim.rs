//! Tests for the posterior mode search.
//!
//! The scenarios use the Gaussian regression provider, whose posterior is known in closed
//! form for normal priors on the coefficients and a fixed noise level.

#[cfg(test)]
mod test_optim {
    use approx::assert_relative_eq;
    use bayesian_estimation::prelude::*;
    use ndarray::{array, Array1, Array2};
    use pretty_assertions::assert_eq;

    fn constant_mean_model(y: &[f64]) -> GaussianRegression {
        // y_i = mu + e_i with sigma held at its current value 1
        GaussianRegression::builder()
            .x(Array2::ones((y.len(), 1)))
            .y(Array1::from(y.to_vec()))
            .current(vec![f64::NAN, 1.0])
            .build()
            .unwrap()
    }

    fn line_model() -> GaussianRegression {
        GaussianRegression::builder()
            .x(array![[0.0], [1.0], [2.0], [3.0], [4.0]])
            .y(array![1.1, 2.9, 5.2, 6.8, 9.0])
            .intercept(true)
            .current(vec![f64::NAN, 1.0])
            .build()
            .unwrap()
    }

    #[test]
    fn test_conjugate_normal_posterior() {
        // ARRANGE
        let y = [0.8, 1.7, 1.1, 0.4, 1.5, 1.2, 0.9, 1.6];
        let (m0, s0) = (0.0, 2.0);
        let spec = ParameterSpec::builder()
            .name("beta_0")
            .prior(Prior::from_mean_std(Family::Normal, m0, s0).unwrap())
            .build()
            .unwrap();
        let problem = EstimationProblem::builder()
            .provider(constant_mean_model(&y))
            .specs(vec![spec])
            .build()
            .unwrap();

        // ACT
        let posterior = PosteriorModeOptimizer::new(OptimizerConfig::default())
            .maximize(problem)
            .unwrap();

        // ASSERT
        let precision = 1.0 / (s0 * s0) + y.len() as f64;
        let mean = (m0 / (s0 * s0) + y.iter().sum::<f64>()) / precision;
        assert_relative_eq!(posterior.mode()[0], mean, epsilon = 1e-5);
        assert_relative_eq!(posterior.covariance()[[0, 0]], 1.0 / precision, max_relative = 1e-3);
        assert_relative_eq!(
            posterior.estimate().hessian_prior[[0, 0]],
            1.0 / (s0 * s0),
            max_relative = 1e-6
        );
        assert_relative_eq!(
            posterior.estimate().hessian_data[[0, 0]],
            y.len() as f64,
            max_relative = 1e-3
        );
    }

    #[test]
    fn test_concentrated_intercept() {
        // ARRANGE
        let spec = ParameterSpec::builder().name("beta_0").build().unwrap();
        let problem = EstimationProblem::builder()
            .provider(line_model())
            .specs(vec![spec])
            .out_of_lik(vec!["intercept".to_string()])
            .build()
            .unwrap();

        // ACT
        let posterior = PosteriorModeOptimizer::new(OptimizerConfig::default())
            .maximize(problem)
            .unwrap();

        // ASSERT
        let estimate = posterior.estimate();
        assert_relative_eq!(estimate.mode[0], 1.97, epsilon = 1e-5);
        assert_relative_eq!(estimate.concentrated["intercept"], 1.06, epsilon = 1e-5);
        // sigma^2 / Sxx
        assert_relative_eq!(estimate.covariance[[0, 0]], 0.1, max_relative = 1e-3);
        assert_eq!(estimate.variance_factor, 1.0);
    }

    #[test]
    fn test_variance_factor_rescales_shock_std() {
        // ARRANGE
        let specs = vec![
            ParameterSpec::builder().name("beta_0").build().unwrap(),
            ParameterSpec::builder()
                .name("sigma")
                .lower(0.0)
                .start(1.0)
                .shock_std(true)
                .build()
                .unwrap(),
        ];
        let problem = EstimationProblem::builder()
            .provider(line_model())
            .specs(specs)
            .out_of_lik(vec!["intercept".to_string()])
            .variance_factor(true)
            .build()
            .unwrap();

        // ACT
        let posterior = PosteriorModeOptimizer::new(OptimizerConfig::default())
            .maximize(problem)
            .unwrap();

        // ASSERT
        let estimate = posterior.estimate();
        let residuals = [1.1 - 1.06, 2.9 - 3.03, 5.2 - 5.0, 6.8 - 6.97, 9.0 - 8.94];
        let rss: f64 = residuals.iter().map(|r| r * r).sum();
        let sigma = estimate.mode[1];
        assert_relative_eq!(estimate.mode[0], 1.97, epsilon = 1e-4);
        assert_relative_eq!(
            estimate.variance_factor,
            rss / 5.0 / (sigma * sigma),
            max_relative = 1e-4
        );
        let scaled = estimate.scaled_shock_stds();
        assert_eq!(scaled.len(), 1);
        assert_relative_eq!(scaled[0].1, (rss / 5.0).sqrt(), max_relative = 1e-4);
    }

    #[test]
    fn test_neighbourhood_of_conjugate_mode() {
        // ARRANGE
        let y = [0.2, -0.4, 0.9, 0.1];
        let spec = ParameterSpec::builder()
            .name("beta_0")
            .prior(Prior::from_mean_std(Family::Normal, 0.0, 1.0).unwrap())
            .build()
            .unwrap();
        let problem = EstimationProblem::builder()
            .provider(constant_mean_model(&y))
            .specs(vec![spec])
            .build()
            .unwrap();
        let posterior = PosteriorModeOptimizer::new(OptimizerConfig::default())
            .maximize(problem)
            .unwrap();
        let config = NeighbourhoodConfig::builder()
            .multiplier_grid("0.5:0.25:1.5".parse().unwrap())
            .build();

        // ACT
        let grid = neighbourhood(&posterior, &config, None);

        // ASSERT
        let sweep = grid.parameter("beta_0").unwrap();
        assert_eq!(sweep.points.len(), 5);
        let at_mode = sweep.points.iter().find(|p| p.multiplier == 1.0).unwrap();
        assert_eq!(at_mode.neg_log_posterior, grid.mode_objective);
        assert!(sweep.mode_is_locally_optimal(grid.mode_objective));
        assert!(grid.improving_parameters().is_empty());
        assert!(!grid.cancelled);
    }

    #[test]
    fn test_estimate_persistence_round_trip() {
        // ARRANGE
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("estimate.json");
        let spec = ParameterSpec::builder().name("beta_0").build().unwrap();
        let problem = || {
            EstimationProblem::builder()
                .provider(line_model())
                .specs(vec![spec.clone()])
                .out_of_lik(vec!["intercept".to_string()])
                .build()
                .unwrap()
        };
        let posterior = PosteriorModeOptimizer::new(OptimizerConfig::default())
            .maximize(problem())
            .unwrap();

        // ACT
        save_estimate(&path, posterior.estimate()).unwrap();
        let loaded = load_estimate(&path).unwrap();
        let rebound = PosteriorEstimate::from_mode_estimate(problem(), loaded.clone()).unwrap();

        // ASSERT
        assert_eq!(&loaded, posterior.estimate());
        assert_eq!(
            loaded.mode[0].to_bits(),
            posterior.estimate().mode[0].to_bits()
        );
        assert_eq!(rebound.names(), posterior.names());
    }

    #[test]
    fn test_rebinding_to_other_parameters_fails() {
        // ARRANGE
        let spec = ParameterSpec::builder().name("beta_0").build().unwrap();
        let problem = EstimationProblem::builder()
            .provider(line_model())
            .specs(vec![spec])
            .build()
            .unwrap();
        let mut estimate = PosteriorModeOptimizer::new(OptimizerConfig::default())
            .maximize(problem.clone())
            .unwrap()
            .estimate()
            .clone();
        estimate.names = vec!["sigma".to_string()];

        // ACT
        let result = PosteriorEstimate::from_mode_estimate(problem, estimate);

        // ASSERT
        assert!(matches!(result, Err(OptimizeError::NameMismatch { .. })));
    }
}
