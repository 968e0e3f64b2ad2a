use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use bayesian_estimation::prelude::*;
use ndarray::{Array1, Array2};

fn setup_posterior(num_regressors: usize) -> PosteriorEstimate<GaussianRegression> {
    // Deterministic design with y = sum of regressors plus a small wiggle
    let n = 200;
    let x = Array2::from_shape_fn((n, num_regressors), |(i, j)| ((i * (j + 3)) % 17) as f64 / 17.0);
    let y: Array1<f64> = (0..n)
        .map(|i| x.row(i).sum() + 0.1 * (i as f64).sin())
        .collect();
    let provider = GaussianRegression::builder()
        .x(x)
        .y(y)
        .intercept(true)
        .build()
        .unwrap();

    let mut specs: Vec<ParameterSpec> = (0..num_regressors)
        .map(|j| {
            ParameterSpec::builder()
                .name(format!("beta_{j}"))
                .prior(Prior::from_mean_std(Family::Normal, 0.0, 10.0).unwrap())
                .build()
                .unwrap()
        })
        .collect();
    specs.push(
        ParameterSpec::builder()
            .name("sigma")
            .lower(0.0)
            .start(0.5)
            .prior(Prior::from_mean_std(Family::InverseGamma, 0.5, 0.5).unwrap())
            .build()
            .unwrap(),
    );

    let problem = EstimationProblem::builder()
        .provider(provider)
        .specs(specs)
        .out_of_lik(vec![INTERCEPT.to_string()])
        .build()
        .unwrap();

    PosteriorModeOptimizer::new(OptimizerConfig::default())
        .maximize(problem)
        .unwrap()
}

fn benchmark_sampler(c: &mut Criterion) {
    let posterior = setup_posterior(3);
    let config = SamplerConfig::builder().random_seed(0).build();
    let adaptive = SamplerConfig::builder()
        .random_seed(0)
        .adapt_proposal_covariance(true)
        .build();

    c.bench_function("metropolis_2000_draws", |b| {
        b.iter(|| {
            let _ = black_box(sample(black_box(&posterior), 2_000, &config, None));
        });
    });

    c.bench_function("adaptive_covariance_2000_draws", |b| {
        b.iter(|| {
            let _ = black_box(sample(black_box(&posterior), 2_000, &adaptive, None));
        });
    });

    c.bench_function("posterior_mode", |b| {
        b.iter(|| black_box(setup_posterior(3)));
    });
}

criterion_group!(benches, benchmark_sampler);
criterion_main!(benches);
