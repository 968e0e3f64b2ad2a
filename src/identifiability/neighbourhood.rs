//! Neighbourhood sweep around the posterior mode.
//!
//! Each estimated parameter is scaled by every multiplier of a [`MultiplierGrid`] while the
//! others stay at the mode. The resulting one-dimensional slices of the posterior show
//! whether the mode really is a local maximum and how sharply each parameter is identified.

use std::ops::ControlFlow;

use serde::{Deserialize, Serialize};

use crate::optim::{ObjectiveProvider, PosteriorEstimate};
use crate::progress::progress_bar;

use super::grid::MultiplierGrid;
use super::results::{NeighbourhoodGrid, NeighbourhoodPoint, ParameterNeighbourhood};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, bon::Builder)]
#[serde(default)]
pub struct NeighbourhoodConfig {
    #[builder(default)]
    pub multiplier_grid: MultiplierGrid,
    #[builder(default)]
    pub show_progress: bool,
}

/// Progress reported after every evaluated grid point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NeighbourhoodProgress<'a> {
    pub parameter: &'a str,
    pub completed: usize,
    pub total: usize,
}

/// Evaluates the posterior along every coordinate axis through the mode.
///
/// # Arguments
///
/// * `posterior` - Mode estimate and the problem it belongs to
/// * `config` - Multiplier grid and progress display
/// * `progress` - Optional callback after each point; `Break` stops the sweep
///
/// # Returns
///
/// A `NeighbourhoodGrid` with one entry per parameter. Points that cannot be evaluated carry
/// `NaN` objectives. After a cancellation the grid holds the parameters completed so far and
/// is flagged `cancelled`.
///
/// # Notes
///
/// - The multiplier 1.0 reproduces the objective at the mode exactly.
/// - A zero mode value gives the same point for every multiplier.
pub fn neighbourhood<P: ObjectiveProvider>(
    posterior: &PosteriorEstimate<P>,
    config: &NeighbourhoodConfig,
    mut progress: Option<&mut dyn FnMut(NeighbourhoodProgress<'_>) -> ControlFlow<()>>,
) -> NeighbourhoodGrid {
    let problem = posterior.problem();
    let mode = posterior.mode().to_vec();
    let grid = &config.multiplier_grid;
    let total = mode.len() * grid.len();

    log::info!(
        "Sweeping {} multipliers around the mode of {} parameters",
        grid.len(),
        mode.len()
    );
    let bar = progress_bar("Neighbourhood", total as u64, config.show_progress);

    let mut parameters = Vec::with_capacity(mode.len());
    let mut completed = 0;
    let mut cancelled = false;

    'sweep: for (i, name) in posterior.names().iter().enumerate() {
        let mut points = Vec::with_capacity(grid.len());
        let mut point = mode.clone();

        for multiplier in grid.iter() {
            point[i] = multiplier * mode[i];
            let (neg_log_posterior, neg_log_lik) = match problem.evaluate_natural(&point) {
                Ok(evaluation) => (evaluation.neg_log_posterior, evaluation.neg_log_lik),
                Err(failure) => {
                    log::debug!("{name} x {multiplier}: {failure}");
                    (f64::NAN, f64::NAN)
                }
            };
            points.push(NeighbourhoodPoint {
                multiplier,
                value: point[i],
                neg_log_posterior,
                neg_log_lik,
            });

            completed += 1;
            bar.inc(1);
            if let Some(callback) = progress.as_mut() {
                let report = NeighbourhoodProgress {
                    parameter: name,
                    completed,
                    total,
                };
                if callback(report).is_break() {
                    cancelled = true;
                    break 'sweep;
                }
            }
        }

        parameters.push(ParameterNeighbourhood {
            name: name.clone(),
            mode_value: mode[i],
            points,
        });
    }

    if cancelled {
        log::warn!("Neighbourhood sweep cancelled after {completed} of {total} points");
        bar.abandon_with_message("Cancelled");
    } else {
        bar.finish_with_message("Done");
    }

    let grid = NeighbourhoodGrid {
        mode_objective: posterior.estimate().neg_log_posterior,
        parameters,
        cancelled,
    };
    let improving = grid.improving_parameters();
    if !improving.is_empty() {
        log::warn!("Perturbing {improving:?} improves on the mode; the search may not have converged");
    }
    grid
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optim::{
        EstimationProblem, OptimizerConfig, ParameterSpec, PosteriorModeOptimizer,
    };
    use crate::optim::objective::ProviderError;
    use crate::priors::{Family, Prior};

    struct Parabola;

    impl ObjectiveProvider for Parabola {
        fn parameter_names(&self) -> Vec<String> {
            vec!["a".into(), "b".into()]
        }

        fn current_values(&self) -> Vec<f64> {
            vec![1.0, 1.0]
        }

        fn raw_neg_log_lik(&self, params: &[f64]) -> Result<f64, ProviderError> {
            Ok((params[0] - 2.0).powi(2) + 3.0 * (params[1] - 1.0).powi(2))
        }
    }

    fn posterior() -> PosteriorEstimate<Parabola> {
        let specs = vec![
            ParameterSpec::builder()
                .name("a")
                .lower(0.0)
                .upper(2.05)
                .build()
                .unwrap(),
            ParameterSpec::builder()
                .name("b")
                .prior(Prior::from_mean_std(Family::Normal, 1.0, 1.0).unwrap())
                .build()
                .unwrap(),
        ];
        let problem = EstimationProblem::builder()
            .provider(Parabola)
            .specs(specs)
            .build()
            .unwrap();
        PosteriorModeOptimizer::new(OptimizerConfig::default())
            .maximize(problem)
            .unwrap()
    }

    #[test]
    fn test_identity_multiplier_reproduces_mode_objective() {
        let posterior = posterior();
        let grid = neighbourhood(&posterior, &NeighbourhoodConfig::default(), None);

        assert!(!grid.cancelled);
        assert_eq!(grid.parameters.len(), 2);
        for parameter in &grid.parameters {
            assert_eq!(parameter.points.len(), 21);
            let identity = parameter
                .points
                .iter()
                .find(|p| p.multiplier == 1.0)
                .unwrap();
            assert_eq!(
                identity.neg_log_posterior.to_bits(),
                grid.mode_objective.to_bits()
            );
        }
        assert!(grid.improving_parameters().is_empty());
    }

    #[test]
    fn test_points_outside_bounds_are_nan() {
        let posterior = posterior();
        let grid = neighbourhood(&posterior, &NeighbourhoodConfig::default(), None);

        // a sits at 2.0 with an upper bound of 2.05, so multipliers above 1.025 leave the box.
        let a = grid.parameter("a").unwrap();
        let last = a.points.last().unwrap();
        assert!(last.neg_log_posterior.is_nan());
        assert!(a.points[0].neg_log_posterior.is_finite());
    }

    #[test]
    fn test_cancellation_stops_sweep() {
        let posterior = posterior();
        let mut calls = 0;
        let mut stop_after_five = |_: NeighbourhoodProgress<'_>| {
            calls += 1;
            if calls == 5 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        };
        let grid = neighbourhood(
            &posterior,
            &NeighbourhoodConfig::default(),
            Some(&mut stop_after_five),
        );

        assert!(grid.cancelled);
        assert!(grid.parameters.is_empty());
        assert_eq!(calls, 5);
    }
}
