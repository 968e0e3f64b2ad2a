use std::fmt;

use serde::{Deserialize, Serialize};
use tabled::{builder::Builder, settings::Style};

/// Posterior terms after scaling one mode coordinate by `multiplier`.
///
/// Objective values are `NaN` where the perturbed point could not be evaluated, for
/// example because it left the parameter bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeighbourhoodPoint {
    pub multiplier: f64,
    /// Perturbed parameter value
    pub value: f64,
    #[serde(with = "crate::io::nullable_f64")]
    pub neg_log_posterior: f64,
    #[serde(with = "crate::io::nullable_f64")]
    pub neg_log_lik: f64,
}

impl NeighbourhoodPoint {
    pub fn is_evaluated(&self) -> bool {
        self.neg_log_posterior.is_finite()
    }
}

/// Sweep results for one parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterNeighbourhood {
    pub name: String,
    pub mode_value: f64,
    pub points: Vec<NeighbourhoodPoint>,
}

impl ParameterNeighbourhood {
    /// Point with the lowest negative log posterior, ignoring failed evaluations.
    pub fn best_point(&self) -> Option<&NeighbourhoodPoint> {
        self.points
            .iter()
            .filter(|p| p.is_evaluated())
            .min_by(|a, b| a.neg_log_posterior.total_cmp(&b.neg_log_posterior))
    }

    /// Whether no evaluated point improves on `mode_objective`.
    pub fn mode_is_locally_optimal(&self, mode_objective: f64) -> bool {
        self.best_point()
            .map_or(true, |p| p.neg_log_posterior >= mode_objective)
    }

    pub fn failed_points(&self) -> usize {
        self.points.iter().filter(|p| !p.is_evaluated()).count()
    }
}

/// Results of a neighbourhood sweep around the posterior mode.
///
/// # Notes
///
/// - `parameters` follows the estimated-parameter order and only holds the parameters
///   reached before a cancellation.
/// - `mode_objective` is the negative log posterior at the unperturbed mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeighbourhoodGrid {
    pub mode_objective: f64,
    pub parameters: Vec<ParameterNeighbourhood>,
    pub cancelled: bool,
}

impl NeighbourhoodGrid {
    pub fn parameter(&self, name: &str) -> Option<&ParameterNeighbourhood> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Names of the parameters along which a perturbation beats the mode.
    pub fn improving_parameters(&self) -> Vec<&str> {
        self.parameters
            .iter()
            .filter(|p| !p.mode_is_locally_optimal(self.mode_objective))
            .map(|p| p.name.as_str())
            .collect()
    }
}

impl fmt::Display for NeighbourhoodGrid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut builder = Builder::default();
        builder.push_record([
            "Parameter",
            "Mode",
            "Best multiplier",
            "Δ objective",
            "Failed",
        ]);

        for parameter in &self.parameters {
            let (multiplier, delta) = match parameter.best_point() {
                Some(point) => (
                    format!("{:.4}", point.multiplier),
                    format!("{:.3e}", point.neg_log_posterior - self.mode_objective),
                ),
                None => ("-".to_string(), "-".to_string()),
            };
            builder.push_record([
                parameter.name.clone(),
                format!("{:.6}", parameter.mode_value),
                multiplier,
                delta,
                parameter.failed_points().to_string(),
            ]);
        }

        let mut table = builder.build();
        table.with(Style::rounded());
        write!(f, "{table}")?;
        if self.cancelled {
            write!(f, "\nSweep cancelled after {} parameter(s)", self.parameters.len())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(multiplier: f64, neg_log_posterior: f64) -> NeighbourhoodPoint {
        NeighbourhoodPoint {
            multiplier,
            value: multiplier,
            neg_log_posterior,
            neg_log_lik: neg_log_posterior,
        }
    }

    #[test]
    fn test_best_point_skips_failures() {
        let parameter = ParameterNeighbourhood {
            name: "rho".into(),
            mode_value: 1.0,
            points: vec![point(0.9, 2.0), point(1.0, 1.0), point(1.1, f64::NAN)],
        };
        assert_eq!(parameter.best_point().unwrap().multiplier, 1.0);
        assert_eq!(parameter.failed_points(), 1);
        assert!(parameter.mode_is_locally_optimal(1.0));
        assert!(!parameter.mode_is_locally_optimal(1.5));
    }

    #[test]
    fn test_failed_points_serialize_as_null() {
        let json = serde_json::to_string(&point(1.1, f64::NAN)).unwrap();
        assert!(json.contains("\"neg_log_posterior\":null"));
        let back: NeighbourhoodPoint = serde_json::from_str(&json).unwrap();
        assert!(back.neg_log_posterior.is_nan());
    }
}
