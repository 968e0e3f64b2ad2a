//! Multiplier grids for the neighbourhood sweep.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::NeighbourhoodError;

/// Largest number of multipliers a range may expand to.
pub const MAX_GRID_POINTS: usize = 1_000_000;

/// Strictly increasing, finite multipliers applied to one mode coordinate at a time.
///
/// A grid is written either as `from:step:to` (both ends included) or as a comma-separated
/// list of values.
///
/// ```
/// use bayesian_estimation::identifiability::MultiplierGrid;
///
/// let grid: MultiplierGrid = "0.9:0.05:1.1".parse().unwrap();
/// assert_eq!(grid.len(), 5);
/// assert!(grid.values().contains(&1.0));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "GridRepr", into = "Vec<f64>")]
pub struct MultiplierGrid {
    values: Vec<f64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum GridRepr {
    Range(String),
    Values(Vec<f64>),
}

impl TryFrom<GridRepr> for MultiplierGrid {
    type Error = NeighbourhoodError;

    fn try_from(repr: GridRepr) -> Result<Self, Self::Error> {
        match repr {
            GridRepr::Range(input) => input.parse(),
            GridRepr::Values(values) => MultiplierGrid::new(values),
        }
    }
}

impl From<MultiplierGrid> for Vec<f64> {
    fn from(grid: MultiplierGrid) -> Self {
        grid.values
    }
}

impl MultiplierGrid {
    /// Validates an explicit list of multipliers.
    ///
    /// # Errors
    ///
    /// * `NeighbourhoodError::EmptyGrid` - If no values are given
    /// * `NeighbourhoodError::NonFinite` - If a value is NaN or infinite
    /// * `NeighbourhoodError::NotIncreasing` - If the values are not strictly increasing
    pub fn new(values: Vec<f64>) -> Result<Self, NeighbourhoodError> {
        if values.is_empty() {
            return Err(NeighbourhoodError::EmptyGrid);
        }
        if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
            return Err(NeighbourhoodError::NonFinite(*bad));
        }
        if let Some(pair) = values.windows(2).find(|w| w[1] <= w[0]) {
            return Err(NeighbourhoodError::NotIncreasing {
                previous: pair[0],
                next: pair[1],
            });
        }
        Ok(Self { values })
    }

    /// Evenly spaced multipliers from `from` to `to` inclusive.
    ///
    /// # Arguments
    ///
    /// * `from` - First multiplier
    /// * `step` - Positive spacing between consecutive multipliers
    /// * `to` - Last multiplier, included when it lies on the grid
    pub fn from_range(from: f64, step: f64, to: f64) -> Result<Self, NeighbourhoodError> {
        let invalid = |message: &str| NeighbourhoodError::Parse {
            input: format!("{from}:{step}:{to}"),
            message: message.to_string(),
        };
        if !(from.is_finite() && step.is_finite() && to.is_finite()) {
            return Err(invalid("bounds and step must be finite"));
        }
        if step <= 0.0 {
            return Err(invalid("step must be positive"));
        }
        if to < from {
            return Err(invalid("upper end lies below the lower end"));
        }
        let points = (to - from) / step + 1.0;
        if !points.is_finite() || points > MAX_GRID_POINTS as f64 {
            return Err(invalid(&format!(
                "range expands to more than {MAX_GRID_POINTS} multipliers"
            )));
        }
        Self::new(range_values(from, step, to))
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.values.iter().copied()
    }
}

/// 0.95 to 1.05 in steps of 0.005.
impl Default for MultiplierGrid {
    fn default() -> Self {
        Self {
            values: range_values(0.95, 0.005, 1.05),
        }
    }
}

fn range_values(from: f64, step: f64, to: f64) -> Vec<f64> {
    let n = ((to - from) / step + 1e-9).floor() as usize + 1;
    (0..n)
        .map(|k| {
            let value = from + k as f64 * step;
            // The identity multiplier must reproduce the mode exactly.
            if (value - 1.0).abs() < step * 1e-9 {
                1.0
            } else {
                value
            }
        })
        .collect()
}

impl FromStr for MultiplierGrid {
    type Err = NeighbourhoodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse_error = |message: String| NeighbourhoodError::Parse {
            input: s.to_string(),
            message,
        };
        let number = |part: &str| {
            part.trim()
                .parse::<f64>()
                .map_err(|e| parse_error(format!("'{}': {e}", part.trim())))
        };

        if s.contains(':') {
            let parts: Vec<&str> = s.split(':').collect();
            if parts.len() != 3 {
                return Err(parse_error("expected from:step:to".into()));
            }
            let (from, step, to) = (number(parts[0])?, number(parts[1])?, number(parts[2])?);
            MultiplierGrid::from_range(from, step, to).map_err(|e| match e {
                NeighbourhoodError::Parse { message, .. } => parse_error(message),
                other => other,
            })
        } else {
            let values = s.split(',').map(number).collect::<Result<Vec<_>, _>>()?;
            MultiplierGrid::new(values)
        }
    }
}

impl fmt::Display for MultiplierGrid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values: Vec<String> = self.values.iter().map(|v| v.to_string()).collect();
        write!(f, "{}", values.join(","))
    }
}
