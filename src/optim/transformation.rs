//! Bound-preserving reparameterizations between the natural parameter space and the
//! unbounded space the optimizer searches.

use serde::{Deserialize, Serialize};

/// How far a value sitting on a bound is pulled inside, as a fraction of the range for
/// two-sided bounds and in absolute terms otherwise.
const BOUNDARY_NUDGE: f64 = 1e-6;

/// Maps one parameter between its natural (possibly bounded) domain and the real line.
///
/// * `Logistic`: x = l + (u − l) / (1 + e^(−z))
/// * `LowerBounded`: x = l + e^z
/// * `UpperBounded`: x = u − e^z
/// * `Identity`: x = z
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Transformation {
    Identity,
    LowerBounded { lower: f64 },
    UpperBounded { upper: f64 },
    Logistic { lower: f64, upper: f64 },
}

impl Transformation {
    /// Picks the transformation matching the finiteness of the bounds.
    pub fn from_bounds(lower: f64, upper: f64) -> Self {
        match (lower.is_finite(), upper.is_finite()) {
            (true, true) => Transformation::Logistic { lower, upper },
            (true, false) => Transformation::LowerBounded { lower },
            (false, true) => Transformation::UpperBounded { upper },
            (false, false) => Transformation::Identity,
        }
    }

    /// Maps a free value to the natural domain.
    pub fn apply_forward(&self, z: f64) -> f64 {
        match *self {
            Transformation::Identity => z,
            Transformation::LowerBounded { lower } => lower + z.exp(),
            Transformation::UpperBounded { upper } => upper - z.exp(),
            Transformation::Logistic { lower, upper } => {
                lower + (upper - lower) * logistic(z)
            }
        }
    }

    /// Maps a natural value to the free domain.
    ///
    /// Values on (or numerically indistinguishable from) a bound are moved inside first, so
    /// the result is always finite for values within the bounds.
    pub fn apply_back(&self, x: f64) -> f64 {
        match *self {
            Transformation::Identity => x,
            Transformation::LowerBounded { lower } => {
                let gap = (x - lower).max(BOUNDARY_NUDGE);
                gap.ln()
            }
            Transformation::UpperBounded { upper } => {
                let gap = (upper - x).max(BOUNDARY_NUDGE);
                gap.ln()
            }
            Transformation::Logistic { lower, upper } => {
                let range = upper - lower;
                let p = ((x - lower) / range).clamp(BOUNDARY_NUDGE, 1.0 - BOUNDARY_NUDGE);
                (p / (1.0 - p)).ln()
            }
        }
    }

    /// Derivative dx/dz of the forward map at the free value `z`.
    pub fn jacobian(&self, z: f64) -> f64 {
        match *self {
            Transformation::Identity => 1.0,
            Transformation::LowerBounded { .. } => z.exp(),
            Transformation::UpperBounded { .. } => -z.exp(),
            Transformation::Logistic { lower, upper } => {
                let s = logistic(z);
                (upper - lower) * s * (1.0 - s)
            }
        }
    }

    /// Second derivative d²x/dz² of the forward map at `z`.
    pub fn second_derivative(&self, z: f64) -> f64 {
        match *self {
            Transformation::Identity => 0.0,
            Transformation::LowerBounded { .. } => z.exp(),
            Transformation::UpperBounded { .. } => -z.exp(),
            Transformation::Logistic { lower, upper } => {
                let s = logistic(z);
                (upper - lower) * s * (1.0 - s) * (1.0 - 2.0 * s)
            }
        }
    }
}

fn logistic(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}
