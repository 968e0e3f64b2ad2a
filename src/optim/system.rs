//! `argmin` adaptor for the negative log posterior in free parameter space.
//!
//! Every cost evaluation is counted against the function-evaluation budget and the best
//! point seen so far is remembered, so a run cut short by the budget or by a solver error
//! still yields a usable estimate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use argmin::core::{CostFunction, Gradient};
use finitediff::FiniteDiff;
use ndarray::Array1;
use thiserror::Error;

use crate::optim::objective::ObjectiveProvider;
use crate::optim::problem::EstimationProblem;

/// Raised inside the solver once the evaluation budget is spent.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Function evaluation budget of {0} exhausted")]
pub struct BudgetExhausted(pub u64);

#[derive(Debug, Clone)]
struct BestPoint {
    param: Option<Array1<f64>>,
    cost: f64,
}

/// Shared evaluation bookkeeping, readable after the executor has consumed the objective.
#[derive(Debug, Clone)]
pub struct EvaluationTracker {
    count: Arc<AtomicU64>,
    best: Arc<Mutex<BestPoint>>,
}

impl EvaluationTracker {
    fn new() -> Self {
        Self {
            count: Arc::new(AtomicU64::new(0)),
            best: Arc::new(Mutex::new(BestPoint {
                param: None,
                cost: f64::INFINITY,
            })),
        }
    }

    pub fn evaluations(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Lowest-cost point evaluated so far.
    pub fn best(&self) -> Option<(Array1<f64>, f64)> {
        let best = self.best.lock().ok()?;
        best.param.clone().map(|p| (p, best.cost))
    }

    fn record(&self, param: &Array1<f64>, cost: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut best) = self.best.lock() {
            if cost < best.cost {
                best.cost = cost;
                best.param = Some(param.clone());
            }
        }
    }
}

/// Budgeted view of an [`EstimationProblem`] for the `argmin` solvers.
pub struct PosteriorObjective<'a, P: ObjectiveProvider> {
    problem: &'a EstimationProblem<P>,
    max_evaluations: u64,
    tracker: EvaluationTracker,
}

impl<'a, P: ObjectiveProvider> PosteriorObjective<'a, P> {
    pub fn new(problem: &'a EstimationProblem<P>, max_evaluations: u64) -> Self {
        Self {
            problem,
            max_evaluations,
            tracker: EvaluationTracker::new(),
        }
    }

    pub fn tracker(&self) -> EvaluationTracker {
        self.tracker.clone()
    }

    fn remaining(&self) -> u64 {
        self.max_evaluations
            .saturating_sub(self.tracker.evaluations())
    }

    fn evaluate(&self, param: &Array1<f64>) -> f64 {
        let cost = self.problem.neg_log_posterior(param);
        self.tracker.record(param, cost);
        cost
    }
}

impl<P: ObjectiveProvider> CostFunction for PosteriorObjective<'_, P> {
    type Param = Array1<f64>;
    type Output = f64;

    fn cost(&self, param: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
        if self.remaining() == 0 {
            return Err(BudgetExhausted(self.max_evaluations).into());
        }
        Ok(self.evaluate(param))
    }
}

impl<P: ObjectiveProvider> Gradient for PosteriorObjective<'_, P> {
    type Param = Array1<f64>;
    type Gradient = Array1<f64>;

    /// Central finite differences, `2n` cost evaluations.
    fn gradient(&self, param: &Self::Param) -> Result<Self::Gradient, argmin::core::Error> {
        if self.remaining() < 2 * param.len() as u64 {
            return Err(BudgetExhausted(self.max_evaluations).into());
        }
        let cost_fn = |p: &Array1<f64>| self.evaluate(p);
        Ok(param.central_diff(&cost_fn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optim::parameter::ParameterSpec;
    use crate::optim::problem::tests::ConstantProvider;
    use ndarray::array;

    fn problem() -> EstimationProblem<ConstantProvider> {
        EstimationProblem::builder()
            .provider(ConstantProvider {
                names: vec!["x".into()],
                current: vec![0.0],
                value: 2.0,
            })
            .specs(vec![ParameterSpec::builder().name("x").build().unwrap()])
            .build()
            .unwrap()
    }

    #[test]
    fn test_budget_is_enforced() {
        let problem = problem();
        let objective = PosteriorObjective::new(&problem, 3);
        let x = array![0.0];

        assert!(objective.cost(&x).is_ok());
        assert!(objective.gradient(&x).is_ok());
        let err = objective.cost(&x).unwrap_err();
        assert!(err.downcast_ref::<BudgetExhausted>().is_some());
        assert_eq!(objective.tracker().evaluations(), 3);
    }

    #[test]
    fn test_best_point_is_tracked() {
        let problem = problem();
        let objective = PosteriorObjective::new(&problem, 100);
        objective.cost(&array![1.0]).unwrap();
        let (best, cost) = objective.tracker().best().unwrap();
        assert_eq!(best, array![1.0]);
        assert_eq!(cost, 2.0);
    }
}
