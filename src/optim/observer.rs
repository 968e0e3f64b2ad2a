use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use argmin::core::{observers::Observe, Error, State, KV};
use thiserror::Error;

/// Snapshot handed to the optimizer progress callback after every iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptimizerProgress {
    pub iteration: u64,
    pub cost: f64,
    pub best_cost: f64,
}

/// Returned to the executor when the progress callback asks to stop.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Optimization cancelled by the progress callback")]
pub struct OptimizationCancelled;

pub type ProgressCallback = Box<dyn FnMut(OptimizerProgress) -> ControlFlow<()> + Send>;

/// Counts iterations and forwards progress to an optional callback.
///
/// The iteration count lives behind an `Arc` so it stays readable when the executor
/// aborts with an error and its state is lost.
pub struct IterationObserver {
    iterations: Arc<AtomicU64>,
    callback: Option<ProgressCallback>,
}

impl IterationObserver {
    pub fn new(callback: Option<ProgressCallback>) -> (Self, Arc<AtomicU64>) {
        let iterations = Arc::new(AtomicU64::new(0));
        let observer = Self {
            iterations: Arc::clone(&iterations),
            callback,
        };
        (observer, iterations)
    }
}

impl<I> Observe<I> for IterationObserver
where
    I: State<Float = f64>,
{
    fn observe_init(&mut self, _msg: &str, _state: &I, _kv: &KV) -> Result<(), Error> {
        Ok(())
    }

    fn observe_iter(&mut self, state: &I, _kv: &KV) -> Result<(), Error> {
        let iteration = state.get_iter() + 1;
        self.iterations.store(iteration, Ordering::Relaxed);

        if let Some(callback) = self.callback.as_mut() {
            let progress = OptimizerProgress {
                iteration,
                cost: state.get_cost(),
                best_cost: state.get_best_cost(),
            };
            if callback(progress).is_break() {
                return Err(OptimizationCancelled.into());
            }
        }
        Ok(())
    }
}
