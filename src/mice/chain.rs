//! Chained-equations iterator: one completed dataset from one random stream.
//!
//! 1. Fill every missing cell with a placeholder (mean / mode).
//! 2. For each iteration, visit the incomplete variables in declaration order
//!    and refill each from a model fitted on the current state of the others.
//!
//! Updates are sequential within a pass (each refill sees the refills made
//! earlier in the same pass). The iteration count is a fixed budget; there is
//! no convergence test. `ChainTrace` records what a convergence check needs.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{Dataset, Method, Value, VarKind};
use crate::error::{MiceError, Result};
use crate::mice::missingness::MissingnessMatrix;
use crate::mice::model::{ModelOptions, impute};
use crate::mice::predictors::PredictorGraph;

/// Cooperative cancellation shared between runs.
///
/// Checked before every variable visit, so a run stops within one model fit
/// of the flag being raised or the deadline passing.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    aborted: Arc<AtomicBool>,
    deadline: Option<(Instant, Duration)>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also stop once `budget` has elapsed from now.
    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.deadline = Some((Instant::now() + budget, budget));
        self
    }

    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<()> {
        if let Some((deadline, budget)) = self.deadline {
            if Instant::now() >= deadline {
                return Err(MiceError::Timeout(budget.as_secs_f64()));
            }
        }
        if self.is_aborted() {
            return Err(MiceError::Cancelled);
        }
        Ok(())
    }
}

/// Mean and variance of one variable's imputed cells after one iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainStat {
    pub iteration: usize,
    pub variable: usize,
    pub mean: f64,
    pub variance: f64,
}

/// One fitted per-variable model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRecord {
    pub iteration: usize,
    pub target: usize,
    pub method: Method,
    pub predictors: Vec<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChainTrace {
    pub stats: Vec<ChainStat>,
    pub models: Vec<ModelRecord>,
}

impl ChainTrace {
    /// Per-iteration chain statistics of one variable.
    pub fn stats_for(&self, variable: usize) -> impl Iterator<Item = &ChainStat> {
        self.stats.iter().filter(move |s| s.variable == variable)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChainOutput {
    pub data: Dataset,
    pub trace: ChainTrace,
}

/// Runs chained equations for a fixed graph.
#[derive(Debug, Clone)]
pub struct ChainedEquations<'a> {
    graph: &'a PredictorGraph,
    missingness: &'a MissingnessMatrix,
    options: ModelOptions,
    stop: StopSignal,
}

impl<'a> ChainedEquations<'a> {
    pub fn new(graph: &'a PredictorGraph, missingness: &'a MissingnessMatrix) -> Self {
        Self {
            graph,
            missingness,
            options: ModelOptions::default(),
            stop: StopSignal::new(),
        }
    }

    pub fn with_options(mut self, options: ModelOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    /// Produce one completed dataset.
    ///
    /// With `iterations == 0` the placeholder-filled dataset is returned.
    pub fn run<R: Rng + ?Sized>(
        &self,
        dataset: &Dataset,
        iterations: usize,
        rng: &mut R,
    ) -> Result<ChainOutput> {
        let mut working = initialize(dataset, self.missingness)?;
        let mut trace = ChainTrace::default();
        let sequence = self.graph.visit_sequence(self.missingness);

        for iteration in 1..=iterations {
            for &target in &sequence {
                self.stop.check()?;

                // The target's originally-missing cells are treated as missing
                // again: the model fits on observed rows only and overwrites them.
                let drawn = impute(
                    target,
                    &working,
                    self.graph,
                    self.missingness,
                    rng,
                    &self.options,
                )?;
                for (&row, &value) in drawn.rows.iter().zip(&drawn.values) {
                    working.set(row, target, value)?;
                }

                let (mean, variance) = mean_and_variance(&drawn.values);
                debug!(
                    iteration,
                    variable = %working.column(target).name,
                    method = %drawn.method,
                    predictors = drawn.predictors.len(),
                    mean,
                    "refilled variable"
                );
                trace.stats.push(ChainStat {
                    iteration,
                    variable: target,
                    mean,
                    variance,
                });
                trace.models.push(ModelRecord {
                    iteration,
                    target,
                    method: drawn.method,
                    predictors: drawn.predictors,
                });
            }
        }

        Ok(ChainOutput {
            data: working,
            trace,
        })
    }
}

/// Copy `dataset`, filling each missing cell with its column's observed mean
/// (continuous) or most frequent level (factors; ties go to the lowest level).
pub fn initialize(dataset: &Dataset, missingness: &MissingnessMatrix) -> Result<Dataset> {
    let mut working = dataset.clone();
    for col in missingness.incomplete_columns() {
        let column = dataset.column(col);
        let observed: Vec<Value> = dataset
            .values(col)
            .iter()
            .copied()
            .filter(|v| !v.is_missing())
            .collect();
        if observed.is_empty() {
            return Err(MiceError::InsufficientData {
                variable: column.name.clone(),
                observed: 0,
                required: 1,
            });
        }

        let fill = match column.kind {
            VarKind::Continuous => {
                let sum: f64 = observed.iter().filter_map(|v| v.as_f64()).sum();
                Value::Real(sum / observed.len() as f64)
            }
            VarKind::Binary | VarKind::Categorical => {
                let mut counts = vec![0usize; column.levels.len()];
                for level in observed.iter().filter_map(|v| v.as_level()) {
                    counts[level as usize] += 1;
                }
                let mode = counts
                    .iter()
                    .enumerate()
                    .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(&a.0)))
                    .map(|(level, _)| level as u32)
                    .unwrap_or(0);
                Value::Level(mode)
            }
        };

        for &row in missingness.missing_rows(col) {
            working.set(row, col, fill)?;
        }
    }
    Ok(working)
}

fn mean_and_variance(values: &[Value]) -> (f64, f64) {
    let xs: Vec<f64> = values.iter().filter_map(|v| v.as_f64()).collect();
    if xs.is_empty() {
        return (f64::NAN, f64::NAN);
    }
    let n = xs.len() as f64;
    let mean = xs.iter().sum::<f64>() / n;
    if xs.len() < 2 {
        return (mean, 0.0);
    }
    let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, var)
}
