//! Parameter sweep over a grid, scored per metric.

use crate::hemodynamics::HemodynamicModel;
use crate::metrics::{Direction, DistanceMetric};
use indicatif::ProgressBar;
use ndarray::{Array2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashSet};
use std::hash::{Hash, Hasher};
use tracing::{info, warn};
use wholebrain_core::{
    step_count, CancelToken, NeuralModel, ParamPoint, Reparameterize, Result, WholeBrainError,
};
use wholebrain_heun::{Simulation, Stimulus};

/// Identifies one simulation of a sweep
#[derive(Debug, Clone)]
pub struct RunContext {
    pub grid_index: usize,
    pub subject: usize,
    /// Noise seed for this run, independent of scheduling
    pub seed: u64,
    /// Sweep-wide cancellation, to be honoured inside the run
    pub cancel: CancelToken,
}

impl RunContext {
    /// Standalone run outside a sweep
    pub fn single(seed: u64) -> Self {
        Self {
            grid_index: 0,
            subject: 0,
            seed,
            cancel: CancelToken::new(),
        }
    }
}

/// Produces one simulated subject's (regions x time) series for a model snapshot
pub trait SubjectSimulator<M>: Send + Sync {
    fn simulate(&self, model: &M, run: RunContext) -> Result<Array2<f64>>;
}

/// Neural simulation followed by a hemodynamic transform of one observed variable
pub struct BoldSimulation<H, S> {
    pub simulation: Simulation,
    pub hemodynamics: H,
    pub stimulus: S,
    /// Index of the observed variable fed to the hemodynamic model
    pub observed_index: usize,
}

impl<M, H, S> SubjectSimulator<M> for BoldSimulation<H, S>
where
    M: NeuralModel,
    H: HemodynamicModel,
    S: Stimulus,
{
    fn simulate(&self, model: &M, run: RunContext) -> Result<Array2<f64>> {
        let simulation = self
            .simulation
            .clone()
            .with_seed(run.seed)
            .with_cancel_token(run.cancel);
        let observed = simulation.run(model, &self.stimulus)?;

        let vars = observed.len_of(Axis(1));
        if self.observed_index >= vars {
            return Err(WholeBrainError::shape(
                "observed variable index",
                format!("< {vars}"),
                self.observed_index,
            ));
        }
        let neural = observed.index_axis(Axis(1), self.observed_index);
        self.hemodynamics.bold(neural, simulation.params().recording_dt)
    }
}

/// Best grid point of one metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Optimum {
    pub index: usize,
    pub value: f64,
    pub score: f64,
    pub direction: Direction,
}

/// A grid point (or one metric at it) without a score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointFailure {
    pub index: usize,
    pub value: f64,
    /// `None` when the whole point failed
    pub metric: Option<String>,
    pub reason: String,
}

/// Fitting curves and optima of a sweep
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepOutcome {
    pub label: String,
    pub values: Vec<f64>,
    pub curves: BTreeMap<String, Vec<Option<f64>>>,
    pub optima: BTreeMap<String, Optimum>,
    pub failures: Vec<PointFailure>,
}

/// First index with the best finite score
pub fn find_optimum(scores: &[Option<f64>], direction: Direction) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, score) in scores.iter().enumerate() {
        let Some(score) = score.filter(|s| s.is_finite()) else {
            continue;
        };
        match best {
            Some((_, incumbent)) if !direction.improves(score, incumbent) => {}
            _ => best = Some((i, score)),
        }
    }
    best.map(|(i, _)| i)
}

/// Grid like `arange(start, stop, step)` over `label`, with `fixed` merged into every point
pub fn grid_from_range(
    label: &str,
    start: f64,
    stop: f64,
    step: f64,
    fixed: &ParamPoint,
) -> Result<Vec<ParamPoint>> {
    if !(step.is_finite() && step > 0.0) || !(start.is_finite() && stop.is_finite()) {
        return Err(WholeBrainError::config(format!(
            "invalid range {start}..{stop} step {step}"
        )));
    }
    let count = step_count(stop - start, step);
    Ok((0..count)
        .map(|i| {
            let mut point = fixed.clone();
            point.insert(label.to_string(), start + i as f64 * step);
            point
        })
        .collect())
}

fn run_seed(seed: u64, grid_index: usize, subject: usize) -> u64 {
    let mut h = DefaultHasher::new();
    (seed, grid_index, subject).hash(&mut h);
    h.finish()
}

/// Sweep of one labelled parameter over a grid of model parameters
#[derive(Debug, Clone)]
pub struct ParameterSweep {
    label: String,
    grid: Vec<ParamPoint>,
    simulated_subjects: usize,
    seed: u64,
    cancel: CancelToken,
    progress: ProgressBar,
    threads: Option<usize>,
}

impl ParameterSweep {
    pub fn new(label: &str, grid: Vec<ParamPoint>, simulated_subjects: usize) -> Self {
        Self {
            label: label.to_string(),
            grid,
            simulated_subjects,
            seed: 0,
            cancel: CancelToken::new(),
            progress: ProgressBar::hidden(),
            threads: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Progress bar advanced once per simulation; its length is set by `run`
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// Cap on concurrent runs; each run holds a full observable buffer
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn grid(&self) -> &[ParamPoint] {
        &self.grid
    }

    /// Number of simulations `run` performs
    pub fn total_runs(&self) -> usize {
        self.grid.len() * self.simulated_subjects
    }

    /// Swept values in grid order
    pub fn values(&self) -> Result<Vec<f64>> {
        self.grid
            .iter()
            .enumerate()
            .map(|(i, p)| {
                p.get(&self.label).copied().ok_or_else(|| {
                    WholeBrainError::config(format!("grid point {i} lacks '{}'", self.label))
                })
            })
            .collect()
    }

    fn validate<M: NeuralModel>(
        &self,
        base: &M,
        empirical: &[Array2<f64>],
        metrics: &[Box<dyn DistanceMetric>],
    ) -> Result<Vec<f64>> {
        if self.grid.is_empty() {
            return Err(WholeBrainError::config("empty parameter grid"));
        }
        let values = self.values()?;
        if metrics.is_empty() {
            return Err(WholeBrainError::config("no distance metrics configured"));
        }
        let mut names = HashSet::new();
        if let Some(dup) = metrics.iter().find(|m| !names.insert(m.name().to_string())) {
            return Err(WholeBrainError::config(format!("duplicate metric '{}'", dup.name())));
        }
        if self.simulated_subjects == 0 {
            return Err(WholeBrainError::config("no simulated subjects"));
        }
        if self.threads == Some(0) {
            return Err(WholeBrainError::config("thread count must be at least 1"));
        }
        if empirical.len() < self.simulated_subjects {
            return Err(WholeBrainError::config(format!(
                "{} simulated subjects but only {} empirical",
                self.simulated_subjects,
                empirical.len()
            )));
        }
        if let Some(first) = empirical.first() {
            if first.nrows() != base.num_regions() {
                return Err(WholeBrainError::shape(
                    "empirical subject regions",
                    base.num_regions(),
                    first.nrows(),
                ));
            }
            if let Some(bad) = empirical.iter().find(|e| e.dim() != first.dim()) {
                return Err(WholeBrainError::shape(
                    "empirical subject",
                    format!("{:?}", first.dim()),
                    format!("{:?}", bad.dim()),
                ));
            }
        }
        Ok(values)
    }

    /// Simulate and score every grid point.
    ///
    /// Setup problems are returned before any simulation. A point whose model or any
    /// subject run fails is recorded in `failures` with `None` scores; only
    /// cancellation aborts the sweep.
    pub fn run<M, Sim>(
        &self,
        base: &M,
        simulator: &Sim,
        empirical: &[Array2<f64>],
        metrics: &[Box<dyn DistanceMetric>],
    ) -> Result<SweepOutcome>
    where
        M: NeuralModel + Reparameterize,
        Sim: SubjectSimulator<M>,
    {
        let values = self.validate(base, empirical, metrics)?;
        match self.threads {
            Some(threads) => rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .map_err(|e| WholeBrainError::config(format!("cannot build thread pool: {e}")))?
                .install(|| self.execute(base, simulator, empirical, metrics, values)),
            None => self.execute(base, simulator, empirical, metrics, values),
        }
    }

    fn execute<M, Sim>(
        &self,
        base: &M,
        simulator: &Sim,
        empirical: &[Array2<f64>],
        metrics: &[Box<dyn DistanceMetric>],
        values: Vec<f64>,
    ) -> Result<SweepOutcome>
    where
        M: NeuralModel + Reparameterize,
        Sim: SubjectSimulator<M>,
    {
        let subjects = self.simulated_subjects;
        info!(
            label = %self.label,
            points = self.grid.len(),
            subjects,
            "starting parameter sweep"
        );

        let mut failures = Vec::new();
        let mut models = Vec::with_capacity(self.grid.len());
        for (i, point) in self.grid.iter().enumerate() {
            match base.with_parameters(point) {
                Ok(model) => models.push(Some(model)),
                Err(e) => {
                    warn!(index = i, value = values[i], error = %e, "cannot derive model");
                    failures.push(PointFailure {
                        index: i,
                        value: values[i],
                        metric: None,
                        reason: e.to_string(),
                    });
                    models.push(None);
                }
            }
        }

        let jobs: Vec<(usize, usize)> = models
            .iter()
            .enumerate()
            .filter(|(_, m)| m.is_some())
            .flat_map(|(g, _)| (0..subjects).map(move |s| (g, s)))
            .collect();

        self.progress.set_length(jobs.len() as u64);
        let outputs: Vec<Result<Array2<f64>>> = jobs
            .par_iter()
            .map(|&(g, s)| {
                if self.cancel.is_cancelled() {
                    return Err(WholeBrainError::Cancelled);
                }
                let Some(model) = models[g].as_ref() else {
                    unreachable!("jobs only cover derived models")
                };
                let run = RunContext {
                    grid_index: g,
                    subject: s,
                    seed: run_seed(self.seed, g, s),
                    cancel: self.cancel.clone(),
                };
                let out = simulator.simulate(model, run);
                self.progress.inc(1);
                out
            })
            .collect();
        self.progress.finish();

        if outputs.iter().any(|o| matches!(o, Err(WholeBrainError::Cancelled))) {
            return Err(WholeBrainError::Cancelled);
        }

        // Regroup per grid point, in grid order
        let mut per_point: Vec<Option<std::result::Result<Vec<Array2<f64>>, String>>> =
            models.iter().map(|m| m.as_ref().map(|_| Ok(Vec::new()))).collect();
        for (&(g, _), out) in jobs.iter().zip(outputs) {
            if let Some(Ok(series)) = per_point[g].as_mut() {
                match out {
                    Ok(bold) => series.push(bold),
                    Err(e) => per_point[g] = Some(Err(e.to_string())),
                }
            }
        }

        let scored: Vec<(Vec<Option<f64>>, Vec<PointFailure>)> = per_point
            .into_par_iter()
            .enumerate()
            .map(|(g, point)| self.score_point(g, values[g], point, empirical, metrics))
            .collect();

        let mut curves: BTreeMap<String, Vec<Option<f64>>> = metrics
            .iter()
            .map(|m| (m.name().to_string(), Vec::with_capacity(values.len())))
            .collect();
        for (scores, point_failures) in scored {
            for (metric, score) in metrics.iter().zip(scores) {
                if let Some(curve) = curves.get_mut(metric.name()) {
                    curve.push(score);
                }
            }
            failures.extend(point_failures);
        }
        failures.sort_by_key(|f| f.index);

        let optima = metrics
            .iter()
            .filter_map(|m| {
                let curve = &curves[m.name()];
                let index = find_optimum(curve, m.direction())?;
                Some((
                    m.name().to_string(),
                    Optimum {
                        index,
                        value: values[index],
                        score: curve[index]?,
                        direction: m.direction(),
                    },
                ))
            })
            .collect();

        Ok(SweepOutcome {
            label: self.label.clone(),
            values,
            curves,
            optima,
            failures,
        })
    }

    fn score_point(
        &self,
        g: usize,
        value: f64,
        point: Option<std::result::Result<Vec<Array2<f64>>, String>>,
        empirical: &[Array2<f64>],
        metrics: &[Box<dyn DistanceMetric>],
    ) -> (Vec<Option<f64>>, Vec<PointFailure>) {
        let mut failures = Vec::new();
        let simulated = match point {
            // Model derivation failure, already recorded
            None => return (vec![None; metrics.len()], failures),
            Some(Err(reason)) => {
                warn!(index = g, value, %reason, "simulation failed");
                failures.push(PointFailure { index: g, value, metric: None, reason });
                return (vec![None; metrics.len()], failures);
            }
            Some(Ok(simulated)) => simulated,
        };

        let scores = metrics
            .iter()
            .map(|metric| {
                let outcome = metric.score(&simulated, empirical).and_then(|s| {
                    if s.is_finite() {
                        Ok(s)
                    } else {
                        Err(WholeBrainError::Metric {
                            metric: metric.name().to_string(),
                            reason: format!("non-finite score {s}"),
                        })
                    }
                });
                match outcome {
                    Ok(score) => Some(score),
                    Err(e) => {
                        warn!(
                            index = g,
                            value,
                            metric = metric.name(),
                            error = %e,
                            "metric failed"
                        );
                        failures.push(PointFailure {
                            index: g,
                            value,
                            metric: Some(metric.name().to_string()),
                            reason: e.to_string(),
                        });
                        None
                    }
                }
            })
            .collect::<Vec<_>>();

        info!(label = %self.label, value, ?scores, "grid point scored");
        (scores, failures)
    }
}
