//! # WholeBrain Core
//!
//! Shared types and utilities for whole-brain mean-field simulation.
//!
//! ## Layers
//!
//! | Crate | Role |
//! |-------|------|
//! | `wholebrain-chen-campbell` | Per-region coupled dynamics |
//! | `wholebrain-heun` | Stimuli, integration, bookkeeping, warm-up driver |
//! | `wholebrain-fitting` | Parameter sweeps against empirical FC/FCD |
//!
//! ## Design Philosophy
//!
//! 1. A model value is an immutable parameter snapshot: runs never share mutable state
//! 2. Numerical failures surface as errors, they are never clamped away
//! 3. Every run owns its buffers, so sweeps parallelize without locks

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Common errors
#[derive(Debug, Error)]
pub enum WholeBrainError {
    #[error("Shape mismatch in {context}: expected {expected}, found {found}")]
    ShapeMismatch {
        context: String,
        expected: String,
        found: String,
    },

    #[error("Numeric divergence at t={time} (step {step}): non-finite state")]
    NumericDivergence { time: Time, step: usize },

    #[error("Missing subject data: {0}")]
    MissingSubjectData(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Simulation cancelled")]
    Cancelled,

    #[error("Hemodynamic model error: {0}")]
    Hemodynamics(String),

    #[error("Metric {metric} failed: {reason}")]
    Metric { metric: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WholeBrainError {
    pub fn shape(context: &str, expected: impl ToString, found: impl ToString) -> Self {
        Self::ShapeMismatch {
            context: context.to_string(),
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, WholeBrainError>;

/// Time point (model time units; the Chen-Campbell model runs in seconds)
pub type Time = f64;

/// One point of a parameter grid: parameter name -> value
pub type ParamPoint = BTreeMap<String, f64>;

/// Result of one evaluation of a model's right-hand side
#[derive(Debug, Clone)]
pub struct Derivatives {
    /// d(state)/dt, same shape as the state (vars x regions)
    pub dstate: Array2<f64>,
    /// Observed subset evaluated at the input state (obs vars x regions)
    pub observed: Array2<f64>,
}

/// Coupled per-region dynamics.
///
/// State is stored as a (variables x regions) matrix. Implementations must be pure:
/// all parameters live in `self`, which stays immutable for the whole run.
pub trait NeuralModel: Send + Sync {
    /// Number of state variables per region
    fn num_state_vars(&self) -> usize;

    /// Number of recorded variables per region
    fn num_obs_vars(&self) -> usize;

    /// Number of regions (N)
    fn num_regions(&self) -> usize;

    /// State the simulation starts from
    fn initial_state(&self) -> Array2<f64> {
        Array2::zeros((self.num_state_vars(), self.num_regions()))
    }

    /// Compute derivatives and the observed subset for `state` under external `input`
    fn dfun(&self, state: ArrayView2<f64>, input: f64) -> Derivatives;
}

/// Models that can derive a new parameter snapshot from a grid point
pub trait Reparameterize: Sized {
    fn with_parameters(&self, params: &ParamPoint) -> Result<Self>;
}

/// Warm-up phase preceding the recorded run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarmUp {
    Disabled,
    /// Absolute duration
    Duration(Time),
    /// Fraction of the recorded duration
    Factor(f64),
}

impl WarmUp {
    /// Warm-up length for a recorded run of `t_max`, if any
    pub fn duration(&self, t_max: Time) -> Option<Time> {
        let t = match *self {
            Self::Disabled => return None,
            Self::Duration(t) => t,
            Self::Factor(f) => f * t_max,
        };
        (t > 0.0).then_some(t)
    }
}

/// Simulation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationParams {
    /// Integration step
    pub dt: Time,
    /// Recording (downsampling) interval
    pub recording_dt: Time,
    /// Recorded neuronal time
    pub t_max: Time,
    /// Discarded transient before recording
    pub warm_up: WarmUp,
    /// Clip state to [0, 100] after each sub-step
    pub clamping: bool,
    /// Additive noise amplitude; zero keeps the scheme deterministic
    pub noise_sigma: f64,
    /// Seed for the noise generator
    pub seed: u64,
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            dt: 0.001,
            recording_dt: 0.001,
            t_max: 352.0,
            warm_up: WarmUp::Factor(0.1),
            clamping: true,
            noise_sigma: 0.0,
            seed: 0,
        }
    }
}

impl SimulationParams {
    pub fn validate(&self) -> Result<()> {
        let positive = |name: &str, v: f64| {
            if v.is_finite() && v > 0.0 {
                Ok(())
            } else {
                Err(WholeBrainError::config(format!("{name} must be positive, got {v}")))
            }
        };
        positive("dt", self.dt)?;
        positive("recording_dt", self.recording_dt)?;
        positive("t_max", self.t_max)?;

        match self.warm_up {
            WarmUp::Duration(v) | WarmUp::Factor(v) if !(v.is_finite() && v >= 0.0) => {
                return Err(WholeBrainError::config(format!(
                    "warm-up must be non-negative, got {v}"
                )));
            }
            _ => {}
        }
        if !(self.noise_sigma.is_finite() && self.noise_sigma >= 0.0) {
            return Err(WholeBrainError::config(format!(
                "noise_sigma must be non-negative, got {}",
                self.noise_sigma
            )));
        }
        Ok(())
    }

    pub fn is_stochastic(&self) -> bool {
        self.noise_sigma > 0.0
    }
}

/// Cooperative cancellation flag shared between a sweep and its runs
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Relative tolerance used when deciding whether a time ratio is integral
pub const INTEGRAL_TOLERANCE: f64 = 1e-9;

/// `Some(n)` when `x` is within tolerance of the integer `n`
pub fn nearest_integer(x: f64) -> Option<f64> {
    let r = x.round();
    ((x - r).abs() <= INTEGRAL_TOLERANCE * r.abs().max(1.0)).then_some(r)
}

/// Number of points in `[0, total)` stepped by `step`
pub fn step_count(total: Time, step: Time) -> usize {
    let ratio = total / step;
    match nearest_integer(ratio) {
        Some(n) => n.max(0.0) as usize,
        None => ratio.ceil().max(0.0) as usize,
    }
}

/// Recorded samples for a run of `total` at interval `step`: `floor(total/step) + 1`
pub fn sample_count(total: Time, step: Time) -> usize {
    let ratio = total / step;
    let whole = nearest_integer(ratio).unwrap_or_else(|| ratio.floor());
    whole.max(0.0) as usize + 1
}
