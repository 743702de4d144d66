//! External input, precomputed once per run phase.

use serde::{Deserialize, Serialize};
use wholebrain_core::{step_count, Time};

/// Region-independent external drive
pub trait Stimulus: Send + Sync {
    fn value(&self, t: Time) -> f64;
}

/// Zero input
#[derive(Debug, Clone, Copy, Default)]
pub struct NoStimulus;

impl Stimulus for NoStimulus {
    fn value(&self, _t: Time) -> f64 {
        0.0
    }
}

/// Box pulse: `amplitude` on `[onset, termination]`, zero elsewhere
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConstantStimulus {
    pub onset: Time,
    pub termination: Time,
    pub amplitude: f64,
}

impl Stimulus for ConstantStimulus {
    fn value(&self, t: Time) -> f64 {
        if t >= self.onset && t <= self.termination {
            self.amplitude
        } else {
            0.0
        }
    }
}

/// Serializable stimulus selection
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StimulusSpec {
    #[default]
    None,
    Constant(ConstantStimulus),
}

impl Stimulus for StimulusSpec {
    fn value(&self, t: Time) -> f64 {
        match self {
            Self::None => NoStimulus.value(t),
            Self::Constant(c) => c.value(t),
        }
    }
}

/// One input value per integration step over `[0, total)`
#[derive(Debug, Clone, PartialEq)]
pub struct StimulusSeries {
    dt: Time,
    total: Time,
    values: Vec<f64>,
}

impl StimulusSeries {
    pub fn generate(stimulus: &dyn Stimulus, dt: Time, total: Time) -> Self {
        let values = (0..step_count(total, dt))
            .map(|i| stimulus.value(i as f64 * dt))
            .collect();
        Self { dt, total, values }
    }

    /// Whether this series was generated for the given step and duration
    pub fn matches(&self, dt: Time, total: Time) -> bool {
        self.dt == dt && self.total == total
    }

    pub fn get(&self, step: usize) -> f64 {
        self.values[step]
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }
}
