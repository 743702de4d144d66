//! Neural activity to BOLD-like signal.

use ndarray::{Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use wholebrain_core::{nearest_integer, Result, Time, WholeBrainError};

/// Static acquisition parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoldParams {
    /// Repetition time, in model time units
    pub tr: Time,
    /// Band-pass (low, high) in Hz applied by filtering metrics, if any
    pub band: Option<(f64, f64)>,
}

impl Default for BoldParams {
    fn default() -> Self {
        Self {
            tr: 2.0,
            band: Some((0.02, 0.1)),
        }
    }
}

/// Pure transform from a neural observable to a BOLD-like series
pub trait HemodynamicModel: Send + Sync {
    fn params(&self) -> &BoldParams;

    /// `neural` is (time x regions) sampled every `recording_dt`; returns (regions x TR samples)
    fn bold(&self, neural: ArrayView2<f64>, recording_dt: Time) -> Result<Array2<f64>>;
}

/// Mean of the neural signal over each TR window
#[derive(Debug, Clone, Default)]
pub struct TrWindowMean {
    params: BoldParams,
}

impl TrWindowMean {
    pub fn new(params: BoldParams) -> Self {
        Self { params }
    }
}

impl HemodynamicModel for TrWindowMean {
    fn params(&self) -> &BoldParams {
        &self.params
    }

    fn bold(&self, neural: ArrayView2<f64>, recording_dt: Time) -> Result<Array2<f64>> {
        let per_tr = nearest_integer(self.params.tr / recording_dt)
            .filter(|&n| n >= 1.0)
            .ok_or_else(|| {
                WholeBrainError::Hemodynamics(format!(
                    "TR {} is not a multiple of the recording step {}",
                    self.params.tr, recording_dt
                ))
            })? as usize;

        let samples = neural.nrows() / per_tr;
        if samples == 0 {
            return Err(WholeBrainError::Hemodynamics(format!(
                "{} neural samples do not cover one TR ({per_tr} samples)",
                neural.nrows()
            )));
        }

        let mut bold = Array2::zeros((neural.ncols(), samples));
        for (k, window) in neural.axis_chunks_iter(Axis(0), per_tr).take(samples).enumerate() {
            if let Some(mean) = window.mean_axis(Axis(0)) {
                bold.column_mut(k).assign(&mean);
            }
        }
        if bold.iter().any(|v| !v.is_finite()) {
            return Err(WholeBrainError::Hemodynamics("non-finite BOLD signal".into()));
        }
        Ok(bold)
    }
}
