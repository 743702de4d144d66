//! Zero-phase Butterworth band-pass for BOLD series.
//!
//! Each region is detrended, then passed forward and backward through a second-order
//! high-pass at `low` and a second-order low-pass at `high`.

use crate::metrics::{Direction, DistanceMetric};
use ndarray::{Array2, ArrayView2};
use std::f64::consts::{FRAC_1_SQRT_2, PI};
use wholebrain_core::{Result, Time, WholeBrainError};

#[derive(Debug, Clone, Copy)]
struct Biquad {
    // Transposed direct form II, a0 = 1
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl Biquad {
    /// RBJ cookbook section with Butterworth Q
    fn design(cutoff: f64, fs: f64, high_pass: bool) -> Self {
        let w0 = 2.0 * PI * cutoff / fs;
        let (sin, cos) = w0.sin_cos();
        let alpha = sin / (2.0 * FRAC_1_SQRT_2);
        let a0 = 1.0 + alpha;
        let (b0, b1) = if high_pass {
            ((1.0 + cos) / 2.0, -(1.0 + cos))
        } else {
            ((1.0 - cos) / 2.0, 1.0 - cos)
        };
        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b0 / a0,
            a1: -2.0 * cos / a0,
            a2: (1.0 - alpha) / a0,
        }
    }

    fn process(&self, x: &mut [f64]) {
        let (mut z1, mut z2) = (0.0, 0.0);
        for v in x.iter_mut() {
            let input = *v;
            let y = self.b0 * input + z1;
            z1 = self.b1 * input - self.a1 * y + z2;
            z2 = self.b2 * input - self.a2 * y;
            *v = y;
        }
    }
}

/// Remove the least-squares line
fn detrend(x: &mut [f64]) {
    let n = x.len() as f64;
    if x.len() < 2 {
        x.iter_mut().for_each(|v| *v = 0.0);
        return;
    }
    let t_mean = (n - 1.0) / 2.0;
    let x_mean = x.iter().sum::<f64>() / n;
    let (mut cov, mut var) = (0.0, 0.0);
    for (t, v) in x.iter().enumerate() {
        let dt = t as f64 - t_mean;
        cov += dt * (v - x_mean);
        var += dt * dt;
    }
    let slope = cov / var;
    for (t, v) in x.iter_mut().enumerate() {
        *v -= x_mean + slope * (t as f64 - t_mean);
    }
}

/// Band-pass over a BOLD series sampled every `tr`
#[derive(Debug, Clone)]
pub struct BandPass {
    sections: [Biquad; 2],
}

impl BandPass {
    pub fn new(low: f64, high: f64, tr: Time) -> Result<Self> {
        let nyquist = 0.5 / tr;
        if !(tr > 0.0 && low > 0.0 && low < high && high < nyquist) {
            return Err(WholeBrainError::config(format!(
                "band ({low}, {high}) Hz must lie within (0, {nyquist}) for TR {tr}"
            )));
        }
        let fs = 1.0 / tr;
        Ok(Self {
            sections: [Biquad::design(low, fs, true), Biquad::design(high, fs, false)],
        })
    }

    fn run(&self, x: &mut [f64]) {
        for section in &self.sections {
            section.process(x);
        }
    }

    /// Detrended, forward-backward filtered copy of one signal
    pub fn apply(&self, signal: &[f64]) -> Vec<f64> {
        let n = signal.len();
        let mut x = signal.to_vec();
        detrend(&mut x);
        if n < 2 {
            return x;
        }

        // Odd reflection at both ends to settle the transients
        let pad = (3 * 2 * self.sections.len()).min(n - 1);
        let mut padded = Vec::with_capacity(n + 2 * pad);
        padded.extend((1..=pad).rev().map(|i| 2.0 * x[0] - x[i]));
        padded.extend_from_slice(&x);
        padded.extend((1..=pad).map(|i| 2.0 * x[n - 1] - x[n - 1 - i]));

        self.run(&mut padded);
        padded.reverse();
        self.run(&mut padded);
        padded.reverse();
        padded[pad..pad + n].to_vec()
    }

    /// Filter every row of a (regions x time) series
    pub fn apply_rows(&self, series: ArrayView2<f64>) -> Array2<f64> {
        let mut out = Array2::zeros(series.dim());
        for (src, mut dst) in series.outer_iter().zip(out.outer_iter_mut()) {
            let filtered = self.apply(&src.to_vec());
            dst.iter_mut().zip(filtered).for_each(|(d, v)| *d = v);
        }
        out
    }
}

/// Metric scored on band-passed simulated and empirical cohorts
pub struct BandPassed<M> {
    pub filter: BandPass,
    pub metric: M,
}

impl<M: DistanceMetric> BandPassed<M> {
    pub fn new(filter: BandPass, metric: M) -> Self {
        Self { filter, metric }
    }

    fn filtered(&self, cohort: &[Array2<f64>]) -> Vec<Array2<f64>> {
        cohort.iter().map(|s| self.filter.apply_rows(s.view())).collect()
    }
}

impl<M: DistanceMetric> DistanceMetric for BandPassed<M> {
    fn name(&self) -> &str {
        self.metric.name()
    }

    fn direction(&self) -> Direction {
        self.metric.direction()
    }

    fn score(&self, simulated: &[Array2<f64>], empirical: &[Array2<f64>]) -> Result<f64> {
        self.metric.score(&self.filtered(simulated), &self.filtered(empirical))
    }
}
