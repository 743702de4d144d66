//! Downsampled storage of observed variables.

use ndarray::{Array3, ArrayView2, Axis};
use wholebrain_core::{nearest_integer, sample_count, Result, Time, WholeBrainError};

/// Buffer indexed `[sample, observed variable, region]`.
///
/// A step at time `t` is stored only when `t / recording_dt` is integral, at index
/// `round(t / recording_dt)`.
#[derive(Debug, Clone)]
pub struct Bookkeeping {
    recording_dt: Time,
    buffer: Array3<f64>,
    writes: usize,
}

impl Bookkeeping {
    pub fn new(total: Time, recording_dt: Time, num_obs_vars: usize, num_regions: usize) -> Self {
        let samples = sample_count(total, recording_dt);
        Self {
            recording_dt,
            buffer: Array3::zeros((samples, num_obs_vars, num_regions)),
            writes: 0,
        }
    }

    /// Number of samples the buffer holds
    pub fn len(&self) -> usize {
        self.buffer.len_of(Axis(0))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of samples written so far
    pub fn writes(&self) -> usize {
        self.writes
    }

    /// Store `observed` if `t` falls on the recording grid; returns the index written
    pub fn record(&mut self, t: Time, observed: ArrayView2<f64>) -> Result<Option<usize>> {
        let Some(index) = nearest_integer(t / self.recording_dt) else {
            return Ok(None);
        };
        let index = index as usize;

        let (samples, vars, regions) = self.buffer.dim();
        if observed.dim() != (vars, regions) {
            return Err(WholeBrainError::shape(
                "observables",
                format!("{vars}x{regions}"),
                format!("{}x{}", observed.nrows(), observed.ncols()),
            ));
        }
        if index >= samples {
            return Err(WholeBrainError::shape(
                "bookkeeping index",
                format!("< {samples}"),
                index,
            ));
        }

        self.buffer.index_axis_mut(Axis(0), index).assign(&observed);
        self.writes += 1;
        Ok(Some(index))
    }

    pub fn buffer(&self) -> &Array3<f64> {
        &self.buffer
    }

    pub fn into_buffer(self) -> Array3<f64> {
        self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    use std::collections::HashSet;
    use wholebrain_core::step_count;

    /// Record every step of a run and return the written indices in order
    fn drive(total: Time, dt: Time, recording_dt: Time) -> (Bookkeeping, Vec<(Time, usize)>) {
        let mut book = Bookkeeping::new(total, recording_dt, 2, 3);
        let mut written = Vec::new();
        for i in 0..step_count(total, dt) {
            let t = i as f64 * dt;
            let obs = Array2::from_elem((2, 3), t);
            if let Some(idx) = book.record(t, obs.view()).unwrap() {
                written.push((t, idx));
            }
        }
        (book, written)
    }

    #[test]
    fn test_buffer_length() {
        for &(total, step, expected) in &[
            (1.0, 0.1, 11),
            (1.0, 0.25, 5),
            (1.0, 0.3, 4),
            (176.0, 0.001, 176_001),
            (0.5, 1.0, 1),
        ] {
            let book = Bookkeeping::new(total, step, 6, 2);
            assert_eq!(book.len(), expected, "total={total} step={step}");
            assert_eq!(book.buffer().dim(), (expected, 6, 2));
        }
    }

    #[test]
    fn test_recording_step_multiple_of_dt() {
        let (book, written) = drive(1.0, 0.01, 0.1);
        let indices: Vec<usize> = written.iter().map(|&(_, i)| i).collect();
        assert_eq!(indices, (0..10).collect::<Vec<_>>());
        for &(t, idx) in &written {
            assert_eq!(idx, (t / 0.1).round() as usize);
        }
        assert_eq!(book.writes(), 10);
        // Last sample (t = total) is never reached
        assert!(book.buffer().index_axis(Axis(0), 10).iter().all(|&x| x == 0.0));
        assert!((book.buffer()[[3, 1, 2]] - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_recording_step_not_multiple_of_dt() {
        // dt = 0.1, recording every 0.25: only t = 0.0, 0.5, 1.0, 1.5 fall on both grids
        let (book, written) = drive(2.0, 0.1, 0.25);
        let indices: Vec<usize> = written.iter().map(|&(_, i)| i).collect();
        assert_eq!(indices, vec![0, 2, 4, 6]);
        assert_eq!(book.len(), 9);

        let unique: HashSet<usize> = indices.iter().copied().collect();
        assert_eq!(unique.len(), indices.len(), "no double writes");
    }

    #[test]
    fn test_recording_step_equal_to_dt() {
        let (book, written) = drive(0.05, 0.001, 0.001);
        assert_eq!(written.len(), 50);
        assert!(written.iter().enumerate().all(|(k, &(_, idx))| k == idx));
        assert_eq!(book.len(), 51);
    }

    #[test]
    fn test_shape_mismatch() {
        let mut book = Bookkeeping::new(1.0, 0.1, 2, 3);
        let bad = Array2::zeros((3, 3));
        assert!(matches!(
            book.record(0.0, bad.view()),
            Err(WholeBrainError::ShapeMismatch { .. })
        ));
    }
}
