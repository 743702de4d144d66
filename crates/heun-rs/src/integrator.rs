//! Heun predictor-corrector scheme.
//!
//! Based on the modified trapezoidal method with an Euler predictor (Kloeden & Platen,
//! *Numerical solution of stochastic differential equations*, eq. 1.11, p. 283). The
//! stochastic variant adds the same additive noise draw to predictor and corrector.

use crate::bookkeeping::Bookkeeping;
use crate::stimulus::StimulusSeries;
use ndarray::Array2;
use rand::distributions::Distribution;
use rand::rngs::StdRng;
use rand::SeedableRng;
use statrs::distribution::Normal;
use tracing::trace;
use wholebrain_core::{
    step_count, CancelToken, NeuralModel, Result, SimulationParams, Time, WholeBrainError,
};

/// Lower clamping bound
pub const CLAMP_MIN: f64 = 0.0;
/// Upper clamping bound
pub const CLAMP_MAX: f64 = 100.0;

/// State after one step, with the observables of the corrector evaluation
#[derive(Debug, Clone)]
pub struct StepOutput {
    pub state: Array2<f64>,
    pub observed: Array2<f64>,
}

#[derive(Debug, Clone)]
struct Noise {
    /// sigma * sqrt(dt)
    scale: f64,
    normal: Normal,
    rng: StdRng,
}

/// Fixed-step Heun integrator
#[derive(Debug, Clone)]
pub struct Heun {
    dt: Time,
    clamping: bool,
    noise: Option<Noise>,
}

impl Heun {
    /// Deterministic integrator with clamping enabled
    pub fn new(dt: Time) -> Self {
        Self {
            dt,
            clamping: true,
            noise: None,
        }
    }

    /// Integrator configured from run parameters (noise seeded from `params.seed`)
    pub fn from_params(params: &SimulationParams) -> Result<Self> {
        params.validate()?;
        let heun = Self::new(params.dt).with_clamping(params.clamping);
        if params.is_stochastic() {
            heun.with_noise(params.noise_sigma, params.seed)
        } else {
            Ok(heun)
        }
    }

    pub fn with_clamping(mut self, clamping: bool) -> Self {
        self.clamping = clamping;
        self
    }

    /// Additive Gaussian noise of amplitude `sigma`, drawn from a generator seeded with `seed`
    pub fn with_noise(mut self, sigma: f64, seed: u64) -> Result<Self> {
        if sigma == 0.0 {
            self.noise = None;
            return Ok(self);
        }
        let normal = Normal::new(0.0, 1.0).map_err(|e| WholeBrainError::config(e.to_string()))?;
        self.noise = Some(Noise {
            scale: sigma * self.dt.sqrt(),
            normal,
            rng: StdRng::seed_from_u64(seed),
        });
        Ok(self)
    }

    pub fn dt(&self) -> Time {
        self.dt
    }

    pub fn clamping(&self) -> bool {
        self.clamping
    }

    /// Advance `state` by one step under `input`. `t` and `step` only label errors.
    pub fn step<M: NeuralModel + ?Sized>(
        &mut self,
        model: &M,
        state: &Array2<f64>,
        input: f64,
        t: Time,
        step: usize,
    ) -> Result<StepOutput> {
        let dt = self.dt;
        let noise = self.draw_noise(state.dim());

        // Predictor
        let d1 = model.dfun(state.view(), input).dstate;
        let mut predicted = state + &(&d1 * dt);
        if let Some(n) = &noise {
            predicted += n;
        }
        self.finish(&mut predicted, t, step)?;

        // Corrector
        let second = model.dfun(predicted.view(), input);
        let mut next = state + &((&d1 + &second.dstate) * (dt / 2.0));
        if let Some(n) = &noise {
            next += n;
        }
        self.finish(&mut next, t, step)?;

        Ok(StepOutput {
            state: next,
            observed: second.observed,
        })
    }

    /// Integrate `state` over `[0, total)`.
    ///
    /// `stimulus` must have been generated for this integrator's `dt` and `total`.
    /// When a recorder is given, each step's observables are offered to it at time `t`.
    pub fn integrate<M: NeuralModel + ?Sized>(
        &mut self,
        model: &M,
        mut state: Array2<f64>,
        stimulus: &StimulusSeries,
        total: Time,
        mut recorder: Option<&mut Bookkeeping>,
        cancel: &CancelToken,
    ) -> Result<Array2<f64>> {
        let expected = (model.num_state_vars(), model.num_regions());
        if state.dim() != expected {
            return Err(WholeBrainError::shape(
                "initial state",
                format!("{}x{}", expected.0, expected.1),
                format!("{}x{}", state.nrows(), state.ncols()),
            ));
        }
        if !stimulus.matches(self.dt, total) {
            return Err(WholeBrainError::config(format!(
                "stimulus series does not match dt={} total={}",
                self.dt, total
            )));
        }

        let steps = step_count(total, self.dt);
        trace!(steps, total, dt = self.dt, "integrating");
        for i in 0..steps {
            if cancel.is_cancelled() {
                return Err(WholeBrainError::Cancelled);
            }
            let t = i as f64 * self.dt;
            let out = self.step(model, &state, stimulus.get(i), t, i)?;
            state = out.state;
            if let Some(book) = recorder.as_mut() {
                book.record(t, out.observed.view())?;
            }
        }
        Ok(state)
    }

    fn draw_noise(&mut self, dim: (usize, usize)) -> Option<Array2<f64>> {
        let Noise { scale, normal, rng } = self.noise.as_mut()?;
        let scale = *scale;
        Some(Array2::from_shape_simple_fn(dim, || normal.sample(&mut *rng) * scale))
    }

    /// Reject non-finite values, then clamp if enabled
    fn finish(&self, x: &mut Array2<f64>, t: Time, step: usize) -> Result<()> {
        for v in x.iter_mut() {
            if !v.is_finite() {
                return Err(WholeBrainError::NumericDivergence { time: t, step });
            }
            if self.clamping {
                *v = v.clamp(CLAMP_MIN, CLAMP_MAX);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stimulus::NoStimulus;
    use crate::test_models::{Accumulator, Exponential};
    use ndarray::Array2;
    use wholebrain_chen_campbell::ChenCampbell;

    fn endpoint_error(dt: Time) -> f64 {
        let model = Exponential;
        let mut heun = Heun::new(dt).with_clamping(false);
        let series = StimulusSeries::generate(&NoStimulus, dt, 1.0);
        let end = heun
            .integrate(&model, model.initial_state(), &series, 1.0, None, &CancelToken::new())
            .unwrap();
        (end[[0, 0]] - 1f64.exp()).abs()
    }

    #[test]
    fn test_second_order_convergence() {
        let coarse = endpoint_error(0.1);
        let fine = endpoint_error(0.05);
        let ratio = coarse / fine;
        assert!(coarse > fine);
        assert!(ratio > 3.5 && ratio < 4.5, "error ratio {ratio}");
    }

    #[test]
    fn test_single_step_matches_trapezoid() {
        let model = Exponential;
        let mut heun = Heun::new(0.5).with_clamping(false);
        let out = heun.step(&model, &model.initial_state(), 0.0, 0.0, 0).unwrap();
        // 1 + h + h^2/2
        assert!((out.state[[0, 0]] - 1.625).abs() < 1e-12);
        // Observables come from the predictor state
        assert!((out.observed[[0, 0]] - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_clamped_step_stays_bounded() {
        let model = ChenCampbell::new(ndarray::array![[0.0, 0.3], [0.3, 0.0]])
            .unwrap()
            .with_coupling(5.0);
        let mut heun = Heun::new(0.001);

        let mut states = vec![Array2::zeros((8, 2)), Array2::from_elem((8, 2), 100.0)];
        states.push(Array2::from_shape_fn((8, 2), |(i, j)| ((i * 7 + j * 13) % 17) as f64 * 6.0));
        for state in states {
            let out = heun.step(&model, &state, 0.0, 0.0, 0).unwrap();
            assert!(out
                .state
                .iter()
                .all(|&v| v.is_finite() && (CLAMP_MIN..=CLAMP_MAX).contains(&v)));
        }
    }

    #[test]
    fn test_non_finite_state_is_surfaced_not_clamped() {
        let model = ChenCampbell::new(ndarray::array![[0.0]]).unwrap();
        let mut heun = Heun::new(0.001);
        // v^2 overflows to +inf
        let state = Array2::from_elem((8, 1), 1e200);
        let err = heun.step(&model, &state, 0.0, 0.25, 250).unwrap_err();
        assert!(matches!(err, WholeBrainError::NumericDivergence { step: 250, .. }));
    }

    #[test]
    fn test_unclamped_values_leave_range() {
        let model = Accumulator;
        let mut heun = Heun::new(1.0).with_clamping(false);
        let out = heun.step(&model, &Array2::zeros((1, 1)), -5.0, 0.0, 0).unwrap();
        assert_eq!(out.state[[0, 0]], -5.0);

        let mut heun = Heun::new(1.0);
        let out = heun.step(&model, &Array2::zeros((1, 1)), -5.0, 0.0, 0).unwrap();
        assert_eq!(out.state[[0, 0]], 0.0);
    }

    #[test]
    fn test_stimulus_is_consumed_per_step() {
        let model = Accumulator;
        let mut heun = Heun::new(0.1).with_clamping(false);
        let pulse = crate::stimulus::ConstantStimulus {
            onset: 0.0,
            termination: 0.45,
            amplitude: 1.0,
        };
        let series = StimulusSeries::generate(&pulse, 0.1, 1.0);
        let end = heun
            .integrate(&model, Array2::zeros((1, 1)), &series, 1.0, None, &CancelToken::new())
            .unwrap();
        // Five steps of input 1.0, each adding dt
        assert!((end[[0, 0]] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_mismatched_stimulus() {
        let model = Exponential;
        let mut heun = Heun::new(0.1);
        let series = StimulusSeries::generate(&NoStimulus, 0.1, 2.0);
        let err = heun
            .integrate(&model, model.initial_state(), &series, 1.0, None, &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, WholeBrainError::Configuration(_)));
    }

    #[test]
    fn test_rejects_wrong_state_shape() {
        let model = Exponential;
        let mut heun = Heun::new(0.1);
        let series = StimulusSeries::generate(&NoStimulus, 0.1, 1.0);
        let err = heun
            .integrate(&model, Array2::zeros((2, 1)), &series, 1.0, None, &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, WholeBrainError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_cancellation() {
        let model = Exponential;
        let mut heun = Heun::new(0.1);
        let series = StimulusSeries::generate(&NoStimulus, 0.1, 1.0);
        let token = CancelToken::new();
        token.cancel();
        let err = heun
            .integrate(&model, model.initial_state(), &series, 1.0, None, &token)
            .unwrap_err();
        assert!(matches!(err, WholeBrainError::Cancelled));
    }

    #[test]
    fn test_seeded_noise_is_reproducible() {
        let model = Accumulator;
        let run = |seed: u64| {
            let mut heun = Heun::new(0.01).with_clamping(false).with_noise(0.5, seed).unwrap();
            let series = StimulusSeries::generate(&NoStimulus, 0.01, 1.0);
            heun.integrate(&model, Array2::zeros((1, 1)), &series, 1.0, None, &CancelToken::new())
                .unwrap()
        };
        let a = run(7);
        assert_eq!(a, run(7));
        assert_ne!(a, run(8));
        assert_ne!(a[[0, 0]], 0.0);
    }

    #[test]
    fn test_zero_sigma_is_deterministic() {
        let params = SimulationParams { noise_sigma: 0.0, seed: 99, ..Default::default() };
        let heun = Heun::from_params(&params).unwrap();
        assert!(heun.noise.is_none());
        assert!(heun.clamping());
    }
}
