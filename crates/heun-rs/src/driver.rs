//! Warm-up then recorded run for one (parameter set, subject) unit.

use crate::bookkeeping::Bookkeeping;
use crate::integrator::Heun;
use crate::stimulus::{Stimulus, StimulusSeries};
use ndarray::{Array2, Array3};
use tracing::debug;
use wholebrain_core::{CancelToken, NeuralModel, Result, SimulationParams, Time};

/// Simulation driver
#[derive(Debug, Clone)]
pub struct Simulation {
    params: SimulationParams,
    cancel: CancelToken,
}

impl Simulation {
    pub fn new(params: SimulationParams) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            params,
            cancel: CancelToken::new(),
        })
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Same configuration with a different noise seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.params.seed = seed;
        self
    }

    pub fn params(&self) -> &SimulationParams {
        &self.params
    }

    /// Fresh integrator for one run
    pub fn integrator(&self) -> Result<Heun> {
        Heun::from_params(&self.params)
    }

    /// Warm up (if configured) from the model's initial state, then record.
    ///
    /// Returns the observable buffer `[sample, observed variable, region]`.
    pub fn run<M: NeuralModel + ?Sized>(
        &self,
        model: &M,
        stimulus: &dyn Stimulus,
    ) -> Result<Array3<f64>> {
        let mut heun = self.integrator()?;
        let mut state = model.initial_state();

        if let Some(duration) = self.params.warm_up.duration(self.params.t_max) {
            debug!(duration, "warming up");
            state = self.warm_up(&mut heun, model, state, stimulus, duration)?;
        }

        debug!(t_max = self.params.t_max, "simulating");
        let (_, observed) = self.record(&mut heun, model, state, stimulus)?;
        Ok(observed)
    }

    /// Integrate `duration` without bookkeeping; returns the final state
    pub fn warm_up<M: NeuralModel + ?Sized>(
        &self,
        heun: &mut Heun,
        model: &M,
        state: Array2<f64>,
        stimulus: &dyn Stimulus,
        duration: Time,
    ) -> Result<Array2<f64>> {
        let series = StimulusSeries::generate(stimulus, heun.dt(), duration);
        heun.integrate(model, state, &series, duration, None, &self.cancel)
    }

    /// Integrate `t_max` with bookkeeping; returns the final state and the observables
    pub fn record<M: NeuralModel + ?Sized>(
        &self,
        heun: &mut Heun,
        model: &M,
        state: Array2<f64>,
        stimulus: &dyn Stimulus,
    ) -> Result<(Array2<f64>, Array3<f64>)> {
        let t_max = self.params.t_max;
        let series = StimulusSeries::generate(stimulus, heun.dt(), t_max);
        let mut book = Bookkeeping::new(
            t_max,
            self.params.recording_dt,
            model.num_obs_vars(),
            model.num_regions(),
        );
        let state = heun.integrate(model, state, &series, t_max, Some(&mut book), &self.cancel)?;
        Ok((state, book.into_buffer()))
    }
}
