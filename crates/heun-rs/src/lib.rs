//! # Heun-RS
//!
//! Fixed-step Heun (predictor-corrector) integration for whole-brain neural models.
//!
//! ```text
//! X~(t+dt) = clamp(X(t) + dt f(X(t), u(t)))
//! X(t+dt)  = clamp(X(t) + dt (f(X(t), u(t)) + f(X~, u(t))) / 2)
//! ```
//!
//! 1. **Stimuli**: external input precomputed per integration step
//! 2. **Bookkeeping**: observables stored every `recording_dt`, coarser than `dt`
//! 3. **Integrator**: deterministic or seeded stochastic Heun with [0, 100] clamping
//! 4. **Driver**: discarded warm-up followed by a recorded run

pub mod bookkeeping;
pub mod driver;
pub mod integrator;
pub mod stimulus;

pub use bookkeeping::Bookkeeping;
pub use driver::Simulation;
pub use integrator::{Heun, StepOutput, CLAMP_MAX, CLAMP_MIN};
pub use stimulus::{ConstantStimulus, NoStimulus, Stimulus, StimulusSeries, StimulusSpec};
