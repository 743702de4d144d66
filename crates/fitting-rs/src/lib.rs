//! # Fitting-RS
//!
//! Fit whole-brain simulations to empirical fMRI by sweeping model parameters.
//!
//! For every grid point the sweep derives an immutable model snapshot, simulates each
//! subject (neural run, then a hemodynamic transform), and scores the simulated
//! cohort against the empirical one with every configured distance metric. Metrics
//! are optimized independently; reconciling disagreeing optima is left to the caller.
//!
//! Hemodynamics and metrics are collaborators behind traits. The implementations
//! shipped here are small reference versions:
//!
//! | Collaborator | Implementation | Better |
//! |--------------|----------------|--------|
//! | [`HemodynamicModel`] | [`TrWindowMean`] | - |
//! | [`DistanceMetric`] | [`StaticFc`] (Pearson of mean FC) | higher |
//! | [`DistanceMetric`] | [`SlidingWindowFcd`] (KS of FCD values) | lower |
//!
//! [`BandPassed`] wraps any metric so both cohorts are band-pass filtered first.

pub mod filter;
pub mod hemodynamics;
pub mod metrics;
pub mod sweep;

pub use filter::{BandPass, BandPassed};
pub use hemodynamics::{BoldParams, HemodynamicModel, TrWindowMean};
pub use metrics::{DistanceMetric, Direction, SlidingWindowFcd, StaticFc};
pub use sweep::{
    find_optimum, grid_from_range, BoldSimulation, Optimum, ParameterSweep, PointFailure,
    RunContext, SubjectSimulator, SweepOutcome,
};
