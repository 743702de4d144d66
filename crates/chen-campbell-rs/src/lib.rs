//! # Chen-Campbell Whole-Brain Model
//!
//! Exact mean-field model for networks of Izhikevich-type neurons with spike-frequency
//! adaptation (Chen & Campbell, J Comput Neurosci 50, 445-469, 2022), with one
//! excitatory and one inhibitory population per brain region.
//!
//! ## Coupling
//!
//! Regions interact only through excitatory synaptic gating: the excitatory synaptic
//! current of region `i` includes `G * sum_j SC[i, j] * s_exc[j]`. The inhibitory
//! population is purely local.
//!
//! ## State layout
//!
//! | Row | Variable | Recorded |
//! |-----|----------|----------|
//! | 0-3 | r, v, w, s (excitatory) | r, v, w |
//! | 4-7 | r, v, w, s (inhibitory) | r, v, w |

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::sync::Arc;
use tracing::debug;
use wholebrain_core::{
    Derivatives, NeuralModel, ParamPoint, Reparameterize, Result, WholeBrainError,
};

pub const NUM_STATE_VARS: usize = 8;
pub const NUM_OBS_VARS: usize = 6;

// ============================================================================
// TYPED VIEWS
// ============================================================================

/// Integrated variables, in storage order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateVariable {
    RExc,
    VExc,
    WExc,
    SExc,
    RInh,
    VInh,
    WInh,
    SInh,
}

impl StateVariable {
    pub const ALL: [StateVariable; NUM_STATE_VARS] = [
        Self::RExc,
        Self::VExc,
        Self::WExc,
        Self::SExc,
        Self::RInh,
        Self::VInh,
        Self::WInh,
        Self::SInh,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Recorded variables, in buffer order
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservedVariable {
    #[default]
    RExc,
    VExc,
    WExc,
    RInh,
    VInh,
    WInh,
}

impl ObservedVariable {
    pub const ALL: [ObservedVariable; NUM_OBS_VARS] = [
        Self::RExc,
        Self::VExc,
        Self::WExc,
        Self::RInh,
        Self::VInh,
        Self::WInh,
    ];

    /// Position in the observable buffer
    pub fn index(self) -> usize {
        self as usize
    }

    /// State variable this observation is taken from
    pub fn source(self) -> StateVariable {
        match self {
            Self::RExc => StateVariable::RExc,
            Self::VExc => StateVariable::VExc,
            Self::WExc => StateVariable::WExc,
            Self::RInh => StateVariable::RInh,
            Self::VInh => StateVariable::VInh,
            Self::WInh => StateVariable::WInh,
        }
    }
}

/// Borrowed, named view over an (8 x N) state matrix
#[derive(Debug, Clone, Copy)]
pub struct FullState<'a> {
    pub r_exc: ArrayView1<'a, f64>,
    pub v_exc: ArrayView1<'a, f64>,
    pub w_exc: ArrayView1<'a, f64>,
    pub s_exc: ArrayView1<'a, f64>,
    pub r_inh: ArrayView1<'a, f64>,
    pub v_inh: ArrayView1<'a, f64>,
    pub w_inh: ArrayView1<'a, f64>,
    pub s_inh: ArrayView1<'a, f64>,
}

impl<'a> FullState<'a> {
    /// Panics if `state` does not have 8 rows; shapes are a caller contract
    pub fn new(state: ArrayView2<'a, f64>) -> Self {
        assert_eq!(state.nrows(), NUM_STATE_VARS, "state must have 8 rows");
        let row = |v: StateVariable| state.index_axis_move(Axis(0), v.index());
        Self {
            r_exc: row(StateVariable::RExc),
            v_exc: row(StateVariable::VExc),
            w_exc: row(StateVariable::WExc),
            s_exc: row(StateVariable::SExc),
            r_inh: row(StateVariable::RInh),
            v_inh: row(StateVariable::VInh),
            w_inh: row(StateVariable::WInh),
            s_inh: row(StateVariable::SInh),
        }
    }

    /// Recorded subset as a (6 x N) matrix
    pub fn observables(&self) -> Observables {
        let n = self.r_exc.len();
        let mut data = Array2::zeros((NUM_OBS_VARS, n));
        for var in ObservedVariable::ALL {
            let src = match var.source() {
                StateVariable::RExc => &self.r_exc,
                StateVariable::VExc => &self.v_exc,
                StateVariable::WExc => &self.w_exc,
                StateVariable::RInh => &self.r_inh,
                StateVariable::VInh => &self.v_inh,
                StateVariable::WInh => &self.w_inh,
                StateVariable::SExc | StateVariable::SInh => unreachable!("gating is not recorded"),
            };
            data.row_mut(var.index()).assign(src);
        }
        Observables(data)
    }
}

/// Owned (6 x N) recorded subset
#[derive(Debug, Clone, PartialEq)]
pub struct Observables(Array2<f64>);

impl Observables {
    pub fn get(&self, var: ObservedVariable) -> ArrayView1<'_, f64> {
        self.0.row(var.index())
    }

    pub fn into_inner(self) -> Array2<f64> {
        self.0
    }
}

// ============================================================================
// PARAMETERS
// ============================================================================

/// Dimensional single-population parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DimensionalParams {
    pub beta: f64,      // Resonator/integrator variable
    pub tau_w: f64,     // Adaptation time constant
    pub v_r: f64,       // Resting membrane potential (mV)
    pub c: f64,         // Capacitance (pF)
    pub k1: f64,        // Spike width factor
    pub v_t: f64,       // Threshold (mV)
    pub e_r: f64,       // Synaptic reversal potential (mV)
    pub g_syn: f64,     // Maximal synaptic conductance
    pub i_ext: f64,     // Extra current
    pub s_jump: f64,    // Synaptic jump
    pub tau_syn: f64,   // Synaptic time constant
    pub w_jump_exc: f64,
    pub w_jump_inh: f64,
    pub k: f64,         // Excitatory fraction of synaptic drive
    pub mu: f64,        // Lorentzian bath centre
    pub half_width: f64, // Lorentzian bath half-width
}

impl Default for DimensionalParams {
    fn default() -> Self {
        Self {
            beta: -1.0,
            tau_w: 200.0,
            v_r: -82.66,
            c: 250.0,
            k1: 10.0,
            v_t: -42.34,
            e_r: 0.0,
            g_syn: 200.0,
            i_ext: 0.0,
            s_jump: 0.8,
            tau_syn: 4.0,
            w_jump_exc: 800.0,
            w_jump_inh: 200.0,
            k: 0.8,
            mu: 120.0,
            half_width: 20.0,
        }
    }
}

/// Dimensionless constants used by the right-hand side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConstants {
    pub a: f64,
    pub b: f64,
    pub alpha: f64,
    pub gsyn: f64,
    pub er: f64,
    pub ie: f64,
    pub tsyn: f64,
    pub sjump: f64,
    pub wjump_exc: f64,
    pub wjump_inh: f64,
    pub k: f64,
    pub mu: f64,
    pub hw: f64,
}

impl From<&DimensionalParams> for ModelConstants {
    fn from(p: &DimensionalParams) -> Self {
        let vr = p.v_r.abs();
        Self {
            a: p.c / (p.tau_w * p.k1 * vr),
            b: p.beta / (p.k1 * vr),
            alpha: 1.0 + p.v_t / vr,
            gsyn: p.g_syn / (p.k1 * vr),
            er: 1.0 + p.e_r / vr,
            ie: p.i_ext / (p.k1 * p.v_r * p.v_r),
            tsyn: p.tau_syn * p.k1 * vr / p.c,
            sjump: p.s_jump * p.c / (p.k1 * vr),
            wjump_exc: p.w_jump_exc / (p.k1 * p.v_r * p.v_r),
            wjump_inh: p.w_jump_inh / (p.k1 * p.v_r * p.v_r),
            k: p.k,
            mu: p.mu,
            hw: p.half_width,
        }
    }
}

impl Default for ModelConstants {
    fn default() -> Self {
        Self::from(&DimensionalParams::default())
    }
}

impl ModelConstants {
    /// (r', v', w', s') of one population in one region
    #[inline]
    fn population(&self, r: f64, v: f64, w: f64, s: f64, current: f64, wjump: f64) -> [f64; 4] {
        let dr = self.hw / PI + 2.0 * r * v - r * (self.gsyn * s + self.alpha);
        let dv = v * v - self.alpha * v + self.gsyn * s * (self.er - v) - PI * PI * r * r - w
            + self.mu
            + current
            + self.ie;
        let dw = self.a * (self.b * v - w) + wjump * r;
        let ds = -s / self.tsyn + self.sjump * r;
        [dr, dv, dw, ds]
    }
}

// ============================================================================
// MODEL
// ============================================================================

/// Whole-brain Chen-Campbell model with an immutable parameter snapshot
#[derive(Debug, Clone)]
pub struct ChenCampbell {
    pub constants: ModelConstants,
    /// Global coupling (G, "we")
    pub g: f64,
    /// Local excitation/inhibition balance
    pub j: f64,
    sc: Arc<Array2<f64>>,
}

impl ChenCampbell {
    /// Build a model over a (normalized) structural connectivity matrix
    pub fn new(sc: Array2<f64>) -> Result<Self> {
        Self::with_shared_connectivity(Arc::new(sc))
    }

    pub fn with_shared_connectivity(sc: Arc<Array2<f64>>) -> Result<Self> {
        if sc.nrows() != sc.ncols() || sc.nrows() == 0 {
            return Err(WholeBrainError::shape(
                "structural connectivity",
                "non-empty square matrix",
                format!("{}x{}", sc.nrows(), sc.ncols()),
            ));
        }
        Ok(Self {
            constants: ModelConstants::default(),
            g: 1.0,
            j: 1.0,
            sc,
        })
    }

    pub fn with_constants(mut self, constants: ModelConstants) -> Self {
        self.constants = constants;
        self
    }

    pub fn with_coupling(mut self, g: f64) -> Self {
        self.g = g;
        self
    }

    pub fn with_balance(mut self, j: f64) -> Self {
        self.j = j;
        self
    }

    pub fn connectivity(&self) -> &Array2<f64> {
        &self.sc
    }
}

impl NeuralModel for ChenCampbell {
    fn num_state_vars(&self) -> usize {
        NUM_STATE_VARS
    }

    fn num_obs_vars(&self) -> usize {
        NUM_OBS_VARS
    }

    fn num_regions(&self) -> usize {
        self.sc.nrows()
    }

    fn dfun(&self, state: ArrayView2<f64>, input: f64) -> Derivatives {
        let x = FullState::new(state);
        let c = &self.constants;
        let n = x.r_exc.len();
        let coupling: Array1<f64> = self.sc.dot(&x.s_exc);

        let mut dstate = Array2::zeros((NUM_STATE_VARS, n));
        for i in 0..n {
            let (se, si) = (x.s_exc[i], x.s_inh[i]);

            let drive_exc = c.k * c.gsyn * se - self.j * (1.0 - c.k) * c.gsyn * si
                + c.gsyn * self.g * coupling[i];
            let drive_inh = c.k * c.gsyn * se - (1.0 - c.k) * c.gsyn * si;
            let i_exc = drive_exc * (c.er - x.v_exc[i]);
            let i_inh = drive_inh * (c.er - x.v_inh[i]);

            let exc = c.population(
                x.r_exc[i],
                x.v_exc[i],
                x.w_exc[i],
                se,
                i_exc + input,
                c.wjump_exc,
            );
            let inh = c.population(x.r_inh[i], x.v_inh[i], x.w_inh[i], si, i_inh, c.wjump_inh);

            for (row, d) in exc.into_iter().chain(inh).enumerate() {
                dstate[[row, i]] = d;
            }
        }

        Derivatives {
            dstate,
            observed: x.observables().into_inner(),
        }
    }
}

impl Reparameterize for ChenCampbell {
    fn with_parameters(&self, params: &ParamPoint) -> Result<Self> {
        let mut model = self.clone();
        for (name, &value) in params {
            match name.as_str() {
                "G" | "we" => model.g = value,
                "J" => model.j = value,
                "N" => {
                    if !(value >= 0.0 && value.fract() == 0.0) {
                        return Err(WholeBrainError::config(format!(
                            "region count must be a whole number, got {value}"
                        )));
                    }
                    if value as usize != model.num_regions() {
                        return Err(WholeBrainError::shape(
                            "region count",
                            model.num_regions(),
                            value,
                        ));
                    }
                }
                other => {
                    return Err(WholeBrainError::config(format!(
                        "unknown Chen-Campbell parameter '{other}'"
                    )))
                }
            }
        }
        debug!(g = model.g, j = model.j, "derived model parameters");
        Ok(model)
    }
}

/// Normalize a structural connectivity matrix: `sc / max(sc) * scale`
pub fn normalize_connectivity(sc: &Array2<f64>, scale: f64) -> Result<Array2<f64>> {
    if sc.nrows() != sc.ncols() {
        return Err(WholeBrainError::shape(
            "structural connectivity",
            "square matrix",
            format!("{}x{}", sc.nrows(), sc.ncols()),
        ));
    }
    let max = sc.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !(max.is_finite() && max > 0.0) {
        return Err(WholeBrainError::config(format!(
            "structural connectivity maximum must be positive and finite, got {max}"
        )));
    }
    Ok(sc.mapv(|w| w / max * scale))
}
