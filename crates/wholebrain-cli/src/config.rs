//! JSON run configuration.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use wholebrain_chen_campbell::{DimensionalParams, ObservedVariable};
use wholebrain_core::{ParamPoint, Result, SimulationParams, WholeBrainError};
use wholebrain_fitting::{grid_from_range, BandPass, BoldParams};
use wholebrain_heun::StimulusSpec;

/// Values taken by the swept parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GridSpec {
    /// `arange(start, stop, step)`
    Range { start: f64, stop: f64, step: f64 },
    /// Explicit list
    Values(Vec<f64>),
}

impl Default for GridSpec {
    fn default() -> Self {
        Self::Range {
            start: 0.5,
            stop: 1.6,
            step: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SweepConfig {
    /// Swept parameter name ("G", "we" or "J")
    pub label: String,
    pub grid: GridSpec,
    /// Parameters held fixed at every grid point
    pub fixed: ParamPoint,
    pub simulated_subjects: usize,
    /// Sliding-window FCD window and stride, in BOLD samples
    pub fcd_window: usize,
    pub fcd_step: usize,
    /// Concurrent simulations; all cores when absent
    pub threads: Option<usize>,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            label: "J".into(),
            grid: GridSpec::default(),
            fixed: [("G".to_string(), 700.2)].into(),
            simulated_subjects: 20,
            fcd_window: 30,
            fcd_step: 3,
            threads: None,
        }
    }
}

impl SweepConfig {
    pub fn points(&self) -> Result<Vec<ParamPoint>> {
        match &self.grid {
            GridSpec::Range { start, stop, step } => {
                grid_from_range(&self.label, *start, *stop, *step, &self.fixed)
            }
            GridSpec::Values(values) => Ok(values
                .iter()
                .map(|&v| {
                    let mut point = self.fixed.clone();
                    point.insert(self.label.clone(), v);
                    point
                })
                .collect()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DataConfig {
    /// Square SC matrix as nested JSON arrays
    pub sc_path: PathBuf,
    /// Object of subject id -> (regions x time) array or null
    pub subjects_path: PathBuf,
    /// Subjects to use, in order; all subjects in the file when absent
    pub subject_ids: Option<Vec<String>>,
    /// SC is scaled to this maximum
    pub sc_scale: f64,
    /// Columns kept per subject
    pub time_points: Option<usize>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            sc_path: PathBuf::from("data/sc.json"),
            subjects_path: PathBuf::from("data/subjects.json"),
            subject_ids: None,
            sc_scale: 0.2,
            time_points: Some(176),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub stem: String,
    pub suffix: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("results"),
            stem: "fitting".into(),
            suffix: String::new(),
        }
    }
}

impl OutputConfig {
    /// `<dir>/<stem><suffix>.json`
    pub fn path(&self) -> PathBuf {
        self.dir.join(format!("{}{}.json", self.stem, self.suffix))
    }
}

/// Complete configuration of a fitting run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub simulation: SimulationParams,
    /// When set, recorded time is `bold_samples * bold.tr` instead of `simulation.t_max`
    pub bold_samples: Option<usize>,
    pub bold: BoldParams,
    pub stimulus: StimulusSpec,
    pub model: DimensionalParams,
    /// Variable fed to the hemodynamic model
    pub observed: ObservedVariable,
    pub sweep: SweepConfig,
    pub data: DataConfig,
    pub output: OutputConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Simulation parameters with the BOLD-derived duration applied
    pub fn simulation_params(&self) -> SimulationParams {
        let mut params = self.simulation.clone();
        if let Some(samples) = self.bold_samples {
            params.t_max = samples as f64 * self.bold.tr;
        }
        params
    }

    /// Band-pass applied to both cohorts before scoring, if configured
    pub fn band_pass(&self) -> Result<Option<BandPass>> {
        self.bold
            .band
            .map(|(low, high)| BandPass::new(low, high, self.bold.tr))
            .transpose()
    }

    pub fn validate(&self) -> Result<()> {
        self.simulation_params().validate()?;
        if !(self.bold.tr.is_finite() && self.bold.tr > 0.0) {
            return Err(WholeBrainError::config(format!(
                "bold.tr must be positive, got {}",
                self.bold.tr
            )));
        }
        self.band_pass()?;
        if self.sweep.label.is_empty() {
            return Err(WholeBrainError::config("sweep.label is empty"));
        }
        if self.sweep.points()?.is_empty() {
            return Err(WholeBrainError::config("sweep grid is empty"));
        }
        if self.sweep.simulated_subjects == 0 {
            return Err(WholeBrainError::config(
                "sweep.simulated_subjects must be at least 1",
            ));
        }
        if self.sweep.threads == Some(0) {
            return Err(WholeBrainError::config("sweep.threads must be at least 1"));
        }
        if !(self.data.sc_scale.is_finite() && self.data.sc_scale > 0.0) {
            return Err(WholeBrainError::config(format!(
                "data.sc_scale must be positive, got {}",
                self.data.sc_scale
            )));
        }
        if self.data.time_points == Some(0) {
            return Err(WholeBrainError::config("data.time_points must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.sweep.points().unwrap().len(), 11);
        assert_eq!(config.output.path(), PathBuf::from("results/fitting.json"));
    }

    #[test]
    fn test_band_pass_follows_bold_params() {
        let mut config = Config::default();
        assert!(config.band_pass().unwrap().is_some());
        config.bold.band = None;
        assert!(config.band_pass().unwrap().is_none());
    }

    #[test]
    fn test_bold_samples_set_duration() {
        let config = Config {
            bold_samples: Some(176),
            ..Default::default()
        };
        assert_eq!(config.simulation_params().t_max, 352.0);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{
            "sweep": { "label": "we", "grid": { "values": [700.0, 700.2] }, "fixed": { "J": 1.0 } },
            "observed": "v_exc",
            "output": { "suffix": "_rest" }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        config.validate().unwrap();
        let points = config.sweep.points().unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[1]["we"], 700.2);
        assert_eq!(points[1]["J"], 1.0);
        assert_eq!(config.observed, ObservedVariable::VExc);
        assert_eq!(config.output.path(), PathBuf::from("results/fitting_rest.json"));
        assert_eq!(config.data.sc_scale, 0.2);
    }

    #[test]
    fn test_rejects_unknown_and_invalid() {
        assert!(serde_json::from_str::<Config>(r#"{ "sweeep": {} }"#).is_err());

        let mut config = Config::default();
        config.sweep.simulated_subjects = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.simulation.dt = -1.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.sweep.grid = GridSpec::Values(vec![]);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.sweep.threads = Some(0);
        assert!(config.validate().is_err());

        // 0.3 Hz is above Nyquist for TR = 2
        let mut config = Config::default();
        config.bold.band = Some((0.02, 0.3));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = Config::default();
        config.sweep.label = "we".into();
        config.save(&path).unwrap();
        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.sweep.label, "we");
        assert_eq!(loaded.sweep.grid, config.sweep.grid);
    }
}
