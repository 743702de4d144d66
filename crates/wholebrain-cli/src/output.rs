//! Persisted results.

use ndarray::Array2;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;
use wholebrain_core::{ParamPoint, Result, Time};
use wholebrain_fitting::SweepOutcome;

/// BOLD-like series of one simulated subject
#[derive(Debug, Clone, Serialize)]
pub struct SimulatedSeries {
    pub parameters: ParamPoint,
    pub tr: Time,
    /// regions x samples
    pub bold: Vec<Vec<f64>>,
}

impl SimulatedSeries {
    pub fn new(parameters: ParamPoint, tr: Time, bold: &Array2<f64>) -> Self {
        Self {
            parameters,
            tr,
            bold: bold.outer_iter().map(|row| row.to_vec()).collect(),
        }
    }
}

fn write_json<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush()?;
    info!(path = %path.display(), "results written");
    Ok(())
}

/// Write `{ label, values, curves, optima, failures }`
pub fn write_outcome(outcome: &SweepOutcome, path: &Path) -> Result<()> {
    write_json(outcome, path)
}

pub fn write_series(series: &SimulatedSeries, path: &Path) -> Result<()> {
    write_json(series, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use std::collections::BTreeMap;
    use wholebrain_fitting::{Direction, Optimum, PointFailure};

    #[test]
    fn test_outcome_file_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("fitting_rest.json");
        let outcome = SweepOutcome {
            label: "J".into(),
            values: vec![0.5, 0.6],
            curves: BTreeMap::from([("FC".to_string(), vec![Some(0.3), None])]),
            optima: BTreeMap::from([(
                "FC".to_string(),
                Optimum { index: 0, value: 0.5, score: 0.3, direction: Direction::HigherIsBetter },
            )]),
            failures: vec![PointFailure {
                index: 1,
                value: 0.6,
                metric: None,
                reason: "diverged".into(),
            }],
        };
        write_outcome(&outcome, &path).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["label"], "J");
        assert_eq!(json["curves"]["FC"][1], serde_json::Value::Null);
        assert_eq!(json["optima"]["FC"]["direction"], "higher_is_better");
        assert_eq!(json["failures"][0]["index"], 1);
    }

    #[test]
    fn test_series_rows_are_regions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bold.json");
        let bold = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let series = SimulatedSeries::new(ParamPoint::new(), 2.0, &bold);
        write_series(&series, &path).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["bold"].as_array().unwrap().len(), 2);
        assert_eq!(json["bold"][1][2], 6.0);
    }
}
