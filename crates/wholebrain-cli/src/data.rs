//! Structural connectivity and empirical subject loading.

use crate::config::DataConfig;
use ndarray::{s, Array2};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{info, warn};
use wholebrain_chen_campbell::normalize_connectivity;
use wholebrain_core::{Result, WholeBrainError};

/// Empirical cohort ready for fitting
#[derive(Debug, Clone)]
pub struct Cohort {
    /// Ids of the loaded subjects, in order
    pub ids: Vec<String>,
    /// One (regions x time) series per id
    pub series: Vec<Array2<f64>>,
    /// Requested subjects without data
    pub excluded: Vec<String>,
}

fn to_array(context: &str, rows: Vec<Vec<f64>>) -> Result<Array2<f64>> {
    let nrows = rows.len();
    let ncols = rows.first().map_or(0, Vec::len);
    if let Some(bad) = rows.iter().find(|r| r.len() != ncols) {
        return Err(WholeBrainError::shape(context, format!("rows of length {ncols}"), bad.len()));
    }
    let flat: Vec<f64> = rows.into_iter().flatten().collect();
    Array2::from_shape_vec((nrows, ncols), flat)
        .map_err(|e| WholeBrainError::shape(context, format!("{nrows}x{ncols}"), e))
}

/// Read a square SC matrix and scale it to `scale / max`
pub fn load_connectivity(path: &Path, scale: f64) -> Result<Array2<f64>> {
    let rows: Vec<Vec<f64>> = serde_json::from_str(&fs::read_to_string(path)?)?;
    let sc = to_array("structural connectivity", rows)?;
    if sc.is_empty() {
        return Err(WholeBrainError::shape("structural connectivity", "non-empty matrix", "0x0"));
    }
    normalize_connectivity(&sc, scale)
}

/// Read subjects, excluding those without data.
///
/// `null` entries and requested ids missing from the file are excluded with a warning.
/// A subject with the wrong number of regions, ragged rows or fewer than
/// `time_points` columns is an error.
pub fn load_subjects(
    path: &Path,
    ids: Option<&[String]>,
    regions: usize,
    time_points: Option<usize>,
) -> Result<Cohort> {
    let mut file: BTreeMap<String, Option<Vec<Vec<f64>>>> =
        serde_json::from_str(&fs::read_to_string(path)?)?;
    let wanted: Vec<String> = match ids {
        Some(ids) => ids.to_vec(),
        None => file.keys().cloned().collect(),
    };

    let mut cohort = Cohort {
        ids: Vec::new(),
        series: Vec::new(),
        excluded: Vec::new(),
    };
    for id in wanted {
        let Some(rows) = file.remove(&id).flatten() else {
            let missing = WholeBrainError::MissingSubjectData(id.clone());
            warn!(subject = %id, "{missing}, excluded");
            cohort.excluded.push(id);
            continue;
        };

        let context = format!("subject {id}");
        let series = to_array(&context, rows)?;
        if series.nrows() != regions {
            return Err(WholeBrainError::shape(
                &context,
                format!("{regions} regions"),
                series.nrows(),
            ));
        }
        let series = match time_points {
            Some(t) if series.ncols() < t => {
                return Err(WholeBrainError::shape(
                    &context,
                    format!("at least {t} time points"),
                    series.ncols(),
                ));
            }
            Some(t) => series.slice(s![.., ..t]).to_owned(),
            None => series,
        };
        cohort.ids.push(id);
        cohort.series.push(series);
    }

    info!(loaded = cohort.ids.len(), excluded = cohort.excluded.len(), "subjects loaded");
    Ok(cohort)
}

/// SC and subjects as configured
pub fn load(config: &DataConfig) -> Result<(Array2<f64>, Cohort)> {
    let sc = load_connectivity(&config.sc_path, config.sc_scale)?;
    let cohort = load_subjects(
        &config.subjects_path,
        config.subject_ids.as_deref(),
        sc.nrows(),
        config.time_points,
    )?;
    Ok((sc, cohort))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, text: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn test_connectivity_is_normalized() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "sc.json", "[[0, 4], [2, 0]]");
        let sc = load_connectivity(&path, 0.2).unwrap();
        assert_eq!(sc[[0, 1]], 0.2);
        assert!((sc[[1, 0]] - 0.1).abs() < 1e-12);

        let ragged = write(&dir, "bad.json", "[[0, 1], [1]]");
        assert!(matches!(
            load_connectivity(&ragged, 0.2),
            Err(WholeBrainError::ShapeMismatch { .. })
        ));
        let rect = write(&dir, "rect.json", "[[0, 1, 2], [1, 0, 2]]");
        assert!(load_connectivity(&rect, 0.2).is_err());
    }

    #[test]
    fn test_null_and_absent_subjects_are_excluded() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "subjects.json",
            r#"{ "a": [[1, 2, 3], [4, 5, 6]], "b": null, "c": [[7, 8, 9], [1, 2, 3]] }"#,
        );
        let ids: Vec<String> = ["c", "b", "z", "a"].iter().map(|s| s.to_string()).collect();
        let cohort = load_subjects(&path, Some(&ids), 2, Some(2)).unwrap();
        assert_eq!(cohort.ids, vec!["c", "a"]);
        assert_eq!(cohort.excluded, vec!["b", "z"]);
        assert_eq!(cohort.series[0].dim(), (2, 2));
        assert_eq!(cohort.series[1].row(1).to_vec(), vec![4.0, 5.0]);

        let all = load_subjects(&path, None, 2, None).unwrap();
        assert_eq!(all.ids, vec!["a", "c"]);
        assert_eq!(all.series[0].ncols(), 3);
    }

    #[test]
    fn test_malformed_subjects_are_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let regions = write(&dir, "regions.json", r#"{ "a": [[1, 2, 3]] }"#);
        assert!(matches!(
            load_subjects(&regions, None, 2, None),
            Err(WholeBrainError::ShapeMismatch { .. })
        ));

        let short = write(&dir, "short.json", r#"{ "a": [[1, 2], [3, 4]] }"#);
        assert!(load_subjects(&short, None, 2, Some(3)).is_err());

        let garbage = write(&dir, "garbage.json", r#"{ "a": "oops" }"#);
        assert!(matches!(load_subjects(&garbage, None, 2, None), Err(WholeBrainError::Json(_))));

        let missing = dir.path().join("nope.json");
        assert!(matches!(load_subjects(&missing, None, 2, None), Err(WholeBrainError::Io(_))));
    }
}
