//! Goodness-of-fit between simulated and empirical cohorts.

use ndarray::{s, Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use wholebrain_core::{Result, WholeBrainError};

/// Which way a score improves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    HigherIsBetter,
    LowerIsBetter,
}

impl Direction {
    /// Whether `candidate` strictly improves on `incumbent`
    pub fn improves(self, candidate: f64, incumbent: f64) -> bool {
        match self {
            Self::HigherIsBetter => candidate > incumbent,
            Self::LowerIsBetter => candidate < incumbent,
        }
    }
}

/// Black-box scoring of a simulated cohort against an empirical one.
///
/// Each series is (regions x time). Cohorts may differ in size.
pub trait DistanceMetric: Send + Sync {
    fn name(&self) -> &str;

    fn direction(&self) -> Direction;

    fn score(&self, simulated: &[Array2<f64>], empirical: &[Array2<f64>]) -> Result<f64>;
}

/// Pearson correlation; NaN when either side has zero variance
pub fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n < 2 {
        return f64::NAN;
    }
    let (a, b) = (&a[..n], &b[..n]);
    let mean_a = a.iter().sum::<f64>() / n as f64;
    let mean_b = b.iter().sum::<f64>() / n as f64;

    let (mut cov, mut var_a, mut var_b) = (0.0, 0.0, 0.0);
    for (x, y) in a.iter().zip(b) {
        let (dx, dy) = (x - mean_a, y - mean_b);
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }
    cov / (var_a * var_b).sqrt()
}

/// Region-by-region correlation matrix of a (regions x time) series.
///
/// Pairs involving a constant region correlate as 0; the diagonal is 1.
pub fn functional_connectivity(series: ArrayView2<f64>) -> Array2<f64> {
    let n = series.nrows();
    let rows: Vec<Vec<f64>> = series.outer_iter().map(|r| r.to_vec()).collect();
    let mut fc = Array2::eye(n);
    for i in 0..n {
        for j in (i + 1)..n {
            let c = pearson(&rows[i], &rows[j]);
            let c = if c.is_finite() { c } else { 0.0 };
            fc[[i, j]] = c;
            fc[[j, i]] = c;
        }
    }
    fc
}

/// Strict upper triangle, row-major
pub fn upper_triangle(m: &Array2<f64>) -> Vec<f64> {
    let n = m.nrows();
    (0..n)
        .flat_map(|i| ((i + 1)..n).map(move |j| (i, j)))
        .map(|(i, j)| m[[i, j]])
        .collect()
}

/// Two-sample Kolmogorov-Smirnov statistic
pub fn ks_distance(a: &[f64], b: &[f64]) -> f64 {
    let mut a = a.to_vec();
    let mut b = b.to_vec();
    a.sort_by(f64::total_cmp);
    b.sort_by(f64::total_cmp);
    let (n, m) = (a.len() as f64, b.len() as f64);

    let (mut i, mut j, mut d) = (0, 0, 0.0f64);
    while i < a.len() && j < b.len() {
        let x = a[i].min(b[j]);
        while i < a.len() && a[i] <= x {
            i += 1;
        }
        while j < b.len() && b[j] <= x {
            j += 1;
        }
        d = d.max((i as f64 / n - j as f64 / m).abs());
    }
    d
}

fn check_cohorts(
    metric: &str,
    simulated: &[Array2<f64>],
    empirical: &[Array2<f64>],
) -> Result<usize> {
    let fail = |reason: String| WholeBrainError::Metric {
        metric: metric.to_string(),
        reason,
    };
    let (Some(first), false) = (simulated.first(), empirical.is_empty()) else {
        return Err(fail("empty cohort".into()));
    };
    let regions = first.nrows();
    if let Some(bad) = simulated.iter().chain(empirical).find(|s| s.nrows() != regions) {
        return Err(fail(format!("expected {regions} regions, found {}", bad.nrows())));
    }
    Ok(regions)
}

fn mean_fc(cohort: &[Array2<f64>]) -> Array2<f64> {
    let mut sum = functional_connectivity(cohort[0].view());
    for series in &cohort[1..] {
        sum += &functional_connectivity(series.view());
    }
    sum / cohort.len() as f64
}

/// Static functional connectivity fit
#[derive(Debug, Clone, Default)]
pub struct StaticFc;

impl DistanceMetric for StaticFc {
    fn name(&self) -> &str {
        "FC"
    }

    fn direction(&self) -> Direction {
        Direction::HigherIsBetter
    }

    fn score(&self, simulated: &[Array2<f64>], empirical: &[Array2<f64>]) -> Result<f64> {
        check_cohorts(self.name(), simulated, empirical)?;
        let sim = upper_triangle(&mean_fc(simulated));
        let emp = upper_triangle(&mean_fc(empirical));
        Ok(pearson(&sim, &emp))
    }
}

/// Sliding-window functional connectivity dynamics fit
#[derive(Debug, Clone)]
pub struct SlidingWindowFcd {
    /// Window length in samples
    pub window: usize,
    /// Window stride in samples
    pub step: usize,
}

impl Default for SlidingWindowFcd {
    fn default() -> Self {
        Self { window: 30, step: 3 }
    }
}

impl SlidingWindowFcd {
    /// Upper-triangle values of the FCD matrix of one (regions x time) series
    pub fn fcd_values(&self, series: ArrayView2<f64>) -> Result<Vec<f64>> {
        let t = series.ncols();
        if self.window < 2 || self.step == 0 || t < self.window {
            return Err(WholeBrainError::Metric {
                metric: self.name().to_string(),
                reason: format!(
                    "window {} / step {} invalid for {t} time points",
                    self.window, self.step
                ),
            });
        }

        let windows: Vec<Vec<f64>> = (0..=t - self.window)
            .step_by(self.step)
            .map(|start| {
                let fc = functional_connectivity(series.slice(s![.., start..start + self.window]));
                upper_triangle(&fc)
            })
            .collect();

        let mut values = Vec::with_capacity(windows.len() * windows.len().saturating_sub(1) / 2);
        for i in 0..windows.len() {
            for j in (i + 1)..windows.len() {
                let c = pearson(&windows[i], &windows[j]);
                values.push(if c.is_finite() { c } else { 0.0 });
            }
        }
        Ok(values)
    }

    fn pooled(&self, cohort: &[Array2<f64>]) -> Result<Vec<f64>> {
        let mut all = Vec::new();
        for series in cohort {
            all.extend(self.fcd_values(series.view())?);
        }
        Ok(all)
    }
}

impl DistanceMetric for SlidingWindowFcd {
    fn name(&self) -> &str {
        "swFCD"
    }

    fn direction(&self) -> Direction {
        Direction::LowerIsBetter
    }

    fn score(&self, simulated: &[Array2<f64>], empirical: &[Array2<f64>]) -> Result<f64> {
        check_cohorts(self.name(), simulated, empirical)?;
        let sim = self.pooled(simulated)?;
        let emp = self.pooled(empirical)?;
        if sim.is_empty() || emp.is_empty() {
            return Err(WholeBrainError::Metric {
                metric: self.name().to_string(),
                reason: "fewer than two windows per series".into(),
            });
        }
        Ok(ks_distance(&sim, &emp))
    }
}
