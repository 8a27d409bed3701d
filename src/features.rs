//! Univariate marker scoring and top-K marker selection.
//!
//! Each marker is scored by the F-statistic of a one-predictor regression of
//! the trait on its dosage, `F = r² / (1 - r²) · (n - 2)`. Scores come from
//! training rows only; the resulting [`MarkerSubset`] is then replayed on any
//! matrix with the training marker layout.

use log::{debug, info, warn};
use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;
use statrs::distribution::{ContinuousCDF, FisherSnedecor};

use crate::error::{GsError, Result};
use crate::genotype::MarkerInfo;

// --- Scoring ---

/// F-statistics and their upper-tail p-values under F(1, n - 2).
#[derive(Clone, Debug)]
pub struct MarkerScores {
    pub f_values: Vec<f64>,
    pub p_values: Vec<f64>,
}

/// Scores every column of `x` against `y`. Constant columns score 0 with a
/// p-value of 1.
pub fn f_regression(x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<MarkerScores> {
    let n = x.nrows();
    if n != y.len() {
        return Err(GsError::InvalidConfig(format!(
            "{} rows but {} target values",
            n,
            y.len()
        )));
    }
    let y_mean = y.mean().unwrap_or(0.0);
    let yc = &y - y_mean;
    let y_norm = yc.dot(&yc).sqrt();
    let dof = n.saturating_sub(2) as f64;

    let f_values: Vec<f64> = (0..x.ncols())
        .into_par_iter()
        .map(|j| {
            let column = x.column(j);
            let mean = column.mean().unwrap_or(0.0);
            let mut cross = 0.0;
            let mut x_ss = 0.0;
            for (xi, yi) in column.iter().zip(yc.iter()) {
                let d = xi - mean;
                cross += d * yi;
                x_ss += d * d;
            }
            if x_ss <= 0.0 || y_norm <= 0.0 {
                return 0.0;
            }
            let r = cross / (x_ss.sqrt() * y_norm);
            // Rounding can push r² just past 1.
            let r2 = (r * r).min(1.0);
            if r2 >= 1.0 {
                f64::INFINITY
            } else {
                r2 / (1.0 - r2) * dof
            }
        })
        .collect();

    let p_values = match FisherSnedecor::new(1.0, dof) {
        Ok(dist) => f_values
            .iter()
            .map(|&f| if f > 0.0 { dist.sf(f) } else { 1.0 })
            .collect(),
        Err(_) => {
            warn!("Too few samples ({}) for F-test p-values.", n);
            vec![f64::NAN; f_values.len()]
        }
    };
    Ok(MarkerScores { f_values, p_values })
}

/// Indices of the `k` highest scores in ascending column order. Ties favour
/// the lower column index.
pub fn top_k_indices(scores: &[f64], k: usize) -> Vec<usize> {
    if k >= scores.len() {
        return (0..scores.len()).collect();
    }
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));
    let mut kept = order[..k].to_vec();
    kept.sort_unstable();
    kept
}

// --- Subset ---

/// Retained marker columns together with the full training marker panel they
/// index into.
#[derive(Clone, Debug)]
pub struct MarkerSubset {
    indices: Vec<usize>,
    f_values: Vec<f64>,
    p_values: Vec<f64>,
    panel: Vec<MarkerInfo>,
}

impl MarkerSubset {
    /// Keeps every marker, without scores.
    pub fn all(panel: &[MarkerInfo]) -> Self {
        Self {
            indices: (0..panel.len()).collect(),
            f_values: vec![f64::NAN; panel.len()],
            p_values: vec![f64::NAN; panel.len()],
            panel: panel.to_vec(),
        }
    }

    /// Scores the training rows and keeps the `k` best markers.
    pub fn select_top_k(
        panel: &[MarkerInfo],
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        k: usize,
    ) -> Result<Self> {
        if panel.len() != x.ncols() {
            return Err(GsError::ShapeMismatch {
                expected: panel.len(),
                found: x.ncols(),
            });
        }
        if k == 0 {
            return Err(GsError::InvalidConfig(
                "top-k marker count must be at least 1".to_string(),
            ));
        }
        let scores = f_regression(x, y)?;
        let indices = top_k_indices(&scores.f_values, k);
        let constant = scores.f_values.iter().filter(|f| **f == 0.0).count();
        debug!("{} marker(s) have zero F-score.", constant);
        info!(
            "Marker selection kept {} of {} markers (top-k = {}).",
            indices.len(),
            panel.len(),
            k
        );
        Ok(Self {
            f_values: indices.iter().map(|&i| scores.f_values[i]).collect(),
            p_values: indices.iter().map(|&i| scores.p_values[i]).collect(),
            indices,
            panel: panel.to_vec(),
        })
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    // Width of the matrices this subset applies to.
    pub fn n_total(&self) -> usize {
        self.panel.len()
    }

    pub fn panel(&self) -> &[MarkerInfo] {
        &self.panel
    }

    /// Retained markers with their F-statistic and p-value.
    pub fn selected(&self) -> impl Iterator<Item = (&MarkerInfo, f64, f64)> + '_ {
        self.indices
            .iter()
            .zip(self.f_values.iter().zip(self.p_values.iter()))
            .map(|(&i, (&f, &p))| (&self.panel[i], f, p))
    }

    /// Column-selects `x`, which must have the full training width.
    pub fn apply(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        if x.ncols() != self.n_total() {
            return Err(GsError::ShapeMismatch {
                expected: self.n_total(),
                found: x.ncols(),
            });
        }
        Ok(x.select(Axis(1), &self.indices))
    }
}
