use ndarray::{Array1, Array2, ArrayView2, Axis};

use super::check_features;
use crate::error::Result;

/// Column standardization learned from one matrix and replayed on others.
///
/// Uses the population standard deviation; constant columns get a scale of 1
/// so they map to zero instead of dividing by zero.
#[derive(Clone, Debug, PartialEq)]
pub struct StandardScaler {
    means: Array1<f64>,
    scales: Array1<f64>,
}

impl StandardScaler {
    pub fn fit(x: ArrayView2<f64>) -> Self {
        let n = x.nrows().max(1) as f64;
        let means = x.sum_axis(Axis(0)) / n;
        let scales = Array1::from_iter(x.axis_iter(Axis(1)).zip(means.iter()).map(|(col, &mean)| {
            let var = col.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            let sd = var.sqrt();
            if sd > 0.0 && sd.is_finite() {
                sd
            } else {
                1.0
            }
        }));
        Self { means, scales }
    }

    pub fn means(&self) -> &Array1<f64> {
        &self.means
    }

    pub fn scales(&self) -> &Array1<f64> {
        &self.scales
    }

    pub fn n_features(&self) -> usize {
        self.means.len()
    }

    pub fn transform(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        check_features(self.n_features(), x.ncols())?;
        Ok((&x - &self.means) / &self.scales)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn standardizes_columns_with_population_std() {
        let x = array![[0.0, 5.0], [2.0, 5.0]];
        let scaler = StandardScaler::fit(x.view());
        assert_eq!(scaler.means(), &array![1.0, 5.0]);
        assert_eq!(scaler.scales(), &array![1.0, 1.0]);
        let z = scaler.transform(x.view()).unwrap();
        assert_relative_eq!(z[[0, 0]], -1.0);
        assert_relative_eq!(z[[1, 0]], 1.0);
        assert_relative_eq!(z[[0, 1]], 0.0);
    }

    #[test]
    fn transform_rejects_wrong_width() {
        let scaler = StandardScaler::fit(array![[1.0, 2.0]].view());
        assert!(scaler.transform(array![[1.0]].view()).is_err());
    }
}
