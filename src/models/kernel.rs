//! Kernel ridge regression and linear support vector regression.

use log::{debug, warn};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use super::linear::LinearFit;
use super::{check_features, check_training_data, FittedModel, ModelKind, Regressor};
use crate::error::Result;
use crate::linalg;

fn row_sq_norms(x: ArrayView2<f64>) -> Array1<f64> {
    x.map_axis(Axis(1), |row| row.dot(&row))
}

/// `K[i, j] = exp(-γ · ‖a_i - b_j‖²)`.
fn rbf_kernel(
    a: ArrayView2<f64>,
    a_norms: &Array1<f64>,
    b: ArrayView2<f64>,
    b_norms: &Array1<f64>,
    gamma: f64,
) -> Array2<f64> {
    let mut k = a.dot(&b.t());
    for ((i, j), v) in k.indexed_iter_mut() {
        let dist = (a_norms[i] + b_norms[j] - 2.0 * *v).max(0.0);
        *v = (-gamma * dist).exp();
    }
    k
}

/// RBF kernel ridge regression without intercept. `gamma` defaults to one
/// over the number of markers.
#[derive(Clone, Copy, Debug)]
pub struct KernelRidge {
    pub alpha: f64,
    pub gamma: Option<f64>,
}

impl KernelRidge {
    pub fn rbf(alpha: f64) -> Self {
        Self { alpha, gamma: None }
    }
}

impl Regressor for KernelRidge {
    fn kind(&self) -> ModelKind {
        ModelKind::Krr
    }

    fn fit(&self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<Box<dyn FittedModel>> {
        check_training_data(x, y)?;
        let gamma = self.gamma.unwrap_or(1.0 / x.ncols() as f64);
        let norms = row_sq_norms(x);
        let mut k = rbf_kernel(x, &norms, x, &norms, gamma);
        k.diag_mut().mapv_inplace(|d| d + self.alpha);
        let dual = linalg::solve(k.view(), y, "kernel ridge system")?;
        debug!(
            "Kernel ridge fitted on {} samples (gamma = {:.3e}).",
            x.nrows(),
            gamma
        );
        Ok(Box::new(KernelRidgeModel {
            x_train: x.to_owned(),
            norms,
            dual,
            gamma,
        }))
    }
}

#[derive(Clone, Debug)]
pub struct KernelRidgeModel {
    x_train: Array2<f64>,
    norms: Array1<f64>,
    dual: Array1<f64>,
    gamma: f64,
}

impl FittedModel for KernelRidgeModel {
    fn n_features(&self) -> usize {
        self.x_train.ncols()
    }

    fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>> {
        check_features(self.n_features(), x.ncols())?;
        let k = rbf_kernel(
            x,
            &row_sq_norms(x),
            self.x_train.view(),
            &self.norms,
            self.gamma,
        );
        Ok(k.dot(&self.dual))
    }
}

/// Linear ε-insensitive support vector regression solved by dual coordinate
/// descent. The intercept is learned as the weight of a constant feature.
#[derive(Clone, Copy, Debug)]
pub struct LinearSvr {
    pub c: f64,
    pub epsilon: f64,
    pub tol: f64,
    pub max_iter: usize,
    pub seed: u64,
}

impl LinearSvr {
    pub fn new(c: f64, epsilon: f64, seed: u64) -> Self {
        Self {
            c,
            epsilon,
            tol: 1e-3,
            max_iter: 1000,
            seed,
        }
    }

    pub(crate) fn fit_linear(&self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<LinearFit> {
        check_training_data(x, y)?;
        let (n, p) = x.dim();
        let diag: Vec<f64> = x.outer_iter().map(|row| row.dot(&row) + 1.0).collect();

        let mut beta = vec![0.0f64; n];
        let mut w = Array1::<f64>::zeros(p);
        let mut bias = 0.0f64;
        let mut order: Vec<usize> = (0..n).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut converged = false;

        for sweep in 0..self.max_iter {
            order.shuffle(&mut rng);
            let mut max_violation = 0.0f64;
            for &i in &order {
                let row = x.row(i);
                let g = row.dot(&w) + bias - y[i];
                let g_pos = g + self.epsilon;
                let g_neg = g - self.epsilon;
                let b = beta[i];

                let violation = if b == 0.0 {
                    if g_pos < 0.0 {
                        -g_pos
                    } else if g_neg > 0.0 {
                        g_neg
                    } else {
                        0.0
                    }
                } else if b >= self.c {
                    g_pos.max(0.0)
                } else if b <= -self.c {
                    (-g_neg).max(0.0)
                } else if b > 0.0 {
                    g_pos.abs()
                } else {
                    g_neg.abs()
                };
                max_violation = max_violation.max(violation);

                let h = diag[i];
                let step = if g_pos < h * b {
                    -g_pos / h
                } else if g_neg > h * b {
                    -g_neg / h
                } else {
                    -b
                };
                let updated = (b + step).clamp(-self.c, self.c);
                let delta = updated - b;
                if delta.abs() > 1e-12 {
                    beta[i] = updated;
                    w.scaled_add(delta, &row);
                    bias += delta;
                }
            }
            if max_violation < self.tol {
                debug!("Linear SVR converged after {} sweeps.", sweep + 1);
                converged = true;
                break;
            }
        }
        if !converged {
            warn!(
                "Linear SVR did not converge in {} sweeps (C = {}, epsilon = {}).",
                self.max_iter, self.c, self.epsilon
            );
        }
        let support = beta.iter().filter(|b| **b != 0.0).count();
        debug!("{} of {} samples are support vectors.", support, n);
        Ok(LinearFit {
            coefficients: w,
            intercept: bias,
        })
    }
}

impl Regressor for LinearSvr {
    fn kind(&self) -> ModelKind {
        ModelKind::Svr
    }

    fn fit(&self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<Box<dyn FittedModel>> {
        Ok(Box::new(self.fit_linear(x, y)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn rbf_kernel_is_one_on_the_diagonal() {
        let x = array![[0.0, 1.0], [2.0, 2.0]];
        let norms = row_sq_norms(x.view());
        let k = rbf_kernel(x.view(), &norms, x.view(), &norms, 0.5);
        assert_relative_eq!(k[[0, 0]], 1.0);
        assert_relative_eq!(k[[1, 1]], 1.0);
        assert_relative_eq!(k[[0, 1]], (-0.5f64 * 5.0).exp(), epsilon = 1e-12);
        assert_relative_eq!(k[[0, 1]], k[[1, 0]]);
    }

    #[test]
    fn kernel_ridge_interpolates_with_small_penalty() {
        let x = array![[0.0], [1.0], [2.0], [3.0]];
        let y = array![1.0, 2.0, 0.5, 1.5];
        let model = KernelRidge {
            alpha: 1e-8,
            gamma: Some(2.0),
        }
        .fit(x.view(), y.view())
        .unwrap();
        let pred = model.predict(x.view()).unwrap();
        for (p, t) in pred.iter().zip(y.iter()) {
            assert_relative_eq!(p, t, epsilon = 1e-4);
        }
        // Far from every training point the prediction decays to zero.
        let far = model.predict(array![[100.0]].view()).unwrap();
        assert_relative_eq!(far[0], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn svr_fits_within_the_tube() {
        let x = Array2::from_shape_fn((40, 2), |(i, j)| ((i * (j + 3)) % 7) as f64 - 3.0);
        let y = Array1::from_iter((0..40).map(|i| 1.5 * x[[i, 0]] - 0.5 * x[[i, 1]] + 2.0));
        let fit = LinearSvr::new(100.0, 0.1, 42).fit_linear(x.view(), y.view()).unwrap();
        let pred = fit.predict(x.view()).unwrap();
        for (p, t) in pred.iter().zip(y.iter()) {
            assert!((p - t).abs() < 0.2, "prediction {} too far from {}", p, t);
        }
    }

    #[test]
    fn svr_is_reproducible_for_a_seed() {
        let x = Array2::from_shape_fn((25, 3), |(i, j)| ((i + 2 * j) % 5) as f64);
        let y = Array1::from_iter((0..25).map(|i| (i % 4) as f64));
        let a = LinearSvr::new(100.0, 0.1, 7).fit_linear(x.view(), y.view()).unwrap();
        let b = LinearSvr::new(100.0, 0.1, 7).fit_linear(x.view(), y.view()).unwrap();
        assert_eq!(a.coefficients, b.coefficients);
        assert_eq!(a.intercept, b.intercept);
    }
}
