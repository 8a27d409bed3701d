//! Penalized and Bayesian linear regressors with an unpenalized intercept.
//!
//! All three center `X` and `y` on the training means, estimate marker
//! effects on the centered data and recover the intercept as
//! `ȳ - x̄ · β`.

use log::{debug, warn};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

use super::{
    check_features, check_training_data, mean_and_variance, FittedModel, ModelKind, Regressor,
};
use crate::error::Result;
use crate::linalg;

// --- Shared fit type ---

/// Marker effects plus intercept.
#[derive(Clone, Debug)]
pub struct LinearFit {
    pub coefficients: Array1<f64>,
    pub intercept: f64,
}

impl LinearFit {
    pub(crate) fn from_centered(
        coefficients: Array1<f64>,
        x_means: &Array1<f64>,
        y_mean: f64,
    ) -> Self {
        let intercept = y_mean - x_means.dot(&coefficients);
        Self {
            coefficients,
            intercept,
        }
    }
}

impl FittedModel for LinearFit {
    fn n_features(&self) -> usize {
        self.coefficients.len()
    }

    fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>> {
        check_features(self.n_features(), x.ncols())?;
        Ok(x.dot(&self.coefficients) + self.intercept)
    }
}

fn center(x: ArrayView2<f64>, y: ArrayView1<f64>) -> (Array1<f64>, Array2<f64>, f64, Array1<f64>) {
    let n = x.nrows() as f64;
    let x_means = x.sum_axis(Axis(0)) / n;
    let xc = &x - &x_means;
    let (y_mean, _) = mean_and_variance(y);
    let yc = &y - y_mean;
    (x_means, xc, y_mean, yc)
}

// --- Ridge ---

/// L2-penalized least squares (ridge regression BLUP).
#[derive(Clone, Copy, Debug)]
pub struct Ridge {
    pub alpha: f64,
}

impl Ridge {
    pub fn new(alpha: f64) -> Self {
        Self { alpha }
    }
}

impl Regressor for Ridge {
    fn kind(&self) -> ModelKind {
        ModelKind::RrBlup
    }

    fn fit(&self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<Box<dyn FittedModel>> {
        check_training_data(x, y)?;
        let (x_means, xc, y_mean, yc) = center(x, y);
        let (n, p) = xc.dim();

        // Solve in whichever space is smaller.
        let coefficients = if p > n {
            let mut k = xc.dot(&xc.t());
            k.diag_mut().mapv_inplace(|d| d + self.alpha);
            let dual = linalg::solve(k.view(), yc.view(), "ridge dual system")?;
            xc.t().dot(&dual)
        } else {
            let mut a = xc.t().dot(&xc);
            a.diag_mut().mapv_inplace(|d| d + self.alpha);
            let rhs = xc.t().dot(&yc);
            linalg::solve(a.view(), rhs.view(), "ridge normal equations")?
        };
        debug!("Ridge fitted {} coefficients (alpha = {}).", p, self.alpha);
        Ok(Box::new(LinearFit::from_centered(coefficients, &x_means, y_mean)))
    }
}

// --- Elastic net / LASSO ---

fn soft_threshold(value: f64, threshold: f64) -> f64 {
    if value > threshold {
        value - threshold
    } else if value < -threshold {
        value + threshold
    } else {
        0.0
    }
}

/// Elastic-net regression by cyclic coordinate descent, minimizing
/// `1/(2n)·‖y - Xβ‖² + α·ρ·‖β‖₁ + α·(1-ρ)/2·‖β‖²`.
#[derive(Clone, Copy, Debug)]
pub struct ElasticNet {
    pub alpha: f64,
    pub l1_ratio: f64,
    pub max_iter: usize,
    pub tol: f64,
}

impl ElasticNet {
    pub fn new(alpha: f64, l1_ratio: f64) -> Self {
        Self {
            alpha,
            l1_ratio,
            max_iter: 1000,
            tol: 1e-4,
        }
    }

    pub fn lasso(alpha: f64) -> Self {
        Self::new(alpha, 1.0)
    }

    pub(crate) fn fit_linear(&self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<LinearFit> {
        check_training_data(x, y)?;
        let (x_means, xc, y_mean, yc) = center(x, y);
        let (n, p) = xc.dim();
        let n = n as f64;
        let l1 = n * self.alpha * self.l1_ratio;
        let l2 = n * self.alpha * (1.0 - self.l1_ratio);

        let norms: Vec<f64> = xc.axis_iter(Axis(1)).map(|c| c.dot(&c)).collect();
        let mut beta = Array1::<f64>::zeros(p);
        let mut residual = yc;
        let mut converged = false;

        for iteration in 0..self.max_iter {
            let mut max_step = 0.0f64;
            let mut max_beta = 0.0f64;
            for j in 0..p {
                if norms[j] == 0.0 {
                    continue;
                }
                let column = xc.column(j);
                let old = beta[j];
                let rho = column.dot(&residual) + norms[j] * old;
                let new = soft_threshold(rho, l1) / (norms[j] + l2);
                if new != old {
                    residual.scaled_add(old - new, &column);
                    beta[j] = new;
                }
                max_step = max_step.max((new - old).abs());
                max_beta = max_beta.max(new.abs());
            }
            if max_beta == 0.0 || max_step / max_beta < self.tol {
                debug!("Coordinate descent converged after {} sweeps.", iteration + 1);
                converged = true;
                break;
            }
        }
        if !converged {
            warn!(
                "Coordinate descent did not converge in {} sweeps (alpha = {}, l1_ratio = {}).",
                self.max_iter, self.alpha, self.l1_ratio
            );
        }
        let nonzero = beta.iter().filter(|b| **b != 0.0).count();
        debug!("{} of {} coefficients are non-zero.", nonzero, p);
        Ok(LinearFit::from_centered(beta, &x_means, y_mean))
    }
}

impl Regressor for ElasticNet {
    fn kind(&self) -> ModelKind {
        if self.l1_ratio >= 1.0 {
            ModelKind::Lasso
        } else {
            ModelKind::ElasticNet
        }
    }

    fn fit(&self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<Box<dyn FittedModel>> {
        Ok(Box::new(self.fit_linear(x, y)?))
    }
}

// --- Bayesian ridge ---

/// Bayesian ridge regression with Gamma priors on the noise precision
/// (`alpha`) and weight precision (`lambda`), fitted by evidence
/// maximization. Each iteration reuses one eigendecomposition of `X Xᵀ`.
#[derive(Clone, Copy, Debug)]
pub struct BayesianRidge {
    pub max_iter: usize,
    pub tol: f64,
    pub alpha_1: f64,
    pub alpha_2: f64,
    pub lambda_1: f64,
    pub lambda_2: f64,
}

impl Default for BayesianRidge {
    fn default() -> Self {
        Self {
            max_iter: 300,
            tol: 1e-3,
            alpha_1: 1e-6,
            alpha_2: 1e-6,
            lambda_1: 1e-6,
            lambda_2: 1e-6,
        }
    }
}

impl BayesianRidge {
    pub(crate) fn fit_linear(&self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<LinearFit> {
        check_training_data(x, y)?;
        let (x_means, xc, y_mean, yc) = center(x, y);
        let n = xc.nrows() as f64;

        let (eigenvalues, u) = linalg::symmetric_eigen(xc.dot(&xc.t()).view());
        let eigenvalues = eigenvalues.mapv(|e| e.max(0.0));
        let z = u.t().dot(&yc);

        let (_, y_var) = mean_and_variance(yc.view());
        let mut alpha = 1.0 / (y_var + f64::EPSILON);
        let mut lambda = 1.0;

        // coef = Xᵀ (X Xᵀ + (λ/α) I)⁻¹ y, evaluated in the eigenbasis.
        let coefficients_for = |alpha: f64, lambda: f64| -> Array1<f64> {
            let shrink = lambda / alpha;
            let scaled = Array1::from_iter(
                z.iter()
                    .zip(eigenvalues.iter())
                    .map(|(zi, ei)| zi / (ei + shrink)),
            );
            xc.t().dot(&u.dot(&scaled))
        };

        let mut coefficients = coefficients_for(alpha, lambda);
        for iteration in 0..self.max_iter {
            let shrink = lambda / alpha;
            let fitted = u.dot(&Array1::from_iter(
                z.iter()
                    .zip(eigenvalues.iter())
                    .map(|(zi, ei)| zi * ei / (ei + shrink)),
            ));
            let sse = (&yc - &fitted).mapv(|r| r * r).sum();
            let gamma: f64 = eigenvalues
                .iter()
                .map(|e| alpha * e / (lambda + alpha * e))
                .sum();

            lambda = (gamma + 2.0 * self.lambda_1)
                / (coefficients.dot(&coefficients) + 2.0 * self.lambda_2);
            alpha = (n - gamma + 2.0 * self.alpha_1) / (sse + 2.0 * self.alpha_2);

            let updated = coefficients_for(alpha, lambda);
            let change: f64 = (&updated - &coefficients).mapv(f64::abs).sum();
            coefficients = updated;
            if iteration > 0 && change < self.tol {
                debug!("Bayesian ridge converged after {} iterations.", iteration + 1);
                break;
            }
        }
        debug!(
            "Bayesian ridge precisions: alpha = {:.4e}, lambda = {:.4e}",
            alpha, lambda
        );
        Ok(LinearFit::from_centered(coefficients, &x_means, y_mean))
    }
}

impl Regressor for BayesianRidge {
    fn kind(&self) -> ModelKind {
        ModelKind::BayesA
    }

    fn fit(&self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<Box<dyn FittedModel>> {
        Ok(Box::new(self.fit_linear(x, y)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GsError;
    use approx::assert_relative_eq;
    use ndarray::array;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use rand_distr::{Distribution, Normal};

    /// `y = 2·x0 - x1 + 3` plus a little noise.
    fn linear_data(n: usize, p: usize) -> (Array2<f64>, Array1<f64>) {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let normal = Normal::new(0.0, 1.0).unwrap();
        let x = Array2::from_shape_fn((n, p), |_| normal.sample(&mut rng));
        let noise = Normal::new(0.0, 0.01).unwrap();
        let y = Array1::from_iter(
            (0..n).map(|i| 2.0 * x[[i, 0]] - x[[i, 1]] + 3.0 + noise.sample(&mut rng)),
        );
        (x, y)
    }

    #[test]
    fn ridge_recovers_linear_signal() {
        let (x, y) = linear_data(200, 5);
        let fit = Ridge::new(1e-3).fit(x.view(), y.view()).unwrap();
        let pred = fit.predict(x.view()).unwrap();
        for (p, t) in pred.iter().zip(y.iter()) {
            assert_relative_eq!(p, t, epsilon = 0.1);
        }
    }

    #[test]
    fn ridge_primal_and_dual_agree() {
        // p > n takes the dual path; compare against the primal solution.
        let (x, y) = linear_data(8, 12);
        let ridge = Ridge::new(1.0);
        let dual = ridge.fit(x.view(), y.view()).unwrap().predict(x.view()).unwrap();

        let (x_means, xc, y_mean, yc) = center(x.view(), y.view());
        let mut a = xc.t().dot(&xc);
        a.diag_mut().mapv_inplace(|d| d + 1.0);
        let beta = linalg::solve(a.view(), xc.t().dot(&yc).view(), "test").unwrap();
        let primal = LinearFit::from_centered(beta, &x_means, y_mean)
            .predict(x.view())
            .unwrap();
        for (d, p) in dual.iter().zip(primal.iter()) {
            assert_relative_eq!(d, p, epsilon = 1e-8);
        }
    }

    #[test]
    fn lasso_zeroes_irrelevant_markers() {
        let (x, y) = linear_data(150, 6);
        let fit = ElasticNet::lasso(0.05).fit_linear(x.view(), y.view()).unwrap();
        assert!(fit.coefficients[0] > 1.5);
        assert!(fit.coefficients[1] < -0.5);
        for j in 2..6 {
            assert_relative_eq!(fit.coefficients[j], 0.0, epsilon = 0.05);
        }
        assert_relative_eq!(fit.intercept, 3.0, epsilon = 0.1);
    }

    #[test]
    fn huge_penalty_predicts_the_mean() {
        let (x, y) = linear_data(50, 4);
        let fit = ElasticNet::new(1e6, 0.5).fit_linear(x.view(), y.view()).unwrap();
        assert!(fit.coefficients.iter().all(|b| *b == 0.0));
        assert_relative_eq!(fit.intercept, y.mean().unwrap(), epsilon = 1e-12);
    }

    #[test]
    fn bayesian_ridge_fits_signal() {
        let (x, y) = linear_data(100, 10);
        let fit = BayesianRidge::default().fit_linear(x.view(), y.view()).unwrap();
        assert_relative_eq!(fit.coefficients[0], 2.0, epsilon = 0.05);
        assert_relative_eq!(fit.coefficients[1], -1.0, epsilon = 0.05);
        assert_relative_eq!(fit.intercept, 3.0, epsilon = 0.05);
    }

    #[test]
    fn predict_checks_width() {
        let fit = LinearFit {
            coefficients: array![1.0, 2.0],
            intercept: 0.0,
        };
        assert!(matches!(
            fit.predict(array![[1.0, 2.0, 3.0]].view()),
            Err(GsError::ShapeMismatch {
                expected: 2,
                found: 3
            })
        ));
    }
}
