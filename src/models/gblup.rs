//! Genomic best linear unbiased prediction.
//!
//! Markers are standardized on the training rows, a genomic relationship
//! matrix `G = Z Zᵀ / p` is formed from the standardized matrix `Z`, and the
//! mixed-model equations are solved with variance components fixed by the
//! heritability:
//!
//! ```text
//! Vg = h² · var(y)        Ve = (1 - h²) · var(y)
//! V  = Vg · G + Ve · I    V · u = y - ȳ
//! ĝ_train = Vg · G · u + ȳ
//! ĝ_test  = Vg · (Z_test Z_trainᵀ / p) · u + ȳ
//! ```

use log::debug;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

use super::{
    check_features, check_training_data, mean_and_variance, FittedModel, ModelKind, Regressor,
    StandardScaler,
};
use crate::error::{GsError, Result};
use crate::linalg;

pub const DEFAULT_HERITABILITY: f64 = 0.5;

/// Added to the diagonal of G so it stays positive definite.
pub const DIAGONAL_JITTER: f64 = 1e-6;

pub(crate) fn validate_heritability(h2: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&h2) {
        return Err(GsError::InvalidConfig(format!(
            "heritability must lie in [0, 1], got {}",
            h2
        )));
    }
    Ok(())
}

#[derive(Clone, Copy, Debug)]
pub struct Gblup {
    heritability: f64,
}

impl Gblup {
    pub fn new(heritability: f64) -> Result<Self> {
        validate_heritability(heritability)?;
        Ok(Self { heritability })
    }
}

impl Regressor for Gblup {
    fn kind(&self) -> ModelKind {
        ModelKind::Gblup
    }

    fn fit(&self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<Box<dyn FittedModel>> {
        Ok(Box::new(GblupModel::fit(x, y, self.heritability)?))
    }
}

/// A solved GBLUP system, ready to score new rows.
#[derive(Clone, Debug)]
pub struct GblupModel {
    scaler: StandardScaler,
    z_train: Array2<f64>,
    weights: Array1<f64>,
    genetic_variance: f64,
    residual_variance: f64,
    y_mean: f64,
    training_values: Array1<f64>,
}

impl GblupModel {
    pub fn fit(x: ArrayView2<f64>, y: ArrayView1<f64>, heritability: f64) -> Result<Self> {
        validate_heritability(heritability)?;
        check_training_data(x, y)?;

        let (n, p) = x.dim();
        let scaler = StandardScaler::fit(x);
        let z_train = scaler.transform(x)?;

        let mut g = z_train.dot(&z_train.t()) / p as f64;
        g.diag_mut().mapv_inplace(|d| d + DIAGONAL_JITTER);

        let (y_mean, y_var) = mean_and_variance(y);
        let genetic_variance = heritability * y_var;
        let residual_variance = (1.0 - heritability) * y_var;
        debug!(
            "GBLUP on {} samples x {} markers: Vg = {:.4}, Ve = {:.4}",
            n, p, genetic_variance, residual_variance
        );

        let mut v = &g * genetic_variance;
        v.diag_mut().mapv_inplace(|d| d + residual_variance);
        let centered = &y - y_mean;
        let weights = linalg::solve(v.view(), centered.view(), "GBLUP mixed-model equations")?;

        let training_values = g.dot(&weights) * genetic_variance + y_mean;
        Ok(Self {
            scaler,
            z_train,
            weights,
            genetic_variance,
            residual_variance,
            y_mean,
            training_values,
        })
    }

    pub fn scaler(&self) -> &StandardScaler {
        &self.scaler
    }

    pub fn genetic_variance(&self) -> f64 {
        self.genetic_variance
    }

    pub fn residual_variance(&self) -> f64 {
        self.residual_variance
    }

    /// Breeding values of the rows the model was fitted on.
    pub fn training_values(&self) -> &Array1<f64> {
        &self.training_values
    }
}

impl FittedModel for GblupModel {
    fn n_features(&self) -> usize {
        self.scaler.n_features()
    }

    fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>> {
        check_features(self.n_features(), x.ncols())?;
        let z = self.scaler.transform(x)?;
        let cross = z.dot(&self.z_train.t()) / self.n_features() as f64;
        Ok(cross.dot(&self.weights) * self.genetic_variance + self.y_mean)
    }
}

/// Training and (optionally) test breeding values from one GBLUP solve.
#[derive(Clone, Debug)]
pub struct GblupOutput {
    pub train: Array1<f64>,
    pub test: Option<Array1<f64>>,
}

/// Solves GBLUP on `x_train`/`y_train` and scores `x_test` with the scaler
/// learned from the training rows.
pub fn gblup_solve(
    x_train: ArrayView2<f64>,
    y_train: ArrayView1<f64>,
    x_test: Option<ArrayView2<f64>>,
    heritability: f64,
) -> Result<GblupOutput> {
    let model = GblupModel::fit(x_train, y_train, heritability)?;
    let test = x_test.map(|x| model.predict(x)).transpose()?;
    Ok(GblupOutput {
        train: model.training_values().clone(),
        test,
    })
}
