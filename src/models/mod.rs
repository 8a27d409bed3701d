//! Model registry.
//!
//! Every supported name maps to a [`Regressor`] with fixed hyperparameters.
//! Fitting produces a [`FittedModel`] that remembers how many marker columns
//! it was trained on and refuses any other width at prediction time.

pub mod gblup;
pub mod kernel;
pub mod linear;
pub mod scaler;
pub mod trees;

use std::fmt;
use std::str::FromStr;

use log::{debug, warn};
use ndarray::{Array1, ArrayView1, ArrayView2};

use crate::error::{GsError, Result};

pub use gblup::{gblup_solve, Gblup, GblupModel, GblupOutput};
pub use scaler::StandardScaler;

/// An unfitted estimator with fixed hyperparameters.
pub trait Regressor: Send + Sync {
    fn kind(&self) -> ModelKind;

    fn fit(&self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<Box<dyn FittedModel>>;
}

/// Result of [`Regressor::fit`].
pub trait FittedModel: Send + Sync {
    /// Marker columns the model was trained on.
    fn n_features(&self) -> usize;

    fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ModelKind {
    Gblup,
    RrBlup,
    Lasso,
    Krr,
    BayesA,
    Svr,
    RandomForest,
    Gbdt,
    XgBoost,
    LightGbm,
    CatBoost,
    ElasticNet,
}

impl ModelKind {
    pub const ALL: [ModelKind; 12] = [
        ModelKind::Gblup,
        ModelKind::RrBlup,
        ModelKind::Lasso,
        ModelKind::Krr,
        ModelKind::BayesA,
        ModelKind::Svr,
        ModelKind::RandomForest,
        ModelKind::Gbdt,
        ModelKind::XgBoost,
        ModelKind::LightGbm,
        ModelKind::CatBoost,
        ModelKind::ElasticNet,
    ];

    /// Canonical display name.
    pub fn name(self) -> &'static str {
        match self {
            ModelKind::Gblup => "GBLUP",
            ModelKind::RrBlup => "rrBLUP",
            ModelKind::Lasso => "LASSO",
            ModelKind::Krr => "KRR",
            ModelKind::BayesA => "BayesA",
            ModelKind::Svr => "SVR",
            ModelKind::RandomForest => "RF",
            ModelKind::Gbdt => "GBDT",
            ModelKind::XgBoost => "XGBoost",
            ModelKind::LightGbm => "LightGBM",
            ModelKind::CatBoost => "CatBoost",
            ModelKind::ElasticNet => "ElasticNet",
        }
    }

    /// Kinds whose original implementations can offload to a GPU.
    pub fn has_gpu_variant(self) -> bool {
        matches!(
            self,
            ModelKind::XgBoost | ModelKind::LightGbm | ModelKind::CatBoost
        )
    }
}

impl FromStr for ModelKind {
    type Err = GsError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        ModelKind::ALL
            .iter()
            .copied()
            .find(|k| k.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| GsError::UnsupportedModel(wanted.to_string()))
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Model choice plus the run-level knobs some regressors consume.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelSpec {
    pub kind: ModelKind,
    /// Size of the run's worker pool.
    pub threads: usize,
    /// Accepted for compatibility; every model fits on the CPU.
    pub use_gpu: bool,
    /// Narrow-sense heritability used by GBLUP.
    pub heritability: f64,
    /// Seed for stochastic models (bagging, SVR coordinate order).
    pub seed: u64,
}

impl ModelSpec {
    pub fn new(kind: ModelKind) -> Self {
        Self {
            kind,
            threads: num_cpus::get(),
            use_gpu: false,
            heritability: gblup::DEFAULT_HERITABILITY,
            seed: 42,
        }
    }
}

/// Builds the configured regressor for a model spec.
pub fn build_regressor(spec: &ModelSpec) -> Result<Box<dyn Regressor>> {
    if spec.use_gpu {
        if spec.kind.has_gpu_variant() {
            warn!(
                "GPU acceleration requested for {}; fitting on CPU instead.",
                spec.kind
            );
        } else {
            debug!("{} has no GPU variant; --gpu ignored.", spec.kind);
        }
    }
    debug!("Building {} for {} thread(s).", spec.kind, spec.threads);
    let regressor: Box<dyn Regressor> = match spec.kind {
        ModelKind::Gblup => Box::new(Gblup::new(spec.heritability)?),
        ModelKind::RrBlup => Box::new(linear::Ridge::new(1.0)),
        ModelKind::Lasso => Box::new(linear::ElasticNet::lasso(0.01)),
        ModelKind::ElasticNet => Box::new(linear::ElasticNet::new(0.1, 0.5)),
        ModelKind::BayesA => Box::new(linear::BayesianRidge::default()),
        ModelKind::Krr => Box::new(kernel::KernelRidge::rbf(0.1)),
        ModelKind::Svr => Box::new(kernel::LinearSvr::new(100.0, 0.1, spec.seed)),
        ModelKind::RandomForest => Box::new(trees::RandomForest::new(500, spec.seed)),
        ModelKind::Gbdt => Box::new(trees::GradientBoosting::gbdt()),
        ModelKind::XgBoost => Box::new(trees::GradientBoosting::xgboost()),
        ModelKind::LightGbm => Box::new(trees::GradientBoosting::lightgbm()),
        ModelKind::CatBoost => Box::new(trees::GradientBoosting::catboost()),
    };
    Ok(regressor)
}

pub(crate) fn check_features(expected: usize, found: usize) -> Result<()> {
    if expected != found {
        return Err(GsError::ShapeMismatch { expected, found });
    }
    Ok(())
}

/// Shared preconditions of every `fit`.
pub(crate) fn check_training_data(x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<()> {
    if x.nrows() != y.len() {
        return Err(GsError::InvalidConfig(format!(
            "{} training rows but {} target values",
            x.nrows(),
            y.len()
        )));
    }
    if x.nrows() < 2 || x.ncols() == 0 {
        return Err(GsError::InvalidConfig(format!(
            "cannot fit a model on a {}x{} matrix",
            x.nrows(),
            x.ncols()
        )));
    }
    if y.iter().any(|v| !v.is_finite()) {
        return Err(GsError::Numerical(
            "training targets contain non-finite values".to_string(),
        ));
    }
    Ok(())
}

/// Population mean and variance.
pub(crate) fn mean_and_variance(values: ArrayView1<f64>) -> (f64, f64) {
    let n = values.len().max(1) as f64;
    let mean = values.sum() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_names_case_insensitively() {
        assert_eq!("gblup".parse::<ModelKind>().unwrap(), ModelKind::Gblup);
        assert_eq!("RRBLUP".parse::<ModelKind>().unwrap(), ModelKind::RrBlup);
        assert_eq!("xgboost".parse::<ModelKind>().unwrap(), ModelKind::XgBoost);
        assert_eq!(" rf ".parse::<ModelKind>().unwrap(), ModelKind::RandomForest);
        for kind in ModelKind::ALL {
            assert_eq!(kind.to_string().parse::<ModelKind>().unwrap(), kind);
        }
    }

    #[test]
    fn unknown_name_is_unsupported() {
        match "DeepGS".parse::<ModelKind>() {
            Err(GsError::UnsupportedModel(name)) => assert_eq!(name, "DeepGS"),
            other => panic!("unexpected: {:?}", other.map(|k| k.name())),
        }
    }

    #[test]
    fn factory_builds_every_kind() {
        for kind in ModelKind::ALL {
            let mut spec = ModelSpec::new(kind);
            spec.use_gpu = true;
            assert_eq!(build_regressor(&spec).unwrap().kind(), kind);
        }
    }

    #[test]
    fn factory_rejects_bad_heritability() {
        let mut spec = ModelSpec::new(ModelKind::Gblup);
        spec.heritability = 1.5;
        assert!(matches!(
            build_regressor(&spec),
            Err(GsError::InvalidConfig(_))
        ));
    }
}
