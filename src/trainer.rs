//! Train/test protocol: seeded split, marker selection on the training rows,
//! fit, held-out evaluation and optional scoring of a prediction set.

use std::fmt;
use std::time::{Duration, Instant};

use log::{info, warn};
use ndarray::{Array1, ArrayView1, Axis};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::error::{GsError, Result};
use crate::features::MarkerSubset;
use crate::genotype::GenotypeMatrix;
use crate::models::{build_regressor, ModelKind, ModelSpec};
use crate::phenotype::PhenotypeVector;
use crate::predictor::{predict_breeding_values, GebvResult};

// --- Configuration ---

pub const DEFAULT_TEST_FRACTION: f64 = 0.2;
pub const DEFAULT_TOP_K: usize = 40_000;

#[derive(Clone, Debug, PartialEq)]
pub struct TrainerConfig {
    /// Share of samples held out for evaluation, in (0, 1).
    pub test_fraction: f64,
    pub seed: u64,
    /// Markers kept by F-statistic ranking; `None` keeps all of them.
    pub top_k: Option<usize>,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            test_fraction: DEFAULT_TEST_FRACTION,
            seed: 0,
            top_k: Some(DEFAULT_TOP_K),
        }
    }
}

impl TrainerConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.test_fraction > 0.0 && self.test_fraction < 1.0) {
            return Err(GsError::InvalidConfig(format!(
                "test fraction must lie strictly between 0 and 1, got {}",
                self.test_fraction
            )));
        }
        if self.top_k == Some(0) {
            return Err(GsError::InvalidConfig(
                "top-k marker count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

// --- Split ---

/// Row indices of the two partitions, in shuffled order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Split {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Shuffles `0..n` with a seeded ChaCha8 stream and holds out the first
/// `ceil(n · test_fraction)` indices.
pub fn train_test_split(n: usize, test_fraction: f64, seed: u64) -> Result<Split> {
    let n_test = (n as f64 * test_fraction).ceil() as usize;
    let n_train = n.saturating_sub(n_test);
    // Both sides need two points for a correlation.
    if n_test < 2 || n_train < 2 {
        return Err(GsError::InvalidConfig(format!(
            "{} samples with test fraction {} leave {} training and {} test samples; both need at least 2",
            n, test_fraction, n_train, n_test
        )));
    }
    let mut order: Vec<usize> = (0..n).collect();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    order.shuffle(&mut rng);
    let train = order.split_off(n_test);
    Ok(Split { train, test: order })
}

// --- Metrics ---

/// Held-out accuracy plus timings.
#[derive(Clone, Debug)]
pub struct Metrics {
    pub pcc: f64,
    pub r2: f64,
    pub mse: f64,
    pub rmse: f64,
    pub actual: Array1<f64>,
    pub predicted: Array1<f64>,
    pub n_train: usize,
    pub train_time: Duration,
    pub predict_time: Duration,
}

impl Metrics {
    pub fn compute(
        actual: Array1<f64>,
        predicted: Array1<f64>,
        n_train: usize,
        train_time: Duration,
        predict_time: Duration,
    ) -> Self {
        let pcc = pearson(actual.view(), predicted.view());
        let r2 = r_squared(actual.view(), predicted.view());
        let mse = (&actual - &predicted).mapv(|d| d * d).mean().unwrap_or(f64::NAN);
        Self {
            pcc,
            r2,
            mse,
            rmse: mse.sqrt(),
            actual,
            predicted,
            n_train,
            train_time,
            predict_time,
        }
    }

    pub fn n_test(&self) -> usize {
        self.actual.len()
    }
}

impl fmt::Display for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "PCC:  {:.4}", self.pcc)?;
        writeln!(f, "R2:   {:.4}", self.r2)?;
        writeln!(f, "MSE:  {:.4}", self.mse)?;
        writeln!(f, "RMSE: {:.4}", self.rmse)?;
        write!(
            f,
            "{} train / {} test samples, fit {:.2?}, predict {:.2?}",
            self.n_train,
            self.n_test(),
            self.train_time,
            self.predict_time
        )
    }
}

/// Pearson correlation; NaN when either side has zero variance.
pub fn pearson(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    let n = a.len() as f64;
    if a.len() != b.len() || a.is_empty() {
        return f64::NAN;
    }
    let mean_a = a.sum() / n;
    let mean_b = b.sum() / n;
    let (mut cov, mut var_a, mut var_b) = (0.0, 0.0, 0.0);
    for (x, y) in a.iter().zip(b.iter()) {
        cov += (x - mean_a) * (y - mean_b);
        var_a += (x - mean_a).powi(2);
        var_b += (y - mean_b).powi(2);
    }
    if var_a <= 0.0 || var_b <= 0.0 {
        return f64::NAN;
    }
    cov / (var_a.sqrt() * var_b.sqrt())
}

/// Coefficient of determination. A constant `actual` scores 1 for a perfect
/// prediction and 0 otherwise.
pub fn r_squared(actual: ArrayView1<f64>, predicted: ArrayView1<f64>) -> f64 {
    let mean = actual.mean().unwrap_or(f64::NAN);
    let ss_res: f64 = actual
        .iter()
        .zip(predicted.iter())
        .map(|(a, p)| (a - p).powi(2))
        .sum();
    let ss_tot: f64 = actual.iter().map(|a| (a - mean).powi(2)).sum();
    if ss_tot == 0.0 {
        return if ss_res == 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

// --- Train and evaluate ---

/// Everything one run produces.
#[derive(Clone, Debug)]
pub struct AnalysisResult {
    pub model: ModelKind,
    pub trait_name: String,
    pub metrics: Metrics,
    pub subset: MarkerSubset,
    pub gebv: Option<GebvResult>,
}

/// Splits, selects markers, fits `spec` and evaluates on the held-out rows.
/// When `prediction` is given, its breeding values are predicted with the
/// same marker subset and fitted model.
pub fn train_and_evaluate(
    genotypes: &GenotypeMatrix,
    phenotype: &PhenotypeVector,
    spec: &ModelSpec,
    config: &TrainerConfig,
    prediction: Option<&GenotypeMatrix>,
) -> Result<AnalysisResult> {
    config.validate()?;
    if phenotype.sample_ids != genotypes.sample_ids() {
        return Err(GsError::InvalidConfig(
            "phenotype vector is not aligned to the genotype matrix".to_string(),
        ));
    }
    let missing = genotypes.missing_count();
    if missing > 0 {
        warn!(
            "{} missing genotype call(s) enter the model as dosage -1.",
            missing
        );
    }

    // --- 1. Split on the full panel ---
    let x = genotypes.to_f64();
    let y = &phenotype.values;
    let split = train_test_split(genotypes.n_samples(), config.test_fraction, config.seed)?;
    info!(
        "Split {} samples into {} training and {} test (seed {}).",
        genotypes.n_samples(),
        split.train.len(),
        split.test.len(),
        config.seed
    );
    let x_train = x.select(Axis(0), &split.train);
    let y_train = y.select(Axis(0), &split.train);
    let x_test = x.select(Axis(0), &split.test);
    let y_test = y.select(Axis(0), &split.test);

    // --- 2. Marker selection, training rows only ---
    let subset = match config.top_k {
        Some(k) => {
            MarkerSubset::select_top_k(genotypes.markers(), x_train.view(), y_train.view(), k)?
        }
        None => MarkerSubset::all(genotypes.markers()),
    };
    let x_train = subset.apply(x_train.view())?;
    let x_test = subset.apply(x_test.view())?;

    // --- 3. Fit and score the held-out rows ---
    let regressor = build_regressor(spec)?;
    info!(
        "Fitting {} on {} samples x {} markers.",
        regressor.kind(),
        x_train.nrows(),
        x_train.ncols()
    );
    let started = Instant::now();
    let model = regressor.fit(x_train.view(), y_train.view())?;
    let train_time = started.elapsed();

    let started = Instant::now();
    let predicted = model.predict(x_test.view())?;
    let predict_time = started.elapsed();

    let metrics = Metrics::compute(y_test, predicted, split.train.len(), train_time, predict_time);
    info!("{} held-out metrics:\n{}", spec.kind, metrics);

    // --- 4. Optional prediction set ---
    let gebv = prediction
        .map(|m| predict_breeding_values(model.as_ref(), &subset, m))
        .transpose()?;

    Ok(AnalysisResult {
        model: spec.kind,
        trait_name: phenotype.trait_name.clone(),
        metrics,
        subset,
        gebv,
    })
}
