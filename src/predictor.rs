//! Breeding value prediction for an independent genotype set.

use log::{info, warn};
use ndarray::Array1;

use crate::error::{GsError, Result};
use crate::features::MarkerSubset;
use crate::genotype::{GenotypeMatrix, SampleId};
use crate::models::FittedModel;

/// Predicted breeding values, one per prediction sample, in matrix order.
#[derive(Clone, Debug)]
pub struct GebvResult {
    pub sample_ids: Vec<SampleId>,
    pub values: Array1<f64>,
}

impl GebvResult {
    pub fn len(&self) -> usize {
        self.sample_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sample_ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SampleId, f64)> + '_ {
        self.sample_ids.iter().zip(self.values.iter().copied())
    }
}

/// Applies the training marker subset and `model` to `matrix`.
///
/// `matrix` must have as many markers as the training matrix had before
/// selection; otherwise nothing is computed. Marker ids that differ at the
/// same column are only reported.
pub fn predict_breeding_values(
    model: &dyn FittedModel,
    subset: &MarkerSubset,
    matrix: &GenotypeMatrix,
) -> Result<GebvResult> {
    if matrix.n_markers() != subset.n_total() {
        return Err(GsError::ShapeMismatch {
            expected: subset.n_total(),
            found: matrix.n_markers(),
        });
    }
    let renamed = matrix
        .markers()
        .iter()
        .zip(subset.panel())
        .filter(|(a, b)| a.id != b.id)
        .count();
    if renamed > 0 {
        warn!(
            "{} of {} prediction marker id(s) differ from the training panel; columns are matched by position.",
            renamed,
            matrix.n_markers()
        );
    }
    if matrix.missing_count() > 0 {
        warn!(
            "Prediction set has {} missing genotype call(s).",
            matrix.missing_count()
        );
    }

    let x = subset.apply(matrix.to_f64().view())?;
    let values = model.predict(x.view())?;
    info!("Predicted breeding values for {} samples.", values.len());
    Ok(GebvResult {
        sample_ids: matrix.sample_ids().to_vec(),
        values,
    })
}
