//! Sample allow-lists and consistent row selection across genotype and
//! phenotype data.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use log::{info, warn};
use ndarray::Axis;

use crate::error::{GsError, Result};
use crate::genotype::{composite_id, GenotypeMatrix, SampleId};
use crate::phenotype::PhenotypeVector;

/// Reads a whitespace-delimited allow-list. One column is taken as the sample
/// id; two columns are FID and IID and become the composite id.
pub fn read_allow_list(path: impl AsRef<Path>) -> Result<Vec<SampleId>> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|e| GsError::io(path, e))?;
    let mut ids = Vec::new();
    for (line_num, line) in content.lines().enumerate() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        match fields.as_slice() {
            [] => continue,
            [id] => ids.push(id.to_string()),
            [fid, iid] => ids.push(composite_id(fid, iid)),
            _ => {
                return Err(GsError::Format(format!(
                    "{} line {}: expected one or two columns, found {}",
                    path.display(),
                    line_num + 1,
                    fields.len()
                )))
            }
        }
    }
    info!("Read {} sample id(s) from allow-list {}", ids.len(), path.display());
    Ok(ids)
}

/// Indices of `available` that appear in `allowed`, in `available` order.
pub fn match_allow_list(available: &[SampleId], allowed: &[SampleId]) -> Result<Vec<usize>> {
    let allowed_set: HashSet<&str> = allowed.iter().map(String::as_str).collect();
    let rows: Vec<usize> = available
        .iter()
        .enumerate()
        .filter(|(_, id)| allowed_set.contains(id.as_str()))
        .map(|(i, _)| i)
        .collect();

    if rows.is_empty() {
        return Err(GsError::NoMatch {
            requested: allowed.len(),
            available: available.len(),
        });
    }
    if rows.len() < allowed_set.len() {
        let present: HashSet<&str> = rows.iter().map(|&i| available[i].as_str()).collect();
        let absent: Vec<&&str> = allowed_set.iter().filter(|id| !present.contains(**id)).collect();
        warn!(
            "{} allow-listed sample(s) not found in genotype data (e.g. {:?}).",
            absent.len(),
            absent.iter().take(3).collect::<Vec<_>>()
        );
    }
    Ok(rows)
}

/// New matrix restricted to the allow-listed samples.
pub fn select_samples(matrix: &GenotypeMatrix, allowed: &[SampleId]) -> Result<GenotypeMatrix> {
    let rows = match_allow_list(matrix.sample_ids(), allowed)?;
    Ok(matrix.select_rows(&rows))
}

/// Drops samples whose trait value is missing from both the matrix and the
/// phenotype vector. The phenotype must already be aligned to the matrix.
pub fn drop_missing_phenotypes(
    matrix: &GenotypeMatrix,
    phenotype: &PhenotypeVector,
) -> Result<(GenotypeMatrix, PhenotypeVector)> {
    if phenotype.sample_ids != matrix.sample_ids() {
        return Err(GsError::InvalidConfig(
            "phenotype vector is not aligned to the genotype matrix".to_string(),
        ));
    }
    let rows: Vec<usize> = phenotype
        .values
        .iter()
        .enumerate()
        .filter(|(_, v)| !v.is_nan())
        .map(|(i, _)| i)
        .collect();

    let dropped = phenotype.len() - rows.len();
    if dropped > 0 {
        warn!(
            "Dropping {} sample(s) with missing '{}' values.",
            dropped, phenotype.trait_name
        );
    }
    let kept = PhenotypeVector {
        trait_name: phenotype.trait_name.clone(),
        sample_ids: rows.iter().map(|&i| phenotype.sample_ids[i].clone()).collect(),
        values: phenotype.values.select(Axis(0), &rows),
    };
    Ok((matrix.select_rows(&rows), kept))
}
