//! Phenotype tables: first column is the sample identity, the rest are traits.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use log::{debug, info};
use ndarray::Array1;

use crate::error::{GsError, Result};
use crate::genotype::SampleId;

/// One trait column aligned to an ordered list of samples.
#[derive(Clone, Debug)]
pub struct PhenotypeVector {
    pub trait_name: String,
    pub sample_ids: Vec<SampleId>,
    pub values: Array1<f64>,
}

impl PhenotypeVector {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn missing_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_nan()).count()
    }
}

/// `,` for `.csv`, tab for `.txt`/`.tsv`; otherwise sniffed from the header.
fn detect_delimiter(path: &Path) -> Result<u8> {
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "csv" => return Ok(b','),
        "txt" | "tsv" => return Ok(b'\t'),
        _ => {}
    }
    let mut first_line = String::new();
    BufReader::new(File::open(path).map_err(|e| GsError::io(path, e))?)
        .read_line(&mut first_line)
        .map_err(|e| GsError::io(path, e))?;
    Ok(if first_line.contains('\t') { b'\t' } else { b',' })
}

fn parse_value(raw: &str) -> Option<f64> {
    match raw {
        "" | "NA" | "na" | "NaN" | "nan" | "." => Some(f64::NAN),
        _ => raw.parse::<f64>().ok(),
    }
}

fn reader_for(path: &Path) -> Result<csv::Reader<File>> {
    let delimiter = detect_delimiter(path)?;
    Ok(csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .trim(csv::Trim::All)
        .from_path(path)?)
}

/// Trait column names, i.e. every header after the sample-id column.
pub fn available_traits(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let path = path.as_ref();
    let mut rdr = reader_for(path)?;
    Ok(rdr.headers()?.iter().skip(1).map(String::from).collect())
}

/// Loads one trait column. With `order`, values follow that sample order and
/// every listed sample must have a record; without it, file order is kept.
pub fn load_phenotype(
    path: impl AsRef<Path>,
    trait_name: &str,
    order: Option<&[SampleId]>,
) -> Result<PhenotypeVector> {
    let path = path.as_ref();
    info!("Loading trait '{}' from {}", trait_name, path.display());
    let mut rdr = reader_for(path)?;

    let headers = rdr.headers()?.clone();
    let traits: Vec<String> = headers.iter().skip(1).map(String::from).collect();
    let column = traits
        .iter()
        .position(|t| t == trait_name)
        .map(|i| i + 1)
        .ok_or_else(|| GsError::TraitNotFound {
            trait_name: trait_name.to_string(),
            path: path.display().to_string(),
            available: traits.clone(),
        })?;

    let mut file_ids: Vec<SampleId> = Vec::new();
    let mut file_values: Vec<f64> = Vec::new();
    let mut index_of: HashMap<SampleId, usize> = HashMap::new();

    for (row_num, record) in rdr.records().enumerate() {
        let record = record?;
        let id = record.get(0).unwrap_or("").to_string();
        if id.is_empty() {
            continue;
        }
        let raw = record.get(column).unwrap_or("");
        let value = parse_value(raw).ok_or_else(|| {
            GsError::Format(format!(
                "{} row {}: value '{}' for trait '{}' is not numeric",
                path.display(),
                row_num + 2,
                raw,
                trait_name
            ))
        })?;
        if index_of.insert(id.clone(), file_ids.len()).is_some() {
            return Err(GsError::Format(format!(
                "{}: duplicate sample identity '{}'",
                path.display(),
                id
            )));
        }
        file_ids.push(id);
        file_values.push(value);
    }
    debug!("{} phenotype records read.", file_ids.len());

    let (sample_ids, values) = match order {
        None => (file_ids, file_values),
        Some(order) => {
            let missing: Vec<&SampleId> =
                order.iter().filter(|id| !index_of.contains_key(*id)).collect();
            if let Some(first) = missing.first() {
                return Err(GsError::Alignment {
                    missing: missing.len(),
                    requested: order.len(),
                    first: first.to_string(),
                });
            }
            let values = order.iter().map(|id| file_values[index_of[id]]).collect();
            (order.to_vec(), values)
        }
    };

    Ok(PhenotypeVector {
        trait_name: trait_name.to_string(),
        sample_ids,
        values: Array1::from(values),
    })
}
