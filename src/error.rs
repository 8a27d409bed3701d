use std::io;

use bed_reader::BedErrorPlus;
use thiserror::Error;

/// Errors raised by the genomic selection core.
///
/// Every variant propagates to the immediate caller. The only failure the
/// core absorbs is an unparseable allele in a VCF call, which becomes the
/// missing sentinel for that one cell.
#[derive(Debug, Error)]
pub enum GsError {
    #[error("format error: {0}")]
    Format(String),

    #[error("none of the {requested} requested sample(s) were found among {available} sample(s) in the genotype source")]
    NoMatch { requested: usize, available: usize },

    #[error("trait column '{trait_name}' not found in {path} (available: {available:?})")]
    TraitNotFound {
        trait_name: String,
        path: String,
        available: Vec<String>,
    },

    #[error("{missing} of {requested} sample(s) have no phenotype record (first missing: '{first}')")]
    Alignment {
        missing: usize,
        requested: usize,
        first: String,
    },

    #[error("{kind} '{name}' is not in the dataset catalog (available: {available:?})")]
    CatalogEntry {
        kind: &'static str,
        name: String,
        available: Vec<String>,
    },

    #[error("unsupported model '{0}'")]
    UnsupportedModel(String),

    #[error("shape mismatch: model expects {expected} marker column(s), prediction matrix has {found}")]
    ShapeMismatch { expected: usize, found: usize },

    #[error("numerical error: {0}")]
    Numerical(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("bed_reader error: {0}")]
    Bed(String),
}

impl From<Box<BedErrorPlus>> for GsError {
    fn from(e: Box<BedErrorPlus>) -> Self {
        GsError::Bed(e.to_string())
    }
}

impl GsError {
    pub(crate) fn io(path: impl AsRef<std::path::Path>, source: io::Error) -> Self {
        GsError::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}

pub type Result<T, E = GsError> = std::result::Result<T, E>;
