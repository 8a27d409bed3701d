//! Genotype decoding into a sample × marker dosage matrix.
//!
//! Two sources are supported: a binary triplet (`.fam`, `.bim`, `.bed` sharing
//! a base name) and a plain or bgzipped VCF. Both produce a [`GenotypeMatrix`]
//! whose cells hold the alternate-allele dosage {0, 1, 2}, or
//! [`MISSING_DOSAGE`] for calls that could not be interpreted.

pub mod packed;
pub mod vcf;

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::{debug, info};
use ndarray::{Array2, Axis};

use crate::error::{GsError, Result};
use crate::selection;

/// Sample identity used to align genotype rows with phenotype rows.
pub type SampleId = String;

/// Sentinel stored for missing or unparseable genotype calls.
pub const MISSING_DOSAGE: i8 = -1;

/// Joins a family ID and individual ID into the composite key used for
/// binary-triplet samples.
pub fn composite_id(fid: &str, iid: &str) -> SampleId {
    format!("{}_{}", fid, iid)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MarkerInfo {
    pub id: String,
    pub chromosome: String,
    pub position: u64,
}

/// Decoded dosages with their sample and marker labels.
#[derive(Clone, Debug)]
pub struct GenotypeMatrix {
    sample_ids: Vec<SampleId>,
    markers: Vec<MarkerInfo>,
    dosages: Array2<i8>,
}

impl GenotypeMatrix {
    pub fn new(
        sample_ids: Vec<SampleId>,
        markers: Vec<MarkerInfo>,
        dosages: Array2<i8>,
    ) -> Result<Self> {
        if dosages.nrows() != sample_ids.len() || dosages.ncols() != markers.len() {
            return Err(GsError::Format(format!(
                "dosage matrix is {}x{} but {} sample(s) and {} marker(s) were described",
                dosages.nrows(),
                dosages.ncols(),
                sample_ids.len(),
                markers.len()
            )));
        }
        let mut seen = HashSet::with_capacity(sample_ids.len());
        for id in &sample_ids {
            if !seen.insert(id.as_str()) {
                return Err(GsError::Format(format!("duplicate sample identity '{}'", id)));
            }
        }
        Ok(Self {
            sample_ids,
            markers,
            dosages,
        })
    }

    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }

    pub fn n_markers(&self) -> usize {
        self.markers.len()
    }

    pub fn sample_ids(&self) -> &[SampleId] {
        &self.sample_ids
    }

    pub fn markers(&self) -> &[MarkerInfo] {
        &self.markers
    }

    pub fn dosages(&self) -> &Array2<i8> {
        &self.dosages
    }

    /// Dosages as `f64`, the representation every regressor consumes.
    /// Missing cells stay at -1.0.
    pub fn to_f64(&self) -> Array2<f64> {
        self.dosages.mapv(f64::from)
    }

    pub fn missing_count(&self) -> usize {
        self.dosages.iter().filter(|&&d| d == MISSING_DOSAGE).count()
    }

    /// New matrix holding the given rows, in the given order.
    pub fn select_rows(&self, rows: &[usize]) -> GenotypeMatrix {
        GenotypeMatrix {
            sample_ids: rows.iter().map(|&r| self.sample_ids[r].clone()).collect(),
            markers: self.markers.clone(),
            dosages: self.dosages.select(Axis(0), rows),
        }
    }
}

/// Byte layout of the `.bed` payload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BedLayout {
    /// One padded row per sample, two bits per marker read most-significant
    /// first, dosage = sum of the two bits.
    #[default]
    SampleMajor,
    /// Standard PLINK 1 SNP-major file, read through `bed-reader`.
    SnpMajor,
}

impl FromStr for BedLayout {
    type Err = GsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sample-major" | "sample_major" | "samples" => Ok(BedLayout::SampleMajor),
            "snp-major" | "snp_major" | "plink" => Ok(BedLayout::SnpMajor),
            other => Err(GsError::InvalidConfig(format!(
                "unknown bed layout '{}' (expected sample-major or snp-major)",
                other
            ))),
        }
    }
}

impl fmt::Display for BedLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BedLayout::SampleMajor => write!(f, "sample-major"),
            BedLayout::SnpMajor => write!(f, "snp-major"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GenotypeSource {
    /// Base path shared by the `.fam`, `.bim` and `.bed` files.
    BedTriplet { prefix: PathBuf },
    Vcf { path: PathBuf },
}

impl GenotypeSource {
    /// Classifies a genotype path by extension. A `.bed` path or a bare prefix
    /// whose `.bed` sibling exists selects the binary triplet.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();

        if name.ends_with(".vcf") || name.ends_with(".vcf.gz") {
            return Ok(GenotypeSource::Vcf {
                path: path.to_path_buf(),
            });
        }
        if name.ends_with(".bed") {
            return Ok(GenotypeSource::BedTriplet {
                prefix: path.with_extension(""),
            });
        }
        if packed::triplet_paths(path).bed.is_file() {
            return Ok(GenotypeSource::BedTriplet {
                prefix: path.to_path_buf(),
            });
        }
        Err(GsError::Format(format!(
            "cannot determine genotype format of {} (expected .vcf, .vcf.gz, .bed or a .bed prefix)",
            path.display()
        )))
    }
}

/// Decodes a genotype source, optionally restricted to an allow-list of
/// sample identities (kept in genotype file order).
pub fn decode_genotypes(
    source: &GenotypeSource,
    layout: BedLayout,
    allow_list: Option<&[SampleId]>,
) -> Result<GenotypeMatrix> {
    let matrix = match source {
        GenotypeSource::BedTriplet { prefix } => match layout {
            BedLayout::SampleMajor => packed::read_sample_major(prefix, allow_list)?,
            BedLayout::SnpMajor => packed::read_snp_major(prefix, allow_list)?,
        },
        GenotypeSource::Vcf { path } => vcf::read_vcf(path, allow_list)?,
    };
    info!(
        "Decoded genotype matrix: {} samples x {} markers ({} missing calls).",
        matrix.n_samples(),
        matrix.n_markers(),
        matrix.missing_count()
    );
    Ok(matrix)
}

/// Rows to decode for an optional allow-list over the discovered identities.
pub(crate) fn rows_to_keep(
    discovered: &[SampleId],
    allow_list: Option<&[SampleId]>,
) -> Result<Vec<usize>> {
    match allow_list {
        Some(allowed) => selection::match_allow_list(discovered, allowed),
        None => Ok((0..discovered.len()).collect()),
    }
}

/// Transposes marker-major call vectors into a samples × markers matrix.
pub(crate) fn build_matrix(
    marker_major_calls: Vec<Vec<i8>>,
    num_samples: usize,
) -> Result<Array2<i8>> {
    let num_markers = marker_major_calls.len();
    let mut matrix = Array2::<i8>::zeros((num_samples, num_markers));
    for (marker_idx, calls) in marker_major_calls.iter().enumerate() {
        if calls.len() != num_samples {
            return Err(GsError::Format(format!(
                "genotype count mismatch for marker index {}: expected {}, found {}",
                marker_idx,
                num_samples,
                calls.len()
            )));
        }
        for (sample_idx, &call) in calls.iter().enumerate() {
            matrix[[sample_idx, marker_idx]] = call;
        }
    }
    debug!("Built {}x{} dosage matrix.", num_samples, num_markers);
    Ok(matrix)
}
