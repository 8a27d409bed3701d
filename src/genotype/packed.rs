//! Binary genotype triplet: `.fam` samples, `.bim` markers, `.bed` packed calls.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use bed_reader::{Bed, ReadOptions};
use log::{debug, info, warn};
use ndarray::{Array2, ArrayView2};
use rayon::prelude::*;

use super::{composite_id, rows_to_keep, GenotypeMatrix, MarkerInfo, SampleId, MISSING_DOSAGE};
use crate::error::{GsError, Result};

/// Magic bytes opening every `.bed` file.
pub const BED_MAGIC: [u8; 3] = [0x6C, 0x1B, 0x01];

/// PLINK's missing value for `i8` reads.
const PLINK_MISSING_I8: i8 = -127;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FamRecord {
    pub fid: String,
    pub iid: String,
}

impl FamRecord {
    pub fn sample_id(&self) -> SampleId {
        composite_id(&self.fid, &self.iid)
    }
}

#[derive(Clone, Debug)]
pub struct TripletPaths {
    pub fam: PathBuf,
    pub bim: PathBuf,
    pub bed: PathBuf,
}

fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut name = prefix.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

pub fn triplet_paths(prefix: &Path) -> TripletPaths {
    TripletPaths {
        fam: with_suffix(prefix, ".fam"),
        bim: with_suffix(prefix, ".bim"),
        bed: with_suffix(prefix, ".bed"),
    }
}

/// Bytes per sample row: two bits per marker, padded to a whole byte.
pub fn row_bytes(n_markers: usize) -> usize {
    (2 * n_markers + 7) / 8
}

/// Sample identities and marker metadata of a triplet, read from the `.fam`
/// and `.bim` files through `bed-reader`. The header check is skipped so the
/// same handle serves both payload layouts.
fn open_metadata(paths: &TripletPaths) -> Result<(Bed, Vec<SampleId>, Vec<MarkerInfo>)> {
    let mut bed = Bed::builder(&paths.bed)
        .fam_path(&paths.fam)
        .bim_path(&paths.bim)
        .skip_early_check()
        .build()?;

    let fids: Vec<String> = bed.fid()?.iter().cloned().collect();
    let sample_ids: Vec<SampleId> = fids
        .iter()
        .zip(bed.iid()?.iter())
        .map(|(fid, iid)| composite_id(fid, iid))
        .collect();

    let sids: Vec<String> = bed.sid()?.iter().cloned().collect();
    let chromosomes: Vec<String> = bed.chromosome()?.iter().cloned().collect();
    let positions: Vec<i32> = bed.bp_position()?.iter().copied().collect();
    let mut markers = Vec::with_capacity(sids.len());
    for ((id, chromosome), position) in sids.into_iter().zip(chromosomes).zip(positions) {
        let position = u64::try_from(position).map_err(|_| {
            GsError::Format(format!(
                "{}: marker '{}' has negative position {}",
                paths.bim.display(),
                id,
                position
            ))
        })?;
        markers.push(MarkerInfo {
            id,
            chromosome,
            position,
        });
    }
    debug!(
        "{} samples in {}, {} markers in {}.",
        sample_ids.len(),
        paths.fam.display(),
        markers.len(),
        paths.bim.display()
    );
    Ok((bed, sample_ids, markers))
}

#[inline(always)]
fn unpack_dosage(row: &[u8], marker_idx: usize) -> i8 {
    let byte = row[marker_idx / 4];
    let shift = 6 - 2 * (marker_idx % 4);
    let pair = (byte >> shift) & 0b11;
    ((pair >> 1) + (pair & 1)) as i8
}

/// Decodes the `.bed` bytes (magic included) for the requested sample rows.
pub fn decode_packed_calls(
    bytes: &[u8],
    n_samples: usize,
    n_markers: usize,
    rows: &[usize],
) -> Result<Array2<i8>> {
    if bytes.len() < BED_MAGIC.len() || bytes[..BED_MAGIC.len()] != BED_MAGIC {
        return Err(GsError::Format(format!(
            "invalid .bed header {:02X?} (expected {:02X?})",
            &bytes[..bytes.len().min(BED_MAGIC.len())],
            BED_MAGIC
        )));
    }
    let payload = &bytes[BED_MAGIC.len()..];
    let stride = row_bytes(n_markers);
    if payload.len() != n_samples * stride {
        return Err(GsError::Format(format!(
            ".bed payload is {} bytes, expected {} ({} samples x {} bytes)",
            payload.len(),
            n_samples * stride,
            n_samples,
            stride
        )));
    }

    let decoded_rows: Vec<Vec<i8>> = rows
        .par_iter()
        .map(|&sample_idx| {
            let row = &payload[sample_idx * stride..(sample_idx + 1) * stride];
            (0..n_markers).map(|m| unpack_dosage(row, m)).collect()
        })
        .collect();

    let flat: Vec<i8> = decoded_rows.into_iter().flatten().collect();
    Array2::from_shape_vec((rows.len(), n_markers), flat)
        .map_err(|e| GsError::Format(format!("failed to shape decoded calls: {}", e)))
}

/// Packs a dosage matrix into `.bed` bytes, magic included.
pub fn encode_packed_calls(dosages: ArrayView2<i8>) -> Result<Vec<u8>> {
    let stride = row_bytes(dosages.ncols());
    let mut bytes = Vec::with_capacity(BED_MAGIC.len() + dosages.nrows() * stride);
    bytes.extend_from_slice(&BED_MAGIC);
    for (sample_idx, sample_row) in dosages.outer_iter().enumerate() {
        let mut row = vec![0u8; stride];
        for (marker_idx, &dosage) in sample_row.iter().enumerate() {
            let pair: u8 = match dosage {
                0 => 0b00,
                1 => 0b01,
                2 => 0b11,
                other => {
                    return Err(GsError::Format(format!(
                        "dosage {} at sample {}, marker {} cannot be packed",
                        other, sample_idx, marker_idx
                    )))
                }
            };
            row[marker_idx / 4] |= pair << (6 - 2 * (marker_idx % 4));
        }
        bytes.extend_from_slice(&row);
    }
    Ok(bytes)
}

/// Writes a sample-major triplet under `prefix`.
pub fn write_bed_triplet(
    prefix: &Path,
    samples: &[FamRecord],
    markers: &[MarkerInfo],
    dosages: ArrayView2<i8>,
) -> Result<()> {
    if dosages.nrows() != samples.len() || dosages.ncols() != markers.len() {
        return Err(GsError::ShapeMismatch {
            expected: markers.len(),
            found: dosages.ncols(),
        });
    }
    let paths = triplet_paths(prefix);

    let mut fam = BufWriter::new(File::create(&paths.fam).map_err(|e| GsError::io(&paths.fam, e))?);
    for s in samples {
        writeln!(fam, "{} {} 0 0 0 -9", s.fid, s.iid).map_err(|e| GsError::io(&paths.fam, e))?;
    }
    fam.flush().map_err(|e| GsError::io(&paths.fam, e))?;

    let mut bim = BufWriter::new(File::create(&paths.bim).map_err(|e| GsError::io(&paths.bim, e))?);
    for m in markers {
        writeln!(bim, "{}\t{}\t0\t{}\tA\tG", m.chromosome, m.id, m.position)
            .map_err(|e| GsError::io(&paths.bim, e))?;
    }
    bim.flush().map_err(|e| GsError::io(&paths.bim, e))?;

    fs::write(&paths.bed, encode_packed_calls(dosages)?).map_err(|e| GsError::io(&paths.bed, e))
}

pub fn read_sample_major(prefix: &Path, allow_list: Option<&[SampleId]>) -> Result<GenotypeMatrix> {
    let paths = triplet_paths(prefix);
    info!("Reading sample-major genotype triplet: {}", paths.bed.display());

    let (_, sample_ids, markers) = open_metadata(&paths)?;

    // The payload is read by hand; bed-reader only understands SNP-major rows.
    let keep = rows_to_keep(&sample_ids, allow_list)?;
    let bytes = fs::read(&paths.bed).map_err(|e| GsError::io(&paths.bed, e))?;
    let dosages = decode_packed_calls(&bytes, sample_ids.len(), markers.len(), &keep)?;

    let kept_ids = keep.iter().map(|&i| sample_ids[i].clone()).collect();
    GenotypeMatrix::new(kept_ids, markers, dosages)
}

/// Reads a standard PLINK SNP-major `.bed` through `bed-reader`, counting
/// allele 1.
pub fn read_snp_major(prefix: &Path, allow_list: Option<&[SampleId]>) -> Result<GenotypeMatrix> {
    let paths = triplet_paths(prefix);
    info!("Reading PLINK SNP-major genotype triplet: {}", paths.bed.display());

    let (mut bed, sample_ids, markers) = open_metadata(&paths)?;
    let keep = rows_to_keep(&sample_ids, allow_list)?;
    let iid_index: Vec<isize> = keep.iter().map(|&i| i as isize).collect();

    let raw = ReadOptions::builder()
        .iid_index(iid_index.as_slice())
        .i8()
        .count_a1()
        .read(&mut bed)?;

    let mut plink_missing = 0usize;
    let dosages = Array2::from_shape_fn((raw.nrows(), raw.ncols()), |(i, j)| {
        let value = raw[(i, j)];
        if value == PLINK_MISSING_I8 {
            plink_missing += 1;
            MISSING_DOSAGE
        } else {
            value
        }
    });
    if plink_missing > 0 {
        warn!("{} PLINK missing call(s) mapped to {}.", plink_missing, MISSING_DOSAGE);
    }

    let kept_ids = keep.iter().map(|&i| sample_ids[i].clone()).collect();
    GenotypeMatrix::new(kept_ids, markers, dosages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn fam(ids: &[(&str, &str)]) -> Vec<FamRecord> {
        ids.iter()
            .map(|(f, i)| FamRecord {
                fid: f.to_string(),
                iid: i.to_string(),
            })
            .collect()
    }

    fn markers(n: usize) -> Vec<MarkerInfo> {
        (0..n)
            .map(|i| MarkerInfo {
                id: format!("snp{}", i),
                chromosome: "3".to_string(),
                position: 1000 + i as u64,
            })
            .collect()
    }

    #[test]
    fn packed_round_trip_reproduces_dosages() {
        // 5 markers forces a padded final byte per row.
        let dosages = array![[0i8, 1, 2, 1, 0], [2, 2, 0, 0, 1], [1, 0, 1, 2, 2]];
        let bytes = encode_packed_calls(dosages.view()).unwrap();
        assert_eq!(bytes.len(), 3 + 3 * row_bytes(5));
        let decoded = decode_packed_calls(&bytes, 3, 5, &[0, 1, 2]).unwrap();
        assert_eq!(decoded, dosages);
    }

    #[test]
    fn decode_sums_both_allele_bits() {
        // 0b10 and 0b01 both mean one allele.
        let bytes = [0x6C, 0x1B, 0x01, 0b10_01_11_00];
        let decoded = decode_packed_calls(&bytes, 1, 4, &[0]).unwrap();
        assert_eq!(decoded, array![[1i8, 1, 2, 0]]);
    }

    #[test]
    fn rejects_bad_magic() {
        let bytes = [0x6C, 0x1B, 0x00, 0x00];
        let err = decode_packed_calls(&bytes, 1, 2, &[0]).unwrap_err();
        assert!(matches!(err, GsError::Format(_)));
    }

    #[test]
    fn rejects_truncated_payload() {
        let bytes = [0x6C, 0x1B, 0x01, 0x00];
        let err = decode_packed_calls(&bytes, 2, 2, &[0, 1]).unwrap_err();
        assert!(matches!(err, GsError::Format(_)));
    }

    #[test]
    fn encode_rejects_missing_sentinel() {
        let err = encode_packed_calls(array![[0i8, -1]].view()).unwrap_err();
        assert!(matches!(err, GsError::Format(_)));
    }

    #[test]
    fn triplet_round_trip_with_allow_list() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("panel");
        let samples = fam(&[("F1", "a"), ("F1", "b"), ("F2", "c")]);
        let dosages = array![[0i8, 1, 2], [2, 1, 0], [1, 1, 1]];
        write_bed_triplet(&prefix, &samples, &markers(3), dosages.view()).unwrap();

        let all = read_sample_major(&prefix, None).unwrap();
        assert_eq!(all.sample_ids(), &["F1_a", "F1_b", "F2_c"]);
        assert_eq!(all.dosages(), &dosages);
        assert_eq!(all.markers()[2].id, "snp2");
        assert_eq!(all.markers()[2].position, 1002);

        let allow = vec!["F2_c".to_string(), "F1_a".to_string()];
        let some = read_sample_major(&prefix, Some(&allow)).unwrap();
        assert_eq!(some.sample_ids(), &["F1_a", "F2_c"]);
        assert_eq!(some.dosages(), &array![[0i8, 1, 2], [1, 1, 1]]);
    }

    #[test]
    fn allow_list_without_overlap_is_no_match() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("panel");
        let ids: Vec<(String, String)> = (0..10).map(|i| ("F".to_string(), format!("s{}", i))).collect();
        let samples: Vec<FamRecord> = ids
            .iter()
            .map(|(f, i)| FamRecord {
                fid: f.clone(),
                iid: i.clone(),
            })
            .collect();
        let dosages = Array2::<i8>::ones((10, 4));
        write_bed_triplet(&prefix, &samples, &markers(4), dosages.view()).unwrap();

        let allow = vec!["x_1".to_string(), "x_2".to_string(), "x_3".to_string()];
        let err = read_sample_major(&prefix, Some(&allow)).unwrap_err();
        assert!(matches!(
            err,
            GsError::NoMatch {
                requested: 3,
                available: 10
            }
        ));
    }

    #[test]
    fn malformed_bim_position_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("bad");
        write_bed_triplet(&prefix, &fam(&[("F", "a")]), &markers(1), array![[1i8]].view())
            .unwrap();
        fs::write(
            triplet_paths(&prefix).bim,
            "1\tsnp0\t0\tnot-a-number\tA\tG\n",
        )
        .unwrap();
        assert!(matches!(
            read_sample_major(&prefix, None),
            Err(GsError::Bed(_))
        ));
    }

    // --- PLINK SNP-major ---

    /// 3 samples x 2 SNPs, one byte per SNP, low bits first:
    /// SNP 0 = 00 10 11 (hom A1, het, hom A2), SNP 1 = 01 11 00 (missing, hom A2, hom A1).
    fn snp_major_triplet(dir: &Path) -> PathBuf {
        let prefix = dir.join("plink");
        let samples = fam(&[("F1", "a"), ("F1", "b"), ("F2", "c")]);
        write_bed_triplet(&prefix, &samples, &markers(2), Array2::<i8>::zeros((3, 2)).view())
            .unwrap();
        fs::write(triplet_paths(&prefix).bed, [0x6C, 0x1B, 0x01, 0x38, 0x0D]).unwrap();
        prefix
    }

    #[test]
    fn snp_major_counts_allele_one_and_maps_missing() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = snp_major_triplet(dir.path());

        let m = read_snp_major(&prefix, None).unwrap();
        assert_eq!(m.sample_ids(), &["F1_a", "F1_b", "F2_c"]);
        assert_eq!(m.dosages(), &array![[2i8, -1], [1, 0], [0, 2]]);
        assert_eq!(m.missing_count(), 1);
        assert_eq!(m.markers()[1].id, "snp1");
        assert_eq!(m.markers()[1].position, 1001);
        assert_eq!(m.markers()[1].chromosome, "3");
    }

    #[test]
    fn snp_major_honours_allow_list_order() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = snp_major_triplet(dir.path());
        let allow = vec!["F2_c".to_string(), "F1_a".to_string()];
        let m = read_snp_major(&prefix, Some(&allow)).unwrap();
        assert_eq!(m.sample_ids(), &["F1_a", "F2_c"]);
        assert_eq!(m.dosages(), &array![[2i8, -1], [0, 2]]);
    }
}
