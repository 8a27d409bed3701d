//! Text variant-call decoding.
//!
//! Plain files are read as-is; `.gz` files go through a multi-member gzip
//! decoder, which covers both bgzip and ordinary gzip output. The header is
//! parsed by `noodles-vcf`, and data lines are then read from the same stream and decoded with a best-effort policy: a
//! call whose allele tokens are not all integers becomes [`MISSING_DOSAGE`] for
//! that one cell and decoding carries on.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use flate2::read::MultiGzDecoder;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use noodles_vcf as vcf;

use super::{build_matrix, rows_to_keep, GenotypeMatrix, MarkerInfo, SampleId, MISSING_DOSAGE};
use crate::error::{GsError, Result};

/// Fixed columns before the first sample column.
const FIXED_COLUMNS: usize = 9;

/// Dosage of one sample call such as `0/1`, `1|1:35` or `./.`.
///
/// Only the text before the first `:` is genotype. Alleles split on `|` when
/// present, otherwise on `/`; the dosage is the sum of the allele indices.
pub fn parse_call(call: &str) -> i8 {
    let genotype = call.split(':').next().unwrap_or("");
    let separator = if genotype.contains('|') { '|' } else { '/' };
    let mut sum: i32 = 0;
    for allele in genotype.split(separator) {
        match allele.trim().parse::<i32>() {
            Ok(index) if index >= 0 => sum += index,
            _ => return MISSING_DOSAGE,
        }
    }
    i8::try_from(sum).unwrap_or(MISSING_DOSAGE)
}

/// Marker metadata and kept-sample dosages for one data line.
pub(crate) fn parse_record_line(
    line: &str,
    n_samples: usize,
    keep: &[usize],
) -> Result<(MarkerInfo, Vec<i8>)> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() != FIXED_COLUMNS + n_samples {
        return Err(GsError::Format(format!(
            "expected {} tab-separated columns ({} samples), found {}",
            FIXED_COLUMNS + n_samples,
            n_samples,
            fields.len()
        )));
    }
    let chromosome = fields[0].to_string();
    let position = fields[1].parse::<u64>().map_err(|e| {
        GsError::Format(format!("invalid position '{}': {}", fields[1], e))
    })?;
    let id = if fields[2] == "." || fields[2].is_empty() {
        format!("{}:{}:{}:{}", chromosome, position, fields[3], fields[4])
    } else {
        fields[2].to_string()
    };

    let calls = keep
        .iter()
        .map(|&s| parse_call(fields[FIXED_COLUMNS + s]))
        .collect();
    Ok((
        MarkerInfo {
            id,
            chromosome,
            position,
        },
        calls,
    ))
}

fn open_vcf(path: &Path) -> Result<Box<dyn BufRead>> {
    let file = File::open(path).map_err(|e| GsError::io(path, e))?;
    let gzipped = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz"));
    let reader: Box<dyn BufRead> = if gzipped {
        Box::new(BufReader::new(MultiGzDecoder::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };
    Ok(reader)
}

pub fn read_vcf(path: &Path, allow_list: Option<&[SampleId]>) -> Result<GenotypeMatrix> {
    info!("Reading VCF: {}", path.display());
    let mut reader = vcf::io::Reader::new(open_vcf(path)?);
    let header = reader.read_header().map_err(|e| {
        GsError::Format(format!("invalid VCF header in {}: {}", path.display(), e))
    })?;

    let sample_names: Vec<SampleId> = header.sample_names().iter().cloned().collect();
    if sample_names.is_empty() {
        return Err(GsError::Format(format!(
            "VCF header from {} contains no samples",
            path.display()
        )));
    }
    let keep = rows_to_keep(&sample_names, allow_list)?;
    debug!(
        "VCF has {} samples, decoding {} of them.",
        sample_names.len(),
        keep.len()
    );

    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner()
        .template("{spinner:.green} [{elapsed_precise}] {pos} VCF records read")
    {
        spinner.set_style(style);
    }

    let input = reader.get_mut();
    let mut markers = Vec::new();
    let mut marker_major_calls: Vec<Vec<i8>> = Vec::new();
    let mut missing_calls = 0usize;
    let mut line = String::new();
    let mut record_num = 0usize;

    loop {
        line.clear();
        let bytes_read = input.read_line(&mut line).map_err(|e| GsError::io(path, e))?;
        if bytes_read == 0 {
            break;
        }
        let record = line.trim_end_matches(['\n', '\r']);
        if record.is_empty() || record.starts_with('#') {
            continue;
        }
        record_num += 1;
        let (marker, calls) = parse_record_line(record, sample_names.len(), &keep).map_err(
            |e| GsError::Format(format!("{} record {}: {}", path.display(), record_num, e)),
        )?;
        missing_calls += calls.iter().filter(|&&c| c == MISSING_DOSAGE).count();
        markers.push(marker);
        marker_major_calls.push(calls);
        spinner.inc(1);
    }
    spinner.finish_and_clear();

    if markers.is_empty() {
        return Err(GsError::Format(format!(
            "VCF {} contains no variant records",
            path.display()
        )));
    }
    if missing_calls > 0 {
        warn!(
            "{} genotype call(s) in {} were missing or unparseable and set to {}.",
            missing_calls,
            path.display(),
            MISSING_DOSAGE
        );
    }
    info!("Read {} variant records from {}.", markers.len(), path.display());

    let kept_ids: Vec<SampleId> = keep.iter().map(|&i| sample_names[i].clone()).collect();
    let dosages = build_matrix(marker_major_calls, kept_ids.len())?;
    GenotypeMatrix::new(kept_ids, markers, dosages)
}
