//! Output tables for one analysis.
//!
//! Every table is rendered in memory and staged as a temporary file inside the
//! destination directory. Files are renamed into place only after all of them
//! were staged, so a failed render leaves no partial output behind.
//!
//! Each rename is atomic on its own, but the set of renames is not: if one
//! fails partway through, tables already renamed belong to this run while the
//! rest still hold whatever an earlier run left in the directory.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use log::{info, warn};
use tempfile::NamedTempFile;

use crate::error::{GsError, Result};
use crate::predictor::GebvResult;
use crate::trainer::{AnalysisResult, Metrics};

pub const GEBV_FILE: &str = "GEBV.csv";
pub const ACTUAL_VS_PREDICTED_FILE: &str = "actual_vs_predicted.csv";
pub const METRICS_FILE: &str = "metrics.tsv";
pub const SELECTED_MARKERS_FILE: &str = "selected_markers.tsv";

fn csv_bytes(writer: csv::Writer<Vec<u8>>, name: &str) -> Result<Vec<u8>> {
    writer
        .into_inner()
        .map_err(|e| GsError::io(name, e.into_error()))
}

fn render_gebv(gebv: &GebvResult) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["SampleID", "GEBV"])?;
    for (id, value) in gebv.iter() {
        let value = value.to_string();
        writer.write_record([id.as_str(), value.as_str()])?;
    }
    csv_bytes(writer, GEBV_FILE)
}

fn render_actual_vs_predicted(metrics: &Metrics) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["Actual", "Predicted"])?;
    for (actual, predicted) in metrics.actual.iter().zip(metrics.predicted.iter()) {
        writer.write_record([actual.to_string(), predicted.to_string()])?;
    }
    csv_bytes(writer, ACTUAL_VS_PREDICTED_FILE)
}

fn format_stat(value: f64) -> String {
    if value.is_nan() {
        "NA".to_string()
    } else {
        value.to_string()
    }
}

fn render_metrics(result: &AnalysisResult) -> io::Result<Vec<u8>> {
    let m = &result.metrics;
    let mut out = Vec::new();
    writeln!(out, "metric\tvalue")?;
    writeln!(out, "model\t{}", result.model)?;
    writeln!(out, "trait\t{}", result.trait_name)?;
    writeln!(out, "PCC\t{}", format_stat(m.pcc))?;
    writeln!(out, "R2\t{}", format_stat(m.r2))?;
    writeln!(out, "MSE\t{}", format_stat(m.mse))?;
    writeln!(out, "RMSE\t{}", format_stat(m.rmse))?;
    writeln!(out, "n_train\t{}", m.n_train)?;
    writeln!(out, "n_test\t{}", m.n_test())?;
    writeln!(out, "n_markers\t{}", result.subset.len())?;
    writeln!(out, "train_seconds\t{:.6}", m.train_time.as_secs_f64())?;
    writeln!(out, "predict_seconds\t{:.6}", m.predict_time.as_secs_f64())?;
    Ok(out)
}

fn render_selected_markers(result: &AnalysisResult) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    writeln!(out, "marker_id\tchromosome\tposition\tF\tp_value")?;
    for (marker, f, p) in result.subset.selected() {
        writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}",
            marker.id,
            marker.chromosome,
            marker.position,
            format_stat(f),
            format_stat(p)
        )?;
    }
    Ok(out)
}

fn stage(dir: &Path, name: &str, contents: &[u8]) -> Result<(NamedTempFile, PathBuf)> {
    let target = dir.join(name);
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| GsError::io(dir, e))?;
    tmp.write_all(contents)
        .and_then(|_| tmp.flush())
        .map_err(|e| GsError::io(&target, e))?;
    Ok((tmp, target))
}

/// Writes the result tables into `out_dir`, creating it if needed, and
/// returns the written paths. `GEBV.csv` is only written when the result
/// carries prediction-set values; otherwise a `GEBV.csv` left by an earlier
/// run is removed once the other tables are in place.
pub fn write_report(result: &AnalysisResult, out_dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(out_dir).map_err(|e| GsError::io(out_dir, e))?;

    let mut tables: Vec<(&str, Vec<u8>)> = Vec::with_capacity(4);
    if let Some(gebv) = &result.gebv {
        tables.push((GEBV_FILE, render_gebv(gebv)?));
    } else {
        info!("No prediction set supplied; skipping {}.", GEBV_FILE);
    }
    tables.push((
        ACTUAL_VS_PREDICTED_FILE,
        render_actual_vs_predicted(&result.metrics)?,
    ));
    tables.push((
        METRICS_FILE,
        render_metrics(result).map_err(|e| GsError::io(METRICS_FILE, e))?,
    ));
    tables.push((
        SELECTED_MARKERS_FILE,
        render_selected_markers(result).map_err(|e| GsError::io(SELECTED_MARKERS_FILE, e))?,
    ));

    let staged = tables
        .iter()
        .map(|(name, contents)| stage(out_dir, name, contents))
        .collect::<Result<Vec<_>>>()?;

    let mut written = Vec::with_capacity(staged.len());
    for (tmp, target) in staged {
        tmp.persist(&target)
            .map_err(|e| GsError::io(&target, e.error))?;
        info!("Wrote {}", target.display());
        written.push(target);
    }

    let stale = out_dir.join(GEBV_FILE);
    if result.gebv.is_none() && stale.exists() {
        fs::remove_file(&stale).map_err(|e| GsError::io(&stale, e))?;
        warn!("Removed {} from an earlier run.", stale.display());
    }
    Ok(written)
}
