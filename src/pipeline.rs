//! One complete run: decode, align, train, evaluate, predict, report.

use std::path::PathBuf;
use std::time::Instant;

use log::{debug, info};

use crate::catalog::CuratedDataset;
use crate::error::{GsError, Result};
use crate::genotype::{decode_genotypes, BedLayout, GenotypeSource};
use crate::models::gblup::{validate_heritability, DEFAULT_HERITABILITY};
use crate::models::{ModelKind, ModelSpec};
use crate::phenotype::load_phenotype;
use crate::report::write_report;
use crate::selection::{drop_missing_phenotypes, read_allow_list};
use crate::trainer::{train_and_evaluate, AnalysisResult, TrainerConfig};

/// Every input of a run.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub geno: PathBuf,
    pub pheno: PathBuf,
    pub trait_name: String,
    pub model: ModelKind,
    pub out_dir: PathBuf,
    /// Independent genotypes to score with the fitted model.
    pub predict_geno: Option<PathBuf>,
    /// Sample allow-list applied to the training genotypes.
    pub keep: Option<PathBuf>,
    pub bed_layout: BedLayout,
    pub trainer: TrainerConfig,
    pub heritability: f64,
    pub threads: usize,
    pub use_gpu: bool,
    /// Free-form label carried into the logs.
    pub optimization: Option<String>,
}

impl PipelineConfig {
    pub fn new(
        geno: impl Into<PathBuf>,
        pheno: impl Into<PathBuf>,
        trait_name: impl Into<String>,
        out_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            geno: geno.into(),
            pheno: pheno.into(),
            trait_name: trait_name.into(),
            model: ModelKind::Gblup,
            out_dir: out_dir.into(),
            predict_geno: None,
            keep: None,
            bed_layout: BedLayout::default(),
            trainer: TrainerConfig::default(),
            heritability: DEFAULT_HERITABILITY,
            threads: num_cpus::get(),
            use_gpu: false,
            optimization: None,
        }
    }

    /// Run on a curated catalog population.
    pub fn from_dataset(
        dataset: &CuratedDataset,
        trait_name: impl Into<String>,
        out_dir: impl Into<PathBuf>,
    ) -> Self {
        info!(
            "Using curated dataset {} / {}{}",
            dataset.species,
            dataset.population,
            dataset
                .paper
                .as_ref()
                .map(|p| format!(" ({})", p))
                .unwrap_or_default()
        );
        Self::new(&dataset.geno, &dataset.pheno, trait_name, out_dir)
    }

    pub fn validate(&self) -> Result<()> {
        self.trainer.validate()?;
        validate_heritability(self.heritability)?;
        if self.threads == 0 {
            return Err(GsError::InvalidConfig(
                "thread count must be at least 1".to_string(),
            ));
        }
        if self.trait_name.trim().is_empty() {
            return Err(GsError::InvalidConfig("trait name is empty".to_string()));
        }
        Ok(())
    }

    fn model_spec(&self) -> ModelSpec {
        ModelSpec {
            threads: self.threads,
            use_gpu: self.use_gpu,
            heritability: self.heritability,
            ..ModelSpec::new(self.model)
        }
    }
}

/// Runs the analysis on a dedicated thread pool and writes the report.
/// Nothing is written to `out_dir` unless every step before the report
/// succeeded.
pub fn run_pipeline(config: &PipelineConfig) -> Result<AnalysisResult> {
    config.validate()?;
    let started = Instant::now();
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.threads)
        .build()
        .map_err(|e| GsError::InvalidConfig(format!("cannot build thread pool: {}", e)))?;
    info!("Using {} threads.", config.threads);

    let result = pool.install(|| analyze(config))?;
    write_report(&result, &config.out_dir)?;
    info!(
        "Run for trait '{}' with {} finished in {:.2?}.",
        result.trait_name,
        result.model,
        started.elapsed()
    );
    Ok(result)
}

fn analyze(config: &PipelineConfig) -> Result<AnalysisResult> {
    if let Some(label) = &config.optimization {
        info!(
            "Optimization label '{}' recorded; hyperparameters stay at their fixed values.",
            label
        );
    }
    // --- 1. Training panel ---
    let allow_list = config.keep.as_ref().map(read_allow_list).transpose()?;

    let source = GenotypeSource::from_path(&config.geno)?;
    debug!("Training genotypes: {:?} ({} layout)", source, config.bed_layout);
    let genotypes = decode_genotypes(&source, config.bed_layout, allow_list.as_deref())?;

    // --- 2. Trait, aligned to the decoded samples ---
    let phenotype = load_phenotype(
        &config.pheno,
        &config.trait_name,
        Some(genotypes.sample_ids()),
    )?;
    let (genotypes, phenotype) = drop_missing_phenotypes(&genotypes, &phenotype)?;

    // --- 3. Prediction panel, never filtered by the allow-list ---
    let prediction = config
        .predict_geno
        .as_ref()
        .map(|path| {
            let source = GenotypeSource::from_path(path)?;
            decode_genotypes(&source, config.bed_layout, None)
        })
        .transpose()?;

    train_and_evaluate(
        &genotypes,
        &phenotype,
        &config.model_spec(),
        &config.trainer,
        prediction.as_ref(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_catches_bad_values() {
        let base = PipelineConfig::new("g.vcf", "p.csv", "Dbh", "out");
        assert!(base.validate().is_ok());

        let mut bad = base.clone();
        bad.heritability = 1.2;
        assert!(matches!(bad.validate(), Err(GsError::InvalidConfig(_))));

        let mut bad = base.clone();
        bad.threads = 0;
        assert!(bad.validate().is_err());

        let mut bad = base.clone();
        bad.trainer.test_fraction = 0.0;
        assert!(bad.validate().is_err());

        let mut bad = base;
        bad.trait_name = " ".into();
        assert!(bad.validate().is_err());
    }

    #[test]
    fn dataset_paths_feed_the_config() {
        let dataset = CuratedDataset {
            species: "Pinus taeda".into(),
            population: "ADEPT2".into(),
            pheno: PathBuf::from("/cat/pheno.csv"),
            geno: PathBuf::from("/cat/adept2.vcf.gz"),
            paper: None,
            url: None,
        };
        let config = PipelineConfig::from_dataset(&dataset, "Height", "out");
        assert_eq!(config.geno, PathBuf::from("/cat/adept2.vcf.gz"));
        assert_eq!(config.pheno, PathBuf::from("/cat/pheno.csv"));
        assert_eq!(config.trait_name, "Height");
        assert_eq!(config.model, ModelKind::Gblup);
    }

    #[test]
    fn model_spec_carries_run_settings() {
        let mut config = PipelineConfig::new("g.vcf", "p.csv", "Dbh", "out");
        config.model = ModelKind::RandomForest;
        config.threads = 3;
        config.use_gpu = true;
        config.heritability = 0.3;
        let spec = config.model_spec();
        assert_eq!(spec.kind, ModelKind::RandomForest);
        assert_eq!(spec.threads, 3);
        assert!(spec.use_gpu);
        assert_eq!(spec.heritability, 0.3);
    }
}
