// main.rs

use std::time::Instant;

use anyhow::{Context, Error, Result};
use clap::Parser;
use log::info;

use forest_gs::{
    run_pipeline, BedLayout, DatasetCatalog, ModelKind, PipelineConfig, TrainerConfig,
};

fn main() -> Result<(), Error> {
    let total_time_start = Instant::now();
    let cli_args = cli::CliArgs::parse();

    let log_level = cli_args
        .log_level
        .parse::<log::LevelFilter>()
        .unwrap_or_else(|_| {
            eprintln!(
                "Warning: Invalid log level '{}' provided. Defaulting to Info.",
                cli_args.log_level
            );
            log::LevelFilter::Info
        });
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp_micros()
        .init();

    info!("Starting forest_gs with args: {:?}", cli_args);

    let config = cli_args.into_config()?;
    let result = run_pipeline(&config).with_context(|| {
        format!(
            "{} analysis of trait '{}' failed",
            config.model, config.trait_name
        )
    })?;

    info!(
        "{} on '{}': PCC {:.4}, R2 {:.4}, RMSE {:.4} over {} markers.",
        result.model,
        result.trait_name,
        result.metrics.pcc,
        result.metrics.r2,
        result.metrics.rmse,
        result.subset.len()
    );
    if let Some(gebv) = &result.gebv {
        info!("GEBVs written for {} prediction samples.", gebv.len());
    }
    info!(
        "forest_gs finished successfully in {:.2?}. Results in {}",
        total_time_start.elapsed(),
        config.out_dir.display()
    );
    Ok(())
}

mod cli {
    use super::{
        BedLayout, Context, DatasetCatalog, ModelKind, PipelineConfig, Result, TrainerConfig,
    };
    use clap::Parser;
    use forest_gs::trainer::{DEFAULT_TEST_FRACTION, DEFAULT_TOP_K};
    use std::path::PathBuf;

    #[derive(Parser, Debug)]
    #[command(author, version, about = "Genomic selection for forest tree breeding: GBLUP and machine-learning GEBV prediction.", long_about = None, propagate_version = true)]
    pub(crate) struct CliArgs {
        /// Training genotypes: a .bed triplet (or its prefix), .vcf or .vcf.gz.
        #[arg(long, required_unless_present = "catalog", conflicts_with = "catalog")]
        pub(crate) geno: Option<PathBuf>,

        /// Phenotype table; first column is the sample id.
        #[arg(long, required_unless_present = "catalog", conflicts_with = "catalog")]
        pub(crate) pheno: Option<PathBuf>,

        // --- Curated datasets ---
        /// JSON catalog of curated species/population datasets.
        #[arg(long, requires_all = ["species", "population"])]
        pub(crate) catalog: Option<PathBuf>,

        #[arg(long, requires = "catalog")]
        pub(crate) species: Option<String>,

        #[arg(long, requires = "catalog")]
        pub(crate) population: Option<String>,

        #[arg(long = "trait", required = true)]
        pub(crate) trait_name: String,

        #[arg(short, long, default_value = "GBLUP")]
        pub(crate) model: String,

        #[arg(short, long = "out", required = true)]
        pub(crate) out_dir: PathBuf,

        /// Independent genotypes to predict GEBVs for.
        #[arg(long)]
        pub(crate) predict_geno: Option<PathBuf>,

        /// Sample allow-list (one id, or FID IID, per line).
        #[arg(long)]
        pub(crate) keep: Option<PathBuf>,

        #[arg(long, default_value = "sample-major")]
        pub(crate) bed_layout: String,

        #[arg(long, default_value_t = DEFAULT_TEST_FRACTION)]
        pub(crate) test_fraction: f64,

        #[arg(long, default_value_t = 0)]
        pub(crate) seed: u64,

        #[arg(long, default_value_t = DEFAULT_TOP_K)]
        pub(crate) top_k: usize,

        #[arg(long)]
        pub(crate) no_feature_selection: bool,

        #[arg(long, default_value_t = 0.5)]
        pub(crate) heritability: f64,

        #[arg(short = 't', long)]
        pub(crate) threads: Option<usize>,

        #[arg(long)]
        pub(crate) gpu: bool,

        #[arg(long)]
        pub(crate) optimization: Option<String>,

        #[arg(long, default_value = "Info")]
        pub(crate) log_level: String,
    }

    impl CliArgs {
        pub(crate) fn into_config(self) -> Result<PipelineConfig> {
            let model: ModelKind = self
                .model
                .parse()
                .with_context(|| format!("invalid --model '{}'", self.model))?;
            let bed_layout: BedLayout = self
                .bed_layout
                .parse()
                .with_context(|| format!("invalid --bed-layout '{}'", self.bed_layout))?;

            let mut config = match (&self.catalog, self.geno, self.pheno) {
                (Some(path), _, _) => {
                    let catalog = DatasetCatalog::from_path(path)
                        .with_context(|| format!("cannot load catalog {}", path.display()))?;
                    // clap enforces both names whenever --catalog is given.
                    let species = self.species.as_deref().unwrap_or_default();
                    let population = self.population.as_deref().unwrap_or_default();
                    let dataset = catalog.resolve(species, population)?;
                    PipelineConfig::from_dataset(&dataset, self.trait_name, self.out_dir)
                }
                (None, Some(geno), Some(pheno)) => {
                    PipelineConfig::new(geno, pheno, self.trait_name, self.out_dir)
                }
                _ => anyhow::bail!("--geno and --pheno are required without --catalog"),
            };
            config.model = model;
            config.predict_geno = self.predict_geno;
            config.keep = self.keep;
            config.bed_layout = bed_layout;
            config.trainer = TrainerConfig {
                test_fraction: self.test_fraction,
                seed: self.seed,
                top_k: (!self.no_feature_selection).then_some(self.top_k),
            };
            config.heritability = self.heritability;
            config.threads = self.threads.unwrap_or_else(num_cpus::get);
            config.use_gpu = self.gpu;
            config.optimization = self.optimization;
            config.validate().context("invalid run configuration")?;
            Ok(config)
        }
    }

}
