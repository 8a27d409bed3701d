//! Genomic selection for tree breeding programs.
//!
//! Decodes marker genotypes from a packed binary triplet or a VCF, aligns
//! them with a phenotype table, fits one of a catalogue of regressors (GBLUP
//! and the usual genomic-prediction learners), evaluates it on held-out
//! samples and predicts genomic estimated breeding values (GEBVs) for an
//! independent set.

pub mod catalog;
pub mod error;
pub mod features;
pub mod genotype;
mod linalg;
pub mod models;
pub mod phenotype;
pub mod pipeline;
pub mod predictor;
pub mod report;
pub mod selection;
pub mod trainer;

pub use catalog::{CuratedDataset, DatasetCatalog};
pub use error::{GsError, Result};
pub use features::MarkerSubset;
pub use genotype::{decode_genotypes, BedLayout, GenotypeMatrix, GenotypeSource, MarkerInfo, SampleId};
pub use models::{build_regressor, FittedModel, ModelKind, ModelSpec, Regressor};
pub use phenotype::{load_phenotype, PhenotypeVector};
pub use pipeline::{run_pipeline, PipelineConfig};
pub use predictor::{predict_breeding_values, GebvResult};
pub use report::write_report;
pub use selection::{read_allow_list, select_samples};
pub use trainer::{train_and_evaluate, AnalysisResult, Metrics, TrainerConfig};
