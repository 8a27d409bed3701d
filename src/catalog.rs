//! Catalog of curated training datasets.
//!
//! A JSON file lists species, each with named populations that point at a
//! phenotype table and a genotype source:
//!
//! ```json
//! {"curated_models": [
//!   {"specie": "Pinus taeda",
//!    "populations": [{"population": "ADEPT2", "phe": "pheno.csv",
//!                     "geno": "adept2.vcf.gz", "paper": "...", "url": "..."}]}
//! ]}
//! ```
//!
//! Relative paths are taken relative to the catalog file.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::Deserialize;

use crate::error::{GsError, Result};

#[derive(Clone, Debug, Deserialize)]
struct CatalogFile {
    curated_models: Vec<SpeciesEntry>,
}

#[derive(Clone, Debug, Deserialize)]
struct SpeciesEntry {
    #[serde(rename = "specie")]
    species: String,
    #[serde(default)]
    populations: Vec<PopulationEntry>,
}

#[derive(Clone, Debug, Deserialize)]
struct PopulationEntry {
    population: String,
    phe: PathBuf,
    geno: PathBuf,
    #[serde(default)]
    paper: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

/// One population's inputs with paths already resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CuratedDataset {
    pub species: String,
    pub population: String,
    pub pheno: PathBuf,
    pub geno: PathBuf,
    pub paper: Option<String>,
    pub url: Option<String>,
}

#[derive(Clone, Debug)]
pub struct DatasetCatalog {
    base_dir: PathBuf,
    species: Vec<SpeciesEntry>,
}

impl DatasetCatalog {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| GsError::io(path, e))?;
        let parsed: CatalogFile = serde_json::from_str(&text).map_err(|e| {
            GsError::Format(format!("invalid dataset catalog {}: {}", path.display(), e))
        })?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        info!(
            "Loaded dataset catalog {} ({} species).",
            path.display(),
            parsed.curated_models.len()
        );
        Ok(Self {
            base_dir,
            species: parsed.curated_models,
        })
    }

    pub fn species(&self) -> Vec<&str> {
        self.species.iter().map(|s| s.species.as_str()).collect()
    }

    pub fn populations(&self, species: &str) -> Result<Vec<&str>> {
        Ok(self
            .find_species(species)?
            .populations
            .iter()
            .map(|p| p.population.as_str())
            .collect())
    }

    /// Looks up a population of a species. Names match exactly.
    pub fn resolve(&self, species: &str, population: &str) -> Result<CuratedDataset> {
        let entry = self.find_species(species)?;
        let pop = entry
            .populations
            .iter()
            .find(|p| p.population == population)
            .ok_or_else(|| GsError::CatalogEntry {
                kind: "population",
                name: population.to_string(),
                available: entry.populations.iter().map(|p| p.population.clone()).collect(),
            })?;
        let dataset = CuratedDataset {
            species: entry.species.clone(),
            population: pop.population.clone(),
            pheno: self.base_dir.join(&pop.phe),
            geno: self.base_dir.join(&pop.geno),
            paper: pop.paper.clone(),
            url: pop.url.clone(),
        };
        debug!("Resolved {}/{} to {:?}", species, population, dataset);
        Ok(dataset)
    }

    fn find_species(&self, species: &str) -> Result<&SpeciesEntry> {
        self.species
            .iter()
            .find(|s| s.species == species)
            .ok_or_else(|| GsError::CatalogEntry {
                kind: "species",
                name: species.to_string(),
                available: self.species.iter().map(|s| s.species.clone()).collect(),
            })
    }
}
