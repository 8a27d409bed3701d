#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use forest_gs::genotype::packed::{write_bed_triplet, FamRecord};
use forest_gs::{GenotypeMatrix, MarkerInfo, PhenotypeVector};
use ndarray::{Array1, Array2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

pub fn markers(p: usize) -> Vec<MarkerInfo> {
    (0..p)
        .map(|j| MarkerInfo {
            id: format!("snp{}", j),
            chromosome: (1 + j % 12).to_string(),
            position: 1_000 + 250 * j as u64,
        })
        .collect()
}

pub fn random_dosages(n: usize, p: usize, seed: u64) -> Array2<i8> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    Array2::from_shape_fn((n, p), |_| rng.random_range(0..3i8))
}

/// Additive trait: the first `causal` markers carry effects, plus noise.
pub fn additive_trait(dosages: &Array2<i8>, causal: usize, seed: u64) -> Array1<f64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let effect = Normal::new(0.0, 1.0).unwrap();
    let noise = Normal::new(0.0, 0.5).unwrap();
    let effects: Vec<f64> = (0..causal).map(|_| effect.sample(&mut rng)).collect();
    Array1::from_iter(dosages.outer_iter().map(|row| {
        let genetic: f64 = effects
            .iter()
            .enumerate()
            .map(|(j, b)| b * f64::from(row[j]))
            .sum();
        10.0 + genetic + noise.sample(&mut rng)
    }))
}

pub fn fam_records(n: usize, prefix: &str) -> Vec<FamRecord> {
    (0..n)
        .map(|i| FamRecord {
            fid: format!("{}F{}", prefix, i),
            iid: format!("T{}", i),
        })
        .collect()
}

pub fn cohort(n: usize, p: usize, seed: u64) -> (GenotypeMatrix, PhenotypeVector) {
    let dosages = random_dosages(n, p, seed);
    let values = additive_trait(&dosages, 10.min(p), seed + 1);
    let ids: Vec<String> = fam_records(n, "").iter().map(FamRecord::sample_id).collect();
    let phenotype = PhenotypeVector {
        trait_name: "Dbh".to_string(),
        sample_ids: ids.clone(),
        values,
    };
    (
        GenotypeMatrix::new(ids, markers(p), dosages).unwrap(),
        phenotype,
    )
}

/// Writes a training triplet plus phenotype table under `dir` and returns
/// (triplet prefix, phenotype path).
pub fn write_training_files(dir: &Path, n: usize, p: usize) -> (PathBuf, PathBuf) {
    let dosages = random_dosages(n, p, 5);
    let values = additive_trait(&dosages, 10, 6);
    let fam = fam_records(n, "");
    let prefix = dir.join("train");
    write_bed_triplet(&prefix, &fam, &markers(p), dosages.view()).unwrap();

    let mut table = String::from("id,Dbh,Height\n");
    for (record, value) in fam.iter().zip(values.iter()) {
        table.push_str(&format!("{},{},{}\n", record.sample_id(), value, value * 2.0));
    }
    let pheno = dir.join("pheno.csv");
    fs::write(&pheno, table).unwrap();
    (prefix, pheno)
}

pub fn write_prediction_triplet(dir: &Path, n: usize, p: usize) -> PathBuf {
    let prefix = dir.join("candidates");
    write_bed_triplet(
        &prefix,
        &fam_records(n, "C"),
        &markers(p),
        random_dosages(n, p, 99).view(),
    )
    .unwrap();
    prefix
}
