mod common;

use forest_gs::models::gblup_solve;
use forest_gs::{
    predict_breeding_values, train_and_evaluate, GenotypeMatrix, GsError, ModelKind, ModelSpec,
    TrainerConfig,
};
use ndarray::Axis;

fn config(top_k: Option<usize>) -> TrainerConfig {
    TrainerConfig {
        top_k,
        ..TrainerConfig::default()
    }
}

#[test]
fn ridge_on_100_by_5000_is_reproducible() {
    let (genotypes, phenotype) = common::cohort(100, 5000, 1);
    let spec = ModelSpec::new(ModelKind::RrBlup);

    let first = train_and_evaluate(&genotypes, &phenotype, &spec, &config(None), None).unwrap();
    let second = train_and_evaluate(&genotypes, &phenotype, &spec, &config(None), None).unwrap();

    assert_eq!(first.metrics.n_train, 80);
    assert_eq!(first.metrics.n_test(), 20);
    assert_eq!(first.subset.len(), 5000);
    assert!(first.metrics.r2.is_finite());
    assert!(first.metrics.rmse.is_finite());
    assert_eq!(first.metrics.actual, second.metrics.actual);
    assert_eq!(first.metrics.predicted, second.metrics.predicted);
    assert_eq!(first.metrics.r2, second.metrics.r2);
}

#[test]
fn default_top_k_keeps_every_marker_of_a_small_panel() {
    let (genotypes, phenotype) = common::cohort(30, 200, 2);
    let spec = ModelSpec::new(ModelKind::Gblup);
    let result =
        train_and_evaluate(&genotypes, &phenotype, &spec, &TrainerConfig::default(), None).unwrap();
    assert_eq!(result.subset.len(), 200);
    assert_eq!(result.subset.indices(), (0..200).collect::<Vec<_>>().as_slice());
}

#[test]
fn selected_subset_drives_prediction() {
    let (genotypes, phenotype) = common::cohort(60, 500, 3);
    let candidates = GenotypeMatrix::new(
        (0..5).map(|i| format!("cand{}", i)).collect(),
        common::markers(500),
        common::random_dosages(5, 500, 4),
    )
    .unwrap();
    let spec = ModelSpec::new(ModelKind::RrBlup);
    let result = train_and_evaluate(
        &genotypes,
        &phenotype,
        &spec,
        &config(Some(50)),
        Some(&candidates),
    )
    .unwrap();

    assert_eq!(result.subset.len(), 50);
    assert!(result.subset.indices().windows(2).all(|w| w[0] < w[1]));
    let gebv = result.gebv.expect("prediction set was supplied");
    assert_eq!(gebv.sample_ids, candidates.sample_ids());
    assert!(gebv.values.iter().all(|v| v.is_finite()));

    // Markers outside the subset must not influence the prediction.
    let kept: Vec<usize> = result.subset.indices().to_vec();
    let mut altered = candidates.dosages().clone();
    for j in 0..500 {
        if !kept.contains(&j) {
            altered.column_mut(j).mapv_inplace(|d| (d + 1) % 3);
        }
    }
    let altered = GenotypeMatrix::new(
        candidates.sample_ids().to_vec(),
        common::markers(500),
        altered,
    )
    .unwrap();
    let again = train_and_evaluate(
        &genotypes,
        &phenotype,
        &spec,
        &config(Some(50)),
        Some(&altered),
    )
    .unwrap();
    assert_eq!(again.subset.indices(), result.subset.indices());
    assert_eq!(again.gebv.unwrap().values, gebv.values);
}

#[test]
fn prediction_width_mismatch_is_rejected() {
    let (genotypes, phenotype) = common::cohort(40, 300, 5);
    let narrow = GenotypeMatrix::new(
        vec!["x".into(), "y".into()],
        common::markers(299),
        common::random_dosages(2, 299, 6),
    )
    .unwrap();
    let err = train_and_evaluate(
        &genotypes,
        &phenotype,
        &ModelSpec::new(ModelKind::Gblup),
        &config(Some(100)),
        Some(&narrow),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        GsError::ShapeMismatch {
            expected: 300,
            found: 299
        }
    ));
}

#[test]
fn gblup_zero_heritability_predicts_training_mean() {
    let (genotypes, phenotype) = common::cohort(25, 120, 7);
    let x = genotypes.to_f64();
    let train_rows: Vec<usize> = (0..20).collect();
    let x_train = x.select(Axis(0), &train_rows);
    let y_train = phenotype.values.select(Axis(0), &train_rows);
    let x_test = x.select(Axis(0), &[20, 21, 22, 23, 24]);

    let out = gblup_solve(x_train.view(), y_train.view(), Some(x_test.view()), 0.0).unwrap();
    let mean = y_train.mean().unwrap();
    for v in out.test.unwrap().iter().chain(out.train.iter()) {
        assert!((v - mean).abs() < 1e-8);
    }
}

#[test]
fn every_model_runs_end_to_end_on_a_small_cohort() {
    let (genotypes, phenotype) = common::cohort(40, 60, 8);
    for kind in ModelKind::ALL {
        let spec = ModelSpec::new(kind);
        let result = train_and_evaluate(&genotypes, &phenotype, &spec, &config(Some(20)), None)
            .unwrap_or_else(|e| panic!("{} failed: {}", kind, e));
        assert_eq!(result.model, kind);
        assert_eq!(result.metrics.n_test(), 8);
        assert!(
            result.metrics.predicted.iter().all(|v| v.is_finite()),
            "{} produced non-finite predictions",
            kind
        );
    }
}

#[test]
fn predictor_is_usable_directly() {
    let (genotypes, phenotype) = common::cohort(30, 40, 9);
    let spec = ModelSpec::new(ModelKind::RrBlup);
    let result = train_and_evaluate(&genotypes, &phenotype, &spec, &config(None), None).unwrap();

    let x = result.subset.apply(genotypes.to_f64().view()).unwrap();
    let model = forest_gs::build_regressor(&spec)
        .unwrap()
        .fit(x.view(), phenotype.values.view())
        .unwrap();
    let gebv = predict_breeding_values(model.as_ref(), &result.subset, &genotypes).unwrap();
    assert_eq!(gebv.len(), 30);
}
