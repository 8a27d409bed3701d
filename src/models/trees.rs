//! Regression trees and the ensembles built from them.
//!
//! One split criterion serves every ensemble: a node holding targets with sum
//! `S` over `n` rows scores `S² / (n + λ)` and predicts `S / (n + λ)`. With
//! `λ = 0` this is ordinary variance reduction with mean leaves; with `λ > 0`
//! it is the second-order boosting objective under squared loss.

use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info};
use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

use super::{
    check_features, check_training_data, mean_and_variance, FittedModel, ModelKind, Regressor,
};
use crate::error::Result;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TreeParams {
    /// `None` grows until leaves are pure or too small to split.
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// L2 penalty on leaf values.
    pub lambda: f64,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            lambda: 0.0,
        }
    }
}

#[derive(Clone, Debug)]
enum Node {
    Leaf(f64),
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Clone, Copy, Debug)]
struct SplitCandidate {
    feature: usize,
    threshold: f64,
    gain: f64,
}

impl SplitCandidate {
    /// Higher gain wins; ties go to the lower marker index so parallel
    /// reductions stay deterministic.
    fn better(self, other: SplitCandidate) -> SplitCandidate {
        if other.gain > self.gain || (other.gain == self.gain && other.feature < self.feature) {
            other
        } else {
            self
        }
    }
}

#[derive(Clone, Debug)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    /// Grows a tree on `rows` of `x` (repeats allowed, as in a bootstrap).
    pub fn fit(x: ArrayView2<f64>, target: &[f64], rows: Vec<usize>, params: &TreeParams) -> Self {
        let mut tree = RegressionTree { nodes: Vec::new() };
        tree.grow(x, target, rows, 0, params);
        tree
    }

    fn leaf_value(sum: f64, count: usize, lambda: f64) -> f64 {
        sum / (count as f64 + lambda)
    }

    fn grow(
        &mut self,
        x: ArrayView2<f64>,
        target: &[f64],
        rows: Vec<usize>,
        depth: usize,
        params: &TreeParams,
    ) -> usize {
        let id = self.nodes.len();
        let sum: f64 = rows.iter().map(|&r| target[r]).sum();
        self.nodes.push(Node::Leaf(Self::leaf_value(sum, rows.len(), params.lambda)));

        let depth_reached = params.max_depth.is_some_and(|d| depth >= d);
        if depth_reached || rows.len() < params.min_samples_split.max(2) {
            return id;
        }
        let Some(split) = best_split(x, target, &rows, sum, params) else {
            return id;
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .into_iter()
            .partition(|&r| x[[r, split.feature]] <= split.threshold);
        let left = self.grow(x, target, left_rows, depth + 1, params);
        let right = self.grow(x, target, right_rows, depth + 1, params);
        self.nodes[id] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        id
    }

    pub fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        let mut id = 0;
        loop {
            match &self.nodes[id] {
                Node::Leaf(value) => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => id = if row[*feature] <= *threshold { *left } else { *right },
            }
        }
    }

    pub fn n_leaves(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, Node::Leaf(_)))
            .count()
    }
}

fn best_split(
    x: ArrayView2<f64>,
    target: &[f64],
    rows: &[usize],
    total: f64,
    params: &TreeParams,
) -> Option<SplitCandidate> {
    (0..x.ncols())
        .into_par_iter()
        .filter_map(|feature| best_split_for_feature(x, target, rows, feature, total, params))
        .reduce_with(SplitCandidate::better)
}

fn best_split_for_feature(
    x: ArrayView2<f64>,
    target: &[f64],
    rows: &[usize],
    feature: usize,
    total: f64,
    params: &TreeParams,
) -> Option<SplitCandidate> {
    let mut pairs: Vec<(f64, f64)> = rows.iter().map(|&r| (x[[r, feature]], target[r])).collect();
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

    let n = pairs.len();
    let lambda = params.lambda;
    let parent = total * total / (n as f64 + lambda);
    let mut left_sum = 0.0;
    let mut best: Option<SplitCandidate> = None;

    for k in 0..n.saturating_sub(1) {
        left_sum += pairs[k].1;
        let n_left = k + 1;
        let n_right = n - n_left;
        if n_left < params.min_samples_leaf || pairs[k].0 == pairs[k + 1].0 {
            continue;
        }
        if n_right < params.min_samples_leaf {
            break;
        }
        let right_sum = total - left_sum;
        let gain = left_sum * left_sum / (n_left as f64 + lambda)
            + right_sum * right_sum / (n_right as f64 + lambda)
            - parent;
        if gain > 1e-12 && best.map_or(true, |b| gain > b.gain) {
            best = Some(SplitCandidate {
                feature,
                threshold: 0.5 * (pairs[k].0 + pairs[k + 1].0),
                gain,
            });
        }
    }
    best
}

fn progress_bar(len: usize, what: &str) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    if let Ok(style) = ProgressStyle::default_bar().template(&format!(
        "{{spinner:.green}} [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{pos}}/{{len}} {} ({{eta}})",
        what
    )) {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb
}

/// Bagged regression trees; each tree sees a bootstrap resample seeded from
/// the forest seed and its own index.
#[derive(Clone, Copy, Debug)]
pub struct RandomForest {
    pub n_trees: usize,
    pub params: TreeParams,
    pub seed: u64,
}

impl RandomForest {
    pub fn new(n_trees: usize, seed: u64) -> Self {
        Self {
            n_trees,
            params: TreeParams::default(),
            seed,
        }
    }
}

impl Regressor for RandomForest {
    fn kind(&self) -> ModelKind {
        ModelKind::RandomForest
    }

    fn fit(&self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<Box<dyn FittedModel>> {
        check_training_data(x, y)?;
        let n = x.nrows();
        let target = y.to_vec();
        info!("Growing {} trees on {} samples.", self.n_trees, n);

        let pb = progress_bar(self.n_trees, "trees");
        let trees: Vec<RegressionTree> = (0..self.n_trees)
            .into_par_iter()
            .map(|t| {
                let mut rng = ChaCha8Rng::seed_from_u64(self.seed.wrapping_add(t as u64));
                let rows: Vec<usize> = (0..n).map(|_| rng.random_range(0..n)).collect();
                let tree = RegressionTree::fit(x, &target, rows, &self.params);
                pb.inc(1);
                tree
            })
            .collect();
        pb.finish_and_clear();

        let leaves: usize = trees.iter().map(RegressionTree::n_leaves).sum();
        debug!(
            "Forest has {:.1} leaves per tree on average.",
            leaves as f64 / trees.len().max(1) as f64
        );
        Ok(Box::new(ForestModel {
            trees,
            n_features: x.ncols(),
        }))
    }
}

#[derive(Clone, Debug)]
pub struct ForestModel {
    trees: Vec<RegressionTree>,
    n_features: usize,
}

impl FittedModel for ForestModel {
    fn n_features(&self) -> usize {
        self.n_features
    }

    fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>> {
        check_features(self.n_features, x.ncols())?;
        let n_trees = self.trees.len().max(1) as f64;
        let values: Vec<f64> = (0..x.nrows())
            .into_par_iter()
            .map(|i| {
                let row = x.row(i);
                self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>() / n_trees
            })
            .collect();
        Ok(Array1::from(values))
    }
}

/// Squared-loss gradient boosting from the target mean. The presets mirror
/// the default shapes of the boosting libraries the model names refer to.
#[derive(Clone, Copy, Debug)]
pub struct GradientBoosting {
    pub kind: ModelKind,
    pub n_rounds: usize,
    pub learning_rate: f64,
    pub params: TreeParams,
}

impl GradientBoosting {
    pub fn gbdt() -> Self {
        Self {
            kind: ModelKind::Gbdt,
            n_rounds: 100,
            learning_rate: 0.1,
            params: TreeParams {
                max_depth: Some(3),
                ..TreeParams::default()
            },
        }
    }

    pub fn xgboost() -> Self {
        Self {
            kind: ModelKind::XgBoost,
            n_rounds: 100,
            learning_rate: 0.3,
            params: TreeParams {
                max_depth: Some(6),
                lambda: 1.0,
                ..TreeParams::default()
            },
        }
    }

    pub fn lightgbm() -> Self {
        Self {
            kind: ModelKind::LightGbm,
            n_rounds: 100,
            learning_rate: 0.1,
            params: TreeParams {
                max_depth: Some(5),
                min_samples_split: 40,
                min_samples_leaf: 20,
                lambda: 0.0,
            },
        }
    }

    pub fn catboost() -> Self {
        Self {
            kind: ModelKind::CatBoost,
            n_rounds: 1000,
            learning_rate: 0.03,
            params: TreeParams {
                max_depth: Some(6),
                lambda: 3.0,
                ..TreeParams::default()
            },
        }
    }
}

impl Regressor for GradientBoosting {
    fn kind(&self) -> ModelKind {
        self.kind
    }

    fn fit(&self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<Box<dyn FittedModel>> {
        check_training_data(x, y)?;
        let n = x.nrows();
        let (init, _) = mean_and_variance(y);
        let mut fitted = vec![init; n];
        let mut trees = Vec::with_capacity(self.n_rounds);
        info!(
            "{}: {} boosting rounds, learning rate {}.",
            self.kind, self.n_rounds, self.learning_rate
        );

        let pb = progress_bar(self.n_rounds, "rounds");
        for _ in 0..self.n_rounds {
            let residual: Vec<f64> = y.iter().zip(&fitted).map(|(t, f)| t - f).collect();
            let tree = RegressionTree::fit(x, &residual, (0..n).collect(), &self.params);
            for (i, f) in fitted.iter_mut().enumerate() {
                *f += self.learning_rate * tree.predict_row(x.row(i));
            }
            trees.push(tree);
            pb.inc(1);
        }
        pb.finish_and_clear();

        let mse = y
            .iter()
            .zip(&fitted)
            .map(|(t, f)| (t - f).powi(2))
            .sum::<f64>()
            / n as f64;
        debug!("{} training MSE after boosting: {:.6}", self.kind, mse);
        Ok(Box::new(BoostedModel {
            init,
            learning_rate: self.learning_rate,
            trees,
            n_features: x.ncols(),
        }))
    }
}

#[derive(Clone, Debug)]
pub struct BoostedModel {
    init: f64,
    learning_rate: f64,
    trees: Vec<RegressionTree>,
    n_features: usize,
}

impl FittedModel for BoostedModel {
    fn n_features(&self) -> usize {
        self.n_features
    }

    fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>> {
        check_features(self.n_features, x.ncols())?;
        Ok(Array1::from_iter(x.outer_iter().map(|row| {
            self.init
                + self.learning_rate
                    * self
                        .trees
                        .iter()
                        .map(|t| t.predict_row(row))
                        .sum::<f64>()
        })))
    }
}
