//! Outcome classifiers: multinomial logistic regression, two decision-tree
//! ensembles with different bias/variance trade-offs, and a voting ensemble
//! over all three.
//!
//! Training is deterministic for a fixed seed. A model fed an empty or
//! single-class training set becomes `Degraded` rather than failing: it
//! stays usable but predicts uniform probabilities, and callers surface
//! that state instead of hiding it.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::data_processor::{ScaleMethod, Scaler};
use crate::metrics::NUM_CLASSES;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Logistic,
    Forest,
    ExtraTrees,
    Ensemble,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Logistic => "logistic",
            ModelKind::Forest => "forest",
            ModelKind::ExtraTrees => "extra_trees",
            ModelKind::Ensemble => "ensemble",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelStatus {
    Untrained,
    Trained,
    /// The training set was empty or contained a single outcome class.
    /// The model answers with uniform probabilities.
    Degraded,
}

pub const UNIFORM_PROBS: [f64; NUM_CLASSES] = [1.0 / 3.0; NUM_CLASSES];

/// Lowest class index wins ties, so repeated evaluation of the same
/// probabilities is stable.
pub fn argmax_class(probs: &[f64; NUM_CLASSES]) -> u8 {
    let mut best = 0usize;
    for class in 1..NUM_CLASSES {
        if probs[class] > probs[best] {
            best = class;
        }
    }
    best as u8
}

fn distinct_classes(y: &[u8]) -> usize {
    let mut seen = [false; NUM_CLASSES];
    for label in y {
        if (*label as usize) < NUM_CLASSES {
            seen[*label as usize] = true;
        }
    }
    seen.iter().filter(|s| **s).count()
}

fn normalize_importance(raw: Vec<f64>) -> Vec<f64> {
    let total: f64 = raw.iter().sum();
    if total > 0.0 {
        raw.into_iter().map(|v| v / total).collect()
    } else {
        raw
    }
}

pub trait Classifier: Send + Sync {
    fn kind(&self) -> ModelKind;
    fn status(&self) -> ModelStatus;
    fn fit(&mut self, x: &[Vec<f64>], y: &[u8]);
    fn predict_probabilities(&self, x: &[Vec<f64>]) -> Vec<[f64; NUM_CLASSES]>;
    /// Per-feature importance summing to 1.0, when the model exposes one.
    fn feature_importance(&self) -> Option<Vec<f64>>;

    fn predict(&self, x: &[Vec<f64>]) -> Vec<u8> {
        self.predict_probabilities(x)
            .iter()
            .map(argmax_class)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Multinomial logistic regression
// ---------------------------------------------------------------------------

pub struct LogisticModel {
    status: ModelStatus,
    scaler: Option<Scaler>,
    // weights[class][feature], biases[class]
    weights: Vec<Vec<f64>>,
    biases: [f64; NUM_CLASSES],
    epochs: usize,
    learning_rate: f64,
    l2: f64,
}

impl LogisticModel {
    pub fn new() -> Self {
        Self {
            status: ModelStatus::Untrained,
            scaler: None,
            weights: Vec::new(),
            biases: [0.0; NUM_CLASSES],
            epochs: 300,
            learning_rate: 0.1,
            l2: 1e-3,
        }
    }

    fn softmax_row(&self, row: &[f64]) -> [f64; NUM_CLASSES] {
        let mut logits = [0.0; NUM_CLASSES];
        for class in 0..NUM_CLASSES {
            let mut z = self.biases[class];
            for (feature, value) in row.iter().enumerate() {
                z += self.weights[class][feature] * value;
            }
            logits[class] = z;
        }
        let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mut probs = [0.0; NUM_CLASSES];
        let mut total = 0.0;
        for class in 0..NUM_CLASSES {
            probs[class] = (logits[class] - max).exp();
            total += probs[class];
        }
        for p in &mut probs {
            *p /= total;
        }
        probs
    }
}

impl Default for LogisticModel {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier for LogisticModel {
    fn kind(&self) -> ModelKind {
        ModelKind::Logistic
    }

    fn status(&self) -> ModelStatus {
        self.status
    }

    fn fit(&mut self, x: &[Vec<f64>], y: &[u8]) {
        if x.is_empty() || distinct_classes(y) < 2 {
            self.status = ModelStatus::Degraded;
            return;
        }
        let n_features = x[0].len();
        let scaler = Scaler::fit(x, ScaleMethod::Standard);
        let scaled = scaler.transform(x);

        self.weights = vec![vec![0.0; n_features]; NUM_CLASSES];
        self.biases = [0.0; NUM_CLASSES];
        let n = scaled.len() as f64;

        for _ in 0..self.epochs {
            let mut grad_w = vec![vec![0.0; n_features]; NUM_CLASSES];
            let mut grad_b = [0.0; NUM_CLASSES];
            for (row, label) in scaled.iter().zip(y) {
                let probs = self.softmax_row(row);
                for class in 0..NUM_CLASSES {
                    let target = if *label as usize == class { 1.0 } else { 0.0 };
                    let err = probs[class] - target;
                    grad_b[class] += err;
                    for (feature, value) in row.iter().enumerate() {
                        grad_w[class][feature] += err * value;
                    }
                }
            }
            for class in 0..NUM_CLASSES {
                self.biases[class] -= self.learning_rate * grad_b[class] / n;
                for feature in 0..n_features {
                    let grad = grad_w[class][feature] / n
                        + self.l2 * self.weights[class][feature];
                    self.weights[class][feature] -= self.learning_rate * grad;
                }
            }
        }

        self.scaler = Some(scaler);
        self.status = ModelStatus::Trained;
    }

    fn predict_probabilities(&self, x: &[Vec<f64>]) -> Vec<[f64; NUM_CLASSES]> {
        let Some(scaler) = &self.scaler else {
            return vec![UNIFORM_PROBS; x.len()];
        };
        x.iter()
            .map(|row| self.softmax_row(&scaler.transform_row(row)))
            .collect()
    }

    fn feature_importance(&self) -> Option<Vec<f64>> {
        if self.weights.is_empty() {
            return None;
        }
        let n_features = self.weights[0].len();
        let raw: Vec<f64> = (0..n_features)
            .map(|feature| {
                self.weights
                    .iter()
                    .map(|class_weights| class_weights[feature].abs())
                    .sum::<f64>()
                    / NUM_CLASSES as f64
            })
            .collect();
        Some(normalize_importance(raw))
    }
}

// ---------------------------------------------------------------------------
// Decision trees and tree ensembles
// ---------------------------------------------------------------------------

enum TreeNode {
    Leaf {
        probs: [f64; NUM_CLASSES],
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
}

impl TreeNode {
    fn probabilities(&self, row: &[f64]) -> [f64; NUM_CLASSES] {
        match self {
            TreeNode::Leaf { probs } => *probs,
            TreeNode::Split {
                feature,
                threshold,
                left,
                right,
            } => {
                let value = row.get(*feature).copied().unwrap_or(0.0);
                if value <= *threshold {
                    left.probabilities(row)
                } else {
                    right.probabilities(row)
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SplitStrategy {
    /// Exhaustive threshold search on each candidate feature.
    BestThreshold,
    /// One uniformly drawn threshold per candidate feature.
    RandomThreshold,
}

fn gini(counts: &[f64; NUM_CLASSES]) -> f64 {
    let total: f64 = counts.iter().sum();
    if total == 0.0 {
        return 0.0;
    }
    1.0 - counts
        .iter()
        .map(|c| {
            let p = c / total;
            p * p
        })
        .sum::<f64>()
}

fn class_counts(indices: &[usize], y: &[u8]) -> [f64; NUM_CLASSES] {
    let mut counts = [0.0; NUM_CLASSES];
    for idx in indices {
        let class = y[*idx] as usize;
        if class < NUM_CLASSES {
            counts[class] += 1.0;
        }
    }
    counts
}

fn leaf_from(indices: &[usize], y: &[u8]) -> TreeNode {
    let counts = class_counts(indices, y);
    let total: f64 = counts.iter().sum();
    let probs = if total > 0.0 {
        [
            counts[0] / total,
            counts[1] / total,
            counts[2] / total,
        ]
    } else {
        UNIFORM_PROBS
    };
    TreeNode::Leaf { probs }
}

struct TreeBuilder<'a> {
    x: &'a [Vec<f64>],
    y: &'a [u8],
    strategy: SplitStrategy,
    max_depth: usize,
    min_split: usize,
    features_per_split: usize,
    importance: Vec<f64>,
    n_total: f64,
}

impl<'a> TreeBuilder<'a> {
    fn build(&mut self, indices: Vec<usize>, depth: usize, rng: &mut StdRng) -> TreeNode {
        let counts = class_counts(&indices, self.y);
        let impurity = gini(&counts);
        if depth >= self.max_depth || indices.len() < self.min_split || impurity == 0.0 {
            return leaf_from(&indices, self.y);
        }

        let Some((feature, threshold, gain)) = self.best_split(&indices, impurity, rng) else {
            return leaf_from(&indices, self.y);
        };

        let (left_idx, right_idx): (Vec<usize>, Vec<usize>) = indices
            .iter()
            .partition(|idx| self.x[**idx][feature] <= threshold);
        if left_idx.is_empty() || right_idx.is_empty() {
            return leaf_from(&indices, self.y);
        }

        self.importance[feature] += gain * indices.len() as f64 / self.n_total;
        let left = Box::new(self.build(left_idx, depth + 1, rng));
        let right = Box::new(self.build(right_idx, depth + 1, rng));
        TreeNode::Split {
            feature,
            threshold,
            left,
            right,
        }
    }

    fn candidate_features(&self, rng: &mut StdRng) -> Vec<usize> {
        let n_features = self.x[0].len();
        let k = self.features_per_split.min(n_features).max(1);
        if k == n_features {
            return (0..n_features).collect();
        }
        // Sample without replacement.
        let mut picked = Vec::with_capacity(k);
        let mut pool: Vec<usize> = (0..n_features).collect();
        for _ in 0..k {
            let at = rng.gen_range(0..pool.len());
            picked.push(pool.swap_remove(at));
        }
        picked
    }

    fn best_split(
        &self,
        indices: &[usize],
        parent_impurity: f64,
        rng: &mut StdRng,
    ) -> Option<(usize, f64, f64)> {
        let mut best: Option<(usize, f64, f64)> = None;
        for feature in self.candidate_features(rng) {
            let thresholds = self.thresholds_for(feature, indices, rng);
            for threshold in thresholds {
                let mut left = [0.0; NUM_CLASSES];
                let mut right = [0.0; NUM_CLASSES];
                for idx in indices {
                    let class = self.y[*idx] as usize;
                    if self.x[*idx][feature] <= threshold {
                        left[class] += 1.0;
                    } else {
                        right[class] += 1.0;
                    }
                }
                let n_left: f64 = left.iter().sum();
                let n_right: f64 = right.iter().sum();
                if n_left == 0.0 || n_right == 0.0 {
                    continue;
                }
                let n = n_left + n_right;
                let weighted =
                    (n_left / n) * gini(&left) + (n_right / n) * gini(&right);
                let gain = parent_impurity - weighted;
                if gain > 0.0 && best.map(|(_, _, g)| gain > g).unwrap_or(true) {
                    best = Some((feature, threshold, gain));
                }
            }
        }
        best
    }

    fn thresholds_for(&self, feature: usize, indices: &[usize], rng: &mut StdRng) -> Vec<f64> {
        let mut values: Vec<f64> = indices.iter().map(|idx| self.x[*idx][feature]).collect();
        values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        values.dedup();
        if values.len() < 2 {
            return Vec::new();
        }
        match self.strategy {
            SplitStrategy::BestThreshold => values
                .windows(2)
                .map(|pair| (pair[0] + pair[1]) / 2.0)
                .collect(),
            SplitStrategy::RandomThreshold => {
                let lo = values[0];
                let hi = values[values.len() - 1];
                vec![lo + rng.r#gen::<f64>() * (hi - lo)]
            }
        }
    }
}

struct FittedTree {
    root: TreeNode,
    importance: Vec<f64>,
}

fn fit_tree(
    x: &[Vec<f64>],
    y: &[u8],
    strategy: SplitStrategy,
    max_depth: usize,
    min_split: usize,
    features_per_split: usize,
    bootstrap: bool,
    seed: u64,
) -> FittedTree {
    let mut rng = StdRng::seed_from_u64(seed);
    let indices: Vec<usize> = if bootstrap {
        (0..x.len()).map(|_| rng.gen_range(0..x.len())).collect()
    } else {
        (0..x.len()).collect()
    };
    let mut builder = TreeBuilder {
        x,
        y,
        strategy,
        max_depth,
        min_split,
        features_per_split,
        importance: vec![0.0; x[0].len()],
        n_total: indices.len() as f64,
    };
    let root = builder.build(indices, 0, &mut rng);
    FittedTree {
        root,
        importance: builder.importance,
    }
}

pub struct TreeEnsembleModel {
    kind: ModelKind,
    status: ModelStatus,
    strategy: SplitStrategy,
    n_trees: usize,
    max_depth: usize,
    min_split: usize,
    bootstrap: bool,
    seed: u64,
    trees: Vec<TreeNode>,
    importance: Option<Vec<f64>>,
}

impl TreeEnsembleModel {
    /// Bootstrap-sampled forest of deeper best-split trees: lower bias,
    /// moderate variance.
    pub fn random_forest(seed: u64) -> Self {
        Self {
            kind: ModelKind::Forest,
            status: ModelStatus::Untrained,
            strategy: SplitStrategy::BestThreshold,
            n_trees: 60,
            max_depth: 10,
            min_split: 2,
            bootstrap: true,
            seed,
            trees: Vec::new(),
            importance: None,
        }
    }

    /// Larger crowd of shallow randomized-threshold trees: higher bias,
    /// lower variance.
    pub fn extra_trees(seed: u64) -> Self {
        Self {
            kind: ModelKind::ExtraTrees,
            status: ModelStatus::Untrained,
            strategy: SplitStrategy::RandomThreshold,
            n_trees: 120,
            max_depth: 5,
            min_split: 2,
            bootstrap: false,
            seed,
            trees: Vec::new(),
            importance: None,
        }
    }
}

impl Classifier for TreeEnsembleModel {
    fn kind(&self) -> ModelKind {
        self.kind
    }

    fn status(&self) -> ModelStatus {
        self.status
    }

    fn fit(&mut self, x: &[Vec<f64>], y: &[u8]) {
        if x.is_empty() || distinct_classes(y) < 2 {
            self.status = ModelStatus::Degraded;
            return;
        }
        let n_features = x[0].len();
        let features_per_split = (n_features as f64).sqrt().round().max(1.0) as usize;
        let base_seed = self.seed;
        let strategy = self.strategy;
        let (max_depth, min_split, bootstrap) = (self.max_depth, self.min_split, self.bootstrap);

        let fitted: Vec<FittedTree> = (0..self.n_trees)
            .into_par_iter()
            .map(|tree_idx| {
                fit_tree(
                    x,
                    y,
                    strategy,
                    max_depth,
                    min_split,
                    features_per_split,
                    bootstrap,
                    base_seed.wrapping_add(tree_idx as u64),
                )
            })
            .collect();

        let mut importance = vec![0.0; n_features];
        let mut trees = Vec::with_capacity(fitted.len());
        for tree in fitted {
            for (feature, gain) in tree.importance.iter().enumerate() {
                importance[feature] += gain;
            }
            trees.push(tree.root);
        }
        self.trees = trees;
        self.importance = Some(normalize_importance(importance));
        self.status = ModelStatus::Trained;
    }

    fn predict_probabilities(&self, x: &[Vec<f64>]) -> Vec<[f64; NUM_CLASSES]> {
        if self.trees.is_empty() {
            return vec![UNIFORM_PROBS; x.len()];
        }
        x.par_iter()
            .map(|row| {
                let mut acc = [0.0; NUM_CLASSES];
                for tree in &self.trees {
                    let probs = tree.probabilities(row);
                    for class in 0..NUM_CLASSES {
                        acc[class] += probs[class];
                    }
                }
                let n = self.trees.len() as f64;
                for p in &mut acc {
                    *p /= n;
                }
                acc
            })
            .collect()
    }

    fn feature_importance(&self) -> Option<Vec<f64>> {
        self.importance.clone()
    }
}

// ---------------------------------------------------------------------------
// Voting ensemble
// ---------------------------------------------------------------------------

pub struct EnsembleModel {
    status: ModelStatus,
    members: Vec<Box<dyn Classifier>>,
}

impl EnsembleModel {
    /// The standard lineup: logistic regression plus both tree forests.
    pub fn standard(seed: u64) -> Self {
        Self::from_members(vec![
            Box::new(LogisticModel::new()),
            Box::new(TreeEnsembleModel::random_forest(seed)),
            Box::new(TreeEnsembleModel::extra_trees(seed.wrapping_add(1))),
        ])
    }

    pub fn from_members(members: Vec<Box<dyn Classifier>>) -> Self {
        Self {
            status: ModelStatus::Untrained,
            members,
        }
    }
}

impl Classifier for EnsembleModel {
    fn kind(&self) -> ModelKind {
        ModelKind::Ensemble
    }

    fn status(&self) -> ModelStatus {
        self.status
    }

    fn fit(&mut self, x: &[Vec<f64>], y: &[u8]) {
        if x.is_empty() || distinct_classes(y) < 2 {
            self.status = ModelStatus::Degraded;
            return;
        }
        for member in &mut self.members {
            member.fit(x, y);
        }
        // The ensemble is only as healthy as its members.
        let all_trained = self
            .members
            .iter()
            .all(|m| m.status() == ModelStatus::Trained);
        self.status = if all_trained {
            ModelStatus::Trained
        } else {
            ModelStatus::Degraded
        };
    }

    /// Mean of member probabilities. Still sums to 1 per row.
    fn predict_probabilities(&self, x: &[Vec<f64>]) -> Vec<[f64; NUM_CLASSES]> {
        if self.members.is_empty() {
            return vec![UNIFORM_PROBS; x.len()];
        }
        let per_member: Vec<Vec<[f64; NUM_CLASSES]>> = self
            .members
            .iter()
            .map(|m| m.predict_probabilities(x))
            .collect();
        let n = self.members.len() as f64;
        (0..x.len())
            .map(|row| {
                let mut acc = [0.0; NUM_CLASSES];
                for member in &per_member {
                    for class in 0..NUM_CLASSES {
                        acc[class] += member[row][class];
                    }
                }
                for p in &mut acc {
                    *p /= n;
                }
                acc
            })
            .collect()
    }

    /// Majority vote over member hard predictions; ties go to the lowest
    /// class index.
    fn predict(&self, x: &[Vec<f64>]) -> Vec<u8> {
        if self.members.is_empty() {
            return vec![0; x.len()];
        }
        let votes: Vec<Vec<u8>> = self.members.iter().map(|m| m.predict(x)).collect();
        (0..x.len())
            .map(|row| {
                let mut tally = [0usize; NUM_CLASSES];
                for member in &votes {
                    let class = member[row] as usize;
                    if class < NUM_CLASSES {
                        tally[class] += 1;
                    }
                }
                let mut winner = 0usize;
                for class in 1..NUM_CLASSES {
                    if tally[class] > tally[winner] {
                        winner = class;
                    }
                }
                winner as u8
            })
            .collect()
    }

    /// Mean of the member importances that exist, renormalized to 1.
    fn feature_importance(&self) -> Option<Vec<f64>> {
        let available: Vec<Vec<f64>> = self
            .members
            .iter()
            .filter_map(|m| m.feature_importance())
            .collect();
        if available.is_empty() {
            return None;
        }
        let n_features = available[0].len();
        let mut acc = vec![0.0; n_features];
        for importance in &available {
            for (feature, v) in importance.iter().enumerate() {
                acc[feature] += v;
            }
        }
        Some(normalize_importance(acc))
    }
}

pub fn build_model(kind: ModelKind, seed: u64) -> Box<dyn Classifier> {
    match kind {
        ModelKind::Logistic => Box::new(LogisticModel::new()),
        ModelKind::Forest => Box::new(TreeEnsembleModel::random_forest(seed)),
        ModelKind::ExtraTrees => Box::new(TreeEnsembleModel::extra_trees(seed)),
        ModelKind::Ensemble => Box::new(EnsembleModel::standard(seed)),
    }
}
