//! Dataset assembly and model training.
//!
//! Datasets are built from finished matches only, ordered oldest first, and
//! the train/test split is chronological: the holdout is always the most
//! recent slice, so evaluation never lets a model peek at the future.

use std::time::Instant;

use chrono::{DateTime, Utc};
use log::{info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::features::{FEATURE_NAMES, FeatureEngineer, FeatureVector};
use crate::metrics::{self, EvalMetrics, NUM_CLASSES};
use crate::models::{Classifier, ModelKind, ModelStatus, build_model};
use crate::store::MatchStore;

/// Upper bound on matches pulled into one dataset.
pub const MAX_TRAINING_MATCHES: usize = 1000;

pub const DEFAULT_TEST_RATIO: f64 = 0.2;

#[derive(Debug, Clone, Copy)]
pub struct TrainingConfig {
    pub test_ratio: f64,
    pub max_matches: usize,
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            test_ratio: DEFAULT_TEST_RATIO,
            max_matches: MAX_TRAINING_MATCHES,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrainingSample {
    pub match_id: u64,
    pub date: DateTime<Utc>,
    pub features: Vec<f64>,
    pub label: u8,
}

/// Labelled samples ordered oldest first.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub samples: Vec<TrainingSample>,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn matrices(&self) -> (Vec<Vec<f64>>, Vec<u8>) {
        let x = self.samples.iter().map(|s| s.features.clone()).collect();
        let y = self.samples.iter().map(|s| s.label).collect();
        (x, y)
    }

    /// Oldest fraction trains, most recent fraction evaluates.
    pub fn chronological_split(&self, test_ratio: f64) -> (&[TrainingSample], &[TrainingSample]) {
        let ratio = test_ratio.clamp(0.0, 1.0);
        let cut = (self.samples.len() as f64 * (1.0 - ratio)).floor() as usize;
        self.samples.split_at(cut.min(self.samples.len()))
    }
}

fn matrices_of(samples: &[TrainingSample]) -> (Vec<Vec<f64>>, Vec<u8>) {
    let x = samples.iter().map(|s| s.features.clone()).collect();
    let y = samples.iter().map(|s| s.label).collect();
    (x, y)
}

/// One line of the append-only training history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingRun {
    pub model_id: String,
    pub kind: ModelKind,
    pub status: ModelStatus,
    pub trained_at: DateTime<Utc>,
    pub n_train: usize,
    pub n_test: usize,
    pub duration_ms: u64,
    pub metrics: EvalMetrics,
}

/// A fitted classifier with the metadata callers need to use and audit it.
pub struct TrainedModel {
    pub id: String,
    pub kind: ModelKind,
    pub trained_at: DateTime<Utc>,
    pub feature_names: Vec<String>,
    pub metrics: EvalMetrics,
    classifier: Box<dyn Classifier>,
}

impl TrainedModel {
    pub fn status(&self) -> ModelStatus {
        self.classifier.status()
    }

    fn check_width(&self, features: &FeatureVector) -> Result<(), CoreError> {
        if features.values.len() != self.feature_names.len() {
            return Err(CoreError::FeatureMismatch {
                expected: self.feature_names.len(),
                got: features.values.len(),
            });
        }
        Ok(())
    }

    /// Class probabilities ordered [away, draw, home].
    pub fn predict_probabilities(
        &self,
        features: &FeatureVector,
    ) -> Result<[f64; NUM_CLASSES], CoreError> {
        self.check_width(features)?;
        let probs = self
            .classifier
            .predict_probabilities(std::slice::from_ref(&features.values));
        Ok(probs[0])
    }

    pub fn predict_class(&self, features: &FeatureVector) -> Result<u8, CoreError> {
        self.check_width(features)?;
        let predicted = self
            .classifier
            .predict(std::slice::from_ref(&features.values));
        Ok(predicted[0])
    }

    /// Importance paired with feature names, when the model exposes one.
    pub fn feature_importance(&self) -> Option<Vec<(String, f64)>> {
        let raw = self.classifier.feature_importance()?;
        Some(
            self.feature_names
                .iter()
                .cloned()
                .zip(raw)
                .collect(),
        )
    }

    /// The `n` most important features, highest first.
    pub fn top_features(&self, n: usize) -> Vec<(String, f64)> {
        let mut pairs = self.feature_importance().unwrap_or_default();
        pairs.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        pairs.truncate(n);
        pairs
    }
}

pub struct TrainingEngine {
    engineer: FeatureEngineer,
    config: TrainingConfig,
    seq: u64,
    history: Vec<TrainingRun>,
}

impl TrainingEngine {
    pub fn new(config: TrainingConfig) -> Self {
        Self {
            engineer: FeatureEngineer::default(),
            config,
            seq: 0,
            history: Vec::new(),
        }
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Builds a dataset from finished matches. Matches whose feature
    /// extraction fails are skipped with a warning; they never abort the
    /// whole run.
    pub fn prepare_dataset(
        &self,
        store: &dyn MatchStore,
        league_id: Option<u32>,
    ) -> Result<Dataset, CoreError> {
        let mut matches = store.list_finished_matches(league_id, self.config.max_matches)?;
        matches.retain(|m| m.outcome_label().is_some());
        // list_* returns most recent first.
        matches.reverse();

        let extracted: Vec<Option<TrainingSample>> = matches
            .par_iter()
            .map(|m| match self.engineer.extract_for_match(store, m) {
                Ok(features) => m.outcome_label().map(|label| TrainingSample {
                    match_id: m.id,
                    date: m.date,
                    features: features.values,
                    label,
                }),
                Err(err) => {
                    warn!("skipping match {} during dataset assembly: {err}", m.id);
                    None
                }
            })
            .collect();

        let samples: Vec<TrainingSample> = extracted.into_iter().flatten().collect();
        info!(
            "prepared dataset: {} samples from {} finished matches",
            samples.len(),
            matches.len()
        );
        Ok(Dataset { samples })
    }

    /// Trains one model of `kind` on the given league's finished matches,
    /// evaluates it on the chronological holdout, and records the run.
    /// An untrainable dataset yields a model in `Degraded` status, not an
    /// error.
    pub fn train(
        &mut self,
        store: &dyn MatchStore,
        kind: ModelKind,
        league_id: Option<u32>,
    ) -> Result<TrainedModel, CoreError> {
        let dataset = self.prepare_dataset(store, league_id)?;
        Ok(self.train_on(&dataset, kind))
    }

    /// Same as `train` but on an already assembled dataset.
    pub fn train_on(&mut self, dataset: &Dataset, kind: ModelKind) -> TrainedModel {
        let started = Instant::now();
        let (train, test) = dataset.chronological_split(self.config.test_ratio);
        let (x_train, y_train) = matrices_of(train);

        let mut classifier = build_model(kind, self.config.seed);
        classifier.fit(&x_train, &y_train);

        let metrics = if classifier.status() == ModelStatus::Trained {
            let (x_eval, y_eval) = if test.is_empty() {
                warn!("holdout is empty; evaluating {} on its training data", kind.as_str());
                (x_train, y_train)
            } else {
                matrices_of(test)
            };
            let predicted = classifier.predict(&x_eval);
            let probs = classifier.predict_probabilities(&x_eval);
            metrics::evaluate(&y_eval, &predicted, &probs)
        } else {
            warn!(
                "{} training degraded: {} samples, too few outcome classes",
                kind.as_str(),
                train.len()
            );
            EvalMetrics::default()
        };

        self.seq += 1;
        let id = format!("{}-{:03}", kind.as_str(), self.seq);
        let trained_at = Utc::now();
        let duration_ms = started.elapsed().as_millis() as u64;
        info!(
            "trained {id}: {} train / {} test samples, accuracy {:.3}, {duration_ms}ms",
            train.len(),
            test.len(),
            metrics.accuracy
        );

        self.history.push(TrainingRun {
            model_id: id.clone(),
            kind,
            status: classifier.status(),
            trained_at,
            n_train: train.len(),
            n_test: test.len(),
            duration_ms,
            metrics: metrics.clone(),
        });

        TrainedModel {
            id,
            kind,
            trained_at,
            feature_names: FEATURE_NAMES.iter().map(|n| n.to_string()).collect(),
            metrics,
            classifier,
        }
    }

    /// Append-only record of every training run this engine performed.
    pub fn history(&self) -> &[TrainingRun] {
        &self.history
    }
}

impl Default for TrainingEngine {
    fn default() -> Self {
        Self::new(TrainingConfig::default())
    }
}
