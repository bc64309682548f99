//! Probabilistic match predictions.
//!
//! A healthy model answers through `PredictionSource::Model`. A degraded
//! model still answers, but through an explicit `Fallback` draw around the
//! uniform distribution, so downstream consumers can always tell a real
//! inference from a shrug.

use chrono::{DateTime, Utc};
use log::warn;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::features::FeatureEngineer;
use crate::metrics::NUM_CLASSES;
use crate::models::{ModelStatus, argmax_class};
use crate::store::MatchStore;
use crate::training::TrainedModel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionSource {
    /// Produced by a trained classifier.
    Model,
    /// Produced by the degraded-model fallback; carries no signal.
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    HomeWin,
    Draw,
    AwayWin,
}

impl Outcome {
    pub fn from_label(label: u8) -> Self {
        match label {
            2 => Outcome::HomeWin,
            1 => Outcome::Draw,
            _ => Outcome::AwayWin,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::HomeWin => "home_win",
            Outcome::Draw => "draw",
            Outcome::AwayWin => "away_win",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResult {
    pub match_id: u64,
    pub model_id: String,
    pub outcome: Outcome,
    pub p_home: f64,
    pub p_draw: f64,
    pub p_away: f64,
    /// The largest of the three probabilities.
    pub confidence: f64,
    pub source: PredictionSource,
    pub created_at: DateTime<Utc>,
}

/// Hit rate of past predictions against matches that have since finished.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionReport {
    pub total_recorded: usize,
    pub evaluated: usize,
    pub correct: usize,
    pub accuracy: f64,
}

pub struct PredictionGenerator {
    engineer: FeatureEngineer,
    rng: StdRng,
    history: Vec<PredictionResult>,
}

impl PredictionGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            engineer: FeatureEngineer::default(),
            rng: StdRng::seed_from_u64(seed),
            history: Vec::new(),
        }
    }

    /// Predicts one match and appends the result to the history. Missing
    /// match or team is an error; a degraded model is not.
    pub fn predict(
        &mut self,
        store: &dyn MatchStore,
        model: &TrainedModel,
        match_id: u64,
    ) -> Result<PredictionResult, CoreError> {
        let features = self.engineer.extract_features(store, match_id)?;

        let (probs, source) = if model.status() == ModelStatus::Trained {
            (model.predict_probabilities(&features)?, PredictionSource::Model)
        } else {
            (self.fallback_probs(), PredictionSource::Fallback)
        };

        let outcome = Outcome::from_label(argmax_class(&probs));
        let result = PredictionResult {
            match_id,
            model_id: model.id.clone(),
            outcome,
            p_home: probs[2],
            p_draw: probs[1],
            p_away: probs[0],
            confidence: probs[argmax_class(&probs) as usize],
            source,
            created_at: Utc::now(),
        };
        self.history.push(result.clone());
        Ok(result)
    }

    /// Predicts many matches; matches that fail are skipped with a warning
    /// rather than aborting the batch.
    pub fn predict_batch(
        &mut self,
        store: &dyn MatchStore,
        model: &TrainedModel,
        match_ids: &[u64],
    ) -> Result<Vec<PredictionResult>, CoreError> {
        let mut results = Vec::with_capacity(match_ids.len());
        for &match_id in match_ids {
            match self.predict(store, model, match_id) {
                Ok(result) => results.push(result),
                Err(err @ CoreError::Store(_)) => return Err(err),
                Err(err) => warn!("skipping match {match_id} in batch: {err}"),
            }
        }
        Ok(results)
    }

    /// Dirichlet(1,1,1) draw: uniform over the probability simplex. The
    /// jitter keeps repeated fallback answers distinguishable in logs while
    /// staying centred on one-third each.
    fn fallback_probs(&mut self) -> [f64; NUM_CLASSES] {
        let mut draws = [0.0; NUM_CLASSES];
        let mut total = 0.0;
        for d in &mut draws {
            // Exponential(1) via inverse transform.
            let u: f64 = self.rng.r#gen::<f64>().max(f64::MIN_POSITIVE);
            *d = -u.ln();
            total += *d;
        }
        for d in &mut draws {
            *d /= total;
        }
        draws
    }

    /// Every prediction made through this generator, oldest first.
    pub fn history(&self) -> &[PredictionResult] {
        &self.history
    }

    /// Scores the recorded history against results now in the store.
    /// Predictions for unfinished or missing matches are excluded from the
    /// denominator.
    pub fn evaluate_history(&self, store: &dyn MatchStore) -> Result<PredictionReport, CoreError> {
        let mut evaluated = 0;
        let mut correct = 0;
        for prediction in &self.history {
            let Some(m) = store.get_match(prediction.match_id)? else {
                continue;
            };
            let Some(label) = m.outcome_label() else {
                continue;
            };
            evaluated += 1;
            if Outcome::from_label(label) == prediction.outcome {
                correct += 1;
            }
        }
        let accuracy = if evaluated > 0 {
            correct as f64 / evaluated as f64
        } else {
            0.0
        };
        Ok(PredictionReport {
            total_recorded: self.history.len(),
            evaluated,
            correct,
            accuracy,
        })
    }
}

impl Default for PredictionGenerator {
    fn default() -> Self {
        Self::new(0)
    }
}
