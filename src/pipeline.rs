//! The assembled prediction pipeline: one facade over the store, feature
//! engineering, training, prediction, and the background scheduler.
//!
//! A `Pipeline` is shared as `Arc<Pipeline>`; interior locks keep the
//! mutable pieces (model registry, training engine, prediction history,
//! scheduler) consistent across threads. The scheduler is owned by the
//! pipeline instance, never by the process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::features::{FeatureEngineer, FeatureVector};
use crate::metrics::NUM_CLASSES;
use crate::models::{ModelKind, ModelStatus};
use crate::predict::{PredictionGenerator, PredictionReport, PredictionResult};
use crate::scheduler::{JobStatus, Scheduler, SchedulerConfig};
use crate::store::MatchStore;
use crate::team_form::{self, FormComparison, FormSnapshot};
use crate::training::{TrainedModel, TrainingConfig, TrainingEngine, TrainingRun};

#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineConfig {
    pub training: TrainingConfig,
    pub scheduler: SchedulerConfig,
}

/// Registry-level view of one trained model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSummary {
    pub id: String,
    pub kind: ModelKind,
    pub status: ModelStatus,
    pub trained_at: chrono::DateTime<Utc>,
    pub accuracy: f64,
}

pub struct Pipeline {
    store: Arc<dyn MatchStore>,
    engineer: FeatureEngineer,
    engine: Mutex<TrainingEngine>,
    generator: Mutex<PredictionGenerator>,
    models: Mutex<HashMap<String, Arc<TrainedModel>>>,
    latest_model: Mutex<Option<String>>,
    scheduler: Mutex<Scheduler>,
}

fn lock<'a, T>(mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Pipeline {
    pub fn new(store: Arc<dyn MatchStore>, config: PipelineConfig) -> Arc<Self> {
        Arc::new(Self {
            store,
            engineer: FeatureEngineer::default(),
            engine: Mutex::new(TrainingEngine::new(config.training)),
            generator: Mutex::new(PredictionGenerator::new(config.training.seed)),
            models: Mutex::new(HashMap::new()),
            latest_model: Mutex::new(None),
            scheduler: Mutex::new(Scheduler::new(config.scheduler)),
        })
    }

    pub fn store(&self) -> &Arc<dyn MatchStore> {
        &self.store
    }

    // -- features and form ---------------------------------------------------

    pub fn extract_features(&self, match_id: u64) -> Result<FeatureVector, CoreError> {
        self.engineer.extract_features(self.store.as_ref(), match_id)
    }

    /// Current form over the default window.
    pub fn team_form(&self, team_id: u32) -> Result<FormSnapshot, CoreError> {
        team_form::compute_form(
            self.store.as_ref(),
            team_id,
            team_form::DEFAULT_FORM_WINDOW,
            None,
        )
    }

    /// Form over a caller-chosen window.
    pub fn team_form_over(
        &self,
        team_id: u32,
        window_size: usize,
    ) -> Result<FormSnapshot, CoreError> {
        team_form::compute_form(self.store.as_ref(), team_id, window_size, None)
    }

    pub fn compare_teams(&self, home_id: u32, away_id: u32) -> Result<FormComparison, CoreError> {
        team_form::compare_teams(
            self.store.as_ref(),
            home_id,
            away_id,
            team_form::DEFAULT_FORM_WINDOW,
            None,
        )
    }

    /// Recomputes and persists a form snapshot for every known team.
    /// Returns how many snapshots were written; individual team failures
    /// are logged and skipped.
    pub fn refresh_all_forms(&self) -> Result<usize, CoreError> {
        let team_ids = self.store.list_team_ids()?;
        let mut written = 0;
        for team_id in team_ids {
            match team_form::compute_form(
                self.store.as_ref(),
                team_id,
                team_form::DEFAULT_FORM_WINDOW,
                None,
            ) {
                Ok(snapshot) => {
                    self.store.put_form_snapshot(&snapshot)?;
                    written += 1;
                }
                Err(err) => warn!("form refresh skipped team {team_id}: {err}"),
            }
        }
        info!("refreshed form snapshots for {written} teams");
        Ok(written)
    }

    // -- training ------------------------------------------------------------

    /// Trains a model and registers it. The returned model is also the new
    /// default for `predict_latest`.
    pub fn train_model(
        &self,
        kind: ModelKind,
        league_id: Option<u32>,
    ) -> Result<Arc<TrainedModel>, CoreError> {
        let model = Arc::new(lock(&self.engine).train(self.store.as_ref(), kind, league_id)?);
        lock(&self.models).insert(model.id.clone(), Arc::clone(&model));
        *lock(&self.latest_model) = Some(model.id.clone());
        Ok(model)
    }

    pub fn get_model(&self, model_id: &str) -> Result<Arc<TrainedModel>, CoreError> {
        lock(&self.models)
            .get(model_id)
            .cloned()
            .ok_or_else(|| CoreError::ModelNotFound(model_id.to_string()))
    }

    pub fn list_models(&self) -> Vec<ModelSummary> {
        let mut summaries: Vec<ModelSummary> = lock(&self.models)
            .values()
            .map(|m| ModelSummary {
                id: m.id.clone(),
                kind: m.kind,
                status: m.status(),
                trained_at: m.trained_at,
                accuracy: m.metrics.accuracy,
            })
            .collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }

    pub fn training_history(&self) -> Vec<TrainingRun> {
        lock(&self.engine).history().to_vec()
    }

    // -- prediction ----------------------------------------------------------

    pub fn predict(
        &self,
        model_id: &str,
        match_id: u64,
    ) -> Result<PredictionResult, CoreError> {
        let model = self.get_model(model_id)?;
        lock(&self.generator).predict(self.store.as_ref(), &model, match_id)
    }

    /// Predicts with the most recently trained model.
    pub fn predict_latest(&self, match_id: u64) -> Result<PredictionResult, CoreError> {
        let model_id = lock(&self.latest_model)
            .clone()
            .ok_or_else(|| CoreError::ModelNotFound("latest".to_string()))?;
        self.predict(&model_id, match_id)
    }

    pub fn predict_batch(
        &self,
        model_id: &str,
        match_ids: &[u64],
    ) -> Result<Vec<PredictionResult>, CoreError> {
        let model = self.get_model(model_id)?;
        lock(&self.generator).predict_batch(self.store.as_ref(), &model, match_ids)
    }

    pub fn prediction_history(&self) -> Vec<PredictionResult> {
        lock(&self.generator).history().to_vec()
    }

    pub fn evaluate_predictions(&self) -> Result<PredictionReport, CoreError> {
        lock(&self.generator).evaluate_history(self.store.as_ref())
    }

    /// Raw model probabilities [away, draw, home] without touching the
    /// prediction history.
    pub fn model_probabilities(
        &self,
        model_id: &str,
        match_id: u64,
    ) -> Result<[f64; NUM_CLASSES], CoreError> {
        let model = self.get_model(model_id)?;
        let features = self.extract_features(match_id)?;
        model.predict_probabilities(&features)
    }

    // -- scheduler -----------------------------------------------------------

    pub fn start_scheduler(&self) {
        lock(&self.scheduler).start();
    }

    pub fn stop_scheduler(&self) {
        lock(&self.scheduler).stop();
    }

    pub fn scheduler_status(&self) -> Vec<JobStatus> {
        lock(&self.scheduler).status()
    }

    /// Registers an arbitrary recurring job on the pipeline's scheduler.
    pub fn schedule_job(
        &self,
        name: &str,
        interval: Duration,
        run_immediately: bool,
        task: crate::scheduler::JobFn,
    ) {
        lock(&self.scheduler).schedule_task(name, interval, run_immediately, task);
    }

    /// Registers the recurring form-snapshot refresh job.
    pub fn schedule_form_refresh(
        self: &Arc<Self>,
        interval: Duration,
        run_immediately: bool,
    ) {
        let pipeline = Arc::clone(self);
        lock(&self.scheduler).schedule_task(
            "form_refresh",
            interval,
            run_immediately,
            Arc::new(move || {
                pipeline.refresh_all_forms()?;
                Ok(())
            }),
        );
    }

    /// Registers recurring retraining of one model kind.
    pub fn schedule_training(
        self: &Arc<Self>,
        kind: ModelKind,
        league_id: Option<u32>,
        interval: Duration,
        run_immediately: bool,
    ) {
        let pipeline = Arc::clone(self);
        let name = format!("retrain_{}", kind.as_str());
        lock(&self.scheduler).schedule_task(
            &name,
            interval,
            run_immediately,
            Arc::new(move || {
                let model = pipeline.train_model(kind, league_id)?;
                if model.status() == ModelStatus::Degraded {
                    warn!("scheduled retrain produced degraded model {}", model.id);
                }
                Ok(())
            }),
        );
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        lock(&self.scheduler).stop();
    }
}
