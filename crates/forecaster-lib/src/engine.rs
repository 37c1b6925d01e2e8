//! Engine facade
//!
//! Wires the observation store, cascade trainer, model registry and forecast
//! server together. This is the only type callers need.

use crate::error::Result;
use crate::models::{
    FamilyUsed, ForecastRequest, ForecastResponse, Observation, SeriesKey, TrainRequest,
    TrainResponse, DEFAULT_LOOKBACK_DAYS,
};
use crate::observability::{EngineMetrics, StructuredLogger};
use crate::predictor::{FallbackConfig, FallbackHeuristic, ForecastServer};
use crate::store::{
    LocalObservationStore, ModelRegistry, ObservationStore, RegistryConfig, StoreConfig,
};
use crate::trainer::{CascadeConfig, CascadeTrainer, TrainingOutcome};
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeSet, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Default upper bound on `horizon_steps` (90 days of hourly steps)
pub const DEFAULT_MAX_HORIZON_STEPS: usize = 2160;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub store: StoreConfig,
    pub registry: RegistryConfig,
    pub cascade: CascadeConfig,
    pub fallback: FallbackConfig,
    pub default_lookback_days: u32,
    pub max_horizon_steps: usize,
    /// Keys trained by every `train_all` pass even before they have data
    pub bootstrap_keys: Vec<SeriesKey>,
    /// Seed synthetic history when a key with no observations is trained
    pub seed_on_cold_start: bool,
    /// Instance name attached to structured log events
    pub instance_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            registry: RegistryConfig::default(),
            cascade: CascadeConfig::default(),
            fallback: FallbackConfig::default(),
            default_lookback_days: DEFAULT_LOOKBACK_DAYS,
            max_horizon_steps: DEFAULT_MAX_HORIZON_STEPS,
            bootstrap_keys: Vec::new(),
            seed_on_cold_start: true,
            instance_name: "cost-forecaster".to_string(),
        }
    }
}

impl EngineConfig {
    /// Persist observations under `<dir>/observations` and models under `<dir>/models`
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        self.store.data_dir = Some(dir.join("observations"));
        self.registry.model_dir = Some(dir.join("models"));
        self
    }
}

/// Number of recent forecasts the fallback share is judged over
pub const FALLBACK_WINDOW: usize = 50;

/// Fewer recent forecasts than this never count as fallback-dominated
pub const FALLBACK_MIN_SAMPLES: usize = 10;

/// Component state seen while serving; the health layer reads it
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineStatus {
    /// Last observation store failure; cleared by the next successful write
    pub store_error: Option<String>,
    /// Last failure persisting a model record; cleared by the next successful put
    pub registry_error: Option<String>,
    /// Keys left untrained by the most recent `train_all` pass
    pub untrained_keys: Vec<SeriesKey>,
    pub recent_forecasts: usize,
    pub recent_fallbacks: usize,
}

impl EngineStatus {
    /// More than half of a large enough window of forecasts used the fallback
    pub fn fallback_dominates(&self) -> bool {
        self.recent_forecasts >= FALLBACK_MIN_SAMPLES
            && self.recent_fallbacks * 2 > self.recent_forecasts
    }
}

#[derive(Default)]
struct StatusTracker {
    store_error: Option<String>,
    registry_error: Option<String>,
    untrained_keys: Vec<SeriesKey>,
    /// `true` for each recent forecast answered by the fallback
    recent: VecDeque<bool>,
}

/// Summary of one `train_all` pass
#[derive(Debug, Clone, Default)]
pub struct TrainAllReport {
    pub trained: Vec<SeriesKey>,
    pub untrained: Vec<SeriesKey>,
}

impl TrainAllReport {
    pub fn total(&self) -> usize {
        self.trained.len() + self.untrained.len()
    }
}

pub struct Engine {
    config: EngineConfig,
    store: Arc<dyn ObservationStore>,
    registry: Arc<ModelRegistry>,
    trainer: CascadeTrainer,
    server: ForecastServer,
    metrics: EngineMetrics,
    logger: StructuredLogger,
    tracker: Mutex<StatusTracker>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn ObservationStore>,
        registry: Arc<ModelRegistry>,
    ) -> Self {
        let logger = StructuredLogger::new(config.instance_name.clone());
        let trainer = CascadeTrainer::new(config.cascade.clone(), logger.clone());
        let server = ForecastServer::new(
            Arc::clone(&registry),
            Arc::clone(&store),
            FallbackHeuristic::new(config.fallback.clone()),
            logger.clone(),
        );
        let engine = Self {
            config,
            store,
            registry,
            trainer,
            server,
            metrics: EngineMetrics::new(),
            logger,
            tracker: Mutex::new(StatusTracker::default()),
        };
        engine.refresh_gauges();
        engine
    }

    /// Open the local store and registry described by `config`
    pub fn open(config: EngineConfig) -> Result<Self> {
        let store = Arc::new(LocalObservationStore::open(config.store.clone())?);
        let registry = Arc::new(ModelRegistry::open(config.registry.clone())?);
        Ok(Self::new(config, store, registry))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn logger(&self) -> &StructuredLogger {
        &self.logger
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    fn tracker(&self) -> MutexGuard<'_, StatusTracker> {
        self.tracker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of component state for health reporting
    pub fn status(&self) -> EngineStatus {
        let tracker = self.tracker();
        EngineStatus {
            store_error: tracker.store_error.clone(),
            registry_error: tracker.registry_error.clone(),
            untrained_keys: tracker.untrained_keys.clone(),
            recent_forecasts: tracker.recent.len(),
            recent_fallbacks: tracker.recent.iter().filter(|fallback| **fallback).count(),
        }
    }

    fn refresh_gauges(&self) {
        self.metrics.set_trained_keys(self.registry.len() as i64);
        self.metrics.set_observations_stored(self.store.len() as i64);
    }

    pub fn append(&self, observation: Observation) -> Result<()> {
        self.append_batch(vec![observation]).map(|_| ())
    }

    pub fn append_batch(&self, observations: Vec<Observation>) -> Result<usize> {
        match self.store.append_batch(observations) {
            Ok(count) => {
                self.tracker().store_error = None;
                self.metrics.inc_observations_appended(count as u64);
                self.refresh_gauges();
                Ok(count)
            }
            Err(e) => {
                if e.is_validation() {
                    self.metrics.inc_validation_rejections();
                } else {
                    self.tracker().store_error = Some(e.to_string());
                }
                Err(e)
            }
        }
    }

    pub fn query(
        &self,
        provider: Option<&str>,
        service_type: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<Vec<Observation>> {
        self.store.query(provider, service_type, since)
    }

    /// Keys with observations, plus configured bootstrap keys
    pub fn known_keys(&self) -> Vec<SeriesKey> {
        let keys: BTreeSet<SeriesKey> = self
            .store
            .keys()
            .into_iter()
            .chain(self.config.bootstrap_keys.iter().cloned())
            .collect();
        keys.into_iter().collect()
    }

    /// Train one key from a validated request. Only validation errors escape;
    /// every training failure becomes `{ family: "none" }`.
    pub fn train(&self, request: &TrainRequest) -> Result<TrainResponse> {
        let key = request.validate().map_err(|e| {
            self.metrics.inc_validation_rejections();
            e
        })?;
        Ok(self.train_key(&key, request.lookback_days))
    }

    /// Run the cascade for `key` over the last `lookback_days` of data
    pub fn train_key(&self, key: &SeriesKey, lookback_days: u32) -> TrainResponse {
        let start = Instant::now();
        let response = match self.load_training_data(key, lookback_days) {
            Ok(observations) => self.train_observations(key, &observations),
            Err(e) => {
                warn!(key = %key, error = %e, "Could not load training data");
                self.tracker().store_error = Some(e.to_string());
                self.metrics.inc_trainings(None);
                TrainResponse::untrained()
            }
        };
        self.metrics
            .observe_training_duration(start.elapsed().as_secs_f64());
        self.refresh_gauges();
        response
    }

    fn load_training_data(&self, key: &SeriesKey, lookback_days: u32) -> Result<Vec<Observation>> {
        if self.config.seed_on_cold_start {
            let seeded = self.store.seed_if_empty(key)?;
            if seeded > 0 {
                self.logger.log_seeded(key, seeded);
            }
        }
        // Lookbacks reaching past the representable range mean "everything"
        let since = Duration::try_days(i64::from(lookback_days))
            .and_then(|window| Utc::now().checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.store
            .query(Some(&key.provider), Some(&key.service_type), since)
    }

    fn train_observations(&self, key: &SeriesKey, observations: &[Observation]) -> TrainResponse {
        match self.trainer.train(key, observations) {
            TrainingOutcome::Trained(record) => {
                let response = TrainResponse::from_record(&record);
                let family = record.family;
                match self.registry.put(record) {
                    Ok(()) => {
                        self.tracker().registry_error = None;
                        self.metrics.inc_trainings(Some(family));
                        response
                    }
                    Err(e) => {
                        warn!(key = %key, error = %e, "Failed to persist model record");
                        self.tracker().registry_error = Some(e.to_string());
                        self.metrics.inc_trainings(None);
                        TrainResponse::untrained()
                    }
                }
            }
            TrainingOutcome::Untrained { .. } => {
                self.metrics.inc_trainings(None);
                TrainResponse::untrained()
            }
        }
    }

    /// Train every known key once. Keys train in parallel on blocking workers.
    pub async fn train_all(self: &Arc<Self>, lookback_days: u32) -> TrainAllReport {
        let mut tasks = JoinSet::new();
        for key in self.known_keys() {
            let engine = Arc::clone(self);
            tasks.spawn_blocking(move || {
                let response = engine.train_key(&key, lookback_days);
                (key, response)
            });
        }

        let mut report = TrainAllReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((key, response)) if response.training_sample_count.is_some() => {
                    report.trained.push(key)
                }
                Ok((key, _)) => report.untrained.push(key),
                Err(e) => warn!(error = %e, "Training task failed"),
            }
        }
        report.trained.sort();
        report.untrained.sort();
        self.tracker().untrained_keys = report.untrained.clone();
        debug!(
            trained = report.trained.len(),
            untrained = report.untrained.len(),
            "Training pass complete"
        );
        report
    }

    /// Forecast for a request; fails only on validation
    pub fn forecast(&self, request: &ForecastRequest) -> Result<ForecastResponse> {
        let start = Instant::now();
        let key = request
            .validate(self.config.max_horizon_steps)
            .map_err(|e| {
                self.metrics.inc_validation_rejections();
                e
            })?;

        let forecast = self.server.forecast(&key, request.horizon_steps);

        self.metrics.inc_forecasts(forecast.family_used);
        {
            let mut tracker = self.tracker();
            if tracker.recent.len() == FALLBACK_WINDOW {
                tracker.recent.pop_front();
            }
            tracker.recent.push_back(forecast.family_used == FamilyUsed::Fallback);
        }
        self.metrics
            .observe_forecast_latency(start.elapsed().as_secs_f64());
        self.logger.log_forecast(
            &key,
            forecast.family_used,
            request.horizon_steps,
            forecast.confidence_score,
            request.resource_variant.as_deref(),
        );

        Ok(ForecastResponse {
            provider: key.provider,
            service_type: key.service_type,
            family_used: forecast.family_used,
            horizon_steps: request.horizon_steps,
            points: forecast.points,
            confidence_score: forecast.confidence_score,
            trained_at: forecast.trained_at,
            note: forecast.note,
        })
    }
}
