//! Observability infrastructure for the forecasting engine
//!
//! Provides:
//! - Prometheus metrics (training duration, forecast latency, family counters, store size)
//! - Structured JSON logging with tracing

use crate::models::{ErrorMetrics, FamilyUsed, ModelFamily, SeriesKey};
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// Buckets for forecast latency (seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
];

/// Buckets for training duration (seconds); sequence fits dominate the tail
const TRAINING_BUCKETS: &[f64] = &[0.001, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

static GLOBAL_METRICS: OnceLock<EngineMetricsInner> = OnceLock::new();

struct EngineMetricsInner {
    training_duration_seconds: Histogram,
    forecast_latency_seconds: Histogram,
    forecasts_total: IntCounterVec,
    trainings_total: IntCounterVec,
    fallbacks_total: IntCounter,
    observations_appended: IntCounter,
    validation_rejections: IntCounter,
    trained_keys: IntGauge,
    observations_stored: IntGauge,
}

impl EngineMetricsInner {
    fn new() -> Self {
        Self {
            training_duration_seconds: register_histogram!(
                "cost_forecaster_training_duration_seconds",
                "Time spent running the model cascade for one key",
                TRAINING_BUCKETS.to_vec()
            )
            .expect("Failed to register training_duration_seconds"),

            forecast_latency_seconds: register_histogram!(
                "cost_forecaster_forecast_latency_seconds",
                "Time spent serving one forecast request",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register forecast_latency_seconds"),

            forecasts_total: register_int_counter_vec!(
                "cost_forecaster_forecasts_total",
                "Forecasts served, by family used",
                &["family"]
            )
            .expect("Failed to register forecasts_total"),

            trainings_total: register_int_counter_vec!(
                "cost_forecaster_trainings_total",
                "Training runs, by resulting family (none when untrained)",
                &["family"]
            )
            .expect("Failed to register trainings_total"),

            fallbacks_total: register_int_counter!(
                "cost_forecaster_fallbacks_total",
                "Forecasts answered by the fallback heuristic"
            )
            .expect("Failed to register fallbacks_total"),

            observations_appended: register_int_counter!(
                "cost_forecaster_observations_appended_total",
                "Observations accepted into the store"
            )
            .expect("Failed to register observations_appended_total"),

            validation_rejections: register_int_counter!(
                "cost_forecaster_validation_rejections_total",
                "Requests or observations rejected by validation"
            )
            .expect("Failed to register validation_rejections_total"),

            trained_keys: register_int_gauge!(
                "cost_forecaster_trained_keys",
                "Keys with a model record in the registry"
            )
            .expect("Failed to register trained_keys"),

            observations_stored: register_int_gauge!(
                "cost_forecaster_observations_stored",
                "Observations currently held by the store"
            )
            .expect("Failed to register observations_stored"),
        }
    }
}

/// Engine metrics for Prometheus exposition
///
/// A lightweight handle to the process-wide metrics; clones share them.
#[derive(Clone)]
pub struct EngineMetrics {
    _private: (),
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(EngineMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &EngineMetricsInner {
        GLOBAL_METRICS.get_or_init(EngineMetricsInner::new)
    }

    pub fn observe_training_duration(&self, duration_secs: f64) {
        self.inner().training_duration_seconds.observe(duration_secs);
    }

    pub fn observe_forecast_latency(&self, duration_secs: f64) {
        self.inner().forecast_latency_seconds.observe(duration_secs);
    }

    pub fn inc_forecasts(&self, family: FamilyUsed) {
        self.inner()
            .forecasts_total
            .with_label_values(&[family.as_str()])
            .inc();
        if family == FamilyUsed::Fallback {
            self.inner().fallbacks_total.inc();
        }
    }

    /// `None` counts an untrained outcome
    pub fn inc_trainings(&self, family: Option<ModelFamily>) {
        let label = family.map_or("none", |f| f.as_str());
        self.inner().trainings_total.with_label_values(&[label]).inc();
    }

    pub fn inc_observations_appended(&self, count: u64) {
        self.inner().observations_appended.inc_by(count);
    }

    pub fn inc_validation_rejections(&self) {
        self.inner().validation_rejections.inc();
    }

    pub fn set_trained_keys(&self, count: i64) {
        self.inner().trained_keys.set(count);
    }

    pub fn set_observations_stored(&self, count: i64) {
        self.inner().observations_stored.set(count);
    }
}

/// Structured logger for engine events
///
/// Every line carries an `event` field so log pipelines can filter on it.
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl Default for StructuredLogger {
    fn default() -> Self {
        Self::new("cost-forecaster")
    }
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn log_startup(&self, version: &str, known_keys: usize, trained_keys: usize) {
        info!(
            event = "engine_started",
            instance = %self.instance,
            version = %version,
            known_keys = known_keys,
            trained_keys = trained_keys,
            "Cost forecaster started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "engine_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Cost forecaster shutting down"
        );
    }

    pub fn log_seeded(&self, key: &SeriesKey, rows: usize) {
        info!(
            event = "observations_seeded",
            instance = %self.instance,
            key = %key,
            rows = rows,
            "Seeded synthetic history for cold-start key"
        );
    }

    pub fn log_family_failed(&self, key: &SeriesKey, family: ModelFamily, reason: &str) {
        debug!(
            event = "family_attempt_failed",
            instance = %self.instance,
            key = %key,
            family = %family,
            reason = %reason,
            "Model family failed, trying next"
        );
    }

    pub fn log_trained(
        &self,
        key: &SeriesKey,
        family: ModelFamily,
        samples: usize,
        metrics: &ErrorMetrics,
        duration_ms: u128,
    ) {
        info!(
            event = "model_trained",
            instance = %self.instance,
            key = %key,
            family = %family,
            samples = samples,
            mae = metrics.mean_absolute_error,
            rmse = metrics.root_mean_squared_error,
            evaluation = ?metrics.evaluation,
            duration_ms = duration_ms as u64,
            "Model trained"
        );
    }

    pub fn log_untrained(&self, key: &SeriesKey, samples: usize, reasons: &[String]) {
        warn!(
            event = "training_untrained",
            instance = %self.instance,
            key = %key,
            samples = samples,
            reasons = ?reasons,
            "No model family could be trained, keeping any previous record"
        );
    }

    pub fn log_forecast(
        &self,
        key: &SeriesKey,
        family: FamilyUsed,
        horizon: usize,
        confidence: f64,
        variant: Option<&str>,
    ) {
        info!(
            event = "forecast_served",
            instance = %self.instance,
            key = %key,
            family = %family,
            horizon_steps = horizon,
            confidence = confidence,
            resource_variant = variant.unwrap_or(""),
            "Forecast served"
        );
    }

    pub fn log_fallback(&self, key: &SeriesKey, reason: &str) {
        warn!(
            event = "forecast_fallback",
            instance = %self.instance,
            key = %key,
            reason = %reason,
            "Serving fallback heuristic"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Evaluation;

    #[test]
    fn test_engine_metrics_handles_share_state() {
        let a = EngineMetrics::new();
        let b = a.clone();
        a.inc_forecasts(FamilyUsed::Fallback);
        b.inc_trainings(Some(ModelFamily::Seasonal));
        b.inc_trainings(None);
        a.observe_training_duration(0.2);
        a.observe_forecast_latency(0.001);
        a.set_trained_keys(3);
        a.set_observations_stored(100);
        a.inc_observations_appended(2);
        a.inc_validation_rejections();
        assert!(GLOBAL_METRICS.get().is_some());
    }

    #[test]
    fn test_structured_logger_events() {
        let logger = StructuredLogger::new("test-instance");
        assert_eq!(logger.instance(), "test-instance");
        let key = SeriesKey::new("aws", "ec2").unwrap();
        let metrics = ErrorMetrics {
            mean_absolute_error: 0.1,
            root_mean_squared_error: 0.2,
            evaluation: Evaluation::InSample,
        };
        logger.log_trained(&key, ModelFamily::Seasonal, 100, &metrics, 12);
        logger.log_untrained(&key, 3, &["seasonal: too short".to_string()]);
        logger.log_forecast(&key, FamilyUsed::Fallback, 24, 0.6, None);
    }
}
