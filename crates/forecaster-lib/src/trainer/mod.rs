//! Model cascade trainer
//!
//! Families are tried in priority order (seasonal, sequence, regression) and
//! the first one that fits becomes the key's model. A family that cannot fit
//! simply hands over to the next; nothing here ever fails the caller.

mod features;
mod scheduler;

pub use features::{
    linear_regression_slope, FeatureBuilder, FeatureRow, FEATURE_NAMES, LONG_LAG,
    MIN_FEATURE_ROWS, MOVING_AVERAGE_WINDOW, NUM_FEATURES,
};
pub use scheduler::{SchedulerConfig, SchedulerStats, TrainingScheduler};

use crate::error::{ForecastError, Result};
use crate::model::{
    deduplicate, ModelParameters, RegressionModel, SeasonalModel, SequenceModel, SequenceSettings,
};
use crate::models::{
    to_series, ErrorMetrics, Evaluation, ModelFamily, ModelRecord, Observation, SeriesKey,
};
use crate::observability::StructuredLogger;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Default ridge penalty on standardised features
pub const DEFAULT_RIDGE_LAMBDA: f64 = 1e-2;

/// Cascade configuration shared by every family trainer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CascadeConfig {
    /// When false the sequence family reports a capability error
    pub sequence_enabled: bool,
    pub sequence: SequenceSettings,
    pub ridge_lambda: f64,
    pub min_feature_rows: usize,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            sequence_enabled: true,
            sequence: SequenceSettings::default(),
            ridge_lambda: DEFAULT_RIDGE_LAMBDA,
            min_feature_rows: MIN_FEATURE_ROWS,
        }
    }
}

/// One family's training entry point
pub type FamilyTrainer = fn(&SeriesKey, &[Observation], &CascadeConfig) -> Result<ModelRecord>;

/// Families in priority order
pub const CASCADE: [(ModelFamily, FamilyTrainer); 3] = [
    (ModelFamily::Seasonal, train_seasonal),
    (ModelFamily::Sequence, train_sequence),
    (ModelFamily::Regression, train_regression),
];

/// Why one family did not produce a model
#[derive(Debug, Clone, PartialEq)]
pub struct FamilyFailure {
    pub family: ModelFamily,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub enum TrainingOutcome {
    Trained(ModelRecord),
    Untrained { failures: Vec<FamilyFailure> },
}

impl TrainingOutcome {
    pub fn record(&self) -> Option<&ModelRecord> {
        match self {
            TrainingOutcome::Trained(record) => Some(record),
            TrainingOutcome::Untrained { .. } => None,
        }
    }

    pub fn family(&self) -> Option<ModelFamily> {
        self.record().map(|r| r.family)
    }
}

/// Runs the cascade for one key at a time
#[derive(Clone)]
pub struct CascadeTrainer {
    config: CascadeConfig,
    logger: StructuredLogger,
}

impl CascadeTrainer {
    pub fn new(config: CascadeConfig, logger: StructuredLogger) -> Self {
        Self { config, logger }
    }

    pub fn config(&self) -> &CascadeConfig {
        &self.config
    }

    /// Try each family until one fits. CPU-bound; run it off the async runtime.
    pub fn train(&self, key: &SeriesKey, observations: &[Observation]) -> TrainingOutcome {
        let start = Instant::now();
        let mut failures = Vec::new();

        for (family, trainer) in CASCADE.iter() {
            match trainer(key, observations, &self.config) {
                Ok(record) => {
                    self.logger.log_trained(
                        key,
                        record.family,
                        record.training_sample_count,
                        &record.error_metrics,
                        start.elapsed().as_millis(),
                    );
                    return TrainingOutcome::Trained(record);
                }
                Err(e) => {
                    let reason = e.to_string();
                    self.logger.log_family_failed(key, *family, &reason);
                    failures.push(FamilyFailure {
                        family: *family,
                        reason,
                    });
                }
            }
        }

        let reasons: Vec<String> = failures
            .iter()
            .map(|f| format!("{}: {}", f.family, f.reason))
            .collect();
        self.logger.log_untrained(key, observations.len(), &reasons);
        TrainingOutcome::Untrained { failures }
    }
}

fn record(
    key: &SeriesKey,
    samples: usize,
    error_metrics: ErrorMetrics,
    parameters: ModelParameters,
    feature_schema: Option<Vec<String>>,
) -> ModelRecord {
    ModelRecord {
        key: key.clone(),
        family: parameters.family(),
        trained_at: Utc::now(),
        training_sample_count: samples,
        error_metrics,
        parameters,
        feature_schema,
    }
}

/// Holt-Winters on the deduplicated series
pub fn train_seasonal(
    key: &SeriesKey,
    observations: &[Observation],
    _config: &CascadeConfig,
) -> Result<ModelRecord> {
    let series = deduplicate(&to_series(observations));
    let fit = SeasonalModel::fit(&series)?;
    let metrics = ErrorMetrics::compute(&fit.actual, &fit.fitted, Evaluation::InSample)?;
    Ok(record(
        key,
        series.len(),
        metrics,
        ModelParameters::Seasonal(fit.model),
        None,
    ))
}

/// Recurrent network on the raw ordered series
pub fn train_sequence(
    key: &SeriesKey,
    observations: &[Observation],
    config: &CascadeConfig,
) -> Result<ModelRecord> {
    if !config.sequence_enabled {
        return Err(ForecastError::Capability(
            "sequence family is disabled in this deployment".to_string(),
        ));
    }
    let series = to_series(observations);
    let fit = SequenceModel::fit(&series, &config.sequence)?;
    let metrics = fit.metrics()?;
    Ok(record(
        key,
        series.len(),
        metrics,
        ModelParameters::Sequence(fit.model),
        None,
    ))
}

/// Ridge regression on calendar and lag features
pub fn train_regression(
    key: &SeriesKey,
    observations: &[Observation],
    config: &CascadeConfig,
) -> Result<ModelRecord> {
    let series = to_series(observations);
    let rows = FeatureBuilder::with_min_rows(config.min_feature_rows).build(&series)?;
    let (model, fitted) = RegressionModel::fit(&series, &rows, config.ridge_lambda)?;
    let actual: Vec<f64> = rows.iter().map(|r| r.target).collect();
    let metrics = ErrorMetrics::compute(&actual, &fitted, Evaluation::InSample)?;
    Ok(record(
        key,
        series.len(),
        metrics,
        ModelParameters::Regression(model),
        Some(FeatureBuilder::schema()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn key() -> SeriesKey {
        SeriesKey::new("aws", "ec2").unwrap()
    }

    fn hourly(count: usize, cost: impl Fn(usize) -> f64) -> Vec<Observation> {
        let start = Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap();
        (0..count)
            .map(|i| Observation::new(start + Duration::hours(i as i64), "aws", "ec2", cost(i)))
            .collect()
    }

    fn same_instant(count: usize) -> Vec<Observation> {
        let ts = Utc.with_ymd_and_hms(2024, 3, 4, 12, 0, 0).unwrap();
        (0..count)
            .map(|i| Observation::new(ts, "aws", "ec2", 5.0 + (i % 3) as f64))
            .collect()
    }

    fn trainer(config: CascadeConfig) -> CascadeTrainer {
        CascadeTrainer::new(config, StructuredLogger::new("test"))
    }

    #[test]
    fn test_seasonal_wins_when_it_can() {
        let obs = hourly(24 * 5, |i| 10.0 + (i % 24) as f64 * 0.1);
        let outcome = trainer(CascadeConfig::default()).train(&key(), &obs);
        let record = outcome.record().unwrap();
        assert_eq!(record.family, ModelFamily::Seasonal);
        assert_eq!(record.error_metrics.evaluation, Evaluation::InSample);
        assert_eq!(record.training_sample_count, 120);
    }

    #[test]
    fn test_duplicate_timestamps_fall_through_to_sequence() {
        let outcome = trainer(CascadeConfig::default()).train(&key(), &same_instant(40));
        let record = outcome.record().unwrap();
        assert_eq!(record.family, ModelFamily::Sequence);
        assert_eq!(record.error_metrics.evaluation, Evaluation::Holdout);
    }

    #[test]
    fn test_disabled_sequence_falls_through_to_regression() {
        let config = CascadeConfig {
            sequence_enabled: false,
            ..Default::default()
        };
        let outcome = trainer(config).train(&key(), &same_instant(40));
        let record = outcome.record().unwrap();
        assert_eq!(record.family, ModelFamily::Regression);
        assert_eq!(record.feature_schema.as_ref().unwrap().len(), NUM_FEATURES);
    }

    #[test]
    fn test_untrained_reports_every_family() {
        let outcome = trainer(CascadeConfig::default()).train(&key(), &hourly(5, |_| 1.0));
        match outcome {
            TrainingOutcome::Untrained { failures } => {
                let families: Vec<ModelFamily> = failures.iter().map(|f| f.family).collect();
                assert_eq!(
                    families,
                    vec![
                        ModelFamily::Seasonal,
                        ModelFamily::Sequence,
                        ModelFamily::Regression
                    ]
                );
            }
            TrainingOutcome::Trained(r) => panic!("unexpected {:?}", r.family),
        }
    }

    #[test]
    fn test_capability_error_from_disabled_sequence() {
        let config = CascadeConfig {
            sequence_enabled: false,
            ..Default::default()
        };
        let err = train_sequence(&key(), &hourly(100, |_| 1.0), &config).unwrap_err();
        assert!(matches!(err, ForecastError::Capability(_)));
    }

    #[test]
    fn test_training_is_idempotent() {
        let obs = same_instant(48);
        let t = trainer(CascadeConfig::default());
        let a = t.train(&key(), &obs);
        let b = t.train(&key(), &obs);
        let (a, b) = (a.record().unwrap(), b.record().unwrap());
        assert_eq!(a.family, b.family);
        assert_eq!(a.error_metrics, b.error_metrics);
    }
}
