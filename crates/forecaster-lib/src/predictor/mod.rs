//! Forecast serving
//!
//! Answers from the key's trained model when one exists and behaves; every
//! other case is answered by the fallback heuristic. Serving never fails.

mod fallback;
mod output;

pub use fallback::{baseline_cost, FallbackConfig, FallbackHeuristic, DEFAULT_BASELINE_COST};
pub use output::{OutputConfig, OutputFormatter, MIN_CONFIDENCE};

use crate::error::{ForecastError, Result};
use crate::models::{FamilyUsed, ForecastPoint, ModelRecord, SeriesKey};
use crate::observability::StructuredLogger;
use crate::store::{ModelRegistry, ObservationStore};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::warn;

/// One served forecast, before it is framed as a response
#[derive(Debug, Clone)]
pub struct Forecast {
    pub family_used: FamilyUsed,
    pub points: Vec<ForecastPoint>,
    pub confidence_score: f64,
    pub trained_at: Option<DateTime<Utc>>,
    pub note: Option<String>,
}

/// Read-only view over the registry, with the store for fallback history
pub struct ForecastServer {
    registry: Arc<ModelRegistry>,
    store: Arc<dyn ObservationStore>,
    fallback: FallbackHeuristic,
    formatter: OutputFormatter,
    logger: StructuredLogger,
}

impl ForecastServer {
    pub fn new(
        registry: Arc<ModelRegistry>,
        store: Arc<dyn ObservationStore>,
        fallback: FallbackHeuristic,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            registry,
            store,
            fallback,
            formatter: OutputFormatter::new(),
            logger,
        }
    }

    /// Forecast `horizon` steps for `key`. The horizon must already be validated.
    pub fn forecast(&self, key: &SeriesKey, horizon: usize) -> Forecast {
        let Some(record) = self.registry.get(key) else {
            return self.fallback_forecast(key, horizon, format!("no trained model for {}", key));
        };

        match self.model_points(&record, horizon) {
            Ok(points) => {
                let confidence_score = self.formatter.confidence_score(&record.error_metrics);
                if self.formatter.is_low_confidence(confidence_score) {
                    warn!(
                        key = %key,
                        family = %record.family,
                        confidence = confidence_score,
                        "Low confidence forecast"
                    );
                }
                Forecast {
                    family_used: record.family.into(),
                    points,
                    confidence_score,
                    trained_at: Some(record.trained_at),
                    note: None,
                }
            }
            Err(e) => self.fallback_forecast(
                key,
                horizon,
                format!("{} model could not forecast: {}", record.family, e),
            ),
        }
    }

    fn model_points(&self, record: &ModelRecord, horizon: usize) -> Result<Vec<ForecastPoint>> {
        if record.parameters.family() != record.family {
            return Err(ForecastError::inference(format!(
                "record is tagged {} but holds {} parameters",
                record.family,
                record.parameters.family()
            )));
        }
        let points = record
            .parameters
            .as_model()
            .forecast(horizon, &record.error_metrics)?;
        self.formatter.check(&points, horizon)?;
        Ok(points)
    }

    fn fallback_forecast(&self, key: &SeriesKey, horizon: usize, reason: String) -> Forecast {
        self.logger.log_fallback(key, &reason);
        let now = Utc::now();
        let recent = self
            .store
            .query(
                Some(&key.provider),
                Some(&key.service_type),
                self.fallback.window_start(now),
            )
            .unwrap_or_else(|e| {
                warn!(key = %key, error = %e, "Recent history unavailable, using baseline");
                Vec::new()
            });
        Forecast {
            family_used: FamilyUsed::Fallback,
            points: self.fallback.forecast(key, &recent, horizon, now),
            confidence_score: MIN_CONFIDENCE,
            trained_at: None,
            note: Some(format!("{}; using fallback heuristic", reason)),
        }
    }
}
