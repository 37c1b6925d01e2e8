//! Forecast output checks and confidence scoring
//!
//! Model output has already been clamped point by point; this module checks
//! the series as a whole and turns training error into a confidence score.

use crate::error::{ForecastError, Result};
use crate::models::{ErrorMetrics, ForecastPoint};

/// Floor for model confidence, and the fixed confidence of fallback output
pub const MIN_CONFIDENCE: f64 = 0.6;

/// Configuration for output formatting
#[derive(Debug, Clone)]
pub struct OutputConfig {
    /// Lowest confidence reported for model output
    pub min_confidence: f64,
    /// Scores below this are flagged in logs
    pub low_confidence_threshold: f64,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            min_confidence: MIN_CONFIDENCE,
            low_confidence_threshold: 0.7,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OutputFormatter {
    config: OutputConfig,
}

impl OutputFormatter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: OutputConfig) -> Self {
        Self { config }
    }

    /// `clamp(max(min, 1 − MAE), min, 1)`; a non-finite MAE scores the minimum
    pub fn confidence_score(&self, metrics: &ErrorMetrics) -> f64 {
        let min = self.config.min_confidence;
        let raw = 1.0 - metrics.mean_absolute_error;
        if !raw.is_finite() {
            return min;
        }
        raw.max(min).clamp(min, 1.0)
    }

    pub fn is_low_confidence(&self, score: f64) -> bool {
        score < self.config.low_confidence_threshold
    }

    /// Reject model output that does not cover the horizon or breaks ordering
    pub fn check(&self, points: &[ForecastPoint], horizon: usize) -> Result<()> {
        if points.len() != horizon {
            return Err(ForecastError::inference(format!(
                "model returned {} points for horizon {}",
                points.len(),
                horizon
            )));
        }
        for pair in points.windows(2) {
            if pair[1].timestamp <= pair[0].timestamp {
                return Err(ForecastError::inference("forecast timestamps are not increasing"));
            }
        }
        let well_formed = points.iter().all(|p| {
            p.predicted_cost.is_finite()
                && p.confidence_upper.is_finite()
                && 0.0 <= p.confidence_lower
                && p.confidence_lower <= p.predicted_cost
                && p.predicted_cost <= p.confidence_upper
        });
        if !well_formed {
            return Err(ForecastError::inference("forecast bounds are out of order"));
        }
        Ok(())
    }
}
