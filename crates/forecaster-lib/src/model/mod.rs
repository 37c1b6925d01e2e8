//! Forecasting model families
//!
//! Each family fits from an ordered series and carries everything it needs
//! to roll forward in its persisted parameters, so serving a forecast never
//! has to go back to the observation store.

mod regression;
mod seasonal;
mod sequence;

pub use regression::RegressionModel;
pub use seasonal::{deduplicate, SeasonalFit, SeasonalModel, SEASONAL_MIN_OBSERVATIONS};
pub use sequence::{SequenceFit, SequenceModel, SequenceSettings};

use crate::error::{ForecastError, Result};
use crate::models::{ErrorMetrics, ForecastPoint, ModelFamily, SeriesPoint};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// z-value for the ~95% bands synthesised from training error
pub const INTERVAL_Z: f64 = 1.96;

/// Sampling step used when a series has no positive gaps
pub const DEFAULT_STEP_SECONDS: i64 = 3600;

/// Produces bounded forecast points from persisted model state
pub trait ForecastModel {
    /// Forecast `horizon` steps past the end of the training series
    fn forecast(&self, horizon: usize, metrics: &ErrorMetrics) -> Result<Vec<ForecastPoint>>;
}

/// Where a series ended and how far apart its samples are
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeAxis {
    pub last_timestamp: DateTime<Utc>,
    pub step_seconds: i64,
}

impl TimeAxis {
    pub fn from_series(series: &[SeriesPoint]) -> Result<Self> {
        let last = series
            .last()
            .ok_or_else(|| ForecastError::training("empty series has no time axis"))?;
        Ok(Self {
            last_timestamp: last.timestamp,
            step_seconds: median_step_seconds(series),
        })
    }

    /// Timestamp of the `step`-th point after the end of the series; an
    /// inference error once that falls outside the representable range
    pub fn at(&self, step: usize) -> Result<DateTime<Utc>> {
        i64::try_from(step)
            .ok()
            .and_then(|step| self.step_seconds.max(1).checked_mul(step))
            .and_then(Duration::try_seconds)
            .and_then(|offset| self.last_timestamp.checked_add_signed(offset))
            .ok_or_else(|| {
                ForecastError::inference(format!(
                    "step {} of {}s past {} is out of range",
                    step, self.step_seconds, self.last_timestamp
                ))
            })
    }
}

/// Persisted parameters, tagged by family
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "lowercase")]
pub enum ModelParameters {
    Seasonal(SeasonalModel),
    Sequence(SequenceModel),
    Regression(RegressionModel),
}

impl ModelParameters {
    pub fn family(&self) -> ModelFamily {
        match self {
            ModelParameters::Seasonal(_) => ModelFamily::Seasonal,
            ModelParameters::Sequence(_) => ModelFamily::Sequence,
            ModelParameters::Regression(_) => ModelFamily::Regression,
        }
    }

    pub fn as_model(&self) -> &dyn ForecastModel {
        match self {
            ModelParameters::Seasonal(m) => m,
            ModelParameters::Sequence(m) => m,
            ModelParameters::Regression(m) => m,
        }
    }
}

/// Median positive gap between consecutive samples, in seconds
pub fn median_step_seconds(series: &[SeriesPoint]) -> i64 {
    let mut gaps: Vec<i64> = series
        .windows(2)
        .map(|w| (w[1].timestamp - w[0].timestamp).num_seconds())
        .filter(|gap| *gap > 0)
        .collect();
    if gaps.is_empty() {
        return DEFAULT_STEP_SECONDS;
    }
    gaps.sort_unstable();
    gaps[gaps.len() / 2]
}

/// Points with a fixed `± INTERVAL_Z × rmse` band
pub(crate) fn points_with_error_band(
    axis: &TimeAxis,
    values: &[f64],
    metrics: &ErrorMetrics,
) -> Result<Vec<ForecastPoint>> {
    let half_width = INTERVAL_Z * metrics.root_mean_squared_error;
    values
        .iter()
        .enumerate()
        .map(|(i, v)| ForecastPoint::with_margin(axis.at(i + 1)?, *v, half_width))
        .collect()
}

/// Population mean and standard deviation
pub(crate) fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn series(gaps_secs: &[i64]) -> Vec<SeriesPoint> {
        let mut ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut out = vec![SeriesPoint { timestamp: ts, cost: 1.0 }];
        for gap in gaps_secs {
            ts += Duration::seconds(*gap);
            out.push(SeriesPoint { timestamp: ts, cost: 1.0 });
        }
        out
    }

    #[test]
    fn test_median_step() {
        assert_eq!(median_step_seconds(&series(&[3600, 3600, 7200, 3600])), 3600);
        assert_eq!(median_step_seconds(&series(&[86400, 86400, 86400])), 86400);
        // Duplicate timestamps only: fall back to hourly
        assert_eq!(median_step_seconds(&series(&[0, 0, 0])), DEFAULT_STEP_SECONDS);
    }

    #[test]
    fn test_time_axis_steps_forward() {
        let s = series(&[3600, 3600]);
        let axis = TimeAxis::from_series(&s).unwrap();
        assert_eq!(axis.at(1).unwrap(), s[2].timestamp + Duration::hours(1));
        assert_eq!(axis.at(3).unwrap(), s[2].timestamp + Duration::hours(3));
        assert!(TimeAxis::from_series(&[]).is_err());
    }

    #[test]
    fn test_time_axis_out_of_range() {
        let axis = TimeAxis {
            last_timestamp: DateTime::<Utc>::MAX_UTC - Duration::days(1),
            step_seconds: 3600,
        };
        assert!(axis.at(24).is_ok());
        assert!(matches!(axis.at(25), Err(ForecastError::Inference(_))));

        let wide = TimeAxis {
            last_timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            step_seconds: i64::MAX / 2,
        };
        assert!(matches!(wide.at(3), Err(ForecastError::Inference(_))));

        let metrics = ErrorMetrics {
            mean_absolute_error: 0.0,
            root_mean_squared_error: 0.0,
            evaluation: crate::models::Evaluation::InSample,
        };
        assert!(points_with_error_band(&axis, &[1.0; 30], &metrics).is_err());
    }

    #[test]
    fn test_mean_std() {
        let (m, s) = mean_std(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert!((m - 5.0).abs() < 1e-12);
        assert!((s - 2.0).abs() < 1e-12);
        assert_eq!(mean_std(&[]), (0.0, 0.0));
    }
}
