//! Feature extraction for the regression family
//!
//! Turns an ordered cost series into calendar and lag features. Rows whose
//! lags or moving average would be undefined are dropped rather than imputed.

use crate::calendar::{day_of_week, is_business_hour, is_weekend};
use crate::error::{ForecastError, Result};
use crate::models::SeriesPoint;
use chrono::{DateTime, Timelike, Utc};

/// Minimum number of complete feature rows required for regression
pub const MIN_FEATURE_ROWS: usize = 5;

/// Longest lag used by any feature; also the number of leading rows dropped
pub const LONG_LAG: usize = 24;

/// Trailing window of the moving-average feature
pub const MOVING_AVERAGE_WINDOW: usize = 7;

pub const NUM_FEATURES: usize = 7;

/// Column order of every feature row
pub const FEATURE_NAMES: [&str; NUM_FEATURES] = [
    "hour_of_day",
    "day_of_week",
    "is_weekend",
    "is_business_hours",
    "cost_lag_1",
    "cost_lag_24",
    "moving_average_7",
];

/// One complete feature row with its target cost
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub timestamp: DateTime<Utc>,
    pub features: [f64; NUM_FEATURES],
    pub target: f64,
}

/// Builds regression features from ordered series
#[derive(Debug, Clone)]
pub struct FeatureBuilder {
    min_rows: usize,
}

impl Default for FeatureBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureBuilder {
    pub fn new() -> Self {
        Self {
            min_rows: MIN_FEATURE_ROWS,
        }
    }

    pub fn with_min_rows(min_rows: usize) -> Self {
        Self { min_rows }
    }

    pub fn schema() -> Vec<String> {
        FEATURE_NAMES.iter().map(|s| s.to_string()).collect()
    }

    /// Number of rows `build` would produce for a series of `len` points
    pub fn complete_rows(len: usize) -> usize {
        len.saturating_sub(LONG_LAG)
    }

    pub fn build(&self, series: &[SeriesPoint]) -> Result<Vec<FeatureRow>> {
        let available = Self::complete_rows(series.len());
        if available < self.min_rows {
            return Err(ForecastError::InsufficientData {
                required: self.min_rows + LONG_LAG,
                actual: series.len(),
            });
        }

        let costs: Vec<f64> = series.iter().map(|p| p.cost).collect();
        let rows = series
            .iter()
            .enumerate()
            .skip(LONG_LAG)
            .filter_map(|(i, point)| {
                Self::future_row(point.timestamp, &costs[..i]).map(|features| FeatureRow {
                    timestamp: point.timestamp,
                    features,
                    target: point.cost,
                })
            })
            .collect();
        Ok(rows)
    }

    /// Features for `timestamp` given the costs that precede it, oldest first.
    /// Returns `None` when fewer than `LONG_LAG` costs are known.
    pub fn future_row(timestamp: DateTime<Utc>, history: &[f64]) -> Option<[f64; NUM_FEATURES]> {
        if history.len() < LONG_LAG {
            return None;
        }
        let n = history.len();
        let window = &history[n - MOVING_AVERAGE_WINDOW..];
        let moving_average = window.iter().sum::<f64>() / MOVING_AVERAGE_WINDOW as f64;
        Some([
            timestamp.hour() as f64,
            day_of_week(timestamp) as f64,
            flag(is_weekend(timestamp)),
            flag(is_business_hour(timestamp)),
            history[n - 1],
            history[n - LONG_LAG],
            moving_average,
        ])
    }
}

fn flag(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

/// Calculate linear regression slope for trend detection
pub fn linear_regression_slope(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let sum_x: f64 = (0..values.len()).map(|i| i as f64).sum();
    let sum_y: f64 = values.iter().sum();
    let sum_xy: f64 = values.iter().enumerate().map(|(i, y)| i as f64 * y).sum();
    let sum_x2: f64 = (0..values.len()).map(|i| (i as f64).powi(2)).sum();
    let denom = n * sum_x2 - sum_x.powi(2);
    if denom.abs() < f64::EPSILON {
        return 0.0;
    }
    (n * sum_xy - sum_x * sum_y) / denom
}
