//! Feature-based regression model
//!
//! Ridge-regularised least squares over standardised calendar and lag
//! features. Forecasting walks forward one step at a time, feeding each
//! prediction back in as the newest lag.

use super::{mean_std, points_with_error_band, ForecastModel, TimeAxis};
use crate::error::{ForecastError, Result};
use crate::models::{ErrorMetrics, ForecastPoint, SeriesPoint};
use crate::trainer::{FeatureBuilder, FeatureRow, LONG_LAG, NUM_FEATURES};
use serde::{Deserialize, Serialize};

/// Pivot magnitude below which the normal equations are treated as singular
const SINGULAR_PIVOT: f64 = 1e-12;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionModel {
    /// Coefficients on standardised features, in feature-schema order
    pub coefficients: Vec<f64>,
    pub intercept: f64,
    pub feature_means: Vec<f64>,
    pub feature_scales: Vec<f64>,
    /// Most recent `LONG_LAG` costs, oldest first
    pub history: Vec<f64>,
    pub axis: TimeAxis,
}

impl RegressionModel {
    /// Fit on feature rows built from `series`; returns the model and its
    /// in-sample predictions aligned with `rows`
    pub fn fit(
        series: &[SeriesPoint],
        rows: &[FeatureRow],
        ridge_lambda: f64,
    ) -> Result<(Self, Vec<f64>)> {
        if rows.is_empty() || series.len() < LONG_LAG {
            return Err(ForecastError::InsufficientData {
                required: LONG_LAG + 1,
                actual: series.len(),
            });
        }

        let (feature_means, feature_scales) = column_stats(rows);
        let targets: Vec<f64> = rows.iter().map(|r| r.target).collect();
        let (intercept, _) = mean_std(&targets);

        // Normal equations (XᵀX + λI)β = Xᵀ(y − ȳ) on standardised columns
        let mut xtx = vec![vec![0.0; NUM_FEATURES]; NUM_FEATURES];
        let mut xty = vec![0.0; NUM_FEATURES];
        for row in rows {
            let x = standardize(&row.features, &feature_means, &feature_scales);
            let y = row.target - intercept;
            for i in 0..NUM_FEATURES {
                xty[i] += x[i] * y;
                for j in 0..NUM_FEATURES {
                    xtx[i][j] += x[i] * x[j];
                }
            }
        }
        for (i, row) in xtx.iter_mut().enumerate() {
            row[i] += ridge_lambda;
        }
        let coefficients = solve(xtx, xty)?;

        let model = Self {
            coefficients,
            intercept,
            feature_means,
            feature_scales,
            history: series[series.len() - LONG_LAG..].iter().map(|p| p.cost).collect(),
            axis: TimeAxis::from_series(series)?,
        };
        let fitted = rows.iter().map(|r| model.predict_row(&r.features)).collect();
        Ok((model, fitted))
    }

    fn predict_row(&self, features: &[f64; NUM_FEATURES]) -> f64 {
        let x = standardize(features, &self.feature_means, &self.feature_scales);
        self.intercept
            + x.iter()
                .zip(&self.coefficients)
                .map(|(xi, bi)| xi * bi)
                .sum::<f64>()
    }

    fn check_shape(&self) -> Result<()> {
        if self.coefficients.len() != NUM_FEATURES
            || self.feature_means.len() != NUM_FEATURES
            || self.feature_scales.len() != NUM_FEATURES
        {
            return Err(ForecastError::inference(format!(
                "regression parameters do not match the {}-feature schema",
                NUM_FEATURES
            )));
        }
        if self.history.len() < LONG_LAG {
            return Err(ForecastError::inference(format!(
                "regression history has {} values, need {}",
                self.history.len(),
                LONG_LAG
            )));
        }
        Ok(())
    }
}

impl ForecastModel for RegressionModel {
    fn forecast(&self, horizon: usize, metrics: &ErrorMetrics) -> Result<Vec<ForecastPoint>> {
        self.check_shape()?;
        let mut history = self.history.clone();
        let mut values = Vec::with_capacity(horizon);
        for step in 1..=horizon {
            let features = FeatureBuilder::future_row(self.axis.at(step)?, &history)
                .ok_or_else(|| ForecastError::inference("lag history exhausted"))?;
            let value = self.predict_row(&features);
            if !value.is_finite() {
                return Err(ForecastError::inference(format!(
                    "regression produced {} at step {}",
                    value, step
                )));
            }
            history.push(value.max(0.0));
            values.push(value);
        }
        points_with_error_band(&self.axis, &values, metrics)
    }
}

fn column_stats(rows: &[FeatureRow]) -> (Vec<f64>, Vec<f64>) {
    (0..NUM_FEATURES)
        .map(|j| {
            let column: Vec<f64> = rows.iter().map(|r| r.features[j]).collect();
            let (mean, std) = mean_std(&column);
            // Constant columns standardise to zero and stay out of the fit
            (mean, if std > f64::EPSILON { std } else { 1.0 })
        })
        .unzip()
}

fn standardize(
    features: &[f64; NUM_FEATURES],
    means: &[f64],
    scales: &[f64],
) -> [f64; NUM_FEATURES] {
    let mut out = [0.0; NUM_FEATURES];
    for j in 0..NUM_FEATURES {
        out[j] = (features[j] - means[j]) / scales[j];
    }
    out
}

/// Gaussian elimination with partial pivoting
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Result<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| {
                a[i][col]
                    .abs()
                    .partial_cmp(&a[j][col].abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or(col);
        if a[pivot][col].abs() < SINGULAR_PIVOT || !a[pivot][col].is_finite() {
            return Err(ForecastError::training("normal equations are singular"));
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    if x.iter().any(|v| !v.is_finite()) {
        return Err(ForecastError::training("regression coefficients are not finite"));
    }
    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Evaluation;
    use chrono::{Duration, TimeZone, Utc};

    fn hourly(values: &[f64]) -> Vec<SeriesPoint> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, v)| SeriesPoint {
                timestamp: start + Duration::hours(i as i64),
                cost: *v,
            })
            .collect()
    }

    fn metrics(rmse: f64) -> ErrorMetrics {
        ErrorMetrics {
            mean_absolute_error: rmse,
            root_mean_squared_error: rmse,
            evaluation: Evaluation::InSample,
        }
    }

    #[test]
    fn test_solve_identity() {
        let a = vec![vec![2.0, 0.0], vec![0.0, 4.0]];
        let x = solve(a, vec![2.0, 8.0]).unwrap();
        assert!((x[0] - 1.0).abs() < 1e-12);
        assert!((x[1] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_solve_singular() {
        let a = vec![vec![1.0, 2.0], vec![2.0, 4.0]];
        assert!(solve(a, vec![1.0, 2.0]).is_err());
    }

    #[test]
    fn test_business_hour_pattern_is_fitted() {
        let values: Vec<f64> = (0..24 * 10)
            .map(|h| if (9..18).contains(&(h % 24)) { 30.0 } else { 10.0 })
            .collect();
        let series = hourly(&values);
        let rows = FeatureBuilder::new().build(&series).unwrap();
        let (model, fitted) = RegressionModel::fit(&series, &rows, 1e-3).unwrap();
        let actual: Vec<f64> = rows.iter().map(|r| r.target).collect();
        let m = ErrorMetrics::compute(&actual, &fitted, Evaluation::InSample).unwrap();
        assert!(m.mean_absolute_error < 2.0, "mae was {}", m.mean_absolute_error);

        let points = model.forecast(24, &metrics(m.root_mean_squared_error)).unwrap();
        assert_eq!(points.len(), 24);
        // Series ends at 23:00; step 10 is 09:00, step 3 is 02:00
        assert!(points[9].predicted_cost > points[2].predicted_cost);
    }

    #[test]
    fn test_constant_columns_do_not_break_fit() {
        // Every sample shares one timestamp: all calendar columns are constant
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let series: Vec<SeriesPoint> = (0..40)
            .map(|i| SeriesPoint {
                timestamp: ts,
                cost: 10.0 + (i % 5) as f64,
            })
            .collect();
        let rows = FeatureBuilder::new().build(&series).unwrap();
        let (model, _) = RegressionModel::fit(&series, &rows, 1e-3).unwrap();
        let points = model.forecast(6, &metrics(1.0)).unwrap();
        assert_eq!(points.len(), 6);
    }

    #[test]
    fn test_corrupt_parameters_are_inference_errors() {
        let values: Vec<f64> = (0..48).map(|i| i as f64).collect();
        let series = hourly(&values);
        let rows = FeatureBuilder::new().build(&series).unwrap();
        let (mut model, _) = RegressionModel::fit(&series, &rows, 1e-3).unwrap();
        model.coefficients.pop();
        assert!(matches!(
            model.forecast(3, &metrics(1.0)),
            Err(ForecastError::Inference(_))
        ));
    }
}
