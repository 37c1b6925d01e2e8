//! Seasonal decomposition model (additive Holt-Winters)
//!
//! Level, trend and a repeating seasonal profile are smoothed exponentially.
//! The smoothing constants are chosen by grid search on one-step-ahead
//! in-sample error. The season length follows the sampling step: 24 for
//! sub-half-day data, 7 for roughly daily data. A trend-only model is used
//! when fewer than two full seasons are available.

use super::{ForecastModel, TimeAxis, INTERVAL_Z};
use crate::error::{ForecastError, Result};
use crate::models::{ErrorMetrics, ForecastPoint, SeriesPoint};
use crate::trainer::linear_regression_slope;
use serde::{Deserialize, Serialize};

/// Minimum deduplicated observations for the seasonal family
pub const SEASONAL_MIN_OBSERVATIONS: usize = 20;

const ALPHA_GRID: [f64; 6] = [0.1, 0.2, 0.3, 0.5, 0.7, 0.9];
const BETA_GRID: [f64; 4] = [0.01, 0.05, 0.1, 0.2];
const GAMMA_GRID: [f64; 4] = [0.05, 0.1, 0.2, 0.4];

/// Points used to estimate the initial trend of a trend-only model
const TREND_INIT_POINTS: usize = 10;

const HALF_DAY_SECS: i64 = 12 * 60 * 60;
const HALF_WEEK_SECS: i64 = 84 * 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeasonalModel {
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
    /// Season length in steps; `None` for a trend-only model
    pub period: Option<usize>,
    pub level: f64,
    pub trend: f64,
    /// Seasonal offsets indexed by `step % period`
    pub seasonal: Vec<f64>,
    /// Number of points the state was smoothed over
    pub observed: usize,
    /// RMS of the one-step-ahead residuals
    pub residual_std: f64,
    pub axis: TimeAxis,
}

/// A fitted model plus the in-sample values it was scored on
#[derive(Debug, Clone)]
pub struct SeasonalFit {
    pub model: SeasonalModel,
    pub actual: Vec<f64>,
    pub fitted: Vec<f64>,
}

/// Smoothed state for one choice of constants
struct Smoothing {
    alpha: f64,
    beta: f64,
    gamma: f64,
    level: f64,
    trend: f64,
    seasonal: Vec<f64>,
    /// Index of the first point with a one-step-ahead prediction
    start: usize,
    fitted: Vec<f64>,
}

impl Smoothing {
    fn sse(&self, values: &[f64]) -> f64 {
        values[self.start..]
            .iter()
            .zip(&self.fitted)
            .map(|(a, p)| (a - p).powi(2))
            .sum()
    }
}

impl SeasonalModel {
    /// Fit on a chronologically ordered series with unique timestamps
    pub fn fit(series: &[SeriesPoint]) -> Result<SeasonalFit> {
        if series.len() < SEASONAL_MIN_OBSERVATIONS {
            return Err(ForecastError::InsufficientData {
                required: SEASONAL_MIN_OBSERVATIONS,
                actual: series.len(),
            });
        }
        let values: Vec<f64> = series.iter().map(|p| p.cost).collect();
        let axis = TimeAxis::from_series(series)?;
        let period = season_length(axis.step_seconds).filter(|m| values.len() >= 2 * m);
        let gammas: &[f64] = if period.is_some() { &GAMMA_GRID } else { &[0.0] };

        let mut best: Option<(f64, Smoothing)> = None;
        for &alpha in &ALPHA_GRID {
            for &beta in &BETA_GRID {
                for &gamma in gammas {
                    let state = smooth(&values, period, alpha, beta, gamma);
                    let sse = state.sse(&values);
                    if !sse.is_finite() {
                        continue;
                    }
                    if best.as_ref().map_or(true, |(b, _)| sse < *b) {
                        best = Some((sse, state));
                    }
                }
            }
        }

        let (sse, state) =
            best.ok_or_else(|| ForecastError::training("no finite smoothing fit"))?;
        if !state.level.is_finite()
            || !state.trend.is_finite()
            || state.seasonal.iter().any(|s| !s.is_finite())
        {
            return Err(ForecastError::training("smoothing state diverged"));
        }

        let residual_std = (sse / state.fitted.len() as f64).sqrt();
        let actual = values[state.start..].to_vec();
        let model = SeasonalModel {
            alpha: state.alpha,
            beta: state.beta,
            gamma: state.gamma,
            period,
            level: state.level,
            trend: state.trend,
            seasonal: state.seasonal,
            observed: values.len(),
            residual_std,
            axis,
        };
        Ok(SeasonalFit {
            model,
            actual,
            fitted: state.fitted,
        })
    }

    fn season_offset(&self, step: usize) -> f64 {
        match self.period {
            Some(m) => self.seasonal[(self.observed + step - 1) % m],
            None => 0.0,
        }
    }
}

impl ForecastModel for SeasonalModel {
    fn forecast(&self, horizon: usize, _metrics: &ErrorMetrics) -> Result<Vec<ForecastPoint>> {
        if let Some(m) = self.period {
            if m == 0 || self.seasonal.len() != m {
                return Err(ForecastError::inference(format!(
                    "seasonal profile has {} entries for period {}",
                    self.seasonal.len(),
                    m
                )));
            }
        }
        (1..=horizon)
            .map(|h| {
                let value = self.level + h as f64 * self.trend + self.season_offset(h);
                let half_width = INTERVAL_Z * self.residual_std * (h as f64).sqrt();
                ForecastPoint::with_margin(self.axis.at(h)?, value, half_width)
            })
            .collect()
    }
}

/// Keep the first sample at each timestamp of an ordered series
pub fn deduplicate(series: &[SeriesPoint]) -> Vec<SeriesPoint> {
    let mut out: Vec<SeriesPoint> = Vec::with_capacity(series.len());
    for point in series {
        if out.last().map_or(true, |last| last.timestamp != point.timestamp) {
            out.push(*point);
        }
    }
    out
}

fn season_length(step_seconds: i64) -> Option<usize> {
    if step_seconds < HALF_DAY_SECS {
        Some(24)
    } else if step_seconds < HALF_WEEK_SECS {
        Some(7)
    } else {
        None
    }
}

fn smooth(values: &[f64], period: Option<usize>, alpha: f64, beta: f64, gamma: f64) -> Smoothing {
    match period {
        Some(m) => smooth_seasonal(values, m, alpha, beta, gamma),
        None => smooth_trend(values, alpha, beta),
    }
}

fn smooth_seasonal(values: &[f64], m: usize, alpha: f64, beta: f64, gamma: f64) -> Smoothing {
    let first = values[..m].iter().sum::<f64>() / m as f64;
    let second = values[m..2 * m].iter().sum::<f64>() / m as f64;
    let mut level = first;
    let mut trend = (second - first) / m as f64;
    let mut seasonal: Vec<f64> = values[..m].iter().map(|v| v - first).collect();
    let mut fitted = Vec::with_capacity(values.len() - m);

    for (t, &y) in values.iter().enumerate().skip(m) {
        let idx = t % m;
        fitted.push(level + trend + seasonal[idx]);
        let prev_level = level;
        level = alpha * (y - seasonal[idx]) + (1.0 - alpha) * (level + trend);
        trend = beta * (level - prev_level) + (1.0 - beta) * trend;
        seasonal[idx] = gamma * (y - level) + (1.0 - gamma) * seasonal[idx];
    }

    Smoothing {
        alpha,
        beta,
        gamma,
        level,
        trend,
        seasonal,
        start: m,
        fitted,
    }
}

fn smooth_trend(values: &[f64], alpha: f64, beta: f64) -> Smoothing {
    let mut level = values[0];
    let mut trend = linear_regression_slope(&values[..values.len().min(TREND_INIT_POINTS)]);
    let mut fitted = Vec::with_capacity(values.len() - 1);

    for &y in &values[1..] {
        fitted.push(level + trend);
        let prev_level = level;
        level = alpha * y + (1.0 - alpha) * (level + trend);
        trend = beta * (level - prev_level) + (1.0 - beta) * trend;
    }

    Smoothing {
        alpha,
        beta,
        gamma: 0.0,
        level,
        trend,
        seasonal: Vec::new(),
        start: 1,
        fitted,
    }
}
