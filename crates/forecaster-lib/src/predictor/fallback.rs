//! Fallback heuristic
//!
//! Used whenever no trained model can answer. Scales recent average spend
//! (or a static per-service baseline) by business-hour and weekend factors.

use crate::calendar::{is_business_hour, is_weekend, next_full_hour};
use crate::model::mean_std;
use crate::models::{ForecastPoint, Observation, SeriesKey};
use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

/// Hourly cost assumed for services missing from the baseline table
pub const DEFAULT_BASELINE_COST: f64 = 0.25;

/// Static hourly baseline (USD) for a provider/service pair
pub fn baseline_cost(key: &SeriesKey) -> f64 {
    match (key.provider.as_str(), key.service_type.as_str()) {
        ("aws", "ec2") => 0.50,
        ("aws", "s3") => 0.10,
        ("aws", "rds") => 0.75,
        ("aws", "lambda") => 0.05,
        ("azure", "vm") => 0.55,
        ("azure", "storage") => 0.10,
        ("azure", "sql") => 0.80,
        ("azure", "functions") => 0.05,
        ("gcp", "compute") => 0.45,
        ("gcp", "storage") => 0.09,
        ("gcp", "cloudsql") => 0.70,
        ("gcp", "functions") => 0.04,
        _ => DEFAULT_BASELINE_COST,
    }
}

#[derive(Debug, Clone)]
pub struct FallbackConfig {
    /// How far back recent observations are averaged
    pub recent_window: Duration,
    pub business_hours_factor: f64,
    pub off_hours_factor: f64,
    pub weekend_factor: f64,
    /// Noise std as a fraction of the recent cost std
    pub noise_fraction: f64,
    /// Spread used when there is no recent history, as a fraction of baseline
    pub baseline_spread: f64,
    /// Relative half-width of the bounds
    pub band: f64,
    pub min_cost: f64,
    /// Fixed RNG seed; fresh entropy per forecast when `None`
    pub seed: Option<u64>,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            recent_window: Duration::days(7),
            business_hours_factor: 1.2,
            off_hours_factor: 0.9,
            weekend_factor: 0.7,
            noise_fraction: 0.1,
            baseline_spread: 0.1,
            band: 0.1,
            min_cost: 0.01,
            seed: None,
        }
    }
}

/// Heuristic forecaster that never fails
#[derive(Debug, Clone, Default)]
pub struct FallbackHeuristic {
    config: FallbackConfig,
}

impl FallbackHeuristic {
    pub fn new(config: FallbackConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FallbackConfig {
        &self.config
    }

    /// Start of the recent window relative to `now`
    pub fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.config.recent_window
    }

    /// Hourly points starting at the next full hour after `now`.
    /// `recent` should already be limited to the recent window.
    pub fn forecast(
        &self,
        key: &SeriesKey,
        recent: &[Observation],
        horizon: usize,
        now: DateTime<Utc>,
    ) -> Vec<ForecastPoint> {
        let costs: Vec<f64> = recent
            .iter()
            .map(|o| o.cost)
            .filter(|c| c.is_finite())
            .collect();
        let (mean, std) = if costs.is_empty() {
            let base = baseline_cost(key);
            (base, base * self.config.baseline_spread)
        } else {
            mean_std(&costs)
        };

        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let noise = Normal::new(0.0, self.config.noise_fraction * std).ok();

        let start = next_full_hour(now);
        (0..horizon)
            .map(|i| {
                let timestamp = start + Duration::hours(i as i64);
                let hour_factor = if is_business_hour(timestamp) {
                    self.config.business_hours_factor
                } else {
                    self.config.off_hours_factor
                };
                let day_factor = if is_weekend(timestamp) {
                    self.config.weekend_factor
                } else {
                    1.0
                };
                let jitter = noise.as_ref().map_or(0.0, |n| n.sample(&mut rng));
                let raw = mean * hour_factor * day_factor + jitter;
                let predicted_cost = if raw.is_finite() {
                    raw.max(self.config.min_cost)
                } else {
                    self.config.min_cost
                };
                ForecastPoint {
                    timestamp,
                    predicted_cost,
                    confidence_lower: predicted_cost * (1.0 - self.config.band),
                    confidence_upper: predicted_cost * (1.0 + self.config.band),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    fn key(provider: &str, service: &str) -> SeriesKey {
        SeriesKey::new(provider, service).unwrap()
    }

    fn seeded() -> FallbackHeuristic {
        FallbackHeuristic::new(FallbackConfig {
            seed: Some(11),
            ..Default::default()
        })
    }

    #[test]
    fn test_baseline_table() {
        assert_eq!(baseline_cost(&key("aws", "ec2")), 0.50);
        assert_eq!(baseline_cost(&key("AZURE", "Sql")), 0.80);
        assert_eq!(baseline_cost(&key("gcp", "functions")), 0.04);
        assert_eq!(baseline_cost(&key("oracle", "compute")), 0.25);
        assert_eq!(baseline_cost(&key("aws", "dynamodb")), 0.25);
    }

    #[test]
    fn test_steps_start_at_next_full_hour() {
        // Wednesday 10:20
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 10, 20, 0).unwrap();
        let points = seeded().forecast(&key("aws", "ec2"), &[], 24, now);
        assert_eq!(points.len(), 24);
        assert_eq!(points[0].timestamp, Utc.with_ymd_and_hms(2024, 5, 1, 11, 0, 0).unwrap());
        assert_eq!(points[23].timestamp.hour(), 10);
        for p in &points {
            assert!(p.predicted_cost >= 0.01);
            assert!((p.confidence_lower - p.predicted_cost * 0.9).abs() < 1e-12);
            assert!((p.confidence_upper - p.predicted_cost * 1.1).abs() < 1e-12);
        }
    }

    #[test]
    fn test_cold_start_uses_baseline_shape() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let points = seeded().forecast(&key("aws", "rds"), &[], 48, now);
        // Noise std is 0.1 × 0.075, so each point stays near its expectation
        let business = points.iter().find(|p| p.timestamp.hour() == 12).unwrap();
        let night = points.iter().find(|p| p.timestamp.hour() == 3).unwrap();
        assert!((business.predicted_cost - 0.75 * 1.2).abs() < 0.05);
        assert!((night.predicted_cost - 0.75 * 0.9).abs() < 0.05);
    }

    #[test]
    fn test_recent_mean_drives_level() {
        // Saturday
        let now = Utc.with_ymd_and_hms(2024, 5, 4, 1, 0, 0).unwrap();
        let recent: Vec<Observation> = (0..10)
            .map(|i| Observation::new(now - Duration::hours(i), "aws", "ec2", 100.0))
            .collect();
        let points = seeded().forecast(&key("aws", "ec2"), &recent, 3, now);
        // Constant history: zero noise, off-hours weekend factor only
        for p in points {
            assert!((p.predicted_cost - 100.0 * 0.9 * 0.7).abs() < 1e-9);
        }
    }

    #[test]
    fn test_floor_applies() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let recent = vec![Observation::new(now, "aws", "ec2", 0.0)];
        let points = seeded().forecast(&key("aws", "ec2"), &recent, 5, now);
        assert!(points.iter().all(|p| p.predicted_cost == 0.01));
    }
}
