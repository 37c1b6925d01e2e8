//! Core data models for the cost forecasting engine

use crate::error::{ForecastError, Result};
use crate::model::ModelParameters;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Default training lookback when a request does not specify one
pub const DEFAULT_LOOKBACK_DAYS: u32 = 90;

/// One historical cost sample, immutable once written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub timestamp: DateTime<Utc>,
    pub provider: String,
    pub service_type: String,
    #[serde(default)]
    pub resource_variant: String,
    #[serde(default)]
    pub region: String,
    pub cost: f64,
    #[serde(default)]
    pub usage_amount: f64,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl Observation {
    pub fn new(
        timestamp: DateTime<Utc>,
        provider: impl Into<String>,
        service_type: impl Into<String>,
        cost: f64,
    ) -> Self {
        Self {
            timestamp,
            provider: provider.into(),
            service_type: service_type.into(),
            resource_variant: String::new(),
            region: String::new(),
            cost,
            usage_amount: 0.0,
            tags: BTreeMap::new(),
        }
    }

    pub fn with_variant(mut self, resource_variant: impl Into<String>) -> Self {
        self.resource_variant = resource_variant.into();
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    pub fn with_usage(mut self, usage_amount: f64) -> Self {
        self.usage_amount = usage_amount;
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn key(&self) -> SeriesKey {
        SeriesKey::normalized(&self.provider, &self.service_type)
    }

    /// Reject malformed samples before they reach storage
    pub fn validate(&self) -> Result<()> {
        if self.provider.trim().is_empty() {
            return Err(ForecastError::validation("provider must not be empty"));
        }
        if self.service_type.trim().is_empty() {
            return Err(ForecastError::validation("service_type must not be empty"));
        }
        if !self.cost.is_finite() || self.cost < 0.0 {
            return Err(ForecastError::validation(format!(
                "cost must be a non-negative number, got {}",
                self.cost
            )));
        }
        if !self.usage_amount.is_finite() || self.usage_amount < 0.0 {
            return Err(ForecastError::validation(format!(
                "usage_amount must be a non-negative number, got {}",
                self.usage_amount
            )));
        }
        Ok(())
    }

    /// Validate and rewrite provider/service into their canonical form
    pub fn into_normalized(mut self) -> Result<Self> {
        self.validate()?;
        let key = self.key();
        self.provider = key.provider;
        self.service_type = key.service_type;
        Ok(self)
    }
}

/// Partition key for observations and model records
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesKey {
    pub provider: String,
    pub service_type: String,
}

impl SeriesKey {
    /// Build a key, rejecting empty components
    pub fn new(provider: &str, service_type: &str) -> Result<Self> {
        if provider.trim().is_empty() || service_type.trim().is_empty() {
            return Err(ForecastError::validation(
                "provider and service_type must not be empty",
            ));
        }
        Ok(Self::normalized(provider, service_type))
    }

    fn normalized(provider: &str, service_type: &str) -> Self {
        Self {
            provider: provider.trim().to_lowercase(),
            service_type: service_type.trim().to_lowercase(),
        }
    }

    /// Filesystem-safe, collision-free partition identifier
    pub fn partition_id(&self) -> String {
        hex::encode(self.to_string())
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.service_type)
    }
}

impl FromStr for SeriesKey {
    type Err = ForecastError;

    /// Parses `provider/service_type`
    fn from_str(s: &str) -> Result<Self> {
        let (provider, service_type) = s.split_once('/').ok_or_else(|| {
            ForecastError::validation(format!("expected provider/service_type, got {:?}", s))
        })?;
        SeriesKey::new(provider, service_type)
    }
}

/// A single (timestamp, cost) sample of an ordered series
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeriesPoint {
    pub timestamp: DateTime<Utc>,
    pub cost: f64,
}

/// Chronologically ordered series; ties keep their input order
pub fn to_series(observations: &[Observation]) -> Vec<SeriesPoint> {
    let mut series: Vec<SeriesPoint> = observations
        .iter()
        .map(|o| SeriesPoint {
            timestamp: o.timestamp,
            cost: o.cost,
        })
        .collect();
    series.sort_by_key(|p| p.timestamp);
    series
}

/// Modelling strategies, in cascade priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFamily {
    Seasonal,
    Sequence,
    Regression,
}

impl ModelFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelFamily::Seasonal => "seasonal",
            ModelFamily::Sequence => "sequence",
            ModelFamily::Regression => "regression",
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source of a forecast response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FamilyUsed {
    Seasonal,
    Sequence,
    Regression,
    Fallback,
}

impl FamilyUsed {
    pub fn as_str(&self) -> &'static str {
        match self {
            FamilyUsed::Seasonal => "seasonal",
            FamilyUsed::Sequence => "sequence",
            FamilyUsed::Regression => "regression",
            FamilyUsed::Fallback => "fallback",
        }
    }
}

impl From<ModelFamily> for FamilyUsed {
    fn from(family: ModelFamily) -> Self {
        match family {
            ModelFamily::Seasonal => FamilyUsed::Seasonal,
            ModelFamily::Sequence => FamilyUsed::Sequence,
            ModelFamily::Regression => FamilyUsed::Regression,
        }
    }
}

impl fmt::Display for FamilyUsed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the error metrics of a model were obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Evaluation {
    /// Scored on the same window the model was fitted on
    InSample,
    /// Scored on a chronologically held-out tail
    Holdout,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ErrorMetrics {
    pub mean_absolute_error: f64,
    pub root_mean_squared_error: f64,
    pub evaluation: Evaluation,
}

impl ErrorMetrics {
    /// Score predictions against actual values
    pub fn compute(actual: &[f64], predicted: &[f64], evaluation: Evaluation) -> Result<Self> {
        if actual.is_empty() || actual.len() != predicted.len() {
            return Err(ForecastError::training(format!(
                "cannot score {} predictions against {} actuals",
                predicted.len(),
                actual.len()
            )));
        }
        let n = actual.len() as f64;
        let (abs_sum, sq_sum) = actual
            .iter()
            .zip(predicted)
            .fold((0.0, 0.0), |(abs, sq), (a, p)| {
                let err = a - p;
                (abs + err.abs(), sq + err * err)
            });
        let metrics = Self {
            mean_absolute_error: abs_sum / n,
            root_mean_squared_error: (sq_sum / n).sqrt(),
            evaluation,
        };
        if !metrics.mean_absolute_error.is_finite() || !metrics.root_mean_squared_error.is_finite()
        {
            return Err(ForecastError::training("error metrics are not finite"));
        }
        Ok(metrics)
    }
}

/// A trained forecasting artifact for one key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRecord {
    pub key: SeriesKey,
    pub family: ModelFamily,
    pub trained_at: DateTime<Utc>,
    pub training_sample_count: usize,
    pub error_metrics: ErrorMetrics,
    pub parameters: ModelParameters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_schema: Option<Vec<String>>,
}

/// One element of a prediction response
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub timestamp: DateTime<Utc>,
    pub predicted_cost: f64,
    pub confidence_lower: f64,
    pub confidence_upper: f64,
}

impl ForecastPoint {
    /// Build a point from raw model output, enforcing
    /// `0 <= lower <= predicted <= upper`
    pub fn bounded(
        timestamp: DateTime<Utc>,
        predicted: f64,
        lower: f64,
        upper: f64,
    ) -> Result<Self> {
        if !predicted.is_finite() || !lower.is_finite() || !upper.is_finite() {
            return Err(ForecastError::inference(format!(
                "non-finite model output at {}: {} [{}, {}]",
                timestamp, predicted, lower, upper
            )));
        }
        let predicted_cost = predicted.max(0.0);
        Ok(Self {
            timestamp,
            predicted_cost,
            confidence_lower: lower.clamp(0.0, predicted_cost),
            confidence_upper: upper.max(predicted_cost),
        })
    }

    /// Symmetric band of `half_width` around `predicted`
    pub fn with_margin(timestamp: DateTime<Utc>, predicted: f64, half_width: f64) -> Result<Self> {
        Self::bounded(timestamp, predicted, predicted - half_width, predicted + half_width)
    }
}

/// Forecast request contract
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastRequest {
    pub provider: String,
    pub service_type: String,
    pub horizon_steps: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_variant: Option<String>,
}

impl ForecastRequest {
    pub fn new(
        provider: impl Into<String>,
        service_type: impl Into<String>,
        horizon_steps: usize,
    ) -> Self {
        Self {
            provider: provider.into(),
            service_type: service_type.into(),
            horizon_steps,
            resource_variant: None,
        }
    }

    pub fn validate(&self, max_horizon_steps: usize) -> Result<SeriesKey> {
        if self.horizon_steps == 0 {
            return Err(ForecastError::validation("horizon_steps must be greater than 0"));
        }
        if self.horizon_steps > max_horizon_steps {
            return Err(ForecastError::validation(format!(
                "horizon_steps {} exceeds the maximum of {}",
                self.horizon_steps, max_horizon_steps
            )));
        }
        SeriesKey::new(&self.provider, &self.service_type)
    }
}

/// Forecast response contract
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastResponse {
    pub provider: String,
    pub service_type: String,
    pub family_used: FamilyUsed,
    pub horizon_steps: usize,
    pub points: Vec<ForecastPoint>,
    pub confidence_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trained_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Training request contract
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainRequest {
    pub provider: String,
    pub service_type: String,
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
}

fn default_lookback_days() -> u32 {
    DEFAULT_LOOKBACK_DAYS
}

impl TrainRequest {
    pub fn new(
        provider: impl Into<String>,
        service_type: impl Into<String>,
        lookback_days: u32,
    ) -> Self {
        Self {
            provider: provider.into(),
            service_type: service_type.into(),
            lookback_days,
        }
    }

    pub fn validate(&self) -> Result<SeriesKey> {
        if self.lookback_days == 0 {
            return Err(ForecastError::validation("lookback_days must be greater than 0"));
        }
        SeriesKey::new(&self.provider, &self.service_type)
    }
}

/// Family reported back to a training caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrainedFamily {
    Seasonal,
    Sequence,
    Regression,
    #[serde(rename = "none")]
    Untrained,
}

impl From<ModelFamily> for TrainedFamily {
    fn from(family: ModelFamily) -> Self {
        match family {
            ModelFamily::Seasonal => TrainedFamily::Seasonal,
            ModelFamily::Sequence => TrainedFamily::Sequence,
            ModelFamily::Regression => TrainedFamily::Regression,
        }
    }
}

/// Training response contract: `{ family: "none" }` when nothing trained
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainResponse {
    pub family: TrainedFamily,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub training_sample_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_metrics: Option<ErrorMetrics>,
}

impl TrainResponse {
    pub fn untrained() -> Self {
        Self {
            family: TrainedFamily::Untrained,
            training_sample_count: None,
            error_metrics: None,
        }
    }

    pub fn from_record(record: &ModelRecord) -> Self {
        Self {
            family: record.family.into(),
            training_sample_count: Some(record.training_sample_count),
            error_metrics: Some(record.error_metrics),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_cost_rejected() {
        let obs = Observation::new(Utc::now(), "aws", "ec2", -1.0);
        let err = obs.validate().unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_non_finite_cost_rejected() {
        let obs = Observation::new(Utc::now(), "aws", "ec2", f64::NAN);
        assert!(obs.validate().is_err());
        let obs = Observation::new(Utc::now(), "aws", "ec2", 1.0).with_usage(-2.0);
        assert!(obs.validate().is_err());
    }

    #[test]
    fn test_key_normalization() {
        let obs = Observation::new(Utc::now(), " AWS ", "EC2", 1.0)
            .into_normalized()
            .unwrap();
        assert_eq!(obs.provider, "aws");
        assert_eq!(obs.service_type, "ec2");
        assert_eq!(obs.key().to_string(), "aws/ec2");
    }

    #[test]
    fn test_series_key_parse() {
        let key: SeriesKey = "gcp/compute".parse().unwrap();
        assert_eq!(key.provider, "gcp");
        assert_eq!(key.service_type, "compute");
        assert!("gcp".parse::<SeriesKey>().is_err());
        assert!("/compute".parse::<SeriesKey>().is_err());
    }

    #[test]
    fn test_partition_ids_do_not_collide() {
        let a = SeriesKey::new("a_b", "c").unwrap();
        let b = SeriesKey::new("a", "b_c").unwrap();
        assert_ne!(a.partition_id(), b.partition_id());
    }

    #[test]
    fn test_forecast_point_enforces_ordering() {
        let ts = Utc::now();
        let p = ForecastPoint::bounded(ts, -3.0, -5.0, -1.0).unwrap();
        assert_eq!(p.predicted_cost, 0.0);
        assert_eq!(p.confidence_lower, 0.0);
        assert_eq!(p.confidence_upper, 0.0);

        // Inverted bounds are repaired around the prediction
        let p = ForecastPoint::bounded(ts, 10.0, 12.0, 8.0).unwrap();
        assert!(p.confidence_lower <= p.predicted_cost);
        assert!(p.predicted_cost <= p.confidence_upper);

        assert!(ForecastPoint::bounded(ts, f64::NAN, 0.0, 1.0).is_err());
    }

    #[test]
    fn test_error_metrics() {
        let m = ErrorMetrics::compute(&[1.0, 2.0, 3.0], &[1.0, 2.0, 5.0], Evaluation::InSample)
            .unwrap();
        assert!((m.mean_absolute_error - 2.0 / 3.0).abs() < 1e-9);
        assert!((m.root_mean_squared_error - (4.0f64 / 3.0).sqrt()).abs() < 1e-9);
        assert!(ErrorMetrics::compute(&[], &[], Evaluation::InSample).is_err());
    }

    #[test]
    fn test_forecast_request_validation() {
        assert!(ForecastRequest::new("aws", "ec2", 0).validate(100).is_err());
        assert!(ForecastRequest::new("aws", "ec2", 101).validate(100).is_err());
        assert!(ForecastRequest::new("", "ec2", 5).validate(100).is_err());
        assert!(ForecastRequest::new("aws", "ec2", 5).validate(100).is_ok());
    }

    #[test]
    fn test_untrained_response_serializes_as_none() {
        let json = serde_json::to_value(TrainResponse::untrained()).unwrap();
        assert_eq!(json, serde_json::json!({ "family": "none" }));
    }
}
