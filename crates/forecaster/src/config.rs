//! Service configuration

use anyhow::{Context, Result};
use forecaster_lib::models::SeriesKey;
use forecaster_lib::trainer::SchedulerConfig;
use forecaster_lib::EngineConfig;
use serde::Deserialize;
use std::time::Duration;

/// Service configuration, read from `FORECASTER_*` environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Name attached to structured log events
    #[serde(default = "default_instance_name")]
    pub instance_name: String,

    /// API server port for forecasts, health and metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Directory for observation logs and model records; in-memory when unset
    #[serde(default)]
    pub data_dir: Option<String>,

    #[serde(default = "default_sequence_enabled")]
    pub sequence_enabled: bool,

    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,

    /// Comma-separated `provider/service_type` pairs, e.g. `aws/ec2,gcp/compute`
    #[serde(default)]
    pub bootstrap_keys: String,

    /// Seconds between retraining passes; 0 disables periodic retraining
    #[serde(default)]
    pub retrain_interval_secs: u64,

    #[serde(default = "default_max_horizon_steps")]
    pub max_horizon_steps: usize,

    #[serde(default = "default_seed_on_cold_start")]
    pub seed_on_cold_start: bool,
}

fn default_instance_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "cost-forecaster".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_sequence_enabled() -> bool {
    true
}

fn default_lookback_days() -> u32 {
    forecaster_lib::models::DEFAULT_LOOKBACK_DAYS
}

fn default_max_horizon_steps() -> usize {
    forecaster_lib::DEFAULT_MAX_HORIZON_STEPS
}

fn default_seed_on_cold_start() -> bool {
    true
}

impl ServiceConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        Self::from_environment(config::Environment::with_prefix("FORECASTER"))
    }

    fn from_environment(environment: config::Environment) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(environment.try_parsing(true))
            .build()?;

        config
            .try_deserialize()
            .context("invalid FORECASTER_* configuration")
    }

    pub fn bootstrap_keys(&self) -> Result<Vec<SeriesKey>> {
        parse_keys(&self.bootstrap_keys)
    }

    pub fn engine_config(&self) -> Result<EngineConfig> {
        let mut engine = EngineConfig {
            default_lookback_days: self.lookback_days,
            max_horizon_steps: self.max_horizon_steps,
            bootstrap_keys: self.bootstrap_keys()?,
            seed_on_cold_start: self.seed_on_cold_start,
            instance_name: self.instance_name.clone(),
            ..Default::default()
        };
        engine.cascade.sequence_enabled = self.sequence_enabled;
        if let Some(dir) = &self.data_dir {
            engine = engine.with_data_dir(dir);
        }
        Ok(engine)
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            retrain_interval: (self.retrain_interval_secs > 0)
                .then(|| Duration::from_secs(self.retrain_interval_secs)),
            lookback_days: self.lookback_days,
        }
    }
}

fn parse_keys(raw: &str) -> Result<Vec<SeriesKey>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            entry
                .parse::<SeriesKey>()
                .with_context(|| format!("invalid bootstrap key {:?}", entry))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<ServiceConfig> {
        let source: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServiceConfig::from_environment(
            config::Environment::with_prefix("FORECASTER").source(Some(source)),
        )
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.api_port, 8080);
        assert_eq!(config.lookback_days, 90);
        assert!(config.sequence_enabled);
        assert!(config.data_dir.is_none());
        assert!(config.bootstrap_keys().unwrap().is_empty());
        assert!(config.scheduler_config().retrain_interval.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("FORECASTER_API_PORT", "9090"),
            ("FORECASTER_SEQUENCE_ENABLED", "false"),
            ("FORECASTER_LOOKBACK_DAYS", "30"),
            ("FORECASTER_RETRAIN_INTERVAL_SECS", "3600"),
            ("FORECASTER_BOOTSTRAP_KEYS", "aws/ec2, GCP/Compute"),
        ])
        .unwrap();
        assert_eq!(config.api_port, 9090);
        assert_eq!(
            config.scheduler_config().retrain_interval,
            Some(Duration::from_secs(3600))
        );

        let engine = config.engine_config().unwrap();
        assert!(!engine.cascade.sequence_enabled);
        assert_eq!(engine.default_lookback_days, 30);
        assert_eq!(
            engine.bootstrap_keys,
            vec![
                SeriesKey::new("aws", "ec2").unwrap(),
                SeriesKey::new("gcp", "compute").unwrap()
            ]
        );
    }

    #[test]
    fn test_malformed_bootstrap_key() {
        assert!(parse_keys("aws-ec2").is_err());
        assert!(parse_keys("aws/").is_err());
        assert!(parse_keys(" , ").unwrap().is_empty());
    }

    #[test]
    fn test_data_dir_splits_store_and_registry() {
        let config = load(&[("FORECASTER_DATA_DIR", "/var/lib/forecaster")]).unwrap();
        let engine = config.engine_config().unwrap();
        assert_eq!(
            engine.store.data_dir.unwrap(),
            std::path::PathBuf::from("/var/lib/forecaster/observations")
        );
        assert_eq!(
            engine.registry.model_dir.unwrap(),
            std::path::PathBuf::from("/var/lib/forecaster/models")
        );
    }
}
