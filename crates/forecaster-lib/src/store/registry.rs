//! Model registry
//!
//! Holds the latest trained record per key. Records are written atomically
//! (temp file, fsync, rename) with a SHA256 checksum on the first line and
//! are verified when the registry is reopened.

use crate::error::{ForecastError, Result};
use crate::models::{ModelRecord, SeriesKey};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

const RECORD_EXTENSION: &str = "model";

#[derive(Debug, Clone, Default)]
pub struct RegistryConfig {
    /// Directory for persisted records; in-memory only when `None`
    pub model_dir: Option<PathBuf>,
}

impl RegistryConfig {
    pub fn with_model_dir(model_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: Some(model_dir.into()),
        }
    }
}

/// Latest model record per key
pub struct ModelRegistry {
    config: RegistryConfig,
    records: DashMap<SeriesKey, Arc<ModelRecord>>,
}

impl ModelRegistry {
    /// Open the registry, loading every record whose checksum verifies
    pub fn open(config: RegistryConfig) -> Result<Self> {
        let records = DashMap::new();
        if let Some(dir) = &config.model_dir {
            fs::create_dir_all(dir)?;
            for entry in fs::read_dir(dir)? {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                    continue;
                }
                match load_record(&path) {
                    Ok(record) => {
                        records.insert(record.key.clone(), Arc::new(record));
                    }
                    Err(e) => {
                        warn!(
                            path = %path.display(),
                            error = %e,
                            "Skipping unreadable model record"
                        );
                    }
                }
            }
            info!(path = %dir.display(), records = records.len(), "Loaded model registry");
        }
        Ok(Self { config, records })
    }

    pub fn in_memory() -> Self {
        Self {
            config: RegistryConfig::default(),
            records: DashMap::new(),
        }
    }

    pub fn get(&self, key: &SeriesKey) -> Option<Arc<ModelRecord>> {
        self.records.get(key).map(|r| Arc::clone(r.value()))
    }

    /// Persist then publish a record, replacing any previous one for its key.
    /// On a write failure the previous record stays in place.
    pub fn put(&self, record: ModelRecord) -> Result<()> {
        if let Some(dir) = &self.config.model_dir {
            save_record(&record_path(dir, &record.key), &record)?;
        }
        self.records.insert(record.key.clone(), Arc::new(record));
        Ok(())
    }

    pub fn keys(&self) -> Vec<SeriesKey> {
        let mut keys: Vec<SeriesKey> = self.records.iter().map(|r| r.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn record_path(dir: &Path, key: &SeriesKey) -> PathBuf {
    dir.join(format!("{}.{}", key.partition_id(), RECORD_EXTENSION))
}

fn save_record(path: &Path, record: &ModelRecord) -> Result<()> {
    let body = serde_json::to_vec(record)?;
    let checksum = compute_checksum(&body);

    let temp_path = path.with_extension("tmp");
    let mut file = File::create(&temp_path)?;
    file.write_all(checksum.as_bytes())?;
    file.write_all(b"\n")?;
    file.write_all(&body)?;
    file.sync_all()?;

    fs::rename(&temp_path, path)?;
    Ok(())
}

fn load_record(path: &Path) -> Result<ModelRecord> {
    let data = fs::read(path)?;
    let split = data.iter().position(|b| *b == b'\n').ok_or_else(|| ForecastError::Checksum {
        path: path.display().to_string(),
        expected: String::new(),
        actual: compute_checksum(&data),
    })?;
    let (expected, body) = (&data[..split], &data[split + 1..]);
    let expected = String::from_utf8_lossy(expected).trim().to_string();
    let actual = compute_checksum(body);
    if actual != expected {
        return Err(ForecastError::Checksum {
            path: path.display().to_string(),
            expected,
            actual,
        });
    }
    Ok(serde_json::from_slice(body)?)
}

/// Compute SHA256 checksum of data
pub fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ModelParameters, SeasonalModel};
    use crate::models::{to_series, ErrorMetrics, Evaluation, ModelFamily, Observation};
    use chrono::{Duration, TimeZone, Utc};
    use tempfile::TempDir;

    fn record(provider: &str) -> ModelRecord {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let observations: Vec<Observation> = (0..25)
            .map(|i| Observation::new(start + Duration::days(i), provider, "ec2", 10.0))
            .collect();
        let fit = SeasonalModel::fit(&to_series(&observations)).unwrap();
        ModelRecord {
            key: SeriesKey::new(provider, "ec2").unwrap(),
            family: ModelFamily::Seasonal,
            trained_at: Utc::now(),
            training_sample_count: 25,
            error_metrics: ErrorMetrics {
                mean_absolute_error: 0.0,
                root_mean_squared_error: 0.0,
                evaluation: Evaluation::InSample,
            },
            parameters: ModelParameters::Seasonal(fit.model),
            feature_schema: None,
        }
    }

    #[test]
    fn test_compute_checksum() {
        let checksum = compute_checksum(b"hello world");
        assert_eq!(
            checksum,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_put_replaces_previous() {
        let registry = ModelRegistry::in_memory();
        let key = SeriesKey::new("aws", "ec2").unwrap();
        assert!(registry.get(&key).is_none());

        registry.put(record("aws")).unwrap();
        let first = registry.get(&key).unwrap().trained_at;
        let mut second = record("aws");
        second.training_sample_count = 99;
        registry.put(second).unwrap();

        let current = registry.get(&key).unwrap();
        assert_eq!(current.training_sample_count, 99);
        assert!(current.trained_at >= first);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_records_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let registry = ModelRegistry::open(RegistryConfig::with_model_dir(dir.path())).unwrap();
            registry.put(record("aws")).unwrap();
            registry.put(record("gcp")).unwrap();
        }
        let registry = ModelRegistry::open(RegistryConfig::with_model_dir(dir.path())).unwrap();
        assert_eq!(registry.len(), 2);
        let loaded = registry.get(&SeriesKey::new("gcp", "ec2").unwrap()).unwrap();
        assert_eq!(loaded.family, ModelFamily::Seasonal);
    }

    #[test]
    fn test_tampered_record_is_skipped() {
        let dir = TempDir::new().unwrap();
        let key = SeriesKey::new("aws", "ec2").unwrap();
        {
            let registry = ModelRegistry::open(RegistryConfig::with_model_dir(dir.path())).unwrap();
            registry.put(record("aws")).unwrap();
        }
        let path = record_path(dir.path(), &key);
        let mut data = fs::read(&path).unwrap();
        let last = data.len() - 2;
        data[last] = b' ';
        fs::write(&path, data).unwrap();

        assert!(matches!(load_record(&path), Err(ForecastError::Checksum { .. })));
        let registry = ModelRegistry::open(RegistryConfig::with_model_dir(dir.path())).unwrap();
        assert!(registry.get(&key).is_none());
    }
}
