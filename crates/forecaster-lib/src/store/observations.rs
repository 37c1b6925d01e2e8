//! Local observation store
//!
//! Observations live in memory, indexed by series key and kept in timestamp
//! order. With a data directory configured, every partition is also an
//! append-only JSON Lines file that is replayed on open.

use super::seed::synthesize_history;
use super::ObservationStore;
use crate::calendar::current_hour;
use crate::error::Result;
use crate::models::{Observation, SeriesKey, DEFAULT_LOOKBACK_DAYS};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use tracing::{debug, info, warn};

const PARTITION_EXTENSION: &str = "jsonl";

/// Configuration for the observation store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory for partition files; in-memory only when `None`
    pub data_dir: Option<PathBuf>,
    /// Days of synthetic history written for a cold-start key
    pub seed_days: u32,
    /// Fixed RNG seed for synthetic history
    pub seed_rng: Option<u64>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            seed_days: DEFAULT_LOOKBACK_DAYS,
            seed_rng: None,
        }
    }
}

impl StoreConfig {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: Some(data_dir.into()),
            ..Default::default()
        }
    }
}

/// Observation store backed by memory and optional JSON Lines partitions
pub struct LocalObservationStore {
    config: StoreConfig,
    partitions: RwLock<BTreeMap<SeriesKey, Vec<Observation>>>,
}

impl LocalObservationStore {
    /// Open the store, replaying any existing partitions
    pub fn open(config: StoreConfig) -> Result<Self> {
        let mut partitions = BTreeMap::new();
        if let Some(dir) = &config.data_dir {
            fs::create_dir_all(dir)?;
            let replayed = replay(dir, &mut partitions)?;
            info!(
                path = %dir.display(),
                partitions = partitions.len(),
                observations = replayed,
                "Loaded observation store"
            );
        }
        Ok(Self {
            config,
            partitions: RwLock::new(partitions),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            config: StoreConfig::in_memory(),
            partitions: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn partition_path(&self, key: &SeriesKey) -> Option<PathBuf> {
        self.config
            .data_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.{}", key.partition_id(), PARTITION_EXTENSION)))
    }

    /// Append lines to a partition file and flush them to disk
    fn persist(&self, key: &SeriesKey, observations: &[Observation]) -> Result<()> {
        let Some(path) = self.partition_path(key) else {
            return Ok(());
        };
        let mut buf = Vec::new();
        for observation in observations {
            serde_json::to_writer(&mut buf, observation)?;
            buf.push(b'\n');
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(&buf)?;
        file.sync_data()?;
        Ok(())
    }

    fn insert_all(
        partitions: &mut BTreeMap<SeriesKey, Vec<Observation>>,
        key: SeriesKey,
        observations: Vec<Observation>,
    ) {
        let partition = partitions.entry(key).or_default();
        for observation in observations {
            insert_sorted(partition, observation);
        }
    }
}

/// Insert after every sample with the same or an earlier timestamp
fn insert_sorted(partition: &mut Vec<Observation>, observation: Observation) {
    let at = partition.partition_point(|o| o.timestamp <= observation.timestamp);
    partition.insert(at, observation);
}

fn replay(dir: &Path, partitions: &mut BTreeMap<SeriesKey, Vec<Observation>>) -> Result<usize> {
    let mut count = 0;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(PARTITION_EXTENSION) {
            continue;
        }
        let reader = BufReader::new(File::open(&path)?);
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let parsed = serde_json::from_str::<Observation>(&line)
                .map_err(|e| e.to_string())
                .and_then(|o| o.into_normalized().map_err(|e| e.to_string()));
            match parsed {
                Ok(observation) => {
                    insert_sorted(partitions.entry(observation.key()).or_default(), observation);
                    count += 1;
                }
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        line = line_no + 1,
                        error = %e,
                        "Skipping corrupt observation line"
                    );
                }
            }
        }
    }
    Ok(count)
}

impl ObservationStore for LocalObservationStore {
    fn append(&self, observation: Observation) -> Result<()> {
        self.append_batch(vec![observation]).map(|_| ())
    }

    fn append_batch(&self, observations: Vec<Observation>) -> Result<usize> {
        let normalized = observations
            .into_iter()
            .map(Observation::into_normalized)
            .collect::<Result<Vec<_>>>()?;
        let count = normalized.len();

        let mut grouped: BTreeMap<SeriesKey, Vec<Observation>> = BTreeMap::new();
        for observation in normalized {
            grouped.entry(observation.key()).or_default().push(observation);
        }

        // Each key's slice is persisted before it becomes visible, so a failure
        // on a later key leaves earlier keys stored on disk and in memory alike
        let mut partitions = self.partitions.write().unwrap_or_else(PoisonError::into_inner);
        for (key, batch) in grouped {
            self.persist(&key, &batch)?;
            debug!(key = %key, count = batch.len(), "Appended observations");
            Self::insert_all(&mut partitions, key, batch);
        }
        Ok(count)
    }

    fn query(
        &self,
        provider: Option<&str>,
        service_type: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<Vec<Observation>> {
        let provider = provider.map(|p| p.trim().to_lowercase());
        let service_type = service_type.map(|s| s.trim().to_lowercase());
        let partitions = self.partitions.read().unwrap_or_else(PoisonError::into_inner);

        let mut out: Vec<Observation> = partitions
            .iter()
            .filter(|(key, _)| provider.as_deref().map_or(true, |p| key.provider == p))
            .filter(|(key, _)| service_type.as_deref().map_or(true, |s| key.service_type == s))
            .flat_map(|(_, partition)| {
                let start = partition.partition_point(|o| o.timestamp < since);
                partition[start..].iter().cloned()
            })
            .collect();
        // Partitions are already ordered; this only interleaves across keys
        out.sort_by_key(|o| o.timestamp);
        Ok(out)
    }

    fn keys(&self) -> Vec<SeriesKey> {
        let partitions = self.partitions.read().unwrap_or_else(PoisonError::into_inner);
        partitions
            .iter()
            .filter(|(_, p)| !p.is_empty())
            .map(|(k, _)| k.clone())
            .collect()
    }

    fn len(&self) -> usize {
        let partitions = self.partitions.read().unwrap_or_else(PoisonError::into_inner);
        partitions.values().map(Vec::len).sum()
    }

    fn seed_if_empty(&self, key: &SeriesKey) -> Result<usize> {
        let mut partitions = self.partitions.write().unwrap_or_else(PoisonError::into_inner);
        if partitions.get(key).map_or(false, |p| !p.is_empty()) {
            return Ok(0);
        }

        let mut rng = match self.config.seed_rng {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let end = current_hour(Utc::now());
        let rows = synthesize_history(key, end, self.config.seed_days, &mut rng)?;
        let count = rows.len();
        self.persist(key, &rows)?;
        Self::insert_all(&mut partitions, key.clone(), rows);
        Ok(count)
    }
}
