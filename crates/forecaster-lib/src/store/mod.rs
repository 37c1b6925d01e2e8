//! Persistence for observations and trained models

mod observations;
mod registry;
mod seed;

pub use observations::{LocalObservationStore, StoreConfig};
pub use registry::{compute_checksum, ModelRegistry, RegistryConfig};
pub use seed::{synthesize_history, SEED_NOISE_STD, SEED_REGION, SEED_VARIANT};

use crate::error::Result;
use crate::models::{Observation, SeriesKey};
use chrono::{DateTime, Utc};

/// Append-only store of cost observations, partitioned by series key
pub trait ObservationStore: Send + Sync {
    /// Validate and durably append one observation
    fn append(&self, observation: Observation) -> Result<()>;

    /// Validate every observation, then append them all; nothing is stored
    /// if any one is invalid. Writes are atomic per series key: when storage
    /// fails part-way, keys written before the failure stay appended and the
    /// rest are not, on disk and in memory alike.
    fn append_batch(&self, observations: Vec<Observation>) -> Result<usize>;

    /// Observations at or after `since`, oldest first. `None` filters match
    /// every provider or service.
    fn query(
        &self,
        provider: Option<&str>,
        service_type: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<Vec<Observation>>;

    /// Keys holding at least one observation
    fn keys(&self) -> Vec<SeriesKey>;

    /// Total observations held
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write synthetic history for a key that has no observations at all.
    /// Returns the number of rows written.
    fn seed_if_empty(&self, key: &SeriesKey) -> Result<usize>;
}
