//! Training scheduler
//!
//! Runs one `train_all` pass at start-up and, when configured, repeats it on
//! a fixed interval until shutdown.

use crate::engine::{Engine, TrainAllReport};
use crate::models::DEFAULT_LOOKBACK_DAYS;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, RwLock};
use tokio::time::interval;
use tracing::info;

/// Configuration for the training scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval between passes; a single start-up pass when `None`
    pub retrain_interval: Option<Duration>,
    pub lookback_days: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            retrain_interval: None,
            lookback_days: DEFAULT_LOOKBACK_DAYS,
        }
    }
}

/// Statistics about completed passes
#[derive(Debug, Clone, Default)]
pub struct SchedulerStats {
    pub passes: u64,
    pub keys_trained: usize,
    pub keys_untrained: usize,
    pub last_pass_ms: u64,
}

pub struct TrainingScheduler {
    engine: Arc<Engine>,
    config: SchedulerConfig,
    stats: RwLock<SchedulerStats>,
}

impl TrainingScheduler {
    pub fn new(engine: Arc<Engine>, config: SchedulerConfig) -> Self {
        Self {
            engine,
            config,
            stats: RwLock::new(SchedulerStats::default()),
        }
    }

    /// Run one pass over every known key
    pub async fn run_pass(&self) -> TrainAllReport {
        let start = Instant::now();
        let report = self.engine.train_all(self.config.lookback_days).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        let mut stats = self.stats.write().await;
        stats.passes += 1;
        stats.keys_trained = report.trained.len();
        stats.keys_untrained = report.untrained.len();
        stats.last_pass_ms = elapsed_ms;

        info!(
            trained = report.trained.len(),
            untrained = report.untrained.len(),
            duration_ms = elapsed_ms,
            "Training pass finished"
        );
        report
    }

    /// Retrain on the configured interval until shutdown. The start-up pass
    /// is left to the caller (`run_pass`).
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let Some(period) = self.config.retrain_interval else {
            return;
        };
        info!(interval_secs = period.as_secs(), "Starting training scheduler");

        let mut ticker = interval(period);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_pass().await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down training scheduler");
                    break;
                }
            }
        }
    }

    pub async fn stats(&self) -> SchedulerStats {
        self.stats.read().await.clone()
    }
}
