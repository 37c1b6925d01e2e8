//! Health and readiness reporting for the forecasting service
//!
//! Component health is derived from the engine's own status snapshot: the
//! store and registry report their last write failure, the trainer reports
//! keys left without a model, and the forecaster turns degraded once the
//! fallback heuristic answers most recent requests. Readiness flips on when
//! the start-up training pass completes.

use crate::engine::{Engine, EngineStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Health status of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Still serving, with reduced quality or durability
    Degraded,
    /// Not serving correctly
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    fn with_status(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn healthy() -> Self {
        Self::with_status(ComponentStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::with_status(ComponentStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::with_status(ComponentStatus::Unhealthy, Some(message.into()))
    }
}

/// Overall health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// Worst status across components; empty means healthy
    pub fn compute_status(components: &HashMap<String, ComponentHealth>) -> ComponentStatus {
        components
            .values()
            .map(|health| health.status)
            .fold(ComponentStatus::Healthy, |worst, status| match (worst, status) {
                (ComponentStatus::Unhealthy, _) | (_, ComponentStatus::Unhealthy) => {
                    ComponentStatus::Unhealthy
                }
                (ComponentStatus::Degraded, _) | (_, ComponentStatus::Degraded) => {
                    ComponentStatus::Degraded
                }
                _ => ComponentStatus::Healthy,
            })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names reported under `/healthz`
pub mod components {
    pub const OBSERVATION_STORE: &str = "observation_store";
    pub const MODEL_REGISTRY: &str = "model_registry";
    pub const TRAINER: &str = "trainer";
    pub const FORECASTER: &str = "forecaster";

    pub const ALL: [&str; 4] = [OBSERVATION_STORE, MODEL_REGISTRY, TRAINER, FORECASTER];
}

/// Map an engine status snapshot onto per-component health.
///
/// A store failure loses observations, so it is unhealthy. A registry failure
/// only costs durability of new models and an untrained key still gets the
/// fallback, so both of those are degraded.
pub fn engine_component_health(status: &EngineStatus) -> [(&'static str, ComponentHealth); 4] {
    let store = match &status.store_error {
        Some(e) => ComponentHealth::unhealthy(format!("Observation write failed: {}", e)),
        None => ComponentHealth::healthy(),
    };
    let registry = match &status.registry_error {
        Some(e) => ComponentHealth::degraded(format!("Model record not persisted: {}", e)),
        None => ComponentHealth::healthy(),
    };
    let trainer = if status.untrained_keys.is_empty() {
        ComponentHealth::healthy()
    } else {
        let keys: Vec<String> = status.untrained_keys.iter().map(ToString::to_string).collect();
        ComponentHealth::degraded(format!("No model for {}", keys.join(", ")))
    };
    let forecaster = if status.fallback_dominates() {
        ComponentHealth::degraded(format!(
            "{} of the last {} forecasts used the fallback heuristic",
            status.recent_fallbacks, status.recent_forecasts
        ))
    } else {
        ComponentHealth::healthy()
    };

    [
        (components::OBSERVATION_STORE, store),
        (components::MODEL_REGISTRY, registry),
        (components::TRAINER, trainer),
        (components::FORECASTER, forecaster),
    ]
}

/// Shared health and readiness state behind `/healthz` and `/readyz`
#[derive(Debug, Clone)]
pub struct HealthRegistry {
    components: Arc<RwLock<HashMap<String, ComponentHealth>>>,
    ready: Arc<RwLock<bool>>,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self {
            components: Arc::new(RwLock::new(HashMap::new())),
            ready: Arc::new(RwLock::new(false)),
        }
    }

    /// Registry with every engine component registered as healthy
    pub async fn with_engine_components() -> Self {
        let registry = Self::new();
        {
            let mut components = registry.components.write().await;
            for name in components::ALL {
                components.insert(name.to_string(), ComponentHealth::healthy());
            }
        }
        registry
    }

    pub async fn update(&self, name: &str, health: ComponentHealth) {
        let mut components = self.components.write().await;
        components.insert(name.to_string(), health);
    }

    /// Refresh every engine component from the engine's current status
    pub async fn sync_engine(&self, engine: &Engine) {
        let status = engine.status();
        let mut components = self.components.write().await;
        for (name, health) in engine_component_health(&status) {
            components.insert(name.to_string(), health);
        }
    }

    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        let status = HealthResponse::compute_status(&components);
        HealthResponse { status, components }
    }

    /// Ready once the start-up pass is done and no component is unhealthy
    pub async fn readiness(&self) -> ReadinessResponse {
        let reason = if !*self.ready.read().await {
            Some("Start-up training pass not complete")
        } else if self.health().await.status == ComponentStatus::Unhealthy {
            Some("Critical component unhealthy")
        } else {
            None
        };
        ReadinessResponse {
            ready: reason.is_none(),
            reason: reason.map(str::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineConfig, FALLBACK_MIN_SAMPLES};
    use crate::models::{ForecastRequest, SeriesKey};
    use crate::store::{LocalObservationStore, ModelRegistry};

    fn status_of<'a>(
        health: &'a [(&'static str, ComponentHealth); 4],
        name: &str,
    ) -> &'a ComponentHealth {
        &health.iter().find(|(n, _)| *n == name).unwrap().1
    }

    #[test]
    fn test_clean_engine_status_is_healthy() {
        let health = engine_component_health(&EngineStatus::default());
        assert!(health
            .iter()
            .all(|(_, h)| h.status == ComponentStatus::Healthy && h.message.is_none()));
    }

    #[test]
    fn test_status_mapping() {
        let status = EngineStatus {
            store_error: Some("disk full".to_string()),
            registry_error: Some("read-only filesystem".to_string()),
            untrained_keys: vec![
                SeriesKey::new("aws", "ec2").unwrap(),
                SeriesKey::new("gcp", "compute").unwrap(),
            ],
            recent_forecasts: 12,
            recent_fallbacks: 7,
        };
        let health = engine_component_health(&status);

        let store = status_of(&health, components::OBSERVATION_STORE);
        assert_eq!(store.status, ComponentStatus::Unhealthy);
        assert!(store.message.as_deref().unwrap().contains("disk full"));
        assert_eq!(
            status_of(&health, components::MODEL_REGISTRY).status,
            ComponentStatus::Degraded
        );
        assert_eq!(
            status_of(&health, components::TRAINER).message.as_deref(),
            Some("No model for aws/ec2, gcp/compute")
        );
        assert_eq!(
            status_of(&health, components::FORECASTER).message.as_deref(),
            Some("7 of the last 12 forecasts used the fallback heuristic")
        );
    }

    #[test]
    fn test_few_fallbacks_do_not_degrade_forecaster() {
        let status = EngineStatus {
            recent_forecasts: 9,
            recent_fallbacks: 9,
            ..Default::default()
        };
        let health = engine_component_health(&status);
        assert_eq!(
            status_of(&health, components::FORECASTER).status,
            ComponentStatus::Healthy
        );
    }

    #[test]
    fn test_worst_component_wins() {
        let mut components = HashMap::new();
        assert_eq!(HealthResponse::compute_status(&components), ComponentStatus::Healthy);
        components.insert("a".to_string(), ComponentHealth::degraded("slow"));
        assert_eq!(HealthResponse::compute_status(&components), ComponentStatus::Degraded);
        components.insert("b".to_string(), ComponentHealth::unhealthy("down"));
        components.insert("c".to_string(), ComponentHealth::healthy());
        assert_eq!(HealthResponse::compute_status(&components), ComponentStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_sync_engine_reports_fallback_heavy_forecaster() {
        let engine = Engine::new(
            EngineConfig {
                seed_on_cold_start: false,
                ..Default::default()
            },
            Arc::new(LocalObservationStore::in_memory()),
            Arc::new(ModelRegistry::in_memory()),
        );
        let registry = HealthRegistry::with_engine_components().await;

        registry.sync_engine(&engine).await;
        assert_eq!(registry.health().await.status, ComponentStatus::Healthy);

        for _ in 0..FALLBACK_MIN_SAMPLES {
            engine.forecast(&ForecastRequest::new("aws", "ec2", 1)).unwrap();
        }
        registry.sync_engine(&engine).await;
        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Degraded);
        assert_eq!(
            health.components[components::FORECASTER].status,
            ComponentStatus::Degraded
        );
        assert_eq!(
            health.components[components::OBSERVATION_STORE].status,
            ComponentStatus::Healthy
        );
    }

    #[tokio::test]
    async fn test_readiness_waits_for_startup_pass() {
        let registry = HealthRegistry::with_engine_components().await;
        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(
            readiness.reason.as_deref(),
            Some("Start-up training pass not complete")
        );

        registry.set_ready(true).await;
        let readiness = registry.readiness().await;
        assert!(readiness.ready);
        assert!(readiness.reason.is_none());
    }

    #[tokio::test]
    async fn test_readiness_drops_when_unhealthy() {
        let registry = HealthRegistry::with_engine_components().await;
        registry.set_ready(true).await;
        registry
            .update(
                components::OBSERVATION_STORE,
                ComponentHealth::unhealthy("Observation write failed"),
            )
            .await;

        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(readiness.reason.as_deref(), Some("Critical component unhealthy"));
    }

    #[tokio::test]
    async fn test_degraded_component_keeps_service_ready() {
        let registry = HealthRegistry::with_engine_components().await;
        registry.set_ready(true).await;
        registry
            .update(components::TRAINER, ComponentHealth::degraded("No model for aws/ec2"))
            .await;
        assert!(registry.readiness().await.ready);
    }
}
