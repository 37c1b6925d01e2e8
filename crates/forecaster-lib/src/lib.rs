//! Cost forecasting engine
//!
//! This crate provides the core functionality for:
//! - Storing hourly cloud cost observations per provider/service
//! - Training a cascade of forecasting models (seasonal, sequence, regression)
//! - Serving bounded forecasts, with a heuristic fallback that never fails
//! - Health checks and observability

pub mod calendar;
pub mod engine;
pub mod error;
pub mod health;
pub mod model;
pub mod models;
pub mod observability;
pub mod predictor;
pub mod store;
pub mod trainer;

pub use engine::{
    Engine, EngineConfig, EngineStatus, TrainAllReport, DEFAULT_MAX_HORIZON_STEPS,
};
pub use error::{ForecastError, Result};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{EngineMetrics, StructuredLogger};
