//! Error taxonomy for the forecasting engine
//!
//! Only `Validation` (and storage failures while appending) ever reach a
//! caller. `InsufficientData`, `Capability` and `Training` are absorbed by the
//! training cascade; `Inference` is absorbed by the forecast server, which
//! substitutes the fallback heuristic.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ForecastError {
    /// Malformed input rejected at the boundary; nothing was stored
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("insufficient data: need {required}, have {actual}")]
    InsufficientData { required: usize, actual: usize },

    /// Model family cannot run in this deployment
    #[error("model family unavailable: {0}")]
    Capability(String),

    /// Numerical failure while fitting a model
    #[error("training failed: {0}")]
    Training(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    Checksum {
        path: String,
        expected: String,
        actual: String,
    },
}

impl ForecastError {
    pub fn validation(message: impl Into<String>) -> Self {
        ForecastError::Validation(message.into())
    }

    pub fn inference(message: impl Into<String>) -> Self {
        ForecastError::Inference(message.into())
    }

    pub fn training(message: impl Into<String>) -> Self {
        ForecastError::Training(message.into())
    }

    /// True for errors that are the caller's fault
    pub fn is_validation(&self) -> bool {
        matches!(self, ForecastError::Validation(_))
    }
}

pub type Result<T> = std::result::Result<T, ForecastError>;
