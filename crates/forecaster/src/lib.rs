//! Cost forecaster service: HTTP surface and configuration around the engine

pub mod api;
pub mod config;
