//! Cost Forecaster - cloud cost forecasting service
//!
//! Trains a model per provider/service pair from recorded cost observations
//! and serves hourly forecasts over HTTP.

use anyhow::Result;
use cost_forecaster::{api, config::ServiceConfig};
use forecaster_lib::{
    health::HealthRegistry,
    observability::EngineMetrics,
    trainer::TrainingScheduler,
    Engine,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const FORECASTER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// How often component health is refreshed from the engine between requests
const HEALTH_SYNC_INTERVAL: Duration = Duration::from_secs(15);

/// Keep `/healthz` current with failures seen by background training passes
async fn sync_health(
    engine: Arc<Engine>,
    health_registry: HealthRegistry,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(HEALTH_SYNC_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => health_registry.sync_engine(&engine).await,
            _ = shutdown.recv() => break,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting cost-forecaster");

    let config = ServiceConfig::load()?;
    info!(
        instance = %config.instance_name,
        data_dir = ?config.data_dir,
        sequence_enabled = config.sequence_enabled,
        "Forecaster configured"
    );

    let engine = Arc::new(Engine::open(config.engine_config()?)?);
    let logger = engine.logger().clone();

    let health_registry = HealthRegistry::with_engine_components().await;
    let metrics = EngineMetrics::new();

    let app_state = Arc::new(api::AppState::new(
        Arc::clone(&engine),
        health_registry.clone(),
        metrics,
    ));

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // Serve while the start-up pass runs; /readyz reports 503 until it finishes
    let mut api_shutdown = shutdown_tx.subscribe();
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state, async move {
        let _ = api_shutdown.recv().await;
    }));

    let scheduler = Arc::new(TrainingScheduler::new(
        Arc::clone(&engine),
        config.scheduler_config(),
    ));
    scheduler.run_pass().await;
    health_registry.sync_engine(&engine).await;
    logger.log_startup(
        FORECASTER_VERSION,
        engine.known_keys().len(),
        engine.registry().len(),
    );
    health_registry.set_ready(true).await;

    let scheduler_handle = tokio::spawn(Arc::clone(&scheduler).run(shutdown_tx.subscribe()));
    let health_handle = tokio::spawn(sync_health(
        Arc::clone(&engine),
        health_registry.clone(),
        shutdown_tx.subscribe(),
    ));

    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    health_registry.set_ready(false).await;
    let _ = shutdown_tx.send(());

    if let Err(e) = scheduler_handle.await {
        error!(error = %e, "Training scheduler task failed");
    }
    if let Err(e) = health_handle.await {
        error!(error = %e, "Health sync task failed");
    }
    match api_handle.await {
        Ok(Err(e)) => error!(error = %e, "API server failed"),
        Err(e) => error!(error = %e, "API server task failed"),
        Ok(Ok(())) => {}
    }
    info!("Shutting down");

    Ok(())
}
