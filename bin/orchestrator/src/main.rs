use adpulse_orchestrator::{Orchestrator, OrchestratorConfig, OrchestratorError};
use rootcause::prelude::Report;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Report<OrchestratorError>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = OrchestratorConfig::from_env()?;
    tracing::info!(
        pool_size = config.scheduler.pool_size,
        tick_interval_ms = config.scheduler.tick_interval_ms,
        error_rate_window_hours = config.health.error_rate_window_hours,
        "Loaded configuration"
    );

    let orchestrator = Arc::new(Orchestrator::new(&config));
    if config.health.heartbeat_interval_secs > 0 {
        orchestrator
            .install_heartbeat(Duration::from_secs(config.health.heartbeat_interval_secs))
            .map_err(|e| OrchestratorError::Config {
                details: e.to_string(),
            })?;
    }
    orchestrator.start();

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| OrchestratorError::Signal {
            details: e.to_string(),
        })?;

    tracing::info!("Shutdown requested, waiting for in-flight jobs");
    orchestrator.shutdown(true).await;
    Ok(())
}
