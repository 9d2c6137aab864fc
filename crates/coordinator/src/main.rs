//! HydraAI Coordinator - Main Entry Point
//!
//! Serves the worker API, seeds the task pool and runs the periodic
//! maintenance loop until Ctrl-C.

use hydra_common::{HydraConfig, HydraError, Result};
use hydra_coordinator::{api, Coordinator};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hydra_coordinator=info,tower_http=info,axum=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting HydraAI Coordinator");

    // Load configuration
    let config_path = std::env::var("HYDRA_CONFIG")
        .unwrap_or_else(|_| "configs/coordinator-config.yaml".to_string());

    let config = HydraConfig::load(&PathBuf::from(&config_path), HydraConfig::coordinator_default())?;
    if config.mode != "coordinator" {
        return Err(HydraError::config(format!(
            "{} is a {} config",
            config_path, config.mode
        )));
    }

    info!(
        "Coordinator configuration loaded: bind={}:{}",
        config.bind_address, config.port
    );

    let coordinator = tokio::task::spawn_blocking({
        let config = config.clone();
        move || -> Result<Arc<Coordinator>> {
            let coordinator = Coordinator::from_config(&config)?;
            let seeded = coordinator.bootstrap()?;
            info!("Seeded {} initial tasks", seeded);
            Ok(Arc::new(coordinator))
        }
    })
    .await
    .map_err(|e| HydraError::internal(format!("Startup task failed: {}", e)))??;

    let maintenance = Arc::clone(&coordinator).start_background();

    let addr: SocketAddr = format!("{}:{}", config.bind_address, config.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    let app = api::router(Arc::clone(&coordinator), config.observability.enable_metrics);

    info!("HydraAI Coordinator running");

    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal");
    };
    api::serve(listener, app, shutdown).await?;

    maintenance.abort();

    let checkpoint = Arc::clone(&coordinator);
    match tokio::task::spawn_blocking(move || checkpoint.save_checkpoint()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Failed to save checkpoint: {}", e),
        Err(e) => error!("Checkpoint task failed: {}", e),
    }

    info!("HydraAI Coordinator shutdown complete");
    Ok(())
}
