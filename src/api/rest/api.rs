use anyhow::Result;
use std::fs;
use std::process;
use std::sync::Arc;
use tracing::{info, warn};

use crate::api::rest::create_router;
use crate::api::rest::state::AppState;
use crate::shared::SpaceConfig;

pub async fn run_rest_server(config: SpaceConfig) -> Result<()> {
    // Write PID file for process management
    let pid = process::id();
    let pid_file = config.server.pid_file.clone();

    if let Err(e) = fs::write(&pid_file, pid.to_string()) {
        warn!("Could not write PID file: {}", e);
    }

    info!(pid, "Starting spaceapply REST API service...");

    let host = config.server.host.clone();
    let port = config.server.port;

    let app_state = Arc::new(AppState::from_config(config)?);
    let sandboxes = app_state.sandboxes.clone();

    info!("Building REST API routes...");
    let app = create_router(app_state);

    let bind_addr = format!("{host}:{port}");
    info!("Binding to: {}", bind_addr);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("REST API Endpoint: http://{}:{}/api", host, port);
    info!("Ready to accept requests...");

    let rest_server_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    info!("Shutting down spaceapply API...");
    sandboxes.terminate_all().await;
    let _ = fs::remove_file(&pid_file);

    rest_server_result?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
