use std::time::Duration;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;

use sync_relay::config::Settings;
use sync_relay::error::AppError;
use sync_relay::server::{create_app, AppState};
use sync_relay::shutdown::{GracefulShutdown, ShutdownConfig};
use sync_relay::tasks::HeartbeatTask;
use sync_relay::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::new().map_err(AppError::from)?;

    // Initialize tracing
    let _telemetry_guard = init_telemetry(&settings.otel).map_err(AppError::from)?;
    tracing::info!("Configuration loaded");

    // Create application state (owns the connection registry)
    let state = AppState::new(settings.clone());
    tracing::info!("Application state initialized");

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // Start heartbeat task in background
    let heartbeat_handle = if settings.websocket.heartbeat_enabled {
        let heartbeat_task = HeartbeatTask::new(
            settings.websocket.clone(),
            state.connection_manager.clone(),
            shutdown_tx.subscribe(),
        );
        Some(tokio::spawn(heartbeat_task.run()))
    } else {
        None
    };

    let graceful = GracefulShutdown::with_config(
        state.connection_manager.clone(),
        shutdown_tx,
        ShutdownConfig {
            drain_timeout: Duration::from_secs(settings.shutdown.drain_timeout_secs),
            ..Default::default()
        },
    );

    // Create Axum app
    let app = create_app(state);

    // Start server; failing to bind is fatal
    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| AppError::listen(addr.clone(), e))?;
    tracing::info!("Relay listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_handler(graceful))
        .await
        .map_err(AppError::Serve)?;

    if let Some(handle) = heartbeat_handle {
        tracing::info!("Waiting for background tasks to finish...");
        let _ = handle.await;
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal_handler(graceful: GracefulShutdown) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let reason = tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
            "interrupt"
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
            "terminate"
        }
    };

    // Close relay connections before the HTTP server stops
    graceful.execute(reason).await;
}
