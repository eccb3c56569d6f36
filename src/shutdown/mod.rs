//! Graceful shutdown of the relay.
//!
//! 1. Signal background tasks to stop
//! 2. Ask every open connection to close (close code 1001)
//! 3. Wait for connections to unregister themselves
//! 4. Tear down whatever is left in the registry

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::timeout;

use crate::connection_manager::ConnectionManager;
use crate::relay::{self, CloseReason};

/// Configuration for graceful shutdown behavior
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Time to wait for connections to close (default: 10 seconds)
    pub drain_timeout: Duration,
    /// How often the registry is polled while draining
    pub poll_interval: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// Handles graceful shutdown of the relay
pub struct GracefulShutdown {
    connection_manager: Arc<ConnectionManager>,
    shutdown_tx: broadcast::Sender<()>,
    config: ShutdownConfig,
}

impl GracefulShutdown {
    pub fn new(connection_manager: Arc<ConnectionManager>, shutdown_tx: broadcast::Sender<()>) -> Self {
        Self::with_config(connection_manager, shutdown_tx, ShutdownConfig::default())
    }

    pub fn with_config(
        connection_manager: Arc<ConnectionManager>,
        shutdown_tx: broadcast::Sender<()>,
        config: ShutdownConfig,
    ) -> Self {
        Self {
            connection_manager,
            shutdown_tx,
            config,
        }
    }

    /// Execute graceful shutdown sequence
    #[tracing::instrument(
        name = "graceful_shutdown",
        skip(self),
        fields(total_connections = self.connection_manager.len())
    )]
    pub async fn execute(&self, reason: &str) -> ShutdownResult {
        let start = std::time::Instant::now();
        let mut result = ShutdownResult::default();

        tracing::info!(reason = %reason, "Starting graceful shutdown - Phase 1: Stopping background tasks");
        let _ = self.shutdown_tx.send(());

        tracing::info!("Phase 2: Closing client connections");
        result.close_requested = self.connection_manager.close_all();

        tracing::info!("Phase 3: Waiting for connections to close");
        result.connections_closed = self.wait_for_connections_to_close().await;

        tracing::info!("Phase 4: Tearing down registry");
        result.connections_dropped = self.teardown();

        result.duration = start.elapsed();
        result.success = self.connection_manager.is_empty();

        tracing::info!(
            close_requested = result.close_requested,
            connections_closed = result.connections_closed,
            connections_dropped = result.connections_dropped,
            duration_ms = result.duration.as_millis(),
            "Graceful shutdown completed"
        );

        result
    }

    /// Wait for connections to close gracefully
    async fn wait_for_connections_to_close(&self) -> usize {
        let initial = self.connection_manager.len();
        if initial == 0 {
            return 0;
        }

        let wait_future = async {
            while !self.connection_manager.is_empty() {
                tokio::time::sleep(self.config.poll_interval).await;
            }
        };

        let _ = timeout(self.config.drain_timeout, wait_future).await;

        let remaining = self.connection_manager.len();
        if remaining > 0 {
            tracing::warn!(
                remaining_connections = remaining,
                "Some connections did not close gracefully"
            );
        }

        initial.saturating_sub(remaining)
    }

    /// Remove every entry still registered
    fn teardown(&self) -> usize {
        self.connection_manager
            .connection_ids()
            .into_iter()
            .filter(|id| relay::evict(&self.connection_manager, *id, CloseReason::Shutdown))
            .count()
    }
}

/// Result of a graceful shutdown operation
#[derive(Debug, Default)]
pub struct ShutdownResult {
    /// Whether the registry ended up empty
    pub success: bool,
    /// Connections asked to close
    pub close_requested: usize,
    /// Connections that closed on their own within the drain timeout
    pub connections_closed: usize,
    /// Connections removed forcibly at teardown
    pub connections_dropped: usize,
    /// Total time taken for shutdown
    pub duration: Duration,
}
