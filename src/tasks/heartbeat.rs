use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::broadcast;

use crate::config::WebSocketConfig;
use crate::connection_manager::ConnectionManager;
use crate::metrics::HeartbeatMetrics;
use crate::relay::{self, CloseReason};
use crate::websocket::Outbound;

/// Maximum concurrent heartbeat sends to avoid overwhelming the system
const MAX_CONCURRENT_HEARTBEATS: usize = 1000;

/// Background task that pings connections and evicts idle ones
pub struct HeartbeatTask {
    config: WebSocketConfig,
    connection_manager: Arc<ConnectionManager>,
    shutdown: broadcast::Receiver<()>,
}

impl HeartbeatTask {
    pub fn new(
        config: WebSocketConfig,
        connection_manager: Arc<ConnectionManager>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            config,
            connection_manager,
            shutdown,
        }
    }

    /// Run the heartbeat and cleanup timers until shutdown
    pub async fn run(mut self) {
        let heartbeat_interval = Duration::from_secs(self.config.heartbeat_interval.max(1));
        let cleanup_interval = Duration::from_secs(self.config.cleanup_interval.max(1));
        let connection_timeout = self.config.connection_timeout;

        let mut heartbeat_timer = tokio::time::interval(heartbeat_interval);
        let mut cleanup_timer = tokio::time::interval(cleanup_interval);

        // Skip immediate first tick
        heartbeat_timer.tick().await;
        cleanup_timer.tick().await;

        tracing::info!(
            heartbeat_interval_secs = self.config.heartbeat_interval,
            cleanup_interval_secs = self.config.cleanup_interval,
            connection_timeout_secs = connection_timeout,
            "Heartbeat task started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Heartbeat task received shutdown signal");
                    break;
                }
                _ = heartbeat_timer.tick() => {
                    self.send_heartbeats().await;
                }
                _ = cleanup_timer.tick() => {
                    self.cleanup_stale_connections(connection_timeout);
                }
            }
        }

        tracing::info!("Heartbeat task stopped");
    }

    /// Ping every connection in parallel batches; connections that cannot take
    /// a ping are evicted like any other failed recipient
    async fn send_heartbeats(&self) {
        let connections = self.connection_manager.snapshot();
        let total_count = connections.len();

        if total_count == 0 {
            return;
        }

        let start = Instant::now();
        let send_timeout = self.config.send_timeout();
        let mut failed = 0usize;

        for batch in connections.chunks(MAX_CONCURRENT_HEARTBEATS) {
            let results = join_all(batch.iter().map(|handle| async move {
                (handle.id, handle.send(Outbound::Ping, send_timeout).await)
            }))
            .await;

            for (conn_id, outcome) in results {
                if let Err(failure) = outcome {
                    failed += 1;
                    tracing::debug!(
                        connection_id = %conn_id,
                        error = %failure,
                        "Failed to send heartbeat, connection may be dead"
                    );
                    relay::evict(&self.connection_manager, conn_id, CloseReason::SendFailed(failure));
                }
            }
        }

        let elapsed_ms = start.elapsed().as_millis() as u64;
        HeartbeatMetrics::record_duration_ms(elapsed_ms);
        if failed > 0 {
            HeartbeatMetrics::record_failures(failed as u64);
        }

        tracing::debug!(
            total = total_count,
            failed = failed,
            elapsed_ms = elapsed_ms,
            "Heartbeat round completed"
        );

        // Warn if heartbeat round is taking too long
        if elapsed_ms > (self.config.heartbeat_interval * 1000 / 2) {
            tracing::warn!(
                elapsed_ms = elapsed_ms,
                heartbeat_interval_ms = self.config.heartbeat_interval * 1000,
                connections = total_count,
                "Heartbeat round took more than 50% of interval"
            );
        }
    }

    /// Evict connections with no inbound activity within the timeout
    fn cleanup_stale_connections(&self, timeout_secs: u64) -> usize {
        let removed = self
            .connection_manager
            .find_stale_connections(timeout_secs)
            .into_iter()
            .filter(|conn_id| {
                relay::evict(&self.connection_manager, *conn_id, CloseReason::IdleTimeout)
            })
            .count();

        if removed > 0 {
            tracing::info!(
                removed = removed,
                timeout_secs = timeout_secs,
                "Cleaned up stale connections"
            );
        }

        removed
    }
}
