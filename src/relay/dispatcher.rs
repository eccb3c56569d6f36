use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::connection_manager::{ConnectionHandle, ConnectionId, ConnectionManager, SendFailure};
use crate::metrics::RelayMetrics;
use crate::websocket::RelayFrame;

use super::lifecycle::{self, CloseReason};

/// Outcome of relaying one frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryResult {
    /// Connections the frame was addressed to
    pub recipients: usize,
    /// Connections that accepted the frame
    pub delivered: usize,
    /// Connections whose send failed
    pub failed: usize,
    /// Failed connections removed by this dispatch
    pub evicted: usize,
}

/// Statistics for the relay dispatcher
#[derive(Debug, Default)]
pub struct DispatcherStats {
    /// Frames dispatched
    pub total_dispatched: AtomicU64,
    /// Frame copies accepted by recipients
    pub total_delivered: AtomicU64,
    /// Failed sends
    pub total_failed: AtomicU64,
    /// Connections evicted after a failed send
    pub total_evicted: AtomicU64,
}

impl DispatcherStats {
    pub fn snapshot(&self) -> DispatcherStatsSnapshot {
        DispatcherStatsSnapshot {
            total_dispatched: self.total_dispatched.load(Ordering::Relaxed),
            total_delivered: self.total_delivered.load(Ordering::Relaxed),
            total_failed: self.total_failed.load(Ordering::Relaxed),
            total_evicted: self.total_evicted.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of dispatcher statistics
#[derive(Debug, Clone, Serialize)]
pub struct DispatcherStatsSnapshot {
    pub total_dispatched: u64,
    pub total_delivered: u64,
    pub total_failed: u64,
    pub total_evicted: u64,
}

/// Forwards frames from one connection to every other open connection
pub struct RelayDispatcher {
    connection_manager: Arc<ConnectionManager>,
    stats: DispatcherStats,
}

impl RelayDispatcher {
    pub fn new(connection_manager: Arc<ConnectionManager>) -> Self {
        Self {
            connection_manager,
            stats: DispatcherStats::default(),
        }
    }

    pub fn stats(&self) -> DispatcherStatsSnapshot {
        self.stats.snapshot()
    }

    /// Relay `frame` to every open connection except `sender_id`.
    ///
    /// Each copy is queued with `try_send`, so no recipient can hold up the
    /// others or the sender's next frame. A recipient whose buffer is full or
    /// whose writer is gone is evicted; the failure never reaches the sender.
    /// Copies are queued in call order, which keeps frames from one sender in
    /// order at each recipient.
    #[tracing::instrument(
        name = "relay.dispatch",
        skip(self, frame),
        fields(kind = frame.kind(), bytes = frame.len())
    )]
    pub fn dispatch(&self, sender_id: ConnectionId, frame: RelayFrame) -> DeliveryResult {
        let start = Instant::now();
        let recipients: Vec<Arc<ConnectionHandle>> = self
            .connection_manager
            .snapshot()
            .into_iter()
            .filter(|conn| conn.id != sender_id && !conn.is_closed())
            .collect();

        let mut result = DeliveryResult {
            recipients: recipients.len(),
            ..Default::default()
        };

        for conn in recipients {
            match conn.try_send_frame(frame.clone()) {
                Ok(()) => result.delivered += 1,
                Err(failure) => {
                    result.failed += 1;
                    if self.handle_send_failure(conn.id, failure) {
                        result.evicted += 1;
                    }
                }
            }
        }

        self.stats.total_dispatched.fetch_add(1, Ordering::Relaxed);
        self.stats.total_delivered.fetch_add(result.delivered as u64, Ordering::Relaxed);
        self.stats.total_failed.fetch_add(result.failed as u64, Ordering::Relaxed);
        self.stats.total_evicted.fetch_add(result.evicted as u64, Ordering::Relaxed);

        RelayMetrics::record_dispatch(
            result.recipients,
            result.delivered as u64,
            start.elapsed().as_secs_f64(),
        );

        tracing::debug!(
            sender_id = %sender_id,
            recipients = result.recipients,
            delivered = result.delivered,
            failed = result.failed,
            "Relayed frame"
        );

        result
    }

    /// A recipient that cannot take a frame is treated as gone.
    fn handle_send_failure(&self, conn_id: ConnectionId, failure: SendFailure) -> bool {
        RelayMetrics::record_send_failure(failure);
        tracing::debug!(
            connection_id = %conn_id,
            error = %failure,
            "Relay send failed, evicting recipient"
        );
        lifecycle::evict(&self.connection_manager, conn_id, CloseReason::SendFailed(failure))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::Outbound;
    use tokio::sync::mpsc;

    fn open(cm: &ConnectionManager, buffer: usize) -> (Arc<ConnectionHandle>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(buffer);
        (lifecycle::on_open(cm, tx).unwrap(), rx)
    }

    #[test]
    fn test_dispatch_skips_sender() {
        let cm = Arc::new(ConnectionManager::new());
        let dispatcher = RelayDispatcher::new(cm.clone());
        let (a, mut ra) = open(&cm, 4);
        let (_b, mut rb) = open(&cm, 4);

        let result = dispatcher.dispatch(a.id, RelayFrame::text("m"));
        assert_eq!(result.recipients, 1);
        assert_eq!(result.delivered, 1);

        assert_eq!(rb.try_recv().unwrap(), Outbound::Frame(RelayFrame::text("m")));
        assert!(ra.try_recv().is_err());
    }

    #[test]
    fn test_dispatch_with_no_peers() {
        let cm = Arc::new(ConnectionManager::new());
        let dispatcher = RelayDispatcher::new(cm.clone());
        let (a, _ra) = open(&cm, 4);

        let result = dispatcher.dispatch(a.id, RelayFrame::binary(vec![1u8]));
        assert_eq!(result, DeliveryResult::default());
        assert_eq!(dispatcher.stats().total_dispatched, 1);
    }

    #[test]
    fn test_full_recipient_is_evicted() {
        let cm = Arc::new(ConnectionManager::new());
        let dispatcher = RelayDispatcher::new(cm.clone());
        let (a, _ra) = open(&cm, 4);
        let (slow, _rslow) = open(&cm, 1);
        let (_c, mut rc) = open(&cm, 4);

        let first = dispatcher.dispatch(a.id, RelayFrame::text("1"));
        assert_eq!(first.delivered, 2);

        let second = dispatcher.dispatch(a.id, RelayFrame::text("2"));
        assert_eq!(second.delivered, 1);
        assert_eq!(second.failed, 1);
        assert_eq!(second.evicted, 1);
        assert!(!cm.contains(slow.id));
        assert_eq!(slow.close_code(), Some(crate::websocket::close_code::POLICY));

        assert_eq!(rc.try_recv().unwrap(), Outbound::Frame(RelayFrame::text("1")));
        assert_eq!(rc.try_recv().unwrap(), Outbound::Frame(RelayFrame::text("2")));

        let stats = dispatcher.stats();
        assert_eq!(stats.total_dispatched, 2);
        assert_eq!(stats.total_delivered, 3);
        assert_eq!(stats.total_evicted, 1);
    }

    #[test]
    fn test_closed_handle_in_snapshot_is_skipped() {
        let cm = Arc::new(ConnectionManager::new());
        let dispatcher = RelayDispatcher::new(cm.clone());
        let (a, _ra) = open(&cm, 4);
        let (b, mut rb) = open(&cm, 4);

        lifecycle::on_close(&cm, b.id, CloseReason::PeerClosed);
        let result = dispatcher.dispatch(a.id, RelayFrame::text("late"));

        assert_eq!(result.recipients, 0);
        assert!(rb.try_recv().is_err());
    }
}
