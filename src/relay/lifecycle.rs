//! Connection open/close hooks.
//!
//! Every path that ends a connection (peer close, transport error, failed
//! relay send, idle timeout, shutdown) goes through [`on_close`], which
//! performs the registry removal and its side effects at most once per id.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;

use crate::connection_manager::{
    ConnectionError, ConnectionHandle, ConnectionId, ConnectionManager, SendFailure,
};
use crate::metrics::ConnectionMetrics;
use crate::websocket::{close_code, Outbound};

/// Why a connection left the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Client sent a close frame or ended the stream
    PeerClosed,
    /// Reading from the socket failed
    TransportError,
    /// Writing to the socket failed
    WriterFailed,
    /// A relay send to this connection failed
    SendFailed(SendFailure),
    /// No inbound activity within the configured timeout
    IdleTimeout,
    /// Server is shutting down
    Shutdown,
    /// The relay removed the connection while its task was still reading
    Evicted,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PeerClosed => "peer_closed",
            Self::TransportError => "transport_error",
            Self::WriterFailed => "writer_failed",
            Self::SendFailed(SendFailure::Closed) => "send_failed_closed",
            Self::SendFailed(SendFailure::Full) => "send_failed_full",
            Self::SendFailed(SendFailure::Timeout) => "send_failed_timeout",
            Self::IdleTimeout => "idle_timeout",
            Self::Shutdown => "shutdown",
            Self::Evicted => "evicted",
        }
    }

    /// Close code sent to the client when the relay ends the connection
    pub fn close_code(&self) -> u16 {
        match self {
            Self::Shutdown => close_code::AWAY,
            _ => close_code::POLICY,
        }
    }

    /// Closes initiated by the relay rather than by the peer
    pub fn is_eviction(&self) -> bool {
        matches!(self, Self::SendFailed(_) | Self::IdleTimeout)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Register a freshly upgraded connection and move it to `Open`.
///
/// On failure the caller must close the socket; the connection is never left
/// half-registered.
pub fn on_open(
    manager: &ConnectionManager,
    sender: mpsc::Sender<Outbound>,
) -> Result<Arc<ConnectionHandle>, ConnectionError> {
    match manager.register(sender) {
        Ok(handle) => {
            handle.mark_open();
            ConnectionMetrics::record_opened();
            Ok(handle)
        }
        Err(e) => {
            ConnectionMetrics::record_rejected();
            tracing::warn!(error = %e, "Connection rejected");
            Err(e)
        }
    }
}

/// Remove a connection from the registry.
///
/// Returns true only for the call that actually removed it; repeated or racing
/// calls for the same id are no-ops.
pub fn on_close(manager: &ConnectionManager, connection_id: ConnectionId, reason: CloseReason) -> bool {
    let Some(handle) = manager.unregister(connection_id) else {
        return false;
    };

    let duration = Utc::now()
        .signed_duration_since(handle.connected_at)
        .num_milliseconds()
        .max(0) as f64
        / 1000.0;

    ConnectionMetrics::record_closed(duration);
    if reason.is_eviction() {
        ConnectionMetrics::record_evicted(1);
    }

    tracing::info!(
        connection_id = %connection_id,
        reason = %reason,
        duration_secs = duration,
        "WebSocket connection closed"
    );

    true
}

/// Close a connection from the relay side: unregister it and tell its task to
/// shut the socket.
pub fn evict(manager: &ConnectionManager, connection_id: ConnectionId, reason: CloseReason) -> bool {
    let handle = manager.get_connection(connection_id);
    let removed = on_close(manager, connection_id, reason);
    if removed {
        if let Some(handle) = handle {
            handle.request_close(reason.close_code());
        }
    }
    removed
}
