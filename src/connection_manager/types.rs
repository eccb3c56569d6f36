//! Connection handle and related types

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU16, AtomicU8, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

use crate::websocket::{Outbound, RelayFrame};

/// Identifier of an open connection, unique for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
#[serde(transparent)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Where a connection is in its life. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Open = 1,
    Closed = 2,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Open,
            _ => Self::Closed,
        }
    }
}

/// Why a relay send to one recipient did not go through
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendFailure {
    /// The connection's writer is gone
    #[error("connection closed")]
    Closed,
    /// The recipient's buffer was full when the frame was relayed
    #[error("recipient buffer full")]
    Full,
    /// The recipient's buffer stayed full for the whole send timeout
    #[error("send timed out")]
    Timeout,
}

impl SendFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Full => "full",
            Self::Timeout => "timeout",
        }
    }
}

/// Handle for a single WebSocket connection
pub struct ConnectionHandle {
    pub id: ConnectionId,
    sender: mpsc::Sender<Outbound>,
    pub connected_at: DateTime<Utc>,
    /// Last inbound activity (Unix millis), lock-free so the relay loop never blocks on it
    last_activity: AtomicI64,
    state: AtomicU8,
    /// Close code requested for the socket, 0 until a close is requested
    close_code: AtomicU16,
    close_signal: Notify,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, sender: mpsc::Sender<Outbound>) -> Self {
        let now = Utc::now();
        Self {
            id,
            sender,
            connected_at: now,
            last_activity: AtomicI64::new(now.timestamp_millis()),
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            close_code: AtomicU16::new(0),
            close_signal: Notify::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Connecting -> Open. Returns false if the connection was closed first.
    pub fn mark_open(&self) -> bool {
        self.state
            .compare_exchange(
                ConnectionState::Connecting as u8,
                ConnectionState::Open as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Moves to Closed. Returns true only for the call that performed the transition.
    pub fn mark_closed(&self) -> bool {
        self.state.swap(ConnectionState::Closed as u8, Ordering::AcqRel)
            != ConnectionState::Closed as u8
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }

    pub fn update_activity(&self) {
        self.last_activity
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.last_activity.load(Ordering::Relaxed))
            .unwrap_or_else(Utc::now)
    }

    /// Queue a relayed frame without waiting. A full buffer is a failure.
    pub fn try_send_frame(&self, frame: RelayFrame) -> Result<(), SendFailure> {
        self.sender
            .try_send(Outbound::Frame(frame))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => SendFailure::Full,
                mpsc::error::TrySendError::Closed(_) => SendFailure::Closed,
            })
    }

    pub async fn send(&self, message: Outbound, timeout: Duration) -> Result<(), SendFailure> {
        self.sender
            .send_timeout(message, timeout)
            .await
            .map_err(|e| match e {
                mpsc::error::SendTimeoutError::Timeout(_) => SendFailure::Timeout,
                mpsc::error::SendTimeoutError::Closed(_) => SendFailure::Closed,
            })
    }

    /// Ask the task serving this connection to shut the socket with `code`.
    /// The first request wins; later ones only re-signal.
    pub fn request_close(&self, code: u16) {
        let _ = self
            .close_code
            .compare_exchange(0, code, Ordering::AcqRel, Ordering::Acquire);
        // notify_one stores a permit, so a request made before anyone waits is not lost
        self.close_signal.notify_one();
    }

    pub fn close_requested(&self) -> bool {
        self.close_code().is_some()
    }

    /// Close code of the first close request, if any
    pub fn close_code(&self) -> Option<u16> {
        match self.close_code.load(Ordering::Acquire) {
            0 => None,
            code => Some(code),
        }
    }

    /// Resolves once `request_close` has been called.
    pub async fn closed(&self) {
        if self.close_requested() {
            return;
        }
        self.close_signal.notified().await;
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("connected_at", &self.connected_at)
            .finish()
    }
}

/// Error returned when a connection cannot be registered
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("Total connection limit exceeded ({current}/{max})")]
    TotalLimitExceeded { current: usize, max: usize },
}

/// Limits for connection management
#[derive(Debug, Clone, Copy)]
pub struct ConnectionLimits {
    pub max_connections: usize,
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self {
            max_connections: 10000,
        }
    }
}
