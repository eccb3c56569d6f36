use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::websocket::{close_code, Outbound};

use super::stats::ConnectionStats;
use super::types::{ConnectionError, ConnectionHandle, ConnectionId, ConnectionLimits};

/// Registry of all open WebSocket connections
pub struct ConnectionManager {
    /// connection_id -> ConnectionHandle
    connections: DashMap<ConnectionId, Arc<ConnectionHandle>>,
    /// Source of connection ids; never reused within the process
    next_id: AtomicU64,
    limits: ConnectionLimits,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::with_limits(ConnectionLimits::default())
    }

    pub fn with_limits(limits: ConnectionLimits) -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
            limits,
        }
    }

    pub fn limits(&self) -> ConnectionLimits {
        self.limits
    }

    /// Register a new connection
    ///
    /// The limit check is advisory under concurrent accepts: a burst may overshoot
    /// `max_connections` by the number of racing registrations.
    pub fn register(
        &self,
        sender: mpsc::Sender<Outbound>,
    ) -> Result<Arc<ConnectionHandle>, ConnectionError> {
        let current = self.connections.len();
        if current >= self.limits.max_connections {
            return Err(ConnectionError::TotalLimitExceeded {
                current,
                max: self.limits.max_connections,
            });
        }

        let id = ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let handle = Arc::new(ConnectionHandle::new(id, sender));
        self.connections.insert(id, handle.clone());

        tracing::info!(connection_id = %id, total = self.connections.len(), "Connection registered");

        Ok(handle)
    }

    /// Unregister a connection
    ///
    /// Returns the removed handle, or `None` if the id was not registered. Only one
    /// caller ever gets the handle back for a given id.
    pub fn unregister(&self, connection_id: ConnectionId) -> Option<Arc<ConnectionHandle>> {
        let (_, handle) = self.connections.remove(&connection_id)?;
        handle.mark_closed();

        tracing::info!(connection_id = %connection_id, total = self.connections.len(), "Connection unregistered");

        Some(handle)
    }

    /// Point-in-time copy of all open connections
    ///
    /// No registry lock is held once this returns, so callers may await on sends
    /// while connections come and go.
    pub fn snapshot(&self) -> Vec<Arc<ConnectionHandle>> {
        self.connections.iter().map(|r| r.value().clone()).collect()
    }

    /// Get connection by ID
    pub fn get_connection(&self, connection_id: ConnectionId) -> Option<Arc<ConnectionHandle>> {
        self.connections.get(&connection_id).map(|h| h.clone())
    }

    pub fn contains(&self, connection_id: ConnectionId) -> bool {
        self.connections.contains_key(&connection_id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Get statistics
    pub fn stats(&self) -> ConnectionStats {
        let now = Utc::now();
        let oldest_connection_secs = self
            .connections
            .iter()
            .map(|entry| now.signed_duration_since(entry.value().connected_at).num_seconds())
            .max()
            .unwrap_or(0)
            .max(0) as u64;

        ConnectionStats {
            total_connections: self.connections.len(),
            max_connections: self.limits.max_connections,
            total_registered: self.next_id.load(Ordering::Relaxed).saturating_sub(1),
            oldest_connection_secs,
        }
    }

    /// Find connections that have been inactive for longer than the timeout
    pub fn find_stale_connections(&self, timeout_secs: u64) -> Vec<ConnectionId> {
        let now = Utc::now();
        let timeout = chrono::Duration::seconds(timeout_secs as i64);

        self.connections
            .iter()
            .filter(|entry| now.signed_duration_since(entry.value().last_activity()) > timeout)
            .map(|entry| *entry.key())
            .collect()
    }

    /// Ask every open connection to close without removing it; each connection
    /// unregisters itself as its task winds down.
    pub fn close_all(&self) -> usize {
        let connections = self.snapshot();
        for handle in &connections {
            handle.request_close(close_code::AWAY);
        }
        connections.len()
    }

    /// Ids of all open connections
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.connections.iter().map(|r| *r.key()).collect()
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}
