//! Connection statistics

use serde::Serialize;

/// Registry statistics
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStats {
    pub total_connections: usize,
    pub max_connections: usize,
    /// Connections accepted since the server started
    pub total_registered: u64,
    pub oldest_connection_secs: u64,
}
