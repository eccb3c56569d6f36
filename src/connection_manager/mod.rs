//! Registry of open connections.

mod registry;
mod stats;
mod types;

pub use registry::ConnectionManager;
pub use stats::ConnectionStats;
pub use types::{
    ConnectionError, ConnectionHandle, ConnectionId, ConnectionLimits, ConnectionState,
    SendFailure,
};
