use thiserror::Error;

use crate::telemetry::TelemetryError;

/// Errors that stop the relay from starting or serving
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Failed to listen on {addr}: {source}")]
    Listen {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Serve(#[source] std::io::Error),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
}

impl AppError {
    pub fn listen(addr: impl Into<String>, source: std::io::Error) -> Self {
        Self::Listen {
            addr: addr.into(),
            source,
        }
    }
}
