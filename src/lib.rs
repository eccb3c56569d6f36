// Supporting modules
pub mod config;
pub mod error;
pub mod metrics;
pub mod telemetry;

// Broadcast hub
pub mod connection_manager;
pub mod relay;

// Application layer
pub mod api;
pub mod server;
pub mod websocket;

// Background work and teardown
pub mod shutdown;
pub mod tasks;
