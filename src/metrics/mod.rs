//! Prometheus metrics for the relay.
//!
//! - Connection metrics (open, opened/closed/rejected/evicted, duration)
//! - Relay metrics (frames received, frames relayed, send failures, fan-out)
//! - Heartbeat metrics

mod helpers;

pub use helpers::{encode_metrics, ConnectionMetrics, HeartbeatMetrics, RelayMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "relay";

lazy_static! {
    // ============================================================================
    // Connection Metrics
    // ============================================================================

    /// Number of open WebSocket connections
    pub static ref CONNECTIONS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_connections_active", METRIC_PREFIX),
        "Number of open WebSocket connections"
    ).unwrap();

    /// Connections accepted and registered
    pub static ref WS_CONNECTIONS_OPENED: IntCounter = register_int_counter!(
        format!("{}_ws_connections_opened_total", METRIC_PREFIX),
        "Total WebSocket connections opened"
    ).unwrap();

    /// Connections removed from the registry
    pub static ref WS_CONNECTIONS_CLOSED: IntCounter = register_int_counter!(
        format!("{}_ws_connections_closed_total", METRIC_PREFIX),
        "Total WebSocket connections closed"
    ).unwrap();

    /// Connections refused at registration
    pub static ref WS_CONNECTIONS_REJECTED: IntCounter = register_int_counter!(
        format!("{}_ws_connections_rejected_total", METRIC_PREFIX),
        "Total WebSocket connections rejected at registration"
    ).unwrap();

    /// Connections removed by the relay after a failed send or idle timeout
    pub static ref WS_CONNECTIONS_EVICTED: IntCounter = register_int_counter!(
        format!("{}_ws_connections_evicted_total", METRIC_PREFIX),
        "Total WebSocket connections evicted by the relay"
    ).unwrap();

    /// How long connections stay open
    pub static ref WS_CONNECTION_DURATION: Histogram = register_histogram!(
        format!("{}_ws_connection_duration_seconds", METRIC_PREFIX),
        "WebSocket connection duration in seconds",
        vec![1.0, 10.0, 60.0, 300.0, 900.0, 3600.0, 14400.0]
    ).unwrap();

    // ============================================================================
    // Relay Metrics
    // ============================================================================

    /// Frames received from clients by kind
    pub static ref FRAMES_RECEIVED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_frames_received_total", METRIC_PREFIX),
        "Total frames received from clients",
        &["kind"]
    ).unwrap();

    /// Frame copies queued to recipients
    pub static ref FRAMES_RELAYED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_frames_relayed_total", METRIC_PREFIX),
        "Total frame copies delivered to recipients"
    ).unwrap();

    /// Failed sends by reason
    pub static ref SEND_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_send_failures_total", METRIC_PREFIX),
        "Total failed relay sends",
        &["reason"]
    ).unwrap();

    /// Recipients per dispatch
    pub static ref DISPATCH_FANOUT: Histogram = register_histogram!(
        format!("{}_dispatch_fanout", METRIC_PREFIX),
        "Number of recipients per dispatched frame",
        vec![0.0, 1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0, 500.0]
    ).unwrap();

    /// Time to hand one frame to every recipient
    pub static ref DISPATCH_LATENCY: Histogram = register_histogram!(
        format!("{}_dispatch_latency_seconds", METRIC_PREFIX),
        "Dispatch latency in seconds",
        vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
    ).unwrap();

    // ============================================================================
    // Heartbeat Metrics
    // ============================================================================

    /// Duration of a heartbeat round
    pub static ref HEARTBEAT_DURATION_MS: Histogram = register_histogram!(
        format!("{}_heartbeat_duration_ms", METRIC_PREFIX),
        "Heartbeat round duration in milliseconds",
        vec![1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0, 5000.0]
    ).unwrap();

    /// Pings that could not be queued in time
    pub static ref HEARTBEAT_FAILURES: IntCounter = register_int_counter!(
        format!("{}_heartbeat_failures_total", METRIC_PREFIX),
        "Total heartbeat pings that could not be queued"
    ).unwrap();
}
