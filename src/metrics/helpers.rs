//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use crate::connection_manager::SendFailure;

use super::{
    CONNECTIONS_ACTIVE, DISPATCH_FANOUT, DISPATCH_LATENCY, FRAMES_RECEIVED_TOTAL,
    FRAMES_RELAYED_TOTAL, HEARTBEAT_DURATION_MS, HEARTBEAT_FAILURES, SEND_FAILURES_TOTAL,
    WS_CONNECTIONS_CLOSED, WS_CONNECTIONS_EVICTED, WS_CONNECTIONS_OPENED,
    WS_CONNECTIONS_REJECTED, WS_CONNECTION_DURATION,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording connection lifecycle metrics
pub struct ConnectionMetrics;

impl ConnectionMetrics {
    pub fn record_opened() {
        WS_CONNECTIONS_OPENED.inc();
        CONNECTIONS_ACTIVE.inc();
    }

    pub fn record_closed(duration_secs: f64) {
        WS_CONNECTIONS_CLOSED.inc();
        CONNECTIONS_ACTIVE.dec();
        WS_CONNECTION_DURATION.observe(duration_secs);
    }

    pub fn record_rejected() {
        WS_CONNECTIONS_REJECTED.inc();
    }

    pub fn record_evicted(count: u64) {
        WS_CONNECTIONS_EVICTED.inc_by(count);
    }

    /// Resync the gauge with the registry (the registry is authoritative)
    pub fn set_active(count: usize) {
        CONNECTIONS_ACTIVE.set(count as i64);
    }
}

/// Helper struct for recording relay metrics
pub struct RelayMetrics;

impl RelayMetrics {
    pub fn record_received(kind: &str) {
        FRAMES_RECEIVED_TOTAL.with_label_values(&[kind]).inc();
    }

    pub fn record_dispatch(recipients: usize, delivered: u64, latency_secs: f64) {
        DISPATCH_FANOUT.observe(recipients as f64);
        FRAMES_RELAYED_TOTAL.inc_by(delivered);
        DISPATCH_LATENCY.observe(latency_secs);
    }

    pub fn record_send_failure(failure: SendFailure) {
        SEND_FAILURES_TOTAL
            .with_label_values(&[failure.as_str()])
            .inc();
    }
}

/// Helper struct for heartbeat metrics
pub struct HeartbeatMetrics;

impl HeartbeatMetrics {
    pub fn record_duration_ms(ms: u64) {
        HEARTBEAT_DURATION_MS.observe(ms as f64);
    }

    pub fn record_failures(count: u64) {
        HEARTBEAT_FAILURES.inc_by(count);
    }
}
