//! Metrics collection and export for Tether.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tether_core::{Delivery, Outcome, SessionObserver};
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "tether_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "tether_connections_active";
    pub const ROOMS_ACTIVE: &str = "tether_rooms_active";
    pub const EVENTS_TOTAL: &str = "tether_events_total";
    pub const MESSAGES_BYTES: &str = "tether_messages_bytes";
    pub const FANOUT_DELIVERIES_TOTAL: &str = "tether_fanout_deliveries_total";
    pub const CHANNELS_PRUNED_TOTAL: &str = "tether_channels_pruned_total";
    pub const DELIVERIES_DROPPED_TOTAL: &str = "tether_deliveries_dropped_total";
    pub const ERRORS_TOTAL: &str = "tether_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_gauge!(names::ROOMS_ACTIVE, "Rooms with at least one live channel");
    metrics::describe_counter!(names::EVENTS_TOTAL, "Inbound events by type");
    metrics::describe_counter!(names::MESSAGES_BYTES, "Total bytes of frames processed");
    metrics::describe_counter!(
        names::FANOUT_DELIVERIES_TOTAL,
        "Frames accepted by recipient queues during room fan-out"
    );
    metrics::describe_counter!(
        names::CHANNELS_PRUNED_TOTAL,
        "Channels removed after a failed send"
    );
    metrics::describe_counter!(
        names::DELIVERIES_DROPPED_TOTAL,
        "Point-to-point deliveries dropped, by reason"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record frame bytes.
pub fn record_message(bytes: usize, direction: &'static str) {
    counter!(names::MESSAGES_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Update active room count.
pub fn set_active_rooms(count: usize) {
    gauge!(names::ROOMS_ACTIVE).set(count as f64);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Records per-event dispatch results from sessions.
#[derive(Debug, Default)]
pub struct MetricsObserver;

impl SessionObserver for MetricsObserver {
    fn on_dispatch(&self, kind: &'static str, outcome: &Outcome) {
        counter!(names::EVENTS_TOTAL, "type" => kind).increment(1);

        match outcome {
            Outcome::Fanout(report) => {
                counter!(names::FANOUT_DELIVERIES_TOTAL).increment(report.delivered as u64);
                counter!(names::CHANNELS_PRUNED_TOTAL).increment(report.pruned.len() as u64);
            }
            Outcome::Delivery(Delivery::Dropped(reason)) => {
                counter!(names::DELIVERIES_DROPPED_TOTAL, "reason" => reason.as_str()).increment(1);
            }
            Outcome::Rejected => record_error("invalid_frame"),
            Outcome::Delivery(Delivery::Delivered) | Outcome::Replied | Outcome::Ignored => {}
        }
    }
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}
