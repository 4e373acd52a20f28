//! Transport metrics.
//!
//! # Metrics
//! - `nio_connections_total` (counter): connections created, labelled by `tls`
//! - `nio_connections_active` (gauge): connections not yet closed
//! - `nio_handshake_failures_total` (counter)
//! - `nio_responses_total` (counter): responses submitted, labelled by `status`
//! - `nio_body_bytes_total` (counter): body bytes handed to the wire
//! - `nio_production_failures_total` (counter)

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_connection_opened(tls: bool) {
    counter!("nio_connections_total", "tls" => if tls { "true" } else { "false" }).increment(1);
    gauge!("nio_connections_active").increment(1.0);
}

pub fn record_connection_closed() {
    gauge!("nio_connections_active").decrement(1.0);
}

pub fn record_handshake_failure() {
    counter!("nio_handshake_failures_total").increment(1);
}

pub fn record_response(status: u16) {
    counter!("nio_responses_total", "status" => status.to_string()).increment(1);
}

pub fn record_body_bytes(n: usize) {
    counter!("nio_body_bytes_total").increment(n as u64);
}

pub fn record_production_failure() {
    counter!("nio_production_failures_total").increment(1);
}
