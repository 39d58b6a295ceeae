//! Metrics collection and exposition.
//!
//! # Metrics
//! - `lb_upstream_active` (gauge): 1=active, 0=inactive, by address
//! - `lb_upstream_connections` (gauge): connections bracketed by callers, by address
//! - `lb_upstream_dial_seconds` (histogram): probe dial latency, by address
//! - `lb_relay_bytes_total` (counter): relayed bytes, by direction
//! - `lb_accepted_connections_total` (counter)
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Serve Prometheus metrics on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(
            address = %addr,
            error = %e,
            "Failed to install metrics exporter"
        ),
    }
}

pub fn record_upstream_active(address: &str, active: bool) {
    metrics::gauge!("lb_upstream_active", "address" => address.to_string())
        .set(if active { 1.0 } else { 0.0 });
}

pub fn record_upstream_connections(address: &str, count: i64) {
    metrics::gauge!("lb_upstream_connections", "address" => address.to_string()).set(count as f64);
}

pub fn record_probe_latency(address: &str, latency: Duration) {
    metrics::histogram!("lb_upstream_dial_seconds", "address" => address.to_string())
        .record(latency.as_secs_f64());
}

pub fn record_relay_bytes(upstream_to_client: u64, client_to_upstream: u64) {
    metrics::counter!("lb_relay_bytes_total", "direction" => "upstream")
        .increment(client_to_upstream);
    metrics::counter!("lb_relay_bytes_total", "direction" => "downstream")
        .increment(upstream_to_client);
}

pub fn record_accepted() {
    metrics::counter!("lb_accepted_connections_total").increment(1);
}
