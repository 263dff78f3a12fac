//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define relay metrics (operations, upstream attempts, chunks, reconnects)
//! - Expose a Prometheus-compatible scrape endpoint when enabled
//!
//! # Metrics
//! - `relay_operations_started_total` (counter)
//! - `relay_operations_finished_total` (counter): by `outcome`
//! - `relay_operations_active` (gauge)
//! - `relay_upstream_attempts_total` (counter): by `result` (success, status, network)
//! - `relay_upstream_retries_total` (counter)
//! - `relay_chunks_sent_total` (counter)
//! - `relay_control_reconnects_total` (counter)
//!
//! # Design Decisions
//! - Uses the `metrics` facade; without an installed recorder every call is a no-op

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_operation_started() {
    metrics::counter!("relay_operations_started_total").increment(1);
}

pub fn record_operation_finished(outcome: &'static str) {
    metrics::counter!("relay_operations_finished_total", "outcome" => outcome).increment(1);
}

pub fn record_active_operations(count: usize) {
    metrics::gauge!("relay_operations_active").set(count as f64);
}

pub fn record_upstream_attempt(result: &'static str) {
    metrics::counter!("relay_upstream_attempts_total", "result" => result).increment(1);
}

pub fn record_retry() {
    metrics::counter!("relay_upstream_retries_total").increment(1);
}

pub fn record_chunk() {
    metrics::counter!("relay_chunks_sent_total").increment(1);
}

pub fn record_reconnect() {
    metrics::counter!("relay_control_reconnects_total").increment(1);
}
