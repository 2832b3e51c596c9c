//! Metrics collection and exposition.
//!
//! # Metrics
//! - `relay_sessions_total` (counter): accepted sessions by `mode` (tcp, dns)
//! - `relay_active_sessions` (gauge): sessions currently open
//! - `relay_session_errors_total` (counter): failed sessions by `kind`
//! - `relay_tcp_retries_total` (counter): silent-close and connect retries
//! - `relay_doh_queries_total` (counter): DoH queries by `outcome`
//! - `relay_bytes_total` (counter): payload bytes by `direction` (uplink, downlink)

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its scrape endpoint on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_session(mode: &'static str) {
    counter!("relay_sessions_total", "mode" => mode).increment(1);
}

pub fn record_session_opened() {
    gauge!("relay_active_sessions").increment(1.0);
}

pub fn record_session_closed() {
    gauge!("relay_active_sessions").decrement(1.0);
}

pub fn record_session_error(kind: &'static str) {
    counter!("relay_session_errors_total", "kind" => kind).increment(1);
}

pub fn record_retry() {
    counter!("relay_tcp_retries_total").increment(1);
}

pub fn record_doh_query(outcome: &'static str) {
    counter!("relay_doh_queries_total", "outcome" => outcome).increment(1);
}

pub fn record_bytes(direction: &'static str, bytes: usize) {
    counter!("relay_bytes_total", "direction" => direction).increment(bytes as u64);
}
