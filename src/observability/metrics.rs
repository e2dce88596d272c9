//! Metrics collection and exposition.
//!
//! # Metrics
//! - `volgate_connections_routed_total` (counter): classified connections by listener
//! - `volgate_rpc_requests_total` (counter): RPC calls by method and status code
//!
//! # Design Decisions
//! - Unmatched connections are deliberately not counted
//! - Recording is a no-op until an exporter is installed

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus exporter with its own HTTP listener.
///
/// Fails if a recorder is already installed in this process.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

/// Count one finished RPC call.
pub fn record_rpc(method: &str, code: &'static str) {
    metrics::counter!(
        "volgate_rpc_requests_total",
        "method" => method.to_string(),
        "code" => code
    )
    .increment(1);
}
