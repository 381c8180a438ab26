//! Metrics collection and exposition.
//!
//! # Metrics
//! - `rpc_requests_total` (counter): calls by method, requested version, code
//! - `rpc_request_duration_seconds` (histogram): latency by method, version
//!
//! # Design Decisions
//! - Recording is a no-op until an exporter is installed
//! - Labels use the requested version (`latest` stays `latest`) so drift
//!   between pinned and floating clients is visible

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

/// Record one finished RPC call.
pub fn record_call(method: &str, version: &str, code: &str, start: Instant) {
    counter!(
        "rpc_requests_total",
        "method" => method.to_string(),
        "version" => version.to_string(),
        "code" => code.to_string()
    )
    .increment(1);
    histogram!(
        "rpc_request_duration_seconds",
        "method" => method.to_string(),
        "version" => version.to_string()
    )
    .record(start.elapsed().as_secs_f64());
}
