//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by method, status, upstream
//! - `proxy_request_duration_seconds` (histogram): latency distribution
//! - `proxy_upstream_in_flight` (gauge): in-flight requests per upstream
//! - `proxy_upstream_alive` (gauge): 1=alive, 0=down

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its scrape listener on `addr`.
/// Must be called from inside a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_request(method: &str, status: u16, upstream: &str, start: Instant) {
    let status = status.to_string();
    counter!(
        "proxy_requests_total",
        "method" => method.to_string(),
        "status" => status.clone(),
        "upstream" => upstream.to_string()
    )
    .increment(1);
    histogram!(
        "proxy_request_duration_seconds",
        "method" => method.to_string(),
        "status" => status,
        "upstream" => upstream.to_string()
    )
    .record(start.elapsed().as_secs_f64());
}

pub fn record_in_flight(upstream: &str, in_flight: u64) {
    gauge!("proxy_upstream_in_flight", "upstream" => upstream.to_string()).set(in_flight as f64);
}

pub fn record_upstream_alive(upstream: &str, alive: bool) {
    gauge!("proxy_upstream_alive", "upstream" => upstream.to_string())
        .set(if alive { 1.0 } else { 0.0 });
}
