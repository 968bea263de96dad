//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define gateway metrics (requests, latency, status classes, policy gates)
//! - Expose a Prometheus-compatible scrape endpoint
//! - Track per-route and per-service metrics
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by route, method, service
//! - `gateway_request_duration_seconds` (histogram): latency by route and status
//! - `gateway_requests_status_total` (counter): responses by status category
//! - `gateway_rate_limited_total` (counter): denied requests by route
//! - `gateway_circuit_breaker_state` (gauge): 0=closed, 1=open, 2=half-open
//! - `gateway_circuit_breaker_rejections_total` (counter): short-circuited calls
//! - `gateway_retries_total` (counter): extra attempts by route
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op, so tests need no setup

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::resilience::circuit_breaker::CircuitState;

/// Install the Prometheus recorder and its HTTP listener on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

/// Coarse class of an HTTP status, used as a label.
pub fn status_category(status: u16) -> &'static str {
    match status {
        200..=299 => "2xx_success",
        300..=399 => "3xx_redirect",
        400..=499 => "4xx_client_error",
        500..=599 => "5xx_server_error",
        _ => "unknown",
    }
}

/// Record one completed request.
pub fn record_request(route: &str, method: &str, service: &str, status: u16, start: Instant) {
    let elapsed = start.elapsed().as_secs_f64();

    counter!(
        "gateway_requests_total",
        "route" => route.to_string(),
        "method" => method.to_string(),
        "service" => service.to_string()
    )
    .increment(1);

    histogram!(
        "gateway_request_duration_seconds",
        "route" => route.to_string(),
        "method" => method.to_string(),
        "service" => service.to_string(),
        "status" => status.to_string()
    )
    .record(elapsed);

    counter!(
        "gateway_requests_status_total",
        "route" => route.to_string(),
        "method" => method.to_string(),
        "service" => service.to_string(),
        "status" => status.to_string(),
        "status_category" => status_category(status)
    )
    .increment(1);
}

pub fn record_rate_limited(route: &str) {
    counter!("gateway_rate_limited_total", "route" => route.to_string()).increment(1);
}

pub fn record_circuit_state(route: &str, state: CircuitState) {
    gauge!("gateway_circuit_breaker_state", "route" => route.to_string()).set(state.as_gauge());
}

pub fn record_circuit_rejection(route: &str) {
    counter!("gateway_circuit_breaker_rejections_total", "route" => route.to_string()).increment(1);
}

pub fn record_retry(route: &str) {
    counter!("gateway_retries_total", "route" => route.to_string()).increment(1);
}
