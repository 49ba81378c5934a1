//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define gateway metrics (requests, latency, redirects, cache, revalidation)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `gateway_requests_total` (counter): total requests by method, status
//! - `gateway_request_duration_seconds` (histogram): latency distribution
//! - `gateway_redirects_total` (counter): redirects by kind (trailing_slash, rule)
//! - `gateway_cache_lookups_total` (counter): lookups by variant, outcome
//! - `gateway_revalidations_total` (counter): queue outcomes
//!
//! # Design Decisions
//! - Recording without an installed exporter is a no-op, so tests need no setup
//! - Labels are low-cardinality only (no paths, no tags)

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter on `addr`. Must run inside the runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record a completed client request.
pub fn record_request(method: &str, status: u16, start: Instant) {
    metrics::counter!(
        "gateway_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("gateway_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

/// Record a redirect answered by the resolver.
pub fn record_redirect(kind: &'static str) {
    metrics::counter!("gateway_redirects_total", "kind" => kind).increment(1);
}

/// Record an ISR cache lookup outcome (`hit`, `stale`, `miss`, `bypass`, `error`).
pub fn record_cache_lookup(variant: &'static str, outcome: &'static str) {
    metrics::counter!(
        "gateway_cache_lookups_total",
        "variant" => variant,
        "outcome" => outcome
    )
    .increment(1);
}

/// Record a revalidation queue event (`enqueued`, `deduplicated`, `succeeded`, `failed`).
pub fn record_revalidation(outcome: &'static str) {
    metrics::counter!("gateway_revalidations_total", "outcome" => outcome).increment(1);
}
