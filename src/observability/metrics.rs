//! Metrics collection and exposition.
//!
//! # Metrics
//! - `reqlog_requests_total` (counter): instrumented requests by method, status
//! - `reqlog_request_duration_seconds` (histogram): handler latency
//! - `reqlog_entries_persisted_total` (counter): entries written, by sink
//! - `reqlog_entries_dropped_total` (counter): entries dropped on a full buffer
//! - `reqlog_entries_failed_total` (counter): entries the destination rejected

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter with an HTTP listener on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    ::metrics::counter!(
        "reqlog_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    ::metrics::histogram!("reqlog_request_duration_seconds", "method" => method.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_entry_persisted(sink: &'static str) {
    ::metrics::counter!("reqlog_entries_persisted_total", "sink" => sink).increment(1);
}

pub fn record_entry_dropped(sink: &'static str) {
    ::metrics::counter!("reqlog_entries_dropped_total", "sink" => sink).increment(1);
}

pub fn record_entry_failed(sink: &'static str) {
    ::metrics::counter!("reqlog_entries_failed_total", "sink" => sink).increment(1);
}
