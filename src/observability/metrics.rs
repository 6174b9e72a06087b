//! Metrics collection and exposition.
//!
//! # Metrics
//! - `capture_exchanges_total` (counter): exchanges by terminal state
//! - `capture_records_written_total` (counter): successful writes by table
//! - `capture_persist_failures_total` (counter): failed writes by table
//! - `capture_bodies_skipped_total` (counter): bodies replaced by the sentinel
//! - `capture_broadcast_observers` (gauge): connected observers
//! - `capture_observers_dropped_total` (counter): observers evicted as stalled or closed
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Count an exchange reaching a terminal state.
pub fn record_exchange(outcome: &'static str) {
    counter!("capture_exchanges_total", "outcome" => outcome).increment(1);
}

/// Count a store write.
pub fn record_write(table: &'static str, ok: bool) {
    if ok {
        counter!("capture_records_written_total", "table" => table).increment(1);
    } else {
        counter!("capture_persist_failures_total", "table" => table).increment(1);
    }
}

/// Count a body replaced by the skip sentinel.
pub fn record_body_skipped() {
    counter!("capture_bodies_skipped_total").increment(1);
}

/// Track the number of connected observers.
pub fn record_observers(count: usize) {
    gauge!("capture_broadcast_observers").set(count as f64);
}

/// Count an evicted observer.
pub fn record_observer_dropped(reason: &'static str) {
    counter!("capture_observers_dropped_total", "reason" => reason).increment(1);
}
