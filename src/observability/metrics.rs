//! Metrics collection.
//!
//! # Metrics
//! - `bridge_invocations_total` (counter): invocations by kind and status
//! - `bridge_store_operations_total` (counter): store calls by backend, op, outcome
//! - `bridge_relay_total` (counter): outbound relays by outcome
//! - `bridge_cycle_failures_total` (counter): cycles that ended in a generic error
//! - `bridge_invocation_duration_seconds` (histogram): end-to-end latency
//!
//! # Design Decisions
//! - Recorded through the `metrics` facade; the embedding runtime decides on an exporter
//! - Labels are low-cardinality: no connection ids, no paths

use std::time::Instant;

/// Record one finished invocation.
pub fn record_invocation(kind: &'static str, status: u16, start: Instant) {
    metrics::counter!(
        "bridge_invocations_total",
        "kind" => kind,
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("bridge_invocation_duration_seconds", "kind" => kind)
        .record(start.elapsed().as_secs_f64());
}

/// Record a connection store call.
pub fn record_store_operation(backend: &'static str, op: &'static str, outcome: &'static str) {
    metrics::counter!(
        "bridge_store_operations_total",
        "backend" => backend,
        "op" => op,
        "outcome" => outcome
    )
    .increment(1);
}

/// Record an outbound relay attempt ("delivered", "gone", "error").
pub fn record_relay(outcome: &'static str) {
    metrics::counter!("bridge_relay_total", "outcome" => outcome).increment(1);
}

/// Record a cycle that ended in a generic failure result.
pub fn record_cycle_failure(protocol: &'static str) {
    metrics::counter!("bridge_cycle_failures_total", "protocol" => protocol).increment(1);
}
