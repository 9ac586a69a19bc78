//! Operation metrics for the mirror engine.
//!
//! Metrics go through the `metrics` facade; they are no-ops until the host
//! application installs a recorder.

use std::time::Instant;

/// Records count and latency for one engine operation.
///
/// This function records two metrics for each operation:
/// 1. `mirage_operations_total` - Counter for operation count by status
/// 2. `mirage_operation_duration_ms` - Histogram for operation latency
///
/// # Arguments
///
/// * `operation` - Operation name (e.g., "sync", "remove", "resolve")
/// * `start` - Operation start time from `Instant::now()`
/// * `status` - Operation status ("success" or "error")
pub fn record_operation_metrics(operation: &'static str, start: Instant, status: &'static str) {
    metrics::counter!(
        "mirage_operations_total",
        "operation" => operation,
        "status" => status
    )
    .increment(1);
    metrics::histogram!(
        "mirage_operation_duration_ms",
        "operation" => operation,
        "status" => status
    )
    .record(start.elapsed().as_secs_f64() * 1000.0);
}

/// Maps a result to the status label used by [`record_operation_metrics`].
#[must_use]
pub const fn status_label<T, E>(result: &Result<T, E>) -> &'static str {
    if result.is_ok() { "success" } else { "error" }
}
