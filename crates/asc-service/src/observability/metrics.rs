//! Metrics definitions for the Audio Session Controller.
//!
//! All metrics follow Prometheus naming conventions:
//! - `asc_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded by code:
//! - `mode`: 2 values (routed, peer_to_peer)
//! - `operation`: bounded by the operation names in this crate (~25 values)
//! - `status`: success or an [`AscError::label`] value (~6 values)
//! - `action`: bounded playback actions (~7 values)
//! - `worker_id`: bounded by `ASC_WORKER_COUNT`
//!
//! [`AscError::label`]: crate::errors::AscError::label

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus recorder and return the handle used to
/// render `/metrics`.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Operations include an engine round trip plus a store write
        .set_buckets_for_metric(
            Matcher::Prefix("asc_operation".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000,
            ],
        )
        .map_err(|e| format!("Failed to set operation duration buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

/// Set the number of live sessions held in memory.
///
/// Metric: `asc_sessions_active`
pub fn set_sessions_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("asc_sessions_active").set(count as f64);
}

/// Record a session creation.
///
/// Metric: `asc_sessions_created_total`
/// Labels: `mode` (routed, peer_to_peer)
pub fn record_session_created(mode: &'static str) {
    counter!("asc_sessions_created_total", "mode" => mode).increment(1);
}

/// Record a round-robin worker assignment.
///
/// Metric: `asc_worker_assignments_total`
/// Labels: `worker_id`
pub fn record_worker_assignment(worker_id: u32) {
    counter!("asc_worker_assignments_total", "worker_id" => worker_id.to_string()).increment(1);
}

/// Record a failed media engine call.
///
/// Metric: `asc_engine_errors_total`
/// Labels: `operation`
pub fn record_engine_error(operation: &'static str) {
    counter!("asc_engine_errors_total", "operation" => operation).increment(1);
}

/// Record the outcome of a participant operation.
///
/// Metric: `asc_participant_operations_total`
/// Labels: `operation`, `status`
pub fn record_participant_operation(operation: &'static str, status: &'static str) {
    counter!(
        "asc_participant_operations_total",
        "operation" => operation,
        "status" => status
    )
    .increment(1);
}

/// Record a playback or playlist action.
///
/// Metric: `asc_playback_actions_total`
/// Labels: `action`
pub fn record_playback_action(action: &'static str) {
    counter!("asc_playback_actions_total", "action" => action).increment(1);
}

/// Record how long an orchestration operation took.
///
/// Metric: `asc_operation_duration_seconds`
/// Labels: `operation`
pub fn record_operation_duration(operation: &'static str, duration: Duration) {
    histogram!("asc_operation_duration_seconds", "operation" => operation)
        .record(duration.as_secs_f64());
}
