//! Metrics definitions for key rotation.
//!
//! All metrics follow Prometheus naming conventions:
//! - `key_rotation_` prefix
//! - `_total` suffix for counters
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `trigger`: 3 values (bootstrap, scheduled, retry)
//! - `status`: 2 values (success, error)
//! - `reason`: 2 values (superseded, shutdown)

use metrics::{counter, gauge};

/// Record a publish attempt.
///
/// Metric: `key_rotation_publish_attempts_total`
/// Labels: `trigger`
pub fn record_publish_attempt(trigger: &'static str) {
    counter!("key_rotation_publish_attempts_total", "trigger" => trigger).increment(1);
}

/// Record the terminal outcome of a publish.
///
/// Metric: `key_rotation_publish_results_total`
/// Labels: `status`
pub fn record_publish_result(status: &'static str) {
    counter!("key_rotation_publish_results_total", "status" => status).increment(1);
}

/// Record a publish cancelled before it completed.
///
/// Metric: `key_rotation_publish_cancelled_total`
/// Labels: `reason`
pub fn record_publish_cancelled(reason: &'static str) {
    counter!("key_rotation_publish_cancelled_total", "reason" => reason).increment(1);
}

/// Record an escalation to the fatal handler.
///
/// Metric: `key_rotation_fatal_total`
pub fn record_fatal_publish_failure() {
    counter!("key_rotation_fatal_total").increment(1);
}

/// Record when a key last became active.
///
/// Metric: `key_rotation_last_success_timestamp`
#[allow(clippy::cast_precision_loss)]
pub fn set_last_rotation_success(timestamp_secs: i64) {
    gauge!("key_rotation_last_success_timestamp").set(timestamp_secs as f64);
}
