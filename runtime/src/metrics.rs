//! Prometheus metrics for reservations and outbox delivery.
//!
//! Recorders are thin wrappers over the `metrics` macros; without an installed
//! recorder they are no-ops. [`install_prometheus`] installs the Prometheus
//! recorder and returns a handle whose `render()` output can be served by the
//! host application.

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Install the Prometheus recorder and register metric descriptions.
///
/// # Errors
///
/// Returns [`MetricsError`] if the exporter cannot be built or a recorder is
/// already installed.
pub fn install_prometheus() -> Result<PrometheusHandle, MetricsError> {
    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
        )
        .map_err(|e| MetricsError::Build(e.to_string()))?
        .install_recorder()
        .map_err(|e| MetricsError::Install(e.to_string()))?;

    describe_metrics();
    tracing::info!("Prometheus metrics recorder installed");
    Ok(handle)
}

/// Register all metric descriptions with the installed recorder.
pub fn describe_metrics() {
    // Reservation Metrics
    describe_counter!(
        "booking_reservations_total",
        "Total number of successful reservations"
    );
    describe_counter!(
        "booking_reservation_conflicts_total",
        "Total number of reservations rejected for overlapping an active booking"
    );
    describe_counter!(
        "booking_transitions_total",
        "Total number of booking status transitions committed"
    );
    describe_counter!(
        "booking_concurrency_conflicts_total",
        "Total number of commits rejected by optimistic concurrency"
    );
    describe_counter!(
        "booking_persistence_errors_total",
        "Total number of commands failed by a storage fault"
    );
    describe_counter!(
        "postgres_commit_conflicts_total",
        "Total number of PostgreSQL commits aborted by a version check, by aggregate"
    );

    // Outbox Metrics
    describe_counter!(
        "outbox_messages_claimed_total",
        "Total number of outbox messages claimed for delivery"
    );
    describe_counter!(
        "outbox_messages_delivered_total",
        "Total number of outbox messages delivered to every subscriber"
    );
    describe_counter!(
        "outbox_messages_failed_total",
        "Total number of delivery attempts that failed"
    );
    describe_counter!(
        "outbox_dispatch_errors_total",
        "Total number of dispatcher ticks that failed to claim or record"
    );
    describe_gauge!(
        "outbox_batch_size",
        "Number of messages in the most recent claimed batch"
    );
    describe_histogram!(
        "outbox_dispatch_duration_seconds",
        "Time taken by one dispatcher tick"
    );
}

/// Reservation command metrics recorder.
pub struct ReservationMetrics;

impl ReservationMetrics {
    /// Record a successful reservation.
    pub fn record_reserved() {
        counter!("booking_reservations_total").increment(1);
    }

    /// Record a reservation rejected for overlap.
    pub fn record_conflict() {
        counter!("booking_reservation_conflicts_total").increment(1);
    }

    /// Record a committed status transition.
    pub fn record_transition(to: &'static str) {
        counter!("booking_transitions_total", "to" => to).increment(1);
    }

    /// Record an optimistic concurrency rejection.
    pub fn record_concurrency_conflict() {
        counter!("booking_concurrency_conflicts_total").increment(1);
    }

    /// Record a storage fault.
    pub fn record_persistence_error() {
        counter!("booking_persistence_errors_total").increment(1);
    }
}

/// Outbox dispatcher metrics recorder.
pub struct DispatchMetrics;

impl DispatchMetrics {
    /// Record a claimed batch.
    #[allow(clippy::cast_precision_loss)]
    pub fn record_claimed(count: usize) {
        counter!("outbox_messages_claimed_total").increment(count as u64);
        gauge!("outbox_batch_size").set(count as f64);
    }

    /// Record the outcome counts of a recorded batch.
    pub fn record_outcomes(delivered: usize, failed: usize) {
        counter!("outbox_messages_delivered_total").increment(delivered as u64);
        counter!("outbox_messages_failed_total").increment(failed as u64);
    }

    /// Record a tick that failed to claim or record.
    pub fn record_error() {
        counter!("outbox_dispatch_errors_total").increment(1);
    }

    /// Record the duration of a tick.
    pub fn record_duration(duration: Duration) {
        histogram!("outbox_dispatch_duration_seconds").record(duration.as_secs_f64());
    }
}
