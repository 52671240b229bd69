//! Prometheus metrics for observability and monitoring.
//!
//! This module provides metric collection for:
//! - Booking commands (outcome and latency)
//! - Optimistic-concurrency conflicts
//! - OTP verification failures
//! - Event bus publish/subscribe
//! - Retries
//!
//! # Example
//!
//! ```rust,no_run
//! use homeserve_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new();
//! server.start()?;
//!
//! // Serve `server.render()` from a `/metrics` route.
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other crates
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

/// Prometheus metrics recorder.
///
/// Installs the global recorder and renders the exposition text on demand.
/// The HTTP endpoint itself is served by the web layer.
#[derive(Default)]
pub struct MetricsServer {
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new, not yet started, metrics recorder.
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Register metric descriptions and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// If a recorder is already installed (e.g. by another test), this logs a
    /// warning and leaves `handle()` as `None`.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!("Prometheus metrics recorder installed");
                Ok(())
            },
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already") {
                    tracing::warn!(
                        "Metrics recorder already initialized, skipping re-initialization"
                    );
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            },
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if the recorder hasn't been installed by this instance.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn register_metrics() {
    // Booking commands
    describe_counter!(
        "booking_commands_total",
        "Total number of booking commands, labelled by command and outcome"
    );
    describe_histogram!(
        "booking_command_duration_seconds",
        "Time taken to execute a booking command end to end"
    );
    describe_counter!(
        "booking_cas_conflicts_total",
        "Saves rejected because the booking version moved on"
    );
    describe_counter!(
        "booking_otp_failures_total",
        "OTP verifications that did not match"
    );

    // Event bus
    describe_counter!(
        "event_bus_messages_published_total",
        "Total number of messages published to event bus"
    );
    describe_counter!(
        "event_bus_publish_errors_total",
        "Total number of publish errors"
    );
    describe_counter!(
        "event_bus_subscriber_lag_total",
        "Events dropped because a subscriber fell behind"
    );
    describe_histogram!(
        "event_bus_publish_duration_seconds",
        "Time taken to publish messages"
    );

    // Dead letter queue
    describe_gauge!("dlq.size", "Notifications waiting for redelivery");
    describe_counter!("dlq.pushed", "Notifications parked after failed delivery");
    describe_counter!("dlq.dropped", "Parked notifications dropped at capacity");

    // Retries
    describe_counter!("retry_attempts_total", "Total number of retry attempts");
    describe_counter!("retry_successes_total", "Operations that succeeded after a retry");
    describe_counter!("retry_exhausted_total", "Operations that exhausted their retries");
}

/// Booking command metrics recorder.
pub struct BookingMetrics;

impl BookingMetrics {
    /// Record a finished command.
    pub fn record_command(command: &'static str, outcome: &'static str, duration: Duration) {
        counter!("booking_commands_total", "command" => command, "outcome" => outcome).increment(1);
        histogram!("booking_command_duration_seconds", "command" => command)
            .record(duration.as_secs_f64());
    }

    /// Record a rejected compare-and-set save.
    pub fn record_conflict() {
        counter!("booking_cas_conflicts_total").increment(1);
    }

    /// Record an OTP mismatch.
    pub fn record_otp_failure() {
        counter!("booking_otp_failures_total").increment(1);
    }
}

/// Event bus metrics recorder.
pub struct EventBusMetrics;

impl EventBusMetrics {
    /// Record a message publish.
    pub fn record_publish(duration: Duration) {
        counter!("event_bus_messages_published_total").increment(1);
        histogram!("event_bus_publish_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a publish error.
    pub fn record_publish_error() {
        counter!("event_bus_publish_errors_total").increment(1);
    }

    /// Record events skipped by a lagging subscriber.
    pub fn record_lag(skipped: u64) {
        counter!("event_bus_subscriber_lag_total").increment(skipped);
    }
}

/// Retry metrics recorder.
pub struct RetryMetrics;

impl RetryMetrics {
    /// Record a retry attempt.
    pub fn record_attempt() {
        counter!("retry_attempts_total").increment(1);
    }

    /// Record a successful retry.
    pub fn record_success() {
        counter!("retry_successes_total").increment(1);
    }

    /// Record exhausted retries.
    pub fn record_exhausted() {
        counter!("retry_exhausted_total").increment(1);
    }
}
