//! Application state for Axum handlers.

use crate::config::Config;
use homeserve_booking::{BookingEngine, BookingEnvironment, InMemoryBookingRepository};
use homeserve_core::environment::{RandomCodeGenerator, SystemClock};
use homeserve_runtime::metrics::MetricsServer;
use homeserve_runtime::{DeadLetterQueue, InMemoryEventBus};
use std::sync::Arc;

/// Application state shared across all HTTP handlers.
///
/// Cloned per request; everything inside is behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// The booking engine every command and query goes through
    pub engine: Arc<BookingEngine>,
    /// Prometheus recorder, when one is installed
    pub metrics: Option<Arc<MetricsServer>>,
}

impl AppState {
    /// Create state around an existing engine, without metrics.
    #[must_use]
    pub const fn new(engine: Arc<BookingEngine>) -> Self {
        Self {
            engine,
            metrics: None,
        }
    }

    /// Serve `metrics` from `GET /metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<MetricsServer>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Wire an in-memory engine with the system clock and random codes.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let env = BookingEnvironment::new(
            Arc::new(SystemClock),
            Arc::new(RandomCodeGenerator),
            config.booking.policy(),
        );
        let engine = BookingEngine::new(
            env,
            Arc::new(InMemoryBookingRepository::new()),
            Arc::new(InMemoryEventBus::with_capacity(config.notifier.channel_capacity)),
        )
        .with_dead_letter_queue(DeadLetterQueue::new(config.notifier.dlq_max_size));

        Self::new(Arc::new(engine))
    }
}
