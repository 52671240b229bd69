//! # Homeserve Runtime
//!
//! Runtime building blocks for executing the booking reducer against real
//! infrastructure.
//!
//! ## Core Components
//!
//! - **`InMemoryEventBus`**: in-process pub/sub used for real-time notifications
//! - **Retry**: exponential backoff used to re-run commands after version conflicts
//! - **`DeadLetterQueue`**: parks notifications that could not be delivered
//! - **Health**: component health checks aggregated into a report
//! - **Metrics**: Prometheus recorder and metric helpers

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

/// In-memory event bus
pub mod event_bus;

/// Prometheus metrics for observability
pub mod metrics;

/// Retry logic with exponential backoff
pub mod retry;

pub use event_bus::InMemoryEventBus;
pub use retry::RetryPolicy;

/// Health check status levels
///
/// Indicates the current health state of a component or system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Component is fully operational
    Healthy,

    /// Component is operational but experiencing issues (e.g., a filling DLQ)
    Degraded,

    /// Component is not operational
    Unhealthy,
}

impl HealthStatus {
    /// Check if status is healthy
    #[must_use]
    pub const fn is_healthy(self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// Check if status is unhealthy
    #[must_use]
    pub const fn is_unhealthy(self) -> bool {
        matches!(self, Self::Unhealthy)
    }

    /// Get the worst status between two statuses
    #[must_use]
    pub const fn worst(self, other: Self) -> Self {
        match (self, other) {
            (Self::Unhealthy, _) | (_, Self::Unhealthy) => Self::Unhealthy,
            (Self::Degraded, _) | (_, Self::Degraded) => Self::Degraded,
            _ => Self::Healthy,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Health check result for a component
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    /// Name of the component being checked
    pub component: String,

    /// Current health status
    pub status: HealthStatus,

    /// Optional message providing details
    pub message: Option<String>,

    /// Optional metadata (e.g., queue sizes)
    pub metadata: Vec<(String, String)>,
}

impl HealthCheck {
    fn with_status(
        component: impl Into<String>,
        status: HealthStatus,
        message: Option<String>,
    ) -> Self {
        Self {
            component: component.into(),
            status,
            message,
            metadata: Vec::new(),
        }
    }

    /// Create a healthy check result
    #[must_use]
    pub fn healthy(component: impl Into<String>) -> Self {
        Self::with_status(component, HealthStatus::Healthy, None)
    }

    /// Create a degraded check result
    #[must_use]
    pub fn degraded(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(component, HealthStatus::Degraded, Some(message.into()))
    }

    /// Create an unhealthy check result
    #[must_use]
    pub fn unhealthy(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(component, HealthStatus::Unhealthy, Some(message.into()))
    }

    /// Add metadata to the health check
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.metadata.push((key.into(), value.to_string()));
        self
    }
}

/// Aggregated health report
///
/// Combines multiple health checks into an overall system status.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Overall system status (worst of all checks)
    pub status: HealthStatus,

    /// Individual component checks
    pub checks: Vec<HealthCheck>,

    /// When the report was generated
    pub timestamp: DateTime<Utc>,
}

impl HealthReport {
    /// Create a new health report from checks
    #[must_use]
    pub fn new(checks: Vec<HealthCheck>, timestamp: DateTime<Utc>) -> Self {
        let status = checks
            .iter()
            .map(|c| c.status)
            .fold(HealthStatus::Healthy, HealthStatus::worst);

        Self {
            status,
            checks,
            timestamp,
        }
    }

    /// Check if overall system is healthy
    #[must_use]
    pub const fn is_healthy(&self) -> bool {
        self.status.is_healthy()
    }
}

/// Dead letter queue entry
#[derive(Debug, Clone)]
pub struct DeadLetter<T> {
    /// The failed operation payload
    pub payload: T,

    /// Number of delivery attempts made before parking
    pub attempts: usize,

    /// The error message from the last failure
    pub error_message: String,

    /// When the entry was parked
    pub parked_at: DateTime<Utc>,
}

/// Dead Letter Queue for operations that failed after exhausting retries.
///
/// Bounded and FIFO: when full, the oldest entry is dropped. Thread-safe and
/// cheap to clone (clones share the same queue).
///
/// # Example
///
/// ```
/// use homeserve_runtime::DeadLetterQueue;
///
/// let dlq = DeadLetterQueue::new(10);
/// dlq.push("booking.42".to_string(), "bus unavailable".to_string(), 3);
/// assert_eq!(dlq.len(), 1);
///
/// for entry in dlq.drain() {
///     assert_eq!(entry.attempts, 3);
/// }
/// assert!(dlq.is_empty());
/// ```
#[derive(Debug)]
pub struct DeadLetterQueue<T> {
    queue: Arc<Mutex<VecDeque<DeadLetter<T>>>>,
    max_size: usize,
}

impl<T> DeadLetterQueue<T> {
    /// Create a new dead letter queue holding at most `max_size` entries
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::new())),
            max_size: max_size.max(1),
        }
    }

    /// Park a failed operation. Drops the oldest entry when full.
    pub fn push(&self, payload: T, error_message: String, attempts: usize) {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);

        if queue.len() >= self.max_size {
            queue.pop_front();
            metrics::counter!("dlq.dropped").increment(1);
            tracing::warn!(max_size = self.max_size, "DLQ at capacity, dropping oldest entry");
        }

        queue.push_back(DeadLetter {
            payload,
            attempts,
            error_message,
            parked_at: Utc::now(),
        });

        #[allow(clippy::cast_precision_loss)]
        metrics::gauge!("dlq.size").set(queue.len() as f64);
        metrics::counter!("dlq.pushed").increment(1);

        tracing::warn!(attempts, queue_size = queue.len(), "Operation added to dead letter queue");
    }

    /// Get the current queue size
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Check if the queue is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and return all entries, oldest first
    pub fn drain(&self) -> Vec<DeadLetter<T>> {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        let entries: Vec<_> = queue.drain(..).collect();
        metrics::gauge!("dlq.size").set(0.0);
        entries
    }

    /// Remove and return the entries whose payload matches, oldest first.
    ///
    /// The remaining entries keep their order.
    pub fn take_matching(&self, predicate: impl Fn(&T) -> bool) -> Vec<DeadLetter<T>> {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        let (taken, kept): (Vec<_>, Vec<_>) =
            queue.drain(..).partition(|entry| predicate(&entry.payload));
        *queue = kept.into();

        #[allow(clippy::cast_precision_loss)]
        metrics::gauge!("dlq.size").set(queue.len() as f64);
        taken
    }

    /// Map every parked payload through `f`, oldest first, leaving the queue as is
    pub fn scan<K>(&self, f: impl FnMut(&T) -> K) -> Vec<K> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|entry| &entry.payload)
            .map(f)
            .collect()
    }

    /// Peek at the oldest entry without removing it
    #[must_use]
    pub fn peek(&self) -> Option<DeadLetter<T>>
    where
        T: Clone,
    {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .front()
            .cloned()
    }

    /// Get the maximum queue size
    #[must_use]
    pub const fn max_size(&self) -> usize {
        self.max_size
    }

    /// Report queue pressure as a health check.
    ///
    /// Degraded once the queue is at least 80% full, healthy otherwise.
    #[must_use]
    pub fn health_check(&self, component: &str) -> HealthCheck {
        let len = self.len();
        let check = if len * 5 >= self.max_size * 4 {
            HealthCheck::degraded(component, "dead letter queue near capacity")
        } else {
            HealthCheck::healthy(component)
        };
        check
            .with_metadata("size", len)
            .with_metadata("max_size", self.max_size)
    }
}

impl<T> Clone for DeadLetterQueue<T> {
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
            max_size: self.max_size,
        }
    }
}

impl<T> Default for DeadLetterQueue<T> {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod dlq_tests {
        use super::*;

        #[test]
        fn drops_oldest_at_capacity() {
            let dlq = DeadLetterQueue::new(2);
            dlq.push(1, "a".to_string(), 1);
            dlq.push(2, "b".to_string(), 1);
            dlq.push(3, "c".to_string(), 1);

            let payloads: Vec<_> = dlq.drain().into_iter().map(|e| e.payload).collect();
            assert_eq!(payloads, vec![2, 3]);
        }

        #[test]
        fn clones_share_storage() {
            let dlq = DeadLetterQueue::new(10);
            let other = dlq.clone();
            other.push("x", "boom".to_string(), 4);

            assert_eq!(dlq.len(), 1);
            assert_eq!(dlq.peek().map(|e| e.attempts), Some(4));
        }

        #[test]
        fn take_matching_keeps_the_rest_in_order() {
            let dlq = DeadLetterQueue::new(10);
            for n in 1..=6 {
                dlq.push(n, "down".to_string(), 1);
            }

            let even: Vec<_> = dlq
                .take_matching(|n| n % 2 == 0)
                .into_iter()
                .map(|e| e.payload)
                .collect();
            assert_eq!(even, vec![2, 4, 6]);
            assert_eq!(dlq.scan(|n| *n), vec![1, 3, 5]);
            assert!(dlq.take_matching(|n| *n > 10).is_empty());
            assert_eq!(dlq.len(), 3);
        }

        #[test]
        fn health_degrades_near_capacity() {
            let dlq = DeadLetterQueue::new(5);
            assert!(dlq.health_check("notifier").status.is_healthy());

            for n in 0..4 {
                dlq.push(n, "down".to_string(), 1);
            }
            let check = dlq.health_check("notifier");
            assert_eq!(check.status, HealthStatus::Degraded);
            assert!(check.metadata.contains(&("size".to_string(), "4".to_string())));
        }
    }

    mod health_check_tests {
        use super::*;

        #[test]
        fn worst_status_wins() {
            assert_eq!(
                HealthStatus::Healthy.worst(HealthStatus::Degraded),
                HealthStatus::Degraded
            );
            assert_eq!(
                HealthStatus::Unhealthy.worst(HealthStatus::Degraded),
                HealthStatus::Unhealthy
            );
        }

        #[test]
        fn report_takes_worst_check() {
            let report = HealthReport::new(
                vec![
                    HealthCheck::healthy("repository"),
                    HealthCheck::degraded("notifier", "slow"),
                ],
                Utc::now(),
            );
            assert_eq!(report.status, HealthStatus::Degraded);
            assert!(!report.is_healthy());

            let empty = HealthReport::new(Vec::new(), Utc::now());
            assert!(empty.is_healthy());
        }
    }
}
