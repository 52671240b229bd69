//! # Homeserve Testing
//!
//! Testing utilities and helpers for the Homeserve booking backend.
//!
//! This crate provides:
//! - Deterministic implementations of the Environment traits (clocks, code generator)
//! - An event bus that records every publish and can be told to fail
//! - The `ReducerTest` Given-When-Then harness and effect assertions
//!
//! ## Example
//!
//! ```ignore
//! use homeserve_testing::{ManualClock, ScriptedCodeGenerator, test_clock};
//!
//! let clock = ManualClock::new(test_clock().now());
//! let codes = ScriptedCodeGenerator::new(["4821"]);
//! let env = BookingEnvironment::new(Arc::new(clock.clone()), Arc::new(codes), policy);
//! clock.advance(chrono::Duration::minutes(5));
//! ```

use chrono::{DateTime, Utc};
use homeserve_core::environment::Clock;

pub mod reducer_test;

/// Mock implementations of Environment traits and infrastructure
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use homeserve_core::environment::CodeGenerator;
    use homeserve_core::event::SerializedEvent;
    use homeserve_core::event_bus::{EventBus, EventBusError, EventStream};
    use homeserve_runtime::InMemoryEventBus;
    use std::collections::VecDeque;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex, PoisonError};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use homeserve_testing::mocks::FixedClock;
    /// use homeserve_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when a test moves it.
    ///
    /// Clones share the same time, so a test can keep one handle and give
    /// another to the code under test.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Create a clock starting at `time`
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Set the current time
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner) = time;
        }

        /// Move the current time forward (or backward for a negative delta)
        pub fn advance(&self, delta: chrono::Duration) {
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            *time += delta;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Code generator that hands out a fixed script of codes.
    ///
    /// Once the script is exhausted it falls back to a counter padded to
    /// the requested width (`0000`, `0001`, ...).
    #[derive(Debug, Default)]
    pub struct ScriptedCodeGenerator {
        script: Mutex<VecDeque<String>>,
        fallback: AtomicUsize,
    }

    impl ScriptedCodeGenerator {
        /// Create a generator that returns `codes` in order
        #[must_use]
        pub fn new<I, S>(codes: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            Self {
                script: Mutex::new(codes.into_iter().map(Into::into).collect()),
                fallback: AtomicUsize::new(0),
            }
        }
    }

    impl CodeGenerator for ScriptedCodeGenerator {
        fn numeric_code(&self, digits: u8) -> String {
            if let Some(code) = self
                .script
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front()
            {
                return code;
            }
            let n = self.fallback.fetch_add(1, Ordering::SeqCst);
            format!("{n:0width$}", width = usize::from(digits))
        }
    }

    /// Event bus that records every publish and delegates delivery to an
    /// [`InMemoryEventBus`].
    ///
    /// `fail_next(n)` makes the next `n` publishes fail without delivering.
    #[derive(Debug, Default)]
    pub struct RecordingEventBus {
        inner: InMemoryEventBus,
        published: Mutex<Vec<(String, SerializedEvent)>>,
        failures_left: AtomicUsize,
    }

    impl RecordingEventBus {
        /// Create an empty recording bus
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Make the next `count` publishes fail
        pub fn fail_next(&self, count: usize) {
            self.failures_left.store(count, Ordering::SeqCst);
        }

        /// All successful publishes so far, in order
        #[must_use]
        pub fn published(&self) -> Vec<(String, SerializedEvent)> {
            self.published
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        /// Event types published to `topic`, in order
        #[must_use]
        pub fn event_types_on(&self, topic: &str) -> Vec<String> {
            self.published()
                .into_iter()
                .filter(|(t, _)| t == topic)
                .map(|(_, event)| event.event_type)
                .collect()
        }

        fn take_failure(&self) -> bool {
            self.failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok()
        }
    }

    impl EventBus for RecordingEventBus {
        fn publish(
            &self,
            topic: &str,
            event: &SerializedEvent,
        ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
            if self.take_failure() {
                let err = EventBusError::PublishFailed {
                    topic: topic.to_string(),
                    reason: "injected failure".to_string(),
                };
                return Box::pin(async move { Err(err) });
            }
            self.published
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((topic.to_string(), event.clone()));
            self.inner.publish(topic, event)
        }

        fn subscribe(
            &self,
            topics: &[&str],
        ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>> {
            self.inner.subscribe(topics)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, ManualClock, RecordingEventBus, ScriptedCodeGenerator, test_clock};
pub use reducer_test::{ReducerTest, assertions};
