//! Event bus abstraction for pushing booking notifications to subscribers.
//!
//! The [`EventBus`] trait is the only contract the booking engine has with the
//! real-time transport. The engine publishes after a state change has been
//! persisted; views subscribe to the topic of the booking they display.
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌────────────────┐
//! │   Command   │ ──► │   Reducer    │ ──► │ Save (CAS on   │
//! └─────────────┘     └──────────────┘     │ version)       │
//!                                          └───────┬────────┘
//!                                                  │
//!                                                  ▼
//!                                          ┌────────────────┐
//!                                          │ Publish to bus │ ◄── at-least-once
//!                                          └───────┬────────┘
//!                                             ┌────┴────┐
//!                                             ▼         ▼
//!                                        customer   professional
//!                                        tracker    job view
//! ```
//!
//! # Key Principles
//!
//! - **Persist first**: a notification is never published for a change that was not saved
//! - **At-least-once delivery**: subscribers may see the same notification twice
//! - **Ordered per topic**: notifications for one booking arrive in version order
//!
//! # Topic Naming Convention
//!
//! One topic per booking: `booking.{booking_id}`.

use crate::event::SerializedEvent;
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during event bus operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventBusError {
    /// Failed to publish an event to a topic
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe to topics
    #[error("Subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that failed to subscribe
        topics: Vec<String>,
        /// The reason for failure
        reason: String,
    },

    /// A subscriber fell behind and the bus dropped events for it
    #[error("Subscriber lagged on topic '{topic}', {skipped} events skipped")]
    Lagged {
        /// Topic the subscriber lagged on
        topic: String,
        /// Number of events that were dropped
        skipped: u64,
    },

    /// Topic name is empty or malformed
    #[error("Invalid topic: {0}")]
    InvalidTopic(String),
}

/// Stream of events from subscriptions.
///
/// Each item is either an event or a delivery error (for example
/// [`EventBusError::Lagged`]). A lag error is not fatal; the stream keeps
/// yielding newer events after it.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<SerializedEvent, EventBusError>> + Send>>;

/// Trait for event bus implementations.
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
/// so the engine can hold it as `Arc<dyn EventBus>`.
pub trait EventBus: Send + Sync {
    /// Publish an event to a topic.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::PublishFailed`] if the publish operation fails
    /// and [`EventBusError::InvalidTopic`] for an empty topic.
    fn publish(
        &self,
        topic: &str,
        event: &SerializedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>>;

    /// Subscribe to one or more topics and receive a stream of events.
    ///
    /// Only events published after the subscription is established are
    /// delivered.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SubscriptionFailed`] if subscription fails.
    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>>;
}
