//! In-process [`EventBus`] backed by one tokio broadcast channel per topic.
//!
//! Delivery is best-effort to live subscribers only: a publish with nobody
//! listening is dropped, and a subscriber that falls more than `capacity`
//! events behind receives [`EventBusError::Lagged`] and continues from the
//! oldest retained event. Per-topic order is the publish order.

use crate::metrics::EventBusMetrics;
use futures::stream::{self, StreamExt};
use homeserve_core::event::SerializedEvent;
use homeserve_core::event_bus::{EventBus, EventBusError, EventStream};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{PoisonError, RwLock};
use std::time::Instant;
use tokio::sync::broadcast::{self, error::RecvError};

/// Default number of events buffered per topic.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// In-memory publish/subscribe bus.
#[derive(Debug)]
pub struct InMemoryEventBus {
    channels: RwLock<HashMap<String, broadcast::Sender<SerializedEvent>>>,
    capacity: usize,
}

impl InMemoryEventBus {
    /// Create a bus with [`DEFAULT_CHANNEL_CAPACITY`] per topic.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a bus buffering up to `capacity` events per topic.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Number of topics with at least one live subscriber.
    #[must_use]
    pub fn active_topics(&self) -> usize {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|sender| sender.receiver_count() > 0)
            .count()
    }

    /// Number of live subscribers on `topic`.
    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .map_or(0, broadcast::Sender::receiver_count)
    }

    fn receiver_for(&self, topic: &str) -> broadcast::Receiver<SerializedEvent> {
        let mut channels = self.channels.write().unwrap_or_else(PoisonError::into_inner);
        channels.retain(|name, sender| name == topic || sender.receiver_count() > 0);
        channels
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    fn publish_sync(&self, topic: &str, event: &SerializedEvent) -> Result<(), EventBusError> {
        if topic.is_empty() {
            EventBusMetrics::record_publish_error();
            return Err(EventBusError::InvalidTopic(topic.to_string()));
        }

        let started = Instant::now();
        let delivered = self
            .channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .map_or(0, |sender| sender.send(event.clone()).unwrap_or(0));

        EventBusMetrics::record_publish(started.elapsed());
        tracing::trace!(topic, event_type = %event.event_type, delivered, "Published event");
        Ok(())
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

fn topic_stream(topic: String, mut rx: broadcast::Receiver<SerializedEvent>) -> EventStream {
    Box::pin(async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) => yield Ok(event),
                Err(RecvError::Lagged(skipped)) => {
                    EventBusMetrics::record_lag(skipped);
                    tracing::warn!(topic = %topic, skipped, "Subscriber lagged, events skipped");
                    yield Err(EventBusError::Lagged { topic: topic.clone(), skipped });
                },
                Err(RecvError::Closed) => break,
            }
        }
    })
}

impl EventBus for InMemoryEventBus {
    fn publish(
        &self,
        topic: &str,
        event: &SerializedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        let result = self.publish_sync(topic, event);
        Box::pin(async move { result })
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>> {
        let result = if topics.is_empty() || topics.iter().any(|t| t.is_empty()) {
            Err(EventBusError::SubscriptionFailed {
                topics: topics.iter().map(ToString::to_string).collect(),
                reason: "topic names must be non-empty".to_string(),
            })
        } else {
            let mut streams: Vec<EventStream> = topics
                .iter()
                .map(|topic| topic_stream((*topic).to_string(), self.receiver_for(topic)))
                .collect();
            Ok(if streams.len() == 1 {
                streams.remove(0)
            } else {
                stream::select_all(streams).boxed()
            })
        };
        Box::pin(async move { result })
    }
}
