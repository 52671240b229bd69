//! The booking engine: runs commands against storage and the event bus.
//!
//! For every command the engine
//!
//! 1. takes the booking's lock, so commands on one booking run one at a time,
//! 2. loads the booking, runs the reducer and saves the result with
//!    compare-and-set, re-running on a version conflict,
//! 3. publishes the resulting notifications while still holding the lock,
//!    after any notification still parked for the same booking,
//! 4. parks notifications the bus refused in a dead letter queue.
//!
//! The locked section runs on its own task. A caller that goes away mid
//! command does not stop the save, the publish or the lock release.
//!
//! Different bookings never wait on each other.

use crate::actions::BookingAction;
use crate::error::BookingError;
use crate::notification::{BookingNotification, NotificationStream, topic_for};
use crate::otp::OtpCode;
use crate::reducer::{BookingEnvironment, BookingReducer, BookingState};
use crate::repository::{BookingFilter, BookingRepository};
use crate::types::{Actor, Booking, BookingId, Money, PaymentMethod, ProfessionalId, Slot};
use crate::view::{BookingView, can_view};
use futures::StreamExt;
use homeserve_core::effect::Effect;
use homeserve_core::event::SerializedEvent;
use homeserve_core::event_bus::{EventBus, EventBusError};
use homeserve_core::reducer::Reducer;
use homeserve_core::version::Version;
use homeserve_runtime::metrics::BookingMetrics;
use homeserve_runtime::retry::{retry_with_backoff, retry_with_predicate};
use homeserve_runtime::{DeadLetterQueue, HealthCheck, HealthReport, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::OwnedMutexGuard;
use tracing::Instrument;

/// A notification that could not be delivered
#[derive(Clone, Debug)]
pub struct ParkedNotification {
    /// Booking the notification is about
    pub booking_id: BookingId,
    /// Topic it was published to
    pub topic: String,
    /// The envelope
    pub event: SerializedEvent,
}

/// Everything a customer supplies to request a service
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBooking {
    /// Professional the request is addressed to, if any
    #[serde(default)]
    pub requested_professional: Option<ProfessionalId>,
    /// Service name
    pub service: String,
    /// Service address
    pub address: String,
    /// Requested slot
    pub slot: Slot,
    /// Agreed price
    pub price: Money,
    /// Payment method
    pub payment_method: PaymentMethod,
}

/// Result of one load-reduce-save round
struct Committed {
    booking: Option<Booking>,
    effects: Vec<Effect>,
    error: Option<BookingError>,
}

type LockTable = HashMap<BookingId, Arc<tokio::sync::Mutex<()>>>;

/// One booking's lock, held for as long as this value lives.
///
/// Dropping it releases the lock and removes the table entry once no other
/// command is waiting for it.
struct BookingLock {
    table: Arc<Mutex<LockTable>>,
    id: BookingId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for BookingLock {
    fn drop(&mut self) {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        drop(self.guard.take());
        if table.get(&self.id).is_some_and(|held| Arc::strong_count(held) == 1) {
            table.remove(&self.id);
        }
    }
}

/// Runs booking commands with per-booking serialization, optimistic
/// concurrency and ordered notification delivery.
///
/// Clones share the store, the bus, the lock table and the dead letter queue.
#[derive(Clone)]
pub struct BookingEngine {
    reducer: BookingReducer,
    env: BookingEnvironment,
    repository: Arc<dyn BookingRepository>,
    bus: Arc<dyn EventBus>,
    conflict_retry: RetryPolicy,
    publish_retry: RetryPolicy,
    locks: Arc<Mutex<LockTable>>,
    dead_letters: DeadLetterQueue<ParkedNotification>,
}

impl BookingEngine {
    /// Create an engine with default retry policies and a 1000-entry DLQ
    #[must_use]
    pub fn new(
        env: BookingEnvironment,
        repository: Arc<dyn BookingRepository>,
        bus: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            reducer: BookingReducer::new(),
            env,
            repository,
            bus,
            conflict_retry: RetryPolicy::builder()
                .max_retries(5)
                .initial_delay(Duration::from_millis(5))
                .max_delay(Duration::from_millis(200))
                .build(),
            publish_retry: RetryPolicy::builder()
                .max_retries(2)
                .initial_delay(Duration::from_millis(20))
                .max_delay(Duration::from_millis(500))
                .build(),
            locks: Arc::new(Mutex::new(HashMap::new())),
            dead_letters: DeadLetterQueue::default(),
        }
    }

    /// Set how version conflicts are retried
    #[must_use]
    pub fn with_conflict_retry(mut self, policy: RetryPolicy) -> Self {
        self.conflict_retry = policy;
        self
    }

    /// Set how failed publishes are retried before parking them
    #[must_use]
    pub fn with_publish_retry(mut self, policy: RetryPolicy) -> Self {
        self.publish_retry = policy;
        self
    }

    /// Use `dead_letters` for undeliverable notifications
    #[must_use]
    pub fn with_dead_letter_queue(
        mut self,
        dead_letters: DeadLetterQueue<ParkedNotification>,
    ) -> Self {
        self.dead_letters = dead_letters;
        self
    }

    /// The reducer environment (clock, codes, policy)
    #[must_use]
    pub const fn environment(&self) -> &BookingEnvironment {
        &self.env
    }

    /// Notifications waiting for redelivery
    #[must_use]
    pub const fn dead_letters(&self) -> &DeadLetterQueue<ParkedNotification> {
        &self.dead_letters
    }

    /// Run one command against booking `id`.
    ///
    /// # Errors
    ///
    /// The [`BookingError`] the reducer refused the command with, or
    /// [`BookingError::Conflict`] / [`BookingError::Storage`] from the store.
    #[tracing::instrument(
        skip(self, action),
        fields(command = action.name(), role = %action.actor().role())
    )]
    pub async fn execute(
        &self,
        id: BookingId,
        action: BookingAction,
    ) -> Result<Booking, BookingError> {
        if let BookingAction::CreateBooking { booking_id, .. } = &action {
            if *booking_id != id {
                return Err(BookingError::validation(
                    "booking_id",
                    "does not match the target booking",
                ));
            }
        }

        let engine = self.clone();
        let task = tokio::spawn(async move { engine.run(id, action).await }.in_current_span());
        task.await.unwrap_or_else(|err| {
            tracing::error!(booking_id = %id, error = %err, "booking command task failed");
            Err(BookingError::Storage(format!("booking command task failed: {err}")))
        })
    }

    async fn run(self, id: BookingId, action: BookingAction) -> Result<Booking, BookingError> {
        let started = Instant::now();
        let command = action.name();

        let result = {
            let _lock = self.lock(id).await;
            self.execute_locked(id, &action).await
        };

        let outcome = match &result {
            Ok(_) => "ok",
            Err(err) => err.kind().code(),
        };
        BookingMetrics::record_command(command, outcome, started.elapsed());
        match &result {
            Ok(booking) => tracing::info!(
                booking_id = %id,
                status = %booking.status,
                version = booking.version.value(),
                "booking command applied"
            ),
            Err(err) => tracing::info!(booking_id = %id, error = %err, "booking command refused"),
        }
        result
    }

    async fn execute_locked(
        &self,
        id: BookingId,
        action: &BookingAction,
    ) -> Result<Booking, BookingError> {
        let committed = retry_with_predicate(
            &self.conflict_retry,
            || self.commit(id, action.clone()),
            |err| *err == BookingError::Conflict,
        )
        .await?;

        for (topic, event) in committed.effects.iter().filter_map(Effect::publication) {
            self.publish_in_order(id, topic, event).await;
        }

        match committed.error {
            Some(err) => {
                if matches!(err, BookingError::InvalidOtp { .. }) {
                    BookingMetrics::record_otp_failure();
                }
                Err(err)
            },
            None => committed.booking.ok_or(BookingError::NotFound),
        }
    }

    /// Load, reduce, and save if anything changed
    async fn commit(
        &self,
        id: BookingId,
        action: BookingAction,
    ) -> Result<Committed, BookingError> {
        let stored = self.repository.load(id).await?;
        let expected = stored.as_ref().map_or(Version::INITIAL, |booking| booking.version);
        let mut state = stored.map_or_else(BookingState::new, BookingState::from_booking);

        let effects = self.reducer.reduce(&mut state, action, &self.env);

        if state.version() != expected {
            if let Some(booking) = state.booking.as_ref() {
                if let Err(err) = self.repository.save(booking, expected).await {
                    let err = BookingError::from(err);
                    if err == BookingError::Conflict {
                        BookingMetrics::record_conflict();
                        tracing::debug!(booking_id = %id, %expected, "version conflict, reloading");
                    }
                    return Err(err);
                }
            }
        }

        Ok(Committed {
            booking: state.booking,
            effects: effects.into_vec(),
            error: state.last_error,
        })
    }

    /// Publish `event` after whatever is still parked for booking `id`.
    ///
    /// Caller holds the booking's lock. While older notifications cannot be
    /// delivered, `event` is parked behind them without a publish attempt.
    async fn publish_in_order(&self, id: BookingId, topic: &str, event: &SerializedEvent) {
        let (_, caught_up) = self.flush_parked(id).await;
        if !caught_up {
            tracing::warn!(
                booking_id = %id,
                event_type = %event.event_type,
                "earlier notifications still parked, parking behind them"
            );
            self.park(id, topic, event, "earlier notification still parked".to_string(), 0);
            return;
        }

        let delivered =
            retry_with_backoff(&self.publish_retry, || self.bus.publish(topic, event)).await;
        if let Err(err) = delivered {
            tracing::error!(
                topic,
                event_type = %event.event_type,
                error = %err,
                "parking undeliverable notification"
            );
            self.park(id, topic, event, err.to_string(), self.publish_retry.max_retries + 1);
        }
    }

    /// Republish the notifications parked for booking `id`, oldest first.
    ///
    /// Caller holds the booking's lock. Stops at the first failure and parks
    /// the rest again in their original order. Returns how many were
    /// delivered and whether nothing is left parked for `id`.
    async fn flush_parked(&self, id: BookingId) -> (usize, bool) {
        let mut backlog = self
            .dead_letters
            .take_matching(|parked| parked.booking_id == id)
            .into_iter();
        let mut delivered = 0;
        let mut failed = None;

        for letter in backlog.by_ref() {
            let parked = &letter.payload;
            match self.bus.publish(&parked.topic, &parked.event).await {
                Ok(()) => delivered += 1,
                Err(err) => {
                    failed = Some((letter, err));
                    break;
                },
            }
        }

        let Some((letter, err)) = failed else {
            return (delivered, true);
        };
        tracing::warn!(booking_id = %id, error = %err, "redelivery failed");
        self.dead_letters
            .push(letter.payload, err.to_string(), letter.attempts + 1);
        for rest in backlog {
            self.dead_letters
                .push(rest.payload, rest.error_message, rest.attempts);
        }
        (delivered, false)
    }

    fn park(
        &self,
        id: BookingId,
        topic: &str,
        event: &SerializedEvent,
        error: String,
        attempts: usize,
    ) {
        self.dead_letters.push(
            ParkedNotification {
                booking_id: id,
                topic: topic.to_string(),
                event: event.clone(),
            },
            error,
            attempts,
        );
    }

    async fn lock(&self, id: BookingId) -> BookingLock {
        let mutex = {
            let mut table = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(table.entry(id).or_default())
        };
        let mut lock = BookingLock {
            table: Arc::clone(&self.locks),
            id,
            guard: None,
        };
        lock.guard = Some(mutex.lock_owned().await);
        lock
    }

    /// Bookings with a lock entry right now
    #[must_use]
    pub fn active_locks(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    // ========== Commands ==========

    /// Customer requests a service
    ///
    /// # Errors
    ///
    /// [`BookingError::Validation`] for bad input or a non-customer actor.
    pub async fn create(&self, actor: Actor, request: NewBooking) -> Result<Booking, BookingError> {
        let booking_id = BookingId::new();
        self.execute(
            booking_id,
            BookingAction::CreateBooking {
                actor,
                booking_id,
                requested_professional: request.requested_professional,
                service: request.service,
                address: request.address,
                slot: request.slot,
                price: request.price,
                payment_method: request.payment_method,
            },
        )
        .await
    }

    /// Professional claims a pending booking
    ///
    /// # Errors
    ///
    /// [`BookingError::AlreadyClaimed`] if another professional got there first.
    pub async fn accept(&self, id: BookingId, actor: Actor) -> Result<Booking, BookingError> {
        self.execute(id, BookingAction::AcceptBooking { actor }).await
    }

    /// Professional declines a pending booking
    ///
    /// # Errors
    ///
    /// [`BookingError::IllegalTransition`] unless the booking is pending and open to `actor`.
    pub async fn reject(
        &self,
        id: BookingId,
        actor: Actor,
        reason: Option<String>,
    ) -> Result<Booking, BookingError> {
        self.execute(id, BookingAction::RejectBooking { actor, reason })
            .await
    }

    /// Customer or assigned professional calls the booking off
    ///
    /// # Errors
    ///
    /// [`BookingError::IllegalTransition`] once work started or the booking is closed.
    pub async fn cancel(
        &self,
        id: BookingId,
        actor: Actor,
        reason: Option<String>,
    ) -> Result<Booking, BookingError> {
        self.execute(id, BookingAction::CancelBooking { actor, reason })
            .await
    }

    /// Customer moves the slot
    ///
    /// # Errors
    ///
    /// [`BookingError::Validation`] on field `slot` inside the lead time.
    pub async fn reschedule(
        &self,
        id: BookingId,
        actor: Actor,
        slot: Slot,
    ) -> Result<Booking, BookingError> {
        self.execute(id, BookingAction::RescheduleBooking { actor, slot })
            .await
    }

    /// Customer fetches the start-of-work code, issuing one if needed
    ///
    /// # Errors
    ///
    /// [`BookingError::NotInAcceptedState`] unless the booking is accepted.
    pub async fn issue_otp(&self, id: BookingId, actor: Actor) -> Result<OtpCode, BookingError> {
        let booking = self.execute(id, BookingAction::IssueOtp { actor }).await?;
        current_code(&booking)
    }

    /// Customer replaces the start-of-work code
    ///
    /// # Errors
    ///
    /// [`BookingError::NotInAcceptedState`] unless the booking is accepted.
    pub async fn regenerate_otp(
        &self,
        id: BookingId,
        actor: Actor,
    ) -> Result<OtpCode, BookingError> {
        let booking = self
            .execute(id, BookingAction::RegenerateOtp { actor })
            .await?;
        current_code(&booking)
    }

    /// Assigned professional signals arrival
    ///
    /// # Errors
    ///
    /// [`BookingError::NotInAcceptedState`] unless the booking is accepted.
    pub async fn request_otp_disclosure(
        &self,
        id: BookingId,
        actor: Actor,
    ) -> Result<Booking, BookingError> {
        self.execute(id, BookingAction::RequestOtpDisclosure { actor })
            .await
    }

    /// Assigned professional enters the code and starts work
    ///
    /// # Errors
    ///
    /// [`BookingError::InvalidOtp`], [`BookingError::OtpLocked`] or
    /// [`BookingError::OtpExpired`] when the code is not accepted.
    pub async fn start(
        &self,
        id: BookingId,
        actor: Actor,
        otp: impl Into<String>,
    ) -> Result<Booking, BookingError> {
        self.execute(
            id,
            BookingAction::StartBooking {
                actor,
                otp: otp.into(),
            },
        )
        .await
    }

    /// Assigned professional marks the work done
    ///
    /// # Errors
    ///
    /// [`BookingError::IllegalTransition`] unless work is ongoing.
    pub async fn complete(&self, id: BookingId, actor: Actor) -> Result<Booking, BookingError> {
        self.execute(id, BookingAction::CompleteBooking { actor })
            .await
    }

    /// Customer rates a completed booking, once
    ///
    /// # Errors
    ///
    /// [`BookingError::Validation`] for a bad rating or review,
    /// [`BookingError::IllegalTransition`] for a second rating.
    pub async fn rate(
        &self,
        id: BookingId,
        actor: Actor,
        rating: u8,
        review: Option<String>,
    ) -> Result<Booking, BookingError> {
        self.execute(
            id,
            BookingAction::RateBooking {
                actor,
                rating,
                review,
            },
        )
        .await
    }

    // ========== Queries ==========

    /// One booking as `viewer` may see it
    ///
    /// # Errors
    ///
    /// [`BookingError::NotFound`] if it does not exist or `viewer` may not see it.
    pub async fn get(&self, id: BookingId, viewer: &Actor) -> Result<BookingView, BookingError> {
        let booking = self.load_visible(id, viewer).await?;
        Ok(BookingView::new(&booking, viewer))
    }

    /// Bookings passing `filter` that `viewer` may see, earliest slot first
    ///
    /// # Errors
    ///
    /// [`BookingError::Storage`] when the store fails.
    pub async fn list(
        &self,
        filter: &BookingFilter,
        viewer: &Actor,
    ) -> Result<Vec<BookingView>, BookingError> {
        let mut filter = filter.clone();
        if let Actor::Customer(customer) = viewer {
            filter.customer = Some(*customer);
        }
        let bookings = self.repository.list(&filter).await?;
        Ok(bookings
            .iter()
            .filter(|booking| can_view(booking, viewer))
            .map(|booking| BookingView::new(booking, viewer))
            .collect())
    }

    /// Live notifications for one booking, redacted for `viewer`.
    ///
    /// Items at or below the last version already yielded are dropped, so
    /// the stream only ever moves forward.
    ///
    /// # Errors
    ///
    /// [`BookingError::NotFound`] if `viewer` may not see the booking,
    /// [`BookingError::Storage`] if the bus refuses the subscription.
    pub async fn subscribe(
        &self,
        id: BookingId,
        viewer: Actor,
    ) -> Result<NotificationStream, BookingError> {
        self.load_visible(id, &viewer).await?;
        let topic = topic_for(id);
        let stream = self
            .bus
            .subscribe(&[topic.as_str()])
            .await
            .map_err(|err| BookingError::Storage(err.to_string()))?;

        let mut last_version = 0;
        Ok(Box::pin(stream.filter_map(move |item| {
            let decoded = item.and_then(|event| {
                event.decode::<BookingNotification>().map_err(|err| {
                    EventBusError::SubscriptionFailed {
                        topics: vec![topic.clone()],
                        reason: err.to_string(),
                    }
                })
            });
            let next = match decoded {
                Ok(notification) if notification.version <= last_version => {
                    tracing::debug!(
                        booking_id = %id,
                        version = notification.version,
                        last_version,
                        "dropping stale notification"
                    );
                    None
                },
                Ok(notification) => {
                    last_version = notification.version;
                    Some(Ok(notification.redacted_for(&viewer)))
                },
                Err(err) => Some(Err(err)),
            };
            futures::future::ready(next)
        })))
    }

    async fn load_visible(&self, id: BookingId, viewer: &Actor) -> Result<Booking, BookingError> {
        self.repository
            .load(id)
            .await?
            .filter(|booking| can_view(booking, viewer))
            .ok_or(BookingError::NotFound)
    }

    // ========== Operations ==========

    /// Try once more to deliver every parked notification.
    ///
    /// Each booking's backlog is flushed under that booking's lock, oldest
    /// first, so redelivery never overtakes a newer notification. Returns
    /// how many were delivered. Failures go back in the queue.
    pub async fn redeliver_dead_letters(&self) -> usize {
        let mut seen = HashSet::new();
        let bookings: Vec<BookingId> = self
            .dead_letters
            .scan(|parked| parked.booking_id)
            .into_iter()
            .filter(|id| seen.insert(*id))
            .collect();

        let mut delivered = 0;
        for id in bookings {
            let _lock = self.lock(id).await;
            delivered += self.flush_parked(id).await.0;
        }
        if delivered > 0 {
            tracing::info!(delivered, "redelivered parked notifications");
        }
        delivered
    }

    /// Health of the store and the notification queue
    pub async fn health(&self) -> HealthReport {
        let store = match self.repository.load(BookingId::new()).await {
            Ok(_) => HealthCheck::healthy("booking_store"),
            Err(err) => HealthCheck::unhealthy("booking_store", err.to_string()),
        };
        HealthReport::new(
            vec![store, self.dead_letters.health_check("notification_dlq")],
            self.env.clock.now(),
        )
    }
}

fn current_code(booking: &Booking) -> Result<OtpCode, BookingError> {
    booking
        .otp
        .as_ref()
        .map(|otp| otp.code.clone())
        .ok_or(BookingError::NotInAcceptedState {
            status: booking.status,
        })
}
