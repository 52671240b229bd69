//! Engine integration tests.
//!
//! Drives the booking engine end to end against the in-memory store and a
//! recording event bus: the example lifecycles, claim races inside one
//! engine and across engines sharing a store, the OTP gate, notification
//! ordering and redaction, dead letter redelivery, and commands whose
//! caller goes away mid flight.
//!
//! Run with: `cargo test -p homeserve-booking --test engine_integration_test`

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

use chrono::Duration;
use futures::StreamExt;
use homeserve_booking::{
    Actor, Booking, BookingEngine, BookingEnvironment, BookingError, BookingFilter, BookingId,
    BookingPolicy, BookingRepository, CustomerId, InMemoryBookingRepository, Money, NewBooking,
    NotificationKind, PaymentMethod, ProfessionalId, RepositoryError, Role, Slot, Status,
    StatusCategory, topic_for,
};
use homeserve_core::environment::Clock;
use homeserve_core::event::SerializedEvent;
use homeserve_core::event_bus::{EventBus, EventBusError, EventStream};
use homeserve_core::version::Version;
use homeserve_runtime::RetryPolicy;
use homeserve_testing::{ManualClock, RecordingEventBus, ScriptedCodeGenerator, test_clock};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

struct Harness {
    engine: Arc<BookingEngine>,
    clock: ManualClock,
    bus: Arc<RecordingEventBus>,
    customer: CustomerId,
}

fn fast_retry(max_retries: usize) -> RetryPolicy {
    RetryPolicy::builder()
        .max_retries(max_retries)
        .initial_delay(std::time::Duration::from_millis(1))
        .max_delay(std::time::Duration::from_millis(5))
        .build()
}

fn environment(clock: &ManualClock) -> BookingEnvironment {
    BookingEnvironment::new(
        Arc::new(clock.clone()),
        Arc::new(ScriptedCodeGenerator::new(["4821", "7310", "5096"])),
        BookingPolicy::default(),
    )
}

fn harness() -> Harness {
    let clock = ManualClock::new(test_clock().now());
    let bus = Arc::new(RecordingEventBus::new());
    let engine = BookingEngine::new(
        environment(&clock),
        Arc::new(InMemoryBookingRepository::new()),
        bus.clone(),
    )
    .with_conflict_retry(fast_retry(5))
    .with_publish_retry(fast_retry(2));

    Harness {
        engine: Arc::new(engine),
        clock,
        bus,
        customer: CustomerId::new(),
    }
}

fn request(clock: &ManualClock) -> NewBooking {
    NewBooking {
        requested_professional: None,
        service: "Deep cleaning".to_string(),
        address: "12 Rue des Lilas".to_string(),
        // tomorrow 10:00
        slot: Slot::starting_at(clock.now() + Duration::hours(34)),
        price: Money::from_cents(6000),
        payment_method: PaymentMethod::Cash,
    }
}

impl Harness {
    fn customer(&self) -> Actor {
        Actor::Customer(self.customer)
    }

    async fn pending(&self) -> Booking {
        self.engine
            .create(self.customer(), request(&self.clock))
            .await
            .unwrap()
    }

    async fn accepted(&self, pro: ProfessionalId) -> Booking {
        let booking = self.pending().await;
        self.engine
            .accept(booking.id, Actor::Professional(pro))
            .await
            .unwrap()
    }
}

/// Scenario 1: the first accept wins and issues the code, the second is
/// refused.
#[tokio::test]
async fn accept_claims_once_and_issues_code() {
    let h = harness();
    let booking = h.pending().await;
    assert_eq!(booking.status, Status::Pending);

    let p1 = ProfessionalId::new();
    let accepted = h
        .engine
        .accept(booking.id, Actor::Professional(p1))
        .await
        .unwrap();
    assert_eq!(accepted.status, Status::Accepted);
    assert_eq!(accepted.professional_id, Some(p1));

    let code = h.engine.issue_otp(booking.id, h.customer()).await.unwrap();
    assert_eq!(code.as_str(), "4821");

    let second = h
        .engine
        .accept(booking.id, Actor::Professional(ProfessionalId::new()))
        .await;
    assert_eq!(second.unwrap_err(), BookingError::AlreadyClaimed);
}

/// Scenario 2 and 3: a wrong code is counted, the right one starts work,
/// then completion and a single rating.
#[tokio::test]
async fn otp_gate_then_complete_and_rate() {
    let h = harness();
    let pro_id = ProfessionalId::new();
    let booking = h.accepted(pro_id).await;
    let pro = Actor::Professional(pro_id);

    let wrong = h.engine.start(booking.id, pro, "0000").await;
    assert_eq!(
        wrong.unwrap_err(),
        BookingError::InvalidOtp {
            attempts_remaining: 4
        }
    );
    let view = h.engine.get(booking.id, &pro).await.unwrap();
    assert_eq!(view.status, Status::Accepted);
    assert_eq!(view.started_at, None);

    let started = h.engine.start(booking.id, pro, "4821").await.unwrap();
    assert_eq!(started.status, Status::Ongoing);
    assert!(started.started_at.is_some());

    let completed = h.engine.complete(booking.id, pro).await.unwrap();
    assert_eq!(completed.status, Status::Completed);
    assert!(completed.completed_at.is_some());

    let rated = h
        .engine
        .rate(booking.id, h.customer(), 5, Some("Great job".to_string()))
        .await
        .unwrap();
    assert_eq!(rated.review.unwrap().rating.value(), 5);

    let again = h.engine.rate(booking.id, h.customer(), 4, None).await;
    assert!(matches!(again, Err(BookingError::IllegalTransition { .. })));
}

/// Scenario 4: reschedule is allowed 15 minutes before the slot and refused
/// 5 minutes before.
#[tokio::test]
async fn reschedule_lead_time() {
    let h = harness();
    let booking = h.pending().await;
    let first_slot = booking.scheduled_at();

    h.clock.set(first_slot - Duration::minutes(15));
    let moved_to = Slot::starting_at(first_slot + Duration::days(1));
    let moved = h
        .engine
        .reschedule(booking.id, h.customer(), moved_to)
        .await
        .unwrap();
    assert_eq!(moved.slot, moved_to);
    assert_eq!(moved.status, Status::Pending);

    h.clock.set(moved_to.starts_at() - Duration::minutes(5));
    let late = h
        .engine
        .reschedule(
            booking.id,
            h.customer(),
            Slot::starting_at(moved_to.starts_at() + Duration::days(1)),
        )
        .await;
    assert!(matches!(
        late,
        Err(BookingError::Validation { ref field, .. }) if field == "slot"
    ));
}

/// Scenario 5: pending cancellations are free, late cancellations of an
/// accepted booking carry a fee.
#[tokio::test]
async fn cancellation_fees() {
    let h = harness();

    let b3 = h.pending().await;
    let cancelled = h
        .engine
        .cancel(b3.id, h.customer(), Some("changed mind".to_string()))
        .await
        .unwrap();
    assert_eq!(cancelled.status, Status::Cancelled);
    assert_eq!(cancelled.cancel_reason(), Some("changed mind"));
    assert_eq!(cancelled.cancellation.unwrap().fee, None);

    let b4 = h.accepted(ProfessionalId::new()).await;
    h.clock.set(b4.scheduled_at() - Duration::minutes(30));
    let late = h
        .engine
        .cancel(b4.id, h.customer(), Some("stuck at work".to_string()))
        .await
        .unwrap();
    let cancellation = late.cancellation.unwrap();
    assert_eq!(cancellation.by, Role::Customer);
    assert_eq!(cancellation.fee, Some(Money::from_cents(600)));
}

#[tokio::test]
async fn concurrent_accepts_in_one_engine_have_one_winner() {
    let h = harness();
    let booking = h.pending().await;

    let attempts: Vec<_> = (0..8)
        .map(|_| {
            let engine = Arc::clone(&h.engine);
            tokio::spawn(async move {
                engine
                    .accept(booking.id, Actor::Professional(ProfessionalId::new()))
                    .await
            })
        })
        .collect();

    let mut winners = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(_) => winners += 1,
            Err(err) => assert_eq!(err, BookingError::AlreadyClaimed),
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(h.engine.active_locks(), 0);
}

/// Store that pauses after every load so two engines both read the same
/// version before either writes.
struct SlowLoads {
    inner: InMemoryBookingRepository,
    conflicts: AtomicUsize,
}

impl BookingRepository for SlowLoads {
    fn load(
        &self,
        id: BookingId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Booking>, RepositoryError>> + Send + '_>> {
        Box::pin(async move {
            let loaded = self.inner.load(id).await;
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            loaded
        })
    }

    fn save(
        &self,
        booking: &Booking,
        expected: Version,
    ) -> Pin<Box<dyn Future<Output = Result<(), RepositoryError>> + Send + '_>> {
        let booking = booking.clone();
        Box::pin(async move {
            let saved = self.inner.save(&booking, expected).await;
            if matches!(saved, Err(RepositoryError::VersionConflict { .. })) {
                self.conflicts.fetch_add(1, Ordering::SeqCst);
            }
            saved
        })
    }

    fn list(
        &self,
        filter: &BookingFilter,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Booking>, RepositoryError>> + Send + '_>> {
        self.inner.list(filter)
    }
}

#[tokio::test]
async fn engines_sharing_a_store_have_one_winner() {
    let clock = ManualClock::new(test_clock().now());
    let store = Arc::new(SlowLoads {
        inner: InMemoryBookingRepository::new(),
        conflicts: AtomicUsize::new(0),
    });
    let bus = Arc::new(RecordingEventBus::new());
    let engine = |codes: &str| {
        BookingEngine::new(
            BookingEnvironment::new(
                Arc::new(clock.clone()),
                Arc::new(ScriptedCodeGenerator::new([codes])),
                BookingPolicy::default(),
            ),
            store.clone(),
            bus.clone(),
        )
        .with_conflict_retry(fast_retry(3))
    };
    let east = engine("1111");
    let west = engine("2222");

    let customer = CustomerId::new();
    let booking = east
        .create(Actor::Customer(customer), request(&clock))
        .await
        .unwrap();

    let (a, b) = tokio::join!(
        east.accept(booking.id, Actor::Professional(ProfessionalId::new())),
        west.accept(booking.id, Actor::Professional(ProfessionalId::new())),
    );

    let outcomes = [a.is_ok(), b.is_ok()];
    assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1);
    let loser = if a.is_ok() { b } else { a };
    assert_eq!(loser.unwrap_err(), BookingError::AlreadyClaimed);
    assert!(store.conflicts.load(Ordering::SeqCst) >= 1);

    let stored = store.inner.load(booking.id).await.unwrap().unwrap();
    assert_eq!(stored.version, Version::new(2));
    assert_eq!(
        bus.event_types_on(&topic_for(booking.id)),
        vec!["BookingCreated.v1", "BookingAccepted.v1"]
    );
}

#[tokio::test]
async fn otp_locks_after_five_failures_and_expires() {
    let h = harness();
    let pro = ProfessionalId::new();
    let booking = h.accepted(pro).await;
    let pro = Actor::Professional(pro);

    for remaining in (0..5).rev() {
        assert_eq!(
            h.engine.start(booking.id, pro, "0000").await.unwrap_err(),
            BookingError::InvalidOtp {
                attempts_remaining: remaining
            }
        );
    }
    assert_eq!(
        h.engine.start(booking.id, pro, "4821").await.unwrap_err(),
        BookingError::OtpLocked
    );

    let fresh = h.engine.regenerate_otp(booking.id, h.customer()).await.unwrap();
    assert_eq!(fresh.as_str(), "7310");

    h.clock.advance(Duration::hours(24));
    assert_eq!(
        h.engine.start(booking.id, pro, "7310").await.unwrap_err(),
        BookingError::OtpExpired
    );

    let reissued = h.engine.issue_otp(booking.id, h.customer()).await.unwrap();
    assert_eq!(reissued.as_str(), "5096");
    let started = h.engine.start(booking.id, pro, "5096").await.unwrap();
    assert_eq!(started.status, Status::Ongoing);
}

#[tokio::test]
async fn malformed_codes_are_not_counted() {
    let h = harness();
    let pro = ProfessionalId::new();
    let booking = h.accepted(pro).await;

    let err = h
        .engine
        .start(booking.id, Actor::Professional(pro), "12ab")
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::Validation { .. }));

    let stored = h.engine.get(booking.id, &h.customer()).await.unwrap();
    assert_eq!(stored.version, 2);
}

#[tokio::test]
async fn notifications_arrive_in_order_and_redacted() {
    let h = harness();
    let booking = h.pending().await;
    let pro = ProfessionalId::new();

    let mut customer_feed = h.engine.subscribe(booking.id, h.customer()).await.unwrap();
    let mut pro_feed = h
        .engine
        .subscribe(booking.id, Actor::Professional(pro))
        .await
        .unwrap();

    h.engine
        .accept(booking.id, Actor::Professional(pro))
        .await
        .unwrap();
    h.engine
        .request_otp_disclosure(booking.id, Actor::Professional(pro))
        .await
        .unwrap();
    h.engine
        .start(booking.id, Actor::Professional(pro), "4821")
        .await
        .unwrap();

    let mut seen = Vec::new();
    for _ in 0..3 {
        let note = customer_feed.next().await.unwrap().unwrap();
        seen.push((note.version, note.kind, note.otp));
    }
    assert_eq!(
        seen,
        vec![
            (2, NotificationKind::Accepted, Some("4821".to_string())),
            (3, NotificationKind::OtpDisclosureRequested, Some("4821".to_string())),
            (4, NotificationKind::Started, None),
        ]
    );

    for _ in 0..3 {
        let note = pro_feed.next().await.unwrap().unwrap();
        assert_eq!(note.otp, None);
    }
}

#[tokio::test]
async fn strangers_cannot_see_or_follow_a_booking() {
    let h = harness();
    let pro = ProfessionalId::new();
    let booking = h.accepted(pro).await;

    let stranger = Actor::Customer(CustomerId::new());
    assert_eq!(
        h.engine.get(booking.id, &stranger).await.unwrap_err(),
        BookingError::NotFound
    );
    assert!(h.engine.subscribe(booking.id, stranger).await.is_err());
    assert_eq!(
        h.engine
            .get(booking.id, &Actor::Professional(ProfessionalId::new()))
            .await
            .unwrap_err(),
        BookingError::NotFound
    );
}

#[tokio::test]
async fn listing_is_scoped_to_the_viewer() {
    let h = harness();
    let pro = ProfessionalId::new();
    let open = h.pending().await;
    let mine = h.accepted(pro).await;

    let customer_view = h
        .engine
        .list(&BookingFilter::default(), &h.customer())
        .await
        .unwrap();
    assert_eq!(customer_view.len(), 2);

    let upcoming_for_pro = h
        .engine
        .list(
            &BookingFilter::for_professional(pro).with_category(StatusCategory::Upcoming),
            &Actor::Professional(pro),
        )
        .await
        .unwrap();
    assert_eq!(
        upcoming_for_pro.iter().map(|v| v.id).collect::<Vec<_>>(),
        vec![mine.id]
    );
    assert!(upcoming_for_pro.iter().all(|v| v.otp.is_none()));

    let open_requests = h
        .engine
        .list(
            &BookingFilter::default().with_status(Status::Pending),
            &Actor::Professional(ProfessionalId::new()),
        )
        .await
        .unwrap();
    assert_eq!(
        open_requests.iter().map(|v| v.id).collect::<Vec<_>>(),
        vec![open.id]
    );
}

#[tokio::test]
async fn undeliverable_notifications_are_parked_and_redelivered() {
    let h = harness();
    let booking = h.pending().await;

    // first try plus two retries
    h.bus.fail_next(3);
    let accepted = h
        .engine
        .accept(booking.id, Actor::Professional(ProfessionalId::new()))
        .await
        .unwrap();
    assert_eq!(accepted.status, Status::Accepted);
    assert_eq!(h.engine.dead_letters().len(), 1);

    let topic = topic_for(booking.id);
    assert_eq!(h.bus.event_types_on(&topic), vec!["BookingCreated.v1"]);

    assert_eq!(h.engine.redeliver_dead_letters().await, 1);
    assert!(h.engine.dead_letters().is_empty());
    assert_eq!(
        h.bus.event_types_on(&topic),
        vec!["BookingCreated.v1", "BookingAccepted.v1"]
    );
}

#[tokio::test]
async fn parked_notifications_go_out_before_newer_ones() {
    let h = harness();
    let pro = ProfessionalId::new();
    let booking = h.pending().await;
    let mut feed = h.engine.subscribe(booking.id, h.customer()).await.unwrap();

    h.bus.fail_next(3);
    h.engine
        .accept(booking.id, Actor::Professional(pro))
        .await
        .unwrap();
    assert_eq!(h.engine.dead_letters().len(), 1);

    h.engine
        .start(booking.id, Actor::Professional(pro), "4821")
        .await
        .unwrap();
    assert!(h.engine.dead_letters().is_empty());
    assert_eq!(h.engine.redeliver_dead_letters().await, 0);

    let first = feed.next().await.unwrap().unwrap();
    let second = feed.next().await.unwrap().unwrap();
    assert_eq!(
        [(first.version, first.status), (second.version, second.status)],
        [(2, Status::Accepted), (3, Status::Ongoing)]
    );
    assert_eq!(
        h.bus.event_types_on(&topic_for(booking.id)),
        vec!["BookingCreated.v1", "BookingAccepted.v1", "BookingStarted.v1"]
    );
}

#[tokio::test]
async fn newer_notifications_wait_behind_a_stuck_backlog() {
    let h = harness();
    let pro = ProfessionalId::new();
    let booking = h.pending().await;

    h.bus.fail_next(3);
    h.engine
        .accept(booking.id, Actor::Professional(pro))
        .await
        .unwrap();

    // the backlog flush fails, so the start notification is not even tried
    h.bus.fail_next(1);
    h.engine
        .start(booking.id, Actor::Professional(pro), "4821")
        .await
        .unwrap();
    assert_eq!(h.engine.dead_letters().len(), 2);
    let topic = topic_for(booking.id);
    assert_eq!(h.bus.event_types_on(&topic), vec!["BookingCreated.v1"]);

    assert_eq!(h.engine.redeliver_dead_letters().await, 2);
    assert!(h.engine.dead_letters().is_empty());
    assert_eq!(
        h.bus.event_types_on(&topic),
        vec!["BookingCreated.v1", "BookingAccepted.v1", "BookingStarted.v1"]
    );
}

#[tokio::test]
async fn subscribers_never_move_backwards() {
    let h = harness();
    let pro = ProfessionalId::new();
    let booking = h.accepted(pro).await;
    let mut feed = h.engine.subscribe(booking.id, h.customer()).await.unwrap();
    let topic = topic_for(booking.id);

    h.engine
        .start(booking.id, Actor::Professional(pro), "4821")
        .await
        .unwrap();

    // an at-least-once redelivery of the older accept notification
    let (_, accepted) = h
        .bus
        .published()
        .into_iter()
        .find(|(_, event)| event.event_type == "BookingAccepted.v1")
        .unwrap();
    h.bus.publish(&topic, &accepted).await.unwrap();

    h.engine
        .complete(booking.id, Actor::Professional(pro))
        .await
        .unwrap();

    let statuses = [
        feed.next().await.unwrap().unwrap(),
        feed.next().await.unwrap().unwrap(),
    ]
    .map(|note| (note.version, note.status));
    assert_eq!(statuses, [(3, Status::Ongoing), (4, Status::Completed)]);
}

/// Bus whose publishes wait for a permit
struct GatedBus {
    inner: RecordingEventBus,
    gate: tokio::sync::Semaphore,
}

impl EventBus for GatedBus {
    fn publish(
        &self,
        topic: &str,
        event: &SerializedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        let topic = topic.to_string();
        let event = event.clone();
        Box::pin(async move {
            self.gate.acquire().await.unwrap().forget();
            self.inner.publish(&topic, &event).await
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>> {
        self.inner.subscribe(topics)
    }
}

#[tokio::test]
async fn abandoned_commands_still_publish_and_unlock() {
    let clock = ManualClock::new(test_clock().now());
    let store = Arc::new(InMemoryBookingRepository::new());
    let bus = Arc::new(GatedBus {
        inner: RecordingEventBus::new(),
        gate: tokio::sync::Semaphore::new(0),
    });
    let engine = BookingEngine::new(environment(&clock), store.clone(), bus.clone())
        .with_publish_retry(fast_retry(0));

    bus.gate.add_permits(1);
    let booking = engine
        .create(Actor::Customer(CustomerId::new()), request(&clock))
        .await
        .unwrap();

    let abandoned = tokio::time::timeout(
        std::time::Duration::from_millis(50),
        engine.accept(booking.id, Actor::Professional(ProfessionalId::new())),
    )
    .await;
    assert!(abandoned.is_err());

    bus.gate.add_permits(1);
    let topic = topic_for(booking.id);
    for _ in 0..200 {
        if engine.active_locks() == 0 && bus.inner.event_types_on(&topic).len() == 2 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    assert_eq!(
        bus.inner.event_types_on(&topic),
        vec!["BookingCreated.v1", "BookingAccepted.v1"]
    );
    assert_eq!(engine.active_locks(), 0);
    assert!(engine.dead_letters().is_empty());
    let stored = store.load(booking.id).await.unwrap().unwrap();
    assert_eq!(stored.status, Status::Accepted);
}

#[tokio::test]
async fn health_reports_store_and_queue() {
    let h = harness();
    let report = h.engine.health().await;
    assert!(report.is_healthy());
    assert_eq!(report.checks.len(), 2);
}
