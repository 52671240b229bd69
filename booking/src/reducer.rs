//! Booking reducer implementing the lifecycle state machine.
//!
//! The reducer validates a command against the transition table, the
//! caller's identity and the time-based policy, then applies the resulting
//! event to state and returns one publish effect per applied event. It never
//! touches storage or the bus itself; the engine persists the new state and
//! only then runs the effects.

use crate::actions::{BookingAction, BookingEvent};
use crate::error::BookingError;
use crate::notification::{BookingNotification, topic_for};
use crate::otp::{OtpCode, OtpState, parse_candidate};
use crate::policy::BookingPolicy;
use crate::status::Status;
use crate::transitions::{Transition, authorize};
use crate::types::{
    Actor, Booking, BookingId, Cancellation, Money, PaymentMethod, ProfessionalId, Rating,
    Rejection, Review, Slot,
};
use chrono::{DateTime, Utc};
use homeserve_core::effect::Effect;
use homeserve_core::environment::{Clock, CodeGenerator};
use homeserve_core::reducer::Reducer;
use homeserve_core::version::Version;
use homeserve_core::{SmallVec, smallvec};
use std::sync::Arc;

/// Environment for the booking reducer
#[derive(Clone)]
pub struct BookingEnvironment {
    /// Clock for every time-based rule and timestamp
    pub clock: Arc<dyn Clock>,
    /// Source of start-of-work codes
    pub codes: Arc<dyn CodeGenerator>,
    /// Business rules
    pub policy: BookingPolicy,
}

impl BookingEnvironment {
    /// Creates a new booking environment
    #[must_use]
    pub fn new(
        clock: Arc<dyn Clock>,
        codes: Arc<dyn CodeGenerator>,
        policy: BookingPolicy,
    ) -> Self {
        Self {
            clock,
            codes,
            policy,
        }
    }

    fn new_code(&self) -> Result<OtpCode, BookingError> {
        OtpCode::new(self.codes.numeric_code(self.policy.otp.digits)).map_err(|err| {
            tracing::error!(error = %err, "code generator produced a malformed code");
            BookingError::Storage("could not generate a start-of-work code".to_string())
        })
    }
}

/// State the reducer works on: at most one booking plus the outcome of
/// the last command
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BookingState {
    /// The booking, once created
    pub booking: Option<Booking>,
    /// Why the last command was refused, if it was
    pub last_error: Option<BookingError>,
}

impl BookingState {
    /// State for a booking that does not exist yet
    #[must_use]
    pub const fn new() -> Self {
        Self {
            booking: None,
            last_error: None,
        }
    }

    /// State for an existing booking
    #[must_use]
    pub const fn from_booking(booking: Booking) -> Self {
        Self {
            booking: Some(booking),
            last_error: None,
        }
    }

    /// Current version (`INITIAL` before creation)
    #[must_use]
    pub fn version(&self) -> Version {
        self.booking
            .as_ref()
            .map_or(Version::INITIAL, |booking| booking.version)
    }

    /// Current status, if the booking exists
    #[must_use]
    pub fn status(&self) -> Option<Status> {
        self.booking.as_ref().map(|booking| booking.status)
    }
}

/// What a command decided
#[derive(Debug)]
enum Decision {
    /// Apply the event
    Apply(BookingEvent),
    /// Nothing to change, command succeeds
    Unchanged,
    /// Refuse without changing anything
    Refuse(BookingError),
    /// Apply the event and still report the command as failed
    ApplyAndRefuse(BookingEvent, BookingError),
}

impl From<Result<BookingEvent, BookingError>> for Decision {
    fn from(result: Result<BookingEvent, BookingError>) -> Self {
        match result {
            Ok(event) => Self::Apply(event),
            Err(err) => Self::Refuse(err),
        }
    }
}

/// Reducer implementing the booking lifecycle
#[derive(Clone, Copy, Debug, Default)]
pub struct BookingReducer;

impl BookingReducer {
    /// Creates a new booking reducer
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Applies an event to state.
    ///
    /// Also used to rebuild a booking from its events. Bumps the version by
    /// one for every event.
    pub fn apply_event(state: &mut BookingState, event: &BookingEvent) {
        if let BookingEvent::Created {
            booking_id,
            customer_id,
            requested_professional,
            service,
            address,
            slot,
            price,
            payment_method,
            at,
        } = event
        {
            state.booking = Some(Booking {
                id: *booking_id,
                customer_id: *customer_id,
                requested_professional: *requested_professional,
                professional_id: None,
                status: Status::Pending,
                service: service.clone(),
                address: address.clone(),
                slot: *slot,
                price: *price,
                payment_method: *payment_method,
                otp: None,
                created_at: *at,
                accepted_at: None,
                started_at: None,
                completed_at: None,
                cancellation: None,
                rejection: None,
                review: None,
                version: Version::INITIAL.next(),
            });
            return;
        }

        let Some(booking) = state.booking.as_mut() else {
            tracing::warn!(event = ?event.kind(), "event for a booking that does not exist");
            return;
        };

        match event {
            BookingEvent::Created { .. } => {},
            BookingEvent::Accepted {
                professional_id,
                otp,
                at,
            } => {
                booking.status = Status::Accepted;
                booking.professional_id = Some(*professional_id);
                booking.accepted_at = Some(*at);
                booking.otp = Some(OtpState::issued(otp.clone(), *at));
            },
            BookingEvent::Rejected {
                professional_id,
                reason,
                at,
            } => {
                booking.status = Status::Rejected;
                booking.rejection = Some(Rejection {
                    by: *professional_id,
                    reason: reason.clone(),
                    at: *at,
                });
            },
            BookingEvent::Cancelled {
                by,
                reason,
                fee,
                at,
            } => {
                booking.status = Status::Cancelled;
                booking.cancellation = Some(Cancellation {
                    by: *by,
                    reason: reason.clone(),
                    fee: *fee,
                    at: *at,
                });
            },
            BookingEvent::Rescheduled { to, .. } => {
                booking.slot = *to;
            },
            BookingEvent::OtpIssued { otp, at } => {
                // a replacement code keeps the arrival signal
                let disclosure = booking
                    .otp
                    .as_ref()
                    .and_then(|previous| previous.disclosure_requested_at);
                let mut fresh = OtpState::issued(otp.clone(), *at);
                fresh.disclosure_requested_at = disclosure;
                booking.otp = Some(fresh);
            },
            BookingEvent::OtpDisclosureRequested { at } => {
                if let Some(otp) = booking.otp.as_mut() {
                    otp.disclosure_requested_at = Some(*at);
                }
            },
            BookingEvent::OtpRejected {
                failed_attempts, ..
            } => {
                if let Some(otp) = booking.otp.as_mut() {
                    otp.failed_attempts = *failed_attempts;
                }
            },
            BookingEvent::Started { at } => {
                booking.status = Status::Ongoing;
                booking.started_at = Some(*at);
            },
            BookingEvent::Completed { at } => {
                booking.status = Status::Completed;
                booking.completed_at = Some(*at);
            },
            BookingEvent::Rated {
                rating,
                comment,
                at,
            } => {
                booking.review = Some(Review {
                    rating: *rating,
                    comment: comment.clone(),
                    at: *at,
                });
            },
        }

        booking.version = booking.version.next();
    }

    /// Builds the publish effect for an event that was just applied
    fn publish_effect(state: &BookingState, event: &BookingEvent, actor: &Actor) -> Effect {
        let Some(booking) = state.booking.as_ref() else {
            return Effect::None;
        };
        let notification =
            BookingNotification::for_change(booking, event.kind(), actor.role(), event.at());
        match notification.to_serialized() {
            Ok(serialized) => Effect::PublishEvent {
                topic: topic_for(booking.id),
                event: serialized,
            },
            Err(error) => {
                tracing::error!(
                    booking_id = %booking.id,
                    %error,
                    "failed to serialize notification"
                );
                Effect::None
            },
        }
    }

    // ========== Command handlers ==========

    #[allow(clippy::too_many_arguments)]
    fn create(
        state: &BookingState,
        actor: &Actor,
        booking_id: BookingId,
        requested_professional: Option<ProfessionalId>,
        service: String,
        address: String,
        slot: Slot,
        price: Money,
        payment_method: PaymentMethod,
        now: DateTime<Utc>,
    ) -> Result<BookingEvent, BookingError> {
        let Actor::Customer(customer_id) = *actor else {
            return Err(BookingError::validation("actor", "only customers can request a booking"));
        };
        if state.booking.is_some() {
            return Err(BookingError::validation("booking_id", "booking already exists"));
        }
        let service = service.trim();
        if service.is_empty() {
            return Err(BookingError::validation("service", "must not be empty"));
        }
        let address = address.trim();
        if address.is_empty() {
            return Err(BookingError::validation("address", "must not be empty"));
        }
        if price.is_zero() {
            return Err(BookingError::validation("price", "must be greater than zero"));
        }
        if slot.starts_at() <= now {
            return Err(BookingError::validation("slot", "must be in the future"));
        }

        Ok(BookingEvent::Created {
            booking_id,
            customer_id,
            requested_professional,
            service: service.to_string(),
            address: address.to_string(),
            slot,
            price,
            payment_method,
            at: now,
        })
    }

    fn accept(
        booking: &Booking,
        actor: &Actor,
        env: &BookingEnvironment,
        at: DateTime<Utc>,
    ) -> Result<BookingEvent, BookingError> {
        check(booking, actor, Transition::Accept, Booking::is_open_to)?;
        let Actor::Professional(professional_id) = *actor else {
            return Err(illegal(booking, actor, Transition::Accept));
        };
        Ok(BookingEvent::Accepted {
            professional_id,
            otp: env.new_code()?,
            at,
        })
    }

    fn reject(
        booking: &Booking,
        actor: &Actor,
        reason: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<BookingEvent, BookingError> {
        check(booking, actor, Transition::Reject, Booking::is_open_to)?;
        let Actor::Professional(professional_id) = *actor else {
            return Err(illegal(booking, actor, Transition::Reject));
        };
        Ok(BookingEvent::Rejected {
            professional_id,
            reason: clean_text(reason),
            at,
        })
    }

    fn cancel(
        booking: &Booking,
        actor: &Actor,
        reason: Option<String>,
        policy: &BookingPolicy,
        at: DateTime<Utc>,
    ) -> Result<BookingEvent, BookingError> {
        check(booking, actor, Transition::Cancel, |booking, actor| {
            booking.is_customer(actor) || booking.is_assigned_professional(actor)
        })?;
        Ok(BookingEvent::Cancelled {
            by: actor.role(),
            reason: clean_text(reason),
            fee: policy.cancellation_fee(booking, actor.role(), at),
            at,
        })
    }

    fn reschedule(
        booking: &Booking,
        actor: &Actor,
        slot: Slot,
        policy: &BookingPolicy,
        at: DateTime<Utc>,
    ) -> Result<BookingEvent, BookingError> {
        check(booking, actor, Transition::Reschedule, Booking::is_customer)?;
        policy.check_reschedule(booking, slot, at)?;
        Ok(BookingEvent::Rescheduled {
            from: booking.slot,
            to: slot,
            at,
        })
    }

    fn issue_otp(
        booking: &Booking,
        actor: &Actor,
        env: &BookingEnvironment,
        at: DateTime<Utc>,
    ) -> Decision {
        if let Err(err) = check(booking, actor, Transition::IssueOtp, Booking::is_customer) {
            return Decision::Refuse(err);
        }
        let reusable = booking
            .otp
            .as_ref()
            .is_some_and(|otp| otp.is_reusable(&env.policy.otp, at));
        if reusable {
            return Decision::Unchanged;
        }
        env.new_code()
            .map(|otp| BookingEvent::OtpIssued { otp, at })
            .into()
    }

    fn regenerate_otp(
        booking: &Booking,
        actor: &Actor,
        env: &BookingEnvironment,
        at: DateTime<Utc>,
    ) -> Result<BookingEvent, BookingError> {
        check(booking, actor, Transition::RegenerateOtp, Booking::is_customer)?;
        Ok(BookingEvent::OtpIssued {
            otp: env.new_code()?,
            at,
        })
    }

    fn request_otp_disclosure(
        booking: &Booking,
        actor: &Actor,
        at: DateTime<Utc>,
    ) -> Result<BookingEvent, BookingError> {
        check(
            booking,
            actor,
            Transition::RequestOtpDisclosure,
            Booking::is_assigned_professional,
        )?;
        Ok(BookingEvent::OtpDisclosureRequested { at })
    }

    fn start(
        booking: &Booking,
        actor: &Actor,
        candidate: &str,
        policy: &BookingPolicy,
        at: DateTime<Utc>,
    ) -> Decision {
        if let Err(err) =
            check(booking, actor, Transition::Start, Booking::is_assigned_professional)
        {
            return Decision::Refuse(err);
        }
        let candidate = match parse_candidate(candidate) {
            Ok(candidate) => candidate,
            Err(err) => return Decision::Refuse(err),
        };
        let Some(otp) = booking.otp.as_ref() else {
            return Decision::Refuse(BookingError::NotInAcceptedState {
                status: booking.status,
            });
        };

        match otp.verify(candidate, &policy.otp, at) {
            Ok(()) => Decision::Apply(BookingEvent::Started { at }),
            Err(err @ BookingError::InvalidOtp { .. }) => Decision::ApplyAndRefuse(
                BookingEvent::OtpRejected {
                    failed_attempts: otp.failed_attempts.saturating_add(1),
                    at,
                },
                err,
            ),
            Err(err) => Decision::Refuse(err),
        }
    }

    fn complete(
        booking: &Booking,
        actor: &Actor,
        at: DateTime<Utc>,
    ) -> Result<BookingEvent, BookingError> {
        check(booking, actor, Transition::Complete, Booking::is_assigned_professional)?;
        Ok(BookingEvent::Completed { at })
    }

    fn rate(
        booking: &Booking,
        actor: &Actor,
        rating: u8,
        review: Option<String>,
        policy: &BookingPolicy,
        at: DateTime<Utc>,
    ) -> Result<BookingEvent, BookingError> {
        check(booking, actor, Transition::Rate, Booking::is_customer)?;
        if booking.review.is_some() {
            return Err(illegal(booking, actor, Transition::Rate));
        }
        let rating = Rating::new(rating).ok_or_else(|| {
            BookingError::validation(
                "rating",
                format!("must be between {} and {}", Rating::MIN, Rating::MAX),
            )
        })?;
        let comment = clean_text(review);
        if comment
            .as_ref()
            .is_some_and(|text| text.chars().count() > policy.max_review_chars)
        {
            return Err(BookingError::validation(
                "review",
                format!("must be at most {} characters", policy.max_review_chars),
            ));
        }
        Ok(BookingEvent::Rated {
            rating,
            comment,
            at,
        })
    }

    fn decide(state: &BookingState, action: BookingAction, env: &BookingEnvironment) -> Decision {
        let now = env.clock.now();

        if let BookingAction::CreateBooking {
            actor,
            booking_id,
            requested_professional,
            service,
            address,
            slot,
            price,
            payment_method,
        } = action
        {
            return Self::create(
                state,
                &actor,
                booking_id,
                requested_professional,
                service,
                address,
                slot,
                price,
                payment_method,
                now,
            )
            .into();
        }

        let Some(booking) = state.booking.as_ref() else {
            return Decision::Refuse(BookingError::NotFound);
        };
        // the stored timeline never goes backwards, even if the clock does
        let at = now.max(booking.created_at);
        let policy = &env.policy;

        match action {
            BookingAction::CreateBooking { .. } => Decision::Refuse(BookingError::validation(
                "booking_id",
                "booking already exists",
            )),
            BookingAction::AcceptBooking { actor } => Self::accept(booking, &actor, env, at).into(),
            BookingAction::RejectBooking { actor, reason } => {
                Self::reject(booking, &actor, reason, at).into()
            },
            BookingAction::CancelBooking { actor, reason } => {
                Self::cancel(booking, &actor, reason, policy, at).into()
            },
            BookingAction::RescheduleBooking { actor, slot } => {
                Self::reschedule(booking, &actor, slot, policy, at).into()
            },
            BookingAction::IssueOtp { actor } => Self::issue_otp(booking, &actor, env, at),
            BookingAction::RegenerateOtp { actor } => {
                Self::regenerate_otp(booking, &actor, env, at).into()
            },
            BookingAction::RequestOtpDisclosure { actor } => {
                Self::request_otp_disclosure(booking, &actor, at).into()
            },
            BookingAction::StartBooking { actor, otp } => {
                Self::start(booking, &actor, &otp, policy, at)
            },
            BookingAction::CompleteBooking { actor } => Self::complete(booking, &actor, at).into(),
            BookingAction::RateBooking {
                actor,
                rating,
                review,
            } => Self::rate(booking, &actor, rating, review, policy, at).into(),
        }
    }
}

/// Checks the transition table, then the caller's identity
fn check(
    booking: &Booking,
    actor: &Actor,
    transition: Transition,
    is_party: impl Fn(&Booking, &Actor) -> bool,
) -> Result<Status, BookingError> {
    let to = authorize(booking.status, transition, actor.role())?;
    if is_party(booking, actor) {
        Ok(to)
    } else {
        Err(illegal(booking, actor, transition))
    }
}

const fn illegal(booking: &Booking, actor: &Actor, transition: Transition) -> BookingError {
    BookingError::IllegalTransition {
        from: booking.status,
        transition,
        role: actor.role(),
    }
}

fn clean_text(text: Option<String>) -> Option<String> {
    text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())
}

impl Reducer for BookingReducer {
    type State = BookingState;
    type Action = BookingAction;
    type Environment = BookingEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect; 4]> {
        state.last_error = None;
        let actor = *action.actor();
        let command = action.name();

        match Self::decide(state, action, env) {
            Decision::Apply(event) => {
                Self::apply_event(state, &event);
                smallvec![Self::publish_effect(state, &event, &actor)]
            },
            Decision::Unchanged => smallvec![Effect::None],
            Decision::Refuse(error) => {
                tracing::debug!(command, %error, "booking command refused");
                state.last_error = Some(error);
                smallvec![Effect::None]
            },
            Decision::ApplyAndRefuse(event, error) => {
                tracing::debug!(command, %error, "booking command refused after recording");
                Self::apply_event(state, &event);
                let effect = Self::publish_effect(state, &event, &actor);
                state.last_error = Some(error);
                smallvec![effect]
            },
        }
    }
}
