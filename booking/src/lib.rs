//! # Homeserve Booking
//!
//! The booking lifecycle of the Homeserve marketplace: a single transition
//! table, an OTP handshake that gates the start of work, time-based
//! reschedule and cancellation rules, and ordered real-time notifications
//! for the customer's live tracker and the professional's job screen.
//!
//! ## Layout
//!
//! - [`types`], [`status`], [`transitions`]: the booking, its statuses and
//!   the allow-list of moves between them
//! - [`otp`], [`policy`]: start-of-work codes and time-based rules
//! - [`actions`], [`reducer`]: commands, events and the reducer that decides
//! - [`repository`], [`engine`]: storage with compare-and-set and the engine
//!   that serialises commands per booking and publishes notifications
//! - [`notification`], [`view`], [`tracker`]: what clients see
//!
//! ## Example
//!
//! ```ignore
//! let engine = BookingEngine::new(env, Arc::new(InMemoryBookingRepository::new()), bus);
//! let booking = engine.create(Actor::Customer(customer), request).await?;
//! engine.accept(booking.id, Actor::Professional(pro)).await?;
//! let code = engine.issue_otp(booking.id, Actor::Customer(customer)).await?;
//! engine.start(booking.id, Actor::Professional(pro), code.as_str()).await?;
//! ```

pub mod actions;
pub mod engine;
pub mod error;
pub mod notification;
pub mod otp;
pub mod policy;
pub mod reducer;
pub mod repository;
pub mod status;
pub mod tracker;
pub mod transitions;
pub mod types;
pub mod view;

pub use actions::{BookingAction, BookingEvent};
pub use engine::{BookingEngine, NewBooking};
pub use error::{BookingError, ErrorKind};
pub use notification::{BookingNotification, NotificationKind, topic_for};
pub use otp::{OtpCode, OtpPolicy};
pub use policy::BookingPolicy;
pub use reducer::{BookingEnvironment, BookingReducer, BookingState};
pub use repository::{BookingFilter, BookingRepository, InMemoryBookingRepository, RepositoryError};
pub use status::{Status, StatusCategory};
pub use tracker::{BookingTracker, TrackerUpdate};
pub use types::{
    Actor, Booking, BookingId, CustomerId, Money, PaymentMethod, ProfessionalId, Rating, Role, Slot,
};
pub use view::{BookingView, Stage, TimelineStep};
