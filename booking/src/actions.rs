//! Commands accepted by the booking reducer and the events they produce.

use crate::notification::NotificationKind;
use crate::otp::OtpCode;
use crate::transitions::Transition;
use crate::types::{
    Actor, BookingId, CustomerId, Money, PaymentMethod, ProfessionalId, Rating, Role, Slot,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A request to change a booking.
///
/// Every command carries the authenticated [`Actor`]; the reducer checks
/// both the role and the identity before applying anything.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingAction {
    /// Customer requests a service
    CreateBooking {
        /// Requesting customer
        actor: Actor,
        /// Id for the new booking
        booking_id: BookingId,
        /// Professional the request is addressed to, if any
        requested_professional: Option<ProfessionalId>,
        /// Service name
        service: String,
        /// Service address
        address: String,
        /// Requested slot
        slot: Slot,
        /// Agreed price
        price: Money,
        /// Payment method
        payment_method: PaymentMethod,
    },
    /// Professional claims a pending booking
    AcceptBooking {
        /// Claiming professional
        actor: Actor,
    },
    /// Professional declines a pending booking
    RejectBooking {
        /// Declining professional
        actor: Actor,
        /// Optional reason
        reason: Option<String>,
    },
    /// Customer or assigned professional calls the booking off
    CancelBooking {
        /// Who cancels
        actor: Actor,
        /// Optional reason
        reason: Option<String>,
    },
    /// Customer moves the slot
    RescheduleBooking {
        /// Owning customer
        actor: Actor,
        /// New slot
        slot: Slot,
    },
    /// Customer fetches the start-of-work code
    IssueOtp {
        /// Owning customer
        actor: Actor,
    },
    /// Customer replaces the start-of-work code
    RegenerateOtp {
        /// Owning customer
        actor: Actor,
    },
    /// Assigned professional signals arrival and asks for the code
    RequestOtpDisclosure {
        /// Assigned professional
        actor: Actor,
    },
    /// Assigned professional enters the code to start work
    StartBooking {
        /// Assigned professional
        actor: Actor,
        /// Code as typed
        otp: String,
    },
    /// Assigned professional marks the work done
    CompleteBooking {
        /// Assigned professional
        actor: Actor,
    },
    /// Customer rates a completed booking
    RateBooking {
        /// Owning customer
        actor: Actor,
        /// Stars, 1 to 5
        rating: u8,
        /// Optional written review
        review: Option<String>,
    },
}

impl BookingAction {
    /// Who issued the command
    #[must_use]
    pub const fn actor(&self) -> &Actor {
        match self {
            Self::CreateBooking { actor, .. }
            | Self::AcceptBooking { actor }
            | Self::RejectBooking { actor, .. }
            | Self::CancelBooking { actor, .. }
            | Self::RescheduleBooking { actor, .. }
            | Self::IssueOtp { actor }
            | Self::RegenerateOtp { actor }
            | Self::RequestOtpDisclosure { actor }
            | Self::StartBooking { actor, .. }
            | Self::CompleteBooking { actor }
            | Self::RateBooking { actor, .. } => actor,
        }
    }

    /// The table transition this command asks for; `None` for creation
    #[must_use]
    pub const fn transition(&self) -> Option<Transition> {
        match self {
            Self::CreateBooking { .. } => None,
            Self::AcceptBooking { .. } => Some(Transition::Accept),
            Self::RejectBooking { .. } => Some(Transition::Reject),
            Self::CancelBooking { .. } => Some(Transition::Cancel),
            Self::RescheduleBooking { .. } => Some(Transition::Reschedule),
            Self::IssueOtp { .. } => Some(Transition::IssueOtp),
            Self::RegenerateOtp { .. } => Some(Transition::RegenerateOtp),
            Self::RequestOtpDisclosure { .. } => Some(Transition::RequestOtpDisclosure),
            Self::StartBooking { .. } => Some(Transition::Start),
            Self::CompleteBooking { .. } => Some(Transition::Complete),
            Self::RateBooking { .. } => Some(Transition::Rate),
        }
    }

    /// Command name used as a metrics label
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self.transition() {
            Some(transition) => transition.as_str(),
            None => "create",
        }
    }
}

/// A fact about a booking, produced by a successful command.
///
/// Applying the events of a booking in order rebuilds it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingEvent {
    /// Booking was requested
    Created {
        /// New booking id
        booking_id: BookingId,
        /// Requesting customer
        customer_id: CustomerId,
        /// Targeted professional, if any
        requested_professional: Option<ProfessionalId>,
        /// Service name
        service: String,
        /// Service address
        address: String,
        /// Agreed slot
        slot: Slot,
        /// Agreed price
        price: Money,
        /// Payment method
        payment_method: PaymentMethod,
        /// When
        at: DateTime<Utc>,
    },
    /// A professional claimed the booking and a code was issued
    Accepted {
        /// Claiming professional
        professional_id: ProfessionalId,
        /// Start-of-work code
        otp: OtpCode,
        /// When
        at: DateTime<Utc>,
    },
    /// A professional declined the booking
    Rejected {
        /// Declining professional
        professional_id: ProfessionalId,
        /// Optional reason
        reason: Option<String>,
        /// When
        at: DateTime<Utc>,
    },
    /// The booking was called off
    Cancelled {
        /// Who cancelled
        by: Role,
        /// Optional reason
        reason: Option<String>,
        /// Late-cancellation fee
        fee: Option<Money>,
        /// When
        at: DateTime<Utc>,
    },
    /// The slot moved
    Rescheduled {
        /// Previous slot
        from: Slot,
        /// New slot
        to: Slot,
        /// When
        at: DateTime<Utc>,
    },
    /// A new code replaced the previous one
    OtpIssued {
        /// New code
        otp: OtpCode,
        /// When
        at: DateTime<Utc>,
    },
    /// The professional asked for the code to be shown
    OtpDisclosureRequested {
        /// When
        at: DateTime<Utc>,
    },
    /// A wrong code was entered
    OtpRejected {
        /// Failures recorded against the current code, including this one
        failed_attempts: u32,
        /// When
        at: DateTime<Utc>,
    },
    /// The code matched and work started
    Started {
        /// When
        at: DateTime<Utc>,
    },
    /// Work finished
    Completed {
        /// When
        at: DateTime<Utc>,
    },
    /// Customer rated the work
    Rated {
        /// Stars
        rating: Rating,
        /// Written review
        comment: Option<String>,
        /// When
        at: DateTime<Utc>,
    },
}

impl BookingEvent {
    /// Notification kind published for this event
    #[must_use]
    pub const fn kind(&self) -> NotificationKind {
        match self {
            Self::Created { .. } => NotificationKind::Created,
            Self::Accepted { .. } => NotificationKind::Accepted,
            Self::Rejected { .. } => NotificationKind::Rejected,
            Self::Cancelled { .. } => NotificationKind::Cancelled,
            Self::Rescheduled { .. } => NotificationKind::Rescheduled,
            Self::OtpIssued { .. } => NotificationKind::OtpIssued,
            Self::OtpDisclosureRequested { .. } => NotificationKind::OtpDisclosureRequested,
            Self::OtpRejected { .. } => NotificationKind::OtpRejected,
            Self::Started { .. } => NotificationKind::Started,
            Self::Completed { .. } => NotificationKind::Completed,
            Self::Rated { .. } => NotificationKind::Rated,
        }
    }

    /// When the event happened
    #[must_use]
    pub const fn at(&self) -> DateTime<Utc> {
        match self {
            Self::Created { at, .. }
            | Self::Accepted { at, .. }
            | Self::Rejected { at, .. }
            | Self::Cancelled { at, .. }
            | Self::Rescheduled { at, .. }
            | Self::OtpIssued { at, .. }
            | Self::OtpDisclosureRequested { at }
            | Self::OtpRejected { at, .. }
            | Self::Started { at }
            | Self::Completed { at }
            | Self::Rated { at, .. } => *at,
        }
    }
}
