//! Read-side projection of a booking for one viewer.

use crate::status::{Status, StatusCategory};
use crate::types::{
    Actor, Booking, BookingId, Cancellation, CustomerId, Money, PaymentMethod, ProfessionalId,
    Rejection, Review, Slot,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A step on the progress bar shown to users
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Booking placed
    Requested,
    /// A professional took it
    Accepted,
    /// Work started
    Started,
    /// Work finished
    Completed,
    /// Called off
    Cancelled,
    /// Declined
    Rejected,
}

/// One entry of the timeline
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineStep {
    /// Stage
    pub stage: Stage,
    /// Whether the booking got there
    pub reached: bool,
}

/// The progress bar for a status.
///
/// Derived from the status alone, never stored.
#[must_use]
pub fn timeline(status: Status) -> Vec<TimelineStep> {
    let step = |stage, reached| TimelineStep { stage, reached };
    match status {
        Status::Cancelled => vec![step(Stage::Requested, true), step(Stage::Cancelled, true)],
        Status::Rejected => vec![step(Stage::Requested, true), step(Stage::Rejected, true)],
        Status::Pending | Status::Accepted | Status::Ongoing | Status::Completed => {
            let reached = match status {
                Status::Pending => 1,
                Status::Accepted => 2,
                Status::Ongoing => 3,
                _ => 4,
            };
            [Stage::Requested, Stage::Accepted, Stage::Started, Stage::Completed]
                .into_iter()
                .enumerate()
                .map(|(i, stage)| step(stage, i < reached))
                .collect()
        },
    }
}

/// A booking as one viewer may see it
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingView {
    /// Booking id
    pub id: BookingId,
    /// Status
    pub status: Status,
    /// List tab the booking belongs to
    pub category: StatusCategory,
    /// Customer
    pub customer_id: CustomerId,
    /// Assigned professional
    pub professional_id: Option<ProfessionalId>,
    /// Service name
    pub service: String,
    /// Address
    pub address: String,
    /// Slot
    pub slot: Slot,
    /// Price
    pub price: Money,
    /// Payment method
    pub payment_method: PaymentMethod,
    /// Start-of-work code, only for the owning customer while accepted
    pub otp: Option<String>,
    /// When the professional asked for the code
    pub otp_disclosure_requested_at: Option<DateTime<Utc>>,
    /// When the booking was placed
    pub created_at: DateTime<Utc>,
    /// When it was accepted
    pub accepted_at: Option<DateTime<Utc>>,
    /// When work started
    pub started_at: Option<DateTime<Utc>>,
    /// When work completed
    pub completed_at: Option<DateTime<Utc>>,
    /// Cancellation details
    pub cancellation: Option<Cancellation>,
    /// Rejection details
    pub rejection: Option<Rejection>,
    /// Rating and review
    pub review: Option<Review>,
    /// Progress bar
    pub timeline: Vec<TimelineStep>,
    /// Version, for matching against notifications
    pub version: u64,
}

impl BookingView {
    /// Project `booking` for `viewer`
    #[must_use]
    pub fn new(booking: &Booking, viewer: &Actor) -> Self {
        let show_code = booking.status == Status::Accepted && booking.is_customer(viewer);
        Self {
            id: booking.id,
            status: booking.status,
            category: booking.status.category(),
            customer_id: booking.customer_id,
            professional_id: booking.professional_id,
            service: booking.service.clone(),
            address: booking.address.clone(),
            slot: booking.slot,
            price: booking.price,
            payment_method: booking.payment_method,
            otp: booking
                .otp
                .as_ref()
                .filter(|_| show_code)
                .map(|otp| otp.code.as_str().to_string()),
            otp_disclosure_requested_at: booking
                .otp
                .as_ref()
                .and_then(|otp| otp.disclosure_requested_at),
            created_at: booking.created_at,
            accepted_at: booking.accepted_at,
            started_at: booking.started_at,
            completed_at: booking.completed_at,
            cancellation: booking.cancellation.clone(),
            rejection: booking.rejection.clone(),
            review: booking.review.clone(),
            timeline: timeline(booking.status),
            version: booking.version.value(),
        }
    }
}

/// Whether `viewer` may see `booking` at all.
///
/// The customer and the assigned professional always can. Professionals
/// can see pending requests open to them. Admins see everything.
#[must_use]
pub fn can_view(booking: &Booking, viewer: &Actor) -> bool {
    match viewer {
        Actor::Admin => true,
        Actor::Customer(_) => booking.is_customer(viewer),
        Actor::Professional(_) => {
            booking.is_assigned_professional(viewer)
                || (booking.status == Status::Pending && booking.is_open_to(viewer))
        },
    }
}
