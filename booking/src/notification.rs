//! Outbound booking notifications.
//!
//! Every persisted change to a booking produces one [`BookingNotification`]
//! on topic `booking.{id}`. Notifications carry the booking version, so
//! subscribers can drop duplicates and stale deliveries.

use crate::status::Status;
use crate::types::{Actor, Booking, BookingId, CustomerId, Role, Slot};
use chrono::{DateTime, Utc};
use futures::Stream;
use homeserve_core::event::{Event, EventError, SerializedEvent};
use homeserve_core::event_bus::EventBusError;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// What happened to the booking
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Booking requested
    Created,
    /// Professional accepted, code issued
    Accepted,
    /// Professional declined
    Rejected,
    /// Booking cancelled
    Cancelled,
    /// Slot moved
    Rescheduled,
    /// A new code replaced the previous one
    OtpIssued,
    /// Professional asked for the code to be shown to the customer
    OtpDisclosureRequested,
    /// A wrong code was entered
    OtpRejected,
    /// Work started
    Started,
    /// Work completed
    Completed,
    /// Customer left a rating
    Rated,
}

impl NotificationKind {
    /// Versioned event type used on the bus
    #[must_use]
    pub const fn event_type(self) -> &'static str {
        match self {
            Self::Created => "BookingCreated.v1",
            Self::Accepted => "BookingAccepted.v1",
            Self::Rejected => "BookingRejected.v1",
            Self::Cancelled => "BookingCancelled.v1",
            Self::Rescheduled => "BookingRescheduled.v1",
            Self::OtpIssued => "BookingOtpIssued.v1",
            Self::OtpDisclosureRequested => "BookingOtpDisclosureRequested.v1",
            Self::OtpRejected => "BookingOtpRejected.v1",
            Self::Started => "BookingStarted.v1",
            Self::Completed => "BookingCompleted.v1",
            Self::Rated => "BookingRated.v1",
        }
    }
}

/// Push message for everyone watching a booking
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingNotification {
    /// Booking the change belongs to
    pub booking_id: BookingId,
    /// Booking version after the change
    pub version: u64,
    /// What happened
    pub kind: NotificationKind,
    /// Status after the change
    pub status: Status,
    /// Slot after the change
    pub slot: Slot,
    /// Booking owner, used for redaction
    pub customer_id: CustomerId,
    /// Start-of-work code; only ever delivered to the owning customer
    pub otp: Option<String>,
    /// Role that caused the change
    pub actor: Role,
    /// When the change happened
    pub timestamp: DateTime<Utc>,
}

impl BookingNotification {
    /// Build the notification for `booking` as it is after a change.
    ///
    /// The code is attached only for kinds that exist to deliver it to the
    /// customer, and only while the booking is accepted.
    #[must_use]
    pub fn for_change(
        booking: &Booking,
        kind: NotificationKind,
        actor: Role,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let carries_code = matches!(
            kind,
            NotificationKind::Accepted
                | NotificationKind::OtpIssued
                | NotificationKind::OtpDisclosureRequested
        ) && booking.status == Status::Accepted;

        Self {
            booking_id: booking.id,
            version: booking.version.value(),
            kind,
            status: booking.status,
            slot: booking.slot,
            customer_id: booking.customer_id,
            otp: carries_code
                .then(|| booking.otp.as_ref().map(|otp| otp.code.as_str().to_string()))
                .flatten(),
            actor,
            timestamp,
        }
    }

    /// Copy of this notification as `viewer` may see it.
    ///
    /// Everyone except the booking's own customer gets the code stripped.
    #[must_use]
    pub fn redacted_for(&self, viewer: &Actor) -> Self {
        let mut visible = self.clone();
        if *viewer != Actor::Customer(self.customer_id) {
            visible.otp = None;
        }
        visible
    }

    /// Wrap into a bus envelope with routing metadata.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::SerializationError`] if encoding fails.
    pub fn to_serialized(&self) -> Result<SerializedEvent, EventError> {
        SerializedEvent::from_event(
            self,
            Some(serde_json::json!({
                "booking_id": self.booking_id.to_string(),
                "version": self.version,
            })),
        )
    }
}

impl Event for BookingNotification {
    fn event_type(&self) -> &'static str {
        self.kind.event_type()
    }
}

/// Topic carrying the notifications of one booking
#[must_use]
pub fn topic_for(id: BookingId) -> String {
    format!("booking.{id}")
}

/// Decoded notifications for one booking
pub type NotificationStream =
    Pin<Box<dyn Stream<Item = Result<BookingNotification, EventBusError>> + Send>>;
