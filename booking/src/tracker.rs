//! Subscriber-side live tracker.
//!
//! Notifications arrive at least once and may be duplicated or reordered.
//! The tracker folds them into the latest known state of one booking,
//! keyed by version, and refuses status jumps the transition table cannot
//! produce.

use crate::notification::{BookingNotification, NotificationKind};
use crate::status::Status;
use crate::transitions::is_reachable;
use crate::types::{BookingId, Slot};
use chrono::{DateTime, Utc};

/// What the tracker did with a notification
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackerUpdate {
    /// Newer than anything seen, now the current state
    Applied,
    /// Same version as the current state, ignored
    Duplicate,
    /// Older than the current state, ignored
    Stale,
    /// Newer, but its status cannot follow the current one
    IllegalJump {
        /// Status the tracker holds
        from: Status,
        /// Status the notification claims
        to: Status,
    },
    /// Belongs to another booking
    OtherBooking,
}

/// Latest known state of one booking as seen by a subscriber
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BookingTracker {
    booking_id: BookingId,
    version: u64,
    status: Option<Status>,
    slot: Option<Slot>,
    otp: Option<String>,
    last_kind: Option<NotificationKind>,
    updated_at: Option<DateTime<Utc>>,
}

impl BookingTracker {
    /// Start tracking `booking_id` with nothing known yet
    #[must_use]
    pub const fn new(booking_id: BookingId) -> Self {
        Self {
            booking_id,
            version: 0,
            status: None,
            slot: None,
            otp: None,
            last_kind: None,
            updated_at: None,
        }
    }

    /// Start from a state fetched over the request path
    #[must_use]
    pub const fn from_snapshot(
        booking_id: BookingId,
        version: u64,
        status: Status,
        slot: Slot,
    ) -> Self {
        Self {
            booking_id,
            version,
            status: Some(status),
            slot: Some(slot),
            otp: None,
            last_kind: None,
            updated_at: None,
        }
    }

    /// Fold one notification in
    pub fn apply(&mut self, notification: &BookingNotification) -> TrackerUpdate {
        if notification.booking_id != self.booking_id {
            return TrackerUpdate::OtherBooking;
        }
        if notification.version == self.version {
            return TrackerUpdate::Duplicate;
        }
        if notification.version < self.version {
            return TrackerUpdate::Stale;
        }
        if let Some(from) = self.status {
            if !is_reachable(from, notification.status) {
                tracing::warn!(
                    booking_id = %self.booking_id,
                    %from,
                    to = %notification.status,
                    "ignoring notification with an unreachable status"
                );
                return TrackerUpdate::IllegalJump {
                    from,
                    to: notification.status,
                };
            }
        }

        self.version = notification.version;
        self.status = Some(notification.status);
        self.slot = Some(notification.slot);
        self.last_kind = Some(notification.kind);
        self.updated_at = Some(notification.timestamp);
        if notification.status == Status::Accepted {
            if notification.otp.is_some() {
                self.otp.clone_from(&notification.otp);
            }
        } else {
            self.otp = None;
        }
        TrackerUpdate::Applied
    }

    /// Tracked booking
    #[must_use]
    pub const fn booking_id(&self) -> BookingId {
        self.booking_id
    }

    /// Highest version applied
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Current status, if known
    #[must_use]
    pub const fn status(&self) -> Option<Status> {
        self.status
    }

    /// Current slot, if known
    #[must_use]
    pub const fn slot(&self) -> Option<Slot> {
        self.slot
    }

    /// Latest code delivered to this subscriber, while it can still be used
    #[must_use]
    pub fn otp(&self) -> Option<&str> {
        self.otp.as_deref()
    }

    /// Kind of the last applied notification
    #[must_use]
    pub const fn last_kind(&self) -> Option<NotificationKind> {
        self.last_kind
    }

    /// Time of the last applied notification
    #[must_use]
    pub const fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CustomerId, Role};

    fn note(id: BookingId, version: u64, status: Status, otp: Option<&str>) -> BookingNotification {
        let at = DateTime::<Utc>::UNIX_EPOCH;
        BookingNotification {
            booking_id: id,
            version,
            kind: NotificationKind::Accepted,
            status,
            slot: Slot::starting_at(at),
            customer_id: CustomerId::new(),
            otp: otp.map(str::to_string),
            actor: Role::Professional,
            timestamp: at,
        }
    }

    #[test]
    fn duplicates_and_stale_deliveries_are_ignored() {
        let id = BookingId::new();
        let mut tracker = BookingTracker::new(id);

        assert_eq!(tracker.apply(&note(id, 1, Status::Pending, None)), TrackerUpdate::Applied);
        assert_eq!(
            tracker.apply(&note(id, 2, Status::Accepted, Some("4821"))),
            TrackerUpdate::Applied
        );
        assert_eq!(
            tracker.apply(&note(id, 2, Status::Accepted, None)),
            TrackerUpdate::Duplicate
        );
        assert_eq!(tracker.apply(&note(id, 1, Status::Pending, None)), TrackerUpdate::Stale);

        assert_eq!(tracker.status(), Some(Status::Accepted));
        assert_eq!(tracker.otp(), Some("4821"));
    }

    #[test]
    fn missed_notifications_are_tolerated() {
        let id = BookingId::new();
        let mut tracker = BookingTracker::new(id);
        tracker.apply(&note(id, 1, Status::Pending, None));

        assert_eq!(
            tracker.apply(&note(id, 5, Status::Completed, None)),
            TrackerUpdate::Applied
        );
        assert_eq!(tracker.version(), 5);
    }

    #[test]
    fn backwards_status_is_refused() {
        let id = BookingId::new();
        let mut tracker = BookingTracker::new(id);
        tracker.apply(&note(id, 3, Status::Ongoing, None));

        assert_eq!(
            tracker.apply(&note(id, 4, Status::Accepted, Some("1234"))),
            TrackerUpdate::IllegalJump {
                from: Status::Ongoing,
                to: Status::Accepted
            }
        );
        assert_eq!(tracker.status(), Some(Status::Ongoing));
        assert_eq!(tracker.otp(), None);
    }

    #[test]
    fn code_is_dropped_after_start() {
        let id = BookingId::new();
        let mut tracker = BookingTracker::new(id);
        tracker.apply(&note(id, 2, Status::Accepted, Some("4821")));
        tracker.apply(&note(id, 3, Status::Ongoing, None));
        assert_eq!(tracker.otp(), None);
    }

    #[test]
    fn other_bookings_are_ignored() {
        let mut tracker = BookingTracker::new(BookingId::new());
        assert_eq!(
            tracker.apply(&note(BookingId::new(), 1, Status::Pending, None)),
            TrackerUpdate::OtherBooking
        );
    }
}
