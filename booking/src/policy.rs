//! Time-based business rules: reschedule lead time, late-cancellation fee,
//! OTP limits and review length.
//!
//! All gates are evaluated against the injected clock at command time.
//! There are no background timers, and pending bookings never expire.

use crate::error::BookingError;
use crate::otp::OtpPolicy;
use crate::status::Status;
use crate::types::{Booking, Money, Role, Slot};
use chrono::{DateTime, Duration, Utc};

/// Tunable booking rules
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BookingPolicy {
    /// Reschedules must happen at least this long before the current slot
    pub reschedule_lead_time: Duration,
    /// Customer cancellations of accepted bookings inside this window before
    /// the slot pay a fee
    pub cancellation_cutoff: Duration,
    /// Late-cancellation fee as a percentage of the price
    pub cancellation_fee_percent: u8,
    /// Longest accepted review text, in characters
    pub max_review_chars: usize,
    /// OTP rules
    pub otp: OtpPolicy,
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            reschedule_lead_time: Duration::minutes(10),
            cancellation_cutoff: Duration::minutes(60),
            cancellation_fee_percent: 10,
            max_review_chars: 2000,
            otp: OtpPolicy::default(),
        }
    }
}

impl BookingPolicy {
    /// Set the reschedule lead time
    #[must_use]
    pub const fn with_reschedule_lead_time(mut self, lead_time: Duration) -> Self {
        self.reschedule_lead_time = lead_time;
        self
    }

    /// Set the late-cancellation window
    #[must_use]
    pub const fn with_cancellation_cutoff(mut self, cutoff: Duration) -> Self {
        self.cancellation_cutoff = cutoff;
        self
    }

    /// Set the late-cancellation fee percentage (capped at 100)
    #[must_use]
    pub fn with_cancellation_fee_percent(mut self, percent: u8) -> Self {
        self.cancellation_fee_percent = percent.min(100);
        self
    }

    /// Set the OTP rules
    #[must_use]
    pub const fn with_otp(mut self, otp: OtpPolicy) -> Self {
        self.otp = otp;
        self
    }

    /// Check a reschedule request.
    ///
    /// Succeeds when `now + lead_time <= current slot start`, the new slot
    /// starts after `now`, and the new slot differs from the current one.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Validation`] on field `slot` otherwise.
    pub fn check_reschedule(
        &self,
        booking: &Booking,
        new_slot: Slot,
        now: DateTime<Utc>,
    ) -> Result<(), BookingError> {
        if now + self.reschedule_lead_time > booking.scheduled_at() {
            return Err(BookingError::validation(
                "slot",
                format!(
                    "bookings can only be rescheduled up to {} minutes before the slot",
                    self.reschedule_lead_time.num_minutes()
                ),
            ));
        }
        if new_slot.starts_at() <= now {
            return Err(BookingError::validation("slot", "new slot must be in the future"));
        }
        if new_slot == booking.slot {
            return Err(BookingError::validation("slot", "new slot is the current slot"));
        }
        Ok(())
    }

    /// The fee for cancelling `booking` now, if any.
    ///
    /// Only customers pay, and only for accepted bookings where the
    /// professional already signalled arrival or the slot is inside the
    /// cutoff window.
    #[must_use]
    pub fn cancellation_fee(
        &self,
        booking: &Booking,
        by: Role,
        now: DateTime<Utc>,
    ) -> Option<Money> {
        if by != Role::Customer || booking.status != Status::Accepted {
            return None;
        }
        let arrived = booking
            .otp
            .as_ref()
            .is_some_and(|otp| otp.disclosure_requested_at.is_some());
        let late = now >= booking.scheduled_at() - self.cancellation_cutoff;

        (arrived || late).then(|| booking.price.percent(self.cancellation_fee_percent))
    }
}
