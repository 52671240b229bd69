//! The allow-list of status transitions.
//!
//! [`TRANSITIONS`] is the only place that says which command may move a
//! booking from one status to another, and who may issue it. The reducer
//! asks [`authorize`] before it applies anything; subscribers use
//! [`is_reachable`] to check the statuses they observe.

use crate::error::BookingError;
use crate::status::Status;
use crate::types::Role;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A command that can change (or keep) a booking's status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    /// Professional claims a pending booking
    Accept,
    /// Professional declines a pending booking
    Reject,
    /// Booking is called off
    Cancel,
    /// Slot is moved
    Reschedule,
    /// Customer fetches the start-of-work code
    IssueOtp,
    /// Customer replaces the start-of-work code
    RegenerateOtp,
    /// Professional asks for the code to be shown to the customer
    RequestOtpDisclosure,
    /// Professional enters the code and starts work
    Start,
    /// Professional marks the work done
    Complete,
    /// Customer rates the work
    Rate,
}

impl Transition {
    /// Lowercase verb used in messages and metrics
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Reject => "reject",
            Self::Cancel => "cancel",
            Self::Reschedule => "reschedule",
            Self::IssueOtp => "issue_otp",
            Self::RegenerateOtp => "regenerate_otp",
            Self::RequestOtpDisclosure => "request_otp_disclosure",
            Self::Start => "start",
            Self::Complete => "complete",
            Self::Rate => "rate",
        }
    }

    /// Transitions that only make sense while the booking is accepted
    const fn requires_accepted(self) -> bool {
        matches!(
            self,
            Self::Start | Self::IssueOtp | Self::RegenerateOtp | Self::RequestOtpDisclosure
        )
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the transition table
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Edge {
    /// Status the booking must be in
    pub from: Status,
    /// Status after the transition
    pub to: Status,
    /// Command
    pub transition: Transition,
    /// Roles allowed to issue it
    pub roles: &'static [Role],
}

const CUSTOMER: &[Role] = &[Role::Customer];
const PROFESSIONAL: &[Role] = &[Role::Professional];
const BOTH: &[Role] = &[Role::Customer, Role::Professional];

/// Every legal transition. Anything not listed is rejected.
#[rustfmt::skip]
pub const TRANSITIONS: &[Edge] = &[
    Edge { from: Status::Pending, to: Status::Accepted, transition: Transition::Accept, roles: PROFESSIONAL },
    Edge { from: Status::Pending, to: Status::Rejected, transition: Transition::Reject, roles: PROFESSIONAL },
    Edge { from: Status::Pending, to: Status::Cancelled, transition: Transition::Cancel, roles: CUSTOMER },
    Edge { from: Status::Pending, to: Status::Pending, transition: Transition::Reschedule, roles: CUSTOMER },
    Edge { from: Status::Accepted, to: Status::Ongoing, transition: Transition::Start, roles: PROFESSIONAL },
    Edge { from: Status::Accepted, to: Status::Cancelled, transition: Transition::Cancel, roles: BOTH },
    Edge { from: Status::Accepted, to: Status::Accepted, transition: Transition::Reschedule, roles: CUSTOMER },
    Edge { from: Status::Accepted, to: Status::Accepted, transition: Transition::IssueOtp, roles: CUSTOMER },
    Edge { from: Status::Accepted, to: Status::Accepted, transition: Transition::RegenerateOtp, roles: CUSTOMER },
    Edge { from: Status::Accepted, to: Status::Accepted, transition: Transition::RequestOtpDisclosure, roles: PROFESSIONAL },
    Edge { from: Status::Ongoing, to: Status::Completed, transition: Transition::Complete, roles: PROFESSIONAL },
    Edge { from: Status::Completed, to: Status::Completed, transition: Transition::Rate, roles: CUSTOMER },
];

/// The table row for `transition` out of `from`, if any
#[must_use]
pub fn find_edge(from: Status, transition: Transition) -> Option<&'static Edge> {
    TRANSITIONS
        .iter()
        .find(|edge| edge.from == from && edge.transition == transition)
}

/// Check a request against the table and return the target status.
///
/// # Errors
///
/// - [`BookingError::AlreadyClaimed`] for `Accept` on a booking a professional already holds
/// - [`BookingError::NotInAcceptedState`] for OTP operations outside `accepted`
/// - [`BookingError::IllegalTransition`] for every other unmatched request
pub fn authorize(from: Status, transition: Transition, role: Role) -> Result<Status, BookingError> {
    let illegal = || BookingError::IllegalTransition {
        from,
        transition,
        role,
    };

    match find_edge(from, transition) {
        Some(edge) if edge.roles.contains(&role) => Ok(edge.to),
        Some(_) => Err(illegal()),
        None if transition == Transition::Accept && from.is_claimed() => {
            Err(BookingError::AlreadyClaimed)
        },
        None if transition.requires_accepted() && role != Role::Admin => {
            Err(BookingError::NotInAcceptedState { status: from })
        },
        None => Err(illegal()),
    }
}

/// Statuses reachable from `from` in exactly one transition
pub fn successors(from: Status) -> impl Iterator<Item = Status> {
    TRANSITIONS
        .iter()
        .filter(move |edge| edge.from == from)
        .map(|edge| edge.to)
}

/// Whether a subscriber may observe `to` right after `from`.
///
/// True when `to` can be reached from `from` by following table edges,
/// including staying put. Observers can miss intermediate notifications,
/// so this accepts multi-step paths.
#[must_use]
pub fn is_reachable(from: Status, to: Status) -> bool {
    let mut frontier = vec![from];
    let mut seen = vec![from];
    while let Some(status) = frontier.pop() {
        if status == to {
            return true;
        }
        for next in successors(status) {
            if !seen.contains(&next) {
                seen.push(next);
                frontier.push(next);
            }
        }
    }
    false
}
