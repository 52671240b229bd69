//! Booking status and the single mapping from external status strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Lifecycle status of a booking.
///
/// `Pending` is initial. `Completed`, `Cancelled` and `Rejected` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Requested by a customer, waiting for a professional
    Pending,
    /// Claimed by a professional, OTP issued
    Accepted,
    /// Declined by the professional
    Rejected,
    /// Work in progress (OTP verified)
    Ongoing,
    /// Work finished
    Completed,
    /// Called off before work started
    Cancelled,
}

impl Status {
    /// Every status, in lifecycle order
    pub const ALL: [Self; 6] = [
        Self::Pending,
        Self::Accepted,
        Self::Ongoing,
        Self::Completed,
        Self::Rejected,
        Self::Cancelled,
    ];

    /// Canonical lowercase name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Ongoing => "ongoing",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// No status change is possible from here (ratings aside)
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Rejected)
    }

    /// A professional already holds this booking
    #[must_use]
    pub const fn is_claimed(self) -> bool {
        matches!(self, Self::Accepted | Self::Ongoing | Self::Completed)
    }

    /// UI bucket for this status
    #[must_use]
    pub const fn category(self) -> StatusCategory {
        match self {
            Self::Pending | Self::Accepted => StatusCategory::Upcoming,
            Self::Ongoing => StatusCategory::Active,
            Self::Completed => StatusCategory::Past,
            Self::Rejected | Self::Cancelled => StatusCategory::Closed,
        }
    }

    /// Map any status string a client or legacy backend may send.
    ///
    /// Matching ignores case and surrounding whitespace, and treats `-` and
    /// spaces like `_`. Returns `None` for unknown strings.
    ///
    /// ```
    /// use homeserve_booking::status::Status;
    ///
    /// assert_eq!(Status::from_external("In-Progress"), Some(Status::Ongoing));
    /// assert_eq!(Status::from_external("canceled"), Some(Status::Cancelled));
    /// assert_eq!(Status::from_external("archived"), None);
    /// ```
    #[must_use]
    pub fn from_external(raw: &str) -> Option<Self> {
        let normalized: String = raw
            .trim()
            .chars()
            .map(|c| match c {
                '-' | ' ' => '_',
                other => other.to_ascii_lowercase(),
            })
            .collect();

        match normalized.as_str() {
            "pending" | "requested" | "new" | "awaiting_acceptance" => Some(Self::Pending),
            "accepted" | "confirmed" | "assigned" | "scheduled" => Some(Self::Accepted),
            "ongoing" | "in_progress" | "started" | "active" => Some(Self::Ongoing),
            "completed" | "done" | "finished" => Some(Self::Completed),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            "rejected" | "declined" => Some(Self::Rejected),
            _ => None,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown status string
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown booking status: {0}")]
pub struct ParseStatusError(String);

impl FromStr for Status {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_external(s).ok_or_else(|| ParseStatusError(s.to_string()))
    }
}

/// Coarse grouping used by list screens ("upcoming", "past", ...)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCategory {
    /// Pending or accepted
    Upcoming,
    /// Ongoing
    Active,
    /// Completed
    Past,
    /// Rejected or cancelled
    Closed,
}

impl StatusCategory {
    /// Canonical lowercase name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Upcoming => "upcoming",
            Self::Active => "active",
            Self::Past => "past",
            Self::Closed => "closed",
        }
    }
}

impl FromStr for StatusCategory {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "upcoming" => Ok(Self::Upcoming),
            "active" => Ok(Self::Active),
            "past" => Ok(Self::Past),
            "closed" => Ok(Self::Closed),
            _ => Err(ParseStatusError(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_names_round_trip() {
        for status in Status::ALL {
            assert_eq!(status.as_str().parse::<Status>(), Ok(status));
        }
    }

    #[test]
    fn legacy_strings_map_to_one_status() {
        let cases = [
            ("requested", Status::Pending),
            ("CONFIRMED", Status::Accepted),
            ("assigned", Status::Accepted),
            ("in_progress", Status::Ongoing),
            ("in progress", Status::Ongoing),
            (" started ", Status::Ongoing),
            ("done", Status::Completed),
            ("canceled", Status::Cancelled),
            ("declined", Status::Rejected),
        ];
        for (raw, expected) in cases {
            assert_eq!(Status::from_external(raw), Some(expected), "{raw}");
        }
        assert!("refunded".parse::<Status>().is_err());
    }

    #[test]
    fn terminal_and_categories() {
        assert!(!Status::Pending.is_terminal());
        assert!(!Status::Ongoing.is_terminal());
        assert!(Status::Rejected.is_terminal());
        assert_eq!(Status::Accepted.category(), StatusCategory::Upcoming);
        assert_eq!(Status::Cancelled.category(), StatusCategory::Closed);
        assert_eq!("past".parse::<StatusCategory>(), Ok(StatusCategory::Past));
    }
}
