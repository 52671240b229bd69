//! Typed errors for booking commands.

use crate::status::Status;
use crate::transitions::Transition;
use crate::types::Role;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a booking command was refused.
///
/// No variant ever comes with a partially applied change. The one state
/// change that accompanies an error is the failed-attempt counter after
/// [`BookingError::InvalidOtp`].
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingError {
    /// No booking with that id (or not visible to the caller)
    #[error("booking not found")]
    NotFound,

    /// The transition table has no row for this request
    #[error("cannot {transition} a {from} booking as {role}")]
    IllegalTransition {
        /// Current status
        from: Status,
        /// Requested transition
        transition: Transition,
        /// Role of the requester
        role: Role,
    },

    /// OTP operation on a booking that is not accepted
    #[error("booking is {status}, not accepted")]
    NotInAcceptedState {
        /// Current status
        status: Status,
    },

    /// Candidate code did not match
    #[error("incorrect code, {attempts_remaining} attempts remaining")]
    InvalidOtp {
        /// Attempts left before the code locks
        attempts_remaining: u32,
    },

    /// Too many wrong codes; the customer must regenerate
    #[error("too many incorrect codes, the customer must regenerate it")]
    OtpLocked,

    /// Code is past its lifetime; the customer must regenerate
    #[error("code expired, the customer must regenerate it")]
    OtpExpired,

    /// Another professional claimed the booking first
    #[error("booking already claimed by another professional")]
    AlreadyClaimed,

    /// Malformed or out-of-range input
    #[error("invalid {field}: {message}")]
    Validation {
        /// Offending field
        field: String,
        /// What is wrong with it
        message: String,
    },

    /// The booking changed underneath the command
    #[error("booking was modified concurrently, retry")]
    Conflict,

    /// The booking store failed
    #[error("storage error: {0}")]
    Storage(String),
}

impl BookingError {
    /// Shorthand for [`BookingError::Validation`]
    #[must_use]
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Discriminant for mapping errors to user-facing messages and HTTP codes
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound => ErrorKind::NotFound,
            Self::IllegalTransition { .. } | Self::NotInAcceptedState { .. } => {
                ErrorKind::IllegalTransition
            },
            Self::InvalidOtp { .. } => ErrorKind::InvalidOtp,
            Self::OtpLocked => ErrorKind::OtpLocked,
            Self::OtpExpired => ErrorKind::OtpExpired,
            Self::AlreadyClaimed => ErrorKind::AlreadyClaimed,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Conflict => ErrorKind::Conflict,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Whether the caller can reasonably try the same request again
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::InvalidOtp { .. } | Self::Conflict | Self::Storage(_)
        )
    }
}

/// Coarse error classes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Booking not found
    NotFound,
    /// Transition not allowed
    IllegalTransition,
    /// Wrong OTP
    InvalidOtp,
    /// OTP locked
    OtpLocked,
    /// OTP expired
    OtpExpired,
    /// Claim race lost
    AlreadyClaimed,
    /// Bad input
    Validation,
    /// Concurrent modification
    Conflict,
    /// Backing store failure
    Storage,
}

impl ErrorKind {
    /// Stable machine-readable code
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::NotFound => "BOOKING_NOT_FOUND",
            Self::IllegalTransition => "ILLEGAL_TRANSITION",
            Self::InvalidOtp => "INVALID_OTP",
            Self::OtpLocked => "OTP_LOCKED",
            Self::OtpExpired => "OTP_EXPIRED",
            Self::AlreadyClaimed => "ALREADY_CLAIMED",
            Self::Validation => "VALIDATION_ERROR",
            Self::Conflict => "CONFLICT",
            Self::Storage => "STORAGE_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_in_accepted_state_is_an_illegal_transition() {
        let err = BookingError::NotInAcceptedState {
            status: Status::Pending,
        };
        assert_eq!(err.kind(), ErrorKind::IllegalTransition);
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "booking is pending, not accepted");
    }

    #[test]
    fn wrong_code_is_retryable() {
        let err = BookingError::InvalidOtp {
            attempts_remaining: 2,
        };
        assert!(err.is_retryable());
        assert_eq!(err.kind().code(), "INVALID_OTP");
        assert!(!BookingError::OtpLocked.is_retryable());
    }

    #[test]
    fn illegal_transition_message() {
        let err = BookingError::IllegalTransition {
            from: Status::Completed,
            transition: Transition::Cancel,
            role: Role::Customer,
        };
        assert_eq!(err.to_string(), "cannot cancel a completed booking as customer");
    }
}
