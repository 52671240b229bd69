//! Start-of-work one-time codes.
//!
//! A booking receives a numeric code when a professional accepts it. The
//! customer reads it out on site and the professional enters it to start
//! work. Verification is constant-time. Every mismatch is counted, and the
//! code locks after `max_attempts` failures until the customer regenerates it.

use crate::error::BookingError;
use chrono::{DateTime, Duration, Utc};
use constant_time_eq::constant_time_eq;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Shortest allowed code
pub const MIN_DIGITS: u8 = 4;
/// Longest allowed code
pub const MAX_DIGITS: u8 = 6;

/// A numeric one-time code.
///
/// `Debug` never prints the digits.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OtpCode(String);

impl OtpCode {
    /// Wrap a generated code.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Validation`] unless `code` is 4 to 6 ASCII digits.
    pub fn new(code: impl Into<String>) -> Result<Self, BookingError> {
        let code = code.into();
        validate_digits(&code)?;
        Ok(Self(code))
    }

    /// The digits, for showing to the customer
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Constant-time comparison against a candidate
    #[must_use]
    pub fn matches(&self, candidate: &str) -> bool {
        constant_time_eq(self.0.as_bytes(), candidate.as_bytes())
    }
}

impl fmt::Debug for OtpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OtpCode({})", "*".repeat(self.0.len()))
    }
}

fn validate_digits(code: &str) -> Result<(), BookingError> {
    let len = code.len();
    if len < usize::from(MIN_DIGITS) || len > usize::from(MAX_DIGITS) {
        return Err(BookingError::validation(
            "otp",
            format!("must be {MIN_DIGITS} to {MAX_DIGITS} digits"),
        ));
    }
    if !code.bytes().all(|b| b.is_ascii_digit()) {
        return Err(BookingError::validation("otp", "must contain only digits"));
    }
    Ok(())
}

/// Normalise user input before comparing it.
///
/// Surrounding whitespace is ignored. Malformed input is a validation
/// error and does not count as an attempt.
///
/// # Errors
///
/// Returns [`BookingError::Validation`] for anything but 4 to 6 digits.
pub fn parse_candidate(candidate: &str) -> Result<&str, BookingError> {
    let trimmed = candidate.trim();
    validate_digits(trimmed)?;
    Ok(trimmed)
}

/// Code length, attempt limit and lifetime
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OtpPolicy {
    /// Digits in newly generated codes (4 to 6)
    pub digits: u8,
    /// Failed verifications before the code locks
    pub max_attempts: u32,
    /// How long a code stays valid after it is issued
    pub ttl: Duration,
}

impl Default for OtpPolicy {
    fn default() -> Self {
        Self {
            digits: MIN_DIGITS,
            max_attempts: 5,
            ttl: Duration::hours(24),
        }
    }
}

impl OtpPolicy {
    /// Set the code length, clamped to 4..=6
    #[must_use]
    pub fn with_digits(mut self, digits: u8) -> Self {
        self.digits = digits.clamp(MIN_DIGITS, MAX_DIGITS);
        self
    }

    /// Set the attempt limit (at least 1)
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Set the code lifetime
    #[must_use]
    pub const fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

/// The code currently bound to a booking
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtpState {
    /// The code
    pub code: OtpCode,
    /// When it was issued
    pub issued_at: DateTime<Utc>,
    /// Mismatches since it was issued
    pub failed_attempts: u32,
    /// When the professional last asked for it to be shown
    pub disclosure_requested_at: Option<DateTime<Utc>>,
}

impl OtpState {
    /// A freshly issued code
    #[must_use]
    pub const fn issued(code: OtpCode, issued_at: DateTime<Utc>) -> Self {
        Self {
            code,
            issued_at,
            failed_attempts: 0,
            disclosure_requested_at: None,
        }
    }

    /// When the code stops being accepted
    #[must_use]
    pub fn expires_at(&self, policy: &OtpPolicy) -> DateTime<Utc> {
        self.issued_at + policy.ttl
    }

    /// Whether the code is past its lifetime at `now`
    #[must_use]
    pub fn is_expired(&self, policy: &OtpPolicy, now: DateTime<Utc>) -> bool {
        now >= self.expires_at(policy)
    }

    /// Whether too many wrong codes were entered
    #[must_use]
    pub const fn is_locked(&self, policy: &OtpPolicy) -> bool {
        self.failed_attempts >= policy.max_attempts
    }

    /// Whether a plain `issue` may hand this code out again
    #[must_use]
    pub fn is_reusable(&self, policy: &OtpPolicy, now: DateTime<Utc>) -> bool {
        !self.is_expired(policy, now)
    }

    /// Attempts left before the code locks
    #[must_use]
    pub const fn attempts_remaining(&self, policy: &OtpPolicy) -> u32 {
        policy.max_attempts.saturating_sub(self.failed_attempts)
    }

    /// Check a (well-formed) candidate.
    ///
    /// Checks run in order: locked, expired, mismatch. This function does not
    /// record the attempt; the caller applies the failure.
    ///
    /// # Errors
    ///
    /// - [`BookingError::OtpLocked`] once `max_attempts` failures are recorded
    /// - [`BookingError::OtpExpired`] once the lifetime has passed
    /// - [`BookingError::InvalidOtp`] on mismatch, with the attempts left after this one
    pub fn verify(
        &self,
        candidate: &str,
        policy: &OtpPolicy,
        now: DateTime<Utc>,
    ) -> Result<(), BookingError> {
        if self.is_locked(policy) {
            return Err(BookingError::OtpLocked);
        }
        if self.is_expired(policy, now) {
            return Err(BookingError::OtpExpired);
        }
        if self.code.matches(candidate) {
            Ok(())
        } else {
            Err(BookingError::InvalidOtp {
                attempts_remaining: self.attempts_remaining(policy).saturating_sub(1),
            })
        }
    }
}
