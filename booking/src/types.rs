//! Domain types for the booking lifecycle.
//!
//! Identifiers, money, actors, the service slot and the [`Booking`] entity
//! itself. Everything here is a plain value; the rules for changing a
//! booking live in the reducer.

use crate::otp::OtpState;
use crate::status::Status;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use homeserve_core::version::Version;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for a booking
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BookingId(Uuid);

impl BookingId {
    /// Creates a new random `BookingId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `BookingId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for BookingId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BookingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for BookingId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Unique identifier for a customer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CustomerId(Uuid);

impl CustomerId {
    /// Creates a new random `CustomerId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `CustomerId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for CustomerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CustomerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CustomerId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Unique identifier for a service professional
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProfessionalId(Uuid);

impl ProfessionalId {
    /// Creates a new random `ProfessionalId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `ProfessionalId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for ProfessionalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProfessionalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ProfessionalId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

// ============================================================================
// Value Objects
// ============================================================================

/// Money amount in the smallest currency unit (cents)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    /// Creates a `Money` value from cents
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Returns the amount in cents
    #[must_use]
    pub const fn cents(&self) -> u64 {
        self.0
    }

    /// Checks if the amount is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// `percent`% of this amount, rounded down to the cent
    #[must_use]
    pub fn percent(self, percent: u8) -> Self {
        Self(self.0.saturating_mul(u64::from(percent)) / 100)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

/// How the customer pays for the service
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Cash handed to the professional after the job
    Cash,
    /// Card charged through the platform
    Card,
    /// Prepaid platform wallet
    Wallet,
}

/// Role of whoever issued a command
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The customer who requested the service
    Customer,
    /// A service professional
    Professional,
    /// Platform operator
    Admin,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Customer => "customer",
            Self::Professional => "professional",
            Self::Admin => "admin",
        })
    }
}

/// The authenticated identity behind a command
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Actor {
    /// A customer
    Customer(CustomerId),
    /// A professional
    Professional(ProfessionalId),
    /// An admin
    Admin,
}

impl Actor {
    /// The role this actor acts in
    #[must_use]
    pub const fn role(&self) -> Role {
        match self {
            Self::Customer(_) => Role::Customer,
            Self::Professional(_) => Role::Professional,
            Self::Admin => Role::Admin,
        }
    }
}

/// Agreed service slot (`scheduled_date` + `scheduled_time`).
///
/// Slots are wall-clock values in UTC.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Slot {
    /// Scheduled date
    pub date: NaiveDate,
    /// Scheduled start time
    pub time: NaiveTime,
}

impl Slot {
    /// Creates a slot from a date and a time
    #[must_use]
    pub const fn new(date: NaiveDate, time: NaiveTime) -> Self {
        Self { date, time }
    }

    /// Creates the slot that starts at `instant`
    #[must_use]
    pub fn starting_at(instant: DateTime<Utc>) -> Self {
        Self {
            date: instant.date_naive(),
            time: instant.time(),
        }
    }

    /// The instant the slot starts
    #[must_use]
    pub fn starts_at(&self) -> DateTime<Utc> {
        self.date.and_time(self.time).and_utc()
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.date, self.time.format("%H:%M"))
    }
}

/// Star rating, 1 to 5 inclusive
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rating(u8);

impl Rating {
    /// Lowest allowed rating
    pub const MIN: u8 = 1;
    /// Highest allowed rating
    pub const MAX: u8 = 5;

    /// Creates a rating, or `None` when `value` is outside 1..=5
    #[must_use]
    pub const fn new(value: u8) -> Option<Self> {
        if value >= Self::MIN && value <= Self::MAX {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Returns the numeric rating
    #[must_use]
    pub const fn value(&self) -> u8 {
        self.0
    }
}

// ============================================================================
// Entity
// ============================================================================

/// How a booking was cancelled
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cancellation {
    /// Who cancelled
    pub by: Role,
    /// Free-text reason
    pub reason: Option<String>,
    /// Late-cancellation fee charged to the customer
    pub fee: Option<Money>,
    /// When the booking was cancelled
    pub at: DateTime<Utc>,
}

/// How a booking was rejected
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    /// Professional who turned the request down
    pub by: ProfessionalId,
    /// Free-text reason
    pub reason: Option<String>,
    /// When the booking was rejected
    pub at: DateTime<Utc>,
}

/// Customer feedback on a completed booking
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    /// Star rating
    pub rating: Rating,
    /// Optional written review
    pub comment: Option<String>,
    /// When the rating was left
    pub at: DateTime<Utc>,
}

/// A single scheduled service engagement between a customer and a professional.
///
/// Only the booking reducer mutates this type. Every applied event bumps
/// `version` by one.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    /// Booking identifier
    pub id: BookingId,
    /// Customer who requested the service
    pub customer_id: CustomerId,
    /// Professional the request was addressed to, if it was targeted
    pub requested_professional: Option<ProfessionalId>,
    /// Professional who accepted the booking
    pub professional_id: Option<ProfessionalId>,
    /// Lifecycle status
    pub status: Status,
    /// Service name, e.g. "Deep cleaning"
    pub service: String,
    /// Where the service takes place
    pub address: String,
    /// Agreed slot
    pub slot: Slot,
    /// Agreed price
    pub price: Money,
    /// Payment method
    pub payment_method: PaymentMethod,
    /// Start-of-work code, present from acceptance onwards
    pub otp: Option<OtpState>,
    /// When the booking was requested
    pub created_at: DateTime<Utc>,
    /// When a professional accepted
    pub accepted_at: Option<DateTime<Utc>>,
    /// When work started (OTP verified)
    pub started_at: Option<DateTime<Utc>>,
    /// When work was completed
    pub completed_at: Option<DateTime<Utc>>,
    /// Cancellation details
    pub cancellation: Option<Cancellation>,
    /// Rejection details
    pub rejection: Option<Rejection>,
    /// Customer rating and review
    pub review: Option<Review>,
    /// Optimistic-concurrency version
    pub version: Version,
}

impl Booking {
    /// When the current slot starts
    #[must_use]
    pub fn scheduled_at(&self) -> DateTime<Utc> {
        self.slot.starts_at()
    }

    /// Whether `actor` is this booking's customer
    #[must_use]
    pub fn is_customer(&self, actor: &Actor) -> bool {
        matches!(actor, Actor::Customer(id) if *id == self.customer_id)
    }

    /// Whether `actor` is the professional assigned to this booking
    #[must_use]
    pub fn is_assigned_professional(&self, actor: &Actor) -> bool {
        matches!(actor, Actor::Professional(id) if Some(*id) == self.professional_id)
    }

    /// Whether `actor` may claim or decline this booking while it is pending
    #[must_use]
    pub fn is_open_to(&self, actor: &Actor) -> bool {
        match actor {
            Actor::Professional(id) => self.requested_professional.is_none_or(|p| p == *id),
            Actor::Customer(_) | Actor::Admin => false,
        }
    }

    /// Cancellation reason, if cancelled
    #[must_use]
    pub fn cancel_reason(&self) -> Option<&str> {
        self.cancellation.as_ref().and_then(|c| c.reason.as_deref())
    }

    /// Rejection reason, if rejected
    #[must_use]
    pub fn rejection_reason(&self) -> Option<&str> {
        self.rejection.as_ref().and_then(|r| r.reason.as_deref())
    }
}
