//! Booking persistence with optimistic concurrency.
//!
//! The store keeps the latest snapshot of every booking. Writers state the
//! version they read; a write against any other stored version fails with
//! [`RepositoryError::VersionConflict`] and nothing is changed.
//!
//! # Dyn Compatibility
//!
//! [`BookingRepository`] returns `Pin<Box<dyn Future>>` so engines can hold
//! it as `Arc<dyn BookingRepository>`.

use crate::error::BookingError;
use crate::status::{Status, StatusCategory};
use crate::types::{Booking, BookingId, CustomerId, ProfessionalId};
use homeserve_core::version::Version;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use tokio::sync::RwLock;

/// Errors from a booking store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// The stored version moved on since the writer read it
    #[error("version conflict on booking {booking_id}: expected {expected}, found {actual}")]
    VersionConflict {
        /// Booking being written
        booking_id: BookingId,
        /// Version the writer read
        expected: Version,
        /// Version currently stored
        actual: Version,
    },

    /// The backing store failed
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<RepositoryError> for BookingError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::VersionConflict { .. } => Self::Conflict,
            RepositoryError::Storage(message) => Self::Storage(message),
        }
    }
}

/// Which bookings to list.
///
/// Empty fields match everything; set fields must all match.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BookingFilter {
    /// Only this customer's bookings
    pub customer: Option<CustomerId>,
    /// Only bookings assigned to this professional
    pub professional: Option<ProfessionalId>,
    /// Only bookings in this status
    pub status: Option<Status>,
    /// Only bookings in this list tab
    pub category: Option<StatusCategory>,
}

impl BookingFilter {
    /// Bookings of one customer
    #[must_use]
    pub fn for_customer(customer: CustomerId) -> Self {
        Self {
            customer: Some(customer),
            ..Self::default()
        }
    }

    /// Bookings assigned to one professional
    #[must_use]
    pub fn for_professional(professional: ProfessionalId) -> Self {
        Self {
            professional: Some(professional),
            ..Self::default()
        }
    }

    /// Restrict to a status
    #[must_use]
    pub const fn with_status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    /// Restrict to a list tab
    #[must_use]
    pub const fn with_category(mut self, category: StatusCategory) -> Self {
        self.category = Some(category);
        self
    }

    /// Whether `booking` passes the filter
    #[must_use]
    pub fn matches(&self, booking: &Booking) -> bool {
        self.customer.is_none_or(|c| c == booking.customer_id)
            && self
                .professional
                .is_none_or(|p| Some(p) == booking.professional_id)
            && self.status.is_none_or(|s| s == booking.status)
            && self.category.is_none_or(|c| c == booking.status.category())
    }
}

/// Snapshot store for bookings
pub trait BookingRepository: Send + Sync {
    /// Load a booking, `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::Storage`] when the store fails.
    fn load(
        &self,
        id: BookingId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Booking>, RepositoryError>> + Send + '_>>;

    /// Store `booking` if the stored version still equals `expected`.
    ///
    /// `expected` is [`Version::INITIAL`] for a booking the writer believes
    /// is new.
    ///
    /// # Errors
    ///
    /// - [`RepositoryError::VersionConflict`] when another writer got there first
    /// - [`RepositoryError::Storage`] when the store fails
    fn save(
        &self,
        booking: &Booking,
        expected: Version,
    ) -> Pin<Box<dyn Future<Output = Result<(), RepositoryError>> + Send + '_>>;

    /// Bookings passing `filter`, ordered by slot (earliest first).
    ///
    /// # Errors
    ///
    /// [`RepositoryError::Storage`] when the store fails.
    fn list(
        &self,
        filter: &BookingFilter,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Booking>, RepositoryError>> + Send + '_>>;
}

/// In-memory booking store.
///
/// Compare-and-set happens under one write lock, so concurrent saves of the
/// same version are serialised and exactly one wins.
#[derive(Debug, Default)]
pub struct InMemoryBookingRepository {
    bookings: RwLock<HashMap<BookingId, Booking>>,
}

impl InMemoryBookingRepository {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored bookings
    pub async fn len(&self) -> usize {
        self.bookings.read().await.len()
    }

    /// Whether the store is empty
    pub async fn is_empty(&self) -> bool {
        self.bookings.read().await.is_empty()
    }
}

impl BookingRepository for InMemoryBookingRepository {
    fn load(
        &self,
        id: BookingId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Booking>, RepositoryError>> + Send + '_>> {
        Box::pin(async move { Ok(self.bookings.read().await.get(&id).cloned()) })
    }

    fn save(
        &self,
        booking: &Booking,
        expected: Version,
    ) -> Pin<Box<dyn Future<Output = Result<(), RepositoryError>> + Send + '_>> {
        let booking = booking.clone();
        Box::pin(async move {
            let mut bookings = self.bookings.write().await;
            let actual = bookings
                .get(&booking.id)
                .map_or(Version::INITIAL, |stored| stored.version);
            if actual != expected {
                return Err(RepositoryError::VersionConflict {
                    booking_id: booking.id,
                    expected,
                    actual,
                });
            }
            bookings.insert(booking.id, booking);
            Ok(())
        })
    }

    fn list(
        &self,
        filter: &BookingFilter,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Booking>, RepositoryError>> + Send + '_>> {
        let filter = filter.clone();
        Box::pin(async move {
            let mut found: Vec<Booking> = self
                .bookings
                .read()
                .await
                .values()
                .filter(|booking| filter.matches(booking))
                .cloned()
                .collect();
            found.sort_by(|a, b| a.slot.cmp(&b.slot).then_with(|| a.id.cmp(&b.id)));
            Ok(found)
        })
    }
}
