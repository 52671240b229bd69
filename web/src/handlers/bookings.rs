//! Booking API endpoints.
//!
//! - `POST /api/v1/bookings` - request a service (customer)
//! - `GET /api/v1/bookings` - list visible bookings
//! - `GET /api/v1/bookings/:id` - one booking
//! - `POST /api/v1/bookings/:id/{accept,reject,cancel,reschedule,start,complete,rate}`
//! - `POST /api/v1/bookings/:id/otp` - fetch or issue the start-of-work code
//! - `POST /api/v1/bookings/:id/otp/regenerate` - replace the code
//! - `POST /api/v1/bookings/:id/otp/disclosure` - professional has arrived
//!
//! Every command answers with the booking as the caller may see it.

use crate::error::AppError;
use crate::extractors::{ActorContext, BookingPath, CorrelationId};
use crate::state::AppState;
use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};
use homeserve_booking::{
    Actor, Booking, BookingError, BookingFilter, BookingId, BookingView, NewBooking,
    ProfessionalId, Slot, Status, StatusCategory,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Optional free-text reason for rejecting or cancelling.
#[derive(Debug, Deserialize)]
pub struct ReasonRequest {
    /// Reason shown to the other party
    #[serde(default)]
    pub reason: Option<String>,
}

/// New slot for a reschedule.
#[derive(Debug, Deserialize)]
pub struct RescheduleRequest {
    /// Requested slot
    pub slot: Slot,
}

/// Code typed in by the professional.
#[derive(Debug, Deserialize)]
pub struct StartRequest {
    /// Candidate code
    pub otp: String,
}

/// Customer's rating.
#[derive(Debug, Deserialize)]
pub struct RateRequest {
    /// Stars, 1 to 5
    pub rating: u8,
    /// Optional review text
    #[serde(default)]
    pub review: Option<String>,
}

/// The start-of-work code, for the owning customer.
#[derive(Debug, Serialize, Deserialize)]
pub struct OtpResponse {
    /// Booking the code belongs to
    pub booking_id: BookingId,
    /// The code
    pub otp: String,
}

/// Query parameters for listing bookings.
#[derive(Debug, Default, Deserialize)]
pub struct ListBookingsQuery {
    /// Status, including legacy spellings such as `in-progress`
    pub status: Option<String>,
    /// List tab
    pub category: Option<StatusCategory>,
    /// Assigned professional
    pub professional: Option<Uuid>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Request a service.
///
/// # Example
///
/// ```bash
/// curl -X POST http://localhost:8080/api/v1/bookings \
///   -H "X-Actor-Role: customer" -H "X-Actor-Id: <uuid>" \
///   -H "Content-Type: application/json" \
///   -d '{
///     "service": "Deep cleaning",
///     "address": "12 Rue des Lilas",
///     "slot": { "date": "2025-01-02", "time": "10:00:00" },
///     "price": 5000,
///     "payment_method": "cash"
///   }'
/// ```
///
/// # Errors
///
/// 422 for invalid input or a non-customer caller.
pub async fn create_booking(
    State(state): State<AppState>,
    correlation_id: CorrelationId,
    ActorContext(actor): ActorContext,
    Json(request): Json<NewBooking>,
) -> Result<(StatusCode, Json<BookingView>), AppError> {
    let booking = state.engine.create(actor, request).await?;
    tracing::info!(
        correlation_id = %correlation_id.0,
        booking_id = %booking.id,
        "booking requested"
    );
    Ok((StatusCode::CREATED, Json(BookingView::new(&booking, &actor))))
}

/// List bookings visible to the caller, earliest slot first.
///
/// Customers only ever see their own bookings. Professionals see the ones
/// assigned to them plus pending requests open to them.
///
/// # Errors
///
/// 422 for an unknown status.
pub async fn list_bookings(
    State(state): State<AppState>,
    ActorContext(actor): ActorContext,
    Query(query): Query<ListBookingsQuery>,
) -> Result<Json<Vec<BookingView>>, AppError> {
    let mut filter = BookingFilter::default();
    if let Some(raw) = query.status.as_deref() {
        let status = Status::from_external(raw).ok_or_else(|| {
            AppError::from(BookingError::validation(
                "status",
                format!("unknown status '{raw}'"),
            ))
        })?;
        filter = filter.with_status(status);
    }
    if let Some(category) = query.category {
        filter = filter.with_category(category);
    }
    filter.professional = query.professional.map(ProfessionalId::from_uuid);

    Ok(Json(state.engine.list(&filter, &actor).await?))
}

/// One booking.
///
/// # Errors
///
/// 404 if it does not exist or the caller may not see it.
pub async fn get_booking(
    State(state): State<AppState>,
    ActorContext(actor): ActorContext,
    BookingPath(id): BookingPath,
) -> Result<Json<BookingView>, AppError> {
    Ok(Json(state.engine.get(id, &actor).await?))
}

fn view(booking: &Booking, actor: &Actor) -> Json<BookingView> {
    Json(BookingView::new(booking, actor))
}

/// Professional claims a pending booking.
///
/// # Errors
///
/// 409 when already claimed or not pending.
pub async fn accept_booking(
    State(state): State<AppState>,
    ActorContext(actor): ActorContext,
    BookingPath(id): BookingPath,
) -> Result<Json<BookingView>, AppError> {
    let booking = state.engine.accept(id, actor).await?;
    Ok(view(&booking, &actor))
}

/// Professional declines a pending booking.
///
/// # Errors
///
/// 409 unless the booking is pending and open to the caller.
pub async fn reject_booking(
    State(state): State<AppState>,
    ActorContext(actor): ActorContext,
    BookingPath(id): BookingPath,
    body: Option<Json<ReasonRequest>>,
) -> Result<Json<BookingView>, AppError> {
    let reason = body.and_then(|Json(request)| request.reason);
    let booking = state.engine.reject(id, actor, reason).await?;
    Ok(view(&booking, &actor))
}

/// Customer or assigned professional calls the booking off.
///
/// A late customer cancellation of an accepted booking carries a fee,
/// visible under `cancellation.fee` in the response.
///
/// # Errors
///
/// 409 once work has started or the booking is closed.
pub async fn cancel_booking(
    State(state): State<AppState>,
    ActorContext(actor): ActorContext,
    BookingPath(id): BookingPath,
    body: Option<Json<ReasonRequest>>,
) -> Result<Json<BookingView>, AppError> {
    let reason = body.and_then(|Json(request)| request.reason);
    let booking = state.engine.cancel(id, actor, reason).await?;
    Ok(view(&booking, &actor))
}

/// Customer moves the slot.
///
/// # Errors
///
/// 422 when the current slot is too close or the new slot is not in the future.
pub async fn reschedule_booking(
    State(state): State<AppState>,
    ActorContext(actor): ActorContext,
    BookingPath(id): BookingPath,
    Json(request): Json<RescheduleRequest>,
) -> Result<Json<BookingView>, AppError> {
    let booking = state.engine.reschedule(id, actor, request.slot).await?;
    Ok(view(&booking, &actor))
}

/// Customer fetches the code, issuing a fresh one if the old one expired.
///
/// # Errors
///
/// 409 unless the booking is accepted and the caller owns it.
pub async fn issue_otp(
    State(state): State<AppState>,
    ActorContext(actor): ActorContext,
    BookingPath(booking_id): BookingPath,
) -> Result<Json<OtpResponse>, AppError> {
    let code = state.engine.issue_otp(booking_id, actor).await?;
    Ok(Json(OtpResponse {
        booking_id,
        otp: code.as_str().to_string(),
    }))
}

/// Customer replaces the code, clearing any lock.
///
/// # Errors
///
/// 409 unless the booking is accepted and the caller owns it.
pub async fn regenerate_otp(
    State(state): State<AppState>,
    ActorContext(actor): ActorContext,
    BookingPath(booking_id): BookingPath,
) -> Result<Json<OtpResponse>, AppError> {
    let code = state.engine.regenerate_otp(booking_id, actor).await?;
    Ok(Json(OtpResponse {
        booking_id,
        otp: code.as_str().to_string(),
    }))
}

/// Assigned professional signals arrival; the customer's tracker shows the code.
///
/// # Errors
///
/// 409 unless the booking is accepted and assigned to the caller.
pub async fn request_otp_disclosure(
    State(state): State<AppState>,
    ActorContext(actor): ActorContext,
    BookingPath(id): BookingPath,
) -> Result<Json<BookingView>, AppError> {
    let booking = state.engine.request_otp_disclosure(id, actor).await?;
    Ok(view(&booking, &actor))
}

/// Assigned professional enters the code and starts work.
///
/// # Errors
///
/// - 422 for a wrong code (the message says how many attempts remain)
/// - 423 once the code is locked
/// - 410 once the code expired
pub async fn start_booking(
    State(state): State<AppState>,
    ActorContext(actor): ActorContext,
    BookingPath(id): BookingPath,
    Json(request): Json<StartRequest>,
) -> Result<Json<BookingView>, AppError> {
    let booking = state.engine.start(id, actor, request.otp).await?;
    Ok(view(&booking, &actor))
}

/// Assigned professional marks the work done.
///
/// # Errors
///
/// 409 unless work is ongoing.
pub async fn complete_booking(
    State(state): State<AppState>,
    ActorContext(actor): ActorContext,
    BookingPath(id): BookingPath,
) -> Result<Json<BookingView>, AppError> {
    let booking = state.engine.complete(id, actor).await?;
    Ok(view(&booking, &actor))
}

/// Customer rates a completed booking, once.
///
/// # Errors
///
/// 422 for a rating outside 1..=5, 409 for a second rating.
pub async fn rate_booking(
    State(state): State<AppState>,
    ActorContext(actor): ActorContext,
    BookingPath(id): BookingPath,
    Json(request): Json<RateRequest>,
) -> Result<Json<BookingView>, AppError> {
    let booking = state.engine.rate(id, actor, request.rating, request.review).await?;
    Ok(view(&booking, &actor))
}
