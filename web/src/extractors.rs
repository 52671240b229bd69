//! Custom Axum extractors.
//!
//! - `CorrelationId`: the request's correlation ID, set by the middleware
//!   or taken from the `X-Correlation-ID` header
//! - `ActorContext`: who is calling, from `X-Actor-Role` and `X-Actor-Id`
//! - `BookingPath`: the booking id from the `:id` path segment
//!
//! Authentication happens upstream; these headers are trusted as given.
//!
//! # Examples
//!
//! ```ignore
//! async fn handler(
//!     State(state): State<AppState>,
//!     correlation_id: CorrelationId,
//!     ActorContext(actor): ActorContext,
//! ) -> Result<Json<BookingView>, AppError> {
//!     tracing::info!(correlation_id = %correlation_id.0, role = %actor.role(), "Processing request");
//!     Ok(Json(state.engine.get(id, &actor).await?))
//! }
//! ```

use crate::error::AppError;
use crate::middleware::CORRELATION_ID_HEADER;
use axum::{
    async_trait,
    extract::{FromRequestParts, Path},
    http::{HeaderMap, request::Parts},
};
use homeserve_booking::{Actor, BookingId, CustomerId, ProfessionalId};
use uuid::Uuid;

/// Header naming the caller's role: `customer`, `professional` or `admin`.
pub const ACTOR_ROLE_HEADER: &str = "X-Actor-Role";

/// Header carrying the caller's customer or professional id.
pub const ACTOR_ID_HEADER: &str = "X-Actor-Id";

/// Correlation ID for request tracing.
///
/// Prefers the ID stored by [`crate::middleware::correlation_id_layer`],
/// then the `X-Correlation-ID` header, and generates a new UUID v4 otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrelationId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for CorrelationId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(id) = parts.extensions.get::<Self>() {
            return Ok(*id);
        }

        let correlation_id = parts
            .headers
            .get(CORRELATION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| Uuid::parse_str(s).ok())
            .unwrap_or_else(Uuid::new_v4);

        Ok(Self(correlation_id))
    }
}

/// The actor on whose behalf the request runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActorContext(pub Actor);

#[async_trait]
impl<S> FromRequestParts<S> for ActorContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        actor_from_headers(&parts.headers).map(Self)
    }
}

/// The booking named by the `:id` path segment.
///
/// A malformed id is a 400 with the usual JSON error body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookingPath(pub BookingId);

#[async_trait]
impl<S> FromRequestParts<S> for BookingPath
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(id) = Path::<Uuid>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| {
                AppError::bad_request("booking id must be a UUID")
                    .with_source(anyhow::Error::new(rejection))
            })?;
        Ok(Self(BookingId::from_uuid(id)))
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Result<Option<&'a str>, AppError> {
    headers
        .get(name)
        .map(|value| {
            value
                .to_str()
                .map(str::trim)
                .map_err(|_| AppError::bad_request(format!("{name} is not valid text")))
        })
        .transpose()
}

fn actor_id(headers: &HeaderMap) -> Result<Uuid, AppError> {
    let raw = header(headers, ACTOR_ID_HEADER)?
        .ok_or_else(|| AppError::unauthorized(format!("missing {ACTOR_ID_HEADER} header")))?;
    Uuid::parse_str(raw)
        .map_err(|_| AppError::bad_request(format!("{ACTOR_ID_HEADER} must be a UUID")))
}

/// Resolve the calling actor from request headers.
///
/// # Errors
///
/// 401 when the role (or the id of a customer or professional) is missing,
/// 400 when either header is malformed.
pub fn actor_from_headers(headers: &HeaderMap) -> Result<Actor, AppError> {
    let role = header(headers, ACTOR_ROLE_HEADER)?
        .ok_or_else(|| AppError::unauthorized(format!("missing {ACTOR_ROLE_HEADER} header")))?;

    match role.to_ascii_lowercase().as_str() {
        "customer" => Ok(Actor::Customer(CustomerId::from_uuid(actor_id(headers)?))),
        "professional" => Ok(Actor::Professional(ProfessionalId::from_uuid(actor_id(
            headers,
        )?))),
        "admin" => Ok(Actor::Admin),
        other => Err(AppError::bad_request(format!("unknown actor role '{other}'"))),
    }
}
