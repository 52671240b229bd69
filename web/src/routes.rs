//! Router configuration.

use crate::handlers::{bookings, health, metrics, websocket};
use crate::middleware::correlation_id_layer;
use crate::state::AppState;
use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

/// Build the complete Axum router.
///
/// - `/health`, `/health/ready`: liveness and readiness
/// - `/metrics`: Prometheus scrape endpoint
/// - `/api/v1/bookings/...`: booking commands, queries and the live stream
pub fn build_router(state: AppState) -> Router {
    let booking_routes = Router::new()
        .route(
            "/",
            post(bookings::create_booking).get(bookings::list_bookings),
        )
        .route("/:id", get(bookings::get_booking))
        .route("/:id/accept", post(bookings::accept_booking))
        .route("/:id/reject", post(bookings::reject_booking))
        .route("/:id/cancel", post(bookings::cancel_booking))
        .route("/:id/reschedule", post(bookings::reschedule_booking))
        .route("/:id/otp", post(bookings::issue_otp))
        .route("/:id/otp/regenerate", post(bookings::regenerate_otp))
        .route("/:id/otp/disclosure", post(bookings::request_otp_disclosure))
        .route("/:id/start", post(bookings::start_booking))
        .route("/:id/complete", post(bookings::complete_booking))
        .route("/:id/rate", post(bookings::rate_booking))
        .route("/:id/ws", get(websocket::booking_updates));

    Router::new()
        .route("/health", get(health::health_check))
        .route("/health/ready", get(health::readiness_check))
        .route("/metrics", get(metrics::render_metrics))
        .nest("/api/v1/bookings", booking_routes)
        .layer(correlation_id_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
