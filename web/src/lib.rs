//! HTTP and WebSocket surface for the Homeserve booking backend.
//!
//! Handlers stay thin: they resolve the calling actor, hand the command to
//! the [`BookingEngine`](homeserve_booking::BookingEngine) and map the
//! result to HTTP.
//!
//! # Request Flow
//!
//! 1. **HTTP Request** arrives at an Axum handler
//! 2. **Extract** the actor from `X-Actor-Role` / `X-Actor-Id` and the JSON body
//! 3. **Execute** the command through the engine
//! 4. **Map** the result to a [`BookingView`](homeserve_booking::BookingView)
//!    or an [`AppError`]
//!
//! # Example
//!
//! ```ignore
//! use homeserve_web::{AppState, Config, build_router};
//!
//! let config = Config::from_env()?;
//! let app = build_router(AppState::from_config(&config));
//! let listener = tokio::net::TcpListener::bind(config.bind_address()).await?;
//! axum::serve(listener, app).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::{Config, ConfigError};
pub use error::AppError;
pub use extractors::{
    ACTOR_ID_HEADER, ACTOR_ROLE_HEADER, ActorContext, BookingPath, CorrelationId,
};
pub use middleware::{CORRELATION_ID_HEADER, correlation_id_layer};
pub use routes::build_router;
pub use state::AppState;
