//! HTTP request handlers.
//!
//! This module contains all HTTP handlers organized by concern.

pub mod bookings;
pub mod health;
pub mod metrics;
pub mod websocket;

pub use health::{health_check, readiness_check};
