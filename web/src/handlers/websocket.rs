//! WebSocket stream of booking notifications.
//!
//! # Architecture
//!
//! ```text
//! Client          WebSocket Handler          BookingEngine / EventBus
//!   │                    │                     │
//!   ├─ Connect ─────────>│                     │
//!   │                    ├─ subscribe(id) ────>│
//!   │                    │                     │
//!   │                    │<── notification ────┤
//!   │<─ notification ────┤                     │
//! ```
//!
//! The bus delivers at least once. The engine's feed drops any version at or
//! below the last one it yielded, so a socket only ever sees versions move
//! forward. A reconnecting client still dedupes by `(booking_id, version)`.
//! The code is only included for the owning customer.
//!
//! # Message Protocol
//!
//! **Server → Client (Notification):**
//! ```json
//! {
//!   "type": "notification",
//!   "notification": { "booking_id": "...", "version": 2, "kind": "accepted", ... }
//! }
//! ```
//!
//! **Server → Client (Lagged):** the client fell behind and should refetch
//! the booking.
//! ```json
//! { "type": "lagged", "skipped": 12 }
//! ```
//!
//! **Client → Server:** `{ "type": "ping" }` is answered with `{ "type": "pong" }`.

use crate::error::AppError;
use crate::extractors::{ActorContext, BookingPath};
use crate::state::AppState;
use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures::{SinkExt, stream::StreamExt};
use homeserve_booking::{BookingId, BookingNotification};
use homeserve_booking::notification::NotificationStream;
use homeserve_core::event_bus::EventBusError;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// WebSocket message envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    /// A change to the watched booking
    Notification {
        /// The change, redacted for the subscriber
        notification: BookingNotification,
    },
    /// Notifications were dropped; refetch the booking
    Lagged {
        /// How many were dropped
        skipped: u64,
    },
    /// Error message
    Error {
        /// Error description
        message: String,
    },
    /// Ping message (keep-alive)
    Ping,
    /// Pong response
    Pong,
}

impl WsMessage {
    /// Envelope for one item of a notification stream.
    #[must_use]
    pub fn from_stream_item(item: Result<BookingNotification, EventBusError>) -> Self {
        match item {
            Ok(notification) => Self::Notification { notification },
            Err(EventBusError::Lagged { skipped, .. }) => Self::Lagged { skipped },
            Err(err) => Self::Error {
                message: err.to_string(),
            },
        }
    }
}

/// Live notifications for one booking.
///
/// The subscription is opened before the upgrade, so a caller who may not
/// see the booking gets a plain 404 instead of a socket.
///
/// # Endpoint
///
/// ```text
/// GET /api/v1/bookings/:id/ws
/// ```
///
/// # Errors
///
/// 404 if the booking does not exist or the caller may not see it.
pub async fn booking_updates(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ActorContext(actor): ActorContext,
    BookingPath(booking_id): BookingPath,
) -> Result<Response, AppError> {
    let notifications = state.engine.subscribe(booking_id, actor).await?;
    info!(%booking_id, role = %actor.role(), "WebSocket subscription opened");
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, booking_id, notifications)))
}

/// Forward notifications to the client until either side goes away.
async fn handle_socket(
    socket: WebSocket,
    booking_id: BookingId,
    mut notifications: NotificationStream,
) {
    metrics::gauge!("websocket_connections_active").increment(1.0);

    let (mut sender, mut receiver) = socket.split();
    let (pong_tx, mut pong_rx) = mpsc::channel::<()>(8);

    let mut send_task = tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                item = notifications.next() => match item {
                    Some(item) => WsMessage::from_stream_item(item),
                    None => break,
                },
                Some(()) = pong_rx.recv() => WsMessage::Pong,
            };
            if let WsMessage::Lagged { skipped } = &message {
                warn!(%booking_id, skipped, "subscriber lagged");
            }

            let text = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(e) => {
                    warn!(error = %e, "Failed to serialize notification");
                    continue;
                },
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        debug!("WebSocket send task terminated");
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<WsMessage>(&text) {
                    Ok(WsMessage::Ping) => {
                        if pong_tx.send(()).await.is_err() {
                            break;
                        }
                    },
                    Ok(other) => warn!(?other, "Unexpected message type from client"),
                    Err(e) => debug!(error = %e, "Ignoring unparsable client message"),
                },
                Message::Close(_) => {
                    debug!("Client requested close");
                    break;
                },
                Message::Binary(_) | Message::Ping(_) | Message::Pong(_) => {},
            }
        }
        debug!("WebSocket receive task terminated");
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }

    metrics::gauge!("websocket_connections_active").decrement(1.0);
    info!(%booking_id, "WebSocket subscription closed");
}
