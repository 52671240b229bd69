//! Homeserve booking server.
//!
//! Serves the booking API, the per-booking WebSocket stream, health checks
//! and Prometheus metrics from one listener.
//!
//! # Usage
//!
//! ```bash
//! PORT=8080 BOOKING_OTP_TTL_HOURS=12 cargo run --bin homeserve-server
//! ```

use homeserve_runtime::metrics::MetricsServer;
use homeserve_web::{AppState, Config, build_router};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,homeserve=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    info!(
        address = %config.bind_address(),
        otp_ttl_hours = config.booking.otp_ttl_hours,
        otp_max_attempts = config.booking.otp_max_attempts,
        "Configuration loaded"
    );

    let mut metrics = MetricsServer::new();
    metrics.start()?;

    let state = AppState::from_config(&config).with_metrics(Arc::new(metrics));
    let engine = Arc::clone(&state.engine);

    let interval = Duration::from_secs(config.notifier.redelivery_interval.max(1));
    let redelivery = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if !engine.dead_letters().is_empty() {
                engine.redeliver_dead_letters().await;
            }
        }
    });

    let listener = tokio::net::TcpListener::bind(config.bind_address()).await?;
    info!(address = %config.bind_address(), "Server listening");

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let app = build_router(state);
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
    redelivery.abort();

    let timeout = Duration::from_secs(config.server.shutdown_timeout);
    match tokio::time::timeout(timeout, server).await {
        Ok(joined) => joined??,
        Err(_) => warn!(?timeout, "Open connections did not drain in time"),
    }

    info!("Server stopped");
    Ok(())
}

/// Graceful shutdown signal handler.
///
/// Waits for Ctrl+C (SIGINT) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            },
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C signal, shutting down gracefully"),
        () = terminate => info!("Received SIGTERM signal, shutting down gracefully"),
    }
}
