//! services/proxy/src/bin/kosync-proxy.rs

use proxy_lib::{
    adapters::{BookloreClient, MySqlAdapter},
    config::Config,
    error::ApiError,
    telemetry,
    web::{self, state::AppState},
};
use reading_session_core::SessionTracker;
use sqlx::mysql::MySqlPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    telemetry::init_tracing(config.log_level);
    info!("Configuration loaded. Starting KoSync proxy...");
    info!(
        upstream = %config.booklore_kosync_url,
        timeout_minutes = config.session.inactivity_timeout.as_secs() / 60,
        min_duration_seconds = config.session.min_duration_seconds,
        "Session tracking configured"
    );

    // --- 2. Prepare the Database Pool ---
    // Connections are opened on first use so the proxy starts even while the
    // database is still coming up.
    let db_pool = MySqlPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .connect_lazy(&config.database_url)?;
    let db_adapter = Arc::new(MySqlAdapter::new(db_pool.clone()));

    // --- 3. Start Session Tracking & the Upstream Client ---
    let tracker = SessionTracker::start(
        config.session,
        db_adapter.clone(),
        db_adapter,
    );
    let booklore = BookloreClient::new(config.booklore_kosync_url.clone(), config.upstream_timeout)?;

    // --- 4. Build the Shared AppState & Router ---
    let app_state = Arc::new(AppState {
        booklore,
        tracker: tracker.clone(),
    });
    let app = web::router(app_state);

    // --- 5. Serve Until Shutdown ---
    info!("Starting server on {}", config.bind_address);
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // --- 6. Drain Active Sessions ---
    info!(active = tracker.active_sessions().await, "Saving active sessions before exit");
    let summary = tracker.drain().await;
    if summary.failed > 0 {
        warn!(failed = summary.failed, "Some sessions could not be saved");
    }
    info!(
        drained = summary.drained,
        persisted = summary.persisted,
        discarded = summary.discarded,
        "Session drain complete"
    );
    db_pool.close().await;

    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
