//! Audio Session Controller
//!
//! Runs Huddle's group voice sessions on top of a pool of media workers.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize tracing and the Prometheus metrics recorder
//! 3. Connect to PostgreSQL and apply migrations
//! 4. Create the media worker pool (fail startup if any worker fails)
//! 5. Start the HTTP server (API, health, metrics)
//! 6. Wait for a shutdown signal or a worker death
//!
//! A dead worker leaves the sessions routed through it unrecoverable, so
//! the process shuts down and exits non-zero; the supervisor restarts it
//! and rooms are rebuilt from the store on first use.

#![warn(clippy::pedantic)]
#![allow(clippy::too_many_lines)] // main.rs orchestrates startup, naturally longer

use std::net::SocketAddr;
use std::sync::Arc;

use asc_service::config::Config;
use asc_service::engine::HttpMediaEngine;
use asc_service::groups::HttpGroupDirectory;
use asc_service::observability::{init_metrics_recorder, HealthState};
use asc_service::rooms::RoomRegistry;
use asc_service::routes::{build_routes, AppState};
use asc_service::service::AudioSessionService;
use asc_service::sessions::SessionContext;
use asc_service::store::PgSessionStore;
use asc_service::workers::WorkerPool;
use common::secret::redacted_dsn;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Configuration first: it carries the default log filter
    let config = Config::from_env()?;

    let json_logs = config.observability.json_logs;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.observability.log_filter.clone().into()),
        )
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(tracing_subscriber::fmt::layer))
        .init();

    info!("Starting Audio Session Controller");
    info!(
        instance_id = %config.instance_id,
        bind_address = %config.bind_address,
        worker_count = config.worker_count,
        media_engine_url = %config.media_engine_url,
        group_service_url = %config.group_service_url,
        "Configuration loaded successfully"
    );

    // Initialize Prometheus metrics recorder
    // This must happen before any metrics are recorded
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;

    let health_state = Arc::new(HealthState::new());

    // Durable store
    info!(database = %redacted_dsn(&config.database_url), "Connecting to database");
    let store = PgSessionStore::connect(&config.database_url, &config.database)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to connect to database");
            e
        })?;
    store.migrate().await.map_err(|e| {
        error!(error = %e, "Failed to apply migrations");
        e
    })?;
    info!("Database ready");

    // Worker pool (MUST succeed - sessions cannot be routed without it)
    let engine = HttpMediaEngine::new(
        config.media_engine_url.clone(),
        config.worker_health_interval,
    )
    .map_err(|e| {
        error!(error = %e, "Failed to create media engine client");
        e
    })?;
    let pool = WorkerPool::create(&engine, config.worker_count, &config.worker_settings())
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to create worker pool");
            e
        })?;
    info!(workers = ?pool.worker_ids(), "Worker pool created");

    let shutdown_token = CancellationToken::new();
    {
        let token = shutdown_token.clone();
        let health = Arc::clone(&health_state);
        pool.on_worker_died(move |death| {
            error!(
                worker_id = death.worker_id,
                reason = %death.reason,
                "Media worker died, shutting down"
            );
            health.mark_worker_lost();
            token.cancel();
        });
    }

    let groups = HttpGroupDirectory::new(
        config.group_service_url.clone(),
        config.group_service_token.clone(),
    )?;

    let service = Arc::new(AudioSessionService::new(SessionContext {
        pool: Arc::new(pool),
        rooms: Arc::new(RoomRegistry::new()),
        store: Arc::new(store),
        groups: Arc::new(groups),
        transport_options: config.transport_options(),
    }));

    let app = build_routes(
        Arc::new(AppState { service }),
        Arc::clone(&health_state),
        Some(prometheus_handle),
        config.request_timeout,
    );

    // Bind listener BEFORE spawning to fail fast on bind errors
    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.bind_address, "Invalid bind address");
        format!("Invalid bind address: {e}")
    })?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!(error = %e, addr = %addr, "Failed to bind HTTP server");
        format!("Failed to bind HTTP server to {addr}: {e}")
    })?;

    let server_token = shutdown_token.child_token();
    let server = tokio::spawn(async move {
        info!(addr = %addr, "HTTP server starting");
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            server_token.cancelled().await;
            info!("HTTP server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "HTTP server failed");
        }
    });

    health_state.set_ready();
    info!("Audio Session Controller running - press Ctrl+C to shutdown");

    tokio::select! {
        () = shutdown_signal() => {
            info!("Shutdown signal received, initiating graceful shutdown...");
        }
        () = shutdown_token.cancelled() => {}
    }

    // Mark as not ready immediately so k8s stops sending traffic
    health_state.set_not_ready();
    shutdown_token.cancel();

    if let Err(e) = server.await {
        error!(error = %e, "HTTP server task panicked");
    }

    if health_state.worker_lost() {
        error!("Audio Session Controller exiting after media worker death");
        return Err("media worker died".into());
    }

    info!("Audio Session Controller shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. This is acceptable because
/// without signal handlers, we cannot gracefully shut down the service.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
