//! HTTP routes for the Audio Session Controller.
//!
//! Defines the Axum router and application state.

use crate::handlers;
use crate::observability::{health_router, HealthState};
use crate::service::AudioSessionService;
use axum::{
    routing::{delete, get, patch, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across all handlers.
pub struct AppState {
    pub service: Arc<AudioSessionService>,
}

/// Build the application routes.
///
/// - `/health`, `/ready` - probes, unversioned
/// - `/metrics` - Prometheus scrape endpoint, when a handle is given
/// - `/api/v1/...` - session, participant and playback operations, and the
///   per-session event stream
///
/// Every request is traced and bounded by `request_timeout`.
pub fn build_routes(
    state: Arc<AppState>,
    health: Arc<HealthState>,
    metrics_handle: Option<PrometheusHandle>,
    request_timeout: Duration,
) -> Router {
    let api_routes = Router::new()
        .route(
            "/api/v1/groups/:group_id/sessions",
            post(handlers::create_session),
        )
        .route(
            "/api/v1/groups/:group_id/sessions/active",
            get(handlers::get_active_session),
        )
        .route("/api/v1/sessions/:id", get(handlers::get_session))
        .route("/api/v1/sessions/:id/end", post(handlers::end_session))
        .route("/api/v1/sessions/:id/hold", post(handlers::hold_session))
        .route("/api/v1/sessions/:id/resume", post(handlers::resume_session))
        .route("/api/v1/sessions/:id/events", get(handlers::session_events))
        // Participants
        .route("/api/v1/sessions/:id/join", post(handlers::join_session))
        .route("/api/v1/sessions/:id/leave", post(handlers::leave_session))
        .route(
            "/api/v1/sessions/:id/participants/me",
            patch(handlers::update_participant_status),
        )
        .route(
            "/api/v1/sessions/:id/producers",
            get(handlers::list_producers),
        )
        // Media negotiation
        .route(
            "/api/v1/sessions/:id/transports",
            post(handlers::create_transport),
        )
        .route(
            "/api/v1/sessions/:id/transports/:transport_id/connect",
            post(handlers::connect_transport),
        )
        .route(
            "/api/v1/sessions/:id/transports/:transport_id/producers",
            post(handlers::create_producer),
        )
        .route(
            "/api/v1/sessions/:id/transports/:transport_id/consumers",
            post(handlers::create_consumer),
        )
        .route(
            "/api/v1/sessions/:id/consumers/:consumer_id/resume",
            post(handlers::resume_consumer),
        )
        // Music
        .route(
            "/api/v1/sessions/:id/playback",
            post(handlers::control_playback),
        )
        .route(
            "/api/v1/sessions/:id/playlist",
            post(handlers::add_track).delete(handlers::clear_playlist),
        )
        .route(
            "/api/v1/sessions/:id/playlist/:track_id",
            delete(handlers::remove_track),
        )
        .with_state(state);

    let mut router = health_router(health).merge(api_routes);

    if let Some(handle) = metrics_handle {
        router = router.merge(Router::new().route(
            "/metrics",
            get(move || {
                let handle = handle.clone();
                async move { handle.render() }
            }),
        ));
    }

    router
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_timeout))
}
