//! Liveness and readiness probes.
//!
//! - `GET /health`: 200 while the process can serve, 503 once a media
//!   worker has died (the process is about to exit)
//! - `GET /ready`: 200 with `{"status":"ready"}` once the worker pool is up
//!   and the listener bound; 503 with the reason otherwise
//!
//! `/metrics` is served separately from the Prometheus handle.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Why the service is or is not taking traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Readiness {
    Ready,
    /// Still starting up, or draining for shutdown.
    NotReady,
    /// A media worker died; sessions routed through it are gone.
    WorkerLost,
}

#[derive(Serialize)]
struct ProbeBody {
    status: Readiness,
}

/// Probe state shared between `main` and the health router.
#[derive(Debug, Default)]
pub struct HealthState {
    ready: AtomicBool,
    worker_lost: AtomicBool,
}

impl HealthState {
    /// Starts not ready.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    /// Stop taking traffic (shutdown).
    pub fn set_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    /// Record a worker death. Both probes fail from here on.
    pub fn mark_worker_lost(&self) {
        self.worker_lost.store(true, Ordering::SeqCst);
        self.ready.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn worker_lost(&self) -> bool {
        self.worker_lost.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        !self.worker_lost()
    }

    #[must_use]
    pub fn readiness(&self) -> Readiness {
        if self.worker_lost() {
            Readiness::WorkerLost
        } else if self.ready.load(Ordering::SeqCst) {
            Readiness::Ready
        } else {
            Readiness::NotReady
        }
    }
}

/// Router serving `/health` and `/ready`.
pub fn health_router(health_state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .with_state(health_state)
}

async fn liveness_handler(State(state): State<Arc<HealthState>>) -> StatusCode {
    if state.is_live() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn readiness_handler(
    State(state): State<Arc<HealthState>>,
) -> (StatusCode, Json<ProbeBody>) {
    let status = state.readiness();
    let code = match status {
        Readiness::Ready => StatusCode::OK,
        Readiness::NotReady | Readiness::WorkerLost => StatusCode::SERVICE_UNAVAILABLE,
    };
    (code, Json(ProbeBody { status }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::util::ServiceExt;

    async fn probe(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, body.to_vec())
    }

    #[test]
    fn test_readiness_transitions() {
        let state = HealthState::new();
        assert!(state.is_live());
        assert_eq!(state.readiness(), Readiness::NotReady);

        state.set_ready();
        assert_eq!(state.readiness(), Readiness::Ready);

        state.mark_worker_lost();
        assert!(!state.is_live());
        assert_eq!(state.readiness(), Readiness::WorkerLost);

        // Shutdown does not hide the worker loss
        state.set_not_ready();
        assert_eq!(state.readiness(), Readiness::WorkerLost);
    }

    #[tokio::test]
    async fn test_liveness_is_ok_before_ready() {
        let state = Arc::new(HealthState::new());
        let (status, _) = probe(health_router(state), "/health").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ready_reports_reason() {
        let state = Arc::new(HealthState::new());
        let (status, body) = probe(health_router(Arc::clone(&state)), "/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, br#"{"status":"not_ready"}"#);

        state.set_ready();
        let (status, body) = probe(health_router(Arc::clone(&state)), "/ready").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, br#"{"status":"ready"}"#);

        state.mark_worker_lost();
        let (status, body) = probe(health_router(Arc::clone(&state)), "/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, br#"{"status":"worker_lost"}"#);

        let (status, _) = probe(health_router(state), "/health").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
