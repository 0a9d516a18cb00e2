//! Audio Session Controller error types.
//!
//! Every operation returns [`AscError`] synchronously; nothing is retried
//! inside the service. Errors map to HTTP status codes via `IntoResponse`
//! and to stable numeric codes via [`AscError::error_code`]. Messages for
//! store, engine and directory failures are logged server-side and replaced
//! by generic text for clients.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::error::HuddleError;
use serde::Serialize;
use thiserror::Error;

/// Audio Session Controller error type.
///
/// Numeric codes:
/// - `BadRequest`: 1
/// - `Unauthenticated`: 2
/// - `SessionNotFound`, `NotFound`: 4
/// - `PermissionDenied`: 3
/// - `Conflict`: 5
/// - `InvalidState`, `EmptyPlaylist`: 8
/// - `EngineUnavailable`: 9
/// - `Store`, `GroupDirectory`, `Config`, `Internal`: 6
#[derive(Debug, Error)]
pub enum AscError {
    /// Malformed request body or path.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// No acting user on the request.
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// No session with this id (or no live session for this group).
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Transport, producer, consumer, participant or track absent.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The group directory or ownership check refused the caller.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Operation not allowed in the current session/playback state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Playback requested with nothing in the playlist.
    #[error("Playlist is empty")]
    EmptyPlaylist,

    /// A live session already exists for the group.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A media engine call failed.
    #[error("Media engine unavailable: {0}")]
    EngineUnavailable(String),

    /// Durable session store failure.
    #[error("Store error: {0}")]
    Store(String),

    /// Group directory call failed.
    #[error("Group directory error: {0}")]
    GroupDirectory(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AscError {
    /// Returns the stable numeric code for this error.
    #[must_use]
    pub fn error_code(&self) -> i32 {
        match self {
            AscError::BadRequest(_) => 1,
            AscError::Unauthenticated(_) => 2,
            AscError::PermissionDenied(_) => 3,
            AscError::SessionNotFound(_) | AscError::NotFound(_) => 4,
            AscError::Conflict(_) => 5,
            AscError::Store(_)
            | AscError::GroupDirectory(_)
            | AscError::Config(_)
            | AscError::Internal(_) => 6,
            AscError::InvalidState(_) | AscError::EmptyPlaylist => 8,
            AscError::EngineUnavailable(_) => 9,
        }
    }

    /// Returns the HTTP status for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            AscError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AscError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            AscError::SessionNotFound(_) | AscError::NotFound(_) => StatusCode::NOT_FOUND,
            AscError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            AscError::Conflict(_) => StatusCode::CONFLICT,
            AscError::InvalidState(_) | AscError::EmptyPlaylist => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            AscError::EngineUnavailable(_) | AscError::GroupDirectory(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AscError::Store(_) | AscError::Config(_) | AscError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            AscError::Store(_) | AscError::Config(_) | AscError::Internal(_) => {
                "An internal error occurred".to_string()
            }
            AscError::EngineUnavailable(_) => {
                "Media engine is unavailable, please try again".to_string()
            }
            AscError::GroupDirectory(_) => "Group service is unavailable".to_string(),
            AscError::EmptyPlaylist => "Playlist is empty".to_string(),
            AscError::BadRequest(msg)
            | AscError::Unauthenticated(msg)
            | AscError::SessionNotFound(msg)
            | AscError::NotFound(msg)
            | AscError::PermissionDenied(msg)
            | AscError::InvalidState(msg)
            | AscError::Conflict(msg) => msg.clone(),
        }
    }

    /// Short label used for metrics.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            AscError::BadRequest(_) => "bad_request",
            AscError::Unauthenticated(_) => "unauthenticated",
            AscError::SessionNotFound(_) | AscError::NotFound(_) => "not_found",
            AscError::PermissionDenied(_) => "permission_denied",
            AscError::InvalidState(_) | AscError::EmptyPlaylist => "invalid_state",
            AscError::Conflict(_) => "conflict",
            AscError::EngineUnavailable(_) => "engine_unavailable",
            AscError::Store(_)
            | AscError::GroupDirectory(_)
            | AscError::Config(_)
            | AscError::Internal(_) => "internal",
        }
    }
}

impl From<HuddleError> for AscError {
    fn from(err: HuddleError) -> Self {
        match err {
            HuddleError::Database(msg) => AscError::Store(msg),
            HuddleError::Upstream(msg) => AscError::GroupDirectory(msg),
            HuddleError::Configuration(msg) => AscError::Config(msg),
            HuddleError::NotFound(msg) => AscError::NotFound(msg),
            HuddleError::Serialization(msg) | HuddleError::Internal(msg) => {
                AscError::Internal(msg)
            }
        }
    }
}

impl From<sqlx::Error> for AscError {
    fn from(err: sqlx::Error) -> Self {
        AscError::Store(err.to_string())
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: i32,
    kind: &'static str,
    message: String,
}

impl IntoResponse for AscError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(target: "asc.errors", error = %self, "Request failed");
        }

        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.error_code(),
                kind: self.label(),
                message: self.client_message(),
            },
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(AscError::BadRequest("body".into()).error_code(), 1);
        assert_eq!(AscError::Unauthenticated("header".into()).error_code(), 2);
        assert_eq!(AscError::PermissionDenied("x".into()).error_code(), 3);
        assert_eq!(AscError::SessionNotFound("s".into()).error_code(), 4);
        assert_eq!(AscError::NotFound("transport".into()).error_code(), 4);
        assert_eq!(AscError::Conflict("active".into()).error_code(), 5);
        assert_eq!(AscError::Store("db".into()).error_code(), 6);
        assert_eq!(AscError::EmptyPlaylist.error_code(), 8);
        assert_eq!(AscError::InvalidState("ended".into()).error_code(), 8);
        assert_eq!(AscError::EngineUnavailable("down".into()).error_code(), 9);
    }

    #[test]
    fn test_not_found_and_permission_are_distinguishable() {
        let nf = AscError::SessionNotFound("session abc".into());
        let pd = AscError::PermissionDenied("not an admin".into());

        assert_ne!(nf.status_code(), pd.status_code());
        assert_eq!(nf.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(pd.status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_client_messages_hide_internal_details() {
        let err = AscError::Store("connection refused at 10.0.0.7:5432".into());
        assert_eq!(err.client_message(), "An internal error occurred");

        let err = AscError::EngineUnavailable("POST http://engine:7000 failed".into());
        assert!(!err.client_message().contains("engine:7000"));
    }

    #[test]
    fn test_from_common_error() {
        let err: AscError = HuddleError::Upstream("timeout".into()).into();
        assert!(matches!(err, AscError::GroupDirectory(_)));
        let err: AscError = HuddleError::Database("gone".into()).into();
        assert!(matches!(err, AscError::Store(_)));
    }

    #[tokio::test]
    async fn test_into_response_body() {
        let response = AscError::Conflict("group already has a live session".into()).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["error"]["code"], 5);
        assert_eq!(json["error"]["kind"], "conflict");
        assert_eq!(json["error"]["message"], "group already has a live session");
    }
}
