//! HTTP request handlers for the Audio Session Controller.
//!
//! The acting user is taken from the `x-user-id` header, set by the
//! gateway after it has authenticated the caller.

pub mod events;
pub mod participants;
pub mod playback;
pub mod sessions;

pub use events::session_events;
pub use participants::{
    connect_transport, create_consumer, create_producer, create_transport, join_session,
    leave_session, list_producers, resume_consumer, update_participant_status,
};
pub use playback::{add_track, clear_playlist, control_playback, remove_track};
pub use sessions::{
    create_session, end_session, get_active_session, get_session, hold_session, resume_session,
};

use crate::errors::AscError;
use axum::{
    async_trait,
    body::Bytes,
    extract::{rejection::PathRejection, FromRequestParts, Path},
    http::request::Parts,
};
use common::types::UserId;
use serde::de::DeserializeOwned;
use uuid::Uuid;

/// Header carrying the authenticated user id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// The user on whose behalf the request is made.
#[derive(Debug, Clone, Copy)]
pub struct ActingUser(pub UserId);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for ActingUser {
    type Rejection = AscError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| AscError::Unauthenticated(format!("missing {USER_ID_HEADER} header")))?
            .to_str()
            .map_err(|_| AscError::Unauthenticated(format!("invalid {USER_ID_HEADER} header")))?;

        let id = Uuid::parse_str(raw.trim())
            .map_err(|_| AscError::Unauthenticated(format!("invalid {USER_ID_HEADER} header")))?;
        Ok(ActingUser(UserId(id)))
    }
}

/// Path parameters whose rejection renders as the JSON error body.
///
/// A parameter that does not parse (a malformed session id, say) is a
/// `400`; a route wired without its parameters is a `500`.
#[derive(Debug)]
pub struct ApiPath<T>(pub T);

#[async_trait]
impl<S, T> FromRequestParts<S> for ApiPath<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = AscError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Path::<T>::from_request_parts(parts, state).await {
            Ok(Path(value)) => Ok(ApiPath(value)),
            Err(PathRejection::FailedToDeserializePathParams(e)) => {
                tracing::debug!(
                    target: "asc.handlers",
                    error = %e.body_text(),
                    "Invalid path parameter"
                );
                Err(AscError::BadRequest("Invalid path parameter".to_string()))
            }
            Err(e) => Err(AscError::Internal(e.body_text())),
        }
    }
}

/// Deserialize a JSON body, returning 400 rather than axum's default 422.
/// An empty body reads as `{}`.
pub(crate) fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, AscError> {
    let bytes: &[u8] = if body.is_empty() { b"{}" } else { body };
    serde_json::from_slice(bytes).map_err(|e| {
        tracing::debug!(target: "asc.handlers", error = %e, "Invalid request body");
        AscError::BadRequest("Invalid request body".to_string())
    })
}
