//! Session handlers.
//!
//! - `POST /api/v1/groups/{group_id}/sessions` - Create the group's session
//! - `GET /api/v1/groups/{group_id}/sessions/active` - Fetch the live session
//! - `GET /api/v1/sessions/{id}` - Fetch a session by id
//! - `POST /api/v1/sessions/{id}/end` - End a session
//! - `POST /api/v1/sessions/{id}/hold` - Put a session on hold
//! - `POST /api/v1/sessions/{id}/resume` - Resume a held session

use super::{parse_body, ActingUser, ApiPath};
use crate::errors::AscError;
use crate::models::{AudioSession, DeviceType, SessionType, SessionView};
use crate::routes::AppState;
use crate::sessions::CreateSessionOptions;
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    Json,
};
use common::types::{GroupId, SessionId};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub session_type: SessionType,
    #[serde(default)]
    pub device_type: DeviceType,
    #[serde(default)]
    pub persist_without_listeners: bool,
}

/// Handler for POST /api/v1/groups/{group_id}/sessions
///
/// # Response
///
/// - 201 Created: session created, with router capabilities unless the
///   session fell back to peer-to-peer
/// - 403 Forbidden: caller is not a group member
/// - 409 Conflict: the group already has a live session
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    ApiPath(group_id): ApiPath<GroupId>,
    ActingUser(user_id): ActingUser,
    body: Bytes,
) -> Result<(StatusCode, Json<SessionView>), AscError> {
    let request: CreateSessionRequest = parse_body(&body)?;
    let view = state
        .service
        .sessions
        .create_session(
            group_id,
            user_id,
            request.session_type,
            CreateSessionOptions {
                device_type: request.device_type,
                persist_without_listeners: request.persist_without_listeners,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// Handler for GET /api/v1/groups/{group_id}/sessions/active
pub async fn get_active_session(
    State(state): State<Arc<AppState>>,
    ApiPath(group_id): ApiPath<GroupId>,
) -> Result<Json<SessionView>, AscError> {
    let view = state.service.sessions.get_active_session(group_id).await?;
    Ok(Json(view))
}

/// Handler for GET /api/v1/sessions/{id}
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    ApiPath(session_id): ApiPath<SessionId>,
) -> Result<Json<AudioSession>, AscError> {
    let session = state.service.sessions.get_session(session_id).await?;
    Ok(Json(session))
}

/// Handler for POST /api/v1/sessions/{id}/end
///
/// Ending an already ended session returns it unchanged.
pub async fn end_session(
    State(state): State<Arc<AppState>>,
    ApiPath(session_id): ApiPath<SessionId>,
    ActingUser(user_id): ActingUser,
) -> Result<Json<AudioSession>, AscError> {
    let session = state
        .service
        .sessions
        .end_session(session_id, user_id)
        .await?;
    Ok(Json(session))
}

/// Handler for POST /api/v1/sessions/{id}/hold
pub async fn hold_session(
    State(state): State<Arc<AppState>>,
    ApiPath(session_id): ApiPath<SessionId>,
    ActingUser(user_id): ActingUser,
) -> Result<Json<AudioSession>, AscError> {
    let session = state
        .service
        .sessions
        .hold_session(session_id, user_id)
        .await?;
    Ok(Json(session))
}

/// Handler for POST /api/v1/sessions/{id}/resume
pub async fn resume_session(
    State(state): State<Arc<AppState>>,
    ApiPath(session_id): ApiPath<SessionId>,
    ActingUser(user_id): ActingUser,
) -> Result<Json<AudioSession>, AscError> {
    let session = state
        .service
        .sessions
        .resume_session(session_id, user_id)
        .await?;
    Ok(Json(session))
}
