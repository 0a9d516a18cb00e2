//! Music playback handlers.
//!
//! - `POST /api/v1/sessions/{id}/playback` - play, pause, next, previous
//! - `POST /api/v1/sessions/{id}/playlist` - Add a track
//! - `DELETE /api/v1/sessions/{id}/playlist` - Clear the playlist
//! - `DELETE /api/v1/sessions/{id}/playlist/{track_id}` - Remove a track

use super::{parse_body, ActingUser, ApiPath};
use crate::errors::AscError;
use crate::models::{MusicState, NewTrack, Track};
use crate::playback::PlaybackAction;
use crate::routes::AppState;
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    Json,
};
use common::types::{SessionId, TrackId};
use std::sync::Arc;

/// Handler for POST /api/v1/sessions/{id}/playback
///
/// Body: `{"action": "play", "track_id": ..., "position": ...}`,
/// `{"action": "pause", "position": ...}`, `{"action": "next"}` or
/// `{"action": "previous"}`.
pub async fn control_playback(
    State(state): State<Arc<AppState>>,
    ApiPath(session_id): ApiPath<SessionId>,
    ActingUser(user_id): ActingUser,
    body: Bytes,
) -> Result<Json<MusicState>, AscError> {
    let action: PlaybackAction = parse_body(&body)?;
    let music = state
        .service
        .playback
        .control(session_id, user_id, action)
        .await?;
    Ok(Json(music))
}

/// Handler for POST /api/v1/sessions/{id}/playlist
pub async fn add_track(
    State(state): State<Arc<AppState>>,
    ApiPath(session_id): ApiPath<SessionId>,
    ActingUser(user_id): ActingUser,
    body: Bytes,
) -> Result<(StatusCode, Json<Track>), AscError> {
    let track: NewTrack = parse_body(&body)?;
    if track.title.trim().is_empty() {
        return Err(AscError::BadRequest("track title is required".to_string()));
    }
    let track = state
        .service
        .playback
        .add_track(session_id, user_id, track)
        .await?;
    Ok((StatusCode::CREATED, Json(track)))
}

/// Handler for DELETE /api/v1/sessions/{id}/playlist
pub async fn clear_playlist(
    State(state): State<Arc<AppState>>,
    ApiPath(session_id): ApiPath<SessionId>,
    ActingUser(user_id): ActingUser,
) -> Result<StatusCode, AscError> {
    state
        .service
        .playback
        .clear_playlist(session_id, user_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Handler for DELETE /api/v1/sessions/{id}/playlist/{track_id}
pub async fn remove_track(
    State(state): State<Arc<AppState>>,
    ApiPath((session_id, track_id)): ApiPath<(SessionId, TrackId)>,
    ActingUser(user_id): ActingUser,
) -> Result<Json<Track>, AscError> {
    let track = state
        .service
        .playback
        .remove_track(session_id, user_id, track_id)
        .await?;
    Ok(Json(track))
}
