//! Participant and media negotiation handlers.
//!
//! - `POST /api/v1/sessions/{id}/join`
//! - `POST /api/v1/sessions/{id}/leave`
//! - `PATCH /api/v1/sessions/{id}/participants/me`
//! - `GET /api/v1/sessions/{id}/producers`
//! - `POST /api/v1/sessions/{id}/transports`
//! - `POST /api/v1/sessions/{id}/transports/{transport_id}/connect`
//! - `POST /api/v1/sessions/{id}/transports/{transport_id}/producers`
//! - `POST /api/v1/sessions/{id}/transports/{transport_id}/consumers`
//! - `POST /api/v1/sessions/{id}/consumers/{consumer_id}/resume`

use super::{parse_body, ActingUser, ApiPath};
use crate::engine::{MediaKind, RtpCapabilities, TransportDirection};
use crate::errors::AscError;
use crate::models::{DeviceType, MediaMode, Participant};
use crate::participants::{ConsumerParams, LeaveOutcome, ParticipantStatusUpdate, TransportParams};
use crate::rooms::ProducerInfo;
use crate::routes::AppState;
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    Json,
};
use common::types::SessionId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Default, Deserialize)]
pub struct JoinRequest {
    #[serde(default)]
    pub device_type: DeviceType,
}

#[derive(Debug, Serialize)]
pub struct JoinResponse {
    pub mode: MediaMode,
    pub router_rtp_capabilities: Option<RtpCapabilities>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTransportRequest {
    pub direction: TransportDirection,
}

#[derive(Debug, Deserialize)]
pub struct ConnectTransportRequest {
    pub dtls_parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct CreateProducerRequest {
    pub kind: MediaKind,
    pub rtp_parameters: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct CreateProducerResponse {
    pub producer_id: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateConsumerRequest {
    pub producer_id: String,
    pub rtp_capabilities: RtpCapabilities,
}

/// Handler for POST /api/v1/sessions/{id}/join
///
/// Joining twice is idempotent.
pub async fn join_session(
    State(state): State<Arc<AppState>>,
    ApiPath(session_id): ApiPath<SessionId>,
    ActingUser(user_id): ActingUser,
    body: Bytes,
) -> Result<Json<JoinResponse>, AscError> {
    let request: JoinRequest = parse_body(&body)?;
    let capabilities = state
        .service
        .participants
        .join(session_id, user_id, request.device_type)
        .await?;
    let mode = if capabilities.is_some() {
        MediaMode::Routed
    } else {
        MediaMode::PeerToPeer
    };
    Ok(Json(JoinResponse {
        mode,
        router_rtp_capabilities: capabilities,
    }))
}

/// Handler for POST /api/v1/sessions/{id}/leave
pub async fn leave_session(
    State(state): State<Arc<AppState>>,
    ApiPath(session_id): ApiPath<SessionId>,
    ActingUser(user_id): ActingUser,
) -> Result<Json<LeaveOutcome>, AscError> {
    let outcome = state.service.participants.leave(session_id, user_id).await?;
    Ok(Json(outcome))
}

/// Handler for PATCH /api/v1/sessions/{id}/participants/me
pub async fn update_participant_status(
    State(state): State<Arc<AppState>>,
    ApiPath(session_id): ApiPath<SessionId>,
    ActingUser(user_id): ActingUser,
    body: Bytes,
) -> Result<Json<Participant>, AscError> {
    let update: ParticipantStatusUpdate = parse_body(&body)?;
    let participant = state
        .service
        .participants
        .update_participant_status(session_id, user_id, update)
        .await?;
    Ok(Json(participant))
}

/// Handler for GET /api/v1/sessions/{id}/producers
pub async fn list_producers(
    State(state): State<Arc<AppState>>,
    ApiPath(session_id): ApiPath<SessionId>,
) -> Result<Json<Vec<ProducerInfo>>, AscError> {
    let producers = state.service.participants.list_producers(session_id).await?;
    Ok(Json(producers))
}

/// Handler for POST /api/v1/sessions/{id}/transports
pub async fn create_transport(
    State(state): State<Arc<AppState>>,
    ApiPath(session_id): ApiPath<SessionId>,
    ActingUser(user_id): ActingUser,
    body: Bytes,
) -> Result<(StatusCode, Json<TransportParams>), AscError> {
    let request: CreateTransportRequest = parse_body(&body)?;
    let params = state
        .service
        .participants
        .create_transport(session_id, user_id, request.direction)
        .await?;
    Ok((StatusCode::CREATED, Json(params)))
}

/// Handler for POST /api/v1/sessions/{id}/transports/{transport_id}/connect
pub async fn connect_transport(
    State(state): State<Arc<AppState>>,
    ApiPath((session_id, transport_id)): ApiPath<(SessionId, String)>,
    ActingUser(user_id): ActingUser,
    body: Bytes,
) -> Result<StatusCode, AscError> {
    let request: ConnectTransportRequest = parse_body(&body)?;
    state
        .service
        .participants
        .connect_transport(session_id, user_id, &transport_id, request.dtls_parameters)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Handler for POST /api/v1/sessions/{id}/transports/{transport_id}/producers
pub async fn create_producer(
    State(state): State<Arc<AppState>>,
    ApiPath((session_id, transport_id)): ApiPath<(SessionId, String)>,
    ActingUser(user_id): ActingUser,
    body: Bytes,
) -> Result<(StatusCode, Json<CreateProducerResponse>), AscError> {
    let request: CreateProducerRequest = parse_body(&body)?;
    let producer_id = state
        .service
        .participants
        .create_producer(
            session_id,
            user_id,
            &transport_id,
            request.kind,
            request.rtp_parameters,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(CreateProducerResponse { producer_id })))
}

/// Handler for POST /api/v1/sessions/{id}/transports/{transport_id}/consumers
///
/// Consumers start paused; the client resumes them once its track is wired.
pub async fn create_consumer(
    State(state): State<Arc<AppState>>,
    ApiPath((session_id, transport_id)): ApiPath<(SessionId, String)>,
    ActingUser(user_id): ActingUser,
    body: Bytes,
) -> Result<(StatusCode, Json<ConsumerParams>), AscError> {
    let request: CreateConsumerRequest = parse_body(&body)?;
    let params = state
        .service
        .participants
        .create_consumer(
            session_id,
            user_id,
            &transport_id,
            &request.producer_id,
            &request.rtp_capabilities,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(params)))
}

/// Handler for POST /api/v1/sessions/{id}/consumers/{consumer_id}/resume
pub async fn resume_consumer(
    State(state): State<Arc<AppState>>,
    ApiPath((session_id, consumer_id)): ApiPath<(SessionId, String)>,
    ActingUser(user_id): ActingUser,
) -> Result<StatusCode, AscError> {
    state
        .service
        .participants
        .resume_consumer(session_id, user_id, &consumer_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
