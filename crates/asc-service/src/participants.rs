//! Participant lifecycle.
//!
//! Join/leave plus per-participant transport, producer and consumer
//! management. Engine calls run with the room lock released; afterwards the
//! room is re-locked and the caller's membership generation checked, so a
//! `leave` that ran in between cannot be outlived by a freshly created
//! handle. The handle is closed and `NotFound` returned instead.

use crate::engine::{EngineError, MediaKind, RtpCapabilities, TransportDirection};
use crate::errors::AscError;
use crate::events::SessionEvent;
use crate::models::{
    ConnectionQuality, ConsumerRecord, DeviceType, Participant, ProducerRecord, SessionStatus,
    TransportRecord,
};
use crate::observability::metrics;
use crate::rooms::{ConsumerEntry, ProducerEntry, ProducerInfo, TransportEntry};
use crate::sessions::{SessionGuard, SessionOrchestrator};
use chrono::Utc;
use common::types::{SessionId, UserId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// What a client needs to set up its side of a transport.
#[derive(Debug, Clone, Serialize)]
pub struct TransportParams {
    pub id: String,
    /// Opaque id the client echoes back in logs and support requests.
    pub correlation_id: String,
    pub ice_parameters: serde_json::Value,
    pub ice_candidates: serde_json::Value,
    pub dtls_parameters: serde_json::Value,
}

/// What a client needs to start receiving a producer.
#[derive(Debug, Clone, Serialize)]
pub struct ConsumerParams {
    pub id: String,
    pub producer_id: String,
    pub kind: MediaKind,
    pub rtp_parameters: serde_json::Value,
}

/// Partial update of a participant's client-reported state.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ParticipantStatusUpdate {
    pub mic_muted: Option<bool>,
    pub speaker_muted: Option<bool>,
    pub connection_quality: Option<ConnectionQuality>,
}

/// Result of a leave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LeaveOutcome {
    /// The last participant left and the session was ended with them.
    pub session_ended: bool,
}

/// Manages participants and their media handles.
pub struct ParticipantManager {
    sessions: Arc<SessionOrchestrator>,
}

fn engine_error(operation: &'static str) -> impl FnOnce(EngineError) -> AscError {
    move |e| {
        metrics::record_engine_error(operation);
        AscError::EngineUnavailable(format!("{operation}: {e}"))
    }
}

fn observe<T>(
    operation: &'static str,
    start: Instant,
    result: Result<T, AscError>,
) -> Result<T, AscError> {
    let status = match &result {
        Ok(_) => "success",
        Err(e) => e.label(),
    };
    metrics::record_participant_operation(operation, status);
    metrics::record_operation_duration(operation, start.elapsed());
    result
}

fn require_active_participant(guard: &SessionGuard, user_id: UserId) -> Result<u64, AscError> {
    if !guard.session.is_active_participant(user_id) {
        return Err(AscError::PermissionDenied(format!(
            "user {user_id} is not an active participant"
        )));
    }
    guard.room().generation(user_id).ok_or_else(|| {
        AscError::PermissionDenied(format!("user {user_id} has no membership in this room"))
    })
}

impl ParticipantManager {
    #[must_use]
    pub fn new(sessions: Arc<SessionOrchestrator>) -> Self {
        Self { sessions }
    }

    /// Re-lock after an engine call, failing if the user left meanwhile.
    async fn relock(
        &self,
        session_id: SessionId,
        user_id: UserId,
        generation: u64,
    ) -> Result<SessionGuard, AscError> {
        let guard = self.sessions.lock(session_id).await?;
        if guard.room().is_current(user_id, generation) {
            Ok(guard)
        } else {
            debug!(
                target: "asc.participants",
                session_id = %session_id,
                user_id = %user_id,
                "Participant left during engine call"
            );
            Err(AscError::NotFound(format!(
                "user {user_id} left the session"
            )))
        }
    }

    /// Join a session, or reactivate an existing entry.
    ///
    /// Returns the router capabilities, `None` in peer-to-peer mode.
    ///
    /// # Errors
    ///
    /// - `InvalidState` unless the session is active
    /// - `PermissionDenied` if the user is not a group member
    #[instrument(
        skip_all,
        name = "asc.participants.join",
        fields(session_id = %session_id, user_id = %user_id)
    )]
    pub async fn join(
        &self,
        session_id: SessionId,
        user_id: UserId,
        device_type: DeviceType,
    ) -> Result<Option<RtpCapabilities>, AscError> {
        let start = Instant::now();
        observe("join", start, self.join_inner(session_id, user_id, device_type).await)
    }

    async fn join_inner(
        &self,
        session_id: SessionId,
        user_id: UserId,
        device_type: DeviceType,
    ) -> Result<Option<RtpCapabilities>, AscError> {
        let ctx = self.sessions.context();
        let session = self.sessions.get_session(session_id).await?;
        if session.status != SessionStatus::Active {
            return Err(AscError::InvalidState(format!(
                "cannot join a session that is {}",
                session.status.as_str()
            )));
        }
        if !ctx.groups.is_member(session.group_id, user_id).await? {
            return Err(AscError::PermissionDenied(format!(
                "user {user_id} is not a member of group {}",
                session.group_id
            )));
        }

        let mut guard = self.sessions.lock(session_id).await?;
        if guard.session.status != SessionStatus::Active {
            return Err(AscError::InvalidState(format!(
                "cannot join a session that is {}",
                guard.session.status.as_str()
            )));
        }

        let now = Utc::now();
        match guard.session.participant_mut(user_id) {
            Some(participant) if participant.is_active() => {
                participant.device_type = device_type;
            }
            Some(participant) => {
                participant.left_at = None;
                participant.joined_at = now;
                participant.device_type = device_type;
            }
            None => guard
                .session
                .participants
                .push(Participant::new(user_id, device_type, now)),
        }
        if guard.room().generation(user_id).is_none() {
            guard.room_mut().admit(user_id);
        }

        self.sessions.commit(&mut guard).await?;
        guard
            .room()
            .publish(SessionEvent::ParticipantJoined { session_id, user_id });
        info!(target: "asc.participants", session_id = %session_id, user_id = %user_id, "Participant joined");

        Ok(guard.router_capabilities())
    }

    /// Create a WebRTC transport for the participant.
    ///
    /// # Errors
    ///
    /// - `PermissionDenied` if the user is not an active participant
    /// - `InvalidState` in peer-to-peer mode
    /// - `EngineUnavailable` if the engine call fails
    /// - `NotFound` if the user left while the transport was being created
    #[instrument(
        skip_all,
        name = "asc.participants.create_transport",
        fields(session_id = %session_id, user_id = %user_id, direction = direction.as_str())
    )]
    pub async fn create_transport(
        &self,
        session_id: SessionId,
        user_id: UserId,
        direction: TransportDirection,
    ) -> Result<TransportParams, AscError> {
        let start = Instant::now();
        observe(
            "create_transport",
            start,
            self.create_transport_inner(session_id, user_id, direction)
                .await,
        )
    }

    async fn create_transport_inner(
        &self,
        session_id: SessionId,
        user_id: UserId,
        direction: TransportDirection,
    ) -> Result<TransportParams, AscError> {
        let (router, generation) = {
            let guard = self.sessions.lock(session_id).await?;
            let generation = require_active_participant(&guard, user_id)?;
            let router = guard.room().router().cloned().ok_or_else(|| {
                AscError::InvalidState(
                    "session runs in peer-to-peer mode and has no router".to_string(),
                )
            })?;
            (router, generation)
        };

        let transport = router
            .create_webrtc_transport(&self.sessions.context().transport_options)
            .await
            .map_err(engine_error("create_webrtc_transport"))?;

        let mut guard = match self.relock(session_id, user_id, generation).await {
            Ok(guard) => guard,
            Err(e) => {
                transport.close().await;
                return Err(e);
            }
        };

        let correlation_id = Uuid::new_v4().to_string();
        guard.session.transports.push(TransportRecord {
            transport_id: transport.id().to_string(),
            correlation_id: correlation_id.clone(),
            user_id,
            direction,
            created_at: Utc::now(),
            closed_at: None,
        });
        if let Err(e) = self.sessions.commit(&mut guard).await {
            transport.close().await;
            return Err(e);
        }

        let params = TransportParams {
            id: transport.id().to_string(),
            correlation_id,
            ice_parameters: transport.ice_parameters(),
            ice_candidates: transport.ice_candidates(),
            dtls_parameters: transport.dtls_parameters(),
        };
        guard.room_mut().insert_transport(TransportEntry {
            handle: transport,
            user_id,
            direction,
        });
        Ok(params)
    }

    /// Complete the DTLS handshake of one of the participant's transports.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the transport is not in the room (including after a
    ///   restart)
    /// - `PermissionDenied` if it belongs to another user
    /// - `EngineUnavailable` if the engine call fails
    #[instrument(
        skip_all,
        name = "asc.participants.connect_transport",
        fields(session_id = %session_id, user_id = %user_id, transport_id = %transport_id)
    )]
    pub async fn connect_transport(
        &self,
        session_id: SessionId,
        user_id: UserId,
        transport_id: &str,
        dtls_parameters: serde_json::Value,
    ) -> Result<(), AscError> {
        let start = Instant::now();
        let result = async {
            let transport = {
                let guard = self.sessions.lock(session_id).await?;
                let entry = owned_transport(&guard, user_id, transport_id)?;
                Arc::clone(&entry.handle)
            };
            transport
                .connect(dtls_parameters)
                .await
                .map_err(engine_error("connect_transport"))
        }
        .await;
        observe("connect_transport", start, result)
    }

    /// Start sending audio on a send transport. Returns the producer id.
    ///
    /// # Errors
    ///
    /// - `NotFound` / `PermissionDenied` as for [`Self::connect_transport`]
    /// - `InvalidState` for a receive transport or a non-audio kind
    /// - `EngineUnavailable` if the engine call fails
    #[instrument(
        skip_all,
        name = "asc.participants.create_producer",
        fields(session_id = %session_id, user_id = %user_id, transport_id = %transport_id)
    )]
    pub async fn create_producer(
        &self,
        session_id: SessionId,
        user_id: UserId,
        transport_id: &str,
        kind: MediaKind,
        rtp_parameters: serde_json::Value,
    ) -> Result<String, AscError> {
        let start = Instant::now();
        observe(
            "create_producer",
            start,
            self.create_producer_inner(session_id, user_id, transport_id, kind, rtp_parameters)
                .await,
        )
    }

    async fn create_producer_inner(
        &self,
        session_id: SessionId,
        user_id: UserId,
        transport_id: &str,
        kind: MediaKind,
        rtp_parameters: serde_json::Value,
    ) -> Result<String, AscError> {
        if kind != MediaKind::Audio {
            return Err(AscError::InvalidState("sessions carry audio only".to_string()));
        }

        let (transport, generation) = {
            let guard = self.sessions.lock(session_id).await?;
            let generation = require_active_participant(&guard, user_id)?;
            let entry = owned_transport(&guard, user_id, transport_id)?;
            if entry.direction != TransportDirection::Send {
                return Err(AscError::InvalidState(format!(
                    "transport {transport_id} is not a send transport"
                )));
            }
            (Arc::clone(&entry.handle), generation)
        };

        let producer = transport
            .produce(kind, rtp_parameters)
            .await
            .map_err(engine_error("produce"))?;

        let mut guard = match self.relock(session_id, user_id, generation).await {
            Ok(guard) => guard,
            Err(e) => {
                producer.close().await;
                return Err(e);
            }
        };

        let producer_id = producer.id().to_string();
        guard.session.producers.push(ProducerRecord {
            producer_id: producer_id.clone(),
            transport_id: transport_id.to_string(),
            user_id,
            kind,
            created_at: Utc::now(),
            closed_at: None,
        });
        if let Err(e) = self.sessions.commit(&mut guard).await {
            producer.close().await;
            return Err(e);
        }

        guard.room_mut().insert_producer(ProducerEntry {
            handle: producer,
            user_id,
            transport_id: transport_id.to_string(),
        });
        guard.room().publish(SessionEvent::ProducerAdded {
            session_id,
            user_id,
            producer_id: producer_id.clone(),
            kind,
        });
        Ok(producer_id)
    }

    /// Start receiving another participant's producer on a receive transport.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the transport or producer is absent
    /// - `PermissionDenied` if the transport belongs to another user
    /// - `InvalidState` for a send transport, or if the router reports the
    ///   client's capabilities cannot consume the producer
    /// - `EngineUnavailable` if an engine call fails
    #[instrument(
        skip_all,
        name = "asc.participants.create_consumer",
        fields(session_id = %session_id, user_id = %user_id, producer_id = %producer_id)
    )]
    pub async fn create_consumer(
        &self,
        session_id: SessionId,
        user_id: UserId,
        transport_id: &str,
        producer_id: &str,
        rtp_capabilities: &RtpCapabilities,
    ) -> Result<ConsumerParams, AscError> {
        let start = Instant::now();
        observe(
            "create_consumer",
            start,
            self.create_consumer_inner(
                session_id,
                user_id,
                transport_id,
                producer_id,
                rtp_capabilities,
            )
            .await,
        )
    }

    async fn create_consumer_inner(
        &self,
        session_id: SessionId,
        user_id: UserId,
        transport_id: &str,
        producer_id: &str,
        rtp_capabilities: &RtpCapabilities,
    ) -> Result<ConsumerParams, AscError> {
        let (router, transport, generation) = {
            let guard = self.sessions.lock(session_id).await?;
            let generation = require_active_participant(&guard, user_id)?;
            let entry = owned_transport(&guard, user_id, transport_id)?;
            if entry.direction != TransportDirection::Receive {
                return Err(AscError::InvalidState(format!(
                    "transport {transport_id} is not a receive transport"
                )));
            }
            if guard.room().producer(producer_id).is_none() {
                return Err(AscError::NotFound(format!("producer {producer_id}")));
            }
            let router = guard.room().router().cloned().ok_or_else(|| {
                AscError::InvalidState("session has no router".to_string())
            })?;
            (router, Arc::clone(&entry.handle), generation)
        };

        let compatible = router
            .can_consume(producer_id, rtp_capabilities)
            .await
            .map_err(engine_error("can_consume"))?;
        if !compatible {
            return Err(AscError::InvalidState(format!(
                "client capabilities cannot consume producer {producer_id}"
            )));
        }

        let consumer = transport
            .consume(producer_id, rtp_capabilities)
            .await
            .map_err(engine_error("consume"))?;

        let mut guard = match self.relock(session_id, user_id, generation).await {
            Ok(guard) if guard.room().producer(producer_id).is_some() => guard,
            Ok(_) => {
                consumer.close().await;
                return Err(AscError::NotFound(format!(
                    "producer {producer_id} closed"
                )));
            }
            Err(e) => {
                consumer.close().await;
                return Err(e);
            }
        };

        guard.session.consumers.push(ConsumerRecord {
            consumer_id: consumer.id().to_string(),
            producer_id: producer_id.to_string(),
            transport_id: transport_id.to_string(),
            user_id,
            created_at: Utc::now(),
            resumed_at: None,
            closed_at: None,
        });
        if let Err(e) = self.sessions.commit(&mut guard).await {
            consumer.close().await;
            return Err(e);
        }

        let params = ConsumerParams {
            id: consumer.id().to_string(),
            producer_id: producer_id.to_string(),
            kind: consumer.kind(),
            rtp_parameters: consumer.rtp_parameters(),
        };
        guard.room_mut().insert_consumer(ConsumerEntry {
            handle: consumer,
            user_id,
            producer_id: producer_id.to_string(),
            transport_id: transport_id.to_string(),
        });
        Ok(params)
    }

    /// Resume a consumer created paused.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the consumer is absent
    /// - `PermissionDenied` if it belongs to another user
    /// - `EngineUnavailable` if the engine call fails
    #[instrument(
        skip_all,
        name = "asc.participants.resume_consumer",
        fields(session_id = %session_id, user_id = %user_id, consumer_id = %consumer_id)
    )]
    pub async fn resume_consumer(
        &self,
        session_id: SessionId,
        user_id: UserId,
        consumer_id: &str,
    ) -> Result<(), AscError> {
        let start = Instant::now();
        let result = async {
            let consumer = {
                let guard = self.sessions.lock(session_id).await?;
                let entry = guard
                    .room()
                    .consumer(consumer_id)
                    .ok_or_else(|| AscError::NotFound(format!("consumer {consumer_id}")))?;
                if entry.user_id != user_id {
                    return Err(AscError::PermissionDenied(format!(
                        "consumer {consumer_id} belongs to another participant"
                    )));
                }
                Arc::clone(&entry.handle)
            };

            consumer
                .resume()
                .await
                .map_err(engine_error("resume_consumer"))?;

            let mut guard = self.sessions.lock(session_id).await?;
            let now = Utc::now();
            if let Some(record) = guard
                .session
                .consumers
                .iter_mut()
                .find(|c| c.consumer_id == consumer_id && c.closed_at.is_none())
            {
                record.resumed_at = Some(now);
            }
            self.sessions.commit(&mut guard).await
        }
        .await;
        observe("resume_consumer", start, result)
    }

    /// Leave a session, closing every handle the participant owns and every
    /// consumer attached to their producers.
    ///
    /// When the last participant leaves and the session's music state does
    /// not keep it alive, the session is ended.
    ///
    /// # Errors
    ///
    /// `NotFound` if the user never joined the session.
    #[instrument(
        skip_all,
        name = "asc.participants.leave",
        fields(session_id = %session_id, user_id = %user_id)
    )]
    pub async fn leave(
        &self,
        session_id: SessionId,
        user_id: UserId,
    ) -> Result<LeaveOutcome, AscError> {
        let start = Instant::now();
        observe("leave", start, self.leave_inner(session_id, user_id).await)
    }

    async fn leave_inner(
        &self,
        session_id: SessionId,
        user_id: UserId,
    ) -> Result<LeaveOutcome, AscError> {
        let mut guard = self.sessions.lock(session_id).await?;
        let now = Utc::now();

        match guard.session.participant_mut(user_id) {
            None => {
                return Err(AscError::NotFound(format!(
                    "user {user_id} is not a participant"
                )));
            }
            Some(participant) if !participant.is_active() => {
                return Ok(LeaveOutcome {
                    session_ended: false,
                });
            }
            Some(participant) => participant.left_at = Some(now),
        }

        guard.room_mut().evict(user_id);
        let detached = guard.room_mut().detach_user(user_id);
        let consumer_ids = detached.consumer_ids();
        let producer_ids = detached.producer_ids();
        guard.session.close_records_for_user(user_id, now);
        guard.session.close_consumer_records(&consumer_ids, now);

        for producer_id in producer_ids {
            guard.room().publish(SessionEvent::ProducerClosed {
                session_id,
                user_id,
                producer_id,
            });
        }

        let last_out = guard.session.active_participants().next().is_none();
        if last_out && !guard.session.music.persist_without_listeners {
            info!(
                target: "asc.participants",
                session_id = %session_id,
                "Last participant left, ending session"
            );
            let ended = self.sessions.end_locked(&mut guard).await;
            drop(guard);
            detached.close().await;
            ended?.close().await;
            return Ok(LeaveOutcome {
                session_ended: true,
            });
        }

        let committed = self.sessions.commit(&mut guard).await;
        if committed.is_ok() {
            guard
                .room()
                .publish(SessionEvent::ParticipantLeft { session_id, user_id });
        }
        drop(guard);
        // Closed outside the room lock.
        detached.close().await;
        committed?;
        info!(target: "asc.participants", session_id = %session_id, user_id = %user_id, "Participant left");
        Ok(LeaveOutcome {
            session_ended: false,
        })
    }

    /// Update mute flags and connection quality.
    ///
    /// # Errors
    ///
    /// `NotFound` if the user has no active entry.
    #[instrument(
        skip_all,
        name = "asc.participants.update_status",
        fields(session_id = %session_id, user_id = %user_id)
    )]
    pub async fn update_participant_status(
        &self,
        session_id: SessionId,
        user_id: UserId,
        update: ParticipantStatusUpdate,
    ) -> Result<Participant, AscError> {
        let start = Instant::now();
        let result = async {
            let mut guard = self.sessions.lock(session_id).await?;
            let participant = guard
                .session
                .participant_mut(user_id)
                .filter(|p| p.is_active())
                .ok_or_else(|| {
                    AscError::NotFound(format!("user {user_id} is not an active participant"))
                })?;

            if let Some(mic_muted) = update.mic_muted {
                participant.mic_muted = mic_muted;
            }
            if let Some(speaker_muted) = update.speaker_muted {
                participant.speaker_muted = speaker_muted;
            }
            if let Some(quality) = update.connection_quality {
                participant.connection_quality = quality;
            }
            let participant = participant.clone();

            self.sessions.commit(&mut guard).await?;
            guard.room().publish(SessionEvent::ParticipantUpdated {
                session_id,
                user_id,
                mic_muted: participant.mic_muted,
                speaker_muted: participant.speaker_muted,
                connection_quality: participant.connection_quality,
            });
            Ok(participant)
        }
        .await;
        observe("update_status", start, result)
    }

    /// Live producers in the session.
    ///
    /// # Errors
    ///
    /// `SessionNotFound` / `InvalidState` if the session is missing or ended.
    pub async fn list_producers(&self, session_id: SessionId) -> Result<Vec<ProducerInfo>, AscError> {
        let guard = self.sessions.lock(session_id).await?;
        Ok(guard.room().producer_infos())
    }
}

fn owned_transport<'a>(
    guard: &'a SessionGuard,
    user_id: UserId,
    transport_id: &str,
) -> Result<&'a TransportEntry, AscError> {
    let entry = guard
        .room()
        .transport(transport_id)
        .ok_or_else(|| AscError::NotFound(format!("transport {transport_id}")))?;
    if entry.user_id != user_id {
        return Err(AscError::PermissionDenied(format!(
            "transport {transport_id} belongs to another participant"
        )));
    }
    Ok(entry)
}
