//! Session events.
//!
//! Every state change a client must react to is published on the room's
//! broadcast channel and streamed to participants over
//! `GET /api/v1/sessions/{id}/events` (server-sent events). Slow
//! subscribers lag and miss events rather than stalling the session.

use crate::engine::MediaKind;
use crate::models::{ConnectionQuality, CurrentlyPlaying, SessionStatus, Track};
use common::types::{SessionId, UserId};
use serde::Serialize;

/// Capacity of each room's event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Something that happened in a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    ParticipantJoined {
        session_id: SessionId,
        user_id: UserId,
    },
    ParticipantLeft {
        session_id: SessionId,
        user_id: UserId,
    },
    ParticipantUpdated {
        session_id: SessionId,
        user_id: UserId,
        mic_muted: bool,
        speaker_muted: bool,
        connection_quality: ConnectionQuality,
    },
    ProducerAdded {
        session_id: SessionId,
        user_id: UserId,
        producer_id: String,
        kind: MediaKind,
    },
    ProducerClosed {
        session_id: SessionId,
        user_id: UserId,
        producer_id: String,
    },
    PlaybackChanged {
        session_id: SessionId,
        action: &'static str,
        currently_playing: Option<CurrentlyPlaying>,
    },
    PlaylistChanged {
        session_id: SessionId,
        playlist: Vec<Track>,
    },
    SessionStatusChanged {
        session_id: SessionId,
        status: SessionStatus,
    },
    SessionEnded {
        session_id: SessionId,
    },
}

impl SessionEvent {
    /// Event name, matching the serialized `type` tag.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            SessionEvent::ParticipantJoined { .. } => "participant_joined",
            SessionEvent::ParticipantLeft { .. } => "participant_left",
            SessionEvent::ParticipantUpdated { .. } => "participant_updated",
            SessionEvent::ProducerAdded { .. } => "producer_added",
            SessionEvent::ProducerClosed { .. } => "producer_closed",
            SessionEvent::PlaybackChanged { .. } => "playback_changed",
            SessionEvent::PlaylistChanged { .. } => "playlist_changed",
            SessionEvent::SessionStatusChanged { .. } => "session_status_changed",
            SessionEvent::SessionEnded { .. } => "session_ended",
        }
    }

    #[must_use]
    pub fn session_id(&self) -> SessionId {
        match self {
            SessionEvent::ParticipantJoined { session_id, .. }
            | SessionEvent::ParticipantLeft { session_id, .. }
            | SessionEvent::ParticipantUpdated { session_id, .. }
            | SessionEvent::ProducerAdded { session_id, .. }
            | SessionEvent::ProducerClosed { session_id, .. }
            | SessionEvent::PlaybackChanged { session_id, .. }
            | SessionEvent::PlaylistChanged { session_id, .. }
            | SessionEvent::SessionStatusChanged { session_id, .. }
            | SessionEvent::SessionEnded { session_id } => *session_id,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_event_is_tagged() {
        let session_id = SessionId::new();
        let event = SessionEvent::SessionEnded { session_id };
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json.get("type").and_then(|v| v.as_str()), Some("session_ended"));
        assert_eq!(event.session_id(), session_id);
    }

    #[test]
    fn test_kind_matches_tag() {
        let session_id = SessionId::new();
        let user_id = UserId::new();
        let events = [
            SessionEvent::ParticipantLeft { session_id, user_id },
            SessionEvent::ProducerClosed {
                session_id,
                user_id,
                producer_id: "producer-1".to_string(),
            },
            SessionEvent::PlaylistChanged {
                session_id,
                playlist: Vec::new(),
            },
            SessionEvent::SessionStatusChanged {
                session_id,
                status: SessionStatus::Paused,
            },
        ];
        for event in events {
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["type"], event.kind());
        }
    }
}
