//! Durable session document.
//!
//! [`AudioSession`] is the record persisted by the [`SessionStore`] as one
//! JSON document per session. The transport/producer/consumer arrays mirror
//! the live handles held by the in-memory [`Room`]; they are kept for
//! auditing and to detect what a restarted process has lost.
//!
//! [`SessionStore`]: crate::store::SessionStore
//! [`Room`]: crate::rooms::Room

use crate::engine::{MediaKind, RtpCapabilities, TransportDirection};
use chrono::{DateTime, Utc};
use common::types::{GroupId, SessionId, TrackId, UserId};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Paused,
    Ended,
}

impl SessionStatus {
    /// Stable string form, matching the serialized value.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Paused => "paused",
            SessionStatus::Ended => "ended",
        }
    }
}

/// What the session carries besides voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    VoiceOnly,
    VoiceWithMusic,
}

/// How media flows for this session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaMode {
    /// Media is relayed through a router on a pool worker.
    Routed,
    /// No router could be created; clients connect to each other directly.
    PeerToPeer,
}

/// Client device class reported on join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Web,
    Ios,
    Android,
    Desktop,
    #[default]
    Unknown,
}

/// Client-reported link quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionQuality {
    Excellent,
    Good,
    Fair,
    Poor,
    #[default]
    Unknown,
}

/// A participant entry, embedded in the session document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: UserId,
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
    pub mic_muted: bool,
    pub speaker_muted: bool,
    pub device_type: DeviceType,
    pub connection_quality: ConnectionQuality,
}

impl Participant {
    #[must_use]
    pub fn new(user_id: UserId, device_type: DeviceType, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            joined_at: now,
            left_at: None,
            mic_muted: false,
            speaker_muted: false,
            device_type,
            connection_quality: ConnectionQuality::Unknown,
        }
    }

    /// A participant is active until `left_at` is set.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.left_at.is_none()
    }
}

/// Mirror of a transport handle held by the room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportRecord {
    pub transport_id: String,
    pub correlation_id: String,
    pub user_id: UserId,
    pub direction: TransportDirection,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

/// Mirror of a producer handle held by the room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProducerRecord {
    pub producer_id: String,
    pub transport_id: String,
    pub user_id: UserId,
    pub kind: MediaKind,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

/// Mirror of a consumer handle held by the room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumerRecord {
    pub consumer_id: String,
    pub producer_id: String,
    pub transport_id: String,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
    pub resumed_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
}

/// A playlist entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    pub title: String,
    pub artist: Option<String>,
    /// Duration in seconds.
    pub duration: f64,
    pub source_url: String,
    pub added_by: UserId,
    pub added_at: DateTime<Utc>,
}

/// Fields a caller supplies when adding a track.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewTrack {
    pub title: String,
    pub artist: Option<String>,
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub source_url: String,
}

/// The track everyone is listening to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentlyPlaying {
    pub track: Track,
    /// Playback position in seconds at `started_at`.
    pub position: f64,
    pub controlled_by: UserId,
    pub started_at: DateTime<Utc>,
    pub is_paused: bool,
}

/// Explicit position of the current track in the playlist.
///
/// `detached` is set when the anchored entry was removed: `index` then
/// names the slot the entry used to occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackAnchor {
    pub index: usize,
    pub detached: bool,
}

/// Shared music state of a `voice_with_music` session.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MusicState {
    pub playlist: Vec<Track>,
    pub currently_playing: Option<CurrentlyPlaying>,
    pub anchor: Option<PlaybackAnchor>,
    /// Keep the session alive after the last participant leaves.
    pub persist_without_listeners: bool,
}

/// Durable record of one group's live conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioSession {
    pub id: SessionId,
    pub group_id: GroupId,
    pub status: SessionStatus,
    pub creator_id: UserId,
    pub session_type: SessionType,
    /// `None` when the session runs in peer-to-peer fallback mode.
    pub router_id: Option<String>,
    pub worker_id: Option<u32>,
    pub participants: Vec<Participant>,
    pub transports: Vec<TransportRecord>,
    pub producers: Vec<ProducerRecord>,
    pub consumers: Vec<ConsumerRecord>,
    pub music: MusicState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl AudioSession {
    /// Build a new active session with the creator as its first participant.
    #[must_use]
    pub fn new(
        group_id: GroupId,
        creator_id: UserId,
        session_type: SessionType,
        device_type: DeviceType,
        persist_without_listeners: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: SessionId::new(),
            group_id,
            status: SessionStatus::Active,
            creator_id,
            session_type,
            router_id: None,
            worker_id: None,
            participants: vec![Participant::new(creator_id, device_type, now)],
            transports: Vec::new(),
            producers: Vec::new(),
            consumers: Vec::new(),
            music: MusicState {
                persist_without_listeners: persist_without_listeners
                    && session_type == SessionType::VoiceWithMusic,
                ..MusicState::default()
            },
            created_at: now,
            updated_at: now,
            ended_at: None,
        }
    }

    #[must_use]
    pub fn mode(&self) -> MediaMode {
        if self.router_id.is_some() {
            MediaMode::Routed
        } else {
            MediaMode::PeerToPeer
        }
    }

    #[must_use]
    pub fn participant(&self, user_id: UserId) -> Option<&Participant> {
        self.participants.iter().find(|p| p.user_id == user_id)
    }

    #[must_use]
    pub fn participant_mut(&mut self, user_id: UserId) -> Option<&mut Participant> {
        self.participants.iter_mut().find(|p| p.user_id == user_id)
    }

    #[must_use]
    pub fn is_active_participant(&self, user_id: UserId) -> bool {
        self.participant(user_id).is_some_and(Participant::is_active)
    }

    pub fn active_participants(&self) -> impl Iterator<Item = &Participant> {
        self.participants.iter().filter(|p| p.is_active())
    }

    /// Mark every open mirror record owned by `user_id` as closed.
    pub fn close_records_for_user(&mut self, user_id: UserId, now: DateTime<Utc>) {
        for t in self.transports.iter_mut().filter(|t| t.user_id == user_id) {
            t.closed_at.get_or_insert(now);
        }
        for p in self.producers.iter_mut().filter(|p| p.user_id == user_id) {
            p.closed_at.get_or_insert(now);
        }
        for c in self.consumers.iter_mut().filter(|c| c.user_id == user_id) {
            c.closed_at.get_or_insert(now);
        }
    }

    /// Mark the mirror records of specific consumers as closed.
    pub fn close_consumer_records(&mut self, consumer_ids: &[String], now: DateTime<Utc>) {
        for c in self
            .consumers
            .iter_mut()
            .filter(|c| consumer_ids.contains(&c.consumer_id))
        {
            c.closed_at.get_or_insert(now);
        }
    }

    /// Mark every open mirror record as closed.
    pub fn close_all_records(&mut self, now: DateTime<Utc>) {
        for t in &mut self.transports {
            t.closed_at.get_or_insert(now);
        }
        for p in &mut self.producers {
            p.closed_at.get_or_insert(now);
        }
        for c in &mut self.consumers {
            c.closed_at.get_or_insert(now);
        }
    }

    /// Number of mirror records still open.
    #[must_use]
    pub fn open_record_count(&self) -> usize {
        self.transports.iter().filter(|t| t.closed_at.is_none()).count()
            + self.producers.iter().filter(|p| p.closed_at.is_none()).count()
            + self.consumers.iter().filter(|c| c.closed_at.is_none()).count()
    }
}

/// A session together with what a client needs to start negotiating media.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub session: AudioSession,
    pub mode: MediaMode,
    /// Router RTP capabilities; absent in peer-to-peer mode.
    pub router_rtp_capabilities: Option<RtpCapabilities>,
}
