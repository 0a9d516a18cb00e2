//! Shared music playback.
//!
//! The state machine itself is a set of pure functions over [`MusicState`];
//! [`PlaybackSynchronizer`] runs them under the session lock, persists the
//! result and broadcasts it.
//!
//! The position of the current track is stored explicitly as a
//! [`PlaybackAnchor`] instead of being re-derived by searching the playlist.
//! Removing entries re-anchors it:
//!
//! - removing an entry before the anchor shifts it left
//! - removing the anchored entry marks the anchor detached; `next` then
//!   plays the entry that slid into its slot and `previous` the one before
//!
//! `currently_playing` is kept when its entry is removed.

use crate::errors::AscError;
use crate::events::SessionEvent;
use crate::models::{
    CurrentlyPlaying, MusicState, NewTrack, PlaybackAnchor, SessionStatus, SessionType, Track,
};
use crate::observability::metrics;
use crate::sessions::{SessionGuard, SessionOrchestrator};
use chrono::{DateTime, Utc};
use common::types::{SessionId, TrackId, UserId};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, instrument};

/// A playback control request.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PlaybackAction {
    Play {
        #[serde(default)]
        track_id: Option<TrackId>,
        #[serde(default)]
        position: Option<f64>,
    },
    Pause {
        #[serde(default)]
        position: Option<f64>,
    },
    Next,
    Previous,
}

impl PlaybackAction {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            PlaybackAction::Play { .. } => "play",
            PlaybackAction::Pause { .. } => "pause",
            PlaybackAction::Next => "next",
            PlaybackAction::Previous => "previous",
        }
    }
}

fn start_entry(
    music: &mut MusicState,
    index: usize,
    actor: UserId,
    now: DateTime<Utc>,
) -> Result<(), AscError> {
    let track = music
        .playlist
        .get(index)
        .cloned()
        .ok_or(AscError::EmptyPlaylist)?;
    music.currently_playing = Some(CurrentlyPlaying {
        track,
        position: 0.0,
        controlled_by: actor,
        started_at: now,
        is_paused: false,
    });
    music.anchor = Some(PlaybackAnchor {
        index,
        detached: false,
    });
    Ok(())
}

/// Anchor of the current track, falling back to an identity match for
/// state written before anchors existed.
fn current_anchor(music: &MusicState) -> Option<PlaybackAnchor> {
    music.anchor.or_else(|| {
        let current = music.currently_playing.as_ref()?;
        music
            .playlist
            .iter()
            .position(|t| t.id == current.track.id)
            .map(|index| PlaybackAnchor {
                index,
                detached: false,
            })
    })
}

/// Bound a client-reported position to the track.
///
/// Negative or non-finite positions become 0. A duration of 0 means the
/// length is unknown, so only the lower bound applies.
fn clamp_position(position: f64, duration: f64) -> f64 {
    if !position.is_finite() || position < 0.0 {
        0.0
    } else if duration > 0.0 {
        position.min(duration)
    } else {
        position
    }
}

/// Apply a playback action.
///
/// # Errors
///
/// - `NotFound` if `play` names a track not in the playlist
/// - `EmptyPlaylist` if there is nothing to play or step through
/// - `InvalidState` if `pause`/`next`/`previous` run with nothing loaded
pub fn apply_action(
    music: &mut MusicState,
    action: PlaybackAction,
    actor: UserId,
    now: DateTime<Utc>,
) -> Result<(), AscError> {
    match action {
        PlaybackAction::Play {
            track_id: Some(track_id),
            ..
        } => {
            let index = music
                .playlist
                .iter()
                .position(|t| t.id == track_id)
                .ok_or_else(|| AscError::NotFound(format!("track {track_id}")))?;
            start_entry(music, index, actor, now)
        }
        PlaybackAction::Play {
            track_id: None,
            position,
        } => match music.currently_playing.as_mut() {
            Some(current) => {
                current.position =
                    clamp_position(position.unwrap_or(0.0), current.track.duration);
                current.is_paused = false;
                current.controlled_by = actor;
                current.started_at = now;
                Ok(())
            }
            None => start_entry(music, 0, actor, now),
        },
        PlaybackAction::Pause { position } => {
            let current = music
                .currently_playing
                .as_mut()
                .ok_or_else(|| AscError::InvalidState("nothing is playing".to_string()))?;
            if let Some(position) = position {
                current.position = clamp_position(position, current.track.duration);
            }
            current.is_paused = true;
            current.controlled_by = actor;
            current.started_at = now;
            Ok(())
        }
        PlaybackAction::Next | PlaybackAction::Previous => {
            let len = music.playlist.len();
            if len == 0 {
                return Err(AscError::EmptyPlaylist);
            }
            if music.currently_playing.is_none() {
                return Err(AscError::InvalidState("nothing is playing".to_string()));
            }
            let forward = action == PlaybackAction::Next;
            let target = match current_anchor(music) {
                Some(PlaybackAnchor {
                    index,
                    detached: true,
                }) => {
                    if forward {
                        if index >= len {
                            0
                        } else {
                            index
                        }
                    } else if index == 0 {
                        len - 1
                    } else {
                        (index - 1).min(len - 1)
                    }
                }
                Some(PlaybackAnchor { index, .. }) => {
                    if forward {
                        (index + 1) % len
                    } else {
                        (index % len + len - 1) % len
                    }
                }
                None => {
                    if forward {
                        0
                    } else {
                        len - 1
                    }
                }
            };
            start_entry(music, target, actor, now)
        }
    }
}

/// Remove a playlist entry and re-anchor playback.
///
/// # Errors
///
/// `NotFound` if the track is not in the playlist.
pub fn remove_entry(music: &mut MusicState, track_id: TrackId) -> Result<Track, AscError> {
    let index = music
        .playlist
        .iter()
        .position(|t| t.id == track_id)
        .ok_or_else(|| AscError::NotFound(format!("track {track_id}")))?;
    let removed = music.playlist.remove(index);

    if let Some(anchor) = music.anchor.as_mut() {
        if index < anchor.index {
            anchor.index -= 1;
        } else if index == anchor.index {
            anchor.detached = true;
        }
    }
    Ok(removed)
}

/// Empty the playlist; the current track keeps playing.
pub fn clear_entries(music: &mut MusicState) {
    music.playlist.clear();
    music.anchor = music.currently_playing.as_ref().map(|_| PlaybackAnchor {
        index: 0,
        detached: true,
    });
}

/// Runs playback and playlist changes against live sessions.
pub struct PlaybackSynchronizer {
    sessions: Arc<SessionOrchestrator>,
}

impl PlaybackSynchronizer {
    #[must_use]
    pub fn new(sessions: Arc<SessionOrchestrator>) -> Self {
        Self { sessions }
    }

    /// Lock a music session the user may control.
    async fn lock_music(
        &self,
        session_id: SessionId,
        user_id: UserId,
    ) -> Result<SessionGuard, AscError> {
        let guard = self.sessions.lock(session_id).await?;
        if guard.session.session_type != SessionType::VoiceWithMusic {
            return Err(AscError::InvalidState(
                "session has no shared music".to_string(),
            ));
        }
        if guard.session.status != SessionStatus::Active {
            return Err(AscError::InvalidState(format!(
                "session is {}",
                guard.session.status.as_str()
            )));
        }
        if !guard.session.is_active_participant(user_id) {
            return Err(AscError::PermissionDenied(format!(
                "user {user_id} is not an active participant"
            )));
        }
        Ok(guard)
    }

    /// Apply a playback action on behalf of `user_id`.
    ///
    /// # Errors
    ///
    /// - `InvalidState` unless the session is an active music session
    /// - `PermissionDenied` unless the user is an active participant
    /// - whatever [`apply_action`] returns
    #[instrument(
        skip_all,
        name = "asc.playback.control",
        fields(session_id = %session_id, user_id = %user_id, action = action.name())
    )]
    pub async fn control(
        &self,
        session_id: SessionId,
        user_id: UserId,
        action: PlaybackAction,
    ) -> Result<MusicState, AscError> {
        let mut guard = self.lock_music(session_id, user_id).await?;
        apply_action(&mut guard.session.music, action, user_id, Utc::now())?;
        self.sessions.commit(&mut guard).await?;

        metrics::record_playback_action(action.name());
        guard.room().publish(SessionEvent::PlaybackChanged {
            session_id,
            action: action.name(),
            currently_playing: guard.session.music.currently_playing.clone(),
        });
        debug!(target: "asc.playback", session_id = %session_id, action = action.name(), "Playback changed");
        Ok(guard.session.music)
    }

    /// # Errors
    ///
    /// See [`Self::control`].
    pub async fn play(
        &self,
        session_id: SessionId,
        user_id: UserId,
        track_id: Option<TrackId>,
        position: Option<f64>,
    ) -> Result<MusicState, AscError> {
        self.control(session_id, user_id, PlaybackAction::Play { track_id, position })
            .await
    }

    /// # Errors
    ///
    /// See [`Self::control`].
    pub async fn pause(
        &self,
        session_id: SessionId,
        user_id: UserId,
        position: Option<f64>,
    ) -> Result<MusicState, AscError> {
        self.control(session_id, user_id, PlaybackAction::Pause { position })
            .await
    }

    /// # Errors
    ///
    /// See [`Self::control`].
    pub async fn next(&self, session_id: SessionId, user_id: UserId) -> Result<MusicState, AscError> {
        self.control(session_id, user_id, PlaybackAction::Next).await
    }

    /// # Errors
    ///
    /// See [`Self::control`].
    pub async fn previous(
        &self,
        session_id: SessionId,
        user_id: UserId,
    ) -> Result<MusicState, AscError> {
        self.control(session_id, user_id, PlaybackAction::Previous)
            .await
    }

    /// Append a track to the playlist.
    ///
    /// # Errors
    ///
    /// As for [`Self::control`].
    #[instrument(skip_all, name = "asc.playback.add_track", fields(session_id = %session_id))]
    pub async fn add_track(
        &self,
        session_id: SessionId,
        user_id: UserId,
        track: NewTrack,
    ) -> Result<Track, AscError> {
        let mut guard = self.lock_music(session_id, user_id).await?;
        let track = Track {
            id: TrackId::new(),
            title: track.title,
            artist: track.artist,
            duration: track.duration,
            source_url: track.source_url,
            added_by: user_id,
            added_at: Utc::now(),
        };
        guard.session.music.playlist.push(track.clone());
        self.playlist_changed(&mut guard, "add_track").await?;
        Ok(track)
    }

    /// Remove a track from the playlist.
    ///
    /// # Errors
    ///
    /// As for [`Self::control`], plus `NotFound` for an unknown track.
    #[instrument(skip_all, name = "asc.playback.remove_track", fields(session_id = %session_id))]
    pub async fn remove_track(
        &self,
        session_id: SessionId,
        user_id: UserId,
        track_id: TrackId,
    ) -> Result<Track, AscError> {
        let mut guard = self.lock_music(session_id, user_id).await?;
        let removed = remove_entry(&mut guard.session.music, track_id)?;
        self.playlist_changed(&mut guard, "remove_track").await?;
        Ok(removed)
    }

    /// Empty the playlist.
    ///
    /// # Errors
    ///
    /// As for [`Self::control`].
    #[instrument(skip_all, name = "asc.playback.clear_playlist", fields(session_id = %session_id))]
    pub async fn clear_playlist(
        &self,
        session_id: SessionId,
        user_id: UserId,
    ) -> Result<(), AscError> {
        let mut guard = self.lock_music(session_id, user_id).await?;
        clear_entries(&mut guard.session.music);
        self.playlist_changed(&mut guard, "clear_playlist").await
    }

    async fn playlist_changed(
        &self,
        guard: &mut SessionGuard,
        action: &'static str,
    ) -> Result<(), AscError> {
        self.sessions.commit(guard).await?;
        metrics::record_playback_action(action);
        guard.room().publish(SessionEvent::PlaylistChanged {
            session_id: guard.session.id,
            playlist: guard.session.music.playlist.clone(),
        });
        Ok(())
    }
}
