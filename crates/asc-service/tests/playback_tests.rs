//! Playback synchronizer integration tests.
//!
//! Includes the create/join/play/leave/end walkthrough of a music session.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use asc_service::errors::AscError;
use asc_service::events::SessionEvent;
use asc_service::models::{DeviceType, SessionStatus, SessionType};
use asc_test_utils::{new_track, TestHarness};
use common::types::{SessionId, UserId};

async fn music_session(harness: &TestHarness) -> Result<(SessionId, UserId, UserId), anyhow::Error> {
    let alice = harness.member();
    let bob = harness.member();
    let view = harness
        .create_session(alice, SessionType::VoiceWithMusic)
        .await?;
    harness
        .service
        .participants
        .join(view.session.id, bob, DeviceType::Web)
        .await?;
    Ok((view.session.id, alice, bob))
}

/// Create, join, add a track, play, leave and end a music session.
#[tokio::test]
async fn test_music_session_walkthrough() -> Result<(), anyhow::Error> {
    let harness = TestHarness::new().await;
    let u1 = harness.admin();
    let u2 = harness.member();

    let view = harness
        .create_session(u1, SessionType::VoiceWithMusic)
        .await?;
    let s = view.session.id;
    assert_eq!(view.session.status, SessionStatus::Active);
    assert_eq!(view.session.participants.len(), 1);
    assert_eq!(view.session.participants.first().unwrap().user_id, u1);

    harness.service.participants.join(s, u2, DeviceType::Web).await?;
    let session = harness.service.sessions.get_session(s).await?;
    let ids: Vec<_> = session.participants.iter().map(|p| p.user_id).collect();
    assert_eq!(ids, vec![u1, u2]);

    harness.service.playback.add_track(s, u2, new_track("X")).await?;
    let music = harness.service.playback.play(s, u2, None, None).await?;
    let current = music.currently_playing.unwrap();
    assert_eq!(current.track.title, "X");
    assert_eq!(current.controlled_by, u2);

    harness.service.participants.leave(s, u1).await?;
    let session = harness.service.sessions.get_session(s).await?;
    assert!(session.participant(u1).unwrap().left_at.is_some());
    assert!(session.is_active_participant(u2));

    let err = harness.service.sessions.end_session(s, u2).await.unwrap_err();
    assert!(matches!(err, AscError::PermissionDenied(_)));

    let ended = harness.service.sessions.end_session(s, u1).await?;
    assert_eq!(ended.status, SessionStatus::Ended);
    assert!(harness.rooms.get(s).await.is_none());

    let again = harness.service.sessions.end_session(s, u1).await?;
    assert_eq!(again.status, SessionStatus::Ended);
    Ok(())
}

/// Stepping wraps in both directions.
#[tokio::test]
async fn test_next_and_previous_wrap() -> Result<(), anyhow::Error> {
    let harness = TestHarness::new().await;
    let (s, alice, bob) = music_session(&harness).await?;
    let playback = &harness.service.playback;

    playback.add_track(s, alice, new_track("A")).await?;
    let b = playback.add_track(s, alice, new_track("B")).await?;
    playback.add_track(s, bob, new_track("C")).await?;

    playback.play(s, alice, Some(b.id), None).await?;
    let title = |m: &asc_service::models::MusicState| {
        m.currently_playing.as_ref().unwrap().track.title.clone()
    };

    assert_eq!(title(&playback.next(s, bob).await?), "C");
    assert_eq!(title(&playback.next(s, bob).await?), "A");
    let music = playback.previous(s, alice).await?;
    assert_eq!(title(&music), "C");
    assert_eq!(music.currently_playing.unwrap().controlled_by, alice);
    Ok(())
}

/// Removing the current track keeps it playing and re-anchors stepping.
#[tokio::test]
async fn test_remove_current_track_then_next() -> Result<(), anyhow::Error> {
    let harness = TestHarness::new().await;
    let (s, alice, _bob) = music_session(&harness).await?;
    let playback = &harness.service.playback;

    playback.add_track(s, alice, new_track("A")).await?;
    let b = playback.add_track(s, alice, new_track("B")).await?;
    playback.add_track(s, alice, new_track("C")).await?;
    playback.play(s, alice, Some(b.id), None).await?;

    let removed = playback.remove_track(s, alice, b.id).await?;
    assert_eq!(removed.title, "B");

    let stored = harness.store.get(s).unwrap();
    assert_eq!(stored.music.playlist.len(), 2);
    assert_eq!(
        stored.music.currently_playing.as_ref().unwrap().track.title,
        "B"
    );

    let music = playback.next(s, alice).await?;
    assert_eq!(music.currently_playing.unwrap().track.title, "C");

    let err = playback.remove_track(s, alice, b.id).await.unwrap_err();
    assert!(matches!(err, AscError::NotFound(_)));
    Ok(())
}

/// Pause records the position; play resumes the loaded track.
#[tokio::test]
async fn test_pause_and_resume() -> Result<(), anyhow::Error> {
    let harness = TestHarness::new().await;
    let (s, alice, bob) = music_session(&harness).await?;
    let playback = &harness.service.playback;

    let err = playback.pause(s, alice, Some(1.0)).await.unwrap_err();
    assert!(matches!(err, AscError::InvalidState(_)));

    playback.add_track(s, alice, new_track("A")).await?;
    playback.play(s, alice, None, None).await?;

    let music = playback.pause(s, bob, Some(31.5)).await?;
    let current = music.currently_playing.unwrap();
    assert!(current.is_paused);
    assert!((current.position - 31.5).abs() < f64::EPSILON);
    assert_eq!(current.controlled_by, bob);

    let music = playback.play(s, alice, None, Some(31.5)).await?;
    assert!(!music.currently_playing.unwrap().is_paused);
    Ok(())
}

/// Playback on an empty playlist reports it.
#[tokio::test]
async fn test_play_empty_playlist() -> Result<(), anyhow::Error> {
    let harness = TestHarness::new().await;
    let (s, alice, _bob) = music_session(&harness).await?;

    let err = harness
        .service
        .playback
        .play(s, alice, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AscError::EmptyPlaylist));

    let err = harness.service.playback.next(s, alice).await.unwrap_err();
    assert!(matches!(err, AscError::EmptyPlaylist));
    Ok(())
}

/// Music operations need a music session, an active status and a participant.
#[tokio::test]
async fn test_playback_preconditions() -> Result<(), anyhow::Error> {
    let harness = TestHarness::new().await;

    let alice = harness.member();
    let voice = harness.create_session(alice, SessionType::VoiceOnly).await?;
    let err = harness
        .service
        .playback
        .add_track(voice.session.id, alice, new_track("A"))
        .await
        .unwrap_err();
    assert!(matches!(err, AscError::InvalidState(_)));
    harness
        .service
        .sessions
        .end_session(voice.session.id, alice)
        .await?;

    let (s, alice, _bob) = music_session(&harness).await?;
    let outsider = harness.member();
    let err = harness
        .service
        .playback
        .add_track(s, outsider, new_track("A"))
        .await
        .unwrap_err();
    assert!(matches!(err, AscError::PermissionDenied(_)));

    harness.service.sessions.hold_session(s, alice).await?;
    let err = harness
        .service
        .playback
        .clear_playlist(s, alice)
        .await
        .unwrap_err();
    assert!(matches!(err, AscError::InvalidState(_)));
    Ok(())
}

/// Playback and playlist changes are broadcast to the room.
#[tokio::test]
async fn test_changes_are_broadcast() -> Result<(), anyhow::Error> {
    let harness = TestHarness::new().await;
    let (s, alice, bob) = music_session(&harness).await?;
    let mut events = harness.service.sessions.subscribe(s, bob).await?;

    let track = harness
        .service
        .playback
        .add_track(s, alice, new_track("A"))
        .await?;
    match events.recv().await? {
        SessionEvent::PlaylistChanged { playlist, .. } => {
            assert_eq!(playlist, vec![track.clone()]);
        }
        other => anyhow::bail!("unexpected event: {other:?}"),
    }

    harness.service.playback.play(s, bob, None, None).await?;
    match events.recv().await? {
        SessionEvent::PlaybackChanged {
            action,
            currently_playing,
            ..
        } => {
            assert_eq!(action, "play");
            let current = currently_playing.unwrap();
            assert_eq!(current.track.id, track.id);
            assert_eq!(current.controlled_by, bob);
        }
        other => anyhow::bail!("unexpected event: {other:?}"),
    }

    harness.service.playback.clear_playlist(s, alice).await?;
    match events.recv().await? {
        SessionEvent::PlaylistChanged { playlist, .. } => assert!(playlist.is_empty()),
        other => anyhow::bail!("unexpected event: {other:?}"),
    }
    Ok(())
}
