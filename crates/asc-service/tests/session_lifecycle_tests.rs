//! Session lifecycle integration tests.
//!
//! Exercises the orchestrator through `TestHarness`: single live session per
//! group, peer-to-peer fallback, ending, hold/resume and restart recovery.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use asc_service::engine::{MediaKind, TransportDirection};
use asc_service::errors::AscError;
use asc_service::models::{MediaMode, SessionStatus, SessionType};
use asc_service::sessions::CreateSessionOptions;
use asc_test_utils::{HandleKind, MockEngine, TestHarness};
use common::types::GroupId;
use std::sync::Arc;
use std::time::Duration;

/// Concurrent creates for one group yield exactly one live session.
#[tokio::test]
async fn test_concurrent_creates_yield_one_session() -> Result<(), anyhow::Error> {
    const CALLERS: usize = 8;
    let harness = Arc::new(TestHarness::new().await);

    let mut handles = Vec::new();
    for _ in 0..CALLERS {
        let harness = Arc::clone(&harness);
        let user = harness.member();
        handles.push(tokio::spawn(async move {
            harness.create_session(user, SessionType::VoiceOnly).await
        }));
    }

    let mut created = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await? {
            Ok(_) => created += 1,
            Err(AscError::Conflict(_)) => conflicts += 1,
            Err(e) => anyhow::bail!("unexpected error: {e}"),
        }
    }

    assert_eq!(created, 1);
    assert_eq!(conflicts, CALLERS - 1);
    assert_eq!(harness.store.live_count(harness.group_id), 1);
    assert_eq!(harness.engine.open_count(HandleKind::Router), 1);
    Ok(())
}

/// A second create for the same group conflicts; other groups are unaffected.
#[tokio::test]
async fn test_create_conflicts_per_group() -> Result<(), anyhow::Error> {
    let harness = TestHarness::new().await;
    let alice = harness.member();
    harness.create_session(alice, SessionType::VoiceOnly).await?;

    let err = harness
        .create_session(alice, SessionType::VoiceWithMusic)
        .await
        .unwrap_err();
    assert!(matches!(err, AscError::Conflict(_)));

    let other_group = GroupId::new();
    harness.groups.add_member(other_group, alice);
    harness
        .service
        .sessions
        .create_session(
            other_group,
            alice,
            SessionType::VoiceOnly,
            CreateSessionOptions::default(),
        )
        .await?;
    Ok(())
}

/// Only group members may create sessions.
#[tokio::test]
async fn test_non_member_cannot_create() {
    let harness = TestHarness::new().await;
    let stranger = common::types::UserId::new();

    let err = harness
        .create_session(stranger, SessionType::VoiceOnly)
        .await
        .unwrap_err();

    assert!(matches!(err, AscError::PermissionDenied(_)));
    assert!(harness.store.is_empty());
}

/// The creator is an active participant of a routed session.
#[tokio::test]
async fn test_create_returns_routed_view() -> Result<(), anyhow::Error> {
    let harness = TestHarness::new().await;
    let alice = harness.member();

    let view = harness.create_session(alice, SessionType::VoiceOnly).await?;

    assert_eq!(view.mode, MediaMode::Routed);
    assert_eq!(view.session.status, SessionStatus::Active);
    assert!(view.session.is_active_participant(alice));
    assert!(view.session.router_id.is_some());
    let caps = view.router_rtp_capabilities.expect("routed view has caps");
    assert!(caps.supports("audio/opus"));

    let active = harness
        .service
        .sessions
        .get_active_session(harness.group_id)
        .await?;
    assert_eq!(active.session.id, view.session.id);
    Ok(())
}

/// Router failure degrades to peer-to-peer instead of failing the create.
#[tokio::test]
async fn test_router_failure_falls_back_to_peer_to_peer() -> Result<(), anyhow::Error> {
    let engine = MockEngine::new();
    engine.fail_router_creation(true);
    let harness = TestHarness::builder().engine(engine).build().await;
    let alice = harness.member();
    let bob = harness.member();

    let view = harness.create_session(alice, SessionType::VoiceOnly).await?;
    assert_eq!(view.mode, MediaMode::PeerToPeer);
    assert!(view.router_rtp_capabilities.is_none());
    assert!(view.session.router_id.is_none());

    let session_id = view.session.id;
    let caps = harness.service.participants.join(session_id, bob, Default::default()).await?;
    assert!(caps.is_none());

    let err = harness
        .service
        .participants
        .create_transport(session_id, bob, TransportDirection::Send)
        .await
        .unwrap_err();
    assert!(matches!(err, AscError::InvalidState(_)));
    Ok(())
}

/// A lookup racing a create waits for it instead of building a second room.
#[tokio::test]
async fn test_lookup_during_create_shares_one_router() -> Result<(), anyhow::Error> {
    let harness = Arc::new(TestHarness::new().await);
    let alice = harness.member();
    let gate = harness.engine.hold_routers();

    let creating = {
        let harness = Arc::clone(&harness);
        tokio::spawn(async move {
            harness.create_session(alice, SessionType::VoiceOnly).await
        })
    };
    gate.entered().await;

    // The session document is already stored while its router is pending
    let looking_up = {
        let harness = Arc::clone(&harness);
        tokio::spawn(async move {
            harness
                .service
                .sessions
                .get_active_session(harness.group_id)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    // One permit per router the engine might be asked for
    gate.release_one();
    gate.release_one();

    let created = creating.await??;
    let looked_up = looking_up.await??;

    let stored = harness.store.get(created.session.id).unwrap();
    assert_eq!(harness.engine.open_count(HandleKind::Router), 1);
    assert_eq!(looked_up.session.id, created.session.id);
    assert_eq!(looked_up.session.router_id, created.session.router_id);
    assert_eq!(stored.router_id, created.session.router_id);
    assert_eq!(harness.rooms.len().await, 1);
    Ok(())
}

/// A failed write during creation releases the router and the group.
#[tokio::test]
async fn test_create_rolls_back_on_store_failure() -> Result<(), anyhow::Error> {
    let harness = TestHarness::new().await;
    let alice = harness.member();

    harness.store.fail_saves(true);
    let err = harness
        .create_session(alice, SessionType::VoiceOnly)
        .await
        .unwrap_err();
    assert!(matches!(err, AscError::Store(_)));
    assert_eq!(harness.engine.open_count(HandleKind::Router), 0);
    assert!(harness.store.is_empty());

    harness.store.fail_saves(false);
    harness.create_session(alice, SessionType::VoiceOnly).await?;
    Ok(())
}

/// Ending requires the creator or an admin; it is idempotent and frees the group.
#[tokio::test]
async fn test_end_session_permissions_and_idempotence() -> Result<(), anyhow::Error> {
    let harness = TestHarness::new().await;
    let alice = harness.member();
    let bob = harness.member();
    let admin = harness.admin();

    let view = harness.create_session(alice, SessionType::VoiceOnly).await?;
    let session_id = view.session.id;

    let err = harness
        .service
        .sessions
        .end_session(session_id, bob)
        .await
        .unwrap_err();
    assert!(matches!(err, AscError::PermissionDenied(_)));

    let ended = harness.service.sessions.end_session(session_id, admin).await?;
    assert_eq!(ended.status, SessionStatus::Ended);
    assert!(ended.ended_at.is_some());
    assert!(ended.participants.iter().all(|p| p.left_at.is_some()));
    assert_eq!(harness.engine.open_handle_count(), 0);
    assert!(harness.rooms.is_empty().await);

    let again = harness.service.sessions.end_session(session_id, alice).await?;
    assert_eq!(again.ended_at, ended.ended_at);

    let err = harness
        .service
        .sessions
        .get_active_session(harness.group_id)
        .await
        .unwrap_err();
    assert!(matches!(err, AscError::SessionNotFound(_)));

    harness.create_session(bob, SessionType::VoiceOnly).await?;
    Ok(())
}

/// Operations on an ended session report it as ended.
#[tokio::test]
async fn test_ended_session_rejects_operations() -> Result<(), anyhow::Error> {
    let harness = TestHarness::new().await;
    let alice = harness.member();
    let view = harness.create_session(alice, SessionType::VoiceOnly).await?;
    let session_id = view.session.id;
    harness.service.sessions.end_session(session_id, alice).await?;

    let err = harness
        .service
        .participants
        .join(session_id, alice, Default::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AscError::InvalidState(_)));

    let err = harness
        .service
        .participants
        .list_producers(session_id)
        .await
        .unwrap_err();
    assert!(matches!(err, AscError::InvalidState(_)));
    Ok(())
}

/// Hold blocks joins until the session is resumed.
#[tokio::test]
async fn test_hold_and_resume() -> Result<(), anyhow::Error> {
    let harness = TestHarness::new().await;
    let alice = harness.member();
    let bob = harness.member();
    let view = harness.create_session(alice, SessionType::VoiceOnly).await?;
    let session_id = view.session.id;

    let held = harness.service.sessions.hold_session(session_id, alice).await?;
    assert_eq!(held.status, SessionStatus::Paused);

    let err = harness
        .service
        .participants
        .join(session_id, bob, Default::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AscError::InvalidState(_)));

    let err = harness
        .service
        .sessions
        .hold_session(session_id, alice)
        .await
        .unwrap_err();
    assert!(matches!(err, AscError::InvalidState(_)));

    let resumed = harness.service.sessions.resume_session(session_id, alice).await?;
    assert_eq!(resumed.status, SessionStatus::Active);
    harness
        .service
        .participants
        .join(session_id, bob, Default::default())
        .await?;
    Ok(())
}

/// After a restart the room is rebuilt from the stored document.
#[tokio::test]
async fn test_restart_rebuilds_room_from_store() -> Result<(), anyhow::Error> {
    let harness = TestHarness::new().await;
    let alice = harness.member();
    let bob = harness.member();
    let view = harness.create_session(alice, SessionType::VoiceOnly).await?;
    let session_id = view.session.id;
    let old_router = view.session.router_id.clone().expect("routed");

    harness
        .service
        .participants
        .join(session_id, bob, Default::default())
        .await?;
    let old_transport = harness
        .service
        .participants
        .create_transport(session_id, bob, TransportDirection::Send)
        .await?;

    let restarted = harness.restart().await;
    assert!(restarted.rooms.is_empty().await);

    // First use restores the room
    let active = restarted
        .service
        .sessions
        .get_active_session(harness.group_id)
        .await?;
    assert_eq!(active.session.id, session_id);
    assert_eq!(active.mode, MediaMode::Routed);
    assert_ne!(active.session.router_id.as_deref(), Some(old_router.as_str()));
    assert_eq!(active.session.open_record_count(), 0);
    assert!(active.session.is_active_participant(alice));
    assert!(active.session.is_active_participant(bob));

    // Handles from before the restart are gone
    let err = restarted
        .service
        .participants
        .connect_transport(
            session_id,
            bob,
            &old_transport.id,
            serde_json::json!({ "role": "client" }),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AscError::NotFound(_)));
    let err = restarted
        .service
        .participants
        .create_producer(
            session_id,
            bob,
            &old_transport.id,
            MediaKind::Audio,
            serde_json::json!({}),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AscError::NotFound(_)));

    // Members are admitted without rejoining
    let fresh = restarted
        .service
        .participants
        .create_transport(session_id, bob, TransportDirection::Send)
        .await?;
    assert_ne!(fresh.id, old_transport.id);
    restarted
        .service
        .participants
        .connect_transport(session_id, bob, &fresh.id, serde_json::json!({ "role": "client" }))
        .await?;
    assert_eq!(restarted.rooms.len().await, 1);
    Ok(())
}
