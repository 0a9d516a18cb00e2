//! Session orchestration.
//!
//! The orchestrator owns the session lifecycle: it enforces one live session
//! per group, creates and tears down routers, and hands out [`SessionGuard`]s
//! that pair a locked [`Room`] with the current session document. Every
//! durable update for a session happens while its room lock is held.
//!
//! # Single live session per group
//!
//! Creation is serialized per group by an in-process async lock, and the
//! store's `insert_active` rejects a second non-ended session for the group
//! atomically, which also covers other processes.
//!
//! # Restarts
//!
//! Rooms are in-memory only. When a non-ended session has no room (the
//! process restarted), a new router and an empty room are built, seeded
//! with the durable active participants as members. Mirrored transport,
//! producer and consumer records are closed, since their handles are gone
//! and clients must renegotiate.

use crate::engine::{MediaRouter, RtpCapabilities, WebRtcTransportOptions, WorkerId};
use crate::errors::AscError;
use crate::events::SessionEvent;
use crate::groups::GroupDirectory;
use crate::models::{
    AudioSession, DeviceType, MediaMode, SessionStatus, SessionType, SessionView,
};
use crate::observability::metrics;
use crate::rooms::{DetachedHandles, Room, RoomRegistry};
use crate::store::SessionStore;
use crate::workers::WorkerPool;
use chrono::Utc;
use common::types::{GroupId, SessionId, UserId};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError};
use std::time::Instant;
use tokio::sync::{broadcast, Mutex, OwnedMutexGuard};
use tracing::{info, instrument, warn};

/// Shared collaborators of the orchestration components.
pub struct SessionContext {
    pub pool: Arc<WorkerPool>,
    pub rooms: Arc<RoomRegistry>,
    pub store: Arc<dyn SessionStore>,
    pub groups: Arc<dyn GroupDirectory>,
    pub transport_options: WebRtcTransportOptions,
}

/// Optional settings for a new session.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct CreateSessionOptions {
    #[serde(default)]
    pub device_type: DeviceType,
    /// Keep a music session alive once every participant has left.
    #[serde(default)]
    pub persist_without_listeners: bool,
}

/// A locked room together with the session document read under the lock.
pub struct SessionGuard {
    room: OwnedMutexGuard<Room>,
    pub session: AudioSession,
}

impl SessionGuard {
    #[must_use]
    pub fn room(&self) -> &Room {
        &self.room
    }

    pub fn room_mut(&mut self) -> &mut Room {
        &mut self.room
    }

    /// Router capabilities for clients; `None` in peer-to-peer mode.
    #[must_use]
    pub fn router_capabilities(&self) -> Option<RtpCapabilities> {
        self.room.router().map(|r| r.rtp_capabilities())
    }

    /// Release the room lock, keeping the document.
    #[must_use]
    pub fn into_session(self) -> AudioSession {
        self.session
    }

    fn view(&self) -> SessionView {
        SessionView {
            session: self.session.clone(),
            mode: self.session.mode(),
            router_rtp_capabilities: self.router_capabilities(),
        }
    }
}

/// Creates, restores, pauses and ends sessions.
pub struct SessionOrchestrator {
    ctx: Arc<SessionContext>,
    group_locks: std::sync::Mutex<HashMap<GroupId, Arc<Mutex<()>>>>,
}

impl SessionOrchestrator {
    #[must_use]
    pub fn new(ctx: Arc<SessionContext>) -> Self {
        Self {
            ctx,
            group_locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    /// Create the group's live session.
    ///
    /// # Errors
    ///
    /// - `PermissionDenied` if the creator is not a group member
    /// - `Conflict` if the group already has a live session
    /// - `Store` if persisting fails (the router is released again)
    #[instrument(
        skip_all,
        name = "asc.sessions.create",
        fields(group_id = %group_id, creator_id = %creator_id)
    )]
    pub async fn create_session(
        &self,
        group_id: GroupId,
        creator_id: UserId,
        session_type: SessionType,
        options: CreateSessionOptions,
    ) -> Result<SessionView, AscError> {
        let start = Instant::now();

        if !self.ctx.groups.is_member(group_id, creator_id).await? {
            return Err(AscError::PermissionDenied(format!(
                "user {creator_id} is not a member of group {group_id}"
            )));
        }

        let group_lock = self.group_lock(group_id);
        let result = {
            let _serialized = group_lock.lock().await;
            self.create_locked(group_id, creator_id, session_type, options)
                .await
        };
        drop(group_lock);
        self.release_group_lock(group_id);

        let view = result?;
        metrics::record_session_created(match view.mode {
            MediaMode::Routed => "routed",
            MediaMode::PeerToPeer => "peer_to_peer",
        });
        metrics::record_operation_duration("create_session", start.elapsed());
        info!(
            target: "asc.sessions",
            session_id = %view.session.id,
            mode = ?view.mode,
            "Session created"
        );
        Ok(view)
    }

    async fn create_locked(
        &self,
        group_id: GroupId,
        creator_id: UserId,
        session_type: SessionType,
        options: CreateSessionOptions,
    ) -> Result<SessionView, AscError> {
        if self.ctx.store.find_active_by_group(group_id).await?.is_some() {
            return Err(AscError::Conflict(format!(
                "group {group_id} already has a live session"
            )));
        }

        let mut session = AudioSession::new(
            group_id,
            creator_id,
            session_type,
            options.device_type,
            options.persist_without_listeners,
            Utc::now(),
        );
        self.ctx.store.insert_active(&session).await?;

        let (router, worker_id) = match self.create_router().await {
            Ok(Some((router, worker_id))) => (Some(router), Some(worker_id)),
            Ok(None) => (None, None),
            Err(e) => {
                self.rollback(session.id, None).await;
                return Err(e);
            }
        };
        session.router_id = router.as_ref().map(|r| r.id().to_string());
        session.worker_id = worker_id;

        if let Err(e) = self.ctx.store.save(&session).await {
            self.rollback(session.id, router).await;
            return Err(e);
        }

        let mut room = Room::new(session.id, router.clone(), worker_id);
        room.admit(creator_id);
        let (room, inserted) = self.ctx.rooms.insert_if_absent(room).await;
        let room = room.lock_owned().await;
        if inserted {
            return Ok(SessionGuard { room, session }.view());
        }

        // Someone registered a room first; keep theirs and point the document at it.
        warn!(
            target: "asc.sessions",
            session_id = %session.id,
            "Room registered during creation, releasing our router"
        );
        if let Some(router) = router {
            router.close().await;
        }
        let mut guard = SessionGuard {
            room,
            session: self.get_session(session.id).await?,
        };
        guard.session.router_id = guard.room().router().map(|r| r.id().to_string());
        guard.session.worker_id = guard.room().worker_id();
        if guard.room().generation(creator_id).is_none() {
            guard.room_mut().admit(creator_id);
        }
        self.commit(&mut guard).await?;
        Ok(guard.view())
    }

    /// Undo a half-created session.
    async fn rollback(&self, session_id: SessionId, router: Option<Arc<dyn MediaRouter>>) {
        if let Some(router) = router {
            router.close().await;
        }
        if let Err(e) = self.ctx.store.delete(session_id).await {
            warn!(
                target: "asc.sessions",
                session_id = %session_id,
                error = %e,
                "Failed to delete half-created session"
            );
        }
    }

    /// Pick a worker and create a router on it.
    ///
    /// Returns `Ok(None)` when the engine refuses, which puts the session in
    /// peer-to-peer mode.
    async fn create_router(
        &self,
    ) -> Result<Option<(Arc<dyn MediaRouter>, WorkerId)>, AscError> {
        let worker = self.ctx.pool.next_worker()?;
        match worker.create_router(&RtpCapabilities::opus()).await {
            Ok(router) => Ok(Some((router, worker.id()))),
            Err(e) => {
                metrics::record_engine_error("create_router");
                warn!(
                    target: "asc.sessions",
                    worker_id = worker.id(),
                    error = %e,
                    "Router creation failed, falling back to peer-to-peer"
                );
                Ok(None)
            }
        }
    }

    fn group_lock(&self, group_id: GroupId) -> Arc<Mutex<()>> {
        let mut locks = self
            .group_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(group_id).or_default())
    }

    fn release_group_lock(&self, group_id: GroupId) {
        let mut locks = self
            .group_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(&group_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&group_id);
        }
    }

    /// The group's live session, restoring its room if this process has none.
    ///
    /// # Errors
    ///
    /// `SessionNotFound` if the group has no live session.
    #[instrument(skip_all, name = "asc.sessions.get_active", fields(group_id = %group_id))]
    pub async fn get_active_session(&self, group_id: GroupId) -> Result<SessionView, AscError> {
        let session = self
            .ctx
            .store
            .find_active_by_group(group_id)
            .await?
            .ok_or_else(|| {
                AscError::SessionNotFound(format!("no live session for group {group_id}"))
            })?;

        let guard = self.lock(session.id).await?;
        Ok(guard.view())
    }

    /// Fetch a session by id, whatever its status.
    ///
    /// # Errors
    ///
    /// `SessionNotFound` if no such session exists.
    pub async fn get_session(&self, session_id: SessionId) -> Result<AudioSession, AscError> {
        self.ctx
            .store
            .find_by_id(session_id)
            .await?
            .ok_or_else(|| AscError::SessionNotFound(session_id.to_string()))
    }

    /// Lock a live session's room and read its document.
    ///
    /// # Errors
    ///
    /// - `SessionNotFound` if the session does not exist
    /// - `InvalidState` if the session has ended
    pub async fn lock(&self, session_id: SessionId) -> Result<SessionGuard, AscError> {
        let room = match self.ctx.rooms.get(session_id).await {
            Some(room) => room,
            None => {
                let session = self.get_session(session_id).await?;
                if session.status == SessionStatus::Ended {
                    return Err(ended(session_id));
                }
                self.restore_room(session).await?
            }
        };

        let room = room.lock_owned().await;
        if room.is_closed() {
            return Err(ended(session_id));
        }

        let session = self.get_session(session_id).await?;
        if session.status == SessionStatus::Ended {
            return Err(ended(session_id));
        }
        Ok(SessionGuard { room, session })
    }

    /// Persist the guarded document.
    ///
    /// # Errors
    ///
    /// `Store` if the write fails.
    pub async fn commit(&self, guard: &mut SessionGuard) -> Result<(), AscError> {
        guard.session.updated_at = Utc::now();
        self.ctx.store.save(&guard.session).await
    }

    /// Rebuild the room of a live session that has none in this process.
    ///
    /// Runs under the group's creation lock, so a session that is still
    /// being created is waited for instead of restored.
    async fn restore_room(&self, session: AudioSession) -> Result<Arc<Mutex<Room>>, AscError> {
        let group_id = session.group_id;
        let group_lock = self.group_lock(group_id);
        let result = {
            let _serialized = group_lock.lock().await;
            match self.ctx.rooms.get(session.id).await {
                Some(room) => Ok(room),
                None => self.rebuild_room(session.id).await,
            }
        };
        drop(group_lock);
        self.release_group_lock(group_id);
        result
    }

    #[instrument(skip_all, name = "asc.sessions.restore", fields(session_id = %session_id))]
    async fn rebuild_room(&self, session_id: SessionId) -> Result<Arc<Mutex<Room>>, AscError> {
        let session = self.get_session(session_id).await?;
        if session.status == SessionStatus::Ended {
            return Err(ended(session_id));
        }

        let (router, worker_id) = match self.create_router().await? {
            Some((router, worker_id)) => (Some(router), Some(worker_id)),
            None => (None, None),
        };
        let router_id = router.as_ref().map(|r| r.id().to_string());

        let mut room = Room::new(session.id, router.clone(), worker_id);
        for participant in session.active_participants() {
            room.admit(participant.user_id);
        }

        let (room, inserted) = self.ctx.rooms.insert_if_absent(room).await;
        if !inserted {
            // Another request restored it first.
            if let Some(router) = router {
                router.close().await;
            }
            return Ok(room);
        }

        let mut guard = Arc::clone(&room).lock_owned().await;
        match self.get_session(session.id).await {
            Ok(mut current) if current.status != SessionStatus::Ended => {
                let now = Utc::now();
                current.router_id = router_id;
                current.worker_id = worker_id;
                current.close_all_records(now);
                current.updated_at = now;
                if let Err(e) = self.ctx.store.save(&current).await {
                    self.discard_room(&mut guard, session.id).await;
                    return Err(e);
                }
                info!(
                    target: "asc.sessions",
                    session_id = %session.id,
                    members = guard.member_count(),
                    mode = ?current.mode(),
                    "Room restored after restart"
                );
            }
            Ok(_) => {
                self.discard_room(&mut guard, session.id).await;
                return Err(ended(session.id));
            }
            Err(e) => {
                self.discard_room(&mut guard, session.id).await;
                return Err(e);
            }
        }
        drop(guard);
        Ok(room)
    }

    async fn discard_room(&self, room: &mut Room, session_id: SessionId) {
        room.detach_all().close().await;
        self.ctx.rooms.remove(session_id).await;
    }

    /// End a session.
    ///
    /// Ending an already-ended session succeeds without changes.
    ///
    /// # Errors
    ///
    /// - `SessionNotFound` if the session does not exist
    /// - `PermissionDenied` unless the requester created the session or is a
    ///   group admin
    #[instrument(
        skip_all,
        name = "asc.sessions.end",
        fields(session_id = %session_id, requester_id = %requester_id)
    )]
    pub async fn end_session(
        &self,
        session_id: SessionId,
        requester_id: UserId,
    ) -> Result<AudioSession, AscError> {
        let session = self.get_session(session_id).await?;
        if session.status == SessionStatus::Ended {
            return Ok(session);
        }
        self.authorize_owner(&session, requester_id).await?;

        let mut guard = match self.lock(session_id).await {
            Ok(guard) => guard,
            // Ended concurrently.
            Err(AscError::InvalidState(_)) => return self.get_session(session_id).await,
            Err(e) => return Err(e),
        };
        let detached = self.end_locked(&mut guard).await?;
        let session = guard.into_session();
        detached.close().await;
        Ok(session)
    }

    /// Tear down a locked session: persist it as ended, detach every handle
    /// and the router, and unregister the room.
    ///
    /// The returned handles are still open on the engine. Close them after
    /// releasing the guard.
    ///
    /// # Errors
    ///
    /// `Store` if the final write fails; nothing is torn down in that case.
    pub async fn end_locked(
        &self,
        guard: &mut SessionGuard,
    ) -> Result<DetachedHandles, AscError> {
        let now = Utc::now();
        let session = &mut guard.session;
        session.status = SessionStatus::Ended;
        session.ended_at = Some(now);
        for participant in session.participants.iter_mut().filter(|p| p.is_active()) {
            participant.left_at = Some(now);
        }
        session.close_all_records(now);
        session.updated_at = now;
        self.ctx.store.save(session).await?;

        let session_id = session.id;
        let detached = guard.room_mut().detach_all();
        guard.room().publish(SessionEvent::SessionEnded { session_id });
        self.ctx.rooms.remove(session_id).await;

        info!(target: "asc.sessions", session_id = %session_id, "Session ended");
        Ok(detached)
    }

    /// Put a live session on hold (`active` to `paused`).
    ///
    /// # Errors
    ///
    /// `PermissionDenied` as for [`Self::end_session`]; `InvalidState`
    /// unless the session is active.
    #[instrument(skip_all, name = "asc.sessions.hold", fields(session_id = %session_id))]
    pub async fn hold_session(
        &self,
        session_id: SessionId,
        requester_id: UserId,
    ) -> Result<AudioSession, AscError> {
        self.transition(
            session_id,
            requester_id,
            SessionStatus::Active,
            SessionStatus::Paused,
        )
        .await
    }

    /// Resume a held session (`paused` to `active`).
    ///
    /// # Errors
    ///
    /// `PermissionDenied` as for [`Self::end_session`]; `InvalidState`
    /// unless the session is paused.
    #[instrument(skip_all, name = "asc.sessions.resume", fields(session_id = %session_id))]
    pub async fn resume_session(
        &self,
        session_id: SessionId,
        requester_id: UserId,
    ) -> Result<AudioSession, AscError> {
        self.transition(
            session_id,
            requester_id,
            SessionStatus::Paused,
            SessionStatus::Active,
        )
        .await
    }

    async fn transition(
        &self,
        session_id: SessionId,
        requester_id: UserId,
        from: SessionStatus,
        to: SessionStatus,
    ) -> Result<AudioSession, AscError> {
        let session = self.get_session(session_id).await?;
        self.authorize_owner(&session, requester_id).await?;

        let mut guard = self.lock(session_id).await?;
        if guard.session.status != from {
            return Err(AscError::InvalidState(format!(
                "session is {}, expected {}",
                guard.session.status.as_str(),
                from.as_str()
            )));
        }
        guard.session.status = to;
        self.commit(&mut guard).await?;
        guard.room().publish(SessionEvent::SessionStatusChanged {
            session_id,
            status: to,
        });
        Ok(guard.session)
    }

    async fn authorize_owner(
        &self,
        session: &AudioSession,
        requester_id: UserId,
    ) -> Result<(), AscError> {
        if self.ctx.groups.has_active_session_owner(session, requester_id)
            || self.ctx.groups.is_admin(session.group_id, requester_id).await?
        {
            Ok(())
        } else {
            Err(AscError::PermissionDenied(format!(
                "user {requester_id} is neither the session creator nor a group admin"
            )))
        }
    }

    /// Subscribe an active participant to a live session's events.
    ///
    /// The receiver closes once the session ends and its room is dropped.
    ///
    /// # Errors
    ///
    /// - `SessionNotFound` / `InvalidState` as for [`Self::lock`]
    /// - `PermissionDenied` unless `user_id` is an active participant
    pub async fn subscribe(
        &self,
        session_id: SessionId,
        user_id: UserId,
    ) -> Result<broadcast::Receiver<SessionEvent>, AscError> {
        let guard = self.lock(session_id).await?;
        if !guard.session.is_active_participant(user_id) {
            return Err(AscError::PermissionDenied(format!(
                "user {user_id} is not an active participant"
            )));
        }
        Ok(guard.room().subscribe())
    }
}

fn ended(session_id: SessionId) -> AscError {
    AscError::InvalidState(format!("session {session_id} has ended"))
}
