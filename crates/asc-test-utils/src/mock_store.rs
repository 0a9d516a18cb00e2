//! In-memory session store for ASC testing.
//!
//! Behaves like the Postgres store: `insert_active` rejects a second
//! non-ended session for a group, and `save` requires an existing row.
//! Writes can be made to fail to exercise rollback paths.

use asc_service::errors::AscError;
use asc_service::models::{AudioSession, SessionStatus};
use asc_service::store::SessionStore;
use async_trait::async_trait;
use common::types::{GroupId, SessionId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct StoreInner {
    sessions: Mutex<HashMap<SessionId, AudioSession>>,
    fail_saves: AtomicBool,
    saves: AtomicUsize,
}

/// In-memory [`SessionStore`].
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    inner: Arc<StoreInner>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `save` fail with a store error.
    pub fn fail_saves(&self, fail: bool) {
        self.inner.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Number of successful `save` calls.
    #[must_use]
    pub fn save_count(&self) -> usize {
        self.inner.saves.load(Ordering::SeqCst)
    }

    /// Stored document, bypassing the trait.
    #[must_use]
    pub fn get(&self, session_id: SessionId) -> Option<AudioSession> {
        self.inner.sessions.lock().unwrap().get(&session_id).cloned()
    }

    /// Number of stored sessions, ended ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.sessions.lock().unwrap().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of non-ended sessions for a group.
    #[must_use]
    pub fn live_count(&self, group_id: GroupId) -> usize {
        self.inner
            .sessions
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.group_id == group_id && s.status != SessionStatus::Ended)
            .count()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn find_active_by_group(
        &self,
        group_id: GroupId,
    ) -> Result<Option<AudioSession>, AscError> {
        Ok(self
            .inner
            .sessions
            .lock()
            .unwrap()
            .values()
            .find(|s| s.group_id == group_id && s.status != SessionStatus::Ended)
            .cloned())
    }

    async fn find_by_id(&self, session_id: SessionId) -> Result<Option<AudioSession>, AscError> {
        Ok(self.get(session_id))
    }

    async fn insert_active(&self, session: &AudioSession) -> Result<(), AscError> {
        let mut sessions = self.inner.sessions.lock().unwrap();
        if sessions
            .values()
            .any(|s| s.group_id == session.group_id && s.status != SessionStatus::Ended)
        {
            return Err(AscError::Conflict(format!(
                "group {} already has a live session",
                session.group_id
            )));
        }
        sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn save(&self, session: &AudioSession) -> Result<(), AscError> {
        if self.inner.fail_saves.load(Ordering::SeqCst) {
            return Err(AscError::Store("injected save failure".to_string()));
        }
        let mut sessions = self.inner.sessions.lock().unwrap();
        match sessions.get_mut(&session.id) {
            Some(stored) => {
                *stored = session.clone();
                self.inner.saves.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            None => Err(AscError::SessionNotFound(session.id.to_string())),
        }
    }

    async fn delete(&self, session_id: SessionId) -> Result<(), AscError> {
        self.inner.sessions.lock().unwrap().remove(&session_id);
        Ok(())
    }
}
