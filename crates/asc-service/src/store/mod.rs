//! Durable session store.
//!
//! Sessions are persisted as whole documents. The store enforces the
//! one-live-session-per-group rule through [`SessionStore::insert_active`],
//! which must be atomic across processes.
//!
//! - [`postgres`] - `sqlx` adapter over a JSONB table

pub mod postgres;

pub use postgres::PgSessionStore;

use crate::errors::AscError;
use crate::models::AudioSession;
use async_trait::async_trait;
use common::types::{GroupId, SessionId};

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// The group's non-ended session, if any.
    async fn find_active_by_group(
        &self,
        group_id: GroupId,
    ) -> Result<Option<AudioSession>, AscError>;

    async fn find_by_id(&self, session_id: SessionId) -> Result<Option<AudioSession>, AscError>;

    /// Insert a new session unless the group already has a non-ended one.
    ///
    /// # Errors
    ///
    /// `AscError::Conflict` if a live session exists for the group.
    async fn insert_active(&self, session: &AudioSession) -> Result<(), AscError>;

    /// Overwrite an existing session document.
    ///
    /// # Errors
    ///
    /// `AscError::SessionNotFound` if the session was never inserted.
    async fn save(&self, session: &AudioSession) -> Result<(), AscError>;

    /// Remove a session that failed to initialize.
    async fn delete(&self, session_id: SessionId) -> Result<(), AscError>;
}
