//! PostgreSQL session store.
//!
//! One row per session in `audio_sessions`; the full document lives in a
//! JSONB column while `group_id` and `status` are lifted out so the partial
//! unique index `audio_sessions_one_live_per_group` can reject a second
//! live session for a group. All queries are parameterized.

use super::SessionStore;
use crate::errors::AscError;
use crate::models::AudioSession;
use async_trait::async_trait;
use common::config::DatabaseConfig;
use common::secret::{ExposeSecret, SecretString};
use common::types::{GroupId, SessionId};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use std::time::Duration;
use tracing::{instrument, warn};

/// Postgres error code for `unique_violation`.
const UNIQUE_VIOLATION: &str = "23505";

/// Session store backed by PostgreSQL.
#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a connection pool.
    ///
    /// # Errors
    ///
    /// Returns `AscError::Store` if the database is unreachable.
    pub async fn connect(url: &SecretString, config: &DatabaseConfig) -> Result<Self, AscError> {
        let statement_timeout = config.statement_timeout_seconds;
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(5))
            .after_connect(move |conn, _meta| {
                Box::pin(async move {
                    sqlx::query(&format!("SET statement_timeout = '{statement_timeout}s'"))
                        .execute(conn)
                        .await?;
                    Ok(())
                })
            })
            .connect(url.expose_secret())
            .await
            .map_err(|e| AscError::Store(format!("failed to connect: {e}")))?;
        Ok(Self { pool })
    }

    /// Apply the bundled migrations.
    ///
    /// # Errors
    ///
    /// Returns `AscError::Store` if a migration fails.
    pub async fn migrate(&self) -> Result<(), AscError> {
        sqlx::migrate!()
            .run(&self.pool)
            .await
            .map_err(|e| AscError::Store(format!("migration failed: {e}")))
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION))
}

fn decode(row: &PgRow) -> Result<AudioSession, AscError> {
    let Json(session) = row
        .try_get::<Json<AudioSession>, _>("document")
        .map_err(|e| AscError::Store(format!("undecodable session document: {e}")))?;
    Ok(session)
}

#[async_trait]
impl SessionStore for PgSessionStore {
    #[instrument(skip_all, name = "asc.store.find_active_by_group", fields(group_id = %group_id))]
    async fn find_active_by_group(
        &self,
        group_id: GroupId,
    ) -> Result<Option<AudioSession>, AscError> {
        let row = sqlx::query(
            r"
            SELECT document
            FROM audio_sessions
            WHERE group_id = $1 AND status <> 'ended'
            ORDER BY created_at DESC
            LIMIT 1
            ",
        )
        .bind(group_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(decode).transpose()
    }

    #[instrument(skip_all, name = "asc.store.find_by_id", fields(session_id = %session_id))]
    async fn find_by_id(&self, session_id: SessionId) -> Result<Option<AudioSession>, AscError> {
        let row = sqlx::query("SELECT document FROM audio_sessions WHERE id = $1")
            .bind(session_id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(decode).transpose()
    }

    #[instrument(skip_all, name = "asc.store.insert_active", fields(session_id = %session.id))]
    async fn insert_active(&self, session: &AudioSession) -> Result<(), AscError> {
        let result = sqlx::query(
            r"
            INSERT INTO audio_sessions (id, group_id, status, document, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ",
        )
        .bind(session.id.0) // $1
        .bind(session.group_id.0) // $2
        .bind(session.status.as_str()) // $3
        .bind(Json(session)) // $4
        .bind(session.created_at) // $5
        .bind(session.updated_at) // $6
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => {
                warn!(
                    target: "asc.store",
                    group_id = %session.group_id,
                    "Rejected second live session for group"
                );
                Err(AscError::Conflict(format!(
                    "group {} already has a live session",
                    session.group_id
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip_all, name = "asc.store.save", fields(session_id = %session.id))]
    async fn save(&self, session: &AudioSession) -> Result<(), AscError> {
        let result = sqlx::query(
            r"
            UPDATE audio_sessions
            SET status = $2, document = $3, updated_at = $4
            WHERE id = $1
            ",
        )
        .bind(session.id.0)
        .bind(session.status.as_str())
        .bind(Json(session))
        .bind(session.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AscError::Conflict(format!(
                    "group {} already has a live session",
                    session.group_id
                ))
            } else {
                e.into()
            }
        })?;

        if result.rows_affected() == 0 {
            return Err(AscError::SessionNotFound(session.id.to_string()));
        }
        Ok(())
    }

    #[instrument(skip_all, name = "asc.store.delete", fields(session_id = %session_id))]
    async fn delete(&self, session_id: SessionId) -> Result<(), AscError> {
        sqlx::query("DELETE FROM audio_sessions WHERE id = $1")
            .bind(session_id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
