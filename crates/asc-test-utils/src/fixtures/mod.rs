//! Test fixtures for ASC testing.
//!
//! [`TestHarness`] wires a full [`AudioSessionService`] over the in-memory
//! engine, store and group directory, with one group ready to use.
//!
//! ```rust,ignore
//! let harness = TestHarness::new().await;
//! let alice = harness.member();
//! let view = harness.create_session(alice, SessionType::VoiceOnly).await.unwrap();
//! ```

use crate::{MemorySessionStore, MockEngine, MockGroupDirectory};
use asc_service::engine::{RtpCapabilities, WebRtcTransportOptions, WorkerSettings};
use asc_service::errors::AscError;
use asc_service::models::{NewTrack, SessionType, SessionView};
use asc_service::rooms::RoomRegistry;
use asc_service::service::AudioSessionService;
use asc_service::sessions::{CreateSessionOptions, SessionContext};
use asc_service::workers::WorkerPool;
use common::types::{GroupId, UserId};
use std::sync::Arc;

/// Default pool size for harnesses.
pub const TEST_WORKER_COUNT: usize = 2;

/// Worker settings used by every harness.
#[must_use]
pub fn test_worker_settings() -> WorkerSettings {
    WorkerSettings {
        log_level: "warn".to_string(),
        rtc_min_port: 40000,
        rtc_max_port: 40100,
    }
}

/// Capabilities of a well-behaved client.
#[must_use]
pub fn client_capabilities() -> RtpCapabilities {
    RtpCapabilities::opus()
}

/// A playlist entry with only a title.
#[must_use]
pub fn new_track(title: &str) -> NewTrack {
    NewTrack {
        title: title.to_string(),
        artist: None,
        duration: 200.0,
        source_url: format!("https://media.test/{title}.mp3"),
    }
}

/// Builder for [`TestHarness`].
pub struct TestHarnessBuilder {
    worker_count: usize,
    engine: MockEngine,
    store: MemorySessionStore,
    groups: MockGroupDirectory,
    group_id: GroupId,
}

impl Default for TestHarnessBuilder {
    fn default() -> Self {
        Self {
            worker_count: TEST_WORKER_COUNT,
            engine: MockEngine::new(),
            store: MemorySessionStore::new(),
            groups: MockGroupDirectory::new(),
            group_id: GroupId::new(),
        }
    }
}

impl TestHarnessBuilder {
    #[must_use]
    pub fn worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    #[must_use]
    pub fn engine(mut self, engine: MockEngine) -> Self {
        self.engine = engine;
        self
    }

    #[must_use]
    pub fn store(mut self, store: MemorySessionStore) -> Self {
        self.store = store;
        self
    }

    #[must_use]
    pub fn groups(mut self, groups: MockGroupDirectory) -> Self {
        self.groups = groups;
        self
    }

    #[must_use]
    pub fn group_id(mut self, group_id: GroupId) -> Self {
        self.group_id = group_id;
        self
    }

    /// Create the worker pool and service.
    ///
    /// # Panics
    ///
    /// Panics if the worker pool cannot be created.
    pub async fn build(self) -> TestHarness {
        let pool = WorkerPool::create(&self.engine, self.worker_count, &test_worker_settings())
            .await
            .expect("worker pool should start");
        let pool = Arc::new(pool);
        let rooms = Arc::new(RoomRegistry::new());
        let service = Arc::new(AudioSessionService::new(SessionContext {
            pool: Arc::clone(&pool),
            rooms: Arc::clone(&rooms),
            store: Arc::new(self.store.clone()),
            groups: Arc::new(self.groups.clone()),
            transport_options: WebRtcTransportOptions::default(),
        }));

        TestHarness {
            engine: self.engine,
            store: self.store,
            groups: self.groups,
            group_id: self.group_id,
            worker_count: self.worker_count,
            pool,
            rooms,
            service,
        }
    }
}

/// A service wired to in-memory collaborators.
pub struct TestHarness {
    pub engine: MockEngine,
    pub store: MemorySessionStore,
    pub groups: MockGroupDirectory,
    /// Group every helper operates on.
    pub group_id: GroupId,
    pub pool: Arc<WorkerPool>,
    pub rooms: Arc<RoomRegistry>,
    pub service: Arc<AudioSessionService>,
    worker_count: usize,
}

impl TestHarness {
    pub async fn new() -> Self {
        Self::builder().build().await
    }

    #[must_use]
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::default()
    }

    /// A fresh user who is a member of the harness group.
    #[must_use]
    pub fn member(&self) -> UserId {
        let user_id = UserId::new();
        self.groups.add_member(self.group_id, user_id);
        user_id
    }

    /// A fresh user who is an admin of the harness group.
    #[must_use]
    pub fn admin(&self) -> UserId {
        let user_id = UserId::new();
        self.groups.add_admin(self.group_id, user_id);
        user_id
    }

    /// Create a session for the harness group with default options.
    ///
    /// # Errors
    ///
    /// Whatever the orchestrator returns.
    pub async fn create_session(
        &self,
        creator: UserId,
        session_type: SessionType,
    ) -> Result<SessionView, AscError> {
        self.service
            .sessions
            .create_session(
                self.group_id,
                creator,
                session_type,
                CreateSessionOptions::default(),
            )
            .await
    }

    /// Simulate a process restart: same engine, store and directory; new
    /// worker pool, room registry and service.
    pub async fn restart(&self) -> TestHarness {
        TestHarnessBuilder {
            worker_count: self.worker_count,
            engine: self.engine.clone(),
            store: self.store.clone(),
            groups: self.groups.clone(),
            group_id: self.group_id,
        }
        .build()
        .await
    }
}
