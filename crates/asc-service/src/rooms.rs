//! In-memory rooms.
//!
//! A [`Room`] holds the live media handles of one session: its router (none
//! in peer-to-peer mode) and every transport, producer and consumer. It is
//! the source of truth for handles; the session document only mirrors them.
//!
//! Each room sits behind its own `tokio::sync::Mutex`, so operations on one
//! session are linearized while different sessions never contend. The
//! [`RoomRegistry`] map lock is only held long enough to look a room up.
//!
//! # Membership fencing
//!
//! Engine calls run with the room lock released. To keep a handle created
//! for a participant from outliving that participant's `leave`, every admit
//! hands out a fresh generation number; after the engine call the caller
//! re-locks and checks [`Room::is_current`] before inserting.

use crate::engine::{
    MediaConsumer, MediaKind, MediaProducer, MediaRouter, MediaTransport, TransportDirection,
    WorkerId,
};
use crate::events::{SessionEvent, EVENT_CHANNEL_CAPACITY};
use crate::observability::metrics;
use common::types::{SessionId, UserId};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::debug;

pub struct TransportEntry {
    pub handle: Arc<dyn MediaTransport>,
    pub user_id: UserId,
    pub direction: TransportDirection,
}

pub struct ProducerEntry {
    pub handle: Arc<dyn MediaProducer>,
    pub user_id: UserId,
    pub transport_id: String,
}

pub struct ConsumerEntry {
    pub handle: Arc<dyn MediaConsumer>,
    pub user_id: UserId,
    pub producer_id: String,
    pub transport_id: String,
}

/// A producer other participants can consume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProducerInfo {
    pub producer_id: String,
    pub user_id: UserId,
    pub kind: MediaKind,
}

/// Handles removed from a room, waiting to be closed on the engine.
#[derive(Default)]
pub struct DetachedHandles {
    pub consumers: Vec<(String, Arc<dyn MediaConsumer>)>,
    pub producers: Vec<(String, Arc<dyn MediaProducer>)>,
    pub transports: Vec<(String, Arc<dyn MediaTransport>)>,
    pub router: Option<Arc<dyn MediaRouter>>,
}

impl DetachedHandles {
    pub fn consumer_ids(&self) -> Vec<String> {
        self.consumers.iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn producer_ids(&self) -> Vec<String> {
        self.producers.iter().map(|(id, _)| id.clone()).collect()
    }

    /// Close everything, dependants first.
    pub async fn close(self) {
        for (_, consumer) in self.consumers {
            consumer.close().await;
        }
        for (_, producer) in self.producers {
            producer.close().await;
        }
        for (_, transport) in self.transports {
            transport.close().await;
        }
        if let Some(router) = self.router {
            router.close().await;
        }
    }
}

/// Live media state of one session.
pub struct Room {
    session_id: SessionId,
    router: Option<Arc<dyn MediaRouter>>,
    worker_id: Option<WorkerId>,
    transports: HashMap<String, TransportEntry>,
    producers: HashMap<String, ProducerEntry>,
    consumers: HashMap<String, ConsumerEntry>,
    members: HashMap<UserId, u64>,
    next_generation: u64,
    closed: bool,
    events: broadcast::Sender<SessionEvent>,
}

impl Room {
    /// Create a room. `router` is `None` for peer-to-peer sessions.
    #[must_use]
    pub fn new(
        session_id: SessionId,
        router: Option<Arc<dyn MediaRouter>>,
        worker_id: Option<WorkerId>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            session_id,
            router,
            worker_id,
            transports: HashMap::new(),
            producers: HashMap::new(),
            consumers: HashMap::new(),
            members: HashMap::new(),
            next_generation: 0,
            closed: false,
            events,
        }
    }

    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    #[must_use]
    pub fn router(&self) -> Option<&Arc<dyn MediaRouter>> {
        self.router.as_ref()
    }

    #[must_use]
    pub fn worker_id(&self) -> Option<WorkerId> {
        self.worker_id
    }

    /// Whether the session has ended and the room been torn down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Admit a participant, returning their new membership generation.
    pub fn admit(&mut self, user_id: UserId) -> u64 {
        self.next_generation += 1;
        self.members.insert(user_id, self.next_generation);
        self.next_generation
    }

    /// Remove a participant's membership, fencing in-flight creations.
    pub fn evict(&mut self, user_id: UserId) {
        self.members.remove(&user_id);
    }

    #[must_use]
    pub fn generation(&self, user_id: UserId) -> Option<u64> {
        self.members.get(&user_id).copied()
    }

    /// Whether `generation` is still the user's live membership.
    #[must_use]
    pub fn is_current(&self, user_id: UserId, generation: u64) -> bool {
        !self.closed && self.members.get(&user_id) == Some(&generation)
    }

    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn insert_transport(&mut self, entry: TransportEntry) {
        self.transports
            .insert(entry.handle.id().to_string(), entry);
    }

    pub fn insert_producer(&mut self, entry: ProducerEntry) {
        self.producers.insert(entry.handle.id().to_string(), entry);
    }

    pub fn insert_consumer(&mut self, entry: ConsumerEntry) {
        self.consumers.insert(entry.handle.id().to_string(), entry);
    }

    #[must_use]
    pub fn transport(&self, transport_id: &str) -> Option<&TransportEntry> {
        self.transports.get(transport_id)
    }

    #[must_use]
    pub fn producer(&self, producer_id: &str) -> Option<&ProducerEntry> {
        self.producers.get(producer_id)
    }

    #[must_use]
    pub fn consumer(&self, consumer_id: &str) -> Option<&ConsumerEntry> {
        self.consumers.get(consumer_id)
    }

    /// Number of live transports, producers and consumers.
    #[must_use]
    pub fn handle_count(&self) -> usize {
        self.transports.len() + self.producers.len() + self.consumers.len()
    }

    /// Live producers, sorted by id for stable output.
    #[must_use]
    pub fn producer_infos(&self) -> Vec<ProducerInfo> {
        let mut infos: Vec<ProducerInfo> = self
            .producers
            .iter()
            .map(|(id, entry)| ProducerInfo {
                producer_id: id.clone(),
                user_id: entry.user_id,
                kind: entry.handle.kind(),
            })
            .collect();
        infos.sort_by(|a, b| a.producer_id.cmp(&b.producer_id));
        infos
    }

    /// Remove every handle owned by `user_id`, plus every consumer (of any
    /// user) attached to one of the user's producers.
    pub fn detach_user(&mut self, user_id: UserId) -> DetachedHandles {
        let producer_ids: Vec<String> = self
            .producers
            .iter()
            .filter(|(_, p)| p.user_id == user_id)
            .map(|(id, _)| id.clone())
            .collect();

        let consumer_ids: Vec<String> = self
            .consumers
            .iter()
            .filter(|(_, c)| c.user_id == user_id || producer_ids.contains(&c.producer_id))
            .map(|(id, _)| id.clone())
            .collect();

        let transport_ids: Vec<String> = self
            .transports
            .iter()
            .filter(|(_, t)| t.user_id == user_id)
            .map(|(id, _)| id.clone())
            .collect();

        let mut detached = DetachedHandles::default();
        for id in consumer_ids {
            if let Some(entry) = self.consumers.remove(&id) {
                detached.consumers.push((id, entry.handle));
            }
        }
        for id in producer_ids {
            if let Some(entry) = self.producers.remove(&id) {
                detached.producers.push((id, entry.handle));
            }
        }
        for id in transport_ids {
            if let Some(entry) = self.transports.remove(&id) {
                detached.transports.push((id, entry.handle));
            }
        }

        debug!(
            target: "asc.rooms",
            session_id = %self.session_id,
            user_id = %user_id,
            consumers = detached.consumers.len(),
            producers = detached.producers.len(),
            transports = detached.transports.len(),
            "Detached participant handles"
        );
        detached
    }

    /// Remove every handle and the router and mark the room closed.
    pub fn detach_all(&mut self) -> DetachedHandles {
        self.closed = true;
        self.members.clear();
        DetachedHandles {
            consumers: self
                .consumers
                .drain()
                .map(|(id, e)| (id, e.handle))
                .collect(),
            producers: self
                .producers
                .drain()
                .map(|(id, e)| (id, e.handle))
                .collect(),
            transports: self
                .transports
                .drain()
                .map(|(id, e)| (id, e.handle))
                .collect(),
            router: self.router.take(),
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}

/// Process-wide map of live rooms.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: RwLock<HashMap<SessionId, Arc<Mutex<Room>>>>,
}

impl RoomRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, session_id: SessionId) -> Option<Arc<Mutex<Room>>> {
        self.rooms.read().await.get(&session_id).cloned()
    }

    /// Register `room` unless one already exists for the session.
    ///
    /// Returns the registered room and whether `room` was the one inserted.
    pub async fn insert_if_absent(&self, room: Room) -> (Arc<Mutex<Room>>, bool) {
        let mut rooms = self.rooms.write().await;
        let session_id = room.session_id();
        if let Some(existing) = rooms.get(&session_id) {
            return (Arc::clone(existing), false);
        }
        let room = Arc::new(Mutex::new(room));
        rooms.insert(session_id, Arc::clone(&room));
        metrics::set_sessions_active(rooms.len());
        (room, true)
    }

    pub async fn remove(&self, session_id: SessionId) -> Option<Arc<Mutex<Room>>> {
        let mut rooms = self.rooms.write().await;
        let removed = rooms.remove(&session_id);
        metrics::set_sessions_active(rooms.len());
        removed
    }

    pub async fn len(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rooms.read().await.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::engine::{EngineError, RtpCapabilities};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Closed(AtomicUsize);

    struct FakeTransport(String, Arc<Closed>);
    struct FakeProducer(String, Arc<Closed>);
    struct FakeConsumer(String, String, Arc<Closed>);

    #[async_trait]
    impl MediaTransport for FakeTransport {
        fn id(&self) -> &str {
            &self.0
        }
        fn ice_parameters(&self) -> serde_json::Value {
            serde_json::Value::Null
        }
        fn ice_candidates(&self) -> serde_json::Value {
            serde_json::Value::Null
        }
        fn dtls_parameters(&self) -> serde_json::Value {
            serde_json::Value::Null
        }
        async fn connect(&self, _dtls: serde_json::Value) -> Result<(), EngineError> {
            Ok(())
        }
        async fn produce(
            &self,
            _kind: MediaKind,
            _rtp: serde_json::Value,
        ) -> Result<Arc<dyn MediaProducer>, EngineError> {
            Err(EngineError::Request("unused".into()))
        }
        async fn consume(
            &self,
            _producer_id: &str,
            _caps: &RtpCapabilities,
        ) -> Result<Arc<dyn MediaConsumer>, EngineError> {
            Err(EngineError::Request("unused".into()))
        }
        async fn close(&self) {
            self.1 .0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl MediaProducer for FakeProducer {
        fn id(&self) -> &str {
            &self.0
        }
        fn kind(&self) -> MediaKind {
            MediaKind::Audio
        }
        async fn close(&self) {
            self.1 .0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl MediaConsumer for FakeConsumer {
        fn id(&self) -> &str {
            &self.0
        }
        fn producer_id(&self) -> &str {
            &self.1
        }
        fn kind(&self) -> MediaKind {
            MediaKind::Audio
        }
        fn rtp_parameters(&self) -> serde_json::Value {
            serde_json::Value::Null
        }
        async fn resume(&self) -> Result<(), EngineError> {
            Ok(())
        }
        async fn close(&self) {
            self.2 .0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn populated_room(alice: UserId, bob: UserId, closed: &Arc<Closed>) -> Room {
        let mut room = Room::new(SessionId::new(), None, None);
        for (user, t, dir) in [
            (alice, "t-alice-send", TransportDirection::Send),
            (bob, "t-bob-send", TransportDirection::Send),
            (bob, "t-bob-recv", TransportDirection::Receive),
        ] {
            room.insert_transport(TransportEntry {
                handle: Arc::new(FakeTransport(t.into(), Arc::clone(closed))),
                user_id: user,
                direction: dir,
            });
        }
        room.insert_producer(ProducerEntry {
            handle: Arc::new(FakeProducer("p-alice".into(), Arc::clone(closed))),
            user_id: alice,
            transport_id: "t-alice-send".into(),
        });
        room.insert_producer(ProducerEntry {
            handle: Arc::new(FakeProducer("p-bob".into(), Arc::clone(closed))),
            user_id: bob,
            transport_id: "t-bob-send".into(),
        });
        // Bob listens to Alice.
        room.insert_consumer(ConsumerEntry {
            handle: Arc::new(FakeConsumer(
                "c-bob-alice".into(),
                "p-alice".into(),
                Arc::clone(closed),
            )),
            user_id: bob,
            producer_id: "p-alice".into(),
            transport_id: "t-bob-recv".into(),
        });
        room
    }

    #[tokio::test]
    async fn test_detach_user_takes_consumers_of_their_producers() {
        let (alice, bob) = (UserId::new(), UserId::new());
        let closed = Arc::new(Closed::default());
        let mut room = populated_room(alice, bob, &closed);

        let detached = room.detach_user(alice);

        assert_eq!(detached.consumer_ids(), vec!["c-bob-alice".to_string()]);
        assert_eq!(detached.producer_ids(), vec!["p-alice".to_string()]);
        assert_eq!(detached.transports.len(), 1);
        assert!(room.consumer("c-bob-alice").is_none());
        assert!(room.producer("p-bob").is_some());
        assert_eq!(room.handle_count(), 3);

        detached.close().await;
        assert_eq!(closed.0.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_membership_generations_fence_stale_callers() {
        let mut room = Room::new(SessionId::new(), None, None);
        let user = UserId::new();

        let first = room.admit(user);
        assert!(room.is_current(user, first));

        room.evict(user);
        assert!(!room.is_current(user, first));

        let second = room.admit(user);
        assert_ne!(first, second);
        assert!(!room.is_current(user, first));
        assert!(room.is_current(user, second));
    }

    #[test]
    fn test_detach_all_closes_room() {
        let (alice, bob) = (UserId::new(), UserId::new());
        let closed = Arc::new(Closed::default());
        let mut room = populated_room(alice, bob, &closed);
        let generation = room.admit(alice);

        let detached = room.detach_all();

        assert!(room.is_closed());
        assert_eq!(room.handle_count(), 0);
        assert!(!room.is_current(alice, generation));
        assert_eq!(
            detached.consumers.len() + detached.producers.len() + detached.transports.len(),
            6
        );
    }

    #[tokio::test]
    async fn test_registry_insert_if_absent() {
        let registry = RoomRegistry::new();
        let session_id = SessionId::new();

        let (_, inserted) = registry
            .insert_if_absent(Room::new(session_id, None, None))
            .await;
        assert!(inserted);

        let (_, inserted) = registry
            .insert_if_absent(Room::new(session_id, None, None))
            .await;
        assert!(!inserted);
        assert_eq!(registry.len().await, 1);

        assert!(registry.remove(session_id).await.is_some());
        assert!(registry.get(session_id).await.is_none());
    }

    #[tokio::test]
    async fn test_subscribe_receives_published_events() {
        let registry = RoomRegistry::new();
        let session_id = SessionId::new();
        let (room, _) = registry
            .insert_if_absent(Room::new(session_id, None, None))
            .await;

        let mut rx = room.lock().await.subscribe();
        room.lock()
            .await
            .publish(SessionEvent::SessionEnded { session_id });

        assert_eq!(
            rx.recv().await.unwrap(),
            SessionEvent::SessionEnded { session_id }
        );
    }
}
