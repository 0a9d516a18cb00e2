//! In-memory media engine for ASC testing.
//!
//! Implements the engine traits without any media processing:
//! - Handles get sequential ids (`router-1`, `transport-2`, ...)
//! - Every open handle is tracked so tests can assert cleanup
//! - Worker and router creation can be made to fail
//! - Workers can be killed to exercise death handling
//! - Router and transport creation, and transport close, can be held open
//!   to interleave other operations
//!
//! # Example
//!
//! ```rust,ignore
//! use asc_test_utils::MockEngine;
//!
//! let engine = MockEngine::new();
//! engine.fail_router_creation(true);
//!
//! // ... create a session, it falls back to peer-to-peer ...
//!
//! assert_eq!(engine.open_handle_count(), 0);
//! ```

use asc_service::engine::{
    EngineError, MediaConsumer, MediaEngine, MediaKind, MediaProducer, MediaRouter,
    MediaTransport, MediaWorker, RtpCapabilities, WebRtcTransportOptions, WorkerDeath, WorkerId,
    WorkerSettings,
};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{watch, Notify, Semaphore};

/// Kinds of handles the mock tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HandleKind {
    Router,
    Transport,
    Producer,
    Consumer,
}

#[derive(Default)]
struct EngineState {
    next_id: AtomicU64,
    fail_workers: AtomicBool,
    fail_routers: AtomicBool,
    open: Mutex<BTreeSet<(HandleKind, String)>>,
    /// Worker each router was created on, in creation order.
    router_workers: Mutex<Vec<WorkerId>>,
    deaths: Mutex<HashMap<WorkerId, watch::Sender<bool>>>,
    router_gate: Mutex<Option<CallGate>>,
    transport_gate: Mutex<Option<CallGate>>,
    close_gate: Mutex<Option<CallGate>>,
}

impl EngineState {
    fn next(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn open(&self, kind: HandleKind, id: &str) {
        self.open.lock().unwrap().insert((kind, id.to_string()));
    }

    fn close(&self, kind: HandleKind, id: &str) {
        self.open.lock().unwrap().remove(&(kind, id.to_string()));
    }

    fn is_open(&self, kind: HandleKind, id: &str) -> bool {
        self.open.lock().unwrap().contains(&(kind, id.to_string()))
    }
}

/// Holds engine calls until released.
///
/// While installed, every gated call signals [`CallGate::entered`] and then
/// waits for a permit.
#[derive(Clone)]
pub struct CallGate {
    entered: Arc<Notify>,
    permits: Arc<Semaphore>,
}

impl CallGate {
    fn new() -> Self {
        Self {
            entered: Arc::new(Notify::new()),
            permits: Arc::new(Semaphore::new(0)),
        }
    }

    /// Wait until a gated call is in flight.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Let one held call complete.
    pub fn release_one(&self) {
        self.permits.add_permits(1);
    }

    async fn pass(&self) {
        self.entered.notify_one();
        self.permits.acquire().await.unwrap().forget();
    }
}

/// In-memory media engine.
#[derive(Clone, Default)]
pub struct MockEngine {
    state: Arc<EngineState>,
}

impl MockEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `create_worker` call fail.
    pub fn fail_worker_creation(&self, fail: bool) {
        self.state.fail_workers.store(fail, Ordering::SeqCst);
    }

    /// Make every following `create_router` call fail.
    pub fn fail_router_creation(&self, fail: bool) {
        self.state.fail_routers.store(fail, Ordering::SeqCst);
    }

    /// Hold router creation until the returned gate releases it.
    #[must_use]
    pub fn hold_routers(&self) -> CallGate {
        let gate = CallGate::new();
        *self.state.router_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Hold transport creation until the returned gate releases it.
    #[must_use]
    pub fn hold_transports(&self) -> CallGate {
        let gate = CallGate::new();
        *self.state.transport_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Hold transport close calls until the returned gate releases them.
    #[must_use]
    pub fn hold_transport_closes(&self) -> CallGate {
        let gate = CallGate::new();
        *self.state.close_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Simulate the worker process exiting.
    pub fn kill_worker(&self, worker_id: WorkerId) {
        if let Some(sender) = self.state.deaths.lock().unwrap().get(&worker_id) {
            sender.send_replace(true);
        }
    }

    /// Workers routers were created on, in creation order.
    #[must_use]
    pub fn router_assignments(&self) -> Vec<WorkerId> {
        self.state.router_workers.lock().unwrap().clone()
    }

    /// Number of open handles of one kind.
    #[must_use]
    pub fn open_count(&self, kind: HandleKind) -> usize {
        self.state
            .open
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| *k == kind)
            .count()
    }

    /// Number of open handles of every kind.
    #[must_use]
    pub fn open_handle_count(&self) -> usize {
        self.state.open.lock().unwrap().len()
    }

    /// Whether a specific handle is still open.
    #[must_use]
    pub fn is_open(&self, kind: HandleKind, id: &str) -> bool {
        self.state.is_open(kind, id)
    }
}

#[async_trait]
impl MediaEngine for MockEngine {
    async fn create_worker(
        &self,
        _settings: &WorkerSettings,
    ) -> Result<Arc<dyn MediaWorker>, EngineError> {
        if self.state.fail_workers.load(Ordering::SeqCst) {
            return Err(EngineError::Request("worker spawn failed".to_string()));
        }
        let id = u32::try_from(self.state.next()).unwrap();
        let (tx, rx) = watch::channel(false);
        self.state.deaths.lock().unwrap().insert(id, tx);
        Ok(Arc::new(MockWorker {
            id,
            state: Arc::clone(&self.state),
            death: rx,
        }))
    }
}

struct MockWorker {
    id: WorkerId,
    state: Arc<EngineState>,
    death: watch::Receiver<bool>,
}

#[async_trait]
impl MediaWorker for MockWorker {
    fn id(&self) -> WorkerId {
        self.id
    }

    async fn create_router(
        &self,
        media_codecs: &RtpCapabilities,
    ) -> Result<Arc<dyn MediaRouter>, EngineError> {
        let gate = self.state.router_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.pass().await;
        }
        if self.state.fail_routers.load(Ordering::SeqCst) {
            return Err(EngineError::Rejected {
                operation: "create_router".to_string(),
                message: "router limit reached".to_string(),
            });
        }
        let id = format!("router-{}", self.state.next());
        self.state.open(HandleKind::Router, &id);
        self.state.router_workers.lock().unwrap().push(self.id);
        Ok(Arc::new(MockRouter {
            id,
            capabilities: media_codecs.clone(),
            state: Arc::clone(&self.state),
        }))
    }

    async fn died(&self) -> WorkerDeath {
        let mut death = self.death.clone();
        // A dropped sender means the engine is gone; the worker is still
        // considered alive in that case.
        if death.wait_for(|dead| *dead).await.is_err() {
            std::future::pending::<()>().await;
        }
        WorkerDeath {
            worker_id: self.id,
            reason: "killed".to_string(),
        }
    }
}

struct MockRouter {
    id: String,
    capabilities: RtpCapabilities,
    state: Arc<EngineState>,
}

#[async_trait]
impl MediaRouter for MockRouter {
    fn id(&self) -> &str {
        &self.id
    }

    fn rtp_capabilities(&self) -> RtpCapabilities {
        self.capabilities.clone()
    }

    async fn create_webrtc_transport(
        &self,
        _options: &WebRtcTransportOptions,
    ) -> Result<Arc<dyn MediaTransport>, EngineError> {
        let gate = self.state.transport_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.pass().await;
        }
        let id = format!("transport-{}", self.state.next());
        self.state.open(HandleKind::Transport, &id);
        Ok(Arc::new(MockTransport {
            id,
            state: Arc::clone(&self.state),
        }))
    }

    async fn can_consume(
        &self,
        producer_id: &str,
        rtp_capabilities: &RtpCapabilities,
    ) -> Result<bool, EngineError> {
        Ok(self.state.is_open(HandleKind::Producer, producer_id)
            && rtp_capabilities.supports("audio/opus"))
    }

    async fn close(&self) {
        self.state.close(HandleKind::Router, &self.id);
    }
}

struct MockTransport {
    id: String,
    state: Arc<EngineState>,
}

#[async_trait]
impl MediaTransport for MockTransport {
    fn id(&self) -> &str {
        &self.id
    }

    fn ice_parameters(&self) -> serde_json::Value {
        serde_json::json!({ "usernameFragment": format!("ufrag-{}", self.id), "password": "pw" })
    }

    fn ice_candidates(&self) -> serde_json::Value {
        serde_json::json!([{ "ip": "127.0.0.1", "port": 40000, "protocol": "udp" }])
    }

    fn dtls_parameters(&self) -> serde_json::Value {
        serde_json::json!({ "role": "auto", "fingerprints": [] })
    }

    async fn connect(&self, _dtls_parameters: serde_json::Value) -> Result<(), EngineError> {
        if self.state.is_open(HandleKind::Transport, &self.id) {
            Ok(())
        } else {
            Err(EngineError::Rejected {
                operation: "connect".to_string(),
                message: format!("transport {} is closed", self.id),
            })
        }
    }

    async fn produce(
        &self,
        kind: MediaKind,
        _rtp_parameters: serde_json::Value,
    ) -> Result<Arc<dyn MediaProducer>, EngineError> {
        let id = format!("producer-{}", self.state.next());
        self.state.open(HandleKind::Producer, &id);
        Ok(Arc::new(MockProducer {
            id,
            kind,
            state: Arc::clone(&self.state),
        }))
    }

    async fn consume(
        &self,
        producer_id: &str,
        _rtp_capabilities: &RtpCapabilities,
    ) -> Result<Arc<dyn MediaConsumer>, EngineError> {
        if !self.state.is_open(HandleKind::Producer, producer_id) {
            return Err(EngineError::Rejected {
                operation: "consume".to_string(),
                message: format!("producer {producer_id} not found"),
            });
        }
        let id = format!("consumer-{}", self.state.next());
        self.state.open(HandleKind::Consumer, &id);
        Ok(Arc::new(MockConsumer {
            id,
            producer_id: producer_id.to_string(),
            state: Arc::clone(&self.state),
        }))
    }

    async fn close(&self) {
        let gate = self.state.close_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.pass().await;
        }
        self.state.close(HandleKind::Transport, &self.id);
    }
}

struct MockProducer {
    id: String,
    kind: MediaKind,
    state: Arc<EngineState>,
}

#[async_trait]
impl MediaProducer for MockProducer {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    async fn close(&self) {
        self.state.close(HandleKind::Producer, &self.id);
    }
}

struct MockConsumer {
    id: String,
    producer_id: String,
    state: Arc<EngineState>,
}

#[async_trait]
impl MediaConsumer for MockConsumer {
    fn id(&self) -> &str {
        &self.id
    }

    fn producer_id(&self) -> &str {
        &self.producer_id
    }

    fn kind(&self) -> MediaKind {
        MediaKind::Audio
    }

    fn rtp_parameters(&self) -> serde_json::Value {
        serde_json::json!({ "codecs": [{ "mimeType": "audio/opus", "clockRate": 48000 }] })
    }

    async fn resume(&self) -> Result<(), EngineError> {
        Ok(())
    }

    async fn close(&self) {
        self.state.close(HandleKind::Consumer, &self.id);
    }
}
