//! HTTP adapter for a sidecar media engine.
//!
//! The sidecar owns the real worker processes; this adapter maps every
//! lifecycle call onto one JSON request:
//!
//! | Call                    | Request                                     |
//! |-------------------------|---------------------------------------------|
//! | create worker           | `POST /workers`                             |
//! | worker liveness         | `GET /workers/{pid}`                        |
//! | create router           | `POST /workers/{pid}/routers`               |
//! | create transport        | `POST /routers/{id}/webrtc-transports`      |
//! | can consume             | `POST /routers/{id}/can-consume`            |
//! | connect transport       | `POST /transports/{id}/connect`             |
//! | produce / consume       | `POST /transports/{id}/producers\|consumers` |
//! | resume consumer         | `POST /consumers/{id}/resume`               |
//! | close anything          | `DELETE /{routers\|transports\|producers\|consumers}/{id}` |
//!
//! Worker death is detected by polling liveness; a worker is declared dead
//! after [`DEATH_THRESHOLD`] consecutive failed polls.

use super::{
    EngineError, MediaConsumer, MediaEngine, MediaKind, MediaProducer, MediaRouter,
    MediaTransport, MediaWorker, RtpCapabilities, WebRtcTransportOptions, WorkerDeath, WorkerId,
    WorkerSettings,
};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Default timeout for engine requests in seconds.
const ENGINE_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Consecutive failed liveness polls before a worker is declared dead.
pub const DEATH_THRESHOLD: u32 = 3;

#[derive(Clone)]
struct EngineClient {
    client: Client,
    base_url: String,
}

impl EngineClient {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn post<B, R>(&self, operation: &str, path: &str, body: &B) -> Result<R, EngineError>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| EngineError::Request(format!("{operation}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(EngineError::Rejected {
                operation: operation.to_string(),
                message: format!("{status}: {message}"),
            });
        }

        response
            .json::<R>()
            .await
            .map_err(|e| EngineError::Request(format!("{operation}: invalid response: {e}")))
    }

    async fn post_empty<B>(&self, operation: &str, path: &str, body: &B) -> Result<(), EngineError>
    where
        B: Serialize + ?Sized + Sync,
    {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| EngineError::Request(format!("{operation}: {e}")))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(EngineError::Rejected {
                operation: operation.to_string(),
                message: status.to_string(),
            })
        }
    }

    /// Closing is best effort: the sidecar reclaims orphans when a router closes.
    async fn delete(&self, path: &str) {
        match self.client.delete(self.url(path)).send().await {
            Ok(response) if response.status().is_success() => {}
            Ok(response) if response.status() == StatusCode::NOT_FOUND => {}
            Ok(response) => {
                warn!(
                    target: "asc.engine.http",
                    path = %path,
                    status = %response.status(),
                    "Engine refused close"
                );
            }
            Err(e) => {
                warn!(target: "asc.engine.http", path = %path, error = %e, "Engine close failed");
            }
        }
    }
}

/// Media engine reached over HTTP.
#[derive(Clone)]
pub struct HttpMediaEngine {
    client: EngineClient,
    health_interval: Duration,
}

impl HttpMediaEngine {
    /// Create a new engine adapter.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Request` if the HTTP client cannot be built.
    pub fn new(base_url: String, health_interval: Duration) -> Result<Self, EngineError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(ENGINE_REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| EngineError::Request(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client: EngineClient { client, base_url },
            health_interval,
        })
    }
}

#[derive(Deserialize)]
struct CreatedWorker {
    worker_id: WorkerId,
}

#[derive(Deserialize)]
struct CreatedRouter {
    router_id: String,
    rtp_capabilities: RtpCapabilities,
}

#[derive(Deserialize)]
struct CreatedTransport {
    id: String,
    ice_parameters: serde_json::Value,
    ice_candidates: serde_json::Value,
    dtls_parameters: serde_json::Value,
}

#[derive(Deserialize)]
struct CreatedProducer {
    id: String,
    kind: MediaKind,
}

#[derive(Deserialize)]
struct CreatedConsumer {
    id: String,
    producer_id: String,
    kind: MediaKind,
    rtp_parameters: serde_json::Value,
}

#[derive(Deserialize)]
struct CanConsumeResponse {
    can_consume: bool,
}

#[async_trait]
impl MediaEngine for HttpMediaEngine {
    #[instrument(skip_all, name = "asc.engine.create_worker")]
    async fn create_worker(
        &self,
        settings: &WorkerSettings,
    ) -> Result<Arc<dyn MediaWorker>, EngineError> {
        let created: CreatedWorker = self
            .client
            .post("create_worker", "/workers", settings)
            .await?;

        debug!(target: "asc.engine.http", worker_id = created.worker_id, "Worker created");

        Ok(Arc::new(HttpWorker {
            client: self.client.clone(),
            id: created.worker_id,
            health_interval: self.health_interval,
        }))
    }
}

struct HttpWorker {
    client: EngineClient,
    id: WorkerId,
    health_interval: Duration,
}

#[async_trait]
impl MediaWorker for HttpWorker {
    fn id(&self) -> WorkerId {
        self.id
    }

    async fn create_router(
        &self,
        media_codecs: &RtpCapabilities,
    ) -> Result<Arc<dyn MediaRouter>, EngineError> {
        let created: CreatedRouter = self
            .client
            .post(
                "create_router",
                &format!("/workers/{}/routers", self.id),
                &serde_json::json!({ "media_codecs": media_codecs.codecs }),
            )
            .await?;

        Ok(Arc::new(HttpRouter {
            client: self.client.clone(),
            id: created.router_id,
            rtp_capabilities: created.rtp_capabilities,
        }))
    }

    async fn died(&self) -> WorkerDeath {
        let mut interval = tokio::time::interval(self.health_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut failures = 0u32;
        let path = format!("/workers/{}", self.id);

        loop {
            interval.tick().await;

            let outcome = match self.client.client.get(self.client.url(&path)).send().await {
                Ok(response) if response.status().is_success() => Ok(()),
                Ok(response) => Err(format!("liveness returned {}", response.status())),
                Err(e) => Err(format!("liveness poll failed: {e}")),
            };

            match outcome {
                Ok(()) => failures = 0,
                Err(reason) => {
                    failures += 1;
                    warn!(
                        target: "asc.engine.http",
                        worker_id = self.id,
                        failures,
                        reason = %reason,
                        "Worker liveness check failed"
                    );
                    if failures >= DEATH_THRESHOLD {
                        return WorkerDeath {
                            worker_id: self.id,
                            reason,
                        };
                    }
                }
            }
        }
    }
}

struct HttpRouter {
    client: EngineClient,
    id: String,
    rtp_capabilities: RtpCapabilities,
}

#[async_trait]
impl MediaRouter for HttpRouter {
    fn id(&self) -> &str {
        &self.id
    }

    fn rtp_capabilities(&self) -> RtpCapabilities {
        self.rtp_capabilities.clone()
    }

    async fn create_webrtc_transport(
        &self,
        options: &WebRtcTransportOptions,
    ) -> Result<Arc<dyn MediaTransport>, EngineError> {
        let created: CreatedTransport = self
            .client
            .post(
                "create_webrtc_transport",
                &format!("/routers/{}/webrtc-transports", self.id),
                options,
            )
            .await?;

        Ok(Arc::new(HttpTransport {
            client: self.client.clone(),
            id: created.id,
            ice_parameters: created.ice_parameters,
            ice_candidates: created.ice_candidates,
            dtls_parameters: created.dtls_parameters,
        }))
    }

    async fn can_consume(
        &self,
        producer_id: &str,
        rtp_capabilities: &RtpCapabilities,
    ) -> Result<bool, EngineError> {
        let response: CanConsumeResponse = self
            .client
            .post(
                "can_consume",
                &format!("/routers/{}/can-consume", self.id),
                &serde_json::json!({
                    "producer_id": producer_id,
                    "rtp_capabilities": rtp_capabilities,
                }),
            )
            .await?;
        Ok(response.can_consume)
    }

    async fn close(&self) {
        self.client.delete(&format!("/routers/{}", self.id)).await;
    }
}

struct HttpTransport {
    client: EngineClient,
    id: String,
    ice_parameters: serde_json::Value,
    ice_candidates: serde_json::Value,
    dtls_parameters: serde_json::Value,
}

#[async_trait]
impl MediaTransport for HttpTransport {
    fn id(&self) -> &str {
        &self.id
    }

    fn ice_parameters(&self) -> serde_json::Value {
        self.ice_parameters.clone()
    }

    fn ice_candidates(&self) -> serde_json::Value {
        self.ice_candidates.clone()
    }

    fn dtls_parameters(&self) -> serde_json::Value {
        self.dtls_parameters.clone()
    }

    async fn connect(&self, dtls_parameters: serde_json::Value) -> Result<(), EngineError> {
        self.client
            .post_empty(
                "connect_transport",
                &format!("/transports/{}/connect", self.id),
                &serde_json::json!({ "dtls_parameters": dtls_parameters }),
            )
            .await
    }

    async fn produce(
        &self,
        kind: MediaKind,
        rtp_parameters: serde_json::Value,
    ) -> Result<Arc<dyn MediaProducer>, EngineError> {
        let created: CreatedProducer = self
            .client
            .post(
                "produce",
                &format!("/transports/{}/producers", self.id),
                &serde_json::json!({ "kind": kind, "rtp_parameters": rtp_parameters }),
            )
            .await?;

        Ok(Arc::new(HttpProducer {
            client: self.client.clone(),
            id: created.id,
            kind: created.kind,
        }))
    }

    async fn consume(
        &self,
        producer_id: &str,
        rtp_capabilities: &RtpCapabilities,
    ) -> Result<Arc<dyn MediaConsumer>, EngineError> {
        let created: CreatedConsumer = self
            .client
            .post(
                "consume",
                &format!("/transports/{}/consumers", self.id),
                &serde_json::json!({
                    "producer_id": producer_id,
                    "rtp_capabilities": rtp_capabilities,
                }),
            )
            .await?;

        Ok(Arc::new(HttpConsumer {
            client: self.client.clone(),
            id: created.id,
            producer_id: created.producer_id,
            kind: created.kind,
            rtp_parameters: created.rtp_parameters,
        }))
    }

    async fn close(&self) {
        self.client.delete(&format!("/transports/{}", self.id)).await;
    }
}

struct HttpProducer {
    client: EngineClient,
    id: String,
    kind: MediaKind,
}

#[async_trait]
impl MediaProducer for HttpProducer {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    async fn close(&self) {
        self.client.delete(&format!("/producers/{}", self.id)).await;
    }
}

struct HttpConsumer {
    client: EngineClient,
    id: String,
    producer_id: String,
    kind: MediaKind,
    rtp_parameters: serde_json::Value,
}

#[async_trait]
impl MediaConsumer for HttpConsumer {
    fn id(&self) -> &str {
        &self.id
    }

    fn producer_id(&self) -> &str {
        &self.producer_id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn rtp_parameters(&self) -> serde_json::Value {
        self.rtp_parameters.clone()
    }

    async fn resume(&self) -> Result<(), EngineError> {
        self.client
            .post_empty(
                "resume_consumer",
                &format!("/consumers/{}/resume", self.id),
                &serde_json::json!({}),
            )
            .await
    }

    async fn close(&self) {
        self.client.delete(&format!("/consumers/{}", self.id)).await;
    }
}
