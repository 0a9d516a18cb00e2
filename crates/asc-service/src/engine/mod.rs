//! Media engine contract.
//!
//! The engine that actually relays audio packets runs outside this service.
//! This module describes the lifecycle surface the controller drives:
//!
//! ```text
//! MediaEngine
//! └── MediaWorker        (one process, reports its own death)
//!     └── MediaRouter    (one per session)
//!         └── MediaTransport   (ICE/DTLS path, send or receive)
//!             ├── MediaProducer  (outbound audio, on send transports)
//!             └── MediaConsumer  (inbound copy of a producer, on receive transports)
//! ```
//!
//! ICE, DTLS and RTP parameter blobs are opaque to the controller and pass
//! through as JSON values.
//!
//! - [`http`] - adapter for a sidecar engine reachable over HTTP

pub mod http;

pub use http::HttpMediaEngine;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Engine-assigned worker identity (the worker process id).
pub type WorkerId = u32;

/// Error reported by the media engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine could not be reached.
    #[error("engine request failed: {0}")]
    Request(String),

    /// The engine rejected the call.
    #[error("engine rejected {operation}: {message}")]
    Rejected { operation: String, message: String },
}

/// Direction of a transport, from the participant's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportDirection {
    Send,
    Receive,
}

impl TransportDirection {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TransportDirection::Send => "send",
            TransportDirection::Receive => "receive",
        }
    }
}

/// Media kind of a producer/consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Audio,
    Video,
}

/// One codec the router or a client can handle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCodecCapability {
    pub kind: MediaKind,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_payload_type: Option<u8>,
    pub clock_rate: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u8>,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

/// Codec capability description exchanged with clients.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCapabilities {
    pub codecs: Vec<RtpCodecCapability>,
    #[serde(default)]
    pub header_extensions: Vec<serde_json::Value>,
}

impl RtpCapabilities {
    /// The only codec set routers are created with: Opus, 48 kHz, stereo.
    #[must_use]
    pub fn opus() -> Self {
        Self {
            codecs: vec![RtpCodecCapability {
                kind: MediaKind::Audio,
                mime_type: "audio/opus".to_string(),
                preferred_payload_type: None,
                clock_rate: 48_000,
                channels: Some(2),
                parameters: serde_json::json!({ "useinbandfec": 1 }),
            }],
            header_extensions: Vec::new(),
        }
    }

    /// Whether any codec matches `mime_type` (case-insensitive).
    #[must_use]
    pub fn supports(&self, mime_type: &str) -> bool {
        self.codecs
            .iter()
            .any(|c| c.mime_type.eq_ignore_ascii_case(mime_type))
    }
}

/// Settings used when spawning a worker.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerSettings {
    pub log_level: String,
    pub rtc_min_port: u16,
    pub rtc_max_port: u16,
}

/// Options for a WebRTC transport.
#[derive(Debug, Clone, Serialize)]
pub struct WebRtcTransportOptions {
    pub listen_ip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub announced_address: Option<String>,
    pub enable_udp: bool,
    pub enable_tcp: bool,
    pub prefer_udp: bool,
    pub initial_available_outgoing_bitrate: u32,
}

impl Default for WebRtcTransportOptions {
    fn default() -> Self {
        Self {
            listen_ip: "0.0.0.0".to_string(),
            announced_address: None,
            enable_udp: true,
            enable_tcp: true,
            prefer_udp: true,
            initial_available_outgoing_bitrate: 600_000,
        }
    }
}

/// Why a worker stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerDeath {
    pub worker_id: WorkerId,
    pub reason: String,
}

/// Spawns workers.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    async fn create_worker(
        &self,
        settings: &WorkerSettings,
    ) -> Result<Arc<dyn MediaWorker>, EngineError>;
}

/// One media-processing process.
#[async_trait]
pub trait MediaWorker: Send + Sync {
    fn id(&self) -> WorkerId;

    async fn create_router(
        &self,
        media_codecs: &RtpCapabilities,
    ) -> Result<Arc<dyn MediaRouter>, EngineError>;

    /// Resolves once the worker has died.
    async fn died(&self) -> WorkerDeath;
}

/// Per-session router.
#[async_trait]
pub trait MediaRouter: Send + Sync {
    fn id(&self) -> &str;

    fn rtp_capabilities(&self) -> RtpCapabilities;

    async fn create_webrtc_transport(
        &self,
        options: &WebRtcTransportOptions,
    ) -> Result<Arc<dyn MediaTransport>, EngineError>;

    async fn can_consume(
        &self,
        producer_id: &str,
        rtp_capabilities: &RtpCapabilities,
    ) -> Result<bool, EngineError>;

    async fn close(&self);
}

/// A negotiated network path between a participant and the engine.
#[async_trait]
pub trait MediaTransport: Send + Sync {
    fn id(&self) -> &str;
    fn ice_parameters(&self) -> serde_json::Value;
    fn ice_candidates(&self) -> serde_json::Value;
    fn dtls_parameters(&self) -> serde_json::Value;

    async fn connect(&self, dtls_parameters: serde_json::Value) -> Result<(), EngineError>;

    async fn produce(
        &self,
        kind: MediaKind,
        rtp_parameters: serde_json::Value,
    ) -> Result<Arc<dyn MediaProducer>, EngineError>;

    async fn consume(
        &self,
        producer_id: &str,
        rtp_capabilities: &RtpCapabilities,
    ) -> Result<Arc<dyn MediaConsumer>, EngineError>;

    async fn close(&self);
}

/// A participant's outbound audio stream.
#[async_trait]
pub trait MediaProducer: Send + Sync {
    fn id(&self) -> &str;
    fn kind(&self) -> MediaKind;
    async fn close(&self);
}

/// A participant's inbound copy of another participant's producer.
#[async_trait]
pub trait MediaConsumer: Send + Sync {
    fn id(&self) -> &str;
    fn producer_id(&self) -> &str;
    fn kind(&self) -> MediaKind;
    fn rtp_parameters(&self) -> serde_json::Value;
    async fn resume(&self) -> Result<(), EngineError>;
    async fn close(&self);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_opus_capabilities() {
        let caps = RtpCapabilities::opus();
        assert!(caps.supports("audio/opus"));
        assert!(caps.supports("AUDIO/OPUS"));
        assert!(!caps.supports("video/VP8"));
    }

    #[test]
    fn test_capabilities_wire_format_is_camel_case() {
        let json = serde_json::to_value(RtpCapabilities::opus()).unwrap();
        assert_eq!(json["codecs"][0]["mimeType"], "audio/opus");
        assert_eq!(json["codecs"][0]["clockRate"], 48_000);

        let parsed: RtpCapabilities = serde_json::from_value(serde_json::json!({
            "codecs": [{ "kind": "audio", "mimeType": "audio/opus", "clockRate": 48000 }]
        }))
        .unwrap();
        assert!(parsed.supports("audio/opus"));
        assert!(parsed.header_extensions.is_empty());
    }
}
