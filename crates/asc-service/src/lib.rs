//! Audio Session Controller (ASC) Service Library
//!
//! This library provides the core of Huddle's group voice sessions:
//!
//! - One live audio session per group, routed through a media worker pool
//! - Participant join/leave with WebRTC transport, producer and consumer
//!   negotiation against an external media engine
//! - Shared music playback synchronized across participants
//! - Peer-to-peer fallback when no router can be created
//!
//! # Architecture
//!
//! ```text
//! AudioSessionService
//! ├── SessionOrchestrator (lifecycle, one live session per group)
//! │   ├── WorkerPool (round-robin media workers)
//! │   ├── RoomRegistry (in-memory rooms: live engine handles)
//! │   ├── SessionStore (durable JSON session documents)
//! │   └── GroupDirectory (membership and admin checks)
//! ├── ParticipantManager (join, leave, media negotiation)
//! └── PlaybackSynchronizer (playlist and playback state)
//! ```
//!
//! # Key Design Decisions
//!
//! - **Durable document, volatile handles**: the store holds what survives
//!   a restart; engine handles live only in the room and are rebuilt
//!   lazily after a restart
//! - **Per-session lock**: every durable update for a session happens
//!   while its room lock is held; engine calls run outside it and are
//!   fenced by membership generations
//! - **Fail fast**: a dead media worker takes the process down
//!
//! # Modules
//!
//! - [`config`] - Service configuration from environment
//! - [`engine`] - Media engine abstraction and HTTP sidecar client
//! - [`errors`] - Error types with status and numeric codes
//! - [`sessions`] - Session orchestrator
//! - [`participants`] - Participant lifecycle
//! - [`playback`] - Playback state machine and synchronizer

pub mod config;
pub mod engine;
pub mod errors;
pub mod events;
pub mod groups;
pub mod handlers;
pub mod models;
pub mod observability;
pub mod participants;
pub mod playback;
pub mod rooms;
pub mod routes;
pub mod service;
pub mod sessions;
pub mod store;
pub mod workers;
