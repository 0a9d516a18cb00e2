//! Audio session service facade.
//!
//! Wires the orchestrator, participant manager and playback synchronizer
//! over one shared [`SessionContext`]. The HTTP layer and the binary only
//! talk to this type.

use crate::participants::ParticipantManager;
use crate::playback::PlaybackSynchronizer;
use crate::sessions::{SessionContext, SessionOrchestrator};
use std::sync::Arc;

/// The audio session controller.
pub struct AudioSessionService {
    pub sessions: Arc<SessionOrchestrator>,
    pub participants: ParticipantManager,
    pub playback: PlaybackSynchronizer,
}

impl AudioSessionService {
    #[must_use]
    pub fn new(ctx: SessionContext) -> Self {
        let sessions = Arc::new(SessionOrchestrator::new(Arc::new(ctx)));
        Self {
            participants: ParticipantManager::new(Arc::clone(&sessions)),
            playback: PlaybackSynchronizer::new(Arc::clone(&sessions)),
            sessions,
        }
    }
}
