//! Callback surface for session consumers
//!
//! The engine reports everything through an `EventSink`: state transitions,
//! transcript updates (partial and finalized), the inbound audio level, error
//! messages, and the end-of-session recording artifact. All methods default
//! to no-ops so consumers implement only what they need.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::session::state::SessionState;

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "model",
        }
    }
}

/// One transcript notification.
///
/// Partial updates (`partial == true`) carry the full accumulated text of a
/// still-open turn under a stable `turn_id`, so consumers can update an
/// existing entry in place rather than appending duplicates. Finalized
/// updates (`partial == false`) additionally carry the path of the turn's
/// encoded audio when one was produced.
#[derive(Debug, Clone)]
pub struct TranscriptUpdate {
    pub turn_id: Uuid,
    pub role: Role,
    pub text: String,
    pub partial: bool,
    pub audio: Option<PathBuf>,
}

/// Consumer callbacks invoked by the session engine.
///
/// Callbacks are invoked from the engine's actor task; implementations should
/// return quickly and must not block.
pub trait EventSink: Send + Sync + 'static {
    /// The session moved to a new lifecycle state.
    fn on_state_change(&self, _state: SessionState) {}

    /// A transcript entry was created or updated.
    fn on_transcript(&self, _update: &TranscriptUpdate) {}

    /// Periodic inbound loudness in `0.0..=1.0`, decaying toward zero when
    /// nothing is playing.
    fn on_audio_level(&self, _level: f32) {}

    /// A human-readable failure description.
    fn on_error(&self, _message: &str) {}

    /// The session ended and the full-session recording (if any) was
    /// finalized. Fired exactly once per session.
    fn on_session_ended(&self, _recording: Option<&Path>) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NopSink;
    impl EventSink for NopSink {}

    #[test]
    fn default_sink_methods_are_noops() {
        let sink = NopSink;
        sink.on_state_change(SessionState::Disconnected);
        sink.on_audio_level(0.5);
        sink.on_error("nothing listens");
        sink.on_session_ended(None);
    }

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), "\"user\"");
        assert_eq!(serde_json::to_string(&Role::Model).unwrap(), "\"model\"");
    }
}
