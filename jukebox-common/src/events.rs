//! Event types for the jukebox event system

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one playback session (one guild/room/console)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for SessionId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Player session state
///
/// `Idle → Connecting → Playing ⇄ Paused → Idle`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No channel bound, no playback loop running
    Idle,
    /// Binding the playback sink to the requester's channel
    Connecting,
    /// Bound and running the playback loop
    Playing,
    /// Bound, current track paused
    Paused,
}

impl SessionState {
    /// True while a playback sink is bound
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Playing | SessionState::Paused)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Playing => "playing",
            SessionState::Paused => "paused",
        };
        f.write_str(name)
    }
}

/// Player event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PlayerEvent {
    /// Session state changed
    StateChanged {
        session_id: SessionId,
        state: SessionState,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Track started playing
    TrackStarted {
        session_id: SessionId,
        title: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Track finished
    ///
    /// `completed` is false when playback failed or the completion signal was lost.
    TrackFinished {
        session_id: SessionId,
        title: String,
        completed: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Queue cleared
    QueueCleared {
        session_id: SessionId,
        /// Ready tracks whose references were released
        released: usize,
        /// Requests dropped before resolution
        dropped: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl PlayerEvent {
    /// Session the event belongs to
    pub fn session_id(&self) -> SessionId {
        match self {
            PlayerEvent::StateChanged { session_id, .. }
            | PlayerEvent::TrackStarted { session_id, .. }
            | PlayerEvent::TrackFinished { session_id, .. }
            | PlayerEvent::QueueCleared { session_id, .. } => *session_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = PlayerEvent::StateChanged {
            session_id: SessionId(42),
            state: SessionState::Paused,
            timestamp: chrono::Utc::now(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "StateChanged");
        assert_eq!(json["session_id"], 42);
        assert_eq!(json["state"], "paused");
    }

    #[test]
    fn test_active_states() {
        assert!(!SessionState::Idle.is_active());
        assert!(!SessionState::Connecting.is_active());
        assert!(SessionState::Playing.is_active());
        assert!(SessionState::Paused.is_active());
    }
}
