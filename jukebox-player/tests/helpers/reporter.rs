//! Status reporter that records every status line

use async_trait::async_trait;
use jukebox_common::SessionId;
use jukebox_player::StatusReporter;
use std::sync::Mutex;

#[derive(Default)]
pub struct RecordingReporter {
    statuses: Mutex<Vec<(SessionId, String)>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every status published for `session`, oldest first
    pub fn statuses(&self, session: SessionId) -> Vec<String> {
        self.statuses
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == session)
            .map(|(_, text)| text.clone())
            .collect()
    }

    pub fn contains(&self, session: SessionId, text: &str) -> bool {
        self.statuses(session).iter().any(|s| s == text)
    }
}

#[async_trait]
impl StatusReporter for RecordingReporter {
    async fn replace_status(&self, session: SessionId, text: &str) {
        self.statuses.lock().unwrap().push((session, text.to_string()));
    }
}
