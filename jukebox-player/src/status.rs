//! Status reporting
//!
//! A session keeps one "status" line per session visible to users (the
//! "Now playing ..." message). Replacing it removes the previous one; failing
//! to remove a status that no longer exists is not an error.

use async_trait::async_trait;
use jukebox_common::SessionId;
use std::collections::HashMap;
use std::io::Write;
use std::sync::Mutex;
use tracing::{debug, info};

/// StatusReporter trait - publishes the latest status of a session
#[async_trait]
pub trait StatusReporter: Send + Sync {
    /// Replace any prior status of `session` with `text`
    async fn replace_status(&self, session: SessionId, text: &str);
}

/// Reporter that writes status lines to stdout
///
/// Remembers the last status per session so a repeated status is not printed
/// twice.
#[derive(Default)]
pub struct ConsoleStatusReporter {
    last: Mutex<HashMap<SessionId, String>>,
}

impl ConsoleStatusReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last status published for `session`
    pub fn current(&self, session: SessionId) -> Option<String> {
        self.last
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&session)
            .cloned()
    }
}

#[async_trait]
impl StatusReporter for ConsoleStatusReporter {
    async fn replace_status(&self, session: SessionId, text: &str) {
        let previous = self
            .last
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(session, text.to_string());

        if previous.as_deref() == Some(text) {
            debug!(%session, text, "Status unchanged");
            return;
        }

        info!(%session, text, "Status");
        let mut stdout = std::io::stdout().lock();
        // A closed stdout only loses the status line
        let _ = writeln!(stdout, "[{}] {}", session, text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_status_replaced_per_session() {
        let reporter = ConsoleStatusReporter::new();
        reporter.replace_status(SessionId(1), "Collecting info...").await;
        reporter.replace_status(SessionId(1), "Now playing a...").await;
        reporter.replace_status(SessionId(2), "Now playing b...").await;

        assert_eq!(reporter.current(SessionId(1)).as_deref(), Some("Now playing a..."));
        assert_eq!(reporter.current(SessionId(2)).as_deref(), Some("Now playing b..."));
        assert_eq!(reporter.current(SessionId(3)), None);
    }
}
