//! Test helper modules for jukebox-player integration tests
//!
//! - FakeResolver: scripted resolver writing small files into a temp folder
//! - RecordingReporter: status reporter that keeps every status line
//! - wait_until: poll a condition with a deadline

#![allow(dead_code)]

pub mod fake_resolver;
pub mod reporter;

pub use fake_resolver::FakeResolver;
pub use reporter::RecordingReporter;

use std::time::Duration;

/// Poll `condition` every few milliseconds until it holds
///
/// Panics with `what` if it does not hold within `limit`.
pub async fn wait_until<F>(limit: Duration, what: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for: {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Titles of a list of handles, in order
pub fn titles(handles: &[jukebox_player::ArtifactHandle]) -> Vec<String> {
    handles.iter().map(|h| h.title()).collect()
}
