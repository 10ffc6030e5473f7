//! Error types for jukebox-player
//!
//! Defines module-specific error types using thiserror for clear error propagation.
//! None of these errors is fatal to the process: resolution failures are skipped,
//! the rest are reported back to the caller as user-visible messages.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for jukebox-player
#[derive(Error, Debug)]
pub enum Error {
    /// Resolver failed to materialize one request
    #[error("Resolution failed for {identity}: {reason}")]
    ResolutionFailed { identity: String, reason: String },

    /// Playback sink operation attempted while unbound
    #[error("Not connected to a channel")]
    NotConnected,

    /// front() or play() on an empty ready queue
    #[error("Track queue is empty")]
    EmptyQueue,

    /// Reaper could not delete a materialized file
    #[error("Failed to delete {path:?}: {reason}")]
    DeletionFailed { path: PathBuf, reason: String },

    /// Enqueue rejected while the queue is being cleared
    #[error("Track queue is being cleared")]
    Draining,

    /// Playback transport errors
    #[error("Transport error: {0}")]
    Transport(String),

    /// Completion signal dropped without firing
    #[error("Playback interrupted: {0}")]
    PlaybackInterrupted(String),
}

/// Convenience Result type using jukebox-player Error
pub type Result<T> = std::result::Result<T, Error>;
