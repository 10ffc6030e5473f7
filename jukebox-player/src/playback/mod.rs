//! Playback transport abstraction and the single-flight playback sink

pub mod sink;
pub mod timed;

pub use sink::PlaybackSink;
pub use timed::TimedTransport;

use crate::error::Result;
use crate::media::ArtifactHandle;
use async_trait::async_trait;
use std::fmt;

/// Channel a transport can bind to (voice channel, output device, ...)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelTarget(pub String);

impl ChannelTarget {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl fmt::Display for ChannelTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Called exactly once per `start_playback`, possibly from a foreign thread
///
/// `Err` carries the transport's description of a playback failure.
pub type CompletionCallback = Box<dyn FnOnce(std::result::Result<(), String>) + Send + 'static>;

/// Transport trait - the audio output a session plays through
///
/// Implementations own the actual decoding and delivery of audio. Completion
/// is reported through the callback handed to `start_playback`; disconnecting
/// or stopping must still fire it.
#[async_trait]
pub trait PlaybackTransport: Send + Sync {
    /// Bind to `target`
    async fn connect(&self, target: &ChannelTarget) -> Result<()>;

    /// Unbind, stopping any playback
    async fn disconnect(&self);

    /// Start playing `handle`; `on_complete` fires when it ends
    fn start_playback(&self, handle: &ArtifactHandle, on_complete: CompletionCallback) -> Result<()>;

    fn pause(&self);

    fn resume(&self);

    /// End the current track early (fires its completion)
    fn stop(&self);

    fn is_playing(&self) -> bool;

    fn is_paused(&self) -> bool;
}
