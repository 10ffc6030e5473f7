//! Playback sink
//!
//! Wraps exactly one transport binding and serializes playback through it.
//!
//! **Completion bridge:** the transport reports the end of a track from its own
//! execution context (often a foreign OS thread). `play` creates a oneshot
//! channel per call; the transport callback only sends on it, and the session
//! task awaits the receiver. The busy lock keeps at most one such signal
//! outstanding.
//!
//! **Queries when unbound:** `is_playing` and `is_paused` return `false` while
//! no binding exists; pause/resume/stop report `false` (nothing done).

use super::{ChannelTarget, PlaybackTransport};
use crate::error::{Error, Result};
use crate::media::ArtifactHandle;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, warn};

/// Single-flight wrapper around one playback transport binding
pub struct PlaybackSink {
    transport: Arc<dyn PlaybackTransport>,
    /// Current binding; `None` while disconnected
    binding: Mutex<Option<ChannelTarget>>,
    /// Held for the whole duration of a `play` call
    busy: Mutex<()>,
}

impl PlaybackSink {
    pub fn new(transport: Arc<dyn PlaybackTransport>) -> Self {
        Self {
            transport,
            binding: Mutex::new(None),
            busy: Mutex::new(()),
        }
    }

    /// Bind to `target`, dropping any existing binding first
    pub async fn connect(&self, target: ChannelTarget) -> Result<()> {
        let mut binding = self.binding.lock().await;
        if let Some(previous) = binding.take() {
            debug!(channel = %previous, "Dropping previous binding");
            self.transport.disconnect().await;
        }

        self.transport.connect(&target).await?;
        info!(channel = %target, "Playback sink connected");
        *binding = Some(target);
        Ok(())
    }

    /// Unbind; returns false if there was no binding
    pub async fn disconnect(&self) -> bool {
        let mut binding = self.binding.lock().await;
        match binding.take() {
            Some(target) => {
                self.transport.disconnect().await;
                info!(channel = %target, "Playback sink disconnected");
                true
            }
            None => false,
        }
    }

    /// Play `handle` and wait for its completion signal
    pub async fn play(&self, handle: &ArtifactHandle) -> Result<()> {
        let _busy = self.busy.lock().await;

        let done = {
            let binding = self.binding.lock().await;
            if binding.is_none() {
                return Err(Error::NotConnected);
            }

            let (tx, rx) = oneshot::channel();
            self.transport.start_playback(
                handle,
                Box::new(move |outcome| {
                    // Receiver gone means the waiting task was cancelled
                    let _ = tx.send(outcome);
                }),
            )?;
            rx
        };

        match done.await {
            Ok(Ok(())) => {
                debug!(path = %handle, "Playback complete");
                Ok(())
            }
            Ok(Err(reason)) => {
                warn!(path = %handle, reason = %reason, "Playback failed");
                Err(Error::Transport(reason))
            }
            Err(_) => Err(Error::PlaybackInterrupted(format!(
                "completion signal for {} dropped",
                handle
            ))),
        }
    }

    /// Pause the current track; false if nothing is playing
    pub async fn pause(&self) -> bool {
        let binding = self.binding.lock().await;
        if binding.is_none() || !self.transport.is_playing() {
            return false;
        }
        self.transport.pause();
        true
    }

    /// Resume a paused track; false if nothing is paused
    pub async fn resume(&self) -> bool {
        let binding = self.binding.lock().await;
        if binding.is_none() || !self.transport.is_paused() {
            return false;
        }
        self.transport.resume();
        true
    }

    /// Stop the current track (playing or paused); false if there is none
    pub async fn stop(&self) -> bool {
        let binding = self.binding.lock().await;
        if binding.is_none() || !(self.transport.is_playing() || self.transport.is_paused()) {
            return false;
        }
        self.transport.stop();
        true
    }

    pub async fn is_playing(&self) -> bool {
        self.binding.lock().await.is_some() && self.transport.is_playing()
    }

    pub async fn is_paused(&self) -> bool {
        self.binding.lock().await.is_some() && self.transport.is_paused()
    }

    pub async fn is_connected(&self) -> bool {
        self.binding.lock().await.is_some()
    }

    /// Channel currently bound, if any
    pub async fn target(&self) -> Option<ChannelTarget> {
        self.binding.lock().await.clone()
    }
}
