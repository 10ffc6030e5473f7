//! Headless transport that "plays" each track for a fixed length of time
//!
//! Every track runs on its own OS thread, which waits on a condition variable
//! for the track length (minus paused time) and then invokes the completion
//! callback from that thread. Used by the console front end and by tests.

use super::{ChannelTarget, CompletionCallback, PlaybackTransport};
use crate::error::{Error, Result};
use crate::media::ArtifactHandle;
use async_trait::async_trait;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Decides how long a track plays
pub type TrackLength = Arc<dyn Fn(&ArtifactHandle) -> Duration + Send + Sync>;

struct Track {
    id: u64,
    paused: bool,
}

#[derive(Default)]
struct ClockState {
    channel: Option<ChannelTarget>,
    track: Option<Track>,
    next_track_id: u64,
    /// Every handle ever started, in order
    history: Vec<ArtifactHandle>,
}

struct Clock {
    state: Mutex<ClockState>,
    changed: Condvar,
}

impl Clock {
    fn lock(&self) -> MutexGuard<'_, ClockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Transport with simulated, wall-clock playback
#[derive(Clone)]
pub struct TimedTransport {
    clock: Arc<Clock>,
    length: TrackLength,
}

impl TimedTransport {
    /// Every track plays for `length`
    pub fn new(length: Duration) -> Self {
        Self::with_lengths(Arc::new(move |_: &ArtifactHandle| length))
    }

    /// Track length decided per handle
    pub fn with_lengths(length: TrackLength) -> Self {
        Self {
            clock: Arc::new(Clock {
                state: Mutex::new(ClockState::default()),
                changed: Condvar::new(),
            }),
            length,
        }
    }

    /// Channel currently bound
    pub fn channel(&self) -> Option<ChannelTarget> {
        self.clock.lock().channel.clone()
    }

    /// Handles started so far, oldest first
    pub fn history(&self) -> Vec<ArtifactHandle> {
        self.clock.lock().history.clone()
    }

    fn end_track(&self) {
        let mut state = self.clock.lock();
        if state.track.take().is_some() {
            self.clock.changed.notify_all();
        }
    }
}

/// Body of one track's playback thread
fn run_track(clock: Arc<Clock>, track_id: u64, length: Duration, on_complete: CompletionCallback) {
    let mut remaining = length;
    let mut state = clock.lock();
    loop {
        let paused = match &state.track {
            Some(track) if track.id == track_id => track.paused,
            // Stopped or disconnected
            _ => break,
        };

        if paused {
            state = clock.changed.wait(state).unwrap_or_else(PoisonError::into_inner);
            continue;
        }
        if remaining.is_zero() {
            state.track = None;
            break;
        }

        let started = Instant::now();
        let (guard, _) = clock
            .changed
            .wait_timeout(state, remaining)
            .unwrap_or_else(PoisonError::into_inner);
        state = guard;
        remaining = remaining.saturating_sub(started.elapsed());
    }
    drop(state);

    trace!(track_id, "Track clock finished");
    on_complete(Ok(()));
}

#[async_trait]
impl PlaybackTransport for TimedTransport {
    async fn connect(&self, target: &ChannelTarget) -> Result<()> {
        let mut state = self.clock.lock();
        state.channel = Some(target.clone());
        debug!(channel = %target, "Timed transport connected");
        Ok(())
    }

    async fn disconnect(&self) {
        let mut state = self.clock.lock();
        state.channel = None;
        if state.track.take().is_some() {
            self.clock.changed.notify_all();
        }
        debug!("Timed transport disconnected");
    }

    fn start_playback(&self, handle: &ArtifactHandle, on_complete: CompletionCallback) -> Result<()> {
        let length = (self.length)(handle);
        let track_id = {
            let mut state = self.clock.lock();
            if state.channel.is_none() {
                return Err(Error::NotConnected);
            }
            if state.track.is_some() {
                return Err(Error::Transport("a track is already playing".to_string()));
            }
            let id = state.next_track_id;
            state.next_track_id += 1;
            state.track = Some(Track { id, paused: false });
            state.history.push(handle.clone());
            id
        };

        let clock = Arc::clone(&self.clock);
        std::thread::Builder::new()
            .name(format!("timed-track-{}", track_id))
            .spawn(move || run_track(clock, track_id, length, on_complete))
            .map_err(|e| {
                self.end_track();
                Error::Transport(format!("failed to start playback thread: {}", e))
            })?;

        debug!(path = %handle, ?length, "Timed playback started");
        Ok(())
    }

    fn pause(&self) {
        let mut state = self.clock.lock();
        if let Some(track) = state.track.as_mut() {
            track.paused = true;
            self.clock.changed.notify_all();
        }
    }

    fn resume(&self) {
        let mut state = self.clock.lock();
        if let Some(track) = state.track.as_mut() {
            track.paused = false;
            self.clock.changed.notify_all();
        }
    }

    fn stop(&self) {
        self.end_track();
    }

    fn is_playing(&self) -> bool {
        matches!(&self.clock.lock().track, Some(track) if !track.paused)
    }

    fn is_paused(&self) -> bool {
        matches!(&self.clock.lock().track, Some(track) if track.paused)
    }
}
