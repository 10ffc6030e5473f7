//! Player session: one playback loop per session
//!
//! Composes a [`TrackQueue`], a [`PlaybackSink`] and the shared recycler into
//! a playback loop with idle teardown.
//!
//! **State machine:** `Idle → Connecting → Playing ⇄ Paused → Idle`
//! - The first `play` while idle binds the sink to the requester's channel
//!   and spawns the loop.
//! - The loop waits for a ready track (bounded by the idle timeout), publishes
//!   a status line and plays it, then waits again.
//! - On idle timeout with nothing pending the sink is disconnected and the
//!   session returns to `Idle`. `leave` does the same on demand and also
//!   clears the queue.
//!
//! At most one loop runs per session. The lifecycle lock guards the decision
//! to start or retire a loop so a `play` racing an idle timeout either lands
//! in the running loop or starts a new one.

use crate::error::Result;
use crate::media::{ArtifactHandle, MediaRequest};
use crate::playback::{ChannelTarget, PlaybackSink, PlaybackTransport};
use crate::queue::{ClearOutcome, TrackQueue};
use crate::recycler::Recycler;
use crate::resolver::Resolver;
use crate::status::StatusReporter;
use jukebox_common::config::TomlConfig;
use jukebox_common::{PlayerEvent, SessionId, SessionState};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Per-session settings
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long the loop waits on an empty queue before leaving
    pub idle_timeout: Duration,
    /// Maximum concurrent resolver calls for the session's queue
    pub resolve_parallelism: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(300),
            resolve_parallelism: 1,
        }
    }
}

impl From<&TomlConfig> for SessionConfig {
    fn from(config: &TomlConfig) -> Self {
        Self {
            idle_timeout: config.idle_timeout(),
            resolve_parallelism: config.resolve_parallelism,
        }
    }
}

/// Outcome of [`PlayerSession::play`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayOutcome {
    /// Sink bound and playback loop started
    Started { enqueued: usize },
    /// Loop already running; requests appended
    Enqueued { enqueued: usize },
}

/// Outcome of [`PlayerSession::clear`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearReply {
    Emptied { released: usize, dropped: usize },
    AlreadyEmpty,
    AlreadyClearing,
}

/// Outcome of [`PlayerSession::leave`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveOutcome {
    Left,
    NotConnected,
}

/// Why a playback loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopExit {
    IdleTimeout,
    Stopped,
    Superseded,
}

struct ActiveLoop {
    id: u64,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Lifecycle {
    active: Option<ActiveLoop>,
    next_loop_id: u64,
}

/// Per-session orchestrator
pub struct PlayerSession {
    id: SessionId,
    config: SessionConfig,
    queue: TrackQueue,
    sink: PlaybackSink,
    reporter: Arc<dyn StatusReporter>,
    lifecycle: Mutex<Lifecycle>,
    state: watch::Sender<SessionState>,
    events: broadcast::Sender<PlayerEvent>,
}

impl PlayerSession {
    /// Create an idle session
    ///
    /// Must be called from within a Tokio runtime (the queue starts its
    /// dispatcher task immediately).
    pub fn new(
        id: SessionId,
        config: SessionConfig,
        recycler: Arc<Recycler>,
        resolver: Arc<dyn Resolver>,
        transport: Arc<dyn PlaybackTransport>,
        reporter: Arc<dyn StatusReporter>,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(SessionState::Idle);
        let (events, _) = broadcast::channel(100);
        Arc::new(Self {
            id,
            queue: TrackQueue::new(recycler, resolver, config.resolve_parallelism),
            sink: PlaybackSink::new(transport),
            config,
            reporter,
            lifecycle: Mutex::new(Lifecycle::default()),
            state,
            events,
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Subscribe to the session's event stream
    pub fn subscribe_events(&self) -> broadcast::Receiver<PlayerEvent> {
        self.events.subscribe()
    }

    pub fn queue(&self) -> &TrackQueue {
        &self.queue
    }

    pub fn sink(&self) -> &PlaybackSink {
        &self.sink
    }

    fn set_state(&self, state: SessionState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            debug!(session = %self.id, %state, "Session state changed");
            self.emit(PlayerEvent::StateChanged {
                session_id: self.id,
                state,
                timestamp: chrono::Utc::now(),
            });
        }
    }

    fn emit(&self, event: PlayerEvent) {
        // No receivers is OK
        let _ = self.events.send(event);
    }

    /// Replace the session's status line
    pub async fn report(&self, text: &str) {
        self.reporter.replace_status(self.id, text).await;
    }

    /// Enqueue `requests` and make sure a playback loop is running
    ///
    /// The first call on an idle session binds the sink to `target` and spawns
    /// the loop; later calls only enqueue.
    pub async fn play(
        self: &Arc<Self>,
        requests: Vec<MediaRequest>,
        target: ChannelTarget,
    ) -> Result<PlayOutcome> {
        let count = requests.len();
        self.queue.enqueue(requests).await?;
        if count > 1 {
            self.report(&format!("Enqueueing {} tracks...", count)).await;
        }

        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.active.is_some() {
            drop(lifecycle);
            if count == 1 {
                self.report("Enqueueing new track...").await;
            }
            return Ok(PlayOutcome::Enqueued { enqueued: count });
        }

        self.set_state(SessionState::Connecting);
        if let Err(e) = self.sink.connect(target).await {
            error!(session = %self.id, error = %e, "Failed to connect playback sink");
            self.set_state(SessionState::Idle);
            return Err(e);
        }
        self.set_state(SessionState::Playing);

        let id = lifecycle.next_loop_id;
        lifecycle.next_loop_id += 1;
        let (stop, stop_rx) = watch::channel(false);
        let session = Arc::clone(self);
        let task = tokio::spawn(async move {
            session.run_loop(id, stop_rx).await;
        });
        lifecycle.active = Some(ActiveLoop { id, stop, task });
        drop(lifecycle);

        Ok(PlayOutcome::Started { enqueued: count })
    }

    async fn run_loop(&self, loop_id: u64, mut stop: watch::Receiver<bool>) {
        info!(session = %self.id, loop_id, "Playback loop started");

        let exit = loop {
            let ready = tokio::select! {
                biased;
                _ = stop.changed() => break LoopExit::Stopped,
                waited = tokio::time::timeout(self.config.idle_timeout, self.queue.wait()) => waited.is_ok(),
            };

            if !ready {
                match self.retire(loop_id).await {
                    Some(exit) => break exit,
                    // Work still resolving: keep waiting
                    None => continue,
                }
            }
            if *stop.borrow() {
                break LoopExit::Stopped;
            }

            let next = match self.queue.front() {
                Ok(handle) => handle,
                Err(e) => {
                    warn!(session = %self.id, error = %e, "Ready queue emptied before playback");
                    continue;
                }
            };
            self.start_track(&next).await;

            match self.queue.play(&self.sink).await {
                Ok(handle) => self.finish_track(&handle, true),
                Err(e) => {
                    error!(session = %self.id, track = %next, error = %e, "Playback failed");
                    self.finish_track(&next, false);
                }
            }
            // A skipped paused track leaves the sink bound but idle
            if !*stop.borrow() && self.state().is_active() {
                self.set_state(SessionState::Playing);
            }
        };

        info!(session = %self.id, loop_id, ?exit, "Playback loop ended");
    }

    async fn start_track(&self, handle: &ArtifactHandle) {
        let title = handle.title();
        self.report(&format!("Now playing {}...", title)).await;
        self.set_state(SessionState::Playing);
        self.emit(PlayerEvent::TrackStarted {
            session_id: self.id,
            title,
            timestamp: chrono::Utc::now(),
        });
    }

    fn finish_track(&self, handle: &ArtifactHandle, completed: bool) {
        self.emit(PlayerEvent::TrackFinished {
            session_id: self.id,
            title: handle.title(),
            completed,
            timestamp: chrono::Utc::now(),
        });
    }

    /// Idle timeout: end the loop unless work arrived in the meantime
    ///
    /// Returns `None` when the loop should keep running.
    async fn retire(&self, loop_id: u64) -> Option<LoopExit> {
        let mut lifecycle = self.lifecycle.lock().await;
        match &lifecycle.active {
            Some(active) if active.id == loop_id => {}
            _ => return Some(LoopExit::Superseded),
        }
        if !self.queue.is_idle() {
            return None;
        }

        lifecycle.active = None;
        info!(session = %self.id, timeout = ?self.config.idle_timeout, "Idle timeout, leaving channel");
        self.sink.disconnect().await;
        self.set_state(SessionState::Idle);
        Some(LoopExit::IdleTimeout)
    }

    /// Clear the queue, stop the loop and disconnect the sink
    ///
    /// Returns once the loop has exited and released the interrupted track.
    pub async fn leave(&self) -> LeaveOutcome {
        let mut lifecycle = self.lifecycle.lock().await;
        let active = lifecycle.active.take();
        if active.is_none() && !self.sink.is_connected().await {
            return LeaveOutcome::NotConnected;
        }

        let task = active.map(|active| {
            active.stop.send_replace(true);
            active.task
        });
        self.clear_queue().await;
        self.sink.disconnect().await;
        self.set_state(SessionState::Idle);
        // The loop may be waiting on the lifecycle lock in retire
        drop(lifecycle);

        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(session = %self.id, error = %e, "Playback loop panicked");
            }
        }
        info!(session = %self.id, "Left channel");
        LeaveOutcome::Left
    }

    /// Empty the queue (the current track keeps playing)
    pub async fn clear(&self) -> ClearReply {
        if self.queue.is_draining() {
            return ClearReply::AlreadyClearing;
        }
        if self.queue.is_idle() {
            return ClearReply::AlreadyEmpty;
        }
        match self.clear_queue().await {
            ClearOutcome::Cleared { released, dropped } => ClearReply::Emptied { released, dropped },
            ClearOutcome::AlreadyDraining => ClearReply::AlreadyClearing,
        }
    }

    async fn clear_queue(&self) -> ClearOutcome {
        let outcome = self.queue.clear().await;
        if let ClearOutcome::Cleared { released, dropped } = outcome {
            self.emit(PlayerEvent::QueueCleared {
                session_id: self.id,
                released,
                dropped,
                timestamp: chrono::Utc::now(),
            });
        }
        outcome
    }

    /// Pause the current track; false if nothing is playing
    pub async fn pause(&self) -> bool {
        let paused = self.sink.pause().await;
        if paused {
            self.set_state(SessionState::Paused);
        }
        paused
    }

    /// Resume the paused track; false if nothing is paused
    pub async fn resume(&self) -> bool {
        let resumed = self.sink.resume().await;
        if resumed {
            self.set_state(SessionState::Playing);
        }
        resumed
    }

    /// Skip the current track; false if nothing is playing or paused
    pub async fn skip(&self) -> bool {
        self.sink.stop().await
    }

    /// Up to `limit` queued titles plus the total ready count
    pub fn tracklist(&self, limit: usize) -> (Vec<String>, usize) {
        let titles = self
            .queue
            .peek(limit)
            .iter()
            .map(ArtifactHandle::title)
            .collect();
        (titles, self.queue.len())
    }
}
