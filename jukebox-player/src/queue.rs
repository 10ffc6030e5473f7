//! Track queue: requests in, ready artifacts out
//!
//! Producer/consumer pipeline between slow resolution and playback.
//! `enqueue` appends a batch of requests to the pending work; a dispatcher task
//! starts one resolution per request (at most `parallelism` at once) and each
//! resolved handle is appended to the ready queue as soon as its own resolver
//! call completes. The session loop consumes the ready queue with
//! `wait` / `front` / `play`.
//!
//! **Ordering:** the ready queue is in resolution-completion order. With
//! `parallelism == 1` this is strict submission order; with more, a slow
//! request is overtaken by faster ones submitted after it.
//!
//! **Lock order:** enqueue-lock → track-queue-lock → recycler-lock. Every
//! operation touching more than one of these takes them in that order. The
//! track-queue lock is a `std::sync::Mutex` and is never held across `.await`.
//!
//! **Cancellation:** `clear` bumps the queue epoch. Requests still pending are
//! dropped before reaching the resolver; resolutions already running finish,
//! see the stale epoch and release their handle instead of queueing it. `clear`
//! returns only once those stragglers have settled, so no reference taken for
//! the cleared work outlives the call.

use crate::error::{Error, Result};
use crate::media::{ArtifactHandle, MediaRequest};
use crate::playback::PlaybackSink;
use crate::recycler::Recycler;
use crate::resolver::{ResolveError, Resolver};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Outcome of [`TrackQueue::clear`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearOutcome {
    /// Queue emptied
    Cleared {
        /// Ready handles whose references were released
        released: usize,
        /// Pending requests dropped before resolution
        dropped: usize,
    },
    /// Another clear was already in progress; nothing done
    AlreadyDraining,
}

/// One `enqueue` call awaiting resolution
struct PendingBatch {
    id: u64,
    requests: VecDeque<MediaRequest>,
}

#[derive(Default)]
struct QueueState {
    /// Batches awaiting resolution (PendingWork)
    pending: VecDeque<PendingBatch>,
    /// Resolved handles in completion order (ReadyQueue)
    ready: VecDeque<ArtifactHandle>,
    /// Bumped by every clear; resolutions from older epochs are discarded
    epoch: u64,
    /// Resolutions started and not yet settled
    in_flight: usize,
    next_batch_id: u64,
}

struct Shared {
    recycler: Arc<Recycler>,
    resolver: Arc<dyn Resolver>,
    /// Serializes enqueue against clear
    enqueue_lock: tokio::sync::Mutex<()>,
    tracks: Mutex<QueueState>,
    draining: AtomicBool,
    /// Pending work was added
    work_available: Notify,
    /// A handle was appended to the ready queue
    track_available: Notify,
    /// `in_flight` dropped to zero
    settled: Notify,
    permits: Arc<Semaphore>,
}

/// Producer/consumer queue of ready tracks for one session
pub struct TrackQueue {
    shared: Arc<Shared>,
    dispatcher: JoinHandle<()>,
}

impl TrackQueue {
    /// Create a queue and start its dispatcher task
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(recycler: Arc<Recycler>, resolver: Arc<dyn Resolver>, parallelism: usize) -> Self {
        let shared = Arc::new(Shared {
            recycler,
            resolver,
            enqueue_lock: tokio::sync::Mutex::new(()),
            tracks: Mutex::new(QueueState::default()),
            draining: AtomicBool::new(false),
            work_available: Notify::new(),
            track_available: Notify::new(),
            settled: Notify::new(),
            permits: Arc::new(Semaphore::new(parallelism.max(1))),
        });

        let dispatcher = tokio::spawn(dispatch(Arc::clone(&shared)));
        Self { shared, dispatcher }
    }

    /// Schedule resolution of `requests`, in order
    ///
    /// Rejected with [`Error::Draining`] while a clear is in progress. Returns
    /// the number of requests accepted.
    pub async fn enqueue(&self, requests: Vec<MediaRequest>) -> Result<usize> {
        if self.shared.draining.load(Ordering::Acquire) {
            return Err(Error::Draining);
        }

        let _enqueue = self.shared.enqueue_lock.lock().await;
        if self.shared.draining.load(Ordering::Acquire) {
            return Err(Error::Draining);
        }
        if requests.is_empty() {
            return Ok(0);
        }

        let count = requests.len();
        {
            let mut state = self.shared.lock();
            let id = state.next_batch_id;
            state.next_batch_id += 1;
            state.pending.push_back(PendingBatch {
                id,
                requests: requests.into(),
            });
            debug!(batch = id, count, "Enqueued batch");
        }
        self.shared.work_available.notify_one();
        Ok(count)
    }

    /// Wait until the ready queue is non-empty
    ///
    /// Returns immediately if it already is.
    pub async fn wait(&self) {
        loop {
            let notified = self.shared.track_available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if !self.shared.lock().ready.is_empty() {
                return;
            }
            notified.await;
        }
    }

    /// Head of the ready queue, without removing it
    pub fn front(&self) -> Result<ArtifactHandle> {
        self.shared.lock().ready.front().cloned().ok_or(Error::EmptyQueue)
    }

    /// Pop the head of the ready queue and play it on `sink`
    ///
    /// The handle's reference is released once playback completes or fails.
    /// Returns the handle that was played.
    pub async fn play(&self, sink: &PlaybackSink) -> Result<ArtifactHandle> {
        let handle = self.shared.lock().ready.pop_front().ok_or(Error::EmptyQueue)?;
        let checkout = Checkout {
            shared: &self.shared,
            handle: handle.clone(),
        };

        let outcome = sink.play(&handle).await;
        drop(checkout);
        outcome.map(|()| handle)
    }

    /// Up to `limit` ready handles in queue order
    pub fn peek(&self, limit: usize) -> Vec<ArtifactHandle> {
        self.shared.lock().ready.iter().take(limit).cloned().collect()
    }

    /// Number of ready handles
    pub fn len(&self) -> usize {
        self.shared.lock().ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.lock().ready.is_empty()
    }

    /// Requests not yet handed to the resolver
    pub fn pending_len(&self) -> usize {
        self.shared
            .lock()
            .pending
            .iter()
            .map(|batch| batch.requests.len())
            .sum()
    }

    /// True when nothing is ready, pending or being resolved
    pub fn is_idle(&self) -> bool {
        let state = self.shared.lock();
        state.ready.is_empty() && state.pending.is_empty() && state.in_flight == 0
    }

    pub fn is_draining(&self) -> bool {
        self.shared.draining.load(Ordering::Acquire)
    }

    /// Empty the queue, cancelling pending work
    ///
    /// Releases one reference for every drained ready handle, drops pending
    /// requests before they reach the resolver and waits for in-flight
    /// resolutions to settle. A clear issued while another is running is a
    /// no-op.
    pub async fn clear(&self) -> ClearOutcome {
        if self
            .shared
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Clear already in progress");
            return ClearOutcome::AlreadyDraining;
        }

        let _enqueue = self.shared.enqueue_lock.lock().await;
        let (released, dropped) = {
            let mut state = self.shared.lock();
            state.epoch += 1;
            let dropped: usize = state
                .pending
                .drain(..)
                .map(|batch| batch.requests.len())
                .sum();
            let drained: Vec<ArtifactHandle> = state.ready.drain(..).collect();
            for handle in &drained {
                self.shared.recycler.release(handle);
            }
            (drained.len(), dropped)
        };

        self.shared.wait_settled().await;
        self.shared.draining.store(false, Ordering::Release);

        info!(released, dropped, "Track queue cleared");
        ClearOutcome::Cleared { released, dropped }
    }
}

impl Drop for TrackQueue {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.tracks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pop the next pending request, counting it as in flight
    fn next_request(&self) -> Option<(MediaRequest, u64)> {
        let mut state = self.lock();
        loop {
            let batch = state.pending.front_mut()?;
            match batch.requests.pop_front() {
                Some(request) => {
                    trace!(batch = batch.id, identity = request.identity(), "Starting resolution");
                    state.in_flight += 1;
                    let epoch = state.epoch;
                    return Some((request, epoch));
                }
                None => {
                    state.pending.pop_front();
                }
            }
        }
    }

    fn settle(&self, state: &mut QueueState) {
        state.in_flight -= 1;
        if state.in_flight == 0 {
            self.settled.notify_waiters();
        }
    }

    async fn wait_settled(&self) {
        loop {
            let notified = self.settled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.lock().in_flight == 0 {
                return;
            }
            notified.await;
        }
    }

    fn is_stale(&self, epoch: u64) -> bool {
        self.draining.load(Ordering::Acquire) || self.lock().epoch != epoch
    }

    /// Resolve one request and append it to the ready queue
    async fn resolve_one(&self, request: MediaRequest, epoch: u64) {
        if self.is_stale(epoch) {
            trace!(identity = request.identity(), "Skipping resolution of cleared request");
            self.settle(&mut self.lock());
            return;
        }

        let identity = request.identity().to_string();
        let resolver = Arc::clone(&self.resolver);
        let result = self
            .recycler
            .resolve(&identity, move || async move {
                match tokio::task::spawn_blocking(move || resolver.resolve(&request)).await {
                    Ok(result) => result,
                    Err(e) => Err(ResolveError::Worker(e.to_string())),
                }
            })
            .await;

        let mut state = self.lock();
        match result {
            Ok(handle) if state.epoch == epoch => {
                debug!(identity = %identity, path = %handle, "Track ready");
                state.ready.push_back(handle);
                self.track_available.notify_waiters();
            }
            Ok(handle) => {
                debug!(identity = %identity, path = %handle, "Discarding track resolved after clear");
                self.recycler.release(&handle);
            }
            Err(e) => {
                warn!(identity = %identity, error = %e, "Skipping track that failed to resolve");
            }
        }
        self.settle(&mut state);
    }
}

/// Releases a popped handle even if the playing future is dropped
struct Checkout<'a> {
    shared: &'a Shared,
    handle: ArtifactHandle,
}

impl Drop for Checkout<'_> {
    fn drop(&mut self) {
        // Canonical order: track-queue lock, then recycler lock
        let _state = self.shared.lock();
        self.shared.recycler.release(&self.handle);
    }
}

/// Dispatcher loop: hands pending requests to resolution tasks
async fn dispatch(shared: Arc<Shared>) {
    loop {
        let permit = match Arc::clone(&shared.permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };

        let (request, epoch) = loop {
            let notified = shared.work_available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(job) = shared.next_request() {
                break job;
            }
            notified.await;
        };

        let worker = Arc::clone(&shared);
        tokio::spawn(async move {
            worker.resolve_one(request, epoch).await;
            drop(permit);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    struct EchoResolver;

    impl Resolver for EchoResolver {
        fn resolve(&self, request: &MediaRequest) -> std::result::Result<PathBuf, ResolveError> {
            Ok(PathBuf::from(format!("/tmp/jukebox-queue-unit/{}", request.identity())))
        }
    }

    #[tokio::test]
    async fn test_front_on_empty_queue() {
        let queue = TrackQueue::new(Arc::new(Recycler::new()), Arc::new(EchoResolver), 1);
        assert!(matches!(queue.front(), Err(Error::EmptyQueue)));
        assert!(queue.is_idle());
    }

    #[tokio::test]
    async fn test_empty_batch_accepted() {
        let queue = TrackQueue::new(Arc::new(Recycler::new()), Arc::new(EchoResolver), 1);
        assert_eq!(queue.enqueue(Vec::new()).await.unwrap(), 0);
        assert!(queue.is_idle());
    }

    #[tokio::test]
    async fn test_wait_returns_once_ready() {
        let queue = TrackQueue::new(Arc::new(Recycler::new()), Arc::new(EchoResolver), 1);
        queue.enqueue(vec![MediaRequest::remote("a.mp3")]).await.unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(5), queue.wait())
            .await
            .expect("track never became ready");
        assert_eq!(queue.front().unwrap().title(), "a");
        assert_eq!(queue.peek(10).len(), 1);
    }
}
