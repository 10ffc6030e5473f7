//! Recycler: reference-counted registry of materialized media files
//!
//! Maps a request identity to the [`ArtifactHandle`] it was materialized into
//! and counts the holders of every handle. Files are deleted only by the
//! periodic reaper, once their count has dropped to zero.
//!
//! **Concurrency:**
//! - All map reads and writes go through one `std::sync::Mutex`. It is never
//!   held across an `.await`.
//! - Materialization runs with the mutex released. The identity is marked
//!   in-flight first, so concurrent `resolve` calls for the same identity wait
//!   for the first caller instead of materializing a second copy.
//! - Waiters are counted while the materialization runs; the first caller
//!   registers the handle with one reference per waiter plus its own, so the
//!   file cannot be reaped between the materialization and the waiters waking.
//! - Both the materializing caller and the waiters are cancel-safe: a dropped
//!   future hands back whatever it was counted for.

use crate::error::{Error, Result};
use crate::media::ArtifactHandle;
use crate::resolver::ResolveError;
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

/// Progress of one in-flight materialization, as seen by its waiters
#[derive(Debug, Clone)]
enum Flight {
    Running,
    Ready(ArtifactHandle),
    Failed(String),
}

/// State of one identity
enum Slot {
    /// Materialization in progress
    InFlight {
        flight_id: u64,
        waiters: u32,
        done: watch::Sender<Flight>,
    },
    /// Materialized and registered in `handles`
    Ready(ArtifactHandle),
}

/// Bookkeeping for one materialized file
struct HandleEntry {
    refcount: u32,
    /// Every identity currently mapped to this handle
    identities: Vec<String>,
}

#[derive(Default)]
struct Maps {
    identities: HashMap<String, Slot>,
    handles: HashMap<ArtifactHandle, HandleEntry>,
    next_flight_id: u64,
}

impl Maps {
    /// Drop one reference, never below zero
    fn release(&mut self, handle: &ArtifactHandle) {
        match self.handles.get_mut(handle) {
            Some(entry) if entry.refcount > 0 => {
                entry.refcount -= 1;
                trace!(path = %handle, refcount = entry.refcount, "Released artifact");
            }
            Some(_) => warn!(path = %handle, "Release of an artifact with no references"),
            None => warn!(path = %handle, "Release of an unknown artifact"),
        }
    }

    /// Remove the identity's slot if it still belongs to `flight_id`
    fn take_flight(&mut self, identity: &str, flight_id: u64) -> Option<(u32, watch::Sender<Flight>)> {
        match self.identities.get(identity) {
            Some(Slot::InFlight { flight_id: id, .. }) if *id == flight_id => {}
            _ => return None,
        }
        match self.identities.remove(identity) {
            Some(Slot::InFlight { waiters, done, .. }) => Some((waiters, done)),
            _ => None,
        }
    }
}

/// Counters describing the recycler contents
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecyclerStats {
    /// Registered handles (including unreferenced ones awaiting the reaper)
    pub artifacts: usize,
    /// Handles with a zero refcount
    pub unreferenced: usize,
    /// Identities currently being materialized
    pub in_flight: usize,
}

/// Result of one reaper sweep
#[derive(Debug, Default)]
pub struct ReapReport {
    /// Handles removed from the bookkeeping
    pub reaped: Vec<ArtifactHandle>,
    /// Deletions that failed (bookkeeping removed anyway)
    pub failures: Vec<Error>,
}

/// Reference-counted registry of materialized files
///
/// Usually shared behind an `Arc` by every session of the process.
#[derive(Default)]
pub struct Recycler {
    maps: Mutex<Maps>,
}

impl Recycler {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Maps> {
        // Every critical section leaves the maps consistent
        self.maps.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get a referenced handle for `identity`, materializing it if needed
    ///
    /// - Already registered: increments the refcount and returns the handle.
    /// - In flight: waits for the materializing caller and shares its result.
    /// - Unknown: marks the identity in flight and awaits `materialize` with
    ///   the lock released. On success the handle is registered; on failure
    ///   nothing is registered and `ResolutionFailed` is returned.
    pub async fn resolve<F, Fut>(&self, identity: &str, materialize: F) -> Result<ArtifactHandle>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<PathBuf, ResolveError>>,
    {
        let claim = {
            let mut guard = self.lock();
            let maps = &mut *guard;
            match maps.identities.get_mut(identity) {
                Some(Slot::Ready(handle)) => {
                    let handle = handle.clone();
                    if let Some(entry) = maps.handles.get_mut(&handle) {
                        entry.refcount += 1;
                        trace!(identity, path = %handle, refcount = entry.refcount, "Recycled artifact");
                    }
                    return Ok(handle);
                }
                Some(Slot::InFlight {
                    flight_id,
                    waiters,
                    done,
                }) => {
                    *waiters += 1;
                    Claim::Wait {
                        flight_id: *flight_id,
                        rx: done.subscribe(),
                    }
                }
                None => {
                    let flight_id = maps.next_flight_id;
                    maps.next_flight_id += 1;
                    let (done, _) = watch::channel(Flight::Running);
                    maps.identities.insert(
                        identity.to_string(),
                        Slot::InFlight {
                            flight_id,
                            waiters: 0,
                            done,
                        },
                    );
                    Claim::Materialize { flight_id }
                }
            }
        };

        match claim {
            Claim::Wait { flight_id, rx } => self.wait_for_flight(identity, flight_id, rx).await,
            Claim::Materialize { flight_id } => {
                self.materialize(identity, flight_id, materialize).await
            }
        }
    }

    async fn materialize<F, Fut>(
        &self,
        identity: &str,
        flight_id: u64,
        materialize: F,
    ) -> Result<ArtifactHandle>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<PathBuf, ResolveError>>,
    {
        debug!(identity, "Materializing artifact");
        let mut guard = FlightGuard {
            recycler: self,
            identity,
            flight_id,
            armed: true,
        };

        let outcome = materialize().await;
        guard.armed = false;

        let mut maps = self.lock();
        let (waiters, done) = maps.take_flight(identity, flight_id).unwrap_or_else(|| {
            // The slot is only ever removed by this flight
            warn!(identity, "In-flight marker vanished during materialization");
            (0, watch::channel(Flight::Running).0)
        });

        match outcome {
            Ok(path) => {
                let handle = ArtifactHandle::new(path);
                let references = 1 + waiters;
                let entry = maps.handles.entry(handle.clone()).or_insert(HandleEntry {
                    refcount: 0,
                    identities: Vec::new(),
                });
                entry.refcount += references;
                if !entry.identities.iter().any(|id| id == identity) {
                    entry.identities.push(identity.to_string());
                }
                debug!(
                    identity,
                    path = %handle,
                    refcount = entry.refcount,
                    waiters,
                    "Registered artifact"
                );
                maps.identities
                    .insert(identity.to_string(), Slot::Ready(handle.clone()));
                done.send_replace(Flight::Ready(handle.clone()));
                Ok(handle)
            }
            Err(e) => {
                let reason = e.to_string();
                done.send_replace(Flight::Failed(reason.clone()));
                Err(Error::ResolutionFailed {
                    identity: identity.to_string(),
                    reason,
                })
            }
        }
    }

    async fn wait_for_flight(
        &self,
        identity: &str,
        flight_id: u64,
        mut rx: watch::Receiver<Flight>,
    ) -> Result<ArtifactHandle> {
        trace!(identity, "Waiting for in-flight materialization");
        let mut guard = WaitGuard {
            recycler: self,
            identity,
            flight_id,
            rx: rx.clone(),
            armed: true,
        };

        let flight = match rx.wait_for(|f| !matches!(f, Flight::Running)).await {
            Ok(flight) => flight.clone(),
            Err(_) => Flight::Failed("materialization abandoned".to_string()),
        };
        guard.armed = false;

        match flight {
            // Our reference was counted when the flight registered the handle
            Flight::Ready(handle) => Ok(handle),
            Flight::Failed(reason) => Err(Error::ResolutionFailed {
                identity: identity.to_string(),
                reason,
            }),
            Flight::Running => unreachable!("wait_for only returns settled flights"),
        }
    }

    /// Drop one reference to `handle`
    ///
    /// Never deletes anything; unreferenced files are left for the reaper.
    pub fn release(&self, handle: &ArtifactHandle) {
        self.lock().release(handle);
    }

    /// Delete every unreferenced file and forget it
    ///
    /// The physical delete happens under the lock so that a concurrent
    /// `resolve` cannot re-register the same path while it is being removed.
    /// A failed delete is logged and the bookkeeping removed regardless.
    pub fn reap(&self) -> ReapReport {
        let mut guard = self.lock();
        let maps = &mut *guard;
        let dead: Vec<ArtifactHandle> = maps
            .handles
            .iter()
            .filter(|(_, entry)| entry.refcount == 0)
            .map(|(handle, _)| handle.clone())
            .collect();

        let mut report = ReapReport::default();
        for handle in dead {
            if let Some(entry) = maps.handles.remove(&handle) {
                for identity in entry.identities {
                    if matches!(maps.identities.get(&identity), Some(Slot::Ready(h)) if *h == handle) {
                        maps.identities.remove(&identity);
                    }
                }
            }

            match std::fs::remove_file(handle.path()) {
                Ok(()) => debug!(path = %handle, "Deleted unreferenced artifact"),
                Err(e) => {
                    warn!(path = %handle, error = %e, "Failed to delete artifact");
                    report.failures.push(Error::DeletionFailed {
                        path: handle.path().to_path_buf(),
                        reason: e.to_string(),
                    });
                }
            }
            report.reaped.push(handle);
        }

        if !report.reaped.is_empty() {
            info!(
                reaped = report.reaped.len(),
                failures = report.failures.len(),
                "Reaper sweep complete"
            );
        }
        report
    }

    /// Run [`Recycler::reap`] every `interval` until the recycler is dropped
    pub fn spawn_reaper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let recycler = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(recycler) = recycler.upgrade() else {
                    debug!("Recycler dropped, reaper exiting");
                    break;
                };
                recycler.reap();
            }
        })
    }

    /// Current refcount of a registered handle
    pub fn refcount(&self, handle: &ArtifactHandle) -> Option<u32> {
        self.lock().handles.get(handle).map(|entry| entry.refcount)
    }

    #[cfg(test)]
    fn lookup(&self, identity: &str) -> Option<ArtifactHandle> {
        match self.lock().identities.get(identity) {
            Some(Slot::Ready(handle)) => Some(handle.clone()),
            _ => None,
        }
    }

    pub fn stats(&self) -> RecyclerStats {
        let maps = self.lock();
        RecyclerStats {
            artifacts: maps.handles.len(),
            unreferenced: maps.handles.values().filter(|e| e.refcount == 0).count(),
            in_flight: maps
                .identities
                .values()
                .filter(|slot| matches!(slot, Slot::InFlight { .. }))
                .count(),
        }
    }
}

enum Claim {
    Wait {
        flight_id: u64,
        rx: watch::Receiver<Flight>,
    },
    Materialize {
        flight_id: u64,
    },
}

/// Clears the in-flight marker if the materializing future is dropped
struct FlightGuard<'a> {
    recycler: &'a Recycler,
    identity: &'a str,
    flight_id: u64,
    armed: bool,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut maps = self.recycler.lock();
        if let Some((_, done)) = maps.take_flight(self.identity, self.flight_id) {
            warn!(identity = self.identity, "Materialization abandoned");
            done.send_replace(Flight::Failed("materialization abandoned".to_string()));
        }
    }
}

/// Hands back a waiter's counted reference if its future is dropped
struct WaitGuard<'a> {
    recycler: &'a Recycler,
    identity: &'a str,
    flight_id: u64,
    rx: watch::Receiver<Flight>,
    armed: bool,
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let flight = self.rx.borrow().clone();
        let mut guard = self.recycler.lock();
        let maps = &mut *guard;
        match flight {
            Flight::Ready(handle) => maps.release(&handle),
            Flight::Failed(_) => {}
            Flight::Running => {
                if let Some(Slot::InFlight {
                    flight_id, waiters, ..
                }) = maps.identities.get_mut(self.identity)
                {
                    if *flight_id == self.flight_id {
                        *waiters = waiters.saturating_sub(1);
                    }
                }
            }
        }
    }
}
