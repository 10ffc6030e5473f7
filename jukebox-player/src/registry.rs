//! Session registry
//!
//! Owns every [`PlayerSession`] of the process. Sessions are created on first
//! interaction and removed by explicit teardown. All sessions share one
//! [`Recycler`], so a file requested by two sessions is materialized once.

use crate::playback::PlaybackTransport;
use crate::recycler::Recycler;
use crate::resolver::Resolver;
use crate::session::{LeaveOutcome, PlayerSession, SessionConfig};
use crate::status::StatusReporter;
use jukebox_common::SessionId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Creates the transport a new session plays through
pub trait TransportFactory: Send + Sync {
    fn create(&self, session: SessionId) -> Arc<dyn PlaybackTransport>;
}

impl<F> TransportFactory for F
where
    F: Fn(SessionId) -> Arc<dyn PlaybackTransport> + Send + Sync,
{
    fn create(&self, session: SessionId) -> Arc<dyn PlaybackTransport> {
        self(session)
    }
}

/// Registry of live sessions
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<PlayerSession>>>,
    recycler: Arc<Recycler>,
    resolver: Arc<dyn Resolver>,
    transports: Box<dyn TransportFactory>,
    reporter: Arc<dyn StatusReporter>,
    config: SessionConfig,
}

impl SessionRegistry {
    pub fn new(
        recycler: Arc<Recycler>,
        resolver: Arc<dyn Resolver>,
        transports: impl TransportFactory + 'static,
        reporter: Arc<dyn StatusReporter>,
        config: SessionConfig,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            recycler,
            resolver,
            transports: Box::new(transports),
            reporter,
            config,
        }
    }

    pub fn recycler(&self) -> &Arc<Recycler> {
        &self.recycler
    }

    pub fn resolver(&self) -> &Arc<dyn Resolver> {
        &self.resolver
    }

    /// Session for `id`, created if this is its first interaction
    pub async fn get_or_create(&self, id: SessionId) -> Arc<PlayerSession> {
        if let Some(session) = self.sessions.read().await.get(&id) {
            return Arc::clone(session);
        }

        let mut sessions = self.sessions.write().await;
        // Another task may have created it between the two locks
        if let Some(session) = sessions.get(&id) {
            return Arc::clone(session);
        }

        let session = PlayerSession::new(
            id,
            self.config.clone(),
            Arc::clone(&self.recycler),
            Arc::clone(&self.resolver),
            self.transports.create(id),
            Arc::clone(&self.reporter),
        );
        sessions.insert(id, Arc::clone(&session));
        info!(session = %id, "Session created");
        session
    }

    /// Session for `id`, if it exists
    pub async fn get(&self, id: SessionId) -> Option<Arc<PlayerSession>> {
        self.sessions.read().await.get(&id).cloned()
    }

    /// Tear down and forget session `id`
    ///
    /// The session leaves its channel first, releasing its queued references.
    /// Returns false if no such session exists.
    pub async fn remove(&self, id: SessionId) -> bool {
        let removed = self.sessions.write().await.remove(&id);
        match removed {
            Some(session) => {
                if session.leave().await == LeaveOutcome::Left {
                    info!(session = %id, "Session left channel on removal");
                }
                info!(session = %id, "Session removed");
                true
            }
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Make every session leave and drop them all
    pub async fn shutdown(&self) {
        let sessions: Vec<_> = self.sessions.write().await.drain().collect();
        let count = sessions.len();
        for (_, session) in sessions {
            session.leave().await;
        }
        info!(count, "All sessions shut down");
    }
}
