//! Scripted resolver
//!
//! Materializes each request as a small file in a temp folder. Per-identity
//! latencies, failures and playlist expansions can be configured; every
//! resolve call is recorded.

use jukebox_player::resolver::{ResolveError, Resolver};
use jukebox_player::MediaRequest;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;

pub struct FakeResolver {
    dir: TempDir,
    default_latency: Duration,
    latencies: Mutex<HashMap<String, Duration>>,
    failing: Mutex<HashSet<String>>,
    playlists: Mutex<HashMap<String, Vec<String>>>,
    calls: Mutex<Vec<String>>,
}

impl FakeResolver {
    pub fn new() -> Self {
        Self::with_default_latency(Duration::ZERO)
    }

    pub fn with_default_latency(default_latency: Duration) -> Self {
        Self {
            dir: TempDir::new().expect("temp dir"),
            default_latency,
            latencies: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            playlists: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set_latency(&self, identity: &str, latency: Duration) {
        self.latencies.lock().unwrap().insert(identity.to_string(), latency);
    }

    pub fn fail(&self, identity: &str) {
        self.failing.lock().unwrap().insert(identity.to_string());
    }

    pub fn set_playlist(&self, url: &str, entries: &[&str]) {
        self.playlists
            .lock()
            .unwrap()
            .insert(url.to_string(), entries.iter().map(|e| e.to_string()).collect());
    }

    /// Every resolve call so far, in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, identity: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == identity).count()
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// File a given identity materializes into
    ///
    /// Named after the last url segment, so `https://youtu.be/alpha` has
    /// title `alpha`.
    pub fn path_for(&self, identity: &str) -> PathBuf {
        let name = identity.rsplit(['/', '=']).next().unwrap_or(identity);
        if name.contains('.') {
            self.dir.path().join(name)
        } else {
            self.dir.path().join(format!("{}.mp3", name))
        }
    }
}

impl Resolver for FakeResolver {
    fn resolve(&self, request: &MediaRequest) -> Result<PathBuf, ResolveError> {
        let identity = request.identity().to_string();
        self.calls.lock().unwrap().push(identity.clone());

        let latency = self
            .latencies
            .lock()
            .unwrap()
            .get(&identity)
            .copied()
            .unwrap_or(self.default_latency);
        if !latency.is_zero() {
            std::thread::sleep(latency);
        }

        if self.failing.lock().unwrap().contains(&identity) {
            return Err(ResolveError::Extractor(format!("{} is unavailable", identity)));
        }

        let path = self.path_for(&identity);
        std::fs::write(&path, identity.as_bytes())?;
        Ok(path)
    }

    fn expand(&self, url: &str) -> Result<Vec<MediaRequest>, ResolveError> {
        if self.failing.lock().unwrap().contains(url) {
            return Err(ResolveError::Extractor(format!("no info for {}", url)));
        }
        match self.playlists.lock().unwrap().get(url) {
            Some(entries) => Ok(entries.iter().map(MediaRequest::remote).collect()),
            None => Ok(vec![MediaRequest::remote(jukebox_player::media::canonical_url(url))]),
        }
    }
}
