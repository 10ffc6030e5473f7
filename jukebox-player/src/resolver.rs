//! Resolver: turns a media request into a file on disk
//!
//! Resolvers block (downloads take seconds), so callers run them on the
//! blocking pool via `tokio::task::spawn_blocking`. A resolver is never called
//! while any queue or recycler lock is held, and it is not assumed to be
//! idempotent: duplicate calls for one identity are prevented by the recycler.

use crate::media::{canonical_url, is_playlist_url, MediaRequest, Upload};
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use tracing::{debug, info};

/// Resolver failure for one request
#[derive(Error, Debug)]
pub enum ResolveError {
    /// The external extractor could not be started or exited with an error
    #[error("Extractor failed: {0}")]
    Extractor(String),

    /// The extractor ran but produced no usable output
    #[error("Unexpected extractor output: {0}")]
    Output(String),

    /// Copying an upload or touching the cache folder failed
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The blocking worker running the resolver panicked or was cancelled
    #[error("Resolver worker failed: {0}")]
    Worker(String),
}

/// Resolver trait - turns a request into the path of a materialized file
pub trait Resolver: Send + Sync + 'static {
    /// Materialize `request` and return the path of the resulting file (blocking)
    fn resolve(&self, request: &MediaRequest) -> Result<PathBuf, ResolveError>;

    /// Expand a url into the requests it stands for (blocking)
    ///
    /// Playlists become one request per entry. Default: the url itself.
    fn expand(&self, url: &str) -> Result<Vec<MediaRequest>, ResolveError> {
        Ok(vec![MediaRequest::remote(canonical_url(url))])
    }
}

/// Resolver backed by the `yt-dlp` executable
///
/// Remote references are downloaded into the cache folder; uploads are copied
/// there under their own file name.
pub struct YtDlpResolver {
    binary: PathBuf,
    cache_dir: PathBuf,
}

impl YtDlpResolver {
    pub fn new(binary: impl Into<PathBuf>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            cache_dir: cache_dir.into(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn run(&self, args: &[&str]) -> Result<String, ResolveError> {
        debug!(binary = %self.binary.display(), ?args, "Running extractor");

        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .map_err(|e| ResolveError::Extractor(format!("{}: {}", self.binary.display(), e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ResolveError::Extractor(format!(
                "Exit code: {:?}, stderr: {}",
                output.status.code(),
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn download(&self, url: &str) -> Result<PathBuf, ResolveError> {
        std::fs::create_dir_all(&self.cache_dir)?;
        let template = self.cache_dir.join("%(title)s [%(id)s].%(ext)s");
        let template = template.to_string_lossy();

        let stdout = self.run(&[
            "--quiet",
            "--no-playlist",
            "--no-progress",
            "--print",
            "after_move:filepath",
            "--output",
            &template,
            url,
        ])?;

        let path = stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .last()
            .map(PathBuf::from)
            .ok_or_else(|| ResolveError::Output(format!("no file path printed for {}", url)))?;

        if !path.exists() {
            return Err(ResolveError::Output(format!(
                "extractor reported missing file {}",
                path.display()
            )));
        }

        info!(url, path = %path.display(), "Downloaded track");
        Ok(path)
    }

    fn store_upload(&self, upload: &Upload) -> Result<PathBuf, ResolveError> {
        std::fs::create_dir_all(&self.cache_dir)?;
        // Only the final component of the uploader's name is trusted
        let name = Path::new(&upload.filename)
            .file_name()
            .ok_or_else(|| ResolveError::Output(format!("invalid upload name {}", upload.filename)))?;
        let target = self.cache_dir.join(name);
        std::fs::copy(&upload.source, &target)?;

        info!(upload = %upload.filename, path = %target.display(), "Stored upload");
        Ok(target)
    }
}

impl Resolver for YtDlpResolver {
    fn resolve(&self, request: &MediaRequest) -> Result<PathBuf, ResolveError> {
        match request {
            MediaRequest::RemoteReference { url } => self.download(url),
            MediaRequest::LocalUpload(upload) => self.store_upload(upload),
        }
    }

    fn expand(&self, url: &str) -> Result<Vec<MediaRequest>, ResolveError> {
        if !is_playlist_url(url) {
            return Ok(vec![MediaRequest::remote(canonical_url(url))]);
        }

        let stdout = self.run(&["--quiet", "--flat-playlist", "--print", "url", url])?;
        let entries: Vec<MediaRequest> = stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(MediaRequest::remote)
            .collect();

        if entries.is_empty() {
            return Err(ResolveError::Output(format!("playlist {} has no entries", url)));
        }

        info!(url, count = entries.len(), "Expanded playlist");
        Ok(entries)
    }
}
