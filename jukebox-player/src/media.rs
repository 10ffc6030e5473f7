//! Media requests and artifact handles
//!
//! A [`MediaRequest`] is what a user asks to play. Its identity (url or upload
//! file name) is the dedup key used by the recycler. An [`ArtifactHandle`] names
//! the local file a request was materialized into.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Upload extensions the player accepts
pub const SUPPORTED_UPLOAD_EXTENSIONS: [&str; 5] = ["mp3", "mp4", "wav", "webm", "mov"];

/// A file attached to a play command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    /// File name as given by the uploader; the request identity
    pub filename: String,
    /// Where the uploaded bytes can be read from
    pub source: PathBuf,
}

impl Upload {
    pub fn new(filename: impl Into<String>, source: impl Into<PathBuf>) -> Self {
        Self {
            filename: filename.into(),
            source: source.into(),
        }
    }

    /// Build an upload from a local file, named after its file name
    pub fn from_path(path: &Path) -> Option<Self> {
        let filename = path.file_name()?.to_str()?.to_string();
        Some(Self::new(filename, path))
    }
}

/// One playback request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaRequest {
    /// A remote media page or stream url
    RemoteReference { url: String },
    /// An uploaded file
    LocalUpload(Upload),
}

impl MediaRequest {
    pub fn remote(url: impl Into<String>) -> Self {
        MediaRequest::RemoteReference { url: url.into() }
    }

    pub fn upload(upload: Upload) -> Self {
        MediaRequest::LocalUpload(upload)
    }

    /// Dedup key: the url, or the upload's file name
    pub fn identity(&self) -> &str {
        match self {
            MediaRequest::RemoteReference { url } => url,
            MediaRequest::LocalUpload(upload) => &upload.filename,
        }
    }
}

impl fmt::Display for MediaRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.identity())
    }
}

/// Opaque reference to one materialized media file
///
/// Cheap to clone. Two handles are equal when they name the same path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactHandle(Arc<PathBuf>);

impl ArtifactHandle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(Arc::new(path.into()))
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    /// Display name: the file name without its extension
    pub fn title(&self) -> String {
        self.0
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.0.to_string_lossy().into_owned())
    }
}

impl fmt::Display for ArtifactHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl From<PathBuf> for ArtifactHandle {
    fn from(path: PathBuf) -> Self {
        Self::new(path)
    }
}

/// True when `url` starts with one of the allowed prefixes
pub fn is_supported_url<S: AsRef<str>>(url: &str, allowed_prefixes: &[S]) -> bool {
    allowed_prefixes
        .iter()
        .any(|prefix| url.starts_with(prefix.as_ref()))
}

/// True when the file name carries one of the supported media extensions
pub fn is_supported_upload(filename: &str) -> bool {
    match filename.rsplit_once('.') {
        Some((_, ext)) => SUPPORTED_UPLOAD_EXTENSIONS
            .iter()
            .any(|supported| ext.eq_ignore_ascii_case(supported)),
        None => false,
    }
}

/// Drop extra query parameters from a single-video url
///
/// `https://www.youtube.com/watch?v=abc&list=xyz` becomes
/// `https://www.youtube.com/watch?v=abc`.
pub fn canonical_url(url: &str) -> &str {
    url.split('&').next().unwrap_or(url)
}

/// True when the url points at a playlist rather than one video
pub fn is_playlist_url(url: &str) -> bool {
    url.contains("playlist")
}
