//! # Jukebox Player Library (jukebox-player)
//!
//! Per-session media playback pipeline.
//!
//! **Purpose:** Accept playback requests (remote references or uploaded files),
//! resolve each into a locally materialized media file, queue the files for
//! strictly sequential playback, and delete files from disk once no session
//! holds a reference to them.
//!
//! **Architecture:** leaf-first
//! - [`recycler::Recycler`]: reference-counted registry of materialized files
//! - [`queue::TrackQueue`]: producer/consumer pipeline from requests to ready files
//! - [`playback::PlaybackSink`]: single-flight wrapper around one transport binding
//! - [`session::PlayerSession`]: per-session playback loop with idle teardown
//! - [`registry::SessionRegistry`] and [`commands::CommandDispatcher`]: command surface

pub mod commands;
pub mod error;
pub mod media;
pub mod playback;
pub mod queue;
pub mod recycler;
pub mod registry;
pub mod resolver;
pub mod session;
pub mod status;

pub use error::{Error, Result};
pub use media::{ArtifactHandle, MediaRequest, Upload};
pub use playback::{ChannelTarget, PlaybackSink, PlaybackTransport};
pub use queue::TrackQueue;
pub use recycler::Recycler;
pub use registry::SessionRegistry;
pub use resolver::Resolver;
pub use session::{PlayerSession, SessionConfig};
pub use status::StatusReporter;
