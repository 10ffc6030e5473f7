//! # Jukebox Common Library
//!
//! Shared code for the jukebox player crates including:
//! - Error type shared by configuration loading
//! - TOML bootstrap configuration and cache folder resolution
//! - Session identifiers, session states and player event types

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
pub use events::{PlayerEvent, SessionId, SessionState};
