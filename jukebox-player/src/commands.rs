//! Command surface
//!
//! Maps chat-style text commands onto [`PlayerSession`] calls and renders the
//! replies. Every command except `help` and `leave` requires the author to be
//! in a channel; `play` binds the session to that channel.

use crate::error::Error;
use crate::media::{is_supported_upload, is_supported_url, MediaRequest, Upload};
use crate::playback::ChannelTarget;
use crate::registry::SessionRegistry;
use crate::session::{ClearReply, LeaveOutcome, PlayerSession};
use jukebox_common::config::TomlConfig;
use jukebox_common::SessionId;
use std::sync::Arc;
use tracing::{debug, warn};

pub const HELP_TEXT: &str = "\
!help - list all commands
!play [url] - play specified video(s) in the current channel
!play (with attachment) - play attachment(s) in the current channel
!pause - pause playback
!resume - resume playback
!skip - skip the current video
!queue - display the current contents of the queue
!clear - clear the queue
!leave - leave the current channel";

/// A parsed command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `play [url]`; the url is absent when the message carries attachments
    Play(Option<String>),
    Pause,
    Resume,
    Skip,
    Queue,
    Clear,
    Leave,
    Help,
}

impl Command {
    /// Parse `content`, or `None` if it is not a command
    ///
    /// Only `play` takes an argument; the other commands must match exactly.
    pub fn parse(prefix: &str, content: &str) -> Option<Self> {
        let body = content.trim().strip_prefix(prefix)?;
        let (name, arg) = match body.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (body, ""),
        };

        let command = match (name, arg.is_empty()) {
            ("play", true) => Command::Play(None),
            ("play", false) => Command::Play(Some(arg.to_string())),
            ("pause", true) => Command::Pause,
            ("resume", true) => Command::Resume,
            ("skip", true) => Command::Skip,
            ("queue", true) => Command::Queue,
            ("clear", true) => Command::Clear,
            ("leave", true) => Command::Leave,
            ("help", true) => Command::Help,
            _ => return None,
        };
        Some(command)
    }
}

/// A chat message addressed to the player
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub session: SessionId,
    /// Channel the author is currently in, if any
    pub author_channel: Option<ChannelTarget>,
    pub content: String,
    pub attachments: Vec<Upload>,
}

impl IncomingMessage {
    pub fn new(session: SessionId, author_channel: Option<ChannelTarget>, content: impl Into<String>) -> Self {
        Self {
            session,
            author_channel,
            content: content.into(),
            attachments: Vec::new(),
        }
    }

    pub fn with_attachments(mut self, attachments: Vec<Upload>) -> Self {
        self.attachments = attachments;
        self
    }
}

/// Dispatcher settings
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub prefix: String,
    pub allowed_url_prefixes: Vec<String>,
    pub queue_display_limit: usize,
}

impl From<&TomlConfig> for DispatcherConfig {
    fn from(config: &TomlConfig) -> Self {
        Self {
            prefix: config.command_prefix.clone(),
            allowed_url_prefixes: config.resolver.allowed_url_prefixes.clone(),
            queue_display_limit: config.queue_display_limit,
        }
    }
}

/// Runs commands against the session registry
pub struct CommandDispatcher {
    registry: Arc<SessionRegistry>,
    config: DispatcherConfig,
}

impl CommandDispatcher {
    pub fn new(registry: Arc<SessionRegistry>, config: DispatcherConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Handle one message; returns the reply, if any
    ///
    /// Messages that are not commands are ignored.
    pub async fn dispatch(&self, message: IncomingMessage) -> Option<String> {
        let command = Command::parse(&self.config.prefix, &message.content)?;
        debug!(session = %message.session, ?command, "Dispatching command");

        match command {
            Command::Help => return Some(HELP_TEXT.to_string()),
            Command::Leave => return Some(self.leave(message.session).await),
            _ => {}
        }

        let Some(channel) = message.author_channel.clone() else {
            return Some("Connect to a voice channel to use commands.".to_string());
        };
        let session = self.registry.get_or_create(message.session).await;

        match command {
            Command::Play(url) => self.play(&session, url, message.attachments, channel).await,
            Command::Pause => Some(
                if session.pause().await {
                    "Pausing playback..."
                } else {
                    "Nothing playing right now."
                }
                .to_string(),
            ),
            Command::Resume => Some(
                if session.resume().await {
                    "Resuming playback..."
                } else {
                    "Nothing playing right now."
                }
                .to_string(),
            ),
            Command::Skip => Some(
                if session.skip().await {
                    "Skipping..."
                } else {
                    "Nothing playing right now."
                }
                .to_string(),
            ),
            Command::Queue => Some(self.render_queue(&session)),
            Command::Clear => Some(
                match session.clear().await {
                    ClearReply::Emptied { .. } => "Emptying queue...",
                    ClearReply::AlreadyEmpty => "Queue already empty.",
                    ClearReply::AlreadyClearing => "Queue is already being emptied.",
                }
                .to_string(),
            ),
            Command::Help | Command::Leave => None,
        }
    }

    async fn leave(&self, id: SessionId) -> String {
        let outcome = match self.registry.get(id).await {
            Some(session) => session.leave().await,
            None => LeaveOutcome::NotConnected,
        };
        match outcome {
            LeaveOutcome::Left => "Leaving channel...".to_string(),
            LeaveOutcome::NotConnected => "Not currently connected to a voice channel.".to_string(),
        }
    }

    async fn play(
        &self,
        session: &Arc<PlayerSession>,
        url: Option<String>,
        attachments: Vec<Upload>,
        channel: ChannelTarget,
    ) -> Option<String> {
        let requests = if !attachments.is_empty() {
            if !attachments.iter().all(|upload| is_supported_upload(&upload.filename)) {
                return Some("Error. One or more attachments is an invalid file type.".to_string());
            }
            attachments.into_iter().map(MediaRequest::upload).collect()
        } else {
            match url {
                Some(url) if is_supported_url(&url, &self.config.allowed_url_prefixes) => {
                    session.report("Collecting info...").await;
                    match self.expand(url).await {
                        Ok(requests) => requests,
                        Err(e) => {
                            warn!(session = %session.id(), error = %e, "Failed to collect video info");
                            return Some("Error getting video(s).".to_string());
                        }
                    }
                }
                _ => return Some("Not a valid link/attachment.".to_string()),
            }
        };

        match session.play(requests, channel).await {
            Ok(_) => None,
            Err(Error::Draining) => Some("Queue is being emptied, try again.".to_string()),
            Err(e) => {
                warn!(session = %session.id(), error = %e, "Play request failed");
                Some(format!("Could not start playback: {}", e))
            }
        }
    }

    async fn expand(&self, url: String) -> crate::error::Result<Vec<MediaRequest>> {
        let resolver = Arc::clone(self.registry.resolver());
        let identity = url.clone();
        let expanded = tokio::task::spawn_blocking(move || resolver.expand(&url))
            .await
            .map_err(|e| Error::ResolutionFailed {
                identity: identity.clone(),
                reason: e.to_string(),
            })?;
        expanded.map_err(|e| Error::ResolutionFailed {
            identity,
            reason: e.to_string(),
        })
    }

    fn render_queue(&self, session: &PlayerSession) -> String {
        let limit = self.config.queue_display_limit;
        let (titles, total) = session.tracklist(limit);
        if titles.is_empty() {
            return "Queue currently empty.".to_string();
        }

        let mut reply = String::from("Currently in queue:\n");
        for title in &titles {
            reply.push_str(title);
            reply.push('\n');
        }
        if total > limit {
            reply.push_str(&format!("+{} more.", total - limit));
        }
        reply.trim_end().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("!", "!pause"), Some(Command::Pause));
        assert_eq!(Command::parse("!", "  !help "), Some(Command::Help));
        assert_eq!(Command::parse("!", "!play"), Some(Command::Play(None)));
        assert_eq!(
            Command::parse("!", "!play https://youtu.be/abc"),
            Some(Command::Play(Some("https://youtu.be/abc".to_string())))
        );
    }

    #[test]
    fn test_parse_ignores_non_commands() {
        assert_eq!(Command::parse("!", "pause"), None);
        assert_eq!(Command::parse("!", "!pause now"), None);
        assert_eq!(Command::parse("!", "!dance"), None);
        assert_eq!(Command::parse("!", "!playlist"), None);
        assert_eq!(Command::parse("?", "!skip"), None);
    }

    #[test]
    fn test_parse_custom_prefix() {
        assert_eq!(Command::parse("jb ", "jb queue"), Some(Command::Queue));
    }
}
