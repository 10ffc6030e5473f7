//! Bootstrap configuration loading and cache folder resolution
//!
//! Configuration is read once at start-up from a TOML file. Every field has a
//! built-in default, so a missing file is not fatal: the loader warns and
//! continues with defaults. A file that exists but does not parse is an error.
//!
//! # Cache folder priority
//!
//! 1. Command-line argument (highest priority)
//! 2. `JUKEBOX_CACHE_DIR` environment variable
//! 3. `cache_dir` in the TOML config file
//! 4. OS-dependent default (fallback)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable overriding the cache folder
pub const CACHE_DIR_ENV: &str = "JUKEBOX_CACHE_DIR";

/// URL prefixes accepted for remote references unless configured otherwise
pub const DEFAULT_URL_PREFIXES: [&str; 3] = [
    "https://www.youtube.com",
    "https://youtu.be",
    "https://youtube.com",
];

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// Folder where materialized media files are stored
    pub cache_dir: Option<PathBuf>,

    /// Seconds between reaper sweeps of unreferenced media files
    pub reap_interval_secs: u64,

    /// Seconds a session waits on an empty queue before leaving its channel
    pub idle_timeout_secs: u64,

    /// Maximum number of resolver calls running at once per session queue
    ///
    /// 1 keeps playback in submission order; more lets fast tracks overtake slow ones.
    pub resolve_parallelism: usize,

    /// Number of tracks shown by the queue listing
    pub queue_display_limit: usize,

    /// Prefix that marks a chat line as a command
    pub command_prefix: String,

    /// Resolver settings
    pub resolver: ResolverConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Resolver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Path or name of the yt-dlp executable
    pub ytdlp_binary: PathBuf,

    /// Remote references must start with one of these prefixes
    pub allowed_url_prefixes: Vec<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    pub file: Option<PathBuf>,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            reap_interval_secs: 5,
            idle_timeout_secs: 300,
            resolve_parallelism: 1,
            queue_display_limit: 10,
            command_prefix: "!".to_string(),
            resolver: ResolverConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            ytdlp_binary: PathBuf::from("yt-dlp"),
            allowed_url_prefixes: DEFAULT_URL_PREFIXES.iter().map(|p| p.to_string()).collect(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl TomlConfig {
    /// Parse and validate a config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: TomlConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file, falling back to defaults when it does not exist
    ///
    /// `None` looks in the platform config folder. Only a missing file is
    /// tolerated; read, parse and validation errors are returned.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let path = match path.map(Path::to_path_buf).or_else(default_config_path) {
            Some(path) => path,
            None => {
                warn!("Could not determine config directory, using built-in defaults");
                return Ok(Self::default());
            }
        };

        if !path.exists() {
            warn!(path = %path.display(), "Config file not found, using built-in defaults");
            return Ok(Self::default());
        }

        info!(path = %path.display(), "Loading configuration");
        Self::load(&path)
    }

    /// Reject settings the player cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.resolve_parallelism == 0 {
            return Err(Error::Config("resolve_parallelism must be at least 1".to_string()));
        }
        if self.reap_interval_secs == 0 {
            return Err(Error::Config("reap_interval_secs must be at least 1".to_string()));
        }
        if self.idle_timeout_secs == 0 {
            return Err(Error::Config("idle_timeout_secs must be at least 1".to_string()));
        }
        if self.command_prefix.is_empty() {
            return Err(Error::Config("command_prefix must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

/// Platform config file location (`<config dir>/jukebox/config.toml`)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("jukebox").join("config.toml"))
}

/// Cache folder resolution following the priority order in the module docs
pub fn resolve_cache_dir(cli_arg: Option<&Path>, config: &TomlConfig) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CACHE_DIR_ENV) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    // Priority 3: TOML config file
    if let Some(path) = &config.cache_dir {
        return path.clone();
    }

    // Priority 4: OS-dependent default
    default_cache_dir()
}

/// OS-dependent default cache folder
fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|d| d.join("jukebox"))
        .unwrap_or_else(|| std::env::temp_dir().join("jukebox"))
}
