//! Tests for configuration loading and cache folder resolution
//!
//! Tests that manipulate JUKEBOX_CACHE_DIR are marked with #[serial]
//! to ensure they run sequentially, not in parallel.

use jukebox_common::config::{resolve_cache_dir, TomlConfig, CACHE_DIR_ENV};
use jukebox_common::Error;
use serial_test::serial;
use std::env;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

#[test]
fn test_missing_config_file_uses_defaults() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("does-not-exist.toml");

    let config = TomlConfig::load_or_default(Some(&missing)).unwrap();

    assert_eq!(config.idle_timeout_secs, 300);
    assert_eq!(config.queue_display_limit, 10);
    assert!(config.cache_dir.is_none());
}

#[test]
fn test_load_full_config_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
        cache_dir = "/var/cache/jukebox"
        reap_interval_secs = 10
        idle_timeout_secs = 120
        resolve_parallelism = 2
        queue_display_limit = 5
        command_prefix = "?"

        [resolver]
        ytdlp_binary = "/usr/local/bin/yt-dlp"
        allowed_url_prefixes = ["https://example.com"]

        [logging]
        level = "debug"
        file = "log.txt"
        "#,
    )
    .unwrap();

    let config = TomlConfig::load_or_default(Some(&path)).unwrap();

    assert_eq!(config.cache_dir, Some(PathBuf::from("/var/cache/jukebox")));
    assert_eq!(config.reap_interval_secs, 10);
    assert_eq!(config.resolve_parallelism, 2);
    assert_eq!(config.command_prefix, "?");
    assert_eq!(config.resolver.ytdlp_binary, PathBuf::from("/usr/local/bin/yt-dlp"));
    assert_eq!(config.resolver.allowed_url_prefixes, vec!["https://example.com".to_string()]);
    assert_eq!(config.logging.file, Some(PathBuf::from("log.txt")));
}

#[test]
fn test_malformed_config_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "idle_timeout_secs = \"soon\"").unwrap();

    let result = TomlConfig::load_or_default(Some(&path));
    assert!(matches!(result, Err(Error::TomlParse(_))));
}

#[test]
fn test_invalid_values_rejected_on_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "idle_timeout_secs = 0").unwrap();

    let result = TomlConfig::load(&path);
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
#[serial]
fn test_cli_argument_wins() {
    env::set_var(CACHE_DIR_ENV, "/tmp/jukebox-env");
    let config = TomlConfig {
        cache_dir: Some(PathBuf::from("/tmp/jukebox-toml")),
        ..TomlConfig::default()
    };

    let dir = resolve_cache_dir(Some(Path::new("/tmp/jukebox-cli")), &config);
    assert_eq!(dir, PathBuf::from("/tmp/jukebox-cli"));

    env::remove_var(CACHE_DIR_ENV);
}

#[test]
#[serial]
fn test_env_var_beats_toml() {
    env::set_var(CACHE_DIR_ENV, "/tmp/jukebox-env");
    let config = TomlConfig {
        cache_dir: Some(PathBuf::from("/tmp/jukebox-toml")),
        ..TomlConfig::default()
    };

    let dir = resolve_cache_dir(None, &config);
    assert_eq!(dir, PathBuf::from("/tmp/jukebox-env"));

    env::remove_var(CACHE_DIR_ENV);
}

#[test]
#[serial]
fn test_toml_then_default() {
    env::remove_var(CACHE_DIR_ENV);

    let config = TomlConfig {
        cache_dir: Some(PathBuf::from("/tmp/jukebox-toml")),
        ..TomlConfig::default()
    };
    assert_eq!(resolve_cache_dir(None, &config), PathBuf::from("/tmp/jukebox-toml"));

    let fallback = resolve_cache_dir(None, &TomlConfig::default());
    assert!(fallback.ends_with("jukebox"));
}
