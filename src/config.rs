//! Configuration file parser for ~/.config/feedrelay/config.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are accepted, though we log a warning since they are usually
//! typos.
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::poller::PollSettings;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid config value: {0} must be greater than zero")]
    Zero(&'static str),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
///
/// Webhook URLs carry access tokens; the `Debug` impl redacts them.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite file. `None` puts `feedrelay.db` in the config directory.
    pub database_path: Option<PathBuf>,

    pub poll_interval_secs: u64,

    pub fetch_timeout_secs: u64,

    pub max_concurrent_fetches: usize,

    /// Newly added feeds post their existing entries on the first poll.
    pub backfill_on_add: bool,

    /// Post as embeds unless the channel or feed says otherwise.
    pub default_embed: bool,

    pub channels: HashMap<String, ChannelConfig>,
}

/// One `[channels.<id>]` table.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub webhook_url: Option<String>,
    pub embed: Option<bool>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            poll_interval_secs: 300,
            fetch_timeout_secs: 15,
            max_concurrent_fetches: 4,
            backfill_on_add: false,
            default_embed: true,
            channels: HashMap::new(),
        }
    }
}

impl std::fmt::Debug for ChannelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelConfig")
            .field(
                "webhook_url",
                &self.webhook_url.as_ref().map(|_| "[REDACTED]"),
            )
            .field("embed", &self.embed)
            .finish()
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("database_path", &self.database_path)
            .field("poll_interval_secs", &self.poll_interval_secs)
            .field("fetch_timeout_secs", &self.fetch_timeout_secs)
            .field("max_concurrent_fetches", &self.max_concurrent_fetches)
            .field("backfill_on_add", &self.backfill_on_add)
            .field("default_embed", &self.default_embed)
            .field("channels", &self.channels)
            .finish()
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 7] = [
        "database_path",
        "poll_interval_secs",
        "fetch_timeout_secs",
        "max_concurrent_fetches",
        "backfill_on_add",
        "default_embed",
        "channels",
    ];

    const CHANNEL_KEYS: [&'static str; 2] = ["webhook_url", "embed"];

    /// Keys serde would silently drop, as dotted paths.
    fn unknown_keys(raw: &toml::Table) -> Vec<String> {
        let mut unknown = Vec::new();
        for (key, value) in raw {
            if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                unknown.push(key.clone());
                continue;
            }
            let Some(channels) = value.as_table().filter(|_| key == "channels") else {
                continue;
            };
            for (id, channel) in channels {
                let Some(channel) = channel.as_table() else {
                    continue;
                };
                unknown.extend(
                    channel
                        .keys()
                        .filter(|k| !Self::CHANNEL_KEYS.contains(&k.as_str()))
                        .map(|k| format!("channels.{id}.{k}")),
                );
            }
        }
        unknown
    }

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Zero interval, timeout or concurrency → `Err(ConfigError::Zero)`
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check size before reading so a huge file cannot exhaust memory
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in Self::unknown_keys(&raw) {
                tracing::warn!(key = %key, "Unknown key in config file, ignoring");
            }
        }

        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        tracing::info!(
            path = %path.display(),
            channels = config.channels.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Zero("poll_interval_secs"));
        }
        if self.fetch_timeout_secs == 0 {
            return Err(ConfigError::Zero("fetch_timeout_secs"));
        }
        if self.max_concurrent_fetches == 0 {
            return Err(ConfigError::Zero("max_concurrent_fetches"));
        }
        Ok(())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Database location, defaulting into `config_dir`.
    pub fn database_path(&self, config_dir: &Path) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| config_dir.join("feedrelay.db"))
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            interval: Duration::from_secs(self.poll_interval_secs),
            max_concurrent_fetches: self.max_concurrent_fetches,
            default_embed: self.default_embed,
            channel_embed: self
                .channels
                .iter()
                .filter_map(|(id, ch)| ch.embed.map(|embed| (id.clone(), embed)))
                .collect(),
        }
    }

    /// `(channel, webhook URL)` pairs for every channel that has one.
    pub fn webhooks(&self) -> impl Iterator<Item = (&str, &str)> {
        self.channels
            .iter()
            .filter_map(|(id, ch)| ch.webhook_url.as_deref().map(|url| (id.as_str(), url)))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(name: &str, content: &str) -> (PathBuf, PathBuf) {
        let dir = std::env::temp_dir().join(format!("feedrelay_config_test_{name}"));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.database_path, None);
        assert_eq!(config.poll_interval_secs, 300);
        assert_eq!(config.fetch_timeout_secs, 15);
        assert_eq!(config.max_concurrent_fetches, 4);
        assert!(!config.backfill_on_add);
        assert!(config.default_embed);
        assert!(config.channels.is_empty());
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/feedrelay_test_nonexistent_config.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config.poll_interval_secs, 300);
    }

    #[test]
    fn test_whitespace_only_file_returns_default() {
        let (dir, path) = write_config("whitespace", "   \n  \n  ");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.max_concurrent_fetches, 4);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let (dir, path) = write_config("partial", "poll_interval_secs = 60\n");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.poll_interval_secs, 60);
        assert_eq!(config.fetch_timeout_secs, 15);
        assert!(config.default_embed);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_full_config() {
        let content = r#"
database_path = "/var/lib/feedrelay/feeds.db"
poll_interval_secs = 120
fetch_timeout_secs = 30
max_concurrent_fetches = 8
backfill_on_add = true
default_embed = false

[channels.general]
webhook_url = "https://chat.example/api/webhooks/1/token"
embed = true

[channels.quiet]
"#;
        let (dir, path) = write_config("full", content);
        let config = Config::load(&path).unwrap();

        assert_eq!(
            config.database_path(Path::new("/ignored")),
            PathBuf::from("/var/lib/feedrelay/feeds.db")
        );
        assert_eq!(config.fetch_timeout(), Duration::from_secs(30));
        assert!(config.backfill_on_add);

        let settings = config.poll_settings();
        assert_eq!(settings.interval, Duration::from_secs(120));
        assert_eq!(settings.max_concurrent_fetches, 8);
        assert!(!settings.default_embed);
        assert_eq!(settings.channel_embed.get("general"), Some(&true));
        assert_eq!(settings.channel_embed.get("quiet"), None);

        let webhooks: Vec<_> = config.webhooks().collect();
        assert_eq!(
            webhooks,
            vec![("general", "https://chat.example/api/webhooks/1/token")]
        );

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_default_database_path() {
        let config = Config::default();
        assert_eq!(
            config.database_path(Path::new("/home/u/.config/feedrelay")),
            PathBuf::from("/home/u/.config/feedrelay/feedrelay.db")
        );
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let (dir, path) = write_config("invalid", "this is not [valid toml");
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_wrong_type_returns_error() {
        let (dir, path) = write_config("wrongtype", "poll_interval_secs = \"often\"\n");
        assert!(Config::load(&path).is_err());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_zero_values_rejected() {
        for key in ["poll_interval_secs", "fetch_timeout_secs", "max_concurrent_fetches"] {
            let (dir, path) = write_config(&format!("zero_{key}"), &format!("{key} = 0\n"));
            let err = Config::load(&path).unwrap_err();
            assert!(matches!(err, ConfigError::Zero(k) if k == key));
            std::fs::remove_dir_all(&dir).ok();
        }
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let (dir, path) = write_config("unknown", "poll_interval_secs = 90\nrefresh = 1\n");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.poll_interval_secs, 90);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_unknown_channel_keys_reported() {
        let raw: toml::Table = r#"
refresh = 1

[channels.general]
webhook = "https://chat.example/api/webhooks/1/token"
embed = true
"#
        .parse()
        .unwrap();
        assert_eq!(
            Config::unknown_keys(&raw),
            vec!["channels.general.webhook".to_string(), "refresh".to_string()]
        );

        // The misspelled key leaves the channel without a webhook
        let (dir, path) = write_config(
            "unknown_channel_key",
            "[channels.general]\nwebhook = \"https://chat.example/hook\"\n",
        );
        let config = Config::load(&path).unwrap();
        assert_eq!(config.webhooks().count(), 0);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_too_large_file_rejected() {
        let (dir, path) = write_config("too_large", &"a".repeat(1_048_577));
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        assert!(err.to_string().contains("too large"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_debug_masks_webhook_urls() {
        let mut config = Config::default();
        config.channels.insert(
            "general".into(),
            ChannelConfig {
                webhook_url: Some("https://chat.example/api/webhooks/1/super-secret".into()),
                embed: None,
            },
        );

        let debug_output = format!("{:?}", config);
        assert!(!debug_output.contains("super-secret"));
        assert!(debug_output.contains("[REDACTED]"));
    }
}
