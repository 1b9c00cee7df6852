/// Configuration management
use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const DEFAULT_PAGE_SIZE: usize = 50;

/// Synchronizer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Limit passed to `fetch_chats`
    pub chat_page_size: usize,

    /// Limit passed to `fetch_messages`
    pub message_page_size: usize,

    /// Lazy re-fetches allowed per unknown entity before events for it are dropped
    pub max_hydrate_attempts: u32,

    /// Capacity of each subscription channel
    pub event_buffer: usize,

    /// Capacity of each runtime command channel
    pub command_buffer: usize,

    /// Offset from UTC used to decide calendar days for date separators
    pub utc_offset_secs: i32,

    /// How many recent reactors are kept per reaction group
    pub max_recent_reactors: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            chat_page_size: DEFAULT_PAGE_SIZE,
            message_page_size: DEFAULT_PAGE_SIZE,
            max_hydrate_attempts: 3,
            event_buffer: 256,
            command_buffer: 64,
            utc_offset_secs: 0,
            max_recent_reactors: 3,
        }
    }
}

/// Arguments left over after flag parsing, plus the parsed config
#[derive(Debug, Clone)]
pub struct CliArgs {
    pub config: SyncConfig,
    pub fixture: PathBuf,
    pub folder: Option<String>,
    pub chat: Option<i64>,
}

impl SyncConfig {
    /// Load a config from a JSON file. Missing fields keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(SyncError::Io)?;
        let config: SyncConfig = serde_json::from_str(&raw).map_err(SyncError::Serialization)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse `chatsync <fixture.json> [flags]`
    pub fn from_args(args: &[String]) -> Result<CliArgs> {
        if args.len() < 2 {
            return Err(SyncError::Config(format!(
                "Usage: {} <fixture.json> [--config <path>] [--folder <name>] [--chat <id>] [--chat-page-size <n>] [--message-page-size <n>] [--utc-offset <secs>]",
                args.first().map(String::as_str).unwrap_or("chatsync")
            )));
        }

        let fixture = PathBuf::from(&args[1]);
        let mut config_path: Option<PathBuf> = None;
        let mut folder: Option<String> = None;
        let mut chat: Option<i64> = None;
        let mut chat_page_size: Option<usize> = None;
        let mut message_page_size: Option<usize> = None;
        let mut utc_offset_secs: Option<i32> = None;

        let mut i = 2;
        while i < args.len() {
            let value = |name: &str| {
                args.get(i + 1).ok_or_else(|| {
                    SyncError::Config(format!("{} requires an argument", name))
                })
            };
            match args[i].as_str() {
                "--config" => {
                    config_path = Some(PathBuf::from(value("--config")?));
                    i += 2;
                }
                "--folder" => {
                    folder = Some(value("--folder")?.clone());
                    i += 2;
                }
                "--chat" => {
                    chat = Some(parse_flag(value("--chat")?, "--chat")?);
                    i += 2;
                }
                "--chat-page-size" => {
                    chat_page_size = Some(parse_flag(value("--chat-page-size")?, "--chat-page-size")?);
                    i += 2;
                }
                "--message-page-size" => {
                    message_page_size =
                        Some(parse_flag(value("--message-page-size")?, "--message-page-size")?);
                    i += 2;
                }
                "--utc-offset" => {
                    utc_offset_secs = Some(parse_flag(value("--utc-offset")?, "--utc-offset")?);
                    i += 2;
                }
                other => {
                    return Err(SyncError::Config(format!("Unknown argument: {}", other)));
                }
            }
        }

        let mut config = match config_path {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        if let Some(n) = chat_page_size {
            config.chat_page_size = n;
        }
        if let Some(n) = message_page_size {
            config.message_page_size = n;
        }
        if let Some(secs) = utc_offset_secs {
            config.utc_offset_secs = secs;
        }

        config.apply_env();
        config.validate()?;

        Ok(CliArgs {
            config,
            fixture,
            folder,
            chat,
        })
    }

    /// Env overrides (nice for scripts)
    pub fn apply_env(&mut self) {
        if let Some(n) = env_parse::<usize>("CHATSYNC_CHAT_PAGE_SIZE") {
            self.chat_page_size = n;
        }
        if let Some(n) = env_parse::<usize>("CHATSYNC_MESSAGE_PAGE_SIZE") {
            self.message_page_size = n;
        }
        if let Some(n) = env_parse::<u32>("CHATSYNC_MAX_HYDRATE_ATTEMPTS") {
            self.max_hydrate_attempts = n;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.chat_page_size == 0 || self.message_page_size == 0 {
            return Err(SyncError::Config("page sizes must be at least 1".to_string()));
        }
        if self.event_buffer == 0 || self.command_buffer == 0 {
            return Err(SyncError::Config("channel buffers must be at least 1".to_string()));
        }
        // chrono::FixedOffset only accepts offsets strictly inside one day
        if self.utc_offset_secs.unsigned_abs() >= 86_400 {
            return Err(SyncError::Config(format!(
                "utc offset out of range: {}",
                self.utc_offset_secs
            )));
        }
        Ok(())
    }
}

fn parse_flag<T: std::str::FromStr>(raw: &str, name: &str) -> Result<T> {
    raw.parse::<T>()
        .map_err(|_| SyncError::Config(format!("{} got an invalid value: {}", name, raw)))
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse::<T>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_from_args_requires_fixture() {
        let err = SyncConfig::from_args(&args(&["chatsync"])).unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[test]
    fn test_from_args_flags() {
        let parsed = SyncConfig::from_args(&args(&[
            "chatsync",
            "fixture.json",
            "--folder",
            "archive",
            "--chat",
            "-100",
            "--message-page-size",
            "20",
            "--utc-offset",
            "3600",
        ]))
        .unwrap();

        assert_eq!(parsed.fixture, PathBuf::from("fixture.json"));
        assert_eq!(parsed.folder.as_deref(), Some("archive"));
        assert_eq!(parsed.chat, Some(-100));
        assert_eq!(parsed.config.message_page_size, 20);
        assert_eq!(parsed.config.utc_offset_secs, 3600);
    }

    #[test]
    fn test_from_args_rejects_bad_values() {
        let err = SyncConfig::from_args(&args(&["chatsync", "f.json", "--chat", "abc"])).unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));

        let err = SyncConfig::from_args(&args(&["chatsync", "f.json", "--folder"])).unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));

        let err =
            SyncConfig::from_args(&args(&["chatsync", "f.json", "--chat-page-size", "0"])).unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[test]
    fn test_from_file_keeps_defaults_for_missing_fields() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("sync.json");
        std::fs::write(&path, r#"{ "chat_page_size": 10, "max_hydrate_attempts": 1 }"#).unwrap();

        let config = SyncConfig::from_file(&path).unwrap();
        assert_eq!(config.chat_page_size, 10);
        assert_eq!(config.max_hydrate_attempts, 1);
        assert_eq!(config.message_page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(config.max_recent_reactors, 3);
    }

    #[test]
    fn test_from_file_rejects_bad_offset() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("sync.json");
        std::fs::write(&path, r#"{ "utc_offset_secs": 90000 }"#).unwrap();

        assert!(matches!(
            SyncConfig::from_file(&path),
            Err(SyncError::Config(_))
        ));
    }
}
