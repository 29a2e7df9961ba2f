use std::path::{Path, PathBuf};

use clap::{ArgAction, Parser};
use serde::Deserialize;
use thiserror::Error;

use crate::sensor::DEFAULT_SENSOR_URL;

/// Command-line flags. Unset flags fall back to the config file, then to
/// built-in defaults.
#[derive(Debug, Parser, Default)]
#[command(name = "bastubot", about = "Telegram bot reporting the sauna temperature")]
pub struct Cli {
    /// Channel ID to be used
    #[arg(long, allow_negative_numbers = true)]
    pub channel: Option<i64>,

    /// Bot API token to be used
    #[arg(long)]
    pub apikey: Option<String>,

    /// Turns on debug for telegram
    #[arg(long = "telegram-debug", num_args = 0..=1, default_missing_value = "true", action = ArgAction::Set)]
    pub telegram_debug: Option<bool>,

    /// Turns on stdout rather than sending to telegram
    #[arg(long, num_args = 0..=1, default_missing_value = "true", action = ArgAction::Set)]
    pub stdout: Option<bool>,

    /// Sends a test message to specified telegram channel
    #[arg(long = "telegram-test", num_args = 0..=1, default_missing_value = "true", action = ArgAction::Set)]
    pub telegram_test: Option<bool>,

    /// Path to log file (default: stdout)
    #[arg(long)]
    pub logfile: Option<PathBuf>,

    /// URL of the sensor bridge
    #[arg(long = "sensor-url")]
    pub sensor_url: Option<String>,

    /// Optional TOML file providing defaults for the flags above
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// Same keys as the flags, all optional.
#[derive(Debug, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub channel: Option<i64>,
    pub apikey: Option<String>,
    pub telegram_debug: Option<bool>,
    pub stdout: Option<bool>,
    pub telegram_test: Option<bool>,
    pub logfile: Option<PathBuf>,
    pub sensor_url: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::File {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::File {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("No channel ID provided")]
    MissingChannel,

    #[error("No API key provided")]
    MissingApiKey,

    #[error("Failed to load config file {}: {reason}", path.display())]
    File { path: PathBuf, reason: String },
}

/// Process-wide settings, fixed once bootstrap has finished.
#[derive(Debug, Clone, PartialEq)]
pub struct BotConfig {
    pub channel_id: i64,
    pub api_key: String,
    pub telegram_debug_enabled: bool,
    pub stdout_debug_enabled: bool,
    pub send_test_message: bool,
    pub log_file_path: Option<PathBuf>,
    pub sensor_url: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            channel_id: 0,
            api_key: String::new(),
            telegram_debug_enabled: false,
            stdout_debug_enabled: false,
            send_test_message: false,
            log_file_path: None,
            sensor_url: DEFAULT_SENSOR_URL.to_string(),
        }
    }
}

impl BotConfig {
    /// Read the config file named by `--config`, if any, and layer the
    /// flags on top of it.
    pub fn load(cli: Cli) -> Result<Self, ConfigError> {
        let file = match &cli.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Ok(Self::merge(cli, file))
    }

    pub fn merge(cli: Cli, file: FileConfig) -> Self {
        let defaults = Self::default();
        Self {
            channel_id: cli.channel.or(file.channel).unwrap_or(defaults.channel_id),
            api_key: cli.apikey.or(file.apikey).unwrap_or(defaults.api_key),
            telegram_debug_enabled: cli
                .telegram_debug
                .or(file.telegram_debug)
                .unwrap_or(defaults.telegram_debug_enabled),
            stdout_debug_enabled: cli
                .stdout
                .or(file.stdout)
                .unwrap_or(defaults.stdout_debug_enabled),
            send_test_message: cli
                .telegram_test
                .or(file.telegram_test)
                .unwrap_or(defaults.send_test_message),
            log_file_path: cli.logfile.or(file.logfile),
            sensor_url: cli
                .sensor_url
                .or(file.sensor_url)
                .unwrap_or(defaults.sensor_url),
        }
    }

    /// Required settings must be present before anything touches the network.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel_id == 0 {
            return Err(ConfigError::MissingChannel);
        }
        if self.api_key.is_empty() {
            return Err(ConfigError::MissingApiKey);
        }
        Ok(())
    }
}
