use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::BotConfig;

/// Where and how verbosely to log.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LogConfig {
    /// Append to this file instead of writing to stdout
    pub log_file: Option<PathBuf>,
    /// Include teloxide's request-level debug output
    pub telegram_debug: bool,
}

impl From<&BotConfig> for LogConfig {
    fn from(config: &BotConfig) -> Self {
        Self {
            log_file: config.log_file_path.clone(),
            telegram_debug: config.telegram_debug_enabled,
        }
    }
}

impl LogConfig {
    /// Default directives, overridable through `RUST_LOG`.
    pub fn directives(&self) -> String {
        let mut directives = String::from("info,bastubot=debug");
        if self.telegram_debug {
            directives.push_str(",teloxide=debug,teloxide_core=debug");
        }
        directives
    }
}

/// Install the global subscriber. The returned guard flushes the file
/// writer and must live as long as the process logs.
pub fn init(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.directives()));

    match &config.log_file {
        Some(path) => {
            let appender = open_appender(path)?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(writer)
                        .with_ansi(false),
                )
                .try_init()
                .context("Failed to install log subscriber")?;
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .try_init()
                .context("Failed to install log subscriber")?;
            Ok(None)
        }
    }
}

/// Open `path` for appending; the file is never rotated.
fn open_appender(path: &Path) -> Result<RollingFileAppender> {
    let file_name = path
        .file_name()
        .with_context(|| format!("Log file path has no file name: {}", path.display()))?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(file_name.to_string_lossy())
        .build(dir)
        .with_context(|| format!("Failed to open log file {}", path.display()))
}
