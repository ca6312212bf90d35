//! Logging Configuration and Initialization
//!
//! Centralized logging setup for all CFDP components. Supports:
//!
//! - Multiple output targets (console, file, both)
//! - Text or JSON output
//! - Configurable log levels and per-crate filter directives
//! - Daily log file rotation
//! - Environment-based configuration
//!
//! Use structured logging macros (`trace!`, `debug!`, `info!`, `warn!`,
//! `error!`) with fields rather than `println!`:
//!
//! ```rust
//! use tracing::info;
//! # let job_id = "j";
//! info!(job_id = %job_id, "Import started");
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

/// Where log output goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogTarget {
    #[default]
    Console,
    File,
    Both,
}

impl std::str::FromStr for LogTarget {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "console" | "stdout" => Ok(LogTarget::Console),
            "file" => Ok(LogTarget::File),
            "both" => Ok(LogTarget::Both),
            _ => Err(anyhow::anyhow!("Invalid log target: {}", s)),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Output target
    pub target: LogTarget,
    /// Emit JSON instead of human-readable text
    pub json: bool,
    /// Directory for log files (when target includes file output)
    pub log_dir: PathBuf,
    /// Log file name prefix
    pub file_prefix: String,
    /// EnvFilter directives, e.g. "cfdp_server=debug,sqlx=warn"
    pub filter_directives: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            target: LogTarget::Console,
            json: false,
            log_dir: PathBuf::from("logs"),
            file_prefix: "cfdp".to_string(),
            filter_directives: "info".to_string(),
        }
    }
}

impl LogConfig {
    /// Load configuration from `CFDP_LOG_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(target) = std::env::var("CFDP_LOG_TARGET") {
            config.target = target.parse()?;
        }
        if let Ok(json) = std::env::var("CFDP_LOG_JSON") {
            config.json = json.parse().unwrap_or(false);
        }
        if let Ok(dir) = std::env::var("CFDP_LOG_DIR") {
            config.log_dir = PathBuf::from(dir);
        }
        if let Ok(prefix) = std::env::var("CFDP_LOG_PREFIX") {
            config.file_prefix = prefix;
        }
        if let Ok(filter) = std::env::var("RUST_LOG") {
            config.filter_directives = filter;
        } else if let Ok(filter) = std::env::var("CFDP_LOG_FILTER") {
            config.filter_directives = filter;
        }

        Ok(config)
    }

    /// Override the filter directives.
    pub fn with_filter(mut self, directives: impl Into<String>) -> Self {
        self.filter_directives = directives.into();
        self
    }

    /// Override the log file prefix.
    pub fn with_file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.file_prefix = prefix.into();
        self
    }
}

/// Initialize the global tracing subscriber.
///
/// Returns a guard that must be held for the lifetime of the program when
/// file output is enabled; dropping it flushes buffered log lines.
pub fn init_logging(config: &LogConfig) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter = EnvFilter::try_new(&config.filter_directives)
        .context("Invalid log filter directives")?;

    let mut guard = None;

    match config.target {
        LogTarget::Console => {
            let registry = tracing_subscriber::registry().with(filter);
            if config.json {
                registry.with(fmt::layer().json()).try_init().ok();
            } else {
                registry.with(fmt::layer()).try_init().ok();
            }
        }
        LogTarget::File | LogTarget::Both => {
            std::fs::create_dir_all(&config.log_dir)
                .with_context(|| format!("Failed to create log directory {:?}", config.log_dir))?;
            let appender =
                tracing_appender::rolling::daily(&config.log_dir, &config.file_prefix);
            let (writer, g) = tracing_appender::non_blocking(appender);
            guard = Some(g);

            let file_layer = fmt::layer().with_writer(writer).with_ansi(false);
            let registry = tracing_subscriber::registry().with(filter).with(file_layer);
            if config.target == LogTarget::Both {
                registry.with(fmt::layer()).try_init().ok();
            } else {
                registry.try_init().ok();
            }
        }
    }

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_target_from_str() {
        assert_eq!("console".parse::<LogTarget>().unwrap(), LogTarget::Console);
        assert_eq!("file".parse::<LogTarget>().unwrap(), LogTarget::File);
        assert_eq!("both".parse::<LogTarget>().unwrap(), LogTarget::Both);
        assert!("syslog".parse::<LogTarget>().is_err());
    }

    #[test]
    fn test_log_config_defaults() {
        let config = LogConfig::default();
        assert_eq!(config.target, LogTarget::Console);
        assert!(!config.json);
        assert_eq!(config.filter_directives, "info");
    }

    #[test]
    fn test_log_config_with_overrides() {
        let config = LogConfig::default()
            .with_filter("cfdp_server=debug")
            .with_file_prefix("cfdp-test");
        assert_eq!(config.filter_directives, "cfdp_server=debug");
        assert_eq!(config.file_prefix, "cfdp-test");
    }
}
