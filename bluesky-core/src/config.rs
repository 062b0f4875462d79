//! Kernel configuration.
//!
//! The config file is JSON, selected by the `BLUESKY_CONFIG` environment
//! variable; absence of the variable (or the file) means defaults. Logger
//! keys mirror the process-wide option names from the external interface:
//! `logger.file-name`, `logger.file-size`, `logger.file-format`,
//! `logger.console-format`, `logger.flush-level`, `logger.flush-interval`.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "BLUESKY_CONFIG";

/// Sentinel for an infinite request timeout.
pub const TIMEOUT_INFINITE: u64 = 0;

/// Logger subsystem configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct LoggerConfig {
    /// Log file path; empty disables file output.
    pub file_name: String,
    /// Maximum log file size in bytes before truncation on open.
    pub file_size: u64,
    /// File record format: `plain` or `json`.
    pub file_format: String,
    /// Console record format: `plain` or `json`.
    pub console_format: String,
    /// Minimal level that is flushed: trace, debug, info, warn, error.
    pub flush_level: String,
    /// Flush interval in milliseconds.
    pub flush_interval: u64,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            file_name: String::new(),
            file_size: 16 * 1024 * 1024,
            file_format: "plain".to_owned(),
            console_format: "plain".to_owned(),
            flush_level: "info".to_owned(),
            flush_interval: 1000,
        }
    }
}

/// Process-wide kernel configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct KernelConfig {
    /// Logger options.
    pub logger: LoggerConfig,
    /// Default timeout for blocking requests, in milliseconds.
    /// [`TIMEOUT_INFINITE`] disables timeouts.
    pub timeout_ms: u64,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            logger: LoggerConfig::default(),
            timeout_ms: 30_000,
        }
    }
}

impl KernelConfig {
    /// Load the config from the file named by [`CONFIG_ENV`].
    ///
    /// A missing variable, missing file or unparsable content falls back to
    /// defaults; a parse failure is reported through tracing.
    pub fn load() -> Self {
        let Some(path) = std::env::var_os(CONFIG_ENV).map(PathBuf::from) else {
            return Self::default();
        };
        let Ok(raw) = std::fs::read_to_string(&path) else {
            tracing::warn!(path = %path.display(), "config file is unreadable, using defaults");
            return Self::default();
        };
        match serde_json::from_str(&raw) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "bad config file, using defaults");
                Self::default()
            }
        }
    }

    /// Default request timeout; `None` means infinite.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms != TIMEOUT_INFINITE).then(|| Duration::from_millis(self.timeout_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_have_finite_timeout() {
        let cfg = KernelConfig::default();
        assert_eq!(cfg.timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn zero_means_infinite() {
        let cfg = KernelConfig {
            timeout_ms: TIMEOUT_INFINITE,
            ..Default::default()
        };
        assert_eq!(cfg.timeout(), None);
    }

    #[test]
    fn parses_kebab_case_keys() {
        let cfg: KernelConfig = serde_json::from_str(
            r#"{
                "logger": { "file-name": "/tmp/bs.log", "flush-level": "debug" },
                "timeout-ms": 5000
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.logger.file_name, "/tmp/bs.log");
        assert_eq!(cfg.logger.flush_level, "debug");
        assert_eq!(cfg.timeout_ms, 5000);
    }
}
