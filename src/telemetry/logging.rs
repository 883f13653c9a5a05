//! Process-level logging setup
//!
//! The library only emits `tracing` events. Applications that want them on
//! the console or in rolling files call [`init_logging`] once at startup and
//! keep the returned [`LoggingGuard`] alive until exit.

use crate::KansatsuError;
use std::path::PathBuf;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt};
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for console and file logging
#[derive(Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `kansatsu=debug,reqwest=warn`
    pub level: String,
    /// Directory for daily-rolling log files; console only when unset
    pub log_dir: Option<PathBuf>,
    /// Emit JSON lines instead of human-readable text
    pub json_format: bool,
    /// Whether to write to stderr
    pub console_enabled: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: None,
            json_format: false,
            console_enabled: true,
        }
    }
}

impl LoggingConfig {
    /// Read `KANSATSU_LOG_LEVEL`, `KANSATSU_LOG_DIR` and `KANSATSU_JSON_LOGS`
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(level) = std::env::var("KANSATSU_LOG_LEVEL") {
            config.level = level;
        }

        if let Ok(log_dir) = std::env::var("KANSATSU_LOG_DIR") {
            if !log_dir.is_empty() {
                config.log_dir = Some(PathBuf::from(log_dir));
            }
        }

        if let Ok(json) = std::env::var("KANSATSU_JSON_LOGS") {
            config.json_format = json.parse().unwrap_or(false);
        }

        config
    }

    fn filter(&self) -> EnvFilter {
        let filter = EnvFilter::try_new(&self.level).unwrap_or_else(|_| EnvFilter::new("info"));
        ["hyper=warn", "h2=warn", "reqwest=warn", "tokio=warn"]
            .into_iter()
            .filter_map(|directive| directive.parse().ok())
            .fold(filter, |filter, directive| filter.add_directive(directive))
    }
}

/// Guard that must be kept alive for the duration of the application
/// to ensure file logs are flushed
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

impl std::fmt::Debug for LoggingGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoggingGuard")
            .field("file_logging", &self._file_guard.is_some())
            .finish()
    }
}

/// Install the global subscriber
///
/// Fails if the log directory cannot be created or a global subscriber is
/// already installed.
pub fn init_logging(config: LoggingConfig) -> Result<LoggingGuard, KansatsuError> {
    let mut layers = Vec::new();
    let mut file_guard = None;

    if let Some(log_dir) = &config.log_dir {
        std::fs::create_dir_all(log_dir).map_err(|e| {
            KansatsuError::configuration_error(format!("Failed to create log directory: {}", e))
        })?;

        let file_appender = tracing_appender::rolling::daily(log_dir, "kansatsu.log");
        let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
        file_guard = Some(guard);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_writer)
            .with_ansi(false)
            .with_span_events(FmtSpan::CLOSE)
            .with_timer(tracing_subscriber::fmt::time::ChronoUtc::new(
                "%Y-%m-%d %H:%M:%S%.3f UTC".to_string(),
            ))
            .with_file(true)
            .with_line_number(true)
            .with_target(true);

        layers.push(if config.json_format {
            file_layer.json().with_filter(config.filter()).boxed()
        } else {
            file_layer.with_filter(config.filter()).boxed()
        });
    }

    if config.console_enabled {
        let console_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_span_events(FmtSpan::NONE)
            .with_target(true);

        layers.push(if config.json_format {
            console_layer.json().with_filter(config.filter()).boxed()
        } else {
            console_layer.with_ansi(true).with_filter(config.filter()).boxed()
        });
    }

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .map_err(|e| KansatsuError::configuration_error(format!("Logging already initialized: {}", e)))?;

    info!(
        level = %config.level,
        log_dir = ?config.log_dir,
        json_format = config.json_format,
        "Kansatsu logging initialized"
    );

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_config_default() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "info");
        assert!(config.log_dir.is_none());
        assert!(!config.json_format);
        assert!(config.console_enabled);
    }

    #[test]
    fn test_invalid_level_falls_back() {
        let config = LoggingConfig {
            level: "not a [valid directive".to_string(),
            ..Default::default()
        };
        // Must not panic
        let _ = config.filter();
    }
}
