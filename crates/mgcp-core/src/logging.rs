use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::LogSettings;
use crate::error::{Error, Result};

/// Configuration for the logging system
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// The log level to use
    pub level: Level,
    /// Whether to enable JSON formatting
    pub json: bool,
    /// Whether to include file and line information
    pub file_info: bool,
    /// Whether to log spans
    pub log_spans: bool,
    /// Application name to include in logs
    pub app_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: Level::INFO,
            json: false,
            file_info: false,
            log_spans: false,
            app_name: "rvoip-mgcp".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn new(level: Level, app_name: impl Into<String>) -> Self {
        LoggingConfig {
            level,
            app_name: app_name.into(),
            ..Default::default()
        }
    }

    /// Build from the `[logging]` section of the gateway configuration
    pub fn from_settings(settings: &LogSettings) -> Result<Self> {
        let mut config = Self::new(parse_log_level(&settings.level)?, "rvoip-mgcp");
        config.json = settings.json;
        Ok(config)
    }

    pub fn with_json(mut self) -> Self {
        self.json = true;
        self
    }

    pub fn with_file_info(mut self) -> Self {
        self.file_info = true;
        self
    }

    pub fn with_spans(mut self) -> Self {
        self.log_spans = true;
        self
    }
}

/// Install the global subscriber.
///
/// Fails instead of panicking when a subscriber is already installed, so
/// embedding applications and tests can call it more than once.
pub fn setup_logging(config: LoggingConfig) -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive(config.level.into());

    let span_events = if config.log_spans {
        FmtSpan::ACTIVE
    } else {
        FmtSpan::NONE
    };

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_span_events(span_events)
        .with_file(config.file_info)
        .with_line_number(config.file_info);

    let installed = if config.json {
        subscriber.with_writer(std::io::stdout).json().try_init()
    } else {
        subscriber.try_init()
    };
    installed.map_err(|e| Error::logging(e.to_string()))?;

    tracing::info!(app = %config.app_name, "logging initialized");
    Ok(())
}

/// Parse a log level from a string
pub fn parse_log_level(level: &str) -> Result<Level> {
    Level::from_str(level).map_err(|_| Error::logging(format!("Invalid log level: {}", level)))
}
