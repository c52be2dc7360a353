//! Structured logging for Hermes.
//!
//! The runtime logs through `tracing` macros with structured fields
//! (`session_id`, `endpoint`, `category`, ...). This module installs the
//! subscriber that renders those events.
//!
//! # Example
//!
//! ```rust,ignore
//! use hermes_telemetry::logging::{LogConfig, LogFormat, init_logging};
//!
//! let config = LogConfig::default().with_format(LogFormat::Pretty);
//! init_logging(&config)?;
//!
//! tracing::info!(session_id = %id, endpoint = "/chat/{room}", "Session opened");
//! ```

use crate::error::TelemetryError;
use crate::TelemetryResult;
use serde::{Deserialize, Serialize};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Output format of log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line.
    #[default]
    Json,
    /// Multi-line human-readable output.
    Pretty,
    /// Single-line human-readable output.
    Compact,
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Whether logging is enabled.
    pub enabled: bool,

    /// Filter directive (e.g., "info", "hermes_ws=debug,tungstenite=warn").
    pub level: String,

    /// Output format.
    pub format: LogFormat,

    /// Whether to emit span open/close events.
    pub span_events: bool,

    /// Whether to include file/line info.
    pub file_line_info: bool,

    /// Whether to include thread IDs.
    pub thread_ids: bool,

    /// Whether to include target (module path).
    pub include_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
            format: LogFormat::Json,
            span_events: false,
            file_line_info: false,
            thread_ids: false,
            include_target: true,
        }
    }
}

impl LogConfig {
    /// Creates a development configuration with human-readable output.
    ///
    /// Thread IDs are on because stream readers run on their own threads.
    #[must_use]
    pub fn development() -> Self {
        Self {
            level: "debug".to_string(),
            format: LogFormat::Pretty,
            span_events: true,
            file_line_info: true,
            thread_ids: true,
            ..Self::default()
        }
    }

    /// Creates a production configuration with JSON output.
    #[must_use]
    pub fn production() -> Self {
        Self::default()
    }

    /// Sets the filter directive.
    #[must_use]
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Sets the output format.
    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Enables or disables logging.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Initializes the logging subsystem.
///
/// # Errors
///
/// Returns `TelemetryError::LoggingInit` if the filter is invalid or a
/// global subscriber is already installed.
pub fn init_logging(config: &LogConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let filter = create_env_filter(&config.level)?;

    let span_events = if config.span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let base = tracing_subscriber::fmt::layer()
        .with_span_events(span_events)
        .with_file(config.file_line_info)
        .with_line_number(config.file_line_info)
        .with_thread_ids(config.thread_ids)
        .with_target(config.include_target);

    let layer = match config.format {
        LogFormat::Json => base.json().with_filter(filter).boxed(),
        LogFormat::Pretty => base.pretty().with_filter(filter).boxed(),
        LogFormat::Compact => base.compact().with_filter(filter).boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .map_err(|e| TelemetryError::LoggingInit(e.to_string()))
}

/// Creates an env filter from a directive string.
///
/// # Errors
///
/// Returns error if the filter string is invalid.
pub fn create_env_filter(filter: &str) -> TelemetryResult<EnvFilter> {
    EnvFilter::try_new(filter)
        .map_err(|e| TelemetryError::LoggingInit(format!("Invalid log level: {e}")))
}

/// Standard log field names.
pub mod fields {
    /// Session ID field name.
    pub const SESSION_ID: &str = "session_id";

    /// Endpoint path template field name.
    pub const ENDPOINT: &str = "endpoint";

    /// Handler category field name.
    pub const CATEGORY: &str = "category";

    /// Message kind field name (text, binary, pong).
    pub const MESSAGE_KIND: &str = "message_kind";

    /// Payload length field name (bytes).
    pub const LENGTH: &str = "length";

    /// Close code field name.
    pub const CLOSE_CODE: &str = "close_code";

    /// Error field name.
    pub const ERROR: &str = "error";
}

/// Logs a session open event.
#[macro_export]
macro_rules! log_session_open {
    ($session_id:expr, $endpoint:expr) => {
        tracing::info!(
            session_id = %$session_id,
            endpoint = %$endpoint,
            "Session opened"
        );
    };
}

/// Logs a session close event.
#[macro_export]
macro_rules! log_session_close {
    ($session_id:expr, $code:expr, $phrase:expr) => {
        tracing::info!(
            session_id = %$session_id,
            close_code = $code,
            reason = %$phrase,
            "Session closed"
        );
    };
}

/// Logs a failure that was routed to an endpoint's error callback.
#[macro_export]
macro_rules! log_dispatch_error {
    ($session_id:expr, $error:expr) => {
        tracing::warn!(
            session_id = %$session_id,
            error = %$error,
            "Message dispatch failed"
        );
    };
}
