//! Root configuration types.

use std::time::Duration;

use hermes_telemetry::{LogConfig, LogFormat, MetricsConfig};
use hermes_ws::SessionConfig;
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Complete Hermes runtime configuration.
///
/// # Example
///
/// ```
/// use hermes_config::HermesConfig;
///
/// let config = HermesConfig::default();
/// assert_eq!(config.container.incoming_buffer_size, 4_194_315);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct HermesConfig {
    /// Session defaults applied by the server container.
    #[serde(default)]
    pub container: ContainerSection,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingSection,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsSection,
}

/// `[container]` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct ContainerSection {
    /// Largest reassembled text message, in bytes.
    pub max_text_buffer_size: usize,
    /// Largest reassembled binary message, in bytes.
    pub max_binary_buffer_size: usize,
    /// Largest single inbound frame, in bytes.
    pub incoming_buffer_size: usize,
    /// Idle timeout in milliseconds; absent means no timeout.
    pub max_idle_timeout_ms: Option<u64>,
}

impl Default for ContainerSection {
    fn default() -> Self {
        let session = SessionConfig::default();
        Self {
            max_text_buffer_size: session.max_text_buffer_size,
            max_binary_buffer_size: session.max_binary_buffer_size,
            incoming_buffer_size: session.incoming_buffer_size,
            max_idle_timeout_ms: None,
        }
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct LoggingSection {
    /// Whether logging is enabled.
    pub enabled: bool,
    /// Filter directive.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

/// `[metrics]` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct MetricsSection {
    /// Whether the Prometheus recorder is installed.
    pub enabled: bool,
    /// Payload size histogram buckets, in bytes.
    pub size_buckets: Vec<f64>,
}

impl Default for MetricsSection {
    fn default() -> Self {
        let metrics = MetricsConfig::default();
        Self {
            enabled: metrics.enabled,
            size_buckets: metrics.size_buckets,
        }
    }
}

impl HermesConfig {
    /// Development preset: pretty debug logs, metrics off.
    #[must_use]
    pub fn development() -> Self {
        Self {
            logging: LoggingSection {
                enabled: true,
                level: "debug".to_string(),
                format: LogFormat::Pretty,
            },
            metrics: MetricsSection {
                enabled: false,
                ..MetricsSection::default()
            },
            ..Self::default()
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.container;
        for (field, value) in [
            ("container.max_text_buffer_size", c.max_text_buffer_size),
            ("container.max_binary_buffer_size", c.max_binary_buffer_size),
            ("container.incoming_buffer_size", c.incoming_buffer_size),
        ] {
            if value == 0 {
                return Err(ConfigError::invalid_value(field, "must be greater than 0"));
            }
        }
        if c.max_idle_timeout_ms == Some(0) {
            return Err(ConfigError::invalid_value(
                "container.max_idle_timeout_ms",
                "must be greater than 0 when set",
            ));
        }

        if self.logging.enabled {
            hermes_telemetry::logging::create_env_filter(&self.logging.level)
                .map_err(|e| ConfigError::invalid_value("logging.level", e.to_string()))?;
        }

        if self.metrics.enabled {
            let buckets = &self.metrics.size_buckets;
            if buckets.is_empty() {
                return Err(ConfigError::invalid_value(
                    "metrics.size_buckets",
                    "must not be empty",
                ));
            }
            if buckets.windows(2).any(|w| w[0] >= w[1]) {
                return Err(ConfigError::invalid_value(
                    "metrics.size_buckets",
                    "must be strictly ascending",
                ));
            }
        }

        Ok(())
    }

    /// Session defaults for the server container.
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        let c = &self.container;
        let mut session = SessionConfig::default()
            .with_max_text_buffer_size(c.max_text_buffer_size)
            .with_max_binary_buffer_size(c.max_binary_buffer_size)
            .with_incoming_buffer_size(c.incoming_buffer_size);
        if let Some(ms) = c.max_idle_timeout_ms {
            session = session.with_max_idle_timeout(Duration::from_millis(ms));
        }
        session
    }

    /// Logging configuration for `hermes_telemetry::init_logging`.
    #[must_use]
    pub fn log_config(&self) -> LogConfig {
        LogConfig::default()
            .with_enabled(self.logging.enabled)
            .with_level(self.logging.level.clone())
            .with_format(self.logging.format)
    }

    /// Metrics configuration for `hermes_telemetry::init_metrics`.
    #[must_use]
    pub fn metrics_config(&self) -> MetricsConfig {
        MetricsConfig {
            enabled: self.metrics.enabled,
            size_buckets: self.metrics.size_buckets.clone(),
        }
    }
}
