//! Prometheus metrics for Hermes.
//!
//! # Standard Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `hermes_ws_sessions_opened_total` | Counter | `endpoint` | Sessions opened |
//! | `hermes_ws_sessions_closed_total` | Counter | `endpoint`, `code` | Sessions closed |
//! | `hermes_ws_active_sessions` | Gauge | `endpoint` | Open sessions |
//! | `hermes_ws_messages_received_total` | Counter | `endpoint`, `kind` | Inbound messages |
//! | `hermes_ws_messages_sent_total` | Counter | `endpoint`, `kind` | Outbound messages |
//! | `hermes_ws_message_size_bytes` | Histogram | `endpoint`, `direction` | Payload sizes |
//! | `hermes_ws_errors_total` | Counter | `endpoint`, `kind` | Errors routed to endpoints |
//!
//! # Example
//!
//! ```rust,ignore
//! use hermes_telemetry::metrics::{init_metrics, record_message_received, MetricsConfig};
//!
//! init_metrics(&MetricsConfig::default())?;
//! record_message_received("/chat/{room}", "text", 42);
//! ```

use crate::error::TelemetryError;
use crate::TelemetryResult;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

/// Sessions opened counter.
pub const SESSIONS_OPENED: &str = "hermes_ws_sessions_opened_total";
/// Sessions closed counter.
pub const SESSIONS_CLOSED: &str = "hermes_ws_sessions_closed_total";
/// Open sessions gauge.
pub const ACTIVE_SESSIONS: &str = "hermes_ws_active_sessions";
/// Inbound messages counter.
pub const MESSAGES_RECEIVED: &str = "hermes_ws_messages_received_total";
/// Outbound messages counter.
pub const MESSAGES_SENT: &str = "hermes_ws_messages_sent_total";
/// Payload size histogram.
pub const MESSAGE_SIZE: &str = "hermes_ws_message_size_bytes";
/// Errors counter.
pub const ERRORS: &str = "hermes_ws_errors_total";

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics configuration.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Whether metrics are enabled.
    pub enabled: bool,

    /// Histogram buckets for payload sizes, in bytes.
    pub size_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            // 64 B up to 1 MiB
            size_buckets: vec![
                64.0, 256.0, 1024.0, 4096.0, 8192.0, 16384.0, 65536.0, 262_144.0, 1_048_576.0,
            ],
        }
    }
}

impl MetricsConfig {
    /// Enables or disables metrics.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Installs the Prometheus recorder as the global `metrics` recorder.
///
/// The rendered exposition is available through [`render_metrics`]; serving
/// it over HTTP is left to the embedding application.
///
/// # Errors
///
/// Returns `TelemetryError::MetricsInit` if a recorder is already installed
/// or the bucket list is rejected.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }
    if config.size_buckets.is_empty() {
        return Err(TelemetryError::InvalidConfig(
            "size_buckets must not be empty".to_string(),
        ));
    }

    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(MESSAGE_SIZE.to_string()), &config.size_buckets)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?
        .install_recorder()
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    let _ = METRICS_HANDLE.set(handle);
    describe_metrics();
    Ok(())
}

/// Renders metrics in Prometheus text format.
///
/// Returns `None` if metrics are not initialized.
#[must_use]
pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

/// Registers help text for every standard metric.
///
/// Called by [`init_metrics`]; exposed for applications that install their
/// own recorder.
pub fn describe_metrics() {
    describe_counter!(SESSIONS_OPENED, "Total number of WebSocket sessions opened");
    describe_counter!(SESSIONS_CLOSED, "Total number of WebSocket sessions closed by close code");
    describe_gauge!(ACTIVE_SESSIONS, "Number of WebSocket sessions currently open");
    describe_counter!(MESSAGES_RECEIVED, "Total inbound messages by kind");
    describe_counter!(MESSAGES_SENT, "Total outbound messages by kind");
    describe_histogram!(MESSAGE_SIZE, "Message payload size in bytes");
    describe_counter!(ERRORS, "Total errors delivered to endpoint error callbacks");
}

/// Records a newly opened session.
pub fn record_session_opened(endpoint: &str) {
    counter!(SESSIONS_OPENED, "endpoint" => endpoint.to_string()).increment(1);
    gauge!(ACTIVE_SESSIONS, "endpoint" => endpoint.to_string()).increment(1.0);
}

/// Records a closed session with its close code.
pub fn record_session_closed(endpoint: &str, code: u16) {
    counter!(
        SESSIONS_CLOSED,
        "endpoint" => endpoint.to_string(),
        "code" => code.to_string()
    )
    .increment(1);
    gauge!(ACTIVE_SESSIONS, "endpoint" => endpoint.to_string()).decrement(1.0);
}

/// Records an inbound message.
///
/// `kind` is one of `text`, `binary`, `pong`.
pub fn record_message_received(endpoint: &str, kind: &'static str, size_bytes: usize) {
    counter!(
        MESSAGES_RECEIVED,
        "endpoint" => endpoint.to_string(),
        "kind" => kind
    )
    .increment(1);
    histogram!(
        MESSAGE_SIZE,
        "endpoint" => endpoint.to_string(),
        "direction" => "in"
    )
    .record(size_bytes as f64);
}

/// Records an outbound message.
pub fn record_message_sent(endpoint: &str, kind: &'static str, size_bytes: usize) {
    counter!(
        MESSAGES_SENT,
        "endpoint" => endpoint.to_string(),
        "kind" => kind
    )
    .increment(1);
    histogram!(
        MESSAGE_SIZE,
        "endpoint" => endpoint.to_string(),
        "direction" => "out"
    )
    .record(size_bytes as f64);
}

/// Records an error delivered to an endpoint.
///
/// `kind` is a short stable label such as `decode` or `too_big`.
pub fn record_error(endpoint: &str, kind: &'static str) {
    counter!(
        ERRORS,
        "endpoint" => endpoint.to_string(),
        "kind" => kind
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MetricsConfig::default();
        assert!(config.enabled);
        assert!(config.size_buckets.contains(&8192.0));
    }

    #[test]
    fn test_disabled_metrics_is_noop() {
        let config = MetricsConfig::default().with_enabled(false);
        assert!(init_metrics(&config).is_ok());
    }

    #[test]
    fn test_empty_buckets_rejected() {
        let config = MetricsConfig {
            enabled: true,
            size_buckets: Vec::new(),
        };
        assert!(matches!(
            init_metrics(&config),
            Err(TelemetryError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_record_functions_dont_panic() {
        // No recorder installed: the metrics facade drops the samples.
        record_session_opened("/echo");
        record_message_received("/echo", "text", 5);
        record_message_sent("/echo", "binary", 10);
        record_error("/echo", "decode");
        record_session_closed("/echo", 1000);
    }
}
