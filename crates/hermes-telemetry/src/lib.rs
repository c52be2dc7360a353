//! Logging and metrics for the Hermes WebSocket runtime.
//!
//! - **Logging**: structured `tracing` output, JSON or human-readable
//! - **Metrics**: Prometheus exposition via the `metrics` facade
//!
//! The runtime crates only emit through `tracing` and `metrics` macros; this
//! crate installs the global subscriber and recorder that collect them.
//!
//! # Example
//!
//! ```rust,ignore
//! use hermes_telemetry::{init_telemetry, LogConfig, MetricsConfig};
//!
//! init_telemetry(&LogConfig::development(), &MetricsConfig::default())?;
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::TelemetryError;
pub use logging::{init_logging, LogConfig, LogFormat};
pub use metrics::{describe_metrics, init_metrics, render_metrics, MetricsConfig};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Initializes logging, then metrics.
///
/// # Errors
///
/// Returns `TelemetryError` if either subsystem fails to initialize.
pub fn init_telemetry(logging: &LogConfig, metrics: &MetricsConfig) -> TelemetryResult<()> {
    init_logging(logging)?;
    init_metrics(metrics)?;
    Ok(())
}
