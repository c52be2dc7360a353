//! Layered runtime configuration for Hermes.
//!
//! - TOML and JSON configuration files
//! - Environment variable overrides (`HERMES__SECTION__KEY`)
//! - `.env` support through `dotenvy`
//! - Strict parsing: unknown fields are rejected
//!
//! # Example
//!
//! ```no_run
//! use hermes_config::ConfigLoader;
//!
//! # fn main() -> Result<(), hermes_config::ConfigError> {
//! let config = ConfigLoader::new()
//!     .with_defaults()
//!     .with_optional_file("hermes.toml")?
//!     .with_env_prefix("HERMES")
//!     .load()?;
//!
//! let sessions = config.session_config();
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration File Format
//!
//! ```toml
//! [container]
//! max_text_buffer_size = 4194304
//! max_binary_buffer_size = 4194304
//! incoming_buffer_size = 4194315
//! max_idle_timeout_ms = 300000
//!
//! [logging]
//! enabled = true
//! level = "info,hermes_ws=debug"
//! format = "json"
//!
//! [metrics]
//! enabled = true
//! size_buckets = [64.0, 1024.0, 8192.0, 65536.0]
//! ```

#![warn(missing_docs)]

mod config;
mod error;
mod loader;

pub use config::{ContainerSection, HermesConfig, LoggingSection, MetricsSection};
pub use error::ConfigError;
pub use loader::ConfigLoader;
