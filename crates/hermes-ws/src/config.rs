//! Endpoint and session configuration.
//!
//! [`EndpointConfig`] is the immutable, per-endpoint description: path
//! template, ordered coder lists and negotiation preferences.
//! [`SessionConfig`] carries the container-wide defaults copied into every
//! new session.

use std::time::Duration;

use crate::coder::{Decoder, Encoder};

/// Configuration of one server endpoint.
///
/// Built with [`EndpointConfig::builder`] and immutable afterwards.
///
/// # Example
///
/// ```
/// use hermes_ws::EndpointConfig;
///
/// let config = EndpointConfig::builder("/chat/{room}")
///     .subprotocols(["v2.chat", "v1.chat"])
///     .max_sessions(100)
///     .build();
///
/// assert_eq!(config.path(), "/chat/{room}");
/// assert_eq!(config.negotiate_subprotocol(&["v1.chat", "v2.chat"]), Some("v2.chat".to_string()));
/// ```
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    path: String,
    decoders: Vec<Decoder>,
    encoders: Vec<Encoder>,
    subprotocols: Vec<String>,
    extensions: Vec<String>,
    user_properties: serde_json::Map<String, serde_json::Value>,
    max_sessions: Option<usize>,
}

impl EndpointConfig {
    /// Start building a configuration for a path template.
    pub fn builder(path: impl Into<String>) -> EndpointConfigBuilder {
        EndpointConfigBuilder {
            config: Self {
                path: path.into(),
                decoders: Vec::new(),
                encoders: Vec::new(),
                subprotocols: Vec::new(),
                extensions: Vec::new(),
                user_properties: serde_json::Map::new(),
                max_sessions: None,
            },
        }
    }

    /// Path template.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// User decoders, in declaration order.
    pub fn decoders(&self) -> &[Decoder] {
        &self.decoders
    }

    /// User encoders, in declaration order.
    pub fn encoders(&self) -> &[Encoder] {
        &self.encoders
    }

    /// Supported subprotocols, most preferred first.
    pub fn subprotocols(&self) -> &[String] {
        &self.subprotocols
    }

    /// Supported extensions.
    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    /// User properties shared by all sessions of this endpoint.
    pub fn user_properties(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.user_properties
    }

    /// Maximum number of concurrently open sessions.
    pub fn max_sessions(&self) -> Option<usize> {
        self.max_sessions
    }

    /// Pick the subprotocol for a handshake.
    ///
    /// The first server preference the client also requested wins.
    pub fn negotiate_subprotocol<S: AsRef<str>>(&self, requested: &[S]) -> Option<String> {
        self.subprotocols
            .iter()
            .find(|supported| requested.iter().any(|r| r.as_ref() == supported.as_str()))
            .cloned()
    }

    /// Pick the extensions for a handshake, in client order.
    pub fn negotiate_extensions<S: AsRef<str>>(&self, requested: &[S]) -> Vec<String> {
        requested
            .iter()
            .map(AsRef::as_ref)
            .filter(|r| self.extensions.iter().any(|supported| supported == r))
            .map(str::to_string)
            .collect()
    }
}

/// Builder for [`EndpointConfig`].
#[derive(Debug)]
pub struct EndpointConfigBuilder {
    config: EndpointConfig,
}

impl EndpointConfigBuilder {
    /// Append a decoder.
    pub fn decoder(mut self, decoder: Decoder) -> Self {
        self.config.decoders.push(decoder);
        self
    }

    /// Append several decoders.
    pub fn decoders(mut self, decoders: impl IntoIterator<Item = Decoder>) -> Self {
        self.config.decoders.extend(decoders);
        self
    }

    /// Append an encoder.
    pub fn encoder(mut self, encoder: Encoder) -> Self {
        self.config.encoders.push(encoder);
        self
    }

    /// Append several encoders.
    pub fn encoders(mut self, encoders: impl IntoIterator<Item = Encoder>) -> Self {
        self.config.encoders.extend(encoders);
        self
    }

    /// Set the subprotocol preference list.
    pub fn subprotocols<I, S>(mut self, subprotocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.subprotocols = subprotocols.into_iter().map(Into::into).collect();
        self
    }

    /// Set the supported extensions.
    pub fn extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    /// Set a user property.
    pub fn user_property(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.config.user_properties.insert(key.into(), value.into());
        self
    }

    /// Limit the number of concurrently open sessions.
    pub fn max_sessions(mut self, max: usize) -> Self {
        self.config.max_sessions = Some(max);
        self
    }

    /// Finish building.
    pub fn build(self) -> EndpointConfig {
        self.config
    }
}

/// Container-wide session defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Maximum size of a reassembled text message (default: 4 MiB).
    pub max_text_buffer_size: usize,
    /// Maximum size of a reassembled binary message (default: 4 MiB).
    pub max_binary_buffer_size: usize,
    /// Size of the transport's incoming buffer (default: 4 MiB plus frame header room).
    pub incoming_buffer_size: usize,
    /// Idle timeout; `None` disables it.
    pub max_idle_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_text_buffer_size: 4 * 1024 * 1024,
            max_binary_buffer_size: 4 * 1024 * 1024,
            incoming_buffer_size: 4 * 1024 * 1024 + 11,
            max_idle_timeout: None,
        }
    }
}

impl SessionConfig {
    /// Create a new default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the text reassembly limit.
    pub fn with_max_text_buffer_size(mut self, size: usize) -> Self {
        self.max_text_buffer_size = size;
        self
    }

    /// Set the binary reassembly limit.
    pub fn with_max_binary_buffer_size(mut self, size: usize) -> Self {
        self.max_binary_buffer_size = size;
        self
    }

    /// Set the incoming buffer size.
    pub fn with_incoming_buffer_size(mut self, size: usize) -> Self {
        self.incoming_buffer_size = size;
        self
    }

    /// Set the idle timeout.
    pub fn with_max_idle_timeout(mut self, timeout: Duration) -> Self {
        self.max_idle_timeout = Some(timeout);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_config_default() {
        let config = SessionConfig::default();
        assert_eq!(config.max_text_buffer_size, 4_194_304);
        assert_eq!(config.max_binary_buffer_size, 4_194_304);
        assert_eq!(config.incoming_buffer_size, 4_194_315);
        assert_eq!(config.max_idle_timeout, None);
    }

    #[test]
    fn test_session_config_builder() {
        let config = SessionConfig::new()
            .with_max_text_buffer_size(10)
            .with_max_binary_buffer_size(20)
            .with_incoming_buffer_size(30)
            .with_max_idle_timeout(Duration::from_secs(5));

        assert_eq!(config.max_text_buffer_size, 10);
        assert_eq!(config.max_binary_buffer_size, 20);
        assert_eq!(config.incoming_buffer_size, 30);
        assert_eq!(config.max_idle_timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_negotiate_subprotocol_uses_server_preference() {
        let config = EndpointConfig::builder("/")
            .subprotocols(["b", "a"])
            .build();
        assert_eq!(config.negotiate_subprotocol(&["a", "b"]), Some("b".to_string()));
        assert_eq!(config.negotiate_subprotocol(&["c"]), None);
        assert_eq!(config.negotiate_subprotocol::<&str>(&[]), None);
    }

    #[test]
    fn test_negotiate_extensions_uses_client_order() {
        let config = EndpointConfig::builder("/")
            .extensions(["x-a", "x-b"])
            .build();
        assert_eq!(
            config.negotiate_extensions(&["x-b", "x-c", "x-a"]),
            vec!["x-b".to_string(), "x-a".to_string()]
        );
    }

    #[test]
    fn test_user_properties_and_limits() {
        let config = EndpointConfig::builder("/echo")
            .user_property("tenant", "acme")
            .max_sessions(3)
            .build();
        assert_eq!(config.user_properties()["tenant"], "acme");
        assert_eq!(config.max_sessions(), Some(3));
        assert!(config.decoders().is_empty());
        assert!(config.encoders().is_empty());
    }
}
