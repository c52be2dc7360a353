//! Programmatic endpoints.

use std::sync::Arc;

use crate::config::EndpointConfig;
use crate::error::CloseReason;
use crate::session::Session;

/// Application lifecycle callbacks for one session.
///
/// A new instance is normally created per session by an [`EndpointFactory`].
/// Message handling is set up in [`Endpoint::on_open`] by registering
/// handlers on the session.
pub trait Endpoint: Send + Sync {
    /// The session has opened.
    fn on_open(&self, session: &Session, config: &EndpointConfig) -> anyhow::Result<()>;

    /// The session has closed.
    fn on_close(&self, _session: &Session, _reason: &CloseReason) -> anyhow::Result<()> {
        Ok(())
    }

    /// A handler, a decoder or the session itself failed.
    fn on_error(&self, _session: &Session, _error: &anyhow::Error) {}
}

/// Produces an [`Endpoint`] instance for each new session.
pub type EndpointFactory = Arc<dyn Fn() -> anyhow::Result<Arc<dyn Endpoint>> + Send + Sync>;

/// Wrap a closure as an [`EndpointFactory`].
pub fn factory<E, F>(make: F) -> EndpointFactory
where
    E: Endpoint + 'static,
    F: Fn() -> anyhow::Result<E> + Send + Sync + 'static,
{
    Arc::new(move || Ok(Arc::new(make()?) as Arc<dyn Endpoint>))
}

/// Share one instance across every session.
pub fn singleton(endpoint: Arc<dyn Endpoint>) -> EndpointFactory {
    Arc::new(move || Ok(Arc::clone(&endpoint)))
}
