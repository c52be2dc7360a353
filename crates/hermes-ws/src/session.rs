//! Sessions.
//!
//! A [`Session`] is the per-connection state seen by application code:
//! handshake results, path parameters, the handler registry and the remote
//! endpoints. It also owns the message-notification algorithm that picks a
//! decoder and a handler for every inbound message.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use hermes_router::Params;
use parking_lot::Mutex;
use tracing::{debug, error, trace};
use uuid::Uuid;

use crate::coder::{CoderRegistry, Decoder, Payload};
use crate::config::{EndpointConfig, SessionConfig};
use crate::error::{CloseReason, WsError, WsResult};
use crate::handler::{HandlerRegistry, MessageHandler};
use crate::monitor::EndpointStats;
use crate::remote::{remotes, AsyncRemote, BasicRemote, Connection};
use crate::types::{PongMessage, Value, ValueType};
use crate::wrapper::SessionMap;

/// A unique identifier for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Create a new time-ordered session ID.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for SessionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Open, no fragmented message in progress.
    Running,
    /// A fragmented text message is being received.
    ReceivingText,
    /// A fragmented binary message is being received.
    ReceivingBinary,
    /// The closing handshake has started.
    Closing,
    /// Closed.
    Closed,
}

/// What the opening handshake established about a connection.
#[derive(Debug, Clone, Default)]
pub struct HandshakeInfo {
    /// Request path.
    pub request_uri: String,
    /// Query string without the leading `?`.
    pub query: Option<String>,
    /// Subprotocols the client asked for, in its order.
    pub requested_subprotocols: Vec<String>,
    /// Extensions the client asked for, in its order.
    pub requested_extensions: Vec<String>,
    /// True over TLS.
    pub secure: bool,
}

impl HandshakeInfo {
    /// Handshake for `request_uri`.
    pub fn new(request_uri: impl Into<String>) -> Self {
        Self {
            request_uri: request_uri.into(),
            ..Self::default()
        }
    }

    /// Set the query string.
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    /// Set the requested subprotocols.
    pub fn with_subprotocols<I, S>(mut self, subprotocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requested_subprotocols = subprotocols.into_iter().map(Into::into).collect();
        self
    }

    /// Set the requested extensions.
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requested_extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    /// Mark the connection as secure.
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }
}

/// Everything needed to build a session.
pub(crate) struct SessionInit {
    pub config: Arc<EndpointConfig>,
    pub coders: Arc<CoderRegistry>,
    pub stats: Arc<EndpointStats>,
    pub connection: Arc<dyn Connection>,
    pub handshake: HandshakeInfo,
    pub path_params: Params,
    pub defaults: SessionConfig,
    pub siblings: Weak<SessionMap>,
}

struct SessionInner {
    id: SessionId,
    config: Arc<EndpointConfig>,
    request_uri: String,
    query: Option<String>,
    path_params: Params,
    subprotocol: Option<String>,
    extensions: Vec<String>,
    secure: bool,
    user_properties: Mutex<serde_json::Map<String, serde_json::Value>>,
    max_text_buffer_size: AtomicUsize,
    max_binary_buffer_size: AtomicUsize,
    max_idle_timeout: Mutex<Option<Duration>>,
    state: Mutex<SessionState>,
    handlers: Mutex<HandlerRegistry>,
    coders: Arc<CoderRegistry>,
    connection: Arc<dyn Connection>,
    basic: BasicRemote,
    async_remote: AsyncRemote,
    siblings: Weak<SessionMap>,
}

/// A live WebSocket session.
///
/// Cheap to clone; all clones refer to the same session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

/// A non-owning reference to a [`Session`].
#[derive(Clone)]
pub struct WeakSession {
    inner: Weak<SessionInner>,
}

impl WeakSession {
    /// The session, if it still exists.
    pub fn upgrade(&self) -> Option<Session> {
        self.inner.upgrade().map(|inner| Session { inner })
    }
}

impl fmt::Debug for WeakSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakSession").finish_non_exhaustive()
    }
}

impl Session {
    pub(crate) fn new(init: SessionInit) -> Self {
        let subprotocol = init
            .config
            .negotiate_subprotocol(&init.handshake.requested_subprotocols);
        let extensions = init
            .config
            .negotiate_extensions(&init.handshake.requested_extensions);
        let (basic, async_remote) = remotes(
            Arc::clone(&init.connection),
            Arc::clone(&init.coders),
            init.stats,
        );
        Self {
            inner: Arc::new(SessionInner {
                id: SessionId::new(),
                request_uri: init.handshake.request_uri,
                query: init.handshake.query,
                path_params: init.path_params,
                subprotocol,
                extensions,
                secure: init.handshake.secure,
                user_properties: Mutex::new(init.config.user_properties().clone()),
                max_text_buffer_size: AtomicUsize::new(init.defaults.max_text_buffer_size),
                max_binary_buffer_size: AtomicUsize::new(init.defaults.max_binary_buffer_size),
                max_idle_timeout: Mutex::new(init.defaults.max_idle_timeout),
                state: Mutex::new(SessionState::Running),
                handlers: Mutex::new(HandlerRegistry::new(Arc::clone(&init.coders))),
                coders: init.coders,
                connection: init.connection,
                basic,
                async_remote,
                siblings: init.siblings,
                config: init.config,
            }),
        }
    }

    /// Session ID.
    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    /// Configuration of the endpoint this session belongs to.
    pub fn endpoint_config(&self) -> &EndpointConfig {
        &self.inner.config
    }

    /// The coder instances this session decodes and encodes with.
    pub fn coders(&self) -> &CoderRegistry {
        &self.inner.coders
    }

    /// Request path of the handshake.
    pub fn request_uri(&self) -> &str {
        &self.inner.request_uri
    }

    /// Query string of the handshake.
    pub fn query_string(&self) -> Option<&str> {
        self.inner.query.as_deref()
    }

    /// Path template variables bound during the handshake.
    pub fn path_parameters(&self) -> &Params {
        &self.inner.path_params
    }

    /// One path template variable.
    pub fn path_parameter(&self, name: &str) -> Option<&str> {
        self.inner.path_params.get(name)
    }

    /// One path template variable parsed into `T`.
    pub fn path_parameter_as<T>(&self, name: &str) -> WsResult<T>
    where
        T: std::str::FromStr,
        T::Err: fmt::Display,
    {
        Ok(self.inner.path_params.parse(name)?)
    }

    /// Negotiated subprotocol.
    pub fn negotiated_subprotocol(&self) -> Option<&str> {
        self.inner.subprotocol.as_deref()
    }

    /// Negotiated extensions.
    pub fn negotiated_extensions(&self) -> &[String] {
        &self.inner.extensions
    }

    /// True over TLS.
    pub fn is_secure(&self) -> bool {
        self.inner.secure
    }

    /// A user property, seeded from the endpoint configuration.
    pub fn user_property(&self, key: &str) -> Option<serde_json::Value> {
        self.inner.user_properties.lock().get(key).cloned()
    }

    /// Set a user property on this session only.
    pub fn set_user_property(&self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.inner
            .user_properties
            .lock()
            .insert(key.into(), value.into());
    }

    /// Largest text message reassembled for whole handlers.
    pub fn max_text_message_buffer_size(&self) -> usize {
        self.inner.max_text_buffer_size.load(Ordering::Acquire)
    }

    /// Change the text reassembly limit.
    pub fn set_max_text_message_buffer_size(&self, size: usize) {
        self.inner.max_text_buffer_size.store(size, Ordering::Release);
    }

    /// Largest binary message reassembled for whole handlers.
    pub fn max_binary_message_buffer_size(&self) -> usize {
        self.inner.max_binary_buffer_size.load(Ordering::Acquire)
    }

    /// Change the binary reassembly limit.
    pub fn set_max_binary_message_buffer_size(&self, size: usize) {
        self.inner.max_binary_buffer_size.store(size, Ordering::Release);
    }

    /// Idle timeout, `None` when disabled.
    pub fn max_idle_timeout(&self) -> Option<Duration> {
        *self.inner.max_idle_timeout.lock()
    }

    /// Change the idle timeout.
    pub fn set_max_idle_timeout(&self, timeout: Option<Duration>) {
        *self.inner.max_idle_timeout.lock() = timeout;
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.inner.state.lock()
    }

    /// True until the closing handshake starts.
    pub fn is_open(&self) -> bool {
        !matches!(self.state(), SessionState::Closing | SessionState::Closed)
    }

    /// Register a message handler.
    pub fn add_message_handler(&self, handler: impl Into<MessageHandler>) -> WsResult<()> {
        let handler = handler.into();
        let ty = handler.value_type().clone();
        self.inner.handlers.lock().add(handler)?;
        trace!(session_id = %self.id(), ty = %ty, "Message handler added");
        Ok(())
    }

    /// Remove a message handler by identity.
    pub fn remove_message_handler(&self, handler: &MessageHandler) -> bool {
        self.inner.handlers.lock().remove(handler)
    }

    /// Registered handlers.
    pub fn message_handlers(&self) -> Arc<[MessageHandler]> {
        self.inner.handlers.lock().handlers()
    }

    /// Blocking-style remote endpoint.
    pub fn basic_remote(&self) -> &BasicRemote {
        &self.inner.basic
    }

    /// Future-returning remote endpoint.
    pub fn async_remote(&self) -> &AsyncRemote {
        &self.inner.async_remote
    }

    /// Close with a normal closure.
    pub fn close(&self) -> WsResult<()> {
        self.close_with(CloseReason::normal())
    }

    /// Close with `reason`. Closing twice is a no-op.
    pub fn close_with(&self, reason: CloseReason) -> WsResult<()> {
        {
            let mut state = self.inner.state.lock();
            if matches!(*state, SessionState::Closing | SessionState::Closed) {
                return Ok(());
            }
            *state = SessionState::Closing;
        }
        debug!(session_id = %self.id(), code = reason.code, "Closing session");
        self.inner.connection.close(reason)
    }

    /// Open sessions of the same endpoint, this one included.
    pub fn open_sessions(&self) -> Vec<Session> {
        let Some(siblings) = self.inner.siblings.upgrade() else {
            return vec![self.clone()];
        };
        siblings
            .iter()
            .map(|entry| entry.value().session.clone())
            .filter(Session::is_open)
            .collect()
    }

    /// A non-owning reference.
    pub fn downgrade(&self) -> WeakSession {
        WeakSession {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        *self.inner.state.lock() = state;
    }

    /// Move to `next` unless closed.
    pub(crate) fn transition(&self, next: SessionState) -> WsResult<()> {
        let mut state = self.inner.state.lock();
        if *state == SessionState::Closed {
            return Err(WsError::SessionClosed);
        }
        *state = next;
        Ok(())
    }

    pub(crate) fn with_handlers<R>(&self, f: impl FnOnce(&HandlerRegistry) -> R) -> R {
        f(&self.inner.handlers.lock())
    }

    pub(crate) fn clear_handlers(&self) {
        self.inner.handlers.lock().clear();
    }

    /// Deliver a whole message.
    ///
    /// Decoders are tried in order; for each, handlers are tried most
    /// specific first. The first handler whose type is assignable from the
    /// decoder's type gets the decoded value and the search stops.
    pub(crate) fn notify_whole(&self, payload: Payload<'_>, decoders: &[Decoder]) -> anyhow::Result<()> {
        self.ensure_not_closed()?;

        if decoders.is_empty() {
            error!(session_id = %self.id(), kind = payload.kind(), "No decoder found");
            return Ok(());
        }

        let handlers = self.inner.handlers.lock().ordered_whole_handlers();
        for decoder in decoders {
            let Some(handler) = handlers
                .iter()
                .find(|h| h.value_type().is_assignable_from(decoder.value_type()))
            else {
                continue;
            };
            check_size(payload.len(), handler.max_message_size())?;
            trace!(
                session_id = %self.id(),
                decoder = decoder.name(),
                ty = %handler.value_type(),
                "Dispatching whole message"
            );
            let value = decoder.decode(payload)?;
            return handler.on_message(value);
        }

        debug!(session_id = %self.id(), kind = payload.kind(), "No handler accepted the message");
        Ok(())
    }

    /// Deliver one fragment to a partial handler.
    ///
    /// A `ByteBuffer` fragment falls back to a `ByteArray` handler.
    pub(crate) fn notify_partial(&self, value: Value, last: bool) -> anyhow::Result<()> {
        self.ensure_not_closed()?;

        let ty = value.value_type();
        let handlers = self.message_handlers();
        let handler = handlers.iter().find_map(|h| match h {
            MessageHandler::Partial(p) if p.value_type().is_assignable_from(&ty) => Some(p),
            _ => None,
        });

        if let Some(handler) = handler {
            check_size(value_len(&value), handler.max_message_size())?;
            return handler.on_message(value, last);
        }

        match value {
            Value::ByteBuffer(data) => self.notify_partial(Value::ByteArray(data.to_vec()), last),
            other => {
                error!(
                    session_id = %self.id(),
                    ty = %other.value_type(),
                    "Unhandled text message"
                );
                Ok(())
            }
        }
    }

    /// Deliver a pong. Returns `false` when no pong handler is registered.
    pub(crate) fn notify_pong(&self, data: Bytes) -> anyhow::Result<bool> {
        let handler = self.inner.handlers.lock().handler_for(&ValueType::Pong);
        match handler {
            Some(MessageHandler::Whole(handler)) => {
                handler.on_message(Value::Pong(PongMessage::new(data)))?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn ensure_not_closed(&self) -> WsResult<()> {
        if self.state() == SessionState::Closed {
            return Err(WsError::SessionClosed);
        }
        Ok(())
    }
}

fn check_size(actual: usize, limit: Option<usize>) -> WsResult<()> {
    match limit {
        Some(limit) if actual > limit => Err(WsError::MessageTooBig { limit, actual }),
        _ => Ok(()),
    }
}

fn value_len(value: &Value) -> usize {
    value
        .as_str()
        .map(str::len)
        .or_else(|| value.as_bytes().map(<[u8]>::len))
        .unwrap_or(0)
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("request_uri", &self.inner.request_uri)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Session {}
