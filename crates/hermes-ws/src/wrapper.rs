//! Endpoint wrapper.
//!
//! One [`EndpointWrapper`] exists per deployed endpoint. It creates a
//! [`Session`] and an endpoint instance for each accepted connection and
//! turns the transport's frame callbacks into handler invocations:
//!
//! ```text
//! frame ──► wrapper ──► SessionContext ──► Session::notify_* ──► handler
//!                            │
//!                            ├── MessageBuffer  (fragments for whole handlers)
//!                            └── StreamBridge   (fragments for Reader/InputStream)
//! ```
//!
//! Failures raised while dispatching are routed to the endpoint's
//! `on_error` callback; only an unknown session is reported to the caller.

use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use hermes_router::Params;
use hermes_telemetry::{log_dispatch_error, log_session_close, log_session_open};
use parking_lot::Mutex;
use tracing::{debug, instrument, trace, warn};

use crate::buffer::MessageBuffer;
use crate::coder::{CoderRegistry, Payload};
use crate::config::{EndpointConfig, SessionConfig};
use crate::endpoint::{Endpoint, EndpointFactory};
use crate::error::{CloseCode, CloseReason, WsError, WsResult};
use crate::handler::{MessageHandler, WholeHandler};
use crate::monitor::EndpointStats;
use crate::remote::Connection;
use crate::session::{HandshakeInfo, Session, SessionId, SessionInit, SessionState};
use crate::stream::{BinaryReader, StreamBridge, TextReader};
use crate::types::{Value, ValueType};

/// Live sessions of one endpoint.
pub(crate) type SessionMap = DashMap<SessionId, Arc<SessionContext>>;

/// Per-connection dispatch state.
pub(crate) struct SessionContext {
    pub(crate) session: Session,
    endpoint: Arc<dyn Endpoint>,
    stats: Arc<EndpointStats>,
    text_buffer: Mutex<MessageBuffer>,
    binary_buffer: Mutex<MessageBuffer>,
    text_stream: Mutex<StreamBridge>,
    binary_stream: Mutex<StreamBridge>,
}

impl SessionContext {
    /// Route a dispatch failure to the endpoint.
    ///
    /// An oversized message closes the session with 1009 first.
    fn report(&self, error: anyhow::Error) {
        let ws_error = error.downcast_ref::<WsError>();
        if let Some(WsError::MessageTooBig { .. }) = ws_error {
            if let Err(e) = self
                .session
                .close_with(CloseReason::standard(CloseCode::MessageTooBig))
            {
                debug!(session_id = %self.session.id(), error = %e, "Close after oversized message failed");
            }
        }
        self.stats.error(ws_error.map_or("application", WsError::kind));
        log_dispatch_error!(self.session.id(), error);
        self.endpoint.on_error(&self.session, &error);
    }
}

/// Runtime of one deployed endpoint.
pub struct EndpointWrapper {
    config: Arc<EndpointConfig>,
    coders: Arc<CoderRegistry>,
    coder_users: Mutex<usize>,
    factory: EndpointFactory,
    sessions: Arc<SessionMap>,
    stats: Arc<EndpointStats>,
    defaults: SessionConfig,
}

impl EndpointWrapper {
    /// Create the runtime for `config`, building instances with `factory`.
    pub fn new(config: EndpointConfig, factory: EndpointFactory, defaults: SessionConfig) -> Self {
        let coders = Arc::new(CoderRegistry::from_config(&config));
        let stats = Arc::new(EndpointStats::new(config.path()));
        Self {
            config: Arc::new(config),
            coders,
            coder_users: Mutex::new(0),
            factory,
            sessions: Arc::new(DashMap::new()),
            stats,
            defaults,
        }
    }

    /// Endpoint configuration.
    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    /// Endpoint path template.
    pub fn path(&self) -> &str {
        self.config.path()
    }

    /// Merged coders. Sessions work on their own copy, see
    /// [`Session::coders`].
    pub fn coders(&self) -> &CoderRegistry {
        &self.coders
    }

    /// Live statistics.
    pub fn stats(&self) -> &EndpointStats {
        &self.stats
    }

    /// Session defaults.
    pub fn session_defaults(&self) -> &SessionConfig {
        &self.defaults
    }

    /// A live session by ID.
    pub fn session(&self, id: SessionId) -> Option<Session> {
        self.sessions.get(&id).map(|ctx| ctx.session.clone())
    }

    /// Every open session.
    pub fn open_sessions(&self) -> Vec<Session> {
        self.sessions
            .iter()
            .map(|entry| entry.value().session.clone())
            .filter(Session::is_open)
            .collect()
    }

    /// A connection completed its handshake.
    ///
    /// Fails when the endpoint is at its session limit or the factory cannot
    /// produce an instance; the connection is closed in both cases. An
    /// `on_open` failure is reported to `on_error` and the session stays open.
    #[instrument(skip_all, fields(endpoint = %self.config.path()))]
    pub fn on_connect(
        &self,
        connection: Arc<dyn Connection>,
        handshake: HandshakeInfo,
        path_params: Params,
    ) -> WsResult<Session> {
        let limit = self.config.max_sessions();
        if self.stats.try_session_opened(limit).is_none() {
            let max = limit.unwrap_or_default();
            warn!(max_sessions = max, "Session limit reached, rejecting connection");
            connection.close(CloseReason::standard(CloseCode::TryAgainLater))?;
            return Err(WsError::SessionLimit(max));
        }

        let endpoint = match (self.factory)() {
            Ok(endpoint) => endpoint,
            Err(e) => {
                warn!(error = %e, "Endpoint instance could not be created");
                let reason = CloseReason::standard(CloseCode::UnexpectedCondition);
                self.stats.session_closed(reason.code);
                connection.close(reason)?;
                return Err(WsError::InstanceUnavailable(e.to_string()));
            }
        };

        let coders = Arc::new(self.coders.for_session());
        let session = Session::new(SessionInit {
            config: Arc::clone(&self.config),
            coders: Arc::clone(&coders),
            stats: Arc::clone(&self.stats),
            connection,
            handshake,
            path_params,
            defaults: self.defaults.clone(),
            siblings: Arc::downgrade(&self.sessions),
        });
        let ctx = Arc::new(SessionContext {
            endpoint: Arc::clone(&endpoint),
            stats: Arc::clone(&self.stats),
            text_buffer: Mutex::new(MessageBuffer::new(session.max_text_message_buffer_size())),
            binary_buffer: Mutex::new(MessageBuffer::new(session.max_binary_message_buffer_size())),
            text_stream: Mutex::new(StreamBridge::new()),
            binary_stream: Mutex::new(StreamBridge::new()),
            session: session.clone(),
        });

        self.acquire_shared_coders();
        coders.init_per_session(&self.config);
        self.sessions.insert(session.id(), Arc::clone(&ctx));
        log_session_open!(session.id(), self.config.path());

        if let Err(e) = endpoint.on_open(&session, &self.config) {
            ctx.report(e);
        }
        Ok(session)
    }

    /// A whole text message arrived.
    #[instrument(skip(self, text), fields(endpoint = %self.config.path(), len = text.len()))]
    pub fn on_text(&self, id: SessionId, text: &str) -> WsResult<()> {
        let ctx = self.context(id)?;
        self.stats.message_received("text", text.len());
        if let Err(e) = self.dispatch_text(&ctx, text) {
            ctx.report(e);
        }
        Ok(())
    }

    /// A whole binary message arrived.
    #[instrument(skip(self, data), fields(endpoint = %self.config.path(), len = data.len()))]
    pub fn on_binary(&self, id: SessionId, data: &[u8]) -> WsResult<()> {
        let ctx = self.context(id)?;
        self.stats.message_received("binary", data.len());
        if let Err(e) = self.dispatch_binary(&ctx, data) {
            ctx.report(e);
        }
        Ok(())
    }

    /// A text fragment arrived.
    #[instrument(skip(self, fragment), fields(endpoint = %self.config.path(), len = fragment.len()))]
    pub fn on_partial_text(&self, id: SessionId, fragment: &str, last: bool) -> WsResult<()> {
        let ctx = self.context(id)?;
        self.stats.message_received("text", fragment.len());
        if let Err(e) = self.dispatch_partial_text(&ctx, fragment, last) {
            ctx.report(e);
        }
        Ok(())
    }

    /// A binary fragment arrived.
    #[instrument(skip(self, fragment), fields(endpoint = %self.config.path(), len = fragment.len()))]
    pub fn on_partial_binary(&self, id: SessionId, fragment: &[u8], last: bool) -> WsResult<()> {
        let ctx = self.context(id)?;
        self.stats.message_received("binary", fragment.len());
        if let Err(e) = self.dispatch_partial_binary(&ctx, fragment, last) {
            ctx.report(e);
        }
        Ok(())
    }

    /// A pong arrived.
    pub fn on_pong(&self, id: SessionId, data: Bytes) -> WsResult<()> {
        let ctx = self.context(id)?;
        self.stats.message_received("pong", data.len());
        match ctx.session.notify_pong(data) {
            Ok(true) => {}
            Ok(false) => debug!(session_id = %id, "Unhandled pong message"),
            Err(e) => ctx.report(e),
        }
        Ok(())
    }

    /// A ping arrived; it is answered with a pong carrying the same data.
    pub fn on_ping(&self, id: SessionId, data: Bytes) -> WsResult<()> {
        let ctx = self.context(id)?;
        self.stats.message_received("ping", data.len());
        ctx.session.basic_remote().send_pong(data)
    }

    /// The connection closed.
    ///
    /// Unknown sessions are ignored, so a close racing a failed handshake is
    /// harmless.
    #[instrument(skip(self), fields(endpoint = %self.config.path()))]
    pub fn on_close(&self, id: SessionId, reason: CloseReason) {
        let Some((_, ctx)) = self.sessions.remove(&id) else {
            debug!(session_id = %id, "Close for unknown session ignored");
            return;
        };
        let session = &ctx.session;
        session.set_state(SessionState::Closing);

        if let Err(e) = ctx.endpoint.on_close(session, &reason) {
            ctx.report(e);
        }

        session.set_state(SessionState::Closed);
        ctx.text_stream.lock().abort();
        ctx.binary_stream.lock().abort();
        session.clear_handlers();
        session.coders().destroy_per_session();
        self.release_shared_coders();
        self.stats.session_closed(reason.code);
        log_session_close!(id, reason.code, reason.phrase);
    }

    /// Shared coders are initialized when the first session opens.
    fn acquire_shared_coders(&self) {
        let mut users = self.coder_users.lock();
        if *users == 0 {
            self.coders.init_shared(&self.config);
        }
        *users += 1;
    }

    /// Shared coders are destroyed when the last session closes.
    fn release_shared_coders(&self) {
        let mut users = self.coder_users.lock();
        if *users == 0 {
            return;
        }
        *users -= 1;
        if *users == 0 {
            self.coders.destroy_shared();
        }
    }

    /// Close every session with `reason`.
    pub fn close_all(&self, reason: &CloseReason) {
        for session in self.open_sessions() {
            if let Err(e) = session.close_with(reason.clone()) {
                debug!(session_id = %session.id(), error = %e, "Close failed");
            }
        }
    }

    /// Send `text` to every open session.
    pub fn broadcast_text(&self, text: &str) -> Vec<(SessionId, WsResult<()>)> {
        self.open_sessions()
            .into_iter()
            .map(|s| (s.id(), s.basic_remote().send_text(text)))
            .collect()
    }

    /// Send `data` to every open session.
    pub fn broadcast_binary(&self, data: Bytes) -> Vec<(SessionId, WsResult<()>)> {
        self.open_sessions()
            .into_iter()
            .map(|s| (s.id(), s.basic_remote().send_binary(data.clone())))
            .collect()
    }

    fn context(&self, id: SessionId) -> WsResult<Arc<SessionContext>> {
        let Some(ctx) = self.sessions.get(&id).map(|entry| Arc::clone(entry.value())) else {
            debug!(session_id = %id, "Message for unknown session dropped");
            return Err(WsError::SessionClosed);
        };
        Ok(ctx)
    }

    fn dispatch_text(&self, ctx: &SessionContext, text: &str) -> anyhow::Result<()> {
        let session = &ctx.session;
        reset_receiving(session)?;

        let (whole, partial) =
            session.with_handlers(|h| (h.is_whole_text_present(), h.is_partial_text_present()));
        if whole {
            let payload = Payload::Text(text);
            session.notify_whole(payload, &session.coders().applicable_decoders(payload))
        } else if partial {
            session.notify_partial(Value::from(text), true)
        } else {
            Err(WsError::HandlerNotFound("Text").into())
        }
    }

    fn dispatch_binary(&self, ctx: &SessionContext, data: &[u8]) -> anyhow::Result<()> {
        let session = &ctx.session;
        reset_receiving(session)?;

        let (whole, partial) =
            session.with_handlers(|h| (h.is_whole_binary_present(), h.is_partial_binary_present()));
        if whole {
            let payload = Payload::Binary(data);
            session.notify_whole(payload, &session.coders().applicable_decoders(payload))
        } else if partial {
            session.notify_partial(Value::ByteBuffer(Bytes::copy_from_slice(data)), true)
        } else {
            Err(WsError::HandlerNotFound("Binary").into())
        }
    }

    fn dispatch_partial_text(&self, ctx: &Arc<SessionContext>, fragment: &str, last: bool) -> anyhow::Result<()> {
        let session = &ctx.session;
        let (partial, reader, whole) = session.with_handlers(|h| {
            (
                h.is_partial_text_present(),
                h.is_reader_present(),
                h.is_whole_text_present(),
            )
        });

        if partial {
            reset_receiving(session)?;
            return session.notify_partial(Value::from(fragment), last);
        }

        if reader {
            let Some(handler) = whole_handler(session, &ValueType::Reader) else {
                return Ok(());
            };
            advance(session, SessionState::ReceivingText, last, "text")?;
            let reporter = Arc::clone(ctx);
            ctx.text_stream.lock().append(
                Bytes::copy_from_slice(fragment.as_bytes()),
                last,
                move |source| {
                    if let Err(e) = handler.on_message(Value::Reader(TextReader::new(source))) {
                        reporter.report(e);
                    }
                },
            )?;
            return Ok(());
        }

        if whole {
            let starting = session.state() == SessionState::Running;
            advance(session, SessionState::ReceivingText, last, "text")?;
            let mut buffer = ctx.text_buffer.lock();
            if starting {
                buffer.reset(session.max_text_message_buffer_size());
            }
            buffer.append(fragment.as_bytes())?;
            if last {
                let text = buffer.take_text()?;
                drop(buffer);
                let payload = Payload::Text(&text);
                return session.notify_whole(payload, &session.coders().applicable_decoders(payload));
            }
            return Ok(());
        }

        Err(WsError::HandlerNotFound("Text").into())
    }

    fn dispatch_partial_binary(
        &self,
        ctx: &Arc<SessionContext>,
        fragment: &[u8],
        last: bool,
    ) -> anyhow::Result<()> {
        let session = &ctx.session;
        let (partial, input_stream, whole) = session.with_handlers(|h| {
            (
                h.is_partial_binary_present(),
                h.is_input_stream_present(),
                h.is_whole_binary_present(),
            )
        });

        if partial {
            reset_receiving(session)?;
            return session.notify_partial(Value::ByteBuffer(Bytes::copy_from_slice(fragment)), last);
        }

        if input_stream {
            let Some(handler) = whole_handler(session, &ValueType::InputStream) else {
                return Ok(());
            };
            advance(session, SessionState::ReceivingBinary, last, "binary")?;
            let reporter = Arc::clone(ctx);
            ctx.binary_stream.lock().append(
                Bytes::copy_from_slice(fragment),
                last,
                move |source| {
                    if let Err(e) = handler.on_message(Value::InputStream(BinaryReader::new(source))) {
                        reporter.report(e);
                    }
                },
            )?;
            return Ok(());
        }

        if whole {
            let starting = session.state() == SessionState::Running;
            advance(session, SessionState::ReceivingBinary, last, "binary")?;
            let mut buffer = ctx.binary_buffer.lock();
            if starting {
                buffer.reset(session.max_binary_message_buffer_size());
            }
            buffer.append(fragment)?;
            if last {
                let data = buffer.take();
                drop(buffer);
                let payload = Payload::Binary(&data);
                return session.notify_whole(payload, &session.coders().applicable_decoders(payload));
            }
            return Ok(());
        }

        Err(WsError::HandlerNotFound("Binary").into())
    }
}

impl std::fmt::Debug for EndpointWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointWrapper")
            .field("path", &self.config.path())
            .field("sessions", &self.sessions.len())
            .finish_non_exhaustive()
    }
}

/// A whole message ends any fragmented message in progress.
fn reset_receiving(session: &Session) -> WsResult<()> {
    if matches!(
        session.state(),
        SessionState::ReceivingText | SessionState::ReceivingBinary
    ) {
        session.transition(SessionState::Running)?;
    }
    Ok(())
}

/// Step the fragment state machine for one fragment of a `receiving` message.
fn advance(session: &Session, receiving: SessionState, last: bool, kind: &str) -> WsResult<()> {
    let current = session.state();
    if current == SessionState::Running || current == receiving {
        let next = if last { SessionState::Running } else { receiving };
        if next != current {
            session.transition(next)?;
        }
        trace!(session_id = %session.id(), state = ?next, "Fragment accepted");
        return Ok(());
    }
    if matches!(current, SessionState::Closing | SessionState::Closed) {
        return Err(WsError::SessionClosed);
    }
    session.transition(SessionState::Running)?;
    Err(WsError::out_of_order(format!(
        "partial {kind} message received out of order in session {}",
        session.id()
    )))
}

fn whole_handler(session: &Session, ty: &ValueType) -> Option<WholeHandler> {
    match session.with_handlers(|h| h.handler_for(ty))? {
        MessageHandler::Whole(handler) => Some(handler),
        MessageHandler::Partial(_) => None,
    }
}
