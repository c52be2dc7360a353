//! tokio-tungstenite transport.
//!
//! Bridges a [`WebSocketStream`] to an [`EndpointWrapper`]: inbound frames
//! become wrapper callbacks, outbound sends go through an unbounded queue to
//! a writer task that owns the sink.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use futures_util::{SinkExt, StreamExt};
use hermes_router::Params;
use http::header::{HeaderValue, SEC_WEBSOCKET_PROTOCOL};
use http::StatusCode;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, instrument, trace, warn};

use crate::container::ServerContainer;
use crate::error::{CloseCode, CloseReason, WsError, WsResult};
use crate::message::Message;
use crate::remote::Connection;
use crate::session::HandshakeInfo;
use crate::wrapper::EndpointWrapper;

enum Outbound {
    Frame(tungstenite::Message),
    Close(CloseReason),
    Shutdown,
}

/// [`Connection`] backed by the writer task's queue.
///
/// Partial sends are collected until the last fragment and then sent as one
/// message.
#[derive(Debug)]
pub struct ChannelConnection {
    tx: mpsc::UnboundedSender<Outbound>,
    partial_text: Mutex<String>,
    partial_binary: Mutex<BytesMut>,
    closed: AtomicBool,
}

impl std::fmt::Debug for Outbound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Frame(m) => write!(f, "Frame({} bytes)", m.len()),
            Self::Close(reason) => write!(f, "Close({reason})"),
            Self::Shutdown => f.write_str("Shutdown"),
        }
    }
}

impl ChannelConnection {
    fn new(tx: mpsc::UnboundedSender<Outbound>) -> Self {
        Self {
            tx,
            partial_text: Mutex::new(String::new()),
            partial_binary: Mutex::new(BytesMut::new()),
            closed: AtomicBool::new(false),
        }
    }

    fn push(&self, outbound: Outbound) -> WsResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(WsError::SessionClosed);
        }
        self.tx
            .send(outbound)
            .map_err(|_| WsError::send_failed("connection writer has stopped"))
    }

    fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        let _ = self.tx.send(Outbound::Shutdown);
    }
}

impl Connection for ChannelConnection {
    fn send(&self, message: Message) -> WsResult<()> {
        self.push(Outbound::Frame(message.into()))
    }

    fn send_partial_text(&self, fragment: &str, last: bool) -> WsResult<()> {
        let mut buffer = self.partial_text.lock();
        buffer.push_str(fragment);
        if last {
            let text = std::mem::take(&mut *buffer);
            drop(buffer);
            return self.push(Outbound::Frame(tungstenite::Message::text(text)));
        }
        Ok(())
    }

    fn send_partial_binary(&self, fragment: &[u8], last: bool) -> WsResult<()> {
        let mut buffer = self.partial_binary.lock();
        buffer.extend_from_slice(fragment);
        if last {
            let data = buffer.split().freeze();
            drop(buffer);
            return self.push(Outbound::Frame(tungstenite::Message::Binary(data)));
        }
        Ok(())
    }

    fn close(&self, reason: CloseReason) -> WsResult<()> {
        self.push(Outbound::Close(reason))
    }
}

/// Run one accepted connection against `wrapper` until it closes.
#[instrument(skip_all, fields(endpoint = %wrapper.path(), uri = %handshake.request_uri))]
pub async fn serve_connection<S>(
    wrapper: Arc<EndpointWrapper>,
    stream: WebSocketStream<S>,
    handshake: HandshakeInfo,
    params: Params,
) -> WsResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sink, mut inbound) = stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let connection = Arc::new(ChannelConnection::new(tx));

    let writer = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            let result = match outbound {
                Outbound::Frame(message) => sink.send(message).await,
                Outbound::Close(reason) => {
                    let close: tungstenite::Message = Message::Close(Some(reason)).into();
                    let result = sink.send(close).await;
                    if result.is_ok() {
                        continue;
                    }
                    result
                }
                Outbound::Shutdown => break,
            };
            if let Err(e) = result {
                debug!(error = %e, "Writer stopped");
                return;
            }
        }
        let _ = sink.close().await;
    });

    let session = match wrapper.on_connect(Arc::clone(&connection) as Arc<dyn Connection>, handshake, params) {
        Ok(session) => session,
        Err(e) => {
            connection.shutdown();
            let _ = writer.await;
            return Err(e);
        }
    };
    let id = session.id();

    let reason = loop {
        let next = match session.max_idle_timeout() {
            Some(idle) => match tokio::time::timeout(idle, inbound.next()).await {
                Ok(next) => next,
                Err(_) => {
                    info!(session_id = %id, "Session idle timeout expired");
                    let reason = CloseReason::new(
                        CloseCode::Normal,
                        "Session closed by the container because of the idle timeout.",
                    );
                    if let Err(e) = session.close_with(reason.clone()) {
                        debug!(session_id = %id, error = %e, "Idle close failed");
                    }
                    break reason;
                }
            },
            None => inbound.next().await,
        };

        let result = match next {
            Some(Ok(frame)) => match frame {
                tungstenite::Message::Text(text) => wrapper.on_text(id, text.as_str()),
                tungstenite::Message::Binary(data) => wrapper.on_binary(id, &data),
                tungstenite::Message::Pong(data) => wrapper.on_pong(id, data),
                tungstenite::Message::Ping(data) => {
                    // tungstenite queues the pong reply itself
                    trace!(session_id = %id, len = data.len(), "Ping received");
                    Ok(())
                }
                tungstenite::Message::Close(frame) => {
                    let reason = match Message::from(tungstenite::Message::Close(frame)) {
                        Message::Close(Some(reason)) => reason,
                        _ => CloseReason::standard(CloseCode::NoStatus),
                    };
                    break reason;
                }
                tungstenite::Message::Frame(_) => Ok(()),
            },
            Some(Err(e)) => {
                warn!(session_id = %id, error = %e, "Connection failed");
                break CloseReason::standard(CloseCode::Abnormal);
            }
            None => break CloseReason::standard(CloseCode::Abnormal),
        };
        if let Err(WsError::SessionClosed) = result {
            break CloseReason::standard(CloseCode::Abnormal);
        }
    };

    wrapper.on_close(id, reason);
    connection.shutdown();
    let _ = writer.await;
    Ok(())
}

/// Perform the opening handshake on `stream` and serve the matched endpoint.
///
/// Requests for paths without a deployed endpoint are refused with 404. The
/// negotiated subprotocol is echoed in the response; no extensions are
/// offered.
pub async fn accept_connection<S>(container: Arc<ServerContainer>, stream: S) -> WsResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut matched: Option<(Arc<EndpointWrapper>, HandshakeInfo, Params)> = None;

    let callback = |request: &Request, mut response: Response| -> Result<Response, ErrorResponse> {
        let uri = request.uri();
        let Some((wrapper, params)) = container.match_path(uri.path()) else {
            debug!(path = uri.path(), "No endpoint for handshake path");
            let mut refused = ErrorResponse::new(Some(format!("No endpoint at {}", uri.path())));
            *refused.status_mut() = StatusCode::NOT_FOUND;
            return Err(refused);
        };

        let mut handshake = HandshakeInfo::new(uri.path())
            .with_subprotocols(header_tokens(request, "sec-websocket-protocol"))
            .with_extensions(header_tokens(request, "sec-websocket-extensions"));
        if let Some(query) = uri.query() {
            handshake = handshake.with_query(query);
        }

        if let Some(protocol) = wrapper
            .config()
            .negotiate_subprotocol(handshake.requested_subprotocols.as_slice())
        {
            if let Ok(value) = HeaderValue::from_str(&protocol) {
                response.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value);
            }
        }

        matched = Some((wrapper, handshake, params));
        Ok(response)
    };

    let ws = tokio_tungstenite::accept_hdr_async(stream, callback).await?;
    let Some((wrapper, handshake, params)) = matched else {
        return Err(WsError::SessionClosed);
    };
    serve_connection(wrapper, ws, handshake, params).await
}

/// Comma-separated header tokens; extension parameters are dropped.
fn header_tokens(request: &Request, name: &str) -> Vec<String> {
    request
        .headers()
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|token| token.split(';').next())
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::config::{EndpointConfig, SessionConfig};
    use crate::endpoint::{factory, Endpoint};
    use crate::handler::MessageHandler;
    use crate::session::Session;
    use crate::types::ValueType;
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;

    struct Echo;

    impl Endpoint for Echo {
        fn on_open(&self, session: &Session, _config: &EndpointConfig) -> anyhow::Result<()> {
            let weak = session.downgrade();
            session.add_message_handler(MessageHandler::whole(ValueType::String, move |value| {
                if let Some(session) = weak.upgrade() {
                    session.basic_remote().send_text(format!("echo:{value}"))?;
                }
                Ok(())
            }))?;
            Ok(())
        }
    }

    #[test]
    fn test_header_tokens() {
        let request = Request::builder()
            .uri("/x")
            .header("sec-websocket-extensions", "permessage-deflate; client_max_window_bits, x-foo")
            .body(())
            .unwrap();
        assert_eq!(
            header_tokens(&request, "sec-websocket-extensions"),
            vec!["permessage-deflate".to_string(), "x-foo".to_string()]
        );
    }

    #[tokio::test]
    async fn test_partial_sends_are_joined() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let connection = ChannelConnection::new(tx);
        connection.send_partial_text("ab", false).unwrap();
        connection.send_partial_text("cd", true).unwrap();
        match rx.recv().await.unwrap() {
            Outbound::Frame(tungstenite::Message::Text(text)) => assert_eq!(text.as_str(), "abcd"),
            other => panic!("unexpected {other:?}"),
        }
        connection.shutdown();
        assert!(matches!(connection.send(Message::text("x")), Err(WsError::SessionClosed)));
    }

    #[tokio::test]
    async fn test_echo_over_duplex_stream() {
        let container = Arc::new(ServerContainer::default());
        container
            .deploy(
                EndpointConfig::builder("/echo").subprotocols(["v1"]).build(),
                factory(|| Ok(Echo)),
            )
            .unwrap();

        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let server = tokio::spawn(accept_connection(Arc::clone(&container), server_io));

        let mut request = "ws://localhost/echo".into_client_request().unwrap();
        request
            .headers_mut()
            .insert("sec-websocket-protocol", HeaderValue::from_static("v0, v1"));
        let (mut client, response) = tokio_tungstenite::client_async(request, client_io).await.unwrap();
        assert_eq!(
            response.headers().get("sec-websocket-protocol").unwrap(),
            "v1"
        );

        client.send(tungstenite::Message::text("hi")).await.unwrap();
        let reply = client.next().await.unwrap().unwrap();
        assert_eq!(reply, tungstenite::Message::text("echo:hi"));

        client.close(None).await.unwrap();
        server.await.unwrap().unwrap();
        assert_eq!(container.stats()[0].open_sessions, 0);
    }

    #[tokio::test]
    async fn test_idle_session_is_closed_by_container() {
        let defaults = SessionConfig::new().with_max_idle_timeout(Duration::from_millis(50));
        let container = Arc::new(ServerContainer::new(defaults));
        container
            .deploy(EndpointConfig::builder("/echo").build(), factory(|| Ok(Echo)))
            .unwrap();

        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let server = tokio::spawn(accept_connection(Arc::clone(&container), server_io));
        let (mut client, _) = tokio_tungstenite::client_async("ws://localhost/echo", client_io)
            .await
            .unwrap();

        match client.next().await.unwrap().unwrap() {
            tungstenite::Message::Close(Some(frame)) => {
                assert_eq!(u16::from(frame.code), 1000);
                assert!(frame.reason.as_str().contains("idle timeout"));
            }
            other => panic!("unexpected {other:?}"),
        }
        while let Some(Ok(_)) = client.next().await {}

        server.await.unwrap().unwrap();
        assert_eq!(container.stats()[0].open_sessions, 0);
    }
}
