//! WebSocket endpoint runtime for Hermes.
//!
//! This crate hosts server-side WebSocket endpoints: it decodes inbound
//! messages, routes them to per-session message handlers, encodes outbound
//! objects and validates annotated endpoint classes before deployment.
//!
//! # Features
//!
//! - **Coders** for text, binary and streamed payloads, with built-ins for
//!   strings, byte buffers and primitives
//! - **Handler registry** per session, at most one whole handler per
//!   category plus partial handlers for fragmented messages
//! - **Annotated endpoints** compiled into a dispatch table, with every
//!   deployment violation reported at once
//! - **Streaming** of fragmented messages to blocking readers through a
//!   bounded buffer
//! - **Remotes** for synchronous and asynchronous sends
//! - **Transport** over `tokio-tungstenite`
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use hermes_ws::{
//!     accept_connection, factory, Endpoint, EndpointConfig, MessageHandler, ServerContainer,
//!     Session, ValueType,
//! };
//!
//! struct Echo;
//!
//! impl Endpoint for Echo {
//!     fn on_open(&self, session: &Session, _config: &EndpointConfig) -> anyhow::Result<()> {
//!         let weak = session.downgrade();
//!         session.add_message_handler(MessageHandler::whole(ValueType::String, move |text| {
//!             if let Some(session) = weak.upgrade() {
//!                 session.basic_remote().send_object(&text)?;
//!             }
//!             Ok(())
//!         }))?;
//!         Ok(())
//!     }
//! }
//!
//! # async fn run() -> anyhow::Result<()> {
//! let container = Arc::new(ServerContainer::default());
//! container.deploy(EndpointConfig::builder("/echo").build(), factory(|| Ok(Echo)))?;
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:9001").await?;
//! loop {
//!     let (stream, _) = listener.accept().await?;
//!     tokio::spawn(accept_connection(Arc::clone(&container), stream));
//! }
//! # }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  accept_connection() ──► ServerContainer.match_path()        │
//! │       │                                                      │
//! │       ▼                                                      │
//! │  serve_connection() ──► EndpointWrapper.on_connect()         │
//! │       │                       │                              │
//! │       │                       ▼                              │
//! │       │                 Session + Endpoint.on_open()         │
//! │       ▼                                                      │
//! │  frames ──► on_text / on_binary / on_pong                    │
//! │                 │                                            │
//! │                 ├─► partial handler                          │
//! │                 ├─► StreamBridge ──► reader thread           │
//! │                 └─► MessageBuffer ──► decoder ──► handler    │
//! │       │                                                      │
//! │       ▼                                                      │
//! │  close ──► EndpointWrapper.on_close() ──► Endpoint.on_close()│
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod annotated;
pub mod buffer;
pub mod coder;
pub mod config;
pub mod container;
pub mod endpoint;
pub mod error;
pub mod handler;
pub mod message;
pub mod monitor;
pub mod remote;
pub mod session;
pub mod stream;
pub mod transport;
pub mod types;
pub mod wrapper;

// Re-exports for convenience
pub use annotated::{AnnotatedEndpoint, EndpointClass, ErrorCollector, MethodArgs, MethodDecl, ParamType};
pub use buffer::MessageBuffer;
pub use coder::{
    BinaryDecoder, BinaryEncoder, BinaryStreamDecoder, BinaryStreamEncoder, CoderRegistry, Decoder,
    Encoder, Payload, TextDecoder, TextEncoder, TextStreamDecoder, TextStreamEncoder,
};
pub use config::{EndpointConfig, EndpointConfigBuilder, SessionConfig};
pub use container::ServerContainer;
pub use endpoint::{factory, singleton, Endpoint, EndpointFactory};
pub use error::{CloseCode, CloseReason, DeploymentError, WsError, WsResult};
pub use handler::{HandlerCategory, HandlerRegistry, MessageHandler, PartialHandler, WholeHandler};
pub use message::Message;
pub use monitor::{EndpointStats, EndpointStatsSnapshot};
pub use remote::{AsyncRemote, BasicRemote, Connection, SendFuture};
pub use session::{HandshakeInfo, Session, SessionId, SessionState, WeakSession};
pub use stream::{BinaryReader, StreamBridge, TextReader, MAX_BUFFER_SIZE};
pub use transport::{accept_connection, serve_connection, ChannelConnection};
pub use types::{CustomType, Object, ObjectValue, PongMessage, Value, ValueType};
pub use wrapper::EndpointWrapper;
