//! # Hermes
//!
//! **Server-side WebSocket endpoint runtime**
//!
//! Hermes hosts WebSocket endpoints declared either programmatically or as
//! annotated classes:
//!
//! - **Typed messages** – user decoders and encoders with built-ins for text,
//!   binary and primitives
//! - **Per-session handlers** – whole, partial and streamed delivery
//! - **Deploy-time validation** – every violation of a class reported at once
//! - **Observability** – `tracing` logs and Prometheus metrics
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use hermes::prelude::*;
//!
//! struct Echo;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConfigLoader::new().with_defaults().with_env_prefix("HERMES").load()?;
//!     hermes::init(&config)?;
//!
//!     let container = Arc::new(ServerContainer::new(config.session_config()));
//!     let class = EndpointClass::new("Echo", EndpointConfig::builder("/echo").build(), || Ok(Echo))
//!         .method(MethodDecl::on_message(
//!             "echo",
//!             [ParamType::Value(ValueType::String)],
//!             |_: &Echo, args| Ok(args.take_message()),
//!         ));
//!     container.deploy_annotated(class)?;
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//!     hermes::serve(listener, container).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! TCP ─► accept_connection ─► ServerContainer ─► EndpointWrapper ─► Session
//!                                                                     │
//!              Endpoint callbacks ◄── handlers ◄── decoders ◄─────────┘
//! ```

#![doc(html_root_url = "https://docs.rs/hermes/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

use std::io;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{debug, info};

// Re-export the runtime
pub use hermes_ws as ws;

// Re-export path templates
pub use hermes_router as router;

// Re-export logging and metrics
pub use hermes_telemetry as telemetry;

// Re-export configuration
pub use hermes_config as config;

/// Initialize logging and metrics from a loaded configuration.
pub fn init(config: &hermes_config::HermesConfig) -> hermes_telemetry::TelemetryResult<()> {
    hermes_telemetry::init_telemetry(&config.log_config(), &config.metrics_config())
}

/// Accept connections on `listener` and serve them from `container` until
/// accepting fails.
///
/// Each connection runs on its own task. Handshake and connection failures
/// are logged and do not stop the loop.
pub async fn serve(listener: TcpListener, container: Arc<hermes_ws::ServerContainer>) -> io::Result<()> {
    info!(address = ?listener.local_addr().ok(), "Hermes listening");
    loop {
        let (stream, peer) = listener.accept().await?;
        let container = Arc::clone(&container);
        tokio::spawn(async move {
            if let Err(e) = hermes_ws::accept_connection(container, stream).await {
                debug!(%peer, error = %e, "Connection ended with an error");
            }
        });
    }
}

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use hermes::prelude::*;
/// ```
pub mod prelude {
    pub use hermes_ws::{
        accept_connection, factory, serve_connection, singleton, AsyncRemote, BasicRemote,
        CloseCode, CloseReason, CoderRegistry, Decoder, Encoder, Endpoint, EndpointConfig,
        EndpointFactory, HandshakeInfo, Message, MessageHandler, Session, SessionConfig,
        SessionId, Value, ValueType, WsError, WsResult,
    };

    // Annotated endpoints
    pub use hermes_ws::{EndpointClass, MethodArgs, MethodDecl, ParamType, ServerContainer};

    // Coder traits
    pub use hermes_ws::{
        BinaryDecoder, BinaryEncoder, BinaryStreamDecoder, BinaryStreamEncoder, TextDecoder,
        TextEncoder, TextStreamDecoder, TextStreamEncoder,
    };

    pub use hermes_config::{ConfigLoader, HermesConfig};
    pub use hermes_router::Params;
    pub use hermes_telemetry::{LogConfig, MetricsConfig};
}

#[cfg(test)]
mod tests {
    use super::prelude::*;
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use tokio_tungstenite::tungstenite;

    struct Upper;

    #[tokio::test]
    async fn test_serve_annotated_endpoint() {
        let container = Arc::new(ServerContainer::default());
        let class = EndpointClass::new("Upper", EndpointConfig::builder("/upper").build(), || Ok(Upper))
            .method(MethodDecl::on_message(
                "upper",
                [ParamType::Value(ValueType::String)],
                |_: &Upper, args| {
                    let text = args.message().and_then(Value::as_str).unwrap_or_default();
                    Ok(Some(Value::String(text.to_uppercase())))
                },
            ));
        container.deploy_annotated(class).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, Arc::clone(&container)));

        let (mut client, _) = tokio_tungstenite::connect_async(format!("ws://{address}/upper"))
            .await
            .unwrap();
        client.send(tungstenite::Message::text("shout")).await.unwrap();
        let reply = client.next().await.unwrap().unwrap();
        assert_eq!(reply, tungstenite::Message::text("SHOUT"));
        client.close(None).await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_path_is_refused() {
        let container = Arc::new(ServerContainer::default());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, container));

        let result = tokio_tungstenite::connect_async(format!("ws://{address}/missing")).await;
        match result {
            Err(tungstenite::Error::Http(response)) => assert_eq!(response.status(), 404),
            Err(e) => panic!("expected a 404, got {e}"),
            Ok(_) => panic!("handshake to an unknown path succeeded"),
        }
    }
}
