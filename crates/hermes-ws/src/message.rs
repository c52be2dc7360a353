//! Outbound and inbound WebSocket frames.
//!
//! [`Message`] is the unit exchanged with a [`Connection`](crate::Connection):
//! whole text/binary messages plus control frames. Fragmented sends go
//! through the connection's partial-send methods instead.

use std::borrow::Cow;

use bytes::Bytes;

use crate::error::{CloseCode, CloseReason};

/// A WebSocket frame as seen by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A text message (UTF-8 encoded).
    Text(String),
    /// A binary message.
    Binary(Bytes),
    /// A ping frame.
    Ping(Bytes),
    /// A pong frame.
    Pong(Bytes),
    /// A close frame with optional code and reason.
    Close(Option<CloseReason>),
}

impl Message {
    /// Create a new text message.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Create a new binary message.
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self::Binary(data.into())
    }

    /// Create a new ping message.
    pub fn ping(data: impl Into<Bytes>) -> Self {
        Self::Ping(data.into())
    }

    /// Create a new pong message.
    pub fn pong(data: impl Into<Bytes>) -> Self {
        Self::Pong(data.into())
    }

    /// Create a close message with a code and its standard phrase.
    pub fn close(code: CloseCode) -> Self {
        Self::Close(Some(CloseReason::standard(code)))
    }

    /// Short lowercase label (`text`, `binary`, ...) used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Binary(_) => "binary",
            Self::Ping(_) => "ping",
            Self::Pong(_) => "pong",
            Self::Close(_) => "close",
        }
    }

    /// Check if this is a control message (ping, pong, or close).
    pub fn is_control(&self) -> bool {
        matches!(self, Self::Ping(_) | Self::Pong(_) | Self::Close(_))
    }

    /// Get the message payload as text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Get the message payload as bytes. `None` for close frames.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Text(s) => Some(s.as_bytes()),
            Self::Binary(b) | Self::Ping(b) | Self::Pong(b) => Some(b),
            Self::Close(_) => None,
        }
    }

    /// Get the length of the message payload in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Text(s) => s.len(),
            Self::Binary(b) | Self::Ping(b) | Self::Pong(b) => b.len(),
            Self::Close(Some(reason)) => 2 + reason.phrase.len(),
            Self::Close(None) => 0,
        }
    }

    /// Check if the message payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<String> for Message {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for Message {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<Bytes> for Message {
    fn from(b: Bytes) -> Self {
        Self::Binary(b)
    }
}

impl From<Vec<u8>> for Message {
    fn from(b: Vec<u8>) -> Self {
        Self::Binary(Bytes::from(b))
    }
}

/// Convert from tungstenite Message.
///
/// Raw frames never surface from a reading stream; they map to an empty
/// binary message.
impl From<tungstenite::Message> for Message {
    fn from(msg: tungstenite::Message) -> Self {
        match msg {
            tungstenite::Message::Text(s) => Self::Text(s.to_string()),
            tungstenite::Message::Binary(b) => Self::Binary(b),
            tungstenite::Message::Ping(b) => Self::Ping(b),
            tungstenite::Message::Pong(b) => Self::Pong(b),
            tungstenite::Message::Close(frame) => Self::Close(frame.map(|f| CloseReason {
                code: f.code.into(),
                phrase: Cow::Owned(f.reason.to_string()),
            })),
            tungstenite::Message::Frame(_) => Self::Binary(Bytes::new()),
        }
    }
}

/// Convert to tungstenite Message.
impl From<Message> for tungstenite::Message {
    fn from(msg: Message) -> Self {
        match msg {
            Message::Text(s) => Self::Text(s.into()),
            Message::Binary(b) => Self::Binary(b),
            Message::Ping(b) => Self::Ping(b),
            Message::Pong(b) => Self::Pong(b),
            Message::Close(reason) => {
                Self::Close(reason.map(|r| tungstenite::protocol::CloseFrame {
                    code: r.code.into(),
                    reason: r.phrase.into_owned().into(),
                }))
            }
        }
    }
}
