//! Error types for the endpoint runtime.
//!
//! [`WsError`] covers every failure the engine itself raises: coder
//! resolution, handler registration, size limits, streaming overflow and
//! transport errors. Deployment-time violations are batched into a
//! [`DeploymentError`] instead of failing on the first one.

use std::borrow::Cow;
use std::fmt;

use thiserror::Error;

use crate::handler::HandlerCategory;

/// Result type for runtime operations.
pub type WsResult<T> = Result<T, WsError>;

/// Errors raised by the endpoint runtime.
#[derive(Debug, Error)]
pub enum WsError {
    /// A payload could not be decoded.
    #[error("failed to decode message: {0}")]
    DecodeFailed(String),

    /// No encoder accepted the outbound object, or the encoder failed.
    #[error("{reason} Object: {object}")]
    EncodeFailed {
        /// Debug rendering of the object being sent.
        object: String,
        /// Why encoding failed.
        reason: String,
    },

    /// A handler for the category is already registered on the session.
    #[error("{category} message handler already registered")]
    HandlerAlreadyRegistered {
        /// The occupied category.
        category: HandlerCategory,
    },

    /// A handler for the exact same message type is already registered.
    #[error("message handler for type {ty} already registered")]
    DuplicateHandlerType {
        /// The duplicated type.
        ty: String,
    },

    /// The handler's message type cannot be registered.
    #[error("unsupported message handler type {ty}: {reason}")]
    UnsupportedHandlerType {
        /// The rejected type.
        ty: String,
        /// Why the type is rejected.
        reason: String,
    },

    /// No handler exists for an inbound message.
    #[error("{0} message handler not found")]
    HandlerNotFound(&'static str),

    /// A message exceeded a configured size limit.
    #[error("Message too long; allowed message size is {limit} bytes. (Current message length is {actual} bytes).")]
    MessageTooBig {
        /// The configured limit.
        limit: usize,
        /// The offending length.
        actual: usize,
    },

    /// A streamed message buffered more than the streaming cap.
    #[error("buffer overflow: more than {limit} bytes buffered before the reader consumed them")]
    BufferOverflow {
        /// The streaming cap.
        limit: usize,
    },

    /// A fragment arrived that does not continue the message in progress.
    #[error("fragment out of order: {0}")]
    OutOfOrder(String),

    /// The session is closed.
    #[error("session closed")]
    SessionClosed,

    /// A control frame payload exceeded 125 bytes.
    #[error("{kind} message exceeded the maximum allowed payload of 125 bytes.")]
    PayloadTooLarge {
        /// `Ping` or `Pong`.
        kind: &'static str,
    },

    /// The transport refused an outbound frame.
    #[error("failed to send message: {0}")]
    SendFailed(String),

    /// The endpoint instance could not be created.
    #[error("endpoint instance unavailable: {0}")]
    InstanceUnavailable(String),

    /// The endpoint refused a new session because it is at capacity.
    #[error("session limit reached: {0}")]
    SessionLimit(usize),

    /// A path template was rejected.
    #[error("invalid endpoint path: {0}")]
    Route(#[from] hermes_router::RouterError),

    /// Deployment validation failed.
    #[error(transparent)]
    Deployment(#[from] DeploymentError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Tungstenite error.
    #[error("tungstenite error: {0}")]
    Tungstenite(#[from] tungstenite::Error),
}

impl WsError {
    /// Create a new decode failed error.
    pub fn decode_failed(reason: impl Into<String>) -> Self {
        Self::DecodeFailed(reason.into())
    }

    /// Create a new encode failed error.
    pub fn encode_failed(object: impl fmt::Debug, reason: impl Into<String>) -> Self {
        Self::EncodeFailed {
            object: format!("{object:?}"),
            reason: reason.into(),
        }
    }

    /// Create a new unsupported handler type error.
    pub fn unsupported_handler(ty: impl fmt::Display, reason: impl Into<String>) -> Self {
        Self::UnsupportedHandlerType {
            ty: ty.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a new send failed error.
    pub fn send_failed(reason: impl Into<String>) -> Self {
        Self::SendFailed(reason.into())
    }

    /// Create a new out-of-order error.
    pub fn out_of_order(reason: impl Into<String>) -> Self {
        Self::OutOfOrder(reason.into())
    }

    /// The close code the session should be closed with, if any.
    pub fn close_code(&self) -> Option<CloseCode> {
        match self {
            Self::MessageTooBig { .. } => Some(CloseCode::MessageTooBig),
            Self::InstanceUnavailable(_) => Some(CloseCode::UnexpectedCondition),
            Self::SessionLimit(_) => Some(CloseCode::TryAgainLater),
            Self::OutOfOrder(_) => Some(CloseCode::Protocol),
            _ => None,
        }
    }

    /// Check if this error ends the session.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::MessageTooBig { .. }
                | Self::InstanceUnavailable(_)
                | Self::SessionLimit(_)
                | Self::SessionClosed
                | Self::Tungstenite(_)
        )
    }

    /// Short stable label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DecodeFailed(_) => "decode",
            Self::EncodeFailed { .. } => "encode",
            Self::HandlerAlreadyRegistered { .. }
            | Self::DuplicateHandlerType { .. }
            | Self::UnsupportedHandlerType { .. } => "registration",
            Self::HandlerNotFound(_) => "no_handler",
            Self::MessageTooBig { .. } => "too_big",
            Self::BufferOverflow { .. } => "overflow",
            Self::OutOfOrder(_) => "out_of_order",
            Self::SessionClosed => "closed",
            Self::PayloadTooLarge { .. } => "control_payload",
            Self::SendFailed(_) | Self::Io(_) | Self::Tungstenite(_) => "transport",
            Self::InstanceUnavailable(_) => "instance",
            Self::SessionLimit(_) => "session_limit",
            Self::Route(_) | Self::Deployment(_) => "deployment",
        }
    }
}

/// Every violation found while validating one endpoint class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentError {
    /// Path template of the endpoint that failed.
    pub endpoint: String,
    /// One message per violation, in discovery order.
    pub violations: Vec<String>,
}

impl DeploymentError {
    /// Number of collected violations.
    pub fn len(&self) -> usize {
        self.violations.len()
    }

    /// True when no violations were collected.
    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }
}

impl fmt::Display for DeploymentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "deployment of endpoint {} failed with {} error(s):",
            self.endpoint,
            self.violations.len()
        )?;
        for violation in &self.violations {
            write!(f, "\n  - {violation}")?;
        }
        Ok(())
    }
}

impl std::error::Error for DeploymentError {}

/// Close code for WebSocket sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CloseCode {
    /// Normal closure (1000).
    Normal = 1000,
    /// Going away (1001).
    GoingAway = 1001,
    /// Protocol error (1002).
    Protocol = 1002,
    /// Cannot accept the data type (1003).
    CannotAccept = 1003,
    /// No status received (1005).
    NoStatus = 1005,
    /// Abnormal closure (1006).
    Abnormal = 1006,
    /// Payload inconsistent with the message type (1007).
    NotConsistent = 1007,
    /// Policy violation (1008).
    PolicyViolation = 1008,
    /// Message too big (1009).
    MessageTooBig = 1009,
    /// Extension required (1010).
    ExtensionRequired = 1010,
    /// Unexpected condition (1011).
    UnexpectedCondition = 1011,
    /// Service restart (1012).
    ServiceRestart = 1012,
    /// Try again later (1013).
    TryAgainLater = 1013,
    /// TLS handshake failure (1015).
    TlsHandshake = 1015,
}

impl CloseCode {
    /// Convert from a u16 code.
    pub fn from_u16(code: u16) -> Option<Self> {
        match code {
            1000 => Some(Self::Normal),
            1001 => Some(Self::GoingAway),
            1002 => Some(Self::Protocol),
            1003 => Some(Self::CannotAccept),
            1005 => Some(Self::NoStatus),
            1006 => Some(Self::Abnormal),
            1007 => Some(Self::NotConsistent),
            1008 => Some(Self::PolicyViolation),
            1009 => Some(Self::MessageTooBig),
            1010 => Some(Self::ExtensionRequired),
            1011 => Some(Self::UnexpectedCondition),
            1012 => Some(Self::ServiceRestart),
            1013 => Some(Self::TryAgainLater),
            1015 => Some(Self::TlsHandshake),
            _ => None,
        }
    }

    /// Get the u16 value of this close code.
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Standard reason phrase sent with this code.
    pub fn phrase(self) -> &'static str {
        match self {
            Self::Normal => "Normal closure.",
            Self::GoingAway => "Going away.",
            Self::Protocol => "Protocol error.",
            Self::CannotAccept => "Cannot accept.",
            Self::NoStatus => "No status code.",
            Self::Abnormal => "Closed abnormally.",
            Self::NotConsistent => "Not consistent.",
            Self::PolicyViolation => "Violated policy.",
            Self::MessageTooBig => "Message too big.",
            Self::ExtensionRequired => "No extension.",
            Self::UnexpectedCondition => "Unexpected condition.",
            Self::ServiceRestart => "Service restart.",
            Self::TryAgainLater => "Try again later.",
            Self::TlsHandshake => "TLS handshake failure.",
        }
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({})", self, self.as_u16())
    }
}

/// A close code paired with its reason phrase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    /// Numeric close code.
    pub code: u16,
    /// Reason phrase.
    pub phrase: Cow<'static, str>,
}

impl CloseReason {
    /// Create a close reason with a custom phrase.
    pub fn new(code: CloseCode, phrase: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code: code.as_u16(),
            phrase: phrase.into(),
        }
    }

    /// Create a close reason carrying the code's standard phrase.
    pub fn standard(code: CloseCode) -> Self {
        Self::new(code, code.phrase())
    }

    /// Normal closure.
    pub fn normal() -> Self {
        Self::standard(CloseCode::Normal)
    }

    /// The standard code, when the numeric code is one.
    pub fn close_code(&self) -> Option<CloseCode> {
        CloseCode::from_u16(self.code)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.phrase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_too_big_text() {
        let err = WsError::MessageTooBig {
            limit: 4,
            actual: 10,
        };
        assert_eq!(
            err.to_string(),
            "Message too long; allowed message size is 4 bytes. (Current message length is 10 bytes)."
        );
        assert_eq!(err.close_code(), Some(CloseCode::MessageTooBig));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_handler_already_registered_names_category() {
        let err = WsError::HandlerAlreadyRegistered {
            category: HandlerCategory::WholeText,
        };
        assert!(err.to_string().contains("whole text"));
        assert_eq!(err.kind(), "registration");
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_encode_failed_carries_object() {
        let err = WsError::encode_failed(vec![1, 2], "Encoding failed.");
        assert!(err.to_string().contains("[1, 2]"));
        assert!(err.to_string().starts_with("Encoding failed."));
    }

    #[test]
    fn test_payload_too_large_text() {
        let err = WsError::PayloadTooLarge { kind: "Ping" };
        assert_eq!(
            err.to_string(),
            "Ping message exceeded the maximum allowed payload of 125 bytes."
        );
    }

    #[test]
    fn test_deployment_error_lists_violations() {
        let err = DeploymentError {
            endpoint: "/chat".to_string(),
            violations: vec!["first".to_string(), "second".to_string()],
        };
        let text = err.to_string();
        assert!(text.contains("2 error(s)"));
        assert!(text.contains("\n  - first"));
        assert!(text.contains("\n  - second"));
    }

    #[test]
    fn test_close_code_round_trip() {
        assert_eq!(CloseCode::from_u16(1009), Some(CloseCode::MessageTooBig));
        assert_eq!(CloseCode::from_u16(9999), None);
        assert_eq!(CloseCode::UnexpectedCondition.as_u16(), 1011);
    }

    #[test]
    fn test_close_code_display() {
        assert_eq!(CloseCode::Normal.to_string(), "Normal (1000)");
        assert_eq!(CloseCode::Protocol.to_string(), "Protocol (1002)");
    }

    #[test]
    fn test_close_reason_standard_phrase() {
        let reason = CloseReason::standard(CloseCode::MessageTooBig);
        assert_eq!(reason.code, 1009);
        assert_eq!(reason.phrase, "Message too big.");
        assert_eq!(reason.close_code(), Some(CloseCode::MessageTooBig));
    }
}
