//! Message handlers.
//!
//! A session delivers messages to registered [`MessageHandler`]s. Whole
//! handlers receive a complete, decoded message; partial handlers receive
//! each fragment with a flag marking the last one.

mod registry;

use std::fmt;
use std::sync::Arc;

use crate::types::{Value, ValueType};

pub use registry::HandlerRegistry;

/// Callback of a whole-message handler.
pub type WholeCallback = Arc<dyn Fn(Value) -> anyhow::Result<()> + Send + Sync>;

/// Callback of a partial-message handler. The flag is `true` for the last fragment.
pub type PartialCallback = Arc<dyn Fn(Value, bool) -> anyhow::Result<()> + Send + Sync>;

/// Receives complete messages of one type.
#[derive(Clone)]
pub struct WholeHandler {
    ty: ValueType,
    max_message_size: Option<usize>,
    callback: WholeCallback,
}

impl WholeHandler {
    /// Handler for messages of type `ty`.
    pub fn new<F>(ty: ValueType, callback: F) -> Self
    where
        F: Fn(Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            ty,
            max_message_size: None,
            callback: Arc::new(callback),
        }
    }

    /// Reject messages longer than `size` bytes.
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = Some(size);
        self
    }

    /// Declared message type.
    pub fn value_type(&self) -> &ValueType {
        &self.ty
    }

    /// Size limit, `None` when unlimited.
    pub fn max_message_size(&self) -> Option<usize> {
        self.max_message_size
    }

    /// Invoke the callback.
    pub fn on_message(&self, value: Value) -> anyhow::Result<()> {
        (self.callback)(value)
    }
}

/// Receives message fragments of one type.
#[derive(Clone)]
pub struct PartialHandler {
    ty: ValueType,
    max_message_size: Option<usize>,
    callback: PartialCallback,
}

impl PartialHandler {
    /// Handler for fragments of type `ty`.
    pub fn new<F>(ty: ValueType, callback: F) -> Self
    where
        F: Fn(Value, bool) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            ty,
            max_message_size: None,
            callback: Arc::new(callback),
        }
    }

    /// Reject fragments longer than `size` bytes.
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = Some(size);
        self
    }

    /// Declared fragment type.
    pub fn value_type(&self) -> &ValueType {
        &self.ty
    }

    /// Size limit, `None` when unlimited.
    pub fn max_message_size(&self) -> Option<usize> {
        self.max_message_size
    }

    /// Invoke the callback.
    pub fn on_message(&self, value: Value, last: bool) -> anyhow::Result<()> {
        (self.callback)(value, last)
    }
}

/// A registered handler.
///
/// Handlers compare by identity: two clones of one handler are equal, two
/// handlers built from identical closures are not.
#[derive(Clone)]
pub enum MessageHandler {
    /// Receives whole messages.
    Whole(WholeHandler),
    /// Receives fragments.
    Partial(PartialHandler),
}

impl MessageHandler {
    /// Whole-message handler for `ty`.
    pub fn whole<F>(ty: ValueType, callback: F) -> Self
    where
        F: Fn(Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::Whole(WholeHandler::new(ty, callback))
    }

    /// Partial-message handler for `ty`.
    pub fn partial<F>(ty: ValueType, callback: F) -> Self
    where
        F: Fn(Value, bool) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::Partial(PartialHandler::new(ty, callback))
    }

    /// Declared message type.
    pub fn value_type(&self) -> &ValueType {
        match self {
            Self::Whole(h) => h.value_type(),
            Self::Partial(h) => h.value_type(),
        }
    }

    /// Size limit, `None` when unlimited.
    pub fn max_message_size(&self) -> Option<usize> {
        match self {
            Self::Whole(h) => h.max_message_size(),
            Self::Partial(h) => h.max_message_size(),
        }
    }

    /// True for partial handlers.
    pub fn is_partial(&self) -> bool {
        matches!(self, Self::Partial(_))
    }

    /// True when both refer to the same handler.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Whole(a), Self::Whole(b)) => Arc::ptr_eq(&a.callback, &b.callback),
            (Self::Partial(a), Self::Partial(b)) => Arc::ptr_eq(&a.callback, &b.callback),
            _ => false,
        }
    }
}

impl PartialEq for MessageHandler {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl From<WholeHandler> for MessageHandler {
    fn from(handler: WholeHandler) -> Self {
        Self::Whole(handler)
    }
}

impl From<PartialHandler> for MessageHandler {
    fn from(handler: PartialHandler) -> Self {
        Self::Partial(handler)
    }
}

impl fmt::Debug for WholeHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WholeHandler")
            .field("ty", &self.ty)
            .field("max_message_size", &self.max_message_size)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for PartialHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartialHandler")
            .field("ty", &self.ty)
            .field("max_message_size", &self.max_message_size)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for MessageHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Whole(h) => h.fmt(f),
            Self::Partial(h) => h.fmt(f),
        }
    }
}

/// Admission-control unit: at most one handler per category per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerCategory {
    /// Whole `String` or `Reader`.
    WholeText,
    /// Partial `String`.
    PartialText,
    /// Whole `ByteBuffer`, `ByteArray` or `InputStream`.
    WholeBinary,
    /// Partial `ByteBuffer` or `ByteArray`.
    PartialBinary,
    /// `Pong`.
    Pong,
}

impl HandlerCategory {
    /// Category implied by the handler kind and type, if the type has one.
    ///
    /// Types outside the text, binary and pong families have no category.
    pub fn of(partial: bool, ty: &ValueType) -> Option<Self> {
        match (partial, ty) {
            (false, ty) if ty.is_text() => Some(Self::WholeText),
            (false, ty) if ty.is_binary() => Some(Self::WholeBinary),
            (false, ValueType::Pong) => Some(Self::Pong),
            (true, ValueType::String) => Some(Self::PartialText),
            (true, ValueType::ByteBuffer | ValueType::ByteArray) => Some(Self::PartialBinary),
            _ => None,
        }
    }
}

impl fmt::Display for HandlerCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::WholeText => "whole text",
            Self::PartialText => "partial text",
            Self::WholeBinary => "whole binary",
            Self::PartialBinary => "partial binary",
            Self::Pong => "pong",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_identity() {
        let a = MessageHandler::whole(ValueType::String, |_| Ok(()));
        let b = MessageHandler::whole(ValueType::String, |_| Ok(()));
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn test_category_of() {
        assert_eq!(
            HandlerCategory::of(false, &ValueType::Reader),
            Some(HandlerCategory::WholeText)
        );
        assert_eq!(
            HandlerCategory::of(true, &ValueType::ByteArray),
            Some(HandlerCategory::PartialBinary)
        );
        assert_eq!(HandlerCategory::of(true, &ValueType::Reader), None);
        assert_eq!(HandlerCategory::of(false, &ValueType::Integer), None);
        assert_eq!(HandlerCategory::of(false, &ValueType::Pong), Some(HandlerCategory::Pong));
    }

    #[test]
    fn test_category_display() {
        assert_eq!(HandlerCategory::PartialBinary.to_string(), "partial binary");
    }

    #[test]
    fn test_max_message_size() {
        let handler: MessageHandler = WholeHandler::new(ValueType::String, |_| Ok(()))
            .with_max_message_size(16)
            .into();
        assert_eq!(handler.max_message_size(), Some(16));
        assert!(!handler.is_partial());
    }

    #[test]
    fn test_partial_callback_receives_flag() {
        let handler = PartialHandler::new(ValueType::String, |value, last| {
            anyhow::ensure!(last, "expected last fragment, got {value}");
            Ok(())
        });
        assert!(handler.on_message(Value::from("x"), true).is_ok());
        assert!(handler.on_message(Value::from("x"), false).is_err());
    }
}
