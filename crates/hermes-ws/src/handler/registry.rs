//! Per-session handler admission control.

use std::cell::OnceCell;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::coder::CoderRegistry;
use crate::error::{WsError, WsResult};
use crate::handler::{HandlerCategory, MessageHandler, WholeHandler};
use crate::types::ValueType;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct HandlerKey {
    partial: bool,
    ty: ValueType,
}

/// How an entry is admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    /// Occupies an exclusive category.
    Category(HandlerCategory),
    /// Whole handler for a type reached through decoders; takes no slot.
    Decoded { text: bool, binary: bool },
}

#[derive(Debug)]
struct Entry {
    handler: MessageHandler,
    admission: Admission,
}

/// The handlers registered on one session.
///
/// Enforces at most one handler per [`HandlerCategory`] and at most one
/// handler per exact (kind, type) pair. Whole handlers for types outside
/// the text, binary and pong families are accepted when some decoder
/// produces the type; they are tracked but occupy no category.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use hermes_ws::{CoderRegistry, HandlerRegistry, MessageHandler, ValueType, WsError};
///
/// let mut registry = HandlerRegistry::new(Arc::new(CoderRegistry::default()));
/// registry.add(MessageHandler::whole(ValueType::String, |_| Ok(()))).unwrap();
///
/// let err = registry
///     .add(MessageHandler::whole(ValueType::Reader, |_| Ok(())))
///     .unwrap_err();
/// assert!(matches!(err, WsError::HandlerAlreadyRegistered { .. }));
///
/// // A different category is fine.
/// registry.add(MessageHandler::partial(ValueType::String, |_, _| Ok(()))).unwrap();
/// ```
#[derive(Debug)]
pub struct HandlerRegistry {
    coders: Arc<CoderRegistry>,
    entries: IndexMap<HandlerKey, Entry>,
    handlers: OnceCell<Arc<[MessageHandler]>>,
    ordered: OnceCell<Arc<[WholeHandler]>>,
}

impl HandlerRegistry {
    /// Create an empty registry resolving decodable types through `coders`.
    pub fn new(coders: Arc<CoderRegistry>) -> Self {
        Self {
            coders,
            entries: IndexMap::new(),
            handlers: OnceCell::new(),
            ordered: OnceCell::new(),
        }
    }

    /// Register a handler.
    ///
    /// Fails when the handler's category is occupied, when a handler of the
    /// same kind and type exists, or when the type cannot be delivered.
    pub fn add(&mut self, handler: MessageHandler) -> WsResult<()> {
        let ty = handler.value_type().clone();
        let admission = self.admission(&handler)?;

        if let Admission::Category(category) = admission {
            if self.is_occupied(category) {
                return Err(WsError::HandlerAlreadyRegistered { category });
            }
        }

        let key = HandlerKey {
            partial: handler.is_partial(),
            ty,
        };
        if self.entries.contains_key(&key) {
            return Err(WsError::DuplicateHandlerType {
                ty: key.ty.to_string(),
            });
        }

        self.entries.insert(key, Entry { handler, admission });
        self.invalidate();
        Ok(())
    }

    /// Remove a handler by identity. Returns `false` when it was not registered.
    pub fn remove(&mut self, handler: &MessageHandler) -> bool {
        let Some(index) = self
            .entries
            .values()
            .position(|entry| entry.handler.ptr_eq(handler))
        else {
            return false;
        };
        self.entries.shift_remove_index(index);
        self.invalidate();
        true
    }

    /// Remove every handler.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.invalidate();
    }

    /// Registered handlers in registration order.
    ///
    /// The returned view is shared until the next mutation.
    pub fn handlers(&self) -> Arc<[MessageHandler]> {
        Arc::clone(self.handlers.get_or_init(|| {
            self.entries
                .values()
                .map(|entry| entry.handler.clone())
                .collect()
        }))
    }

    /// Whole handlers, most specific type first, then registration order.
    ///
    /// A handler ranks after every registered handler whose type it is a
    /// supertype of, which gives a total order even for unrelated types.
    pub fn ordered_whole_handlers(&self) -> Arc<[WholeHandler]> {
        Arc::clone(self.ordered.get_or_init(|| {
            let wholes: Vec<&WholeHandler> = self
                .entries
                .values()
                .filter_map(|entry| match &entry.handler {
                    MessageHandler::Whole(h) => Some(h),
                    MessageHandler::Partial(_) => None,
                })
                .collect();
            let mut ranked: Vec<(usize, &WholeHandler)> = wholes
                .iter()
                .map(|h| {
                    let generality = wholes
                        .iter()
                        .filter(|other| {
                            other.value_type() != h.value_type()
                                && h.value_type().is_assignable_from(other.value_type())
                        })
                        .count();
                    (generality, *h)
                })
                .collect();
            ranked.sort_by_key(|(generality, _)| *generality);
            ranked.into_iter().map(|(_, h)| h.clone()).collect()
        }))
    }

    /// Handler registered for exactly `ty`, whole handlers first.
    pub fn handler_for(&self, ty: &ValueType) -> Option<MessageHandler> {
        [false, true].iter().find_map(|partial| {
            self.entries
                .get(&HandlerKey {
                    partial: *partial,
                    ty: ty.clone(),
                })
                .map(|entry| entry.handler.clone())
        })
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when the category is occupied.
    pub fn is_occupied(&self, category: HandlerCategory) -> bool {
        self.entries
            .values()
            .any(|entry| entry.admission == Admission::Category(category))
    }

    /// A whole text handler, or a whole handler fed by a text decoder.
    pub fn is_whole_text_present(&self) -> bool {
        self.entries.values().any(|entry| {
            matches!(
                entry.admission,
                Admission::Category(HandlerCategory::WholeText) | Admission::Decoded { text: true, .. }
            )
        })
    }

    /// A whole binary handler, or a whole handler fed by a binary decoder.
    pub fn is_whole_binary_present(&self) -> bool {
        self.entries.values().any(|entry| {
            matches!(
                entry.admission,
                Admission::Category(HandlerCategory::WholeBinary)
                    | Admission::Decoded { binary: true, .. }
            )
        })
    }

    /// A partial text handler.
    pub fn is_partial_text_present(&self) -> bool {
        self.is_occupied(HandlerCategory::PartialText)
    }

    /// A partial binary handler.
    pub fn is_partial_binary_present(&self) -> bool {
        self.is_occupied(HandlerCategory::PartialBinary)
    }

    /// A whole `Reader` handler.
    pub fn is_reader_present(&self) -> bool {
        self.has_whole(&ValueType::Reader)
    }

    /// A whole `InputStream` handler.
    pub fn is_input_stream_present(&self) -> bool {
        self.has_whole(&ValueType::InputStream)
    }

    /// A pong handler.
    pub fn is_pong_present(&self) -> bool {
        self.is_occupied(HandlerCategory::Pong)
    }

    fn has_whole(&self, ty: &ValueType) -> bool {
        self.entries.contains_key(&HandlerKey {
            partial: false,
            ty: ty.clone(),
        })
    }

    fn admission(&self, handler: &MessageHandler) -> WsResult<Admission> {
        let ty = handler.value_type();
        if let Some(category) = HandlerCategory::of(handler.is_partial(), ty) {
            return Ok(Admission::Category(category));
        }
        if handler.is_partial() {
            return Err(WsError::unsupported_handler(
                ty,
                "partial handlers accept String, ByteBuffer or ByteArray",
            ));
        }
        let text = self.coders.has_text_decoder_for(ty);
        let binary = self.coders.has_binary_decoder_for(ty);
        if !text && !binary {
            return Err(WsError::unsupported_handler(ty, "no decoder produces this type"));
        }
        Ok(Admission::Decoded { text, binary })
    }

    fn invalidate(&mut self) {
        self.handlers = OnceCell::new();
        self.ordered = OnceCell::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coder::{Decoder, TextDecoder};
    use crate::types::{CustomType, Value};

    struct EventDecoder;

    impl TextDecoder for EventDecoder {
        fn decode(&self, text: &str) -> WsResult<Value> {
            Ok(Value::String(text.to_string()))
        }
    }

    fn registry() -> HandlerRegistry {
        HandlerRegistry::new(Arc::new(CoderRegistry::default()))
    }

    fn whole(ty: ValueType) -> MessageHandler {
        MessageHandler::whole(ty, |_| Ok(()))
    }

    fn partial(ty: ValueType) -> MessageHandler {
        MessageHandler::partial(ty, |_, _| Ok(()))
    }

    #[test]
    fn test_second_whole_text_handler_rejected_regardless_of_type() {
        for (first, second) in [
            (ValueType::String, ValueType::String),
            (ValueType::String, ValueType::Reader),
            (ValueType::Reader, ValueType::String),
        ] {
            let mut registry = registry();
            registry.add(whole(first)).unwrap();
            let err = registry.add(whole(second)).unwrap_err();
            assert!(matches!(
                err,
                WsError::HandlerAlreadyRegistered {
                    category: HandlerCategory::WholeText
                }
            ));
        }
    }

    #[test]
    fn test_partial_text_after_whole_text_succeeds() {
        let mut registry = registry();
        registry.add(whole(ValueType::String)).unwrap();
        registry.add(partial(ValueType::String)).unwrap();
        assert!(registry.is_whole_text_present());
        assert!(registry.is_partial_text_present());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_binary_categories() {
        let mut registry = registry();
        registry.add(whole(ValueType::InputStream)).unwrap();
        assert!(registry.is_input_stream_present());
        assert!(registry.is_whole_binary_present());
        assert!(matches!(
            registry.add(whole(ValueType::ByteArray)),
            Err(WsError::HandlerAlreadyRegistered { .. })
        ));
        registry.add(partial(ValueType::ByteBuffer)).unwrap();
        assert!(matches!(
            registry.add(partial(ValueType::ByteArray)),
            Err(WsError::HandlerAlreadyRegistered {
                category: HandlerCategory::PartialBinary
            })
        ));
    }

    #[test]
    fn test_pong_category() {
        let mut registry = registry();
        assert!(!registry.is_pong_present());
        registry.add(whole(ValueType::Pong)).unwrap();
        assert!(registry.is_pong_present());
        assert!(registry.add(whole(ValueType::Pong)).is_err());
    }

    #[test]
    fn test_partial_rejects_stream_types() {
        let mut registry = registry();
        let err = registry.add(partial(ValueType::Reader)).unwrap_err();
        assert!(matches!(err, WsError::UnsupportedHandlerType { .. }));
        assert!(registry.add(partial(ValueType::Integer)).is_err());
    }

    #[test]
    fn test_decodable_type_takes_no_slot() {
        let mut registry = registry();
        registry.add(whole(ValueType::Integer)).unwrap();
        assert!(registry.is_whole_text_present());
        assert!(!registry.is_whole_binary_present());
        registry.add(whole(ValueType::String)).unwrap();
        registry.add(whole(ValueType::Long)).unwrap();
        let err = registry.add(whole(ValueType::Integer)).unwrap_err();
        assert!(matches!(err, WsError::DuplicateHandlerType { .. }));
    }

    #[test]
    fn test_undecodable_type_rejected() {
        let mut registry = registry();
        let err = registry.add(whole(ValueType::custom("Event"))).unwrap_err();
        assert!(matches!(err, WsError::UnsupportedHandlerType { .. }));

        let coders = CoderRegistry::new(
            &[Decoder::text(ValueType::custom("Event"), EventDecoder)],
            &[],
        );
        let mut registry = HandlerRegistry::new(Arc::new(coders));
        registry.add(whole(ValueType::custom("Event"))).unwrap();
        assert!(registry.is_whole_text_present());
    }

    #[test]
    fn test_remove_by_identity_releases_category() {
        let mut registry = registry();
        let handler = whole(ValueType::String);
        registry.add(handler.clone()).unwrap();
        assert!(!registry.remove(&whole(ValueType::String)));
        assert!(registry.remove(&handler));
        assert!(!registry.is_whole_text_present());
        registry.add(whole(ValueType::Reader)).unwrap();
        assert!(registry.is_reader_present());
    }

    #[test]
    fn test_handlers_view_cached_until_mutation() {
        let mut registry = registry();
        registry.add(whole(ValueType::String)).unwrap();
        let first = registry.handlers();
        let again = registry.handlers();
        assert!(Arc::ptr_eq(&first, &again));

        registry.add(whole(ValueType::Pong)).unwrap();
        let after = registry.handlers();
        assert!(!Arc::ptr_eq(&first, &after));
        assert_eq!(after.len(), 2);
        assert_eq!(first.len(), 1);
    }

    #[test]
    fn test_ordered_whole_handlers_most_specific_first() {
        let event = ValueType::custom("Event");
        let chat = ValueType::Custom(CustomType::new("Chat").extends([event.clone()]));
        let coders = CoderRegistry::new(
            &[
                Decoder::text(chat.clone(), EventDecoder),
                Decoder::text(event.clone(), EventDecoder),
            ],
            &[],
        );
        let mut registry = HandlerRegistry::new(Arc::new(coders));
        registry.add(whole(ValueType::Object)).unwrap();
        registry.add(whole(event.clone())).unwrap();
        registry.add(whole(ValueType::Pong)).unwrap();
        registry.add(whole(chat.clone())).unwrap();

        let order: Vec<ValueType> = registry
            .ordered_whole_handlers()
            .iter()
            .map(|h| h.value_type().clone())
            .collect();
        // Unrelated types keep registration order.
        assert_eq!(order, vec![ValueType::Pong, chat, event, ValueType::Object]);
    }

    #[test]
    fn test_handler_for_exact_type() {
        let mut registry = registry();
        registry.add(partial(ValueType::ByteBuffer)).unwrap();
        assert!(registry
            .handler_for(&ValueType::ByteBuffer)
            .is_some_and(|h| h.is_partial()));
        assert!(registry.handler_for(&ValueType::String).is_none());
    }
}
