//! Decoders.
//!
//! A decoder is one of four kinds, chosen by the payload it consumes. The
//! kind is fixed when the [`Decoder`] is built, so resolution is a single
//! match instead of a series of capability checks.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::config::EndpointConfig;
use crate::error::{WsError, WsResult};
use crate::stream::{BinaryReader, TextReader};
use crate::types::{Value, ValueType};

/// Decodes whole text messages.
pub trait TextDecoder: Send + Sync {
    /// Called when this instance goes into service: on its session's open
    /// when built per session, else when the endpoint's first session opens.
    fn init(&self, _config: &EndpointConfig) {}

    /// Called when this instance is retired: on its session's close, or
    /// when the endpoint's last session closes.
    fn destroy(&self) {}

    /// Whether `text` can be decoded. Defaults to `true`.
    fn will_decode(&self, _text: &str) -> bool {
        true
    }

    /// Decode `text`.
    fn decode(&self, text: &str) -> WsResult<Value>;
}

/// Decodes whole binary messages.
pub trait BinaryDecoder: Send + Sync {
    /// Called when this instance goes into service: on its session's open
    /// when built per session, else when the endpoint's first session opens.
    fn init(&self, _config: &EndpointConfig) {}

    /// Called when this instance is retired: on its session's close, or
    /// when the endpoint's last session closes.
    fn destroy(&self) {}

    /// Whether `data` can be decoded. Defaults to `true`.
    fn will_decode(&self, _data: &[u8]) -> bool {
        true
    }

    /// Decode `data`.
    fn decode(&self, data: &[u8]) -> WsResult<Value>;
}

/// Decodes text read from a character stream.
pub trait TextStreamDecoder: Send + Sync {
    /// Called when this instance goes into service: on its session's open
    /// when built per session, else when the endpoint's first session opens.
    fn init(&self, _config: &EndpointConfig) {}

    /// Called when this instance is retired: on its session's close, or
    /// when the endpoint's last session closes.
    fn destroy(&self) {}

    /// Decode from `reader`.
    fn decode(&self, reader: TextReader) -> WsResult<Value>;
}

/// Decodes bytes read from a byte stream.
pub trait BinaryStreamDecoder: Send + Sync {
    /// Called when this instance goes into service: on its session's open
    /// when built per session, else when the endpoint's first session opens.
    fn init(&self, _config: &EndpointConfig) {}

    /// Called when this instance is retired: on its session's close, or
    /// when the endpoint's last session closes.
    fn destroy(&self) {}

    /// Decode from `reader`.
    fn decode(&self, reader: BinaryReader) -> WsResult<Value>;
}

/// The four decoder kinds.
#[derive(Clone)]
pub enum DecoderKind {
    /// Whole text.
    Text(Arc<dyn TextDecoder>),
    /// Whole binary.
    Binary(Arc<dyn BinaryDecoder>),
    /// Character stream.
    TextStream(Arc<dyn TextStreamDecoder>),
    /// Byte stream.
    BinaryStream(Arc<dyn BinaryStreamDecoder>),
}

impl DecoderKind {
    fn label(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Binary(_) => "binary",
            Self::TextStream(_) => "text-stream",
            Self::BinaryStream(_) => "binary-stream",
        }
    }
}

/// An inbound wire payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload<'a> {
    /// Text frame content.
    Text(&'a str),
    /// Binary frame content.
    Binary(&'a [u8]),
}

impl Payload<'_> {
    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(data) => data.len(),
        }
    }

    /// True for an empty payload.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `text` or `binary`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Binary(_) => "binary",
        }
    }
}

type DecoderFactory = Arc<dyn Fn() -> DecoderKind + Send + Sync>;

/// A decoder together with the type it produces.
///
/// A decoder built from an instance is shared by every session of the
/// endpoint. One built with [`Decoder::per_session`] is instantiated again
/// for each session.
#[derive(Clone)]
pub struct Decoder {
    kind: DecoderKind,
    ty: ValueType,
    name: Arc<str>,
    factory: Option<DecoderFactory>,
}

impl Decoder {
    /// Wrap a text decoder producing values of `ty`.
    pub fn text<D: TextDecoder + 'static>(ty: ValueType, decoder: D) -> Self {
        Self::from_kind(ty, DecoderKind::Text(Arc::new(decoder)), std::any::type_name::<D>())
    }

    /// Wrap a binary decoder producing values of `ty`.
    pub fn binary<D: BinaryDecoder + 'static>(ty: ValueType, decoder: D) -> Self {
        Self::from_kind(ty, DecoderKind::Binary(Arc::new(decoder)), std::any::type_name::<D>())
    }

    /// Wrap a character-stream decoder producing values of `ty`.
    pub fn text_stream<D: TextStreamDecoder + 'static>(ty: ValueType, decoder: D) -> Self {
        Self::from_kind(
            ty,
            DecoderKind::TextStream(Arc::new(decoder)),
            std::any::type_name::<D>(),
        )
    }

    /// Wrap a byte-stream decoder producing values of `ty`.
    pub fn binary_stream<D: BinaryStreamDecoder + 'static>(ty: ValueType, decoder: D) -> Self {
        Self::from_kind(
            ty,
            DecoderKind::BinaryStream(Arc::new(decoder)),
            std::any::type_name::<D>(),
        )
    }

    /// A decoder instantiated once per session by `build`.
    ///
    /// `build` also runs here to learn the kind and type; that instance is
    /// never initialized and only describes the decoder.
    pub fn per_session<F>(build: F) -> Self
    where
        F: Fn() -> Decoder + Send + Sync + 'static,
    {
        let mut decoder = build();
        decoder.factory = Some(Arc::new(move || build().kind));
        decoder
    }

    fn from_kind(ty: ValueType, kind: DecoderKind, name: &str) -> Self {
        Self {
            kind,
            ty,
            name: Arc::from(short_name(name)),
            factory: None,
        }
    }

    /// True when every session gets its own instance.
    pub fn is_per_session(&self) -> bool {
        self.factory.is_some()
    }

    /// A fresh instance for a new session, or this decoder when shared.
    pub(crate) fn instantiate(&self) -> Self {
        match &self.factory {
            Some(build) => Self {
                kind: build(),
                ..self.clone()
            },
            None => self.clone(),
        }
    }

    /// The decoder kind.
    pub fn kind(&self) -> &DecoderKind {
        &self.kind
    }

    /// The type this decoder produces.
    pub fn value_type(&self) -> &ValueType {
        &self.ty
    }

    /// Name of the underlying decoder type.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True for text and character-stream decoders.
    pub fn accepts_text(&self) -> bool {
        matches!(self.kind, DecoderKind::Text(_) | DecoderKind::TextStream(_))
    }

    /// True for binary and byte-stream decoders.
    pub fn accepts_binary(&self) -> bool {
        matches!(self.kind, DecoderKind::Binary(_) | DecoderKind::BinaryStream(_))
    }

    /// Whether this decoder applies to `payload`.
    ///
    /// Stream decoders accept any payload of their family.
    pub fn will_decode(&self, payload: Payload<'_>) -> bool {
        match (&self.kind, payload) {
            (DecoderKind::Text(d), Payload::Text(text)) => d.will_decode(text),
            (DecoderKind::Binary(d), Payload::Binary(data)) => d.will_decode(data),
            (DecoderKind::TextStream(_), Payload::Text(_))
            | (DecoderKind::BinaryStream(_), Payload::Binary(_)) => true,
            _ => false,
        }
    }

    /// Decode a complete payload.
    ///
    /// Stream decoders read from an in-memory stream over the payload.
    pub fn decode(&self, payload: Payload<'_>) -> WsResult<Value> {
        match (&self.kind, payload) {
            (DecoderKind::Text(d), Payload::Text(text)) => d.decode(text),
            (DecoderKind::Binary(d), Payload::Binary(data)) => d.decode(data),
            (DecoderKind::TextStream(d), Payload::Text(text)) => {
                d.decode(TextReader::from_complete(text))
            }
            (DecoderKind::BinaryStream(d), Payload::Binary(data)) => {
                d.decode(BinaryReader::from_complete(Bytes::copy_from_slice(data)))
            }
            (kind, payload) => Err(WsError::decode_failed(format!(
                "{} decoder {} cannot decode a {} payload",
                kind.label(),
                self.name,
                payload.kind()
            ))),
        }
    }

    pub(crate) fn init(&self, config: &EndpointConfig) {
        match &self.kind {
            DecoderKind::Text(d) => d.init(config),
            DecoderKind::Binary(d) => d.init(config),
            DecoderKind::TextStream(d) => d.init(config),
            DecoderKind::BinaryStream(d) => d.init(config),
        }
    }

    pub(crate) fn destroy(&self) {
        match &self.kind {
            DecoderKind::Text(d) => d.destroy(),
            DecoderKind::Binary(d) => d.destroy(),
            DecoderKind::TextStream(d) => d.destroy(),
            DecoderKind::BinaryStream(d) => d.destroy(),
        }
    }
}

impl fmt::Debug for Decoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Decoder")
            .field("name", &self.name)
            .field("kind", &self.kind.label())
            .field("ty", &self.ty)
            .field("per_session", &self.is_per_session())
            .finish()
    }
}

/// Strip the module path from a type name, keeping generic arguments.
pub(crate) fn short_name(full: &str) -> &str {
    let head = full.split('<').next().unwrap_or(full);
    match head.rfind("::") {
        Some(idx) => &full[idx + 2..],
        None => full,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    struct Upper;

    impl TextDecoder for Upper {
        fn will_decode(&self, text: &str) -> bool {
            text.chars().all(|c| c.is_ascii_alphabetic())
        }

        fn decode(&self, text: &str) -> WsResult<Value> {
            Ok(Value::String(text.to_uppercase()))
        }
    }

    struct Count;

    impl BinaryStreamDecoder for Count {
        fn decode(&self, mut reader: BinaryReader) -> WsResult<Value> {
            let mut buf = Vec::new();
            reader.read_to_end(&mut buf)?;
            Ok(Value::Integer(i32::try_from(buf.len()).unwrap_or(i32::MAX)))
        }
    }

    #[test]
    fn test_text_decoder_consults_will_decode() {
        let decoder = Decoder::text(ValueType::String, Upper);
        assert!(decoder.will_decode(Payload::Text("abc")));
        assert!(!decoder.will_decode(Payload::Text("a1")));
        assert!(!decoder.will_decode(Payload::Binary(b"abc")));
        assert_eq!(decoder.name(), "Upper");
    }

    #[test]
    fn test_stream_decoder_accepts_any_binary() {
        let decoder = Decoder::binary_stream(ValueType::Integer, Count);
        assert!(decoder.accepts_binary());
        assert!(!decoder.accepts_text());
        assert!(decoder.will_decode(Payload::Binary(&[])));
        let value = decoder.decode(Payload::Binary(&[1, 2, 3])).unwrap();
        assert_eq!(value.as_i64(), Some(3));
    }

    #[test]
    fn test_kind_mismatch_is_decode_error() {
        let decoder = Decoder::text(ValueType::String, Upper);
        let err = decoder.decode(Payload::Binary(b"x")).unwrap_err();
        assert!(matches!(err, WsError::DecodeFailed(_)));
    }

    #[test]
    fn test_per_session_decoder_builds_fresh_instances() {
        let built = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&built);
        let decoder = Decoder::per_session(move || {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Decoder::text(ValueType::String, Upper)
        });
        assert!(decoder.is_per_session());
        assert_eq!(decoder.name(), "Upper");

        let a = decoder.instantiate();
        let b = decoder.instantiate();
        assert_eq!(built.load(std::sync::atomic::Ordering::SeqCst), 3);
        let (DecoderKind::Text(a), DecoderKind::Text(b)) = (a.kind(), b.kind()) else {
            panic!("expected text decoders");
        };
        assert!(!Arc::ptr_eq(a, b));

        let shared = Decoder::text(ValueType::String, Upper);
        let (DecoderKind::Text(x), DecoderKind::Text(y)) = (shared.kind(), shared.instantiate().kind().clone()) else {
            panic!("expected text decoders");
        };
        assert!(Arc::ptr_eq(x, &y));
    }

    #[test]
    fn test_short_name() {
        assert_eq!(short_name("a::b::Upper"), "Upper");
        assert_eq!(short_name("Upper"), "Upper");
        assert_eq!(short_name("a::Wrap<b::C>"), "Wrap<b::C>");
    }

    #[test]
    fn test_payload_helpers() {
        assert_eq!(Payload::Text("abc").len(), 3);
        assert!(Payload::Binary(&[]).is_empty());
        assert_eq!(Payload::Binary(&[1]).kind(), "binary");
    }
}
