//! Encoders.

use std::fmt;
use std::io;
use std::sync::Arc;

use bytes::Bytes;

use crate::config::EndpointConfig;
use crate::coder::decoder::short_name;
use crate::error::{WsError, WsResult};
use crate::types::{Value, ValueType};

/// Encodes values as whole text messages.
pub trait TextEncoder: Send + Sync {
    /// Called when this instance goes into service: on its session's open
    /// when built per session, else when the endpoint's first session opens.
    fn init(&self, _config: &EndpointConfig) {}

    /// Called when this instance is retired: on its session's close, or
    /// when the endpoint's last session closes.
    fn destroy(&self) {}

    /// Encode `value`.
    fn encode(&self, value: &Value) -> WsResult<String>;
}

/// Encodes values as whole binary messages.
pub trait BinaryEncoder: Send + Sync {
    /// Called when this instance goes into service: on its session's open
    /// when built per session, else when the endpoint's first session opens.
    fn init(&self, _config: &EndpointConfig) {}

    /// Called when this instance is retired: on its session's close, or
    /// when the endpoint's last session closes.
    fn destroy(&self) {}

    /// Encode `value`.
    fn encode(&self, value: &Value) -> WsResult<Bytes>;
}

/// Encodes values by writing UTF-8 text to a stream.
pub trait TextStreamEncoder: Send + Sync {
    /// Called when this instance goes into service: on its session's open
    /// when built per session, else when the endpoint's first session opens.
    fn init(&self, _config: &EndpointConfig) {}

    /// Called when this instance is retired: on its session's close, or
    /// when the endpoint's last session closes.
    fn destroy(&self) {}

    /// Write `value` to `writer`.
    fn encode(&self, value: &Value, writer: &mut dyn io::Write) -> WsResult<()>;
}

/// Encodes values by writing bytes to a stream.
pub trait BinaryStreamEncoder: Send + Sync {
    /// Called when this instance goes into service: on its session's open
    /// when built per session, else when the endpoint's first session opens.
    fn init(&self, _config: &EndpointConfig) {}

    /// Called when this instance is retired: on its session's close, or
    /// when the endpoint's last session closes.
    fn destroy(&self) {}

    /// Write `value` to `writer`.
    fn encode(&self, value: &Value, writer: &mut dyn io::Write) -> WsResult<()>;
}

/// The four encoder kinds.
#[derive(Clone)]
pub enum EncoderKind {
    /// Whole text.
    Text(Arc<dyn TextEncoder>),
    /// Whole binary.
    Binary(Arc<dyn BinaryEncoder>),
    /// Character stream.
    TextStream(Arc<dyn TextStreamEncoder>),
    /// Byte stream.
    BinaryStream(Arc<dyn BinaryStreamEncoder>),
}

impl EncoderKind {
    fn label(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Binary(_) => "binary",
            Self::TextStream(_) => "text-stream",
            Self::BinaryStream(_) => "binary-stream",
        }
    }
}

/// An encoded outbound payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Encoded {
    /// Send as a text message.
    Text(String),
    /// Send as a binary message.
    Binary(Bytes),
}

type EncoderFactory = Arc<dyn Fn() -> EncoderKind + Send + Sync>;

/// An encoder together with the type it accepts.
///
/// Shared by every session unless built with [`Encoder::per_session`].
#[derive(Clone)]
pub struct Encoder {
    kind: EncoderKind,
    ty: ValueType,
    name: Arc<str>,
    factory: Option<EncoderFactory>,
}

impl Encoder {
    /// Wrap a text encoder accepting values of `ty`.
    pub fn text<E: TextEncoder + 'static>(ty: ValueType, encoder: E) -> Self {
        Self::from_kind(ty, EncoderKind::Text(Arc::new(encoder)), std::any::type_name::<E>())
    }

    /// Wrap a binary encoder accepting values of `ty`.
    pub fn binary<E: BinaryEncoder + 'static>(ty: ValueType, encoder: E) -> Self {
        Self::from_kind(ty, EncoderKind::Binary(Arc::new(encoder)), std::any::type_name::<E>())
    }

    /// Wrap a character-stream encoder accepting values of `ty`.
    pub fn text_stream<E: TextStreamEncoder + 'static>(ty: ValueType, encoder: E) -> Self {
        Self::from_kind(
            ty,
            EncoderKind::TextStream(Arc::new(encoder)),
            std::any::type_name::<E>(),
        )
    }

    /// Wrap a byte-stream encoder accepting values of `ty`.
    pub fn binary_stream<E: BinaryStreamEncoder + 'static>(ty: ValueType, encoder: E) -> Self {
        Self::from_kind(
            ty,
            EncoderKind::BinaryStream(Arc::new(encoder)),
            std::any::type_name::<E>(),
        )
    }

    /// An encoder instantiated once per session by `build`.
    pub fn per_session<F>(build: F) -> Self
    where
        F: Fn() -> Encoder + Send + Sync + 'static,
    {
        let mut encoder = build();
        encoder.factory = Some(Arc::new(move || build().kind));
        encoder
    }

    fn from_kind(ty: ValueType, kind: EncoderKind, name: &str) -> Self {
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

    pub(crate) fn instantiate(&self) -> Self {
        match &self.factory {
            Some(build) => Self {
                kind: build(),
                ..self.clone()
            },
            None => self.clone(),
        }
    }

    /// The encoder kind.
    pub fn kind(&self) -> &EncoderKind {
        &self.kind
    }

    /// The type this encoder accepts.
    pub fn value_type(&self) -> &ValueType {
        &self.ty
    }

    /// Name of the underlying encoder type.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True when values of `ty` can be handed to this encoder.
    pub fn accepts(&self, ty: &ValueType) -> bool {
        self.ty.is_assignable_from(ty)
    }

    /// Encode `value` into a whole payload.
    pub fn encode(&self, value: &Value) -> WsResult<Encoded> {
        match &self.kind {
            EncoderKind::Text(e) => e.encode(value).map(Encoded::Text),
            EncoderKind::Binary(e) => e.encode(value).map(Encoded::Binary),
            EncoderKind::TextStream(e) => {
                let mut out = Vec::new();
                e.encode(value, &mut out)?;
                String::from_utf8(out)
                    .map(Encoded::Text)
                    .map_err(|err| WsError::encode_failed(value, err.to_string()))
            }
            EncoderKind::BinaryStream(e) => {
                let mut out = Vec::new();
                e.encode(value, &mut out)?;
                Ok(Encoded::Binary(Bytes::from(out)))
            }
        }
    }

    pub(crate) fn init(&self, config: &EndpointConfig) {
        match &self.kind {
            EncoderKind::Text(e) => e.init(config),
            EncoderKind::Binary(e) => e.init(config),
            EncoderKind::TextStream(e) => e.init(config),
            EncoderKind::BinaryStream(e) => e.init(config),
        }
    }

    pub(crate) fn destroy(&self) {
        match &self.kind {
            EncoderKind::Text(e) => e.destroy(),
            EncoderKind::Binary(e) => e.destroy(),
            EncoderKind::TextStream(e) => e.destroy(),
            EncoderKind::BinaryStream(e) => e.destroy(),
        }
    }
}

impl fmt::Debug for Encoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Encoder")
            .field("name", &self.name)
            .field("kind", &self.kind.label())
            .field("ty", &self.ty)
            .field("per_session", &self.is_per_session())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Shout;

    impl TextStreamEncoder for Shout {
        fn encode(&self, value: &Value, writer: &mut dyn io::Write) -> WsResult<()> {
            write!(writer, "{}!", value.to_string().to_uppercase())?;
            Ok(())
        }
    }

    struct Raw;

    impl BinaryStreamEncoder for Raw {
        fn encode(&self, value: &Value, writer: &mut dyn io::Write) -> WsResult<()> {
            writer.write_all(value.as_bytes().unwrap_or_default())?;
            Ok(())
        }
    }

    #[test]
    fn test_text_stream_encoder_collects_output() {
        let encoder = Encoder::text_stream(ValueType::String, Shout);
        let encoded = encoder.encode(&Value::from("hi")).unwrap();
        assert_eq!(encoded, Encoded::Text("HI!".to_string()));
    }

    #[test]
    fn test_binary_stream_encoder_collects_output() {
        let encoder = Encoder::binary_stream(ValueType::ByteArray, Raw);
        let encoded = encoder.encode(&Value::from(vec![7u8, 8])).unwrap();
        assert_eq!(encoded, Encoded::Binary(Bytes::from_static(&[7, 8])));
    }

    #[test]
    fn test_accepts_uses_assignability() {
        let encoder = Encoder::text_stream(ValueType::Object, Shout);
        assert!(encoder.accepts(&ValueType::Integer));
        let strict = Encoder::text_stream(ValueType::String, Shout);
        assert!(!strict.accepts(&ValueType::Integer));
        assert!(format!("{strict:?}").contains("text-stream"));
    }
}
