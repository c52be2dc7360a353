//! Merged coder lists for one endpoint.

use tracing::trace;

use crate::coder::decoder::{Decoder, Payload};
use crate::coder::encoder::{Encoded, Encoder};
use crate::coder::primitive::{builtin_decoders, builtin_encoders};
use crate::config::EndpointConfig;
use crate::error::{WsError, WsResult};
use crate::types::{Value, ValueType};

/// User coders followed by the built-ins, in resolution order.
///
/// Built once per endpoint and never mutated, so it is shared between
/// sessions without locking. Each session works on the copy returned by
/// [`CoderRegistry::for_session`].
///
/// Decoder order: user decoders, the eight primitive decoders, the no-op
/// `String`/`ByteBuffer`/`ByteArray` decoders, then the `Reader` and
/// `InputStream` stream decoders. Encoder order: user encoders, the no-op
/// `String`/`ByteBuffer`/`ByteArray` encoders, then the `to_string` fallback.
#[derive(Debug, Clone)]
pub struct CoderRegistry {
    decoders: Vec<Decoder>,
    encoders: Vec<Encoder>,
    user_decoders: usize,
    user_encoders: usize,
}

impl Default for CoderRegistry {
    fn default() -> Self {
        Self::new(&[], &[])
    }
}

impl CoderRegistry {
    /// Merge user coders with the built-ins.
    pub fn new(user_decoders: &[Decoder], user_encoders: &[Encoder]) -> Self {
        let mut decoders = user_decoders.to_vec();
        decoders.extend(builtin_decoders());
        let mut encoders = user_encoders.to_vec();
        encoders.extend(builtin_encoders());
        Self {
            decoders,
            encoders,
            user_decoders: user_decoders.len(),
            user_encoders: user_encoders.len(),
        }
    }

    /// Merge the coders declared on an endpoint configuration.
    pub fn from_config(config: &EndpointConfig) -> Self {
        Self::new(config.decoders(), config.encoders())
    }

    /// Every decoder, in resolution order.
    pub fn decoders(&self) -> &[Decoder] {
        &self.decoders
    }

    /// Every encoder, in resolution order.
    pub fn encoders(&self) -> &[Encoder] {
        &self.encoders
    }

    /// The user-declared decoders.
    pub fn user_decoders(&self) -> &[Decoder] {
        &self.decoders[..self.user_decoders]
    }

    /// The user-declared encoders.
    pub fn user_encoders(&self) -> &[Encoder] {
        &self.encoders[..self.user_encoders]
    }

    /// Every decoder of the payload's family that will decode it, in order.
    pub fn applicable_decoders(&self, payload: Payload<'_>) -> Vec<Decoder> {
        self.decoders
            .iter()
            .filter(|decoder| decoder.will_decode(payload))
            .cloned()
            .collect()
    }

    /// First decoder whose type is assignable to `target` and that will
    /// decode `payload`.
    pub fn find_decoder(&self, target: &ValueType, payload: Payload<'_>) -> Option<&Decoder> {
        self.decoders.iter().find(|decoder| {
            target.is_assignable_from(decoder.value_type()) && decoder.will_decode(payload)
        })
    }

    /// Decode `payload` into a value assignable to `target`.
    pub fn decode(&self, target: &ValueType, payload: Payload<'_>) -> WsResult<Value> {
        let decoder = self.find_decoder(target, payload).ok_or_else(|| {
            WsError::decode_failed(format!("no {} decoder found for {target}", payload.kind()))
        })?;
        trace!(decoder = decoder.name(), target = %target, "Decoder selected");
        decoder.decode(payload)
    }

    /// True when some decoder produces values assignable to `ty`.
    pub fn has_decoder_for(&self, ty: &ValueType) -> bool {
        self.decoders
            .iter()
            .any(|decoder| ty.is_assignable_from(decoder.value_type()))
    }

    /// True when a text or character-stream decoder produces `ty`.
    pub fn has_text_decoder_for(&self, ty: &ValueType) -> bool {
        self.decoders
            .iter()
            .any(|d| d.accepts_text() && ty.is_assignable_from(d.value_type()))
    }

    /// True when a binary or byte-stream decoder produces `ty`.
    pub fn has_binary_decoder_for(&self, ty: &ValueType) -> bool {
        self.decoders
            .iter()
            .any(|d| d.accepts_binary() && ty.is_assignable_from(d.value_type()))
    }

    /// First encoder accepting values of `ty`.
    pub fn find_encoder(&self, ty: &ValueType) -> Option<&Encoder> {
        self.encoders.iter().find(|encoder| encoder.accepts(ty))
    }

    /// True when a user encoder accepts `ty`.
    pub fn has_user_encoder_for(&self, ty: &ValueType) -> bool {
        self.user_encoders().iter().any(|encoder| encoder.accepts(ty))
    }

    /// Encode `value` with the first encoder accepting its runtime type.
    pub fn encode(&self, value: &Value) -> WsResult<Encoded> {
        let ty = value.value_type();
        let encoder = self
            .find_encoder(&ty)
            .ok_or_else(|| WsError::encode_failed(value, "Encoding failed."))?;
        trace!(encoder = encoder.name(), ty = %ty, "Encoder selected");
        encoder.encode(value)
    }

    /// The coders one new session uses.
    ///
    /// Per-session coders are instantiated afresh; shared coders and the
    /// built-ins are the same instances as in `self`.
    pub fn for_session(&self) -> Self {
        Self {
            decoders: self.decoders.iter().map(Decoder::instantiate).collect(),
            encoders: self.encoders.iter().map(Encoder::instantiate).collect(),
            user_decoders: self.user_decoders,
            user_encoders: self.user_encoders,
        }
    }

    /// Run `init` on the coders shared by every session.
    pub fn init_shared(&self, config: &EndpointConfig) {
        self.init_where(config, false);
    }

    /// Run `destroy` on the coders shared by every session.
    pub fn destroy_shared(&self) {
        self.destroy_where(false);
    }

    /// Run `init` on this session's own coder instances.
    pub fn init_per_session(&self, config: &EndpointConfig) {
        self.init_where(config, true);
    }

    /// Run `destroy` on this session's own coder instances.
    pub fn destroy_per_session(&self) {
        self.destroy_where(true);
    }

    fn init_where(&self, config: &EndpointConfig, per_session: bool) {
        for decoder in self.decoders.iter().filter(|d| d.is_per_session() == per_session) {
            decoder.init(config);
        }
        for encoder in self.encoders.iter().filter(|e| e.is_per_session() == per_session) {
            encoder.init(config);
        }
    }

    fn destroy_where(&self, per_session: bool) {
        for decoder in self.decoders.iter().filter(|d| d.is_per_session() == per_session) {
            decoder.destroy();
        }
        for encoder in self.encoders.iter().filter(|e| e.is_per_session() == per_session) {
            encoder.destroy();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coder::decoder::TextDecoder;
    use crate::coder::encoder::TextEncoder;
    use std::fmt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::types::ObjectValue;

    #[derive(Debug)]
    struct Point(i32, i32);

    impl fmt::Display for Point {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{},{}", self.0, self.1)
        }
    }

    impl ObjectValue for Point {
        fn value_type(&self) -> ValueType {
            ValueType::custom("Point")
        }
    }

    struct Prefixed(&'static str, Arc<AtomicUsize>);

    impl TextDecoder for Prefixed {
        fn init(&self, _config: &EndpointConfig) {
            self.1.fetch_add(1, Ordering::SeqCst);
        }

        fn will_decode(&self, text: &str) -> bool {
            text.starts_with(self.0)
        }

        fn decode(&self, text: &str) -> WsResult<Value> {
            Ok(Value::String(format!("{}:{text}", self.0)))
        }
    }

    struct PointEncoder;

    impl TextEncoder for PointEncoder {
        fn encode(&self, value: &Value) -> WsResult<String> {
            let point = value
                .downcast_ref::<Point>()
                .ok_or_else(|| WsError::encode_failed(value, "not a point"))?;
            Ok(format!("({}, {})", point.0, point.1))
        }
    }

    fn prefixed(prefix: &'static str) -> Decoder {
        Decoder::text(ValueType::String, Prefixed(prefix, Arc::new(AtomicUsize::new(0))))
    }

    #[test]
    fn test_first_matching_decoder_wins() {
        let registry = CoderRegistry::new(&[prefixed("a"), prefixed("ab")], &[]);
        let value = registry.decode(&ValueType::String, Payload::Text("abc")).unwrap();
        assert_eq!(value.as_str(), Some("a:abc"));

        let reordered = CoderRegistry::new(&[prefixed("ab"), prefixed("a")], &[]);
        let value = reordered.decode(&ValueType::String, Payload::Text("abc")).unwrap();
        assert_eq!(value.as_str(), Some("ab:abc"));
    }

    #[test]
    fn test_falls_back_to_builtin_when_user_decoder_declines() {
        let registry = CoderRegistry::new(&[prefixed("z")], &[]);
        let value = registry.decode(&ValueType::String, Payload::Text("abc")).unwrap();
        assert_eq!(value.as_str(), Some("abc"));
    }

    #[test]
    fn test_applicable_decoders_for_text() {
        let registry = CoderRegistry::default();
        let types: Vec<ValueType> = registry
            .applicable_decoders(Payload::Text("1"))
            .iter()
            .map(|d| d.value_type().clone())
            .collect();
        assert_eq!(types.len(), 10);
        assert_eq!(types.first(), Some(&ValueType::Boolean));
        assert_eq!(types.last(), Some(&ValueType::Reader));
        assert!(!types.contains(&ValueType::ByteBuffer));
    }

    #[test]
    fn test_applicable_decoders_for_binary() {
        let registry = CoderRegistry::default();
        let types: Vec<ValueType> = registry
            .applicable_decoders(Payload::Binary(&[1]))
            .iter()
            .map(|d| d.value_type().clone())
            .collect();
        assert_eq!(
            types,
            vec![ValueType::ByteBuffer, ValueType::ByteArray, ValueType::InputStream]
        );
    }

    #[test]
    fn test_encode_prefers_user_encoder() {
        let registry = CoderRegistry::new(
            &[],
            &[Encoder::text(ValueType::custom("Point"), PointEncoder)],
        );
        let encoded = registry.encode(&Value::object(Point(1, 2))).unwrap();
        assert_eq!(encoded, Encoded::Text("(1, 2)".to_string()));
        assert!(registry.has_user_encoder_for(&ValueType::custom("Point")));
    }

    #[test]
    fn test_encode_falls_back_to_to_string() {
        let registry = CoderRegistry::default();
        let encoded = registry.encode(&Value::object(Point(3, 4))).unwrap();
        assert_eq!(encoded, Encoded::Text("3,4".to_string()));
        assert!(!registry.has_user_encoder_for(&ValueType::custom("Point")));
    }

    #[test]
    fn test_encode_identity_for_binary() {
        let registry = CoderRegistry::default();
        let encoded = registry.encode(&Value::from(vec![1u8, 2])).unwrap();
        assert_eq!(encoded, Encoded::Binary(bytes::Bytes::from_static(&[1, 2])));
    }

    #[test]
    fn test_decoder_family_lookups() {
        let registry = CoderRegistry::default();
        assert!(registry.has_text_decoder_for(&ValueType::Integer));
        assert!(!registry.has_binary_decoder_for(&ValueType::Integer));
        assert!(registry.has_binary_decoder_for(&ValueType::InputStream));
        assert!(!registry.has_decoder_for(&ValueType::custom("Point")));
    }

    #[test]
    fn test_lifecycle_hooks_split_shared_and_per_session() {
        let shared_calls = Arc::new(AtomicUsize::new(0));
        let session_calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&session_calls);
        let registry = CoderRegistry::new(
            &[
                Decoder::text(ValueType::String, Prefixed("a", Arc::clone(&shared_calls))),
                Decoder::per_session(move || {
                    Decoder::text(ValueType::String, Prefixed("b", Arc::clone(&counter)))
                }),
            ],
            &[],
        );
        let config = EndpointConfig::builder("/").build();

        registry.init_shared(&config);
        let first = registry.for_session();
        let second = registry.for_session();
        first.init_per_session(&config);
        second.init_per_session(&config);

        assert_eq!(shared_calls.load(Ordering::SeqCst), 1);
        assert_eq!(session_calls.load(Ordering::SeqCst), 2);
        assert_eq!(first.user_decoders().len(), 2);
    }
}
