//! Coder and handler selection integration tests.
//!
//! These tests check how an inbound message finds its decoder and handler,
//! and how outbound values find their encoder:
//!
//! - user decoders run before the built-ins
//! - the most specific whole handler wins, registration order breaks ties
//! - primitive text decoding
//! - asynchronous sends complete once the frame is queued

use std::fmt;
use std::sync::Arc;

use hermes_router::Params;
use hermes_ws::coder::{decode_primitive, Encoded, Payload};
use hermes_ws::{
    CloseReason, CoderRegistry, Connection, CustomType, Decoder, Encoder, Endpoint, EndpointConfig,
    EndpointWrapper, HandshakeInfo, Message, MessageHandler, ObjectValue, Session, SessionConfig,
    TextDecoder, TextEncoder, Value, ValueType, WsError, WsResult,
};
use parking_lot::Mutex;
use proptest::prelude::*;

fn animal() -> ValueType {
    ValueType::custom("Animal")
}

fn dog() -> ValueType {
    ValueType::Custom(CustomType::new("Dog").extends([animal()]))
}

#[derive(Debug)]
struct Dog(String);

impl fmt::Display for Dog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dog:{}", self.0)
    }
}

impl ObjectValue for Dog {
    fn value_type(&self) -> ValueType {
        dog()
    }
}

/// Decodes `dog:<name>` texts and declines everything else.
struct DogDecoder;

impl TextDecoder for DogDecoder {
    fn will_decode(&self, text: &str) -> bool {
        text.starts_with("dog:")
    }

    fn decode(&self, text: &str) -> WsResult<Value> {
        let name = text
            .strip_prefix("dog:")
            .ok_or_else(|| WsError::decode_failed("not a dog"))?;
        Ok(Value::object(Dog(name.to_string())))
    }
}

/// Encodes dogs in upper case.
struct DogEncoder;

impl TextEncoder for DogEncoder {
    fn encode(&self, value: &Value) -> WsResult<String> {
        let dog = value
            .downcast_ref::<Dog>()
            .ok_or_else(|| WsError::encode_failed(value, "not a dog"))?;
        Ok(format!("DOG:{}", dog.0.to_uppercase()))
    }
}

#[derive(Default)]
struct RecordingConnection {
    sent: Mutex<Vec<Message>>,
}

impl Connection for RecordingConnection {
    fn send(&self, message: Message) -> WsResult<()> {
        self.sent.lock().push(message);
        Ok(())
    }

    fn send_partial_text(&self, _fragment: &str, _last: bool) -> WsResult<()> {
        Ok(())
    }

    fn send_partial_binary(&self, _fragment: &[u8], _last: bool) -> WsResult<()> {
        Ok(())
    }

    fn close(&self, _reason: CloseReason) -> WsResult<()> {
        Ok(())
    }
}

type Log = Arc<Mutex<Vec<String>>>;

/// Registers a whole handler per listed type, each logging `<type>:<value>`.
struct Kennel {
    types: Vec<ValueType>,
    log: Log,
}

impl Endpoint for Kennel {
    fn on_open(&self, session: &Session, _config: &EndpointConfig) -> anyhow::Result<()> {
        for ty in &self.types {
            let log = Arc::clone(&self.log);
            let label = ty.to_string();
            session.add_message_handler(MessageHandler::whole(ty.clone(), move |value| {
                log.lock().push(format!("{label}:{value}"));
                Ok(())
            }))?;
        }
        Ok(())
    }
}

/// Deploys a kennel handling `types` with the dog coders configured.
fn kennel(types: Vec<ValueType>) -> (EndpointWrapper, Session, Log, Arc<RecordingConnection>) {
    let log: Log = Arc::default();
    let config = EndpointConfig::builder("/kennel")
        .decoder(Decoder::text(dog(), DogDecoder))
        .encoder(Encoder::text(dog(), DogEncoder))
        .build();
    let endpoint = Arc::new(Kennel {
        types,
        log: Arc::clone(&log),
    });
    let wrapper = EndpointWrapper::new(config, hermes_ws::singleton(endpoint), SessionConfig::default());
    let connection = Arc::new(RecordingConnection::default());
    let session = wrapper
        .on_connect(
            Arc::clone(&connection) as Arc<dyn Connection>,
            HandshakeInfo::new("/kennel"),
            Params::new(),
        )
        .unwrap();
    (wrapper, session, log, connection)
}

/// The handler for the subtype wins over its supertype registered earlier.
#[test]
fn test_most_specific_handler_wins() {
    let (wrapper, session, log, _) = kennel(vec![animal(), dog()]);

    wrapper.on_text(session.id(), "dog:rex").unwrap();

    assert_eq!(*log.lock(), vec!["Dog:dog:rex"]);
}

/// A supertype handler receives values its subtypes' decoders produce.
#[test]
fn test_supertype_handler_receives_subtype_values() {
    let (wrapper, session, log, _) = kennel(vec![animal()]);

    wrapper.on_text(session.id(), "dog:fido").unwrap();

    assert_eq!(*log.lock(), vec!["Animal:dog:fido"]);
}

/// Text the user decoder declines falls through to the built-in string decoder.
#[test]
fn test_declined_text_reaches_string_handler() {
    let (wrapper, session, log, _) = kennel(vec![dog(), ValueType::String]);

    wrapper.on_text(session.id(), "cat:tom").unwrap();
    wrapper.on_text(session.id(), "dog:rex").unwrap();

    assert_eq!(*log.lock(), vec!["String:cat:tom", "Dog:dog:rex"]);
}

/// Values with a user encoder are sent in that encoder's format.
#[test]
fn test_user_encoder_formats_objects() {
    let (_wrapper, session, _log, connection) = kennel(vec![dog()]);

    session
        .basic_remote()
        .send_object(&Value::object(Dog("rex".into())))
        .unwrap();
    session.basic_remote().send_object(&Value::Integer(42)).unwrap();

    assert_eq!(
        *connection.sent.lock(),
        vec![Message::text("DOG:REX"), Message::text("42")]
    );
}

/// A handler for a type no decoder produces is refused.
#[test]
fn test_handler_without_decoder_is_refused() {
    let (_wrapper, session, _log, _) = kennel(vec![]);

    let err = session
        .add_message_handler(MessageHandler::whole(ValueType::custom("Cat"), |_| Ok(())))
        .unwrap_err();
    assert!(matches!(err, WsError::UnsupportedHandlerType { .. }), "{err}");
}

/// Asynchronous sends resolve once the frame is handed to the connection.
#[tokio::test]
async fn test_async_send_completes() {
    let (_wrapper, session, _log, connection) = kennel(vec![]);
    let remote = session.async_remote();

    remote.send_text("one").await.unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel();
    remote.send_text_with_handler("two", move |result| {
        let _ = tx.send(result.is_ok());
    });

    assert!(rx.await.unwrap());
    assert_eq!(
        *connection.sent.lock(),
        vec![Message::text("one"), Message::text("two")]
    );
}

/// Decodes to its tag whenever the text starts with `prefix`.
struct Tagged {
    prefix: &'static str,
    tag: &'static str,
}

impl TextDecoder for Tagged {
    fn will_decode(&self, text: &str) -> bool {
        text.starts_with(self.prefix)
    }

    fn decode(&self, _text: &str) -> WsResult<Value> {
        Ok(Value::String(self.tag.to_string()))
    }
}

fn tagged(ty: ValueType, prefix: &'static str, tag: &'static str) -> Decoder {
    Decoder::text(ty, Tagged { prefix, tag })
}

/// Decodes `text` as `ty` with the built-in coders and encodes it back.
fn round_trip(ty: &ValueType, text: &str) -> Encoded {
    let value = decode_primitive(ty, text).unwrap();
    CoderRegistry::new(&[], &[]).encode(&value).unwrap()
}

proptest! {
    /// Integers survive decoding from their decimal text and encode back to it.
    #[test]
    fn prop_integer_text_round_trips(n in any::<i32>()) {
        let text = n.to_string();
        let value = decode_primitive(&ValueType::Integer, &text).unwrap();
        prop_assert_eq!(value.as_i64(), Some(i64::from(n)));

        let encoded = CoderRegistry::new(&[], &[]).encode(&value).unwrap();
        prop_assert_eq!(encoded, Encoded::Text(text));
    }

    /// Booleans encode back to their canonical text.
    #[test]
    fn prop_boolean_text_round_trips(b in any::<bool>()) {
        let text = b.to_string();
        let value = decode_primitive(&ValueType::Boolean, &text).unwrap();
        let encoded = CoderRegistry::new(&[], &[]).encode(&value).unwrap();
        prop_assert_eq!(encoded, Encoded::Text(text));
    }

    /// Every numeric primitive encodes back to the text it was decoded from.
    #[test]
    fn prop_numeric_text_round_trips(
        byte in any::<i8>(),
        short in any::<i16>(),
        long in any::<i64>(),
        float in any::<f32>().prop_filter("finite", |v| v.is_finite()),
        double in any::<f64>().prop_filter("finite", |v| v.is_finite()),
    ) {
        for (ty, text) in [
            (ValueType::Byte, byte.to_string()),
            (ValueType::Short, short.to_string()),
            (ValueType::Long, long.to_string()),
            (ValueType::Float, float.to_string()),
            (ValueType::Double, double.to_string()),
        ] {
            prop_assert_eq!(round_trip(&ty, &text), Encoded::Text(text));
        }
    }

    /// A single character encodes back to itself.
    #[test]
    fn prop_char_text_round_trips(c in any::<char>()) {
        let text = c.to_string();
        prop_assert_eq!(round_trip(&ValueType::Char, &text), Encoded::Text(text));
    }

    /// The first decoder whose type matches and that accepts the payload
    /// wins; swapping two accepting decoders swaps the winner.
    #[test]
    fn prop_first_accepting_decoder_wins(text in "[ab]{1,8}") {
        let other = tagged(ValueType::custom("Other"), "", "other");
        let a_only = tagged(ValueType::String, "a", "a-only");
        let any = tagged(ValueType::String, "", "any");
        let decode = |decoders: &[Decoder]| {
            let registry = CoderRegistry::new(decoders, &[]);
            let value = registry.decode(&ValueType::String, Payload::Text(&text)).unwrap();
            value.as_str().unwrap_or_default().to_string()
        };

        let forward = decode(&[other.clone(), a_only.clone(), any.clone()]);
        let reversed = decode(&[other, any, a_only]);

        let expected = if text.starts_with('a') { "a-only" } else { "any" };
        prop_assert_eq!(forward, expected);
        prop_assert_eq!(reversed, "any");
    }

    /// Only `true`, in any case, decodes to a true boolean.
    #[test]
    fn prop_boolean_is_true_only_for_true(text in "[a-zA-Z]{0,6}") {
        let value = decode_primitive(&ValueType::Boolean, &text).unwrap();
        prop_assert_eq!(value.as_bool(), Some(text.eq_ignore_ascii_case("true")));
    }
}
