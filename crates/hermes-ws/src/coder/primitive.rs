//! Built-in coders.
//!
//! Primitive decoders parse boxed primitives from text and always accept
//! their input; a parse failure surfaces as a decode error. The no-op
//! coders pass `String`, `ByteBuffer` and `ByteArray` payloads through
//! untouched, the stream decoders hand out the payload as a reader, and the
//! `to_string` encoder is the last-resort text encoder for any value.

use bytes::Bytes;

use crate::coder::decoder::{
    BinaryDecoder, BinaryStreamDecoder, Decoder, TextDecoder, TextStreamDecoder,
};
use crate::coder::encoder::{BinaryEncoder, Encoder, TextEncoder};
use crate::error::{WsError, WsResult};
use crate::stream::{BinaryReader, TextReader};
use crate::types::{Value, ValueType};

/// Primitive types in the order their decoders are merged.
pub const PRIMITIVE_TYPES: [ValueType; 8] = [
    ValueType::Boolean,
    ValueType::Byte,
    ValueType::Char,
    ValueType::Double,
    ValueType::Float,
    ValueType::Integer,
    ValueType::Long,
    ValueType::Short,
];

/// Parse `text` as the primitive `ty`.
///
/// Booleans are `true` when the text equals `"true"` ignoring case and
/// `false` otherwise; characters take the first character.
pub fn decode_primitive(ty: &ValueType, text: &str) -> WsResult<Value> {
    fn parse<T: std::str::FromStr>(ty: &ValueType, text: &str) -> WsResult<T>
    where
        T::Err: std::fmt::Display,
    {
        text.parse::<T>()
            .map_err(|e| WsError::decode_failed(format!("'{text}' is not a valid {ty}: {e}")))
    }

    match ty {
        ValueType::Boolean => Ok(Value::Boolean(text.eq_ignore_ascii_case("true"))),
        ValueType::Byte => parse(ty, text).map(Value::Byte),
        ValueType::Char => text
            .chars()
            .next()
            .map(Value::Char)
            .ok_or_else(|| WsError::decode_failed("cannot decode a Char from an empty string")),
        ValueType::Short => parse(ty, text).map(Value::Short),
        ValueType::Integer => parse(ty, text).map(Value::Integer),
        ValueType::Long => parse(ty, text).map(Value::Long),
        ValueType::Float => parse(ty, text).map(Value::Float),
        ValueType::Double => parse(ty, text).map(Value::Double),
        ValueType::String => Ok(Value::String(text.to_string())),
        other => Err(WsError::decode_failed(format!("{other} is not a primitive type"))),
    }
}

/// Text decoder for one primitive type.
#[derive(Debug, Clone)]
pub struct PrimitiveDecoder {
    ty: ValueType,
}

impl PrimitiveDecoder {
    /// Decoder for `ty`.
    pub fn new(ty: ValueType) -> Self {
        Self { ty }
    }
}

impl TextDecoder for PrimitiveDecoder {
    fn decode(&self, text: &str) -> WsResult<Value> {
        decode_primitive(&self.ty, text)
    }
}

/// Identity coder for text.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpTextCoder;

impl TextDecoder for NoOpTextCoder {
    fn decode(&self, text: &str) -> WsResult<Value> {
        Ok(Value::String(text.to_string()))
    }
}

impl TextEncoder for NoOpTextCoder {
    fn encode(&self, value: &Value) -> WsResult<String> {
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| WsError::encode_failed(value, "Value is not a String."))
    }
}

/// Identity coder for `ByteBuffer`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpByteBufferCoder;

impl BinaryDecoder for NoOpByteBufferCoder {
    fn decode(&self, data: &[u8]) -> WsResult<Value> {
        Ok(Value::ByteBuffer(Bytes::copy_from_slice(data)))
    }
}

impl BinaryEncoder for NoOpByteBufferCoder {
    fn encode(&self, value: &Value) -> WsResult<Bytes> {
        match value {
            Value::ByteBuffer(data) => Ok(data.clone()),
            other => Err(WsError::encode_failed(other, "Value is not a ByteBuffer.")),
        }
    }
}

/// Identity coder for `ByteArray`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpByteArrayCoder;

impl BinaryDecoder for NoOpByteArrayCoder {
    fn decode(&self, data: &[u8]) -> WsResult<Value> {
        Ok(Value::ByteArray(data.to_vec()))
    }
}

impl BinaryEncoder for NoOpByteArrayCoder {
    fn encode(&self, value: &Value) -> WsResult<Bytes> {
        match value {
            Value::ByteArray(data) => Ok(Bytes::copy_from_slice(data)),
            other => Err(WsError::encode_failed(other, "Value is not a byte array.")),
        }
    }
}

/// Hands a text payload to the handler as a `Reader`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReaderDecoder;

impl TextStreamDecoder for ReaderDecoder {
    fn decode(&self, reader: TextReader) -> WsResult<Value> {
        Ok(Value::Reader(reader))
    }
}

/// Hands a binary payload to the handler as an `InputStream`.
#[derive(Debug, Clone, Copy, Default)]
pub struct InputStreamDecoder;

impl BinaryStreamDecoder for InputStreamDecoder {
    fn decode(&self, reader: BinaryReader) -> WsResult<Value> {
        Ok(Value::InputStream(reader))
    }
}

/// Fallback encoder sending any value as its `Display` text.
#[derive(Debug, Clone, Copy, Default)]
pub struct ToStringEncoder;

impl TextEncoder for ToStringEncoder {
    fn encode(&self, value: &Value) -> WsResult<String> {
        Ok(value.to_string())
    }
}

/// Built-in decoders, merged after the user's.
pub fn builtin_decoders() -> Vec<Decoder> {
    let mut decoders: Vec<Decoder> = PRIMITIVE_TYPES
        .iter()
        .map(|ty| Decoder::text(ty.clone(), PrimitiveDecoder::new(ty.clone())))
        .collect();
    decoders.push(Decoder::text(ValueType::String, NoOpTextCoder));
    decoders.push(Decoder::binary(ValueType::ByteBuffer, NoOpByteBufferCoder));
    decoders.push(Decoder::binary(ValueType::ByteArray, NoOpByteArrayCoder));
    decoders.push(Decoder::text_stream(ValueType::Reader, ReaderDecoder));
    decoders.push(Decoder::binary_stream(ValueType::InputStream, InputStreamDecoder));
    decoders
}

/// Built-in encoders, merged after the user's.
pub fn builtin_encoders() -> Vec<Encoder> {
    vec![
        Encoder::text(ValueType::String, NoOpTextCoder),
        Encoder::binary(ValueType::ByteBuffer, NoOpByteBufferCoder),
        Encoder::binary(ValueType::ByteArray, NoOpByteArrayCoder),
        Encoder::text(ValueType::Object, ToStringEncoder),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coder::decoder::Payload;
    use crate::coder::encoder::Encoded;

    #[test]
    fn test_boolean_is_case_insensitive_true() {
        assert_eq!(
            decode_primitive(&ValueType::Boolean, "TRUE").unwrap().as_bool(),
            Some(true)
        );
        assert_eq!(
            decode_primitive(&ValueType::Boolean, "yes").unwrap().as_bool(),
            Some(false)
        );
    }

    #[test]
    fn test_char_takes_first_character() {
        let value = decode_primitive(&ValueType::Char, "xyz").unwrap();
        assert!(matches!(value, Value::Char('x')));
        assert!(decode_primitive(&ValueType::Char, "").is_err());
    }

    #[test]
    fn test_integer_parse_failure() {
        let err = decode_primitive(&ValueType::Integer, "4x2").unwrap_err();
        assert!(matches!(err, WsError::DecodeFailed(_)));
        assert!(decode_primitive(&ValueType::Byte, "200").is_err());
    }

    #[test]
    fn test_primitive_decoders_always_will_decode() {
        let decoder = Decoder::text(ValueType::Integer, PrimitiveDecoder::new(ValueType::Integer));
        assert!(decoder.will_decode(Payload::Text("not a number")));
    }

    #[test]
    fn test_builtin_decoder_order() {
        let names: Vec<ValueType> = builtin_decoders()
            .iter()
            .map(|d| d.value_type().clone())
            .collect();
        assert_eq!(
            names,
            vec![
                ValueType::Boolean,
                ValueType::Byte,
                ValueType::Char,
                ValueType::Double,
                ValueType::Float,
                ValueType::Integer,
                ValueType::Long,
                ValueType::Short,
                ValueType::String,
                ValueType::ByteBuffer,
                ValueType::ByteArray,
                ValueType::Reader,
                ValueType::InputStream,
            ]
        );
    }

    #[test]
    fn test_reader_decoder_hands_out_stream() {
        let decoder = Decoder::text_stream(ValueType::Reader, ReaderDecoder);
        let value = decoder.decode(Payload::Text("hé")).unwrap();
        let mut reader = value.into_reader().unwrap();
        assert_eq!(reader.read_char().unwrap(), Some('h'));
        assert_eq!(reader.read_char().unwrap(), Some('é'));
        assert_eq!(reader.read_char().unwrap(), None);
    }

    #[test]
    fn test_noop_encoders_reject_other_values() {
        let err = NoOpByteBufferCoder.encode(&Value::Integer(1)).unwrap_err();
        assert!(matches!(err, WsError::EncodeFailed { .. }));
        let encoded = Encoder::text(ValueType::Object, ToStringEncoder)
            .encode(&Value::Long(7))
            .unwrap();
        assert_eq!(encoded, Encoded::Text("7".to_string()));
    }
}
