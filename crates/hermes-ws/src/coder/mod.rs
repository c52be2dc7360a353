//! Message coders.
//!
//! Decoders turn inbound payloads into [`Value`](crate::Value)s and encoders
//! turn values into outbound payloads. Each coder is tagged with the
//! [`ValueType`](crate::ValueType) it produces or accepts; the
//! [`CoderRegistry`] merges user coders with the built-ins and resolves
//! which coder applies.

mod decoder;
mod encoder;
mod primitive;
mod registry;

pub use decoder::{
    BinaryDecoder, BinaryStreamDecoder, Decoder, DecoderKind, Payload, TextDecoder,
    TextStreamDecoder,
};
pub use encoder::{
    BinaryEncoder, BinaryStreamEncoder, Encoded, Encoder, EncoderKind, TextEncoder,
    TextStreamEncoder,
};
pub use primitive::{
    builtin_decoders, builtin_encoders, decode_primitive, InputStreamDecoder, NoOpByteArrayCoder,
    NoOpByteBufferCoder, NoOpTextCoder, PrimitiveDecoder, ReaderDecoder, ToStringEncoder,
    PRIMITIVE_TYPES,
};
pub use registry::CoderRegistry;
