//! Message value types.
//!
//! Handlers, coders and annotated methods all describe their payloads with a
//! [`ValueType`]. Assignability between types drives decoder selection,
//! encoder selection and handler ordering, so the model keeps a small
//! subtype relation: every type is assignable to [`ValueType::Object`], and
//! custom types may name supertypes.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::stream::{BinaryReader, TextReader};

/// A user-defined message type.
///
/// Equality and hashing use the name only.
#[derive(Clone)]
pub struct CustomType {
    name: Arc<str>,
    supertypes: Arc<[ValueType]>,
}

impl CustomType {
    /// Create a type with no supertypes other than `Object`.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            supertypes: Arc::from(Vec::new()),
        }
    }

    /// Declare the supertypes this type is assignable to.
    #[must_use]
    pub fn extends(mut self, supertypes: impl IntoIterator<Item = ValueType>) -> Self {
        let mut all: Vec<ValueType> = self.supertypes.iter().cloned().collect();
        all.extend(supertypes);
        self.supertypes = Arc::from(all);
        self
    }

    /// Type name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared supertypes.
    pub fn supertypes(&self) -> &[ValueType] {
        &self.supertypes
    }
}

impl PartialEq for CustomType {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for CustomType {}

impl std::hash::Hash for CustomType {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Debug for CustomType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// The declared type of a message payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// Top type; every other type is assignable to it.
    Object,
    /// Whole text.
    String,
    /// Blocking character stream.
    Reader,
    /// Binary buffer.
    ByteBuffer,
    /// Binary array.
    ByteArray,
    /// Blocking byte stream.
    InputStream,
    /// Boolean.
    Boolean,
    /// 8-bit signed integer.
    Byte,
    /// Single character.
    Char,
    /// 16-bit signed integer.
    Short,
    /// 32-bit signed integer.
    Integer,
    /// 64-bit signed integer.
    Long,
    /// 32-bit float.
    Float,
    /// 64-bit float.
    Double,
    /// Pong control message.
    Pong,
    /// User-defined type.
    Custom(CustomType),
}

impl ValueType {
    /// Shorthand for a custom type without supertypes.
    pub fn custom(name: impl Into<Arc<str>>) -> Self {
        Self::Custom(CustomType::new(name))
    }

    /// True when a value of type `other` can be used where `self` is expected.
    pub fn is_assignable_from(&self, other: &ValueType) -> bool {
        if self == other || *self == ValueType::Object {
            return true;
        }
        match other {
            ValueType::Custom(custom) => custom
                .supertypes()
                .iter()
                .any(|sup| self.is_assignable_from(sup)),
            _ => false,
        }
    }

    /// Boxed primitive types decoded by the built-in primitive decoders.
    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            Self::Boolean
                | Self::Byte
                | Self::Char
                | Self::Short
                | Self::Integer
                | Self::Long
                | Self::Float
                | Self::Double
        )
    }

    /// Whole-text types: `String` and `Reader`.
    pub fn is_text(&self) -> bool {
        matches!(self, Self::String | Self::Reader)
    }

    /// Whole-binary types: `ByteBuffer`, `ByteArray` and `InputStream`.
    pub fn is_binary(&self) -> bool {
        matches!(self, Self::ByteBuffer | Self::ByteArray | Self::InputStream)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Custom(custom) => f.write_str(custom.name()),
            other => fmt::Debug::fmt(other, f),
        }
    }
}

/// A user value carried through the runtime.
pub trait ObjectValue: Any + fmt::Debug + fmt::Display + Send + Sync {
    /// Runtime type of the value, used for encoder selection.
    fn value_type(&self) -> ValueType;
}

/// Type-erased [`ObjectValue`].
#[derive(Clone)]
pub struct Object {
    ty: ValueType,
    inner: Arc<dyn Any + Send + Sync>,
    debug: fn(&dyn Any, &mut fmt::Formatter<'_>) -> fmt::Result,
    display: fn(&dyn Any, &mut fmt::Formatter<'_>) -> fmt::Result,
}

impl Object {
    /// Wrap a user value.
    pub fn new<T: ObjectValue>(value: T) -> Self {
        Self {
            ty: value.value_type(),
            inner: Arc::new(value),
            debug: |any, f| match any.downcast_ref::<T>() {
                Some(v) => fmt::Debug::fmt(v, f),
                None => Ok(()),
            },
            display: |any, f| match any.downcast_ref::<T>() {
                Some(v) => fmt::Display::fmt(v, f),
                None => Ok(()),
            },
        }
    }

    /// Runtime type.
    pub fn value_type(&self) -> &ValueType {
        &self.ty
    }

    /// Borrow the value as `T`.
    pub fn downcast_ref<T: ObjectValue>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        (self.debug)(&*self.inner, f)
    }
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        (self.display)(&*self.inner, f)
    }
}

/// Payload of a pong frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PongMessage {
    data: Bytes,
}

impl PongMessage {
    /// Wrap pong application data.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    /// Application data.
    pub fn data(&self) -> &Bytes {
        &self.data
    }
}

/// A runtime message value.
#[derive(Debug)]
pub enum Value {
    /// Whole text.
    String(String),
    /// Character stream.
    Reader(TextReader),
    /// Binary buffer.
    ByteBuffer(Bytes),
    /// Binary array.
    ByteArray(Vec<u8>),
    /// Byte stream.
    InputStream(BinaryReader),
    /// Boolean.
    Boolean(bool),
    /// 8-bit integer.
    Byte(i8),
    /// Character.
    Char(char),
    /// 16-bit integer.
    Short(i16),
    /// 32-bit integer.
    Integer(i32),
    /// 64-bit integer.
    Long(i64),
    /// 32-bit float.
    Float(f32),
    /// 64-bit float.
    Double(f64),
    /// Pong payload.
    Pong(PongMessage),
    /// User value.
    Object(Object),
}

impl Value {
    /// Wrap a user value.
    pub fn object<T: ObjectValue>(value: T) -> Self {
        Self::Object(Object::new(value))
    }

    /// Runtime type of the value.
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::String(_) => ValueType::String,
            Self::Reader(_) => ValueType::Reader,
            Self::ByteBuffer(_) => ValueType::ByteBuffer,
            Self::ByteArray(_) => ValueType::ByteArray,
            Self::InputStream(_) => ValueType::InputStream,
            Self::Boolean(_) => ValueType::Boolean,
            Self::Byte(_) => ValueType::Byte,
            Self::Char(_) => ValueType::Char,
            Self::Short(_) => ValueType::Short,
            Self::Integer(_) => ValueType::Integer,
            Self::Long(_) => ValueType::Long,
            Self::Float(_) => ValueType::Float,
            Self::Double(_) => ValueType::Double,
            Self::Pong(_) => ValueType::Pong,
            Self::Object(o) => o.value_type().clone(),
        }
    }

    /// Text payload, if this is a `String`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Binary payload, if this is a `ByteBuffer` or `ByteArray`.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::ByteBuffer(b) => Some(b),
            Self::ByteArray(b) => Some(b),
            _ => None,
        }
    }

    /// Boolean payload.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer payload widened to `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Byte(v) => Some(i64::from(*v)),
            Self::Short(v) => Some(i64::from(*v)),
            Self::Integer(v) => Some(i64::from(*v)),
            Self::Long(v) => Some(*v),
            _ => None,
        }
    }

    /// User value downcast to `T`.
    pub fn downcast_ref<T: ObjectValue>(&self) -> Option<&T> {
        match self {
            Self::Object(o) => o.downcast_ref(),
            _ => None,
        }
    }

    /// Take the character stream out of a `Reader` value.
    pub fn into_reader(self) -> Option<TextReader> {
        match self {
            Self::Reader(r) => Some(r),
            _ => None,
        }
    }

    /// Take the byte stream out of an `InputStream` value.
    pub fn into_input_stream(self) -> Option<BinaryReader> {
        match self {
            Self::InputStream(r) => Some(r),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Boolean(v) => write!(f, "{v}"),
            Self::Byte(v) => write!(f, "{v}"),
            Self::Char(v) => write!(f, "{v}"),
            Self::Short(v) => write!(f, "{v}"),
            Self::Integer(v) => write!(f, "{v}"),
            Self::Long(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::Object(o) => write!(f, "{o}"),
            Self::ByteBuffer(b) => write!(f, "{:?}", &b[..]),
            Self::ByteArray(b) => write!(f, "{b:?}"),
            Self::Pong(p) => write!(f, "Pong{:?}", &p.data()[..]),
            Self::Reader(_) => f.write_str("Reader"),
            Self::InputStream(_) => f.write_str("InputStream"),
        }
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Self::ByteBuffer(b)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Self::ByteArray(b)
    }
}
