//! Annotated endpoints.
//!
//! An annotated endpoint is an ordinary type `T` together with a list of
//! [`MethodDecl`]s saying which of its methods react to open, message, close
//! and error events and which parameters each one takes. The declaration is
//! checked by [`validate`] and then compiled once into a fixed dispatch table
//! ([`AnnotatedEndpoint`]); no parameter inspection happens per message.
//!
//! # Example
//!
//! ```
//! use hermes_ws::annotated::{EndpointClass, MethodDecl, ParamType};
//! use hermes_ws::{EndpointConfig, Value, ValueType};
//!
//! #[derive(Default)]
//! struct Echo;
//!
//! let class = EndpointClass::new("Echo", EndpointConfig::builder("/echo").build(), || Ok(Echo))
//!     .method(
//!         MethodDecl::on_message("echo", [ParamType::Value(ValueType::String)], |_: &Echo, args| {
//!             Ok(args.take_message())
//!         })
//!         .returns(ValueType::String),
//!     );
//! assert_eq!(class.methods().len(), 1);
//! ```

mod collector;
mod endpoint;
mod validator;

use std::fmt;
use std::sync::Arc;

pub use collector::ErrorCollector;
pub use endpoint::AnnotatedEndpoint;
pub use validator::validate;

use crate::coder::decode_primitive;
use crate::config::EndpointConfig;
use crate::error::{CloseReason, WsError, WsResult};
use crate::session::Session;
use crate::types::{Value, ValueType};

/// One declared parameter of an endpoint method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamType {
    /// The session.
    Session,
    /// A path template variable, converted to `ty`.
    PathParam {
        /// Template variable name.
        name: String,
        /// Declared type; `String` or a primitive.
        ty: ValueType,
    },
    /// The endpoint configuration.
    EndpointConfig,
    /// The close reason.
    CloseReason,
    /// The error being reported.
    Throwable,
    /// A message payload or the last-fragment flag.
    Value(ValueType),
}

impl ParamType {
    /// A `String` path parameter.
    pub fn path(name: impl Into<String>) -> Self {
        Self::PathParam {
            name: name.into(),
            ty: ValueType::String,
        }
    }

    /// A typed path parameter.
    pub fn typed_path(name: impl Into<String>, ty: ValueType) -> Self {
        Self::PathParam {
            name: name.into(),
            ty,
        }
    }

    /// True for parameters bound the same way for every method kind.
    pub(crate) fn is_ambient(&self) -> bool {
        matches!(self, Self::Session | Self::PathParam { .. })
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Session => f.write_str("Session"),
            Self::PathParam { name, ty } => write!(f, "@PathParam(\"{name}\") {ty}"),
            Self::EndpointConfig => f.write_str("EndpointConfig"),
            Self::CloseReason => f.write_str("CloseReason"),
            Self::Throwable => f.write_str("Throwable"),
            Self::Value(ty) => write!(f, "{ty}"),
        }
    }
}

/// What a message method returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReturnType {
    /// Nothing is sent back.
    Void,
    /// The returned value is encoded and sent to the peer.
    Value(ValueType),
}

/// The lifecycle event a method reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    /// Session opened.
    Open,
    /// Message received.
    Message,
    /// Session closed.
    Close,
    /// Error raised.
    Error,
}

impl fmt::Display for MethodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Open => "@OnOpen",
            Self::Message => "@OnMessage",
            Self::Close => "@OnClose",
            Self::Error => "@OnError",
        })
    }
}

/// Invocation closure of a declared method.
pub type Invoker<T> =
    Arc<dyn Fn(&T, &mut MethodArgs<'_>) -> anyhow::Result<Option<Value>> + Send + Sync>;

/// Declaration of one endpoint method.
pub struct MethodDecl<T> {
    name: String,
    kind: MethodKind,
    params: Vec<ParamType>,
    returns: ReturnType,
    max_message_size: Option<usize>,
    invoke: Invoker<T>,
}

impl<T: 'static> MethodDecl<T> {
    fn new(
        name: impl Into<String>,
        kind: MethodKind,
        params: impl IntoIterator<Item = ParamType>,
        invoke: Invoker<T>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            params: params.into_iter().collect(),
            returns: ReturnType::Void,
            max_message_size: None,
            invoke,
        }
    }

    /// Declare an open method.
    pub fn on_open<F>(name: impl Into<String>, params: impl IntoIterator<Item = ParamType>, f: F) -> Self
    where
        F: Fn(&T, &mut MethodArgs<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::new(name, MethodKind::Open, params, unit(f))
    }

    /// Declare a message method. A returned value is sent back to the peer.
    pub fn on_message<F>(name: impl Into<String>, params: impl IntoIterator<Item = ParamType>, f: F) -> Self
    where
        F: Fn(&T, &mut MethodArgs<'_>) -> anyhow::Result<Option<Value>> + Send + Sync + 'static,
    {
        Self::new(name, MethodKind::Message, params, Arc::new(f))
    }

    /// Declare a close method.
    pub fn on_close<F>(name: impl Into<String>, params: impl IntoIterator<Item = ParamType>, f: F) -> Self
    where
        F: Fn(&T, &mut MethodArgs<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::new(name, MethodKind::Close, params, unit(f))
    }

    /// Declare an error method.
    pub fn on_error<F>(name: impl Into<String>, params: impl IntoIterator<Item = ParamType>, f: F) -> Self
    where
        F: Fn(&T, &mut MethodArgs<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::new(name, MethodKind::Error, params, unit(f))
    }

    /// Declare the return type.
    pub fn returns(mut self, ty: ValueType) -> Self {
        self.returns = ReturnType::Value(ty);
        self
    }

    /// Limit the size of messages delivered to this method.
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = Some(size);
        self
    }
}

impl<T> MethodDecl<T> {
    /// Method name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Event kind.
    pub fn kind(&self) -> MethodKind {
        self.kind
    }

    /// Declared parameters, in order.
    pub fn params(&self) -> &[ParamType] {
        &self.params
    }

    /// Declared return type.
    pub fn return_type(&self) -> &ReturnType {
        &self.returns
    }

    /// Message size limit.
    pub fn message_size_limit(&self) -> Option<usize> {
        self.max_message_size
    }

    pub(crate) fn invoke(&self, target: &T, args: &mut MethodArgs<'_>) -> anyhow::Result<Option<Value>> {
        (self.invoke)(target, args)
    }

    /// Payload parameter types, in declaration order.
    pub(crate) fn payload_types(&self) -> Vec<&ValueType> {
        self.params
            .iter()
            .filter_map(|p| match p {
                ParamType::Value(ty) => Some(ty),
                _ => None,
            })
            .collect()
    }
}

fn unit<T, F>(f: F) -> Invoker<T>
where
    F: Fn(&T, &mut MethodArgs<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(move |target, args| f(target, args).map(|()| None))
}

impl<T> fmt::Debug for MethodDecl<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDecl")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("params", &self.params)
            .field("returns", &self.returns)
            .finish_non_exhaustive()
    }
}

/// Constructor of endpoint instances.
pub type Constructor<T> = Arc<dyn Fn() -> anyhow::Result<T> + Send + Sync>;

/// An endpoint type with its configuration and method declarations.
pub struct EndpointClass<T> {
    name: String,
    config: EndpointConfig,
    constructor: Constructor<T>,
    methods: Vec<MethodDecl<T>>,
}

impl<T: 'static> EndpointClass<T> {
    /// Declare an endpoint class named `name` served at `config.path()`.
    pub fn new<F>(name: impl Into<String>, config: EndpointConfig, constructor: F) -> Self
    where
        F: Fn() -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            config,
            constructor: Arc::new(constructor),
            methods: Vec::new(),
        }
    }

    /// Add a method declaration.
    pub fn method(mut self, decl: MethodDecl<T>) -> Self {
        self.methods.push(decl);
        self
    }
}

impl<T> EndpointClass<T> {
    /// Class name used in diagnostics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Endpoint configuration.
    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    /// Declared methods, in declaration order.
    pub fn methods(&self) -> &[MethodDecl<T>] {
        &self.methods
    }
}

impl<T> fmt::Debug for EndpointClass<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointClass")
            .field("name", &self.name)
            .field("path", &self.config.path())
            .field("methods", &self.methods)
            .finish_non_exhaustive()
    }
}

/// Arguments available to one method invocation.
pub struct MethodArgs<'a> {
    session: &'a Session,
    params: &'a [ParamType],
    config: Option<&'a EndpointConfig>,
    message: Option<Value>,
    last: Option<bool>,
    close_reason: Option<&'a CloseReason>,
    error: Option<&'a anyhow::Error>,
}

impl<'a> MethodArgs<'a> {
    pub(crate) fn new(session: &'a Session, params: &'a [ParamType]) -> Self {
        Self {
            session,
            params,
            config: None,
            message: None,
            last: None,
            close_reason: None,
            error: None,
        }
    }

    pub(crate) fn with_config(mut self, config: &'a EndpointConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub(crate) fn with_message(mut self, message: Value, last: Option<bool>) -> Self {
        self.message = Some(message);
        self.last = last;
        self
    }

    pub(crate) fn with_close_reason(mut self, reason: &'a CloseReason) -> Self {
        self.close_reason = Some(reason);
        self
    }

    pub(crate) fn with_error(mut self, error: &'a anyhow::Error) -> Self {
        self.error = Some(error);
        self
    }

    /// The session.
    pub fn session(&self) -> &Session {
        self.session
    }

    /// Endpoint configuration, for open methods.
    pub fn config(&self) -> Option<&EndpointConfig> {
        self.config
    }

    /// The message payload, for message methods.
    pub fn message(&self) -> Option<&Value> {
        self.message.as_ref()
    }

    /// Take ownership of the message payload.
    pub fn take_message(&mut self) -> Option<Value> {
        self.message.take()
    }

    /// Last-fragment flag; always `true` for whole messages.
    pub fn is_last(&self) -> bool {
        self.last.unwrap_or(true)
    }

    /// Close reason, for close methods.
    pub fn close_reason(&self) -> Option<&CloseReason> {
        self.close_reason
    }

    /// The reported error, for error methods.
    pub fn error(&self) -> Option<&anyhow::Error> {
        self.error
    }

    /// Raw value of a path template variable.
    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.session.path_parameter(name)
    }

    /// A path template variable converted to its declared type.
    pub fn path_value(&self, name: &str) -> WsResult<Value> {
        let ty = self
            .params
            .iter()
            .find_map(|p| match p {
                ParamType::PathParam { name: n, ty } if n == name => Some(ty),
                _ => None,
            })
            .unwrap_or(&ValueType::String);
        let raw = self
            .path_param(name)
            .ok_or_else(|| WsError::decode_failed(format!("path parameter {name} is not bound")))?;
        decode_primitive(ty, raw)
    }
}

impl fmt::Debug for MethodArgs<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodArgs")
            .field("session", &self.session.id())
            .field("message", &self.message)
            .field("last", &self.last)
            .finish_non_exhaustive()
    }
}

/// How a message method receives its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MessageShape {
    pub ty: ValueType,
    pub partial: bool,
}

/// Classify the payload parameters of a message method.
///
/// One payload parameter makes a whole-message method. Two, exactly one of
/// them `Boolean`, make a partial method whose message is the other one, in
/// either order. Anything else has no usable shape.
pub(crate) fn message_shape(payload: &[&ValueType]) -> Option<MessageShape> {
    match payload {
        [ty] => Some(MessageShape {
            ty: (*ty).clone(),
            partial: false,
        }),
        [first, second] => {
            let first_flag = **first == ValueType::Boolean;
            let second_flag = **second == ValueType::Boolean;
            let ty = match (first_flag, second_flag) {
                (false, true) => first,
                (true, false) => second,
                _ => return None,
            };
            Some(MessageShape {
                ty: (*ty).clone(),
                partial: true,
            })
        }
        _ => None,
    }
}
