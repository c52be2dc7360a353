//! Compiled annotated endpoints.

use std::sync::Arc;

use tracing::{info, warn};

use super::{message_shape, Constructor, EndpointClass, ErrorCollector, MethodArgs, MethodDecl, MethodKind};
use crate::config::EndpointConfig;
use crate::endpoint::{Endpoint, EndpointFactory};
use crate::error::{CloseReason, WsError};
use crate::handler::{MessageHandler, PartialHandler, WholeHandler};
use crate::session::Session;
use crate::types::{Value, ValueType};

/// One entry of the dispatch table.
enum Binding<T> {
    Open(Arc<MethodDecl<T>>),
    Message {
        decl: Arc<MethodDecl<T>>,
        ty: ValueType,
        partial: bool,
    },
    Close(Arc<MethodDecl<T>>),
    Error(Arc<MethodDecl<T>>),
}

impl<T> Binding<T> {
    fn lifecycle_kind(&self) -> Option<MethodKind> {
        match self {
            Self::Open(_) => Some(MethodKind::Open),
            Self::Close(_) => Some(MethodKind::Close),
            Self::Error(_) => Some(MethodKind::Error),
            Self::Message { .. } => None,
        }
    }
}

/// An endpoint class compiled into a dispatch table.
pub struct AnnotatedEndpoint<T> {
    name: String,
    config: EndpointConfig,
    constructor: Constructor<T>,
    bindings: Vec<Binding<T>>,
    escalated: ErrorCollector,
}

impl<T: Send + Sync + 'static> AnnotatedEndpoint<T> {
    /// Build the dispatch table of `class`.
    ///
    /// Only the first method of each lifecycle kind is kept. Message methods
    /// without a usable payload shape are skipped. Both are logged, not
    /// fatal.
    pub fn compile(class: EndpointClass<T>, incoming_buffer_size: usize) -> Self {
        let EndpointClass {
            name,
            config,
            constructor,
            methods,
        } = class;
        let mut bindings: Vec<Binding<T>> = Vec::with_capacity(methods.len());

        for decl in methods {
            let decl = Arc::new(decl);
            let binding = match decl.kind() {
                MethodKind::Open => Binding::Open(decl),
                MethodKind::Close => Binding::Close(decl),
                MethodKind::Error => Binding::Error(decl),
                MethodKind::Message => {
                    let Some(shape) = message_shape(&decl.payload_types()) else {
                        warn!(
                            class = %name,
                            method = decl.name(),
                            "Message method has no usable message parameter and will be ignored"
                        );
                        continue;
                    };
                    if let Some(max) = decl.message_size_limit() {
                        if max > incoming_buffer_size {
                            info!(
                                class = %name,
                                method = decl.name(),
                                max_message_size = max,
                                incoming_buffer_size,
                                "Max message size is larger than the incoming buffer"
                            );
                        }
                    }
                    Binding::Message {
                        ty: shape.ty,
                        partial: shape.partial,
                        decl,
                    }
                }
            };

            if let Some(kind) = binding.lifecycle_kind() {
                if let Some(existing) = bindings.iter().find_map(|b| match b {
                    Binding::Open(d) | Binding::Close(d) | Binding::Error(d) if d.kind() == kind => {
                        Some(d.name().to_string())
                    }
                    _ => None,
                }) {
                    warn!(
                        class = %name,
                        kind = %kind,
                        kept = %existing,
                        ignored = binding_name(&binding),
                        "Multiple methods for the same lifecycle event, the latter is ignored"
                    );
                    continue;
                }
            }
            bindings.push(binding);
        }

        Self {
            name,
            config,
            constructor,
            bindings,
            escalated: ErrorCollector::new(),
        }
    }

    /// Class name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Endpoint configuration.
    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    /// Number of message methods in the dispatch table.
    pub fn message_method_count(&self) -> usize {
        self.bindings
            .iter()
            .filter(|b| matches!(b, Binding::Message { .. }))
            .count()
    }

    /// Name of the method bound to a lifecycle event.
    pub fn lifecycle_method(&self, kind: MethodKind) -> Option<&str> {
        self.lifecycle(kind).map(|decl| decl.name())
    }

    /// Failures of error methods themselves.
    pub fn escalated_errors(&self) -> Vec<String> {
        self.escalated.violations()
    }

    /// Factory creating one instance of `T` per session.
    pub fn factory(self: Arc<Self>) -> EndpointFactory {
        Arc::new(move || {
            let instance = (self.constructor)()?;
            Ok(Arc::new(AnnotatedInstance {
                model: Arc::clone(&self),
                instance: Arc::new(instance),
            }) as Arc<dyn Endpoint>)
        })
    }

    fn lifecycle(&self, kind: MethodKind) -> Option<&MethodDecl<T>> {
        self.bindings.iter().find_map(|b| match b {
            Binding::Open(d) | Binding::Close(d) | Binding::Error(d) if d.kind() == kind => Some(&**d),
            _ => None,
        })
    }
}

fn binding_name<T>(binding: &Binding<T>) -> &str {
    match binding {
        Binding::Open(d) | Binding::Close(d) | Binding::Error(d) | Binding::Message { decl: d, .. } => d.name(),
    }
}

impl<T> std::fmt::Debug for AnnotatedEndpoint<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnnotatedEndpoint")
            .field("name", &self.name)
            .field("path", &self.config.path())
            .field("bindings", &self.bindings.len())
            .finish_non_exhaustive()
    }
}

/// One instance of an annotated class, bound to one session.
struct AnnotatedInstance<T> {
    model: Arc<AnnotatedEndpoint<T>>,
    instance: Arc<T>,
}

impl<T: Send + Sync + 'static> AnnotatedInstance<T> {
    fn handler(&self, session: &Session, decl: &Arc<MethodDecl<T>>, ty: &ValueType, partial: bool) -> MessageHandler {
        let weak = session.downgrade();
        let instance = Arc::clone(&self.instance);
        let decl_ref = Arc::clone(decl);

        if partial {
            let mut handler = PartialHandler::new(ty.clone(), move |value, last| {
                let session = weak.upgrade().ok_or(WsError::SessionClosed)?;
                let mut args = MethodArgs::new(&session, decl_ref.params()).with_message(value, Some(last));
                reply(&session, decl_ref.invoke(&instance, &mut args)?)
            });
            if let Some(max) = decl.message_size_limit() {
                handler = handler.with_max_message_size(max);
            }
            handler.into()
        } else {
            let mut handler = WholeHandler::new(ty.clone(), move |value| {
                let session = weak.upgrade().ok_or(WsError::SessionClosed)?;
                let mut args = MethodArgs::new(&session, decl_ref.params()).with_message(value, None);
                reply(&session, decl_ref.invoke(&instance, &mut args)?)
            });
            if let Some(max) = decl.message_size_limit() {
                handler = handler.with_max_message_size(max);
            }
            handler.into()
        }
    }
}

fn reply(session: &Session, result: Option<Value>) -> anyhow::Result<()> {
    if let Some(value) = result {
        session.basic_remote().send_object(&value)?;
    }
    Ok(())
}

impl<T: Send + Sync + 'static> Endpoint for AnnotatedInstance<T> {
    fn on_open(&self, session: &Session, config: &EndpointConfig) -> anyhow::Result<()> {
        for binding in &self.model.bindings {
            if let Binding::Message { decl, ty, partial } = binding {
                session.add_message_handler(self.handler(session, decl, ty, *partial))?;
            }
        }
        if let Some(decl) = self.model.lifecycle(MethodKind::Open) {
            let mut args = MethodArgs::new(session, decl.params()).with_config(config);
            decl.invoke(&self.instance, &mut args)?;
        }
        Ok(())
    }

    fn on_close(&self, session: &Session, reason: &CloseReason) -> anyhow::Result<()> {
        if let Some(decl) = self.model.lifecycle(MethodKind::Close) {
            let mut args = MethodArgs::new(session, decl.params()).with_close_reason(reason);
            decl.invoke(&self.instance, &mut args)?;
        }
        Ok(())
    }

    fn on_error(&self, session: &Session, error: &anyhow::Error) {
        let Some(decl) = self.model.lifecycle(MethodKind::Error) else {
            warn!(
                session_id = %session.id(),
                class = %self.model.name,
                error = %error,
                "Unhandled error in endpoint"
            );
            return;
        };
        let mut args = MethodArgs::new(session, decl.params()).with_error(error);
        if let Err(e) = decl.invoke(&self.instance, &mut args) {
            warn!(
                session_id = %session.id(),
                method = decl.name(),
                error = %e,
                "Error method failed"
            );
            self.model.escalated.add(format!(
                "Class: {}. Error method {} failed: {e}",
                self.model.name,
                decl.name()
            ));
        }
    }
}
