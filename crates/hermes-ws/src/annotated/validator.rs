//! Structural checks for annotated endpoint classes.

use std::sync::Arc;

use tracing::debug;

use super::{message_shape, EndpointClass, ErrorCollector, MethodDecl, MethodKind, ParamType, ReturnType};
use crate::coder::CoderRegistry;
use crate::handler::{HandlerRegistry, MessageHandler};
use crate::types::ValueType;

const MULTIPLE_IDENTICAL_PARAMETERS: &str = "has got multiple parameters of identical type.";
const FORBIDDEN_CLOSE_PARAMS: &str = "@OnClose has got different params than Session or CloseReason.";
const MANDATORY_ERROR_PARAM_MISSING: &str = "does not have mandatory Throwable param.";
const FORBIDDEN_RETURN_TYPE: &str = "has got unsupported return type.";

/// Payload family of a message parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Text,
    Binary,
    Flag,
    Pong,
    Decoded,
}

impl Family {
    fn of(ty: &ValueType) -> Self {
        match ty {
            ValueType::Boolean => Self::Flag,
            ValueType::Pong => Self::Pong,
            t if t.is_text() => Self::Text,
            t if t.is_binary() => Self::Binary,
            _ => Self::Decoded,
        }
    }

    fn conflicts_with(self, other: Self) -> bool {
        use Family::{Binary, Decoded, Flag, Pong, Text};
        matches!(
            (self, other),
            (Text, Binary | Pong)
                | (Binary, Text | Pong)
                | (Pong, Text | Binary | Flag)
                | (Flag, Pong)
                | (Decoded, Text | Binary | Pong)
                | (Text | Binary | Pong, Decoded)
        )
    }
}

/// Check `class` and add every violation found to `collector`.
///
/// Violations are never fatal individually; callers compose the collector
/// once all classes of a deployment have been checked.
pub fn validate<T>(class: &EndpointClass<T>, collector: &ErrorCollector) {
    let coders = Arc::new(CoderRegistry::from_config(class.config()));
    let mut handlers = HandlerRegistry::new(Arc::clone(&coders));
    let before = collector.len();

    for method in class.methods() {
        let prefix = format!("Method: {}.{}:", class.name(), method.name());
        check_path_params(method, &prefix, collector);
        match method.kind() {
            MethodKind::Open => check_open(method, &prefix, collector),
            MethodKind::Close => check_close(method, &prefix, collector),
            MethodKind::Error => check_error(method, &prefix, collector),
            MethodKind::Message => {
                check_message(class.name(), method, &prefix, &mut handlers, collector);
                check_return_type(method, &prefix, &coders, collector);
            }
        }
    }

    debug!(
        class = class.name(),
        violations = collector.len() - before,
        "Endpoint class validated"
    );
}

fn check_path_params<T>(method: &MethodDecl<T>, prefix: &str, collector: &ErrorCollector) {
    for param in method.params() {
        if let ParamType::PathParam { ty, .. } = param {
            if *ty != ValueType::String && !ty.is_primitive() {
                collector.add(format!(
                    "{prefix} {param} has unsupported type; path parameters must be String or primitive."
                ));
            }
        }
    }
}

fn specific<T>(method: &MethodDecl<T>) -> impl Iterator<Item = &ParamType> {
    method.params().iter().filter(|p| !p.is_ambient())
}

fn check_open<T>(method: &MethodDecl<T>, prefix: &str, collector: &ErrorCollector) {
    for param in specific(method) {
        if *param != ParamType::EndpointConfig {
            collector.add(format!(
                "{prefix} {param} is not allowed as parameter type for method annotated with {}.",
                MethodKind::Open
            ));
        }
    }
}

fn check_close<T>(method: &MethodDecl<T>, prefix: &str, collector: &ErrorCollector) {
    for param in specific(method) {
        if *param != ParamType::CloseReason {
            collector.add(format!("{prefix} {FORBIDDEN_CLOSE_PARAMS}"));
        }
    }
}

fn check_error<T>(method: &MethodDecl<T>, prefix: &str, collector: &ErrorCollector) {
    let mut throwable = false;
    for param in specific(method) {
        if *param != ParamType::Throwable {
            collector.add(format!(
                "{prefix} {param} is not allowed as parameter type for method annotated with {}.",
                MethodKind::Error
            ));
        } else if throwable {
            collector.add(format!("{prefix} {MULTIPLE_IDENTICAL_PARAMETERS}"));
        } else {
            throwable = true;
        }
    }
    if !throwable {
        collector.add(format!("{prefix} {MANDATORY_ERROR_PARAM_MISSING}"));
    }
}

fn check_message<T>(
    class: &str,
    method: &MethodDecl<T>,
    prefix: &str,
    handlers: &mut HandlerRegistry,
    collector: &ErrorCollector,
) {
    let before = collector.len();

    for param in specific(method) {
        if !matches!(param, ParamType::Value(_)) {
            collector.add(format!(
                "{prefix} {param} is not allowed as parameter type for method annotated with {}.",
                MethodKind::Message
            ));
        }
    }

    let payload = method.payload_types();
    if payload.len() > 1 {
        let families: Vec<Family> = payload.iter().map(|ty| Family::of(ty)).collect();
        let repeated = families
            .iter()
            .enumerate()
            .any(|(i, f)| families[i + 1..].contains(f));
        if repeated {
            collector.add(format!("{prefix} {MULTIPLE_IDENTICAL_PARAMETERS}"));
        }
        for (i, a) in families.iter().enumerate() {
            for (j, b) in families.iter().enumerate().skip(i + 1) {
                if a.conflicts_with(*b) {
                    collector.add(format!(
                        "{prefix} has got illegal combination of parameters: {} and {}.",
                        payload[i], payload[j]
                    ));
                }
            }
        }
    }

    if collector.len() > before {
        return;
    }

    // Register a stand-in so category and type clashes between methods of
    // the same class surface the same way they would on a live session.
    let Some(shape) = message_shape(&payload) else {
        return;
    };
    let stand_in = if shape.partial {
        MessageHandler::partial(shape.ty, |_, _| Ok(()))
    } else {
        MessageHandler::whole(shape.ty, |_| Ok(()))
    };
    if let Err(e) = handlers.add(stand_in) {
        collector.add(format!("Class: {class}. {e}"));
    }
}

fn check_return_type<T>(method: &MethodDecl<T>, prefix: &str, coders: &CoderRegistry, collector: &ErrorCollector) {
    let ReturnType::Value(ty) = method.return_type() else {
        return;
    };
    let supported = matches!(ty, ValueType::String | ValueType::ByteBuffer | ValueType::ByteArray)
        || ty.is_primitive()
        || coders.has_user_encoder_for(ty);
    if !supported {
        collector.add(format!("{prefix} {FORBIDDEN_RETURN_TYPE}"));
    }
}
