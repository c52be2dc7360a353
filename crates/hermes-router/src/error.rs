//! Router error types.

use thiserror::Error;

/// Result type for template registration and variable access.
pub type RouterResult<T> = Result<T, RouterError>;

/// Errors raised while registering templates or reading bound variables.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouterError {
    /// The template is not a valid level-1 URI template.
    #[error("invalid path template '{template}': {reason}")]
    InvalidTemplate {
        /// The offending template.
        template: String,
        /// Why it was rejected.
        reason: String,
    },

    /// An equivalent template is already registered.
    #[error("path template '{template}' is equivalent to already registered '{existing}'")]
    DuplicateTemplate {
        /// The template being registered.
        template: String,
        /// The template that was registered first.
        existing: String,
    },

    /// A captured segment does not percent-decode to UTF-8.
    #[error("path segment '{segment}' for '{name}' is not valid percent-encoded UTF-8: {reason}")]
    InvalidSegment {
        /// Template variable the segment was bound to.
        name: String,
        /// The segment as received.
        segment: String,
        /// Decoder message.
        reason: String,
    },

    /// No variable of this name was bound.
    #[error("path parameter '{0}' is not bound")]
    UnboundParam(String),

    /// A bound value could not be parsed into the requested type.
    #[error("path parameter '{name}' has value '{value}' which cannot be parsed: {reason}")]
    InvalidParam {
        /// Variable name.
        name: String,
        /// Decoded value.
        value: String,
        /// Parser message.
        reason: String,
    },
}

impl RouterError {
    /// Create a new invalid template error.
    pub fn invalid(template: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTemplate {
            template: template.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RouterError::invalid("chat", "template must start with '/'");
        assert_eq!(
            err.to_string(),
            "invalid path template 'chat': template must start with '/'"
        );
        assert_eq!(
            RouterError::UnboundParam("room".into()).to_string(),
            "path parameter 'room' is not bound"
        );
    }
}
