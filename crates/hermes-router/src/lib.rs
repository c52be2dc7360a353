//! Path template matching for Hermes WebSocket endpoints.
//!
//! Server endpoints are deployed under a level-1 URI template such as
//! `/chat/{room}`. During the opening handshake the request path is matched
//! against every deployed template and the template variables are bound to
//! the captured path segments; the session later exposes them as path
//! parameters.
//!
//! # Example
//!
//! ```rust
//! use hermes_router::EndpointRouter;
//!
//! let mut router = EndpointRouter::new();
//! router.insert("/chat/{room}", "chat").unwrap();
//! router.insert("/chat/admin", "admin").unwrap();
//!
//! // Exact templates win over templated ones
//! assert_eq!(*router.match_path("/chat/admin").unwrap().value, "admin");
//!
//! let matched = router.match_path("/chat/lobby").unwrap();
//! assert_eq!(*matched.value, "chat");
//! assert_eq!(matched.params.get("room"), Some("lobby"));
//! ```
//!
//! # Architecture
//!
//! ```text
//!                    (root)
//!                      │
//!                    "chat"
//!                      │
//!              ┌───────┴───────┐
//!              │               │
//!           "admin"          {var}
//!          [/chat/admin]   [/chat/{room}]
//! ```

mod error;
mod node;
mod params;
mod router;

pub use error::{RouterError, RouterResult};
pub use node::{Node, SegmentKind};
pub use params::Params;
pub use router::{is_equivalent, EndpointRouter};

/// A matched template with its bound value and extracted variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateMatch<'a, T> {
    /// The template that matched
    pub template: &'a str,
    /// The value registered under the template
    pub value: &'a T,
    /// Template variables bound to path segments
    pub params: Params,
}

impl<'a, T> TemplateMatch<'a, T> {
    /// Creates a new template match.
    #[must_use]
    pub fn new(template: &'a str, value: &'a T, params: Params) -> Self {
        Self {
            template,
            value,
            params,
        }
    }

    /// Returns true when the template has no variables.
    #[must_use]
    pub fn is_exact(&self) -> bool {
        self.params.is_empty()
    }
}
