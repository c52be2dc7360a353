//! High-level router API.
//!
//! This module provides [`EndpointRouter`], which maps endpoint path
//! templates to deployed endpoints and resolves handshake request paths.

use crate::error::RouterResult;
use crate::node::{split_path, Node};
use crate::params::Params;
use crate::TemplateMatch;

/// A radix tree of endpoint path templates.
///
/// # Example
///
/// ```rust
/// use hermes_router::EndpointRouter;
///
/// let mut router = EndpointRouter::new();
/// router.insert("/echo", "echo").unwrap();
/// router.insert("/chat/{room}", "chat").unwrap();
///
/// let matched = router.match_path("/chat/lobby").unwrap();
/// assert_eq!(*matched.value, "chat");
/// assert_eq!(matched.params.get("room"), Some("lobby"));
/// ```
///
/// # Match Priority
///
/// 1. **Exact templates** (no variables) beat any templated match.
/// 2. Among templated matches, the one whose first variable sits further
///    to the right wins (`/a/{b}/c` beats `/{a}/b/c` for `/a/b/c`).
#[derive(Debug, Clone)]
pub struct EndpointRouter<T> {
    /// Root node of the radix tree
    root: Node<T>,
    /// Number of templates registered
    template_count: usize,
}

impl<T> Default for EndpointRouter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> EndpointRouter<T> {
    /// Creates a new empty router.
    #[must_use]
    pub fn new() -> Self {
        Self {
            root: Node::root(),
            template_count: 0,
        }
    }

    /// Registers a path template.
    ///
    /// Returns an error if the template is malformed or equivalent to one
    /// already registered (`/chat/{room}` and `/chat/{id}` are equivalent).
    pub fn insert(&mut self, template: &str, value: T) -> RouterResult<()> {
        self.root.insert(template, value)?;
        self.template_count += 1;
        Ok(())
    }

    /// Matches a request path.
    #[must_use]
    pub fn match_path(&self, path: &str) -> Option<TemplateMatch<'_, T>> {
        let (template, value, params) = self.root.match_path(path)?;
        Some(TemplateMatch::new(template, value, params))
    }

    /// Returns every registered template that would accept the path, best
    /// match first.
    ///
    /// Useful for diagnostics; handshakes only need [`match_path`](Self::match_path).
    #[must_use]
    pub fn all_matches(&self, path: &str) -> Vec<TemplateMatch<'_, T>> {
        let segments = split_path(path);
        let mut matches = Vec::new();
        self.root.for_each_leaf(&mut |leaf| {
            if let Some(params) = bind(&leaf.template, &segments) {
                matches.push(TemplateMatch::new(&leaf.template, &leaf.value, params));
            }
        });
        matches.sort_by_key(|m| std::cmp::Reverse(first_variable_index(m.template)));
        matches
    }

    /// Returns the number of templates registered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.template_count
    }

    /// Returns true if no templates are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.template_count == 0
    }
}

/// Returns true when both templates accept exactly the same paths.
#[must_use]
pub fn is_equivalent(a: &str, b: &str) -> bool {
    let shape = |t: &str| -> Vec<String> {
        split_path(t)
            .into_iter()
            .map(|s| {
                if s.starts_with('{') && s.ends_with('}') {
                    "{x}".to_string()
                } else {
                    s.to_string()
                }
            })
            .collect()
    };
    shape(a) == shape(b)
}

fn bind(template: &str, segments: &[&str]) -> Option<Params> {
    let template_segments = split_path(template);
    if template_segments.len() != segments.len() {
        return None;
    }
    let mut params = Params::new();
    for (t, s) in template_segments.iter().zip(segments) {
        if let Some(name) = t.strip_prefix('{').and_then(|t| t.strip_suffix('}')) {
            params.bind(name, s).ok()?;
        } else if t != s {
            return None;
        }
    }
    Some(params)
}

/// Index of the first variable segment, or `usize::MAX` for exact templates.
fn first_variable_index(template: &str) -> usize {
    split_path(template)
        .iter()
        .position(|s| s.starts_with('{'))
        .unwrap_or(usize::MAX)
}
