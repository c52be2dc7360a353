//! Radix tree node implementation.
//!
//! Templates are split on `/` and stored one segment per node. Template
//! variables share a single anonymous child per node so that templates with
//! differently named variables at the same position can coexist; the names
//! live on the leaf and are zipped with the captured values after a match.

use crate::error::{RouterError, RouterResult};
use crate::params::Params;

/// Type of path segment in the radix tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentKind {
    /// Literal path segment (e.g., "chat", "api")
    Static,
    /// Template variable (e.g., "{room}")
    Variable(String),
}

/// A registered template at the end of a path.
#[derive(Debug, Clone)]
pub(crate) struct Leaf<T> {
    /// The template exactly as it was registered
    pub(crate) template: String,
    /// Variable names in segment order
    pub(crate) names: Vec<String>,
    /// The value bound to this template
    pub(crate) value: T,
}

/// A node in the radix tree.
#[derive(Debug, Clone)]
pub struct Node<T> {
    /// The path segment this node represents
    pub segment: String,

    /// The kind of segment
    pub kind: SegmentKind,

    /// Template registered at this node, if any
    pub(crate) leaf: Option<Leaf<T>>,

    /// Static children, sorted by segment for binary search
    pub static_children: Vec<Node<T>>,

    /// Variable child (at most one per node)
    pub variable_child: Option<Box<Node<T>>>,
}

impl<T> Node<T> {
    /// Creates a new static node.
    #[must_use]
    pub fn new_static(segment: impl Into<String>) -> Self {
        Self {
            segment: segment.into(),
            kind: SegmentKind::Static,
            leaf: None,
            static_children: Vec::new(),
            variable_child: None,
        }
    }

    /// Creates a new variable node.
    #[must_use]
    pub fn new_variable(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            segment: format!("{{{name}}}"),
            kind: SegmentKind::Variable(name),
            leaf: None,
            static_children: Vec::new(),
            variable_child: None,
        }
    }

    /// Creates a root node for the tree.
    #[must_use]
    pub fn root() -> Self {
        Self::new_static("")
    }

    /// Inserts a template into the tree.
    ///
    /// Fails when an equivalent template (same literals, variables in the
    /// same positions) is already registered.
    pub fn insert(&mut self, template: &str, value: T) -> RouterResult<()> {
        let segments = parse_template(template)?;
        let names = segments
            .iter()
            .filter_map(|(_, kind)| match kind {
                SegmentKind::Variable(name) => Some(name.clone()),
                SegmentKind::Static => None,
            })
            .collect();
        let leaf = Leaf {
            template: template.to_string(),
            names,
            value,
        };
        self.insert_segments(&segments, leaf)
    }

    fn insert_segments(
        &mut self,
        segments: &[(String, SegmentKind)],
        leaf: Leaf<T>,
    ) -> RouterResult<()> {
        let Some(((segment, kind), remaining)) = segments.split_first() else {
            if let Some(existing) = &self.leaf {
                return Err(RouterError::DuplicateTemplate {
                    template: leaf.template,
                    existing: existing.template.clone(),
                });
            }
            self.leaf = Some(leaf);
            return Ok(());
        };

        match kind {
            SegmentKind::Static => {
                match self
                    .static_children
                    .binary_search_by(|c| c.segment.as_str().cmp(segment.as_str()))
                {
                    Ok(i) => self.static_children[i].insert_segments(remaining, leaf),
                    Err(i) => {
                        let mut child = Node::new_static(segment.clone());
                        child.insert_segments(remaining, leaf)?;
                        self.static_children.insert(i, child);
                        Ok(())
                    }
                }
            }
            SegmentKind::Variable(name) => self
                .variable_child
                .get_or_insert_with(|| Box::new(Node::new_variable(name.clone())))
                .insert_segments(remaining, leaf),
        }
    }

    /// Matches a request path against the tree.
    ///
    /// Literal segments win over variables at every level, so an exact
    /// template beats any template with variables, and among templates with
    /// variables the one whose first variable appears later wins.
    ///
    /// A path whose captured segments do not percent-decode matches nothing.
    #[must_use]
    pub fn match_path(&self, path: &str) -> Option<(&str, &T, Params)> {
        let segments = split_path(path);
        let mut captured = Vec::with_capacity(segments.len());
        let leaf = self.match_segments(&segments, &mut captured)?;
        let mut params = Params::new();
        for (name, segment) in leaf.names.iter().zip(captured) {
            params.bind(name.as_str(), segment).ok()?;
        }
        Some((leaf.template.as_str(), &leaf.value, params))
    }

    fn match_segments<'p>(
        &self,
        segments: &[&'p str],
        captured: &mut Vec<&'p str>,
    ) -> Option<&Leaf<T>> {
        let Some((segment, remaining)) = segments.split_first() else {
            return self.leaf.as_ref();
        };

        if let Some(child) = self.find_static_child(segment) {
            if let Some(leaf) = child.match_segments(remaining, captured) {
                return Some(leaf);
            }
        }

        if let Some(child) = &self.variable_child {
            let mark = captured.len();
            captured.push(*segment);
            if let Some(leaf) = child.match_segments(remaining, captured) {
                return Some(leaf);
            }
            captured.truncate(mark);
        }

        None
    }

    /// Finds a static child by segment using binary search.
    fn find_static_child(&self, segment: &str) -> Option<&Node<T>> {
        self.static_children
            .binary_search_by(|c| c.segment.as_str().cmp(segment))
            .ok()
            .map(|i| &self.static_children[i])
    }

    /// Visits every registered template.
    pub(crate) fn for_each_leaf<'a>(&'a self, f: &mut impl FnMut(&'a Leaf<T>)) {
        if let Some(leaf) = &self.leaf {
            f(leaf);
        }
        for child in &self.static_children {
            child.for_each_leaf(f);
        }
        if let Some(child) = &self.variable_child {
            child.for_each_leaf(f);
        }
    }
}

/// Splits a request path into its non-empty segments.
pub(crate) fn split_path(path: &str) -> Vec<&str> {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Parses a template into segments, validating variable syntax.
pub(crate) fn parse_template(template: &str) -> RouterResult<Vec<(String, SegmentKind)>> {
    if !template.starts_with('/') {
        return Err(RouterError::invalid(template, "template must start with '/'"));
    }

    let mut seen = Vec::new();
    let mut segments = Vec::new();
    for s in template.split('/').filter(|s| !s.is_empty()) {
        if let Some(name) = s.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            if name.is_empty() || name.contains(['{', '}']) {
                return Err(RouterError::invalid(template, "malformed template variable"));
            }
            if seen.contains(&name) {
                return Err(RouterError::invalid(
                    template,
                    format!("variable '{name}' appears more than once"),
                ));
            }
            seen.push(name);
            segments.push((s.to_string(), SegmentKind::Variable(name.to_string())));
        } else if s.contains(['{', '}']) {
            return Err(RouterError::invalid(template, "variables must span a whole segment"));
        } else {
            segments.push((s.to_string(), SegmentKind::Static));
        }
    }
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_new_static() {
        let node: Node<()> = Node::new_static("chat");
        assert_eq!(node.segment, "chat");
        assert_eq!(node.kind, SegmentKind::Static);
    }

    #[test]
    fn test_node_new_variable() {
        let node: Node<()> = Node::new_variable("room");
        assert_eq!(node.segment, "{room}");
        assert_eq!(node.kind, SegmentKind::Variable("room".to_string()));
    }

    #[test]
    fn test_parse_template_static() {
        let segments = parse_template("/chat/lobby").unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0], ("chat".to_string(), SegmentKind::Static));
        assert_eq!(segments[1], ("lobby".to_string(), SegmentKind::Static));
    }

    #[test]
    fn test_parse_template_variable() {
        let segments = parse_template("/chat/{room}").unwrap();
        assert_eq!(
            segments[1],
            ("{room}".to_string(), SegmentKind::Variable("room".to_string()))
        );
    }

    #[test]
    fn test_parse_template_rejects_bad_syntax() {
        assert!(parse_template("chat").is_err());
        assert!(parse_template("/chat/{}").is_err());
        assert!(parse_template("/chat/x{room}").is_err());
        assert!(parse_template("/{a}/{a}").is_err());
    }

    #[test]
    fn test_split_path_ignores_query() {
        assert_eq!(split_path("/chat/lobby?user=1"), vec!["chat", "lobby"]);
        assert!(split_path("/").is_empty());
    }

    #[test]
    fn test_insert_and_match_static() {
        let mut root = Node::root();
        root.insert("/echo", 1).unwrap();

        let (template, value, params) = root.match_path("/echo").unwrap();
        assert_eq!(template, "/echo");
        assert_eq!(*value, 1);
        assert!(params.is_empty());
    }

    #[test]
    fn test_insert_and_match_variable() {
        let mut root = Node::root();
        root.insert("/chat/{room}", 1).unwrap();

        let (_, _, params) = root.match_path("/chat/lobby").unwrap();
        assert_eq!(params.get("room"), Some("lobby"));
    }

    #[test]
    fn test_static_priority_over_variable() {
        let mut root = Node::root();
        root.insert("/chat/{room}", "templated").unwrap();
        root.insert("/chat/admin", "exact").unwrap();

        let (_, value, _) = root.match_path("/chat/admin").unwrap();
        assert_eq!(*value, "exact");

        let (_, value, params) = root.match_path("/chat/lobby").unwrap();
        assert_eq!(*value, "templated");
        assert_eq!(params.get("room"), Some("lobby"));
    }

    #[test]
    fn test_later_variable_wins() {
        let mut root = Node::root();
        root.insert("/{a}/b/c", "early").unwrap();
        root.insert("/a/{b}/c", "late").unwrap();

        let (_, value, params) = root.match_path("/a/b/c").unwrap();
        assert_eq!(*value, "late");
        assert_eq!(params.get("b"), Some("b"));
    }

    #[test]
    fn test_backtracking_drops_stale_captures() {
        let mut root = Node::root();
        root.insert("/{x}/left", 1).unwrap();
        root.insert("/top/{y}/right", 2).unwrap();

        let (_, value, params) = root.match_path("/top/left").unwrap();
        assert_eq!(*value, 1);
        assert_eq!(params.len(), 1);
        assert_eq!(params.get("x"), Some("top"));
    }

    #[test]
    fn test_differently_named_variables_share_node() {
        let mut root = Node::root();
        root.insert("/room/{id}/join", 1).unwrap();
        root.insert("/room/{name}/leave", 2).unwrap();

        let (_, _, params) = root.match_path("/room/7/join").unwrap();
        assert_eq!(params.get("id"), Some("7"));
        let (_, _, params) = root.match_path("/room/7/leave").unwrap();
        assert_eq!(params.get("name"), Some("7"));
    }

    #[test]
    fn test_equivalent_template_rejected() {
        let mut root = Node::root();
        root.insert("/chat/{room}", 1).unwrap();
        let err = root.insert("/chat/{other}", 2).unwrap_err();
        assert!(matches!(err, RouterError::DuplicateTemplate { .. }));
    }

    #[test]
    fn test_length_mismatch_does_not_match() {
        let mut root = Node::root();
        root.insert("/chat/{room}", 1).unwrap();
        assert!(root.match_path("/chat").is_none());
        assert!(root.match_path("/chat/a/b").is_none());
    }
}
