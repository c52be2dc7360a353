//! Template variables bound during the opening handshake.
//!
//! A captured path segment is percent-decoded when it is bound, so a request
//! for `/rooms/caf%C3%A9` binds `room` to `café`. The segment as it appeared
//! on the wire stays available through [`PathParam::raw`].

use std::fmt;
use std::str::FromStr;

use smallvec::SmallVec;

use crate::error::{RouterError, RouterResult};

/// Templates rarely carry more variables than this.
const INLINE_PARAMS: usize = 4;

/// One template variable and the segment bound to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathParam {
    name: String,
    value: String,
    /// The undecoded segment, kept only when decoding changed it.
    raw: Option<String>,
}

impl PathParam {
    /// Variable name as written in the template.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Decoded value.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// The segment exactly as it appeared in the request path.
    pub fn raw(&self) -> &str {
        self.raw.as_deref().unwrap_or(&self.value)
    }
}

/// Template variables of one matched path, in template order.
///
/// # Example
///
/// ```rust
/// use hermes_router::Params;
///
/// let mut params = Params::new();
/// params.bind("room", "caf%C3%A9").unwrap();
/// params.bind("seat", "12").unwrap();
///
/// assert_eq!(params.get("room"), Some("café"));
/// assert_eq!(params.parse::<u32>("seat").unwrap(), 12);
/// assert!(params.parse::<u32>("room").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Params {
    inner: SmallVec<[PathParam; INLINE_PARAMS]>,
}

impl Params {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `name` to a captured path segment, percent-decoding it.
    ///
    /// Fails when the decoded bytes are not UTF-8.
    pub fn bind(&mut self, name: impl Into<String>, segment: &str) -> RouterResult<()> {
        let name = name.into();
        let decoded = urlencoding::decode(segment).map_err(|e| RouterError::InvalidSegment {
            name: name.clone(),
            segment: segment.to_string(),
            reason: e.to_string(),
        })?;
        let raw = (decoded != segment).then(|| segment.to_string());
        self.inner.push(PathParam {
            name,
            value: decoded.into_owned(),
            raw,
        });
        Ok(())
    }

    /// Decoded value of a variable.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.find(name).map(PathParam::value)
    }

    /// A variable with its raw segment.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&PathParam> {
        self.inner.iter().find(|p| p.name == name)
    }

    /// Parses a variable into `T`.
    ///
    /// Unbound names and values `T` rejects are both errors, so a typed
    /// lookup never silently falls back to a default.
    pub fn parse<T>(&self, name: &str) -> RouterResult<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        let value = self
            .get(name)
            .ok_or_else(|| RouterError::UnboundParam(name.to_string()))?;
        value.parse().map_err(|e: T::Err| RouterError::InvalidParam {
            name: name.to_string(),
            value: value.to_string(),
            reason: e.to_string(),
        })
    }

    /// Returns true if a variable with this name was bound.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// Variable names in template order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.inner.iter().map(PathParam::name)
    }

    /// Returns true if no variables were bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Number of bound variables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// (name, decoded value) pairs in template order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|p| (p.name(), p.value()))
    }
}

impl<'a> IntoIterator for &'a Params {
    type Item = &'a PathParam;
    type IntoIter = std::slice::Iter<'a, PathParam>;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.iter()
    }
}
