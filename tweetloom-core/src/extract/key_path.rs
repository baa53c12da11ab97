//! Dotted key paths over nested JSON objects.

use std::fmt;
use std::str::FromStr;

use serde_json::Value;

/// A dotted path such as `data.core_info.location` resolved through nested
/// JSON objects.
///
/// Resolution only descends into objects; arrays and scalars end the walk.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyPath {
    segments: Vec<String>,
}

impl KeyPath {
    /// Build a path from a dotted string. Empty segments are ignored.
    pub fn new(path: &str) -> Self {
        Self {
            segments: path
                .split('.')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    /// Parse a list of dotted strings.
    pub fn list<S: AsRef<str>>(paths: &[S]) -> Vec<KeyPath> {
        paths.iter().map(|p| KeyPath::new(p.as_ref())).collect()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Resolve the path, returning `None` if any segment is missing.
    pub fn resolve<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        let mut current = root;
        for segment in &self.segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// Resolve the path to a string value.
    pub fn str<'a>(&self, root: &'a Value) -> Option<&'a str> {
        self.resolve(root).and_then(Value::as_str)
    }

    /// Resolve the path, treating `null` the same as absent.
    pub fn non_null<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        self.resolve(root).filter(|v| !v.is_null())
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

impl FromStr for KeyPath {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(KeyPath::new(s))
    }
}

impl From<&str> for KeyPath {
    fn from(s: &str) -> Self {
        KeyPath::new(s)
    }
}
