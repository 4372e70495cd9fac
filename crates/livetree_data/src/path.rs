//! Tree paths.

use crate::error::{DataError, DataResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Characters that may never appear in a path segment.
const FORBIDDEN_KEY_CHARS: [char; 6] = ['.', '#', '$', '[', ']', '/'];

/// Maximum length of a single key, in UTF-8 bytes.
pub const MAX_KEY_BYTES: usize = 768;

/// An ordered sequence of segment names addressing a node.
///
/// The empty sequence is the root. Paths are plain values: equality and
/// prefix relations are structural.
///
/// Serialized as a list of segments; deserializing validates every segment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct Path {
    segments: Vec<String>,
}

impl TryFrom<Vec<String>> for Path {
    type Error = DataError;

    fn try_from(segments: Vec<String>) -> DataResult<Self> {
        Self::from_segments(segments)
    }
}

impl From<Path> for Vec<String> {
    fn from(path: Path) -> Self {
        path.segments
    }
}

impl Path {
    /// Returns the root path.
    pub fn root() -> Self {
        Self::default()
    }

    /// Parses a slash separated path. Empty segments are ignored, so
    /// `"/a//b/"` equals `"a/b"`.
    pub fn parse(path: &str) -> DataResult<Self> {
        let mut segments = Vec::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            validate_key(segment)?;
            segments.push(segment.to_string());
        }
        Ok(Self { segments })
    }

    /// Builds a path from already validated segments.
    pub fn from_segments<I, S>(segments: I) -> DataResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        for segment in &segments {
            validate_key(segment)?;
        }
        Ok(Self { segments })
    }

    /// Returns the segments of this path.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Returns true for the root path.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Returns true for the root path.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Returns the first segment, if any.
    pub fn front(&self) -> Option<&str> {
        self.segments.first().map(String::as_str)
    }

    /// Returns the last segment, or `None` at the root.
    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Returns the parent path, or `None` at the root.
    pub fn parent(&self) -> Option<Path> {
        if self.segments.is_empty() {
            return None;
        }
        let mut segments = self.segments.clone();
        segments.pop();
        Some(Path { segments })
    }

    /// Returns this path without its first segment.
    pub fn pop_front(&self) -> Path {
        Path {
            segments: self.segments.iter().skip(1).cloned().collect(),
        }
    }

    /// Appends a single validated child name.
    pub fn child(&self, name: &str) -> DataResult<Path> {
        validate_key(name)?;
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        Ok(Path { segments })
    }

    /// Appends a child name taken from an existing node, without
    /// re-validating it.
    pub fn child_key(&self, name: &str) -> Path {
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        Path { segments }
    }

    /// Appends another path.
    pub fn join(&self, other: &Path) -> Path {
        let mut segments = self.segments.clone();
        segments.extend(other.segments.iter().cloned());
        Path { segments }
    }

    /// Returns true if `self` is `other` or one of its ancestors.
    pub fn contains(&self, other: &Path) -> bool {
        self.segments.len() <= other.segments.len()
            && self.segments.iter().zip(&other.segments).all(|(a, b)| a == b)
    }

    /// Returns true if one of the two paths contains the other.
    pub fn overlaps(&self, other: &Path) -> bool {
        self.contains(other) || other.contains(self)
    }

    /// Returns the path of `other` relative to `self`, if `self` contains it.
    pub fn relative(&self, other: &Path) -> Option<Path> {
        if !self.contains(other) {
            return None;
        }
        Some(Path {
            segments: other.segments[self.segments.len()..].to_vec(),
        })
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

/// Checks that a key can be used as a path segment or child name.
pub fn validate_key(key: &str) -> DataResult<()> {
    if key.is_empty() {
        return Err(DataError::invalid_key(key, "key must not be empty"));
    }
    if key.len() > MAX_KEY_BYTES {
        return Err(DataError::invalid_key(key, "key is longer than 768 bytes"));
    }
    if let Some(c) = key
        .chars()
        .find(|c| FORBIDDEN_KEY_CHARS.contains(c) || c.is_ascii_control())
    {
        return Err(DataError::invalid_key(
            key,
            format!("key contains forbidden character {c:?}"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_goes_through_validation() {
        let path = Path::parse("users/fred").unwrap();
        let json = serde_json::to_value(&path).unwrap();
        assert_eq!(json, serde_json::json!(["users", "fred"]));
        assert_eq!(serde_json::from_value::<Path>(json).unwrap(), path);

        assert!(serde_json::from_value::<Path>(serde_json::json!(["a.b"])).is_err());
        assert!(serde_json::from_value::<Path>(serde_json::json!(["ok", ""])).is_err());
    }

    #[test]
    fn parse_ignores_empty_segments() {
        let path = Path::parse("/users//fred/").unwrap();
        assert_eq!(path.segments(), &["users".to_string(), "fred".to_string()]);
        assert_eq!(path.to_string(), "/users/fred");
        assert!(Path::parse("").unwrap().is_root());
        assert_eq!(Path::root().to_string(), "/");
    }

    #[test]
    fn forbidden_characters_rejected() {
        for bad in ["a.b", "a#", "$x", "[0]", "x]"] {
            assert!(Path::parse(bad).is_err(), "{bad} should be rejected");
        }
        assert!(Path::root().child("a/b").is_err());
        assert!(validate_key("tab\there").is_err());
    }

    #[test]
    fn prefix_relations() {
        let x = Path::parse("x").unwrap();
        let xa = Path::parse("x/a").unwrap();
        let y = Path::parse("y").unwrap();

        assert!(x.contains(&xa));
        assert!(!xa.contains(&x));
        assert!(x.overlaps(&xa) && xa.overlaps(&x));
        assert!(!x.overlaps(&y));
        assert!(Path::root().contains(&y));
        assert_eq!(x.relative(&xa), Some(Path::parse("a").unwrap()));
        assert_eq!(xa.relative(&x), None);
    }

    #[test]
    fn navigation() {
        let path = Path::parse("a/b/c").unwrap();
        assert_eq!(path.name(), Some("c"));
        assert_eq!(path.front(), Some("a"));
        assert_eq!(path.parent().unwrap().to_string(), "/a/b");
        assert_eq!(path.pop_front().to_string(), "/b/c");
        assert_eq!(Path::root().parent(), None);
        assert_eq!(Path::root().name(), None);
    }
}
