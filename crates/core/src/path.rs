use std::fmt;

use crate::CoreError;

/// Separator between segments of a dotted key.
pub const SEPARATOR: char = '.';

/// Leading character of a store-native operator segment (`$gt`, `$in`, ...).
pub const OPERATOR_SIGIL: char = '$';

pub fn is_operator(segment: &str) -> bool {
    segment.starts_with(OPERATOR_SIGIL)
}

/// A validated property key: a non-empty sequence of non-empty segments in
/// which an operator segment, if any, comes last.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Path(Vec<String>);

impl Path {
    /// Split a dotted key (`"a.b.c"`) into a path.
    pub fn parse(key: &str) -> Result<Self, CoreError> {
        Self::from_segments(key.split(SEPARATOR))
    }

    pub fn from_segments<I, S>(segments: I) -> Result<Self, CoreError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        Self::validate(segments)
    }

    fn validate(segments: Vec<String>) -> Result<Self, CoreError> {
        let joined = || segments.join(&SEPARATOR.to_string());
        if segments.is_empty() {
            return Err(CoreError::MalformedKey("empty key".into()));
        }
        for (i, segment) in segments.iter().enumerate() {
            if segment.is_empty() {
                return Err(CoreError::MalformedKey(format!("'{}': empty segment", joined())));
            }
            if segment.contains(SEPARATOR) {
                return Err(CoreError::MalformedKey(format!(
                    "'{}': segment '{segment}' contains '{SEPARATOR}'",
                    joined()
                )));
            }
            if is_operator(segment) && i + 1 < segments.len() {
                return Err(CoreError::MalformedKey(format!(
                    "'{}': special segment '{segment}' must be last",
                    joined()
                )));
            }
        }
        Ok(Self(segments))
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn into_segments(self) -> Vec<String> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; a path has at least one segment.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn first(&self) -> &str {
        &self.0[0]
    }

    pub fn last(&self) -> &str {
        &self.0[self.0.len() - 1]
    }

    pub fn is_leaf(&self) -> bool {
        self.0.len() == 1
    }

    pub fn ends_with_operator(&self) -> bool {
        is_operator(self.last())
    }

    /// Path without its last segment, `None` for a single-segment path.
    pub fn parent(&self) -> Option<Path> {
        if self.is_leaf() {
            None
        } else {
            Some(Self(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    /// Extend this path with more segments, re-validating the result.
    pub fn join<P: IntoPath>(&self, tail: P) -> Result<Path, CoreError> {
        let mut segments = self.0.clone();
        segments.extend(tail.into_path()?.0);
        Self::validate(segments)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(&SEPARATOR.to_string()))
    }
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Path({self})")
    }
}

/// Anything that can name a property: a dotted string, a list of segments, or
/// an already validated [`Path`].
pub trait IntoPath {
    fn into_path(self) -> Result<Path, CoreError>;
}

impl IntoPath for Path {
    fn into_path(self) -> Result<Path, CoreError> {
        Ok(self)
    }
}

impl IntoPath for &Path {
    fn into_path(self) -> Result<Path, CoreError> {
        Ok(self.clone())
    }
}

impl IntoPath for &str {
    fn into_path(self) -> Result<Path, CoreError> {
        Path::parse(self)
    }
}

impl IntoPath for String {
    fn into_path(self) -> Result<Path, CoreError> {
        Path::parse(&self)
    }
}

impl IntoPath for &String {
    fn into_path(self) -> Result<Path, CoreError> {
        Path::parse(self)
    }
}

impl IntoPath for &[&str] {
    fn into_path(self) -> Result<Path, CoreError> {
        Path::from_segments(self.iter().copied())
    }
}

impl<const N: usize> IntoPath for [&str; N] {
    fn into_path(self) -> Result<Path, CoreError> {
        Path::from_segments(self)
    }
}

impl IntoPath for Vec<String> {
    fn into_path(self) -> Result<Path, CoreError> {
        Path::from_segments(self)
    }
}

impl IntoPath for Vec<&str> {
    fn into_path(self) -> Result<Path, CoreError> {
        Path::from_segments(self)
    }
}
