//! core type-safe names and paths for the node tree.

use std::fmt;
use std::path::{Path, PathBuf};

/// A validated node name.
///
/// Node names become path components on every backend, so they are
/// restricted to prevent path traversal and separator confusion.
///
/// Valid names:
/// - 1-255 bytes
/// - no `/`, `\` or control characters
/// - not `.` or `..`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeName(String);

impl NodeName {
    /// names that would escape the current directory
    const RESERVED: &'static [&'static str] = &[".", ".."];

    /// create a new NodeName, validating the input
    pub fn new(name: impl Into<String>) -> Result<Self, InvalidNameError> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    fn validate(name: &str) -> Result<(), InvalidNameError> {
        if name.is_empty() {
            return Err(InvalidNameError::Empty);
        }

        if name.len() > 255 {
            return Err(InvalidNameError::TooLong(name.len()));
        }

        for (i, c) in name.chars().enumerate() {
            if c == '/' || c == '\\' || c.is_control() {
                return Err(InvalidNameError::InvalidCharacter { char: c, position: i });
            }
        }

        if Self::RESERVED.contains(&name) {
            return Err(InvalidNameError::Reserved(name.to_string()));
        }

        Ok(())
    }

    /// get the string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// the part after the last `.`, if any
    pub fn extension(&self) -> Option<&str> {
        match self.0.rfind('.') {
            Some(0) | None => None,
            Some(idx) => Some(&self.0[idx + 1..]),
        }
    }
}

impl fmt::Display for NodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for NodeName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Container-relative path of a node.
///
/// The root is the empty path. Components are joined with `/` regardless
/// of the backend, so paths are stable across platforms.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct NodePath(Vec<NodeName>);

impl NodePath {
    /// the container root
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// parse a `/`-separated relative path, validating every component
    pub fn parse(path: &str) -> Result<Self, InvalidNameError> {
        let trimmed = path.trim_matches('/');
        if trimmed.is_empty() {
            return Ok(Self::root());
        }
        trimmed
            .split('/')
            .map(NodeName::new)
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// path of a direct child
    pub fn join(&self, name: &NodeName) -> Self {
        let mut components = self.0.clone();
        components.push(name.clone());
        Self(components)
    }

    /// parent path, `None` at the root
    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].to_vec()))
    }

    /// last component, `None` at the root
    pub fn name(&self) -> Option<&NodeName> {
        self.0.last()
    }

    pub fn components(&self) -> &[NodeName] {
        &self.0
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// check whether `self` lies strictly below `ancestor`
    pub fn starts_with(&self, ancestor: &NodePath) -> bool {
        self.0.len() >= ancestor.0.len() && self.0[..ancestor.0.len()] == ancestor.0[..]
    }

    /// `self` relative to `ancestor`, `/`-joined
    pub fn relative_to(&self, ancestor: &NodePath) -> Option<String> {
        if !self.starts_with(ancestor) {
            return None;
        }
        Some(
            self.0[ancestor.0.len()..]
                .iter()
                .map(NodeName::as_str)
                .collect::<Vec<_>>()
                .join("/"),
        )
    }

    /// map onto a filesystem location below `base`
    pub fn to_fs_path(&self, base: &Path) -> PathBuf {
        let mut path = base.to_path_buf();
        for component in &self.0 {
            path.push(component.as_str());
        }
        path
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "/");
        }
        let joined = self.0.iter().map(NodeName::as_str).collect::<Vec<_>>().join("/");
        write!(f, "{}", joined)
    }
}

/// The capability set a stored node exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Directory,
    File,
    Link,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Directory => write!(f, "directory"),
            NodeKind::File => write!(f, "file"),
            NodeKind::Link => write!(f, "link"),
        }
    }
}

/// error type for invalid node names
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidNameError {
    Empty,
    TooLong(usize),
    InvalidCharacter { char: char, position: usize },
    Reserved(String),
}

impl fmt::Display for InvalidNameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "name cannot be empty"),
            Self::TooLong(len) => write!(f, "name too long: {} bytes", len),
            Self::InvalidCharacter { char, position } => {
                write!(f, "invalid character {:?} at position {}", char, position)
            }
            Self::Reserved(name) => write!(f, "'{}' is a reserved name", name),
        }
    }
}

impl std::error::Error for InvalidNameError {}
