//! Storage layer error types
//!
//! All errors that can occur while working on the node tree or a backend
//! are defined here.

use std::path::PathBuf;

use thiserror::Error;

use crate::storage::types::{InvalidNameError, NodeKind, NodePath};

/// the main error type for storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// I/O error (filesystem level)
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// the requested node was not found
    #[error("node not found: {0}")]
    NodeNotFound(NodePath),

    /// a node with this name already exists
    #[error("node already exists: {0}")]
    NodeAlreadyExists(NodePath),

    /// the node has an unexpected kind
    #[error("unexpected node kind at {path}: expected {expected}, found {found}")]
    UnexpectedNodeKind {
        path: NodePath,
        expected: NodeKind,
        found: NodeKind,
    },

    /// mutation attempted through a read-only node
    #[error("access denied: cannot {operation} at {path} (read-only)")]
    AccessDenied {
        operation: &'static str,
        path: NodePath,
    },

    /// invalid node name
    #[error("invalid node name: {0}")]
    InvalidName(#[from] InvalidNameError),

    /// the external payload to import does not exist
    #[error("external source not found: {}", .0.display())]
    ExternalSourceMissing(PathBuf),

    /// stored content could not be interpreted
    #[error("corrupted data at {path}: {reason}")]
    CorruptedData { path: NodePath, reason: String },

    /// invalid UTF-8 in file content
    #[error("invalid utf-8 in {path}")]
    InvalidUtf8 { path: NodePath },

    /// a JSON record could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    /// check if this error indicates the node doesn't exist
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::NodeNotFound(_) | StorageError::ExternalSourceMissing(_)
        )
    }

    /// check if this error is a denied mutation
    pub fn is_access_denied(&self) -> bool {
        matches!(self, StorageError::AccessDenied { .. })
    }

    /// check if this error is a name conflict
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StorageError::NodeAlreadyExists(_) | StorageError::UnexpectedNodeKind { .. }
        )
    }
}

/// result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let not_found = StorageError::NodeNotFound(NodePath::parse("data").unwrap());
        assert!(not_found.is_not_found());
        assert!(!not_found.is_conflict());

        let denied = StorageError::AccessDenied {
            operation: "make_directory",
            path: NodePath::root(),
        };
        assert!(denied.is_access_denied());
        assert!(!denied.is_not_found());

        let conflict = StorageError::UnexpectedNodeKind {
            path: NodePath::parse("metadata").unwrap(),
            expected: NodeKind::Directory,
            found: NodeKind::File,
        };
        assert!(conflict.is_conflict());
    }

    #[test]
    fn test_access_denied_message() {
        let denied = StorageError::AccessDenied {
            operation: "make_directory",
            path: NodePath::parse("data/original").unwrap(),
        };
        assert_eq!(
            denied.to_string(),
            "access denied: cannot make_directory at data/original (read-only)"
        );
    }
}
