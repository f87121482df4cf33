//! Access modes for the node tree.
//!
//! Every node type carries an access-mode parameter, in the same way a
//! transaction carries its lifecycle state:
//! - `ReadWrite`: mutators delegate to the backend
//! - `ReadOnly`: every mutator fails with [`StorageError::AccessDenied`]
//!
//! Accessors return children, parents, casts, link targets, iterators and
//! lists with the mode of the node they were called on, so a read-only
//! node never hands out a writable one. There is no public conversion from
//! `ReadOnly` back to `ReadWrite`.

use std::fmt;

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::NodePath;

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::ReadWrite {}
    impl Sealed for super::ReadOnly {}
}

/// Runtime view of an access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    ReadOnly,
    ReadWrite,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::ReadOnly => write!(f, "read-only"),
            Mode::ReadWrite => write!(f, "read-write"),
        }
    }
}

/// Marker type for nodes and handles that may mutate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadWrite;

/// Marker type for nodes and handles that deny every mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOnly;

/// An access mode: decides whether a mutating operation may proceed.
pub trait AccessMode: sealed::Sealed + fmt::Debug + Clone + Copy + Send + Sync + 'static {
    const MODE: Mode;

    /// Called by every mutator before touching the backend.
    fn guard(operation: &'static str, path: &NodePath) -> StorageResult<()>;
}

impl AccessMode for ReadWrite {
    const MODE: Mode = Mode::ReadWrite;

    fn guard(_operation: &'static str, _path: &NodePath) -> StorageResult<()> {
        Ok(())
    }
}

impl AccessMode for ReadOnly {
    const MODE: Mode = Mode::ReadOnly;

    fn guard(operation: &'static str, path: &NodePath) -> StorageResult<()> {
        Err(StorageError::AccessDenied {
            operation,
            path: path.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guards() {
        let path = NodePath::parse("data").unwrap();
        assert!(ReadWrite::guard("make_directory", &path).is_ok());
        let err = ReadOnly::guard("make_directory", &path).unwrap_err();
        assert!(err.is_access_denied());
        assert_eq!(ReadOnly::MODE, Mode::ReadOnly);
        assert_eq!(ReadWrite::MODE.to_string(), "read-write");
    }
}
