//! Names of the fixed container layout.
//!
//! ```text
//! <root>/
//!   version/            major, minor
//!   metadata/
//!     format/           code, version/{major,minor}, variant
//!     parameters/
//!     checksums/original
//!     mapping
//!     ...               one node per metadata value
//!   annotations/
//!   data/
//!     original/
//!     standard/
//! ```

use crate::storage::{AccessMode, Directory, Node, StorageResult};

pub const VERSION: &str = "version";
pub const METADATA: &str = "metadata";
pub const FORMAT: &str = "format";
pub const PARAMETERS: &str = "parameters";
pub const CHECKSUMS: &str = "checksums";
pub const MAPPING: &str = "mapping";
pub const ANNOTATIONS: &str = "annotations";
pub const DATA: &str = "data";
pub const ORIGINAL: &str = "original";
pub const STANDARD: &str = "standard";

/// Child directory `name`: created on demand when `create`, otherwise it
/// must already exist.
pub(crate) fn directory<M: AccessMode>(
    parent: &Directory<M>,
    name: &str,
    create: bool,
) -> StorageResult<Directory<M>> {
    if create {
        parent.make_directory(name)
    } else {
        parent.get_directory(name)
    }
}

/// Follow `names` below `root` without creating anything, `None` if a
/// directory on the way is missing.
pub(crate) fn try_find<M: AccessMode>(
    root: &Directory<M>,
    names: &[&str],
) -> StorageResult<Option<Node<M>>> {
    let mut current = Node::Directory(root.clone());
    for name in names {
        let Some(dir) = current.try_as_directory() else {
            return Ok(None);
        };
        match dir.try_get_node(name)? {
            Some(node) => current = node,
            None => return Ok(None),
        }
    }
    Ok(Some(current))
}

/// Write a small value file, replacing any node of the same name.
pub(crate) fn replace_value<M: AccessMode>(
    dir: &Directory<M>,
    name: &str,
    value: &str,
) -> StorageResult<()> {
    if let Some(existing) = dir.try_get_node(name)? {
        dir.remove_node(&existing)?;
    }
    dir.add_key_value_pair(name, value)?;
    Ok(())
}
