//! Storage backends.
//!
//! A backend stores a tree of named directories, files and links. The node
//! tree in [`crate::storage::node`] is the only consumer; the container and
//! the handlers never talk to a backend directly.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{NodeKind, NodeName, NodePath};

/// Tree-shaped storage medium.
///
/// All implementations must satisfy these invariants:
/// - The root always exists and is a directory.
/// - `list` returns child names sorted, so traversals are deterministic.
/// - `create_dir`, `write`, `create_link` and `import` require the parent
///   directory to exist.
/// - `delete` removes a directory together with everything below it, and a
///   link without touching its target.
pub trait StorageBackend: Send + Sync + fmt::Debug {
    /// Kind of the node at `path`, `Ok(None)` if nothing is there.
    fn kind(&self, path: &NodePath) -> StorageResult<Option<NodeKind>>;

    /// Sorted names of the direct children of a directory.
    fn list(&self, dir: &NodePath) -> StorageResult<Vec<NodeName>>;

    /// Create a directory. Succeeds if a directory is already there.
    fn create_dir(&self, path: &NodePath) -> StorageResult<()>;

    fn read(&self, path: &NodePath) -> StorageResult<Vec<u8>>;

    /// Create or replace a file.
    fn write(&self, path: &NodePath, bytes: &[u8]) -> StorageResult<()>;

    /// Create a link at `path` pointing to `target`.
    ///
    /// Returns `Ok(false)` if the backend cannot represent links.
    fn create_link(&self, path: &NodePath, target: &NodePath) -> StorageResult<bool>;

    /// Container path a link points to.
    fn read_link(&self, path: &NodePath) -> StorageResult<NodePath>;

    fn delete(&self, path: &NodePath) -> StorageResult<()>;

    /// Copy (or move, if `move_source`) an external file or directory tree
    /// into the container at `dest`.
    fn import(&self, source: &Path, dest: &NodePath, move_source: bool) -> StorageResult<()>;

    /// Move the node at `path` out of the container to `destination`.
    fn export(&self, path: &NodePath, destination: &Path) -> StorageResult<()>;

    fn exists(&self, path: &NodePath) -> StorageResult<bool> {
        Ok(self.kind(path)?.is_some())
    }
}

/// Backend over a directory of the local filesystem.
///
/// Links are symbolic links with absolute targets; they are only
/// supported on unix platforms.
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    /// Open a filesystem backend, creating the root directory if missing.
    pub fn open(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root)?;
        let root = fs::canonicalize(root)?;
        debug!(root = %root.display(), "opened file storage");
        Ok(Self { root })
    }

    /// Filesystem location of the container root.
    pub fn root_path(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &NodePath) -> PathBuf {
        path.to_fs_path(&self.root)
    }

    fn require_parent(&self, path: &NodePath) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            match self.kind(&parent)? {
                Some(NodeKind::Directory) => {}
                Some(found) => {
                    return Err(StorageError::UnexpectedNodeKind {
                        path: parent,
                        expected: NodeKind::Directory,
                        found,
                    })
                }
                None => return Err(StorageError::NodeNotFound(parent)),
            }
        }
        Ok(())
    }
}

/// map `NotFound` onto the node path, everything else stays an io error
fn map_io(err: io::Error, path: &NodePath) -> StorageError {
    if err.kind() == io::ErrorKind::NotFound {
        StorageError::NodeNotFound(path.clone())
    } else {
        StorageError::Io(err)
    }
}

fn fs_kind(path: &Path) -> io::Result<Option<NodeKind>> {
    match fs::symlink_metadata(path) {
        Ok(meta) => {
            let file_type = meta.file_type();
            let kind = if file_type.is_symlink() {
                NodeKind::Link
            } else if file_type.is_dir() {
                NodeKind::Directory
            } else {
                NodeKind::File
            };
            Ok(Some(kind))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// recursive copy of a file or directory tree
pub(crate) fn copy_tree(source: &Path, target: &Path) -> io::Result<()> {
    if fs::symlink_metadata(source)?.is_dir() {
        fs::create_dir(target)?;
        for entry in fs::read_dir(source)? {
            let entry = entry?;
            copy_tree(&entry.path(), &target.join(entry.file_name()))?;
        }
        Ok(())
    } else {
        fs::copy(source, target).map(|_| ())
    }
}

pub(crate) fn remove_tree(path: &Path) -> io::Result<()> {
    if fs::symlink_metadata(path)?.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

/// rename, falling back to copy + delete across devices
fn move_tree(source: &Path, target: &Path) -> io::Result<()> {
    match fs::rename(source, target) {
        Ok(()) => Ok(()),
        Err(_) => {
            copy_tree(source, target)?;
            remove_tree(source)
        }
    }
}

impl StorageBackend for FileStorage {
    fn kind(&self, path: &NodePath) -> StorageResult<Option<NodeKind>> {
        Ok(fs_kind(&self.resolve(path))?)
    }

    fn list(&self, dir: &NodePath) -> StorageResult<Vec<NodeName>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(self.resolve(dir)).map_err(|e| map_io(e, dir))? {
            let entry = entry?;
            let file_name = entry.file_name();
            let name = file_name.to_str().ok_or_else(|| StorageError::CorruptedData {
                path: dir.clone(),
                reason: format!("non utf-8 entry name {:?}", file_name),
            })?;
            names.push(NodeName::new(name)?);
        }
        names.sort();
        Ok(names)
    }

    fn create_dir(&self, path: &NodePath) -> StorageResult<()> {
        match self.kind(path)? {
            Some(NodeKind::Directory) => return Ok(()),
            Some(found) => {
                return Err(StorageError::UnexpectedNodeKind {
                    path: path.clone(),
                    expected: NodeKind::Directory,
                    found,
                })
            }
            None => {}
        }
        self.require_parent(path)?;
        fs::create_dir(self.resolve(path))?;
        Ok(())
    }

    fn read(&self, path: &NodePath) -> StorageResult<Vec<u8>> {
        fs::read(self.resolve(path)).map_err(|e| map_io(e, path))
    }

    fn write(&self, path: &NodePath, bytes: &[u8]) -> StorageResult<()> {
        self.require_parent(path)?;
        fs::write(self.resolve(path), bytes)?;
        Ok(())
    }

    #[cfg(unix)]
    fn create_link(&self, path: &NodePath, target: &NodePath) -> StorageResult<bool> {
        self.require_parent(path)?;
        std::os::unix::fs::symlink(self.resolve(target), self.resolve(path))?;
        Ok(true)
    }

    #[cfg(not(unix))]
    fn create_link(&self, _path: &NodePath, _target: &NodePath) -> StorageResult<bool> {
        Ok(false)
    }

    fn read_link(&self, path: &NodePath) -> StorageResult<NodePath> {
        let target = fs::read_link(self.resolve(path)).map_err(|e| map_io(e, path))?;
        let relative = target.strip_prefix(&self.root).map_err(|_| StorageError::CorruptedData {
            path: path.clone(),
            reason: format!("link target {} is outside the container", target.display()),
        })?;
        let relative = relative.to_str().ok_or_else(|| StorageError::CorruptedData {
            path: path.clone(),
            reason: "non utf-8 link target".to_string(),
        })?;
        Ok(NodePath::parse(&relative.replace('\\', "/"))?)
    }

    fn delete(&self, path: &NodePath) -> StorageResult<()> {
        remove_tree(&self.resolve(path)).map_err(|e| map_io(e, path))
    }

    fn import(&self, source: &Path, dest: &NodePath, move_source: bool) -> StorageResult<()> {
        if fs_kind(source)?.is_none() {
            return Err(StorageError::ExternalSourceMissing(source.to_path_buf()));
        }
        if self.exists(dest)? {
            return Err(StorageError::NodeAlreadyExists(dest.clone()));
        }
        self.require_parent(dest)?;
        let target = self.resolve(dest);
        if move_source {
            move_tree(source, &target)?;
        } else {
            copy_tree(source, &target)?;
        }
        Ok(())
    }

    fn export(&self, path: &NodePath, destination: &Path) -> StorageResult<()> {
        if !self.exists(path)? {
            return Err(StorageError::NodeNotFound(path.clone()));
        }
        move_tree(&self.resolve(path), destination)?;
        Ok(())
    }
}
