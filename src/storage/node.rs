//! Directory, file and link handles over a storage backend.
//!
//! A handle is a backend reference plus a container path. A directory owns
//! its children through the backend; the parent of a node is derived from
//! its path, so a child never holds its parent alive.
//!
//! All handles carry an [`AccessMode`]; see [`crate::storage::access`].

use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::storage::access::{AccessMode, ReadOnly, ReadWrite};
use crate::storage::backend::StorageBackend;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{InvalidNameError, NodeKind, NodeName, NodePath};

/// A directory in the container tree.
pub struct Directory<M: AccessMode = ReadWrite> {
    backend: Arc<dyn StorageBackend>,
    path: NodePath,
    _mode: PhantomData<M>,
}

/// A file holding payload bytes.
pub struct File<M: AccessMode = ReadWrite> {
    backend: Arc<dyn StorageBackend>,
    path: NodePath,
    _mode: PhantomData<M>,
}

/// A non-owning named reference to another node of the tree.
pub struct Link<M: AccessMode = ReadWrite> {
    backend: Arc<dyn StorageBackend>,
    path: NodePath,
    _mode: PhantomData<M>,
}

/// Any node of the tree.
pub enum Node<M: AccessMode = ReadWrite> {
    Directory(Directory<M>),
    File(File<M>),
    Link(Link<M>),
}

macro_rules! handle_common {
    ($ty:ident) => {
        impl<M: AccessMode> $ty<M> {
            pub(crate) fn at(backend: Arc<dyn StorageBackend>, path: NodePath) -> Self {
                Self {
                    backend,
                    path,
                    _mode: PhantomData,
                }
            }

            /// Re-tag the handle with another access mode.
            pub(crate) fn with_mode<N: AccessMode>(self) -> $ty<N> {
                $ty {
                    backend: self.backend,
                    path: self.path,
                    _mode: PhantomData,
                }
            }

            /// Wrap this handle so that every mutation through it is denied.
            pub fn into_read_only(self) -> $ty<ReadOnly> {
                self.with_mode()
            }

            /// Name of the node, empty for the root.
            pub fn name(&self) -> &str {
                self.path.name().map(NodeName::as_str).unwrap_or("")
            }

            /// Container-relative path of the node.
            pub fn path(&self) -> &NodePath {
                &self.path
            }

            /// The directory containing this node, `None` at the root.
            pub fn try_get_parent(&self) -> Option<Directory<M>> {
                self.path
                    .parent()
                    .map(|parent| Directory::at(self.backend.clone(), parent))
            }

            /// Move the node out of the container to an external location.
            pub fn move_to(&self, destination: &Path) -> StorageResult<()> {
                M::guard("move_to", &self.path)?;
                debug!(node = %self.path, destination = %destination.display(), "moving node out of container");
                self.backend.export(&self.path, destination)
            }
        }

        impl<M: AccessMode> Clone for $ty<M> {
            fn clone(&self) -> Self {
                Self::at(self.backend.clone(), self.path.clone())
            }
        }

        impl<M: AccessMode> fmt::Debug for $ty<M> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($ty))
                    .field("path", &self.path)
                    .field("mode", &M::MODE)
                    .finish()
            }
        }
    };
}

handle_common!(Directory);
handle_common!(File);
handle_common!(Link);

impl Directory<ReadWrite> {
    /// Root directory of a backend.
    pub fn root(backend: Arc<dyn StorageBackend>) -> Self {
        Self::at(backend, NodePath::root())
    }
}

impl<M: AccessMode> Directory<M> {
    fn child_path(&self, name: &str) -> StorageResult<NodePath> {
        Ok(self.path.join(&NodeName::new(name)?))
    }

    /// Look up a direct child by name.
    pub fn try_get_node(&self, name: &str) -> StorageResult<Option<Node<M>>> {
        let path = self.child_path(name)?;
        Node::load(&self.backend, path)
    }

    pub fn contains(&self, name: &str) -> StorageResult<bool> {
        let path = self.child_path(name)?;
        self.backend.exists(&path)
    }

    /// Look up a child directory, failing if it is missing or not a directory.
    pub fn get_directory(&self, name: &str) -> StorageResult<Directory<M>> {
        let path = self.child_path(name)?;
        match self.backend.kind(&path)? {
            Some(NodeKind::Directory) => Ok(Directory::at(self.backend.clone(), path)),
            Some(found) => Err(StorageError::UnexpectedNodeKind {
                path,
                expected: NodeKind::Directory,
                found,
            }),
            None => Err(StorageError::NodeNotFound(path)),
        }
    }

    /// Look up a child file, failing if it is missing or not a file.
    pub fn get_file(&self, name: &str) -> StorageResult<File<M>> {
        let path = self.child_path(name)?;
        match self.backend.kind(&path)? {
            Some(NodeKind::File) => Ok(File::at(self.backend.clone(), path)),
            Some(found) => Err(StorageError::UnexpectedNodeKind {
                path,
                expected: NodeKind::File,
                found,
            }),
            None => Err(StorageError::NodeNotFound(path)),
        }
    }

    /// Create the child directory `name`, or return it if it already exists.
    pub fn make_directory(&self, name: &str) -> StorageResult<Directory<M>> {
        M::guard("make_directory", &self.path)?;
        let path = self.child_path(name)?;
        self.backend.create_dir(&path)?;
        Ok(Directory::at(self.backend.clone(), path))
    }

    /// Materialize an external file or directory tree as a child.
    ///
    /// The child takes the source's file name unless `name` is given.
    /// With `move_source` the external source is consumed.
    pub fn add_file(
        &self,
        source: &Path,
        name: Option<&str>,
        move_source: bool,
    ) -> StorageResult<Node<M>> {
        M::guard("add_file", &self.path)?;
        let name = match name {
            Some(name) => name,
            None => source
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or(StorageError::InvalidName(InvalidNameError::Empty))?,
        };
        let path = self.child_path(name)?;
        debug!(source = %source.display(), node = %path, move_source, "adding external payload");
        self.backend.import(source, &path, move_source)?;
        Node::load(&self.backend, path.clone())?.ok_or(StorageError::NodeNotFound(path))
    }

    /// Create a small file holding `value` followed by a newline.
    pub fn add_key_value_pair(&self, key: &str, value: &str) -> StorageResult<File<M>> {
        M::guard("add_key_value_pair", &self.path)?;
        let path = self.child_path(key)?;
        if self.backend.exists(&path)? {
            return Err(StorageError::NodeAlreadyExists(path));
        }
        self.backend.write(&path, format!("{}\n", value).as_bytes())?;
        Ok(File::at(self.backend.clone(), path))
    }

    /// Create a link named `name` to `node`.
    ///
    /// Returns `None` if the backend cannot represent links.
    pub fn try_add_link(&self, name: &str, node: &Node<M>) -> StorageResult<Option<Link<M>>> {
        M::guard("try_add_link", &self.path)?;
        let path = self.child_path(name)?;
        if self.backend.exists(&path)? {
            return Err(StorageError::NodeAlreadyExists(path));
        }
        if !self.backend.create_link(&path, node.path())? {
            debug!(node = %path, "backend does not support links");
            return Ok(None);
        }
        Ok(Some(Link::at(self.backend.clone(), path)))
    }

    /// Detach and delete a direct child.
    pub fn remove_node(&self, node: &Node<M>) -> StorageResult<()> {
        M::guard("remove_node", &self.path)?;
        if node.path().parent().as_ref() != Some(&self.path) {
            return Err(StorageError::NodeNotFound(node.path().clone()));
        }
        debug!(node = %node.path(), "removing node");
        self.backend.delete(node.path())
    }

    /// Lazy, restartable iteration over the direct children.
    pub fn iter(&self) -> Children<M> {
        Children {
            dir: self.clone(),
            names: None,
            last: None,
        }
    }

    /// All directories below this one in pre-order.
    ///
    /// With `recursive == false` only direct children are listed.
    pub fn list_directories(&self, recursive: bool) -> StorageResult<NodeList<Directory<M>>> {
        let mut found = Vec::new();
        self.walk(recursive, &mut |node| {
            if let Node::Directory(dir) = node {
                found.push(dir);
            }
        })?;
        Ok(NodeList(found))
    }

    /// All files below this one in pre-order, optionally filtered by
    /// extension (case-insensitive, without the dot).
    pub fn list_files(
        &self,
        extension: Option<&str>,
        recursive: bool,
    ) -> StorageResult<NodeList<File<M>>> {
        let mut found = Vec::new();
        self.walk(recursive, &mut |node| {
            if let Node::File(file) = node {
                let matches = match (extension, file.path.name().and_then(NodeName::extension)) {
                    (None, _) => true,
                    (Some(wanted), Some(actual)) => wanted.eq_ignore_ascii_case(actual),
                    (Some(_), None) => false,
                };
                if matches {
                    found.push(file);
                }
            }
        })?;
        Ok(NodeList(found))
    }

    fn walk(&self, recursive: bool, visit: &mut dyn FnMut(Node<M>)) -> StorageResult<()> {
        for child in self.iter() {
            let child = child?;
            let subdir = if recursive { child.try_as_directory() } else { None };
            visit(child);
            if let Some(subdir) = subdir {
                subdir.walk(recursive, visit)?;
            }
        }
        Ok(())
    }
}

impl<'a, M: AccessMode> IntoIterator for &'a Directory<M> {
    type Item = StorageResult<Node<M>>;
    type IntoIter = Children<M>;

    fn into_iter(self) -> Children<M> {
        self.iter()
    }
}

impl<M: AccessMode> File<M> {
    pub fn read_bytes(&self) -> StorageResult<Vec<u8>> {
        self.backend.read(&self.path)
    }

    pub fn read_string(&self) -> StorageResult<String> {
        String::from_utf8(self.read_bytes()?).map_err(|_| StorageError::InvalidUtf8 {
            path: self.path.clone(),
        })
    }

    /// Content without the single trailing newline written by
    /// [`Directory::add_key_value_pair`].
    pub fn read_trimmed(&self) -> StorageResult<String> {
        let mut content = self.read_string()?;
        if content.ends_with('\n') {
            content.pop();
        }
        Ok(content)
    }
}

impl<M: AccessMode> Link<M> {
    /// Container path of the referenced node.
    pub fn target_path(&self) -> StorageResult<NodePath> {
        self.backend.read_link(&self.path)
    }

    /// The referenced node, `None` if it no longer exists.
    pub fn target(&self) -> StorageResult<Option<Node<M>>> {
        let target = self.target_path()?;
        Node::load(&self.backend, target)
    }
}

impl<M: AccessMode> Node<M> {
    pub(crate) fn load(
        backend: &Arc<dyn StorageBackend>,
        path: NodePath,
    ) -> StorageResult<Option<Node<M>>> {
        let node = match backend.kind(&path)? {
            Some(NodeKind::Directory) => Node::Directory(Directory::at(backend.clone(), path)),
            Some(NodeKind::File) => Node::File(File::at(backend.clone(), path)),
            Some(NodeKind::Link) => Node::Link(Link::at(backend.clone(), path)),
            None => return Ok(None),
        };
        Ok(Some(node))
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Node::Directory(_) => NodeKind::Directory,
            Node::File(_) => NodeKind::File,
            Node::Link(_) => NodeKind::Link,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Node::Directory(d) => d.name(),
            Node::File(f) => f.name(),
            Node::Link(l) => l.name(),
        }
    }

    pub fn path(&self) -> &NodePath {
        match self {
            Node::Directory(d) => d.path(),
            Node::File(f) => f.path(),
            Node::Link(l) => l.path(),
        }
    }

    pub fn try_get_parent(&self) -> Option<Directory<M>> {
        match self {
            Node::Directory(d) => d.try_get_parent(),
            Node::File(f) => f.try_get_parent(),
            Node::Link(l) => l.try_get_parent(),
        }
    }

    pub fn try_as_directory(&self) -> Option<Directory<M>> {
        match self {
            Node::Directory(d) => Some(d.clone()),
            _ => None,
        }
    }

    pub fn try_as_file(&self) -> Option<File<M>> {
        match self {
            Node::File(f) => Some(f.clone()),
            _ => None,
        }
    }

    pub fn try_as_link(&self) -> Option<Link<M>> {
        match self {
            Node::Link(l) => Some(l.clone()),
            _ => None,
        }
    }

    pub fn move_to(&self, destination: &Path) -> StorageResult<()> {
        match self {
            Node::Directory(d) => d.move_to(destination),
            Node::File(f) => f.move_to(destination),
            Node::Link(l) => l.move_to(destination),
        }
    }

    pub fn into_read_only(self) -> Node<ReadOnly> {
        match self {
            Node::Directory(d) => Node::Directory(d.into_read_only()),
            Node::File(f) => Node::File(f.into_read_only()),
            Node::Link(l) => Node::Link(l.into_read_only()),
        }
    }
}

impl<M: AccessMode> Clone for Node<M> {
    fn clone(&self) -> Self {
        match self {
            Node::Directory(d) => Node::Directory(d.clone()),
            Node::File(f) => Node::File(f.clone()),
            Node::Link(l) => Node::Link(l.clone()),
        }
    }
}

impl<M: AccessMode> fmt::Debug for Node<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Directory(d) => d.fmt(f),
            Node::File(file) => file.fmt(f),
            Node::Link(l) => l.fmt(f),
        }
    }
}

/// Iterator over the direct children of a directory.
///
/// Names are listed from the backend on the first call to `next`;
/// call [`Directory::iter`] again to start over.
pub struct Children<M: AccessMode> {
    dir: Directory<M>,
    names: Option<std::vec::IntoIter<NodeName>>,
    last: Option<NodePath>,
}

impl<M: AccessMode> Children<M> {
    /// Remove the child most recently returned by `next`.
    pub fn remove(&mut self) -> StorageResult<()> {
        M::guard("remove", &self.dir.path)?;
        let last = self
            .last
            .take()
            .ok_or_else(|| StorageError::NodeNotFound(self.dir.path.clone()))?;
        debug!(node = %last, "removing node through iterator");
        self.dir.backend.delete(&last)
    }
}

impl<M: AccessMode> Iterator for Children<M> {
    type Item = StorageResult<Node<M>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.names.is_none() {
            match self.dir.backend.list(&self.dir.path) {
                Ok(names) => self.names = Some(names.into_iter()),
                Err(e) => {
                    self.names = Some(Vec::new().into_iter());
                    return Some(Err(e));
                }
            }
        }
        let names = self.names.as_mut()?;
        for name in names.by_ref() {
            let path = self.dir.path.join(&name);
            match Node::load(&self.dir.backend, path.clone()) {
                Ok(Some(node)) => {
                    self.last = Some(path);
                    return Some(Ok(node));
                }
                // removed since listing
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
        None
    }
}

/// Unmodifiable, materialized list of nodes.
#[derive(Debug, Clone)]
pub struct NodeList<T>(Vec<T>);

impl<T> Deref for NodeList<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.0
    }
}

impl<T> IntoIterator for NodeList<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a NodeList<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
