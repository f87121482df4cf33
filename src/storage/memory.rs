use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use crate::storage::backend::{remove_tree, StorageBackend};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{NodeKind, NodeName, NodePath};

#[derive(Debug, Clone)]
enum Entry {
    Directory,
    File(Vec<u8>),
    Link(NodePath),
}

impl Entry {
    fn kind(&self) -> NodeKind {
        match self {
            Entry::Directory => NodeKind::Directory,
            Entry::File(_) => NodeKind::File,
            Entry::Link(_) => NodeKind::Link,
        }
    }
}

/// In-memory, map-based storage backend.
///
/// Intended for tests and for building containers that are exported later.
/// Entries are keyed by path; the root is implicit.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RwLock<BTreeMap<NodePath, Entry>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored nodes, the root excluded.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn kind_in(entries: &BTreeMap<NodePath, Entry>, path: &NodePath) -> Option<NodeKind> {
        if path.is_root() {
            return Some(NodeKind::Directory);
        }
        entries.get(path).map(Entry::kind)
    }

    fn require_parent(entries: &BTreeMap<NodePath, Entry>, path: &NodePath) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            match Self::kind_in(entries, &parent) {
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

    /// read an external file or tree into `entries`
    fn load_external(
        entries: &mut BTreeMap<NodePath, Entry>,
        source: &Path,
        dest: &NodePath,
    ) -> StorageResult<()> {
        if fs::symlink_metadata(source)?.is_dir() {
            entries.insert(dest.clone(), Entry::Directory);
            for entry in fs::read_dir(source)? {
                let entry = entry?;
                let file_name = entry.file_name();
                let name = file_name.to_str().ok_or_else(|| StorageError::CorruptedData {
                    path: dest.clone(),
                    reason: format!("non utf-8 entry name {:?}", file_name),
                })?;
                Self::load_external(entries, &entry.path(), &dest.join(&NodeName::new(name)?))?;
            }
        } else {
            entries.insert(dest.clone(), Entry::File(fs::read(source)?));
        }
        Ok(())
    }

    /// Lay out the export of `path` at `destination` without touching the
    /// filesystem. Links are exported as copies of their target; a link to
    /// a node enclosing the export position is a cycle.
    fn plan_export<'a>(
        entries: &'a BTreeMap<NodePath, Entry>,
        path: &NodePath,
        destination: PathBuf,
        enclosing: &mut Vec<NodePath>,
        plan: &mut Vec<Export<'a>>,
    ) -> StorageResult<()> {
        match entries.get(path) {
            Some(Entry::Directory) => {
                plan.push(Export::Directory(destination.clone()));
                enclosing.push(path.clone());
                for child in entries.keys().filter(|p| p.parent().as_ref() == Some(path)) {
                    if let Some(name) = child.name() {
                        Self::plan_export(entries, child, destination.join(name.as_str()), enclosing, plan)?;
                    }
                }
                enclosing.pop();
            }
            Some(Entry::File(bytes)) => plan.push(Export::File(destination, bytes)),
            Some(Entry::Link(target)) => {
                if enclosing.iter().any(|p| p.starts_with(target)) {
                    return Err(StorageError::CorruptedData {
                        path: path.clone(),
                        reason: format!("link to {} forms a cycle", target),
                    });
                }
                Self::plan_export(entries, target, destination, enclosing, plan)?;
            }
            None => return Err(StorageError::NodeNotFound(path.clone())),
        }
        Ok(())
    }
}

enum Export<'a> {
    Directory(PathBuf),
    File(PathBuf, &'a [u8]),
}

impl StorageBackend for MemoryStorage {
    fn kind(&self, path: &NodePath) -> StorageResult<Option<NodeKind>> {
        Ok(Self::kind_in(&self.entries.read(), path))
    }

    fn list(&self, dir: &NodePath) -> StorageResult<Vec<NodeName>> {
        let entries = self.entries.read();
        match Self::kind_in(&entries, dir) {
            Some(NodeKind::Directory) => {}
            Some(found) => {
                return Err(StorageError::UnexpectedNodeKind {
                    path: dir.clone(),
                    expected: NodeKind::Directory,
                    found,
                })
            }
            None => return Err(StorageError::NodeNotFound(dir.clone())),
        }
        // BTreeMap order keeps siblings sorted by name
        Ok(entries
            .keys()
            .filter(|p| p.depth() == dir.depth() + 1 && p.starts_with(dir))
            .filter_map(|p| p.name().cloned())
            .collect())
    }

    fn create_dir(&self, path: &NodePath) -> StorageResult<()> {
        let mut entries = self.entries.write();
        match Self::kind_in(&entries, path) {
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
        Self::require_parent(&entries, path)?;
        entries.insert(path.clone(), Entry::Directory);
        Ok(())
    }

    fn read(&self, path: &NodePath) -> StorageResult<Vec<u8>> {
        let entries = self.entries.read();
        match entries.get(path) {
            Some(Entry::File(bytes)) => Ok(bytes.clone()),
            Some(other) => Err(StorageError::UnexpectedNodeKind {
                path: path.clone(),
                expected: NodeKind::File,
                found: other.kind(),
            }),
            None => Err(StorageError::NodeNotFound(path.clone())),
        }
    }

    fn write(&self, path: &NodePath, bytes: &[u8]) -> StorageResult<()> {
        let mut entries = self.entries.write();
        Self::require_parent(&entries, path)?;
        if let Some(Entry::Directory) = entries.get(path) {
            return Err(StorageError::UnexpectedNodeKind {
                path: path.clone(),
                expected: NodeKind::File,
                found: NodeKind::Directory,
            });
        }
        entries.insert(path.clone(), Entry::File(bytes.to_vec()));
        Ok(())
    }

    fn create_link(&self, path: &NodePath, target: &NodePath) -> StorageResult<bool> {
        let mut entries = self.entries.write();
        Self::require_parent(&entries, path)?;
        if entries.contains_key(path) {
            return Err(StorageError::NodeAlreadyExists(path.clone()));
        }
        entries.insert(path.clone(), Entry::Link(target.clone()));
        Ok(true)
    }

    fn read_link(&self, path: &NodePath) -> StorageResult<NodePath> {
        let entries = self.entries.read();
        match entries.get(path) {
            Some(Entry::Link(target)) => Ok(target.clone()),
            Some(other) => Err(StorageError::UnexpectedNodeKind {
                path: path.clone(),
                expected: NodeKind::Link,
                found: other.kind(),
            }),
            None => Err(StorageError::NodeNotFound(path.clone())),
        }
    }

    fn delete(&self, path: &NodePath) -> StorageResult<()> {
        let mut entries = self.entries.write();
        if entries.remove(path).is_none() {
            return Err(StorageError::NodeNotFound(path.clone()));
        }
        entries.retain(|p, _| !p.starts_with(path));
        Ok(())
    }

    fn import(&self, source: &Path, dest: &NodePath, move_source: bool) -> StorageResult<()> {
        if fs::symlink_metadata(source).is_err() {
            return Err(StorageError::ExternalSourceMissing(source.to_path_buf()));
        }
        let mut entries = self.entries.write();
        if Self::kind_in(&entries, dest).is_some() {
            return Err(StorageError::NodeAlreadyExists(dest.clone()));
        }
        Self::require_parent(&entries, dest)?;

        let mut loaded = BTreeMap::new();
        Self::load_external(&mut loaded, source, dest)?;
        entries.extend(loaded);
        drop(entries);

        if move_source {
            remove_tree(source)?;
        }
        Ok(())
    }

    fn export(&self, path: &NodePath, destination: &Path) -> StorageResult<()> {
        {
            let entries = self.entries.read();
            let mut plan = Vec::new();
            Self::plan_export(&entries, path, destination.to_path_buf(), &mut Vec::new(), &mut plan)?;
            for step in plan {
                match step {
                    Export::Directory(dir) => fs::create_dir(dir)?,
                    Export::File(file, bytes) => fs::write(file, bytes)?,
                }
            }
        }
        self.delete(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn path(p: &str) -> NodePath {
        NodePath::parse(p).unwrap()
    }

    #[test]
    fn test_list_is_sorted_and_shallow() {
        let storage = MemoryStorage::new();
        storage.create_dir(&path("data")).unwrap();
        storage.create_dir(&path("data/original")).unwrap();
        storage.write(&path("data/original/x"), b"").unwrap();
        storage.write(&path("data/b"), b"").unwrap();

        let names: Vec<String> = storage
            .list(&path("data"))
            .unwrap()
            .into_iter()
            .map(|n| n.to_string())
            .collect();
        assert_eq!(names, vec!["b", "original"]);
    }

    #[test]
    fn test_delete_is_recursive() {
        let storage = MemoryStorage::new();
        storage.create_dir(&path("a")).unwrap();
        storage.create_dir(&path("a/b")).unwrap();
        storage.write(&path("a/b/c"), b"x").unwrap();
        storage.write(&path("ab"), b"sibling").unwrap();

        storage.delete(&path("a")).unwrap();
        assert_eq!(storage.len(), 1);
        assert!(storage.exists(&path("ab")).unwrap());
    }

    #[test]
    fn test_read_wrong_kind() {
        let storage = MemoryStorage::new();
        storage.create_dir(&path("dir")).unwrap();
        assert!(matches!(
            storage.read(&path("dir")),
            Err(StorageError::UnexpectedNodeKind { .. })
        ));
        assert!(matches!(
            storage.read(&path("none")),
            Err(StorageError::NodeNotFound(_))
        ));
    }

    #[test]
    fn test_import_export_round_trip() {
        let dir = TempDir::new().unwrap();
        let external = dir.path().join("plate");
        fs::create_dir(&external).unwrap();
        fs::write(external.join("well_a1"), b"a1").unwrap();

        let storage = MemoryStorage::new();
        storage.import(&external, &path("plate"), true).unwrap();
        assert!(!external.exists());
        assert_eq!(storage.read(&path("plate/well_a1")).unwrap(), b"a1");

        let out = dir.path().join("out");
        storage.export(&path("plate"), &out).unwrap();
        assert_eq!(fs::read(out.join("well_a1")).unwrap(), b"a1");
        assert!(storage.is_empty());
    }

    #[test]
    fn test_export_copies_link_targets() {
        let dir = TempDir::new().unwrap();
        let storage = MemoryStorage::new();
        storage.write(&path("shared"), b"payload").unwrap();
        storage.create_dir(&path("plate")).unwrap();
        storage.create_link(&path("plate/alias"), &path("shared")).unwrap();

        let out = dir.path().join("plate");
        storage.export(&path("plate"), &out).unwrap();
        assert_eq!(fs::read(out.join("alias")).unwrap(), b"payload");
        assert!(storage.exists(&path("shared")).unwrap());
    }

    #[test]
    fn test_export_rejects_link_cycles() {
        let dir = TempDir::new().unwrap();
        let storage = MemoryStorage::new();
        storage.create_dir(&path("a")).unwrap();
        storage.create_dir(&path("a/b")).unwrap();
        storage.write(&path("a/b/file"), b"x").unwrap();
        storage.create_link(&path("a/b/loop"), &path("a")).unwrap();

        let out = dir.path().join("a");
        let err = storage.export(&path("a"), &out).unwrap_err();
        assert!(matches!(err, StorageError::CorruptedData { .. }));
        assert!(!out.exists());
        assert_eq!(storage.read(&path("a/b/file")).unwrap(), b"x");
    }

    #[test]
    fn test_links_are_not_followed_on_delete() {
        let storage = MemoryStorage::new();
        storage.write(&path("target"), b"payload").unwrap();
        storage.create_link(&path("alias"), &path("target")).unwrap();
        assert_eq!(storage.read_link(&path("alias")).unwrap(), path("target"));
        storage.delete(&path("alias")).unwrap();
        assert_eq!(storage.read(&path("target")).unwrap(), b"payload");
    }
}
