//! Annotations attached to the standardized data.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::format::FormattedData;
use crate::storage::{AccessMode, Directory, StorageResult};
use crate::structure::layout;

/// Format-specific annotations of a container.
///
/// They are validated against the formatted data by
/// `assert_valid` and persisted under `annotations/` when a writable
/// session closes.
pub trait Annotations: fmt::Debug + Send {
    /// Reason why the annotations don't fit `data`.
    fn assert_valid(&self, data: &dyn FormattedData) -> Result<(), String>;

    fn save_to(&self, dir: &Directory) -> StorageResult<()>;
}

/// Free-text annotations of individual standard files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAnnotations {
    entries: BTreeMap<String, String>,
}

impl FileAnnotations {
    const NAME: &'static str = "files";

    pub fn new() -> Self {
        Self::default()
    }

    /// Annotate the file at `path` below `data/standard/`.
    pub fn annotate(mut self, path: impl Into<String>, text: impl Into<String>) -> Self {
        self.entries.insert(path.into(), text.into());
        self
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.entries.get(path).map(String::as_str)
    }

    /// Annotations saved by [`Annotations::save_to`], `None` if absent.
    pub fn load_from<M: AccessMode>(dir: &Directory<M>) -> StorageResult<Option<Self>> {
        match dir.try_get_node(Self::NAME)?.and_then(|n| n.try_as_file()) {
            Some(file) => Ok(Some(serde_json::from_str(&file.read_string()?)?)),
            None => Ok(None),
        }
    }
}

impl Annotations for FileAnnotations {
    fn assert_valid(&self, data: &dyn FormattedData) -> Result<(), String> {
        let standard = layout::try_find(data.data(), &[layout::STANDARD])
            .map_err(|e| e.to_string())?
            .and_then(|node| node.try_as_directory());
        for path in self.entries.keys() {
            let names: Vec<&str> = path.split('/').collect();
            let found = match &standard {
                Some(dir) => layout::try_find(dir, &names).map_err(|e| e.to_string())?,
                None => None,
            };
            if found.is_none() {
                return Err(format!("annotated file '{}' does not exist", path));
            }
        }
        Ok(())
    }

    fn save_to(&self, dir: &Directory) -> StorageResult<()> {
        layout::replace_value(dir, Self::NAME, &serde_json::to_string_pretty(self)?)
    }
}
