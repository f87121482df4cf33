//! References between standardized and original data.
//!
//! The reference set is keyed by the standard path; a second reference for
//! the same standard path is rejected. It is loaded from
//! `metadata/mapping` when a session opens and written back, as a JSON
//! array sorted by standard path, when a writable session closes.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{HandlerContext, HandlerError, HandlerResult, LifecycleHandler};
use crate::structure::layout;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReferenceType {
    /// the standard file is a copy of the original
    Identical,
    /// the standard file was derived from the original
    Transformed,
}

impl fmt::Display for ReferenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceType::Identical => write!(f, "IDENTICAL"),
            ReferenceType::Transformed => write!(f, "TRANSFORMED"),
        }
    }
}

/// Correspondence between a node below `data/standard/` and a node below
/// `data/original/`, both given relative to their directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference {
    path: String,
    original_path: String,
    reference_type: ReferenceType,
}

impl Reference {
    pub fn new(
        path: impl Into<String>,
        original_path: impl Into<String>,
        reference_type: ReferenceType,
    ) -> Self {
        Self {
            path: path.into(),
            original_path: original_path.into(),
            reference_type,
        }
    }

    /// Path below `data/standard/`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Path below `data/original/`.
    pub fn original_path(&self) -> &str {
        &self.original_path
    }

    pub fn reference_type(&self) -> ReferenceType {
        self.reference_type
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} ({})", self.path, self.original_path, self.reference_type)
    }
}

#[derive(Debug, Default)]
pub struct MappingHandler {
    references: BTreeMap<String, Reference>,
}

impl MappingHandler {
    pub fn add_reference(&mut self, reference: Reference) -> HandlerResult<()> {
        if self.references.contains_key(reference.path()) {
            return Err(HandlerError::DuplicateReference(reference.path));
        }
        self.references.insert(reference.path.clone(), reference);
        Ok(())
    }

    /// References keyed by standard path.
    pub fn references(&self) -> &BTreeMap<String, Reference> {
        &self.references
    }
}

impl LifecycleHandler for MappingHandler {
    fn name(&self) -> &str {
        "mapping"
    }

    fn on_open(&mut self, ctx: &HandlerContext<'_>) -> HandlerResult<()> {
        self.references.clear();
        let stored = layout::try_find(&ctx.root(), &[layout::METADATA, layout::MAPPING])?
            .and_then(|node| node.try_as_file());
        if let Some(file) = stored {
            let references: Vec<Reference> = serde_json::from_str(&file.read_string()?)?;
            for reference in references {
                self.add_reference(reference)?;
            }
        }
        debug!(count = self.references.len(), "loaded references");
        Ok(())
    }

    fn on_close(&mut self, ctx: &HandlerContext<'_>) -> HandlerResult<()> {
        let Some(root) = ctx.writable_root() else {
            return Ok(());
        };
        let references: Vec<&Reference> = self.references.values().collect();
        let metadata = root.make_directory(layout::METADATA)?;
        layout::replace_value(&metadata, layout::MAPPING, &serde_json::to_string_pretty(&references)?)?;
        debug!(count = references.len(), "saved references");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::FormatParameters;
    use crate::storage::{Directory, MemoryStorage};
    use std::sync::Arc;

    #[test]
    fn test_duplicate_reference_rejected() {
        let mut handler = MappingHandler::default();
        handler
            .add_reference(Reference::new("a", "orig/a", ReferenceType::Identical))
            .unwrap();
        let err = handler
            .add_reference(Reference::new("a", "orig/b", ReferenceType::Transformed))
            .unwrap_err();
        assert_eq!(err.to_string(), "there is already a reference for file 'a'");
        assert_eq!(handler.references()["a"].original_path(), "orig/a");
    }

    #[test]
    fn test_persisted_sorted_and_reloaded() {
        let root = Directory::root(Arc::new(MemoryStorage::new()));
        let parameters = FormatParameters::new();
        let ctx = HandlerContext::new(&root, &parameters, true);

        let mut handler = MappingHandler::default();
        handler.on_open(&ctx).unwrap();
        assert!(handler.references().is_empty());
        handler
            .add_reference(Reference::new("z.png", "z.tiff", ReferenceType::Transformed))
            .unwrap();
        handler
            .add_reference(Reference::new("a.tiff", "a.tiff", ReferenceType::Identical))
            .unwrap();
        handler.on_close(&ctx).unwrap();

        let raw = root
            .get_directory("metadata")
            .unwrap()
            .get_file("mapping")
            .unwrap()
            .read_string()
            .unwrap();
        assert!(raw.find("a.tiff").unwrap() < raw.find("z.png").unwrap());
        assert!(raw.contains("\"TRANSFORMED\""));

        let ro_ctx = HandlerContext::new(&root, &parameters, false);
        let mut reopened = MappingHandler::default();
        reopened.on_open(&ro_ctx).unwrap();
        assert_eq!(reopened.references().len(), 2);
        assert_eq!(
            reopened.references()["z.png"].reference_type(),
            ReferenceType::Transformed
        );
    }

    #[test]
    fn test_read_only_close_does_not_write() {
        let root = Directory::root(Arc::new(MemoryStorage::new()));
        let parameters = FormatParameters::new();
        let ctx = HandlerContext::new(&root, &parameters, false);
        let mut handler = MappingHandler::default();
        handler.on_open(&ctx).unwrap();
        handler
            .add_reference(Reference::new("a", "a", ReferenceType::Identical))
            .unwrap();
        handler.on_close(&ctx).unwrap();
        assert!(!root.contains("metadata").unwrap());
    }
}
