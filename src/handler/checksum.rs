//! Checksums of the original payload.
//!
//! Records are `md5sum`-style lines, `"<sha256 hex>  <path>"`, with paths
//! relative to `data/original/`, in pre-order. They are written to
//! `metadata/checksums/original` when the creation session is closed, so
//! files added after `create()` are covered. Reopening never recomputes.

use std::fmt;

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::{HandlerContext, HandlerResult, LifecycleHandler};
use crate::storage::{AccessMode, Directory, StorageError};
use crate::structure::layout;

/// Checksum of one original file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumRecord {
    pub path: String,
    pub digest: String,
}

impl fmt::Display for ChecksumRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}  {}", self.digest, self.path)
    }
}

/// Difference between stored checksums and the current payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChecksumMismatch {
    /// content differs from the recorded checksum
    Modified(String),
    /// recorded, but no longer present
    Missing(String),
    /// present, but never recorded
    Unexpected(String),
}

impl fmt::Display for ChecksumMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChecksumMismatch::Modified(path) => write!(f, "modified: {}", path),
            ChecksumMismatch::Missing(path) => write!(f, "missing: {}", path),
            ChecksumMismatch::Unexpected(path) => write!(f, "unexpected: {}", path),
        }
    }
}

#[derive(Debug, Default)]
pub struct ChecksumHandler {
    creating: bool,
}

impl ChecksumHandler {
    /// Checksum every file below `original`, in pre-order.
    pub fn compute_records<M: AccessMode>(
        original: &Directory<M>,
    ) -> HandlerResult<Vec<ChecksumRecord>> {
        let mut records = Vec::new();
        for file in original.list_files(None, true)? {
            let path = file
                .path()
                .relative_to(original.path())
                .ok_or_else(|| StorageError::NodeNotFound(file.path().clone()))?;
            let digest = hex::encode(Sha256::digest(file.read_bytes()?));
            records.push(ChecksumRecord { path, digest });
        }
        Ok(records)
    }

    /// One line per record.
    pub fn render(records: &[ChecksumRecord]) -> String {
        records
            .iter()
            .map(ChecksumRecord::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn parse(content: &str) -> Result<Vec<ChecksumRecord>, String> {
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                line.split_once("  ")
                    .map(|(digest, path)| ChecksumRecord {
                        path: path.to_string(),
                        digest: digest.to_string(),
                    })
                    .ok_or_else(|| format!("malformed checksum record '{}'", line))
            })
            .collect()
    }

    /// Stored records of a container, `None` if checksums were never written.
    pub fn load<M: AccessMode>(root: &Directory<M>) -> HandlerResult<Option<Vec<ChecksumRecord>>> {
        let Some(node) = layout::try_find(root, &[layout::METADATA, layout::CHECKSUMS, layout::ORIGINAL])? else {
            return Ok(None);
        };
        let Some(file) = node.try_as_file() else {
            return Ok(None);
        };
        let records = Self::parse(&file.read_string()?).map_err(|reason| StorageError::CorruptedData {
            path: file.path().clone(),
            reason,
        })?;
        Ok(Some(records))
    }

    /// Recompute the checksums of `data/original/` and compare them with the
    /// stored records.
    pub fn verify<M: AccessMode>(root: &Directory<M>) -> HandlerResult<Vec<ChecksumMismatch>> {
        let stored = Self::load(root)?.unwrap_or_default();
        let current = match layout::try_find(root, &[layout::DATA, layout::ORIGINAL])?
            .and_then(|node| node.try_as_directory())
        {
            Some(original) => Self::compute_records(&original)?,
            None => Vec::new(),
        };

        let mut mismatches = Vec::new();
        for record in &stored {
            match current.iter().find(|c| c.path == record.path) {
                Some(c) if c.digest != record.digest => {
                    mismatches.push(ChecksumMismatch::Modified(record.path.clone()))
                }
                Some(_) => {}
                None => mismatches.push(ChecksumMismatch::Missing(record.path.clone())),
            }
        }
        for record in &current {
            if !stored.iter().any(|s| s.path == record.path) {
                mismatches.push(ChecksumMismatch::Unexpected(record.path.clone()));
            }
        }
        Ok(mismatches)
    }
}

impl LifecycleHandler for ChecksumHandler {
    fn name(&self) -> &str {
        "checksum"
    }

    fn on_create(&mut self, _ctx: &HandlerContext<'_>) -> HandlerResult<()> {
        self.creating = true;
        Ok(())
    }

    fn on_close(&mut self, ctx: &HandlerContext<'_>) -> HandlerResult<()> {
        let creating = std::mem::take(&mut self.creating);
        let Some(root) = ctx.writable_root() else {
            return Ok(());
        };
        if !creating {
            return Ok(());
        }
        if !ctx.parameters().compute_file_checksums() {
            debug!("checksum computation switched off");
            return Ok(());
        }
        let original = root.make_directory(layout::DATA)?.make_directory(layout::ORIGINAL)?;
        let records = Self::compute_records(&original)?;
        let checksums = root
            .make_directory(layout::METADATA)?
            .make_directory(layout::CHECKSUMS)?;
        layout::replace_value(&checksums, layout::ORIGINAL, &Self::render(&records))?;
        info!(files = records.len(), "wrote checksums of original data");
        Ok(())
    }
}
