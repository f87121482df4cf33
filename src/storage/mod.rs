//! storage layer for BDS containers
//!
//! this module provides the node tree every container is built on. The upper
//! layers (container, handlers, formats) use this API and never touch a
//! backend directly.
//!
//!  # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Directory<M> / File<M> / Link<M>               │
//! │    (node tree: navigation, listing, payload, key-values)    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                   AccessMode guard (M)
//!                              │
//!                              ▼
//!                     ┌─────────────────┐
//!                     │ StorageBackend  │
//!                     └─────────────────┘
//!                        │            │
//!                        ▼            ▼
//!                ┌─────────────┐ ┌─────────────┐
//!                │ FileStorage │ │MemoryStorage│
//!                └─────────────┘ └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```
//! use std::sync::Arc;
//! use bds::storage::{Directory, MemoryStorage};
//!
//! let root = Directory::root(Arc::new(MemoryStorage::new()));
//! let metadata = root.make_directory("metadata").unwrap();
//! metadata.add_key_value_pair("answer", "42").unwrap();
//!
//! let read_only = root.into_read_only();
//! assert!(read_only.make_directory("other").is_err());
//! ```

pub mod access;
mod backend;
mod error;
mod memory;
mod node;
mod types;

// Re-export public API
pub use access::{AccessMode, Mode, ReadOnly, ReadWrite};
pub use backend::{FileStorage, StorageBackend};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryStorage;
pub use node::{Children, Directory, File, Link, Node, NodeList};
pub use types::{InvalidNameError, NodeKind, NodeName, NodePath};
