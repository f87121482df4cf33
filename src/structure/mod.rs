//! The BDS container.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use bds::format::{Format, Version};
//! use bds::storage::MemoryStorage;
//! use bds::structure::{DataStructure, DataStructureConfig};
//!
//! let storage = Arc::new(MemoryStorage::new());
//! let mut handle = DataStructure::new(storage.clone(), DataStructureConfig::new())
//!     .create()
//!     .unwrap();
//! handle.set_format(Format::new("tiff-stack", Version::new(1, 0))).unwrap();
//! handle.close().unwrap();
//!
//! let mut handle = DataStructure::new(storage, DataStructureConfig::new())
//!     .open_read_only(false)
//!     .unwrap();
//! assert_eq!(handle.format().unwrap().code(), "tiff-stack");
//! assert!(handle.set_format(Format::new("other", Version::new(1, 0))).is_err());
//! handle.close().unwrap();
//! ```

mod annotations;
mod config;
mod data_structure;
mod error;
mod handle;
pub mod layout;

pub use annotations::{Annotations, FileAnnotations};
pub use config::DataStructureConfig;
pub use data_structure::{DataStructure, State};
pub use error::{DataStructureError, DataStructureResult, MandatoryItem};
pub use handle::{DataStructureHandle, ReadOnlyHandle, WriteHandle};
