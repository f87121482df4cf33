//! BDS - a versioned, self-describing container for one data set.
//!
//! A container keeps the untouched original payload, its standardized
//! representation and the metadata describing both in a fixed directory
//! layout on a pluggable storage backend. Every session fixes its access
//! mode in the type of the handle it returns, and nothing reachable from a
//! read-only handle can be mutated.
//!
//! # Example
//!
//! ```no_run
//! use bds::structure::{DataStructure, DataStructureConfig};
//!
//! let handle = DataStructure::on_filesystem("./plate-42", DataStructureConfig::new())
//!     .unwrap()
//!     .open_read_only(true)
//!     .unwrap();
//! println!("{:?}", handle.format());
//! handle.close().unwrap();
//! ```

pub mod format;
pub mod handler;
pub mod metadata;
pub mod storage;
pub mod structure;
