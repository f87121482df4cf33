//! Format error types.

use thiserror::Error;

use crate::format::types::Version;
use crate::storage::{NodePath, StorageError};

/// Result type for format operations.
pub type FormatResult<T> = Result<T, FormatError>;

/// Errors that can occur while resolving formats and parameters.
#[derive(Debug, Error)]
pub enum FormatError {
    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A parameter with this name is already set.
    #[error("there is already a parameter with name '{0}'")]
    DuplicateParameter(String),

    /// A raw value does not parse as the declared kind.
    #[error("invalid value '{value}' for parameter '{name}': {reason}")]
    InvalidParameterValue {
        name: String,
        value: String,
        reason: String,
    },

    /// A parameter required by the format is missing.
    #[error("format {format} requires parameter '{name}'")]
    MissingParameter { format: String, name: String },

    /// The code is registered, but no registered version can read the data.
    #[error("no format '{code}' registered that is compatible with version {version}")]
    NoCompatibleFormat { code: String, version: Version },

    /// Something other than a plain file was found in the parameter directory.
    #[error("unsupported node in parameter directory: {0}")]
    UnsupportedParameterNode(NodePath),
}
