//! Container error types.

use std::fmt;

use thiserror::Error;

use crate::format::{Format, FormatError, Version};
use crate::handler::HandlerError;
use crate::storage::StorageError;
use crate::structure::data_structure::State;

/// Result type for container operations.
pub type DataStructureResult<T> = Result<T, DataStructureError>;

/// Items every valid container must have, in validation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MandatoryItem {
    Format,
    ExperimentIdentifier,
    ExperimentRegistrationTimestamp,
    ExperimentRegistrator,
    Sample,
    DataSet,
}

impl MandatoryItem {
    pub const ALL: [MandatoryItem; 6] = [
        MandatoryItem::Format,
        MandatoryItem::ExperimentIdentifier,
        MandatoryItem::ExperimentRegistrationTimestamp,
        MandatoryItem::ExperimentRegistrator,
        MandatoryItem::Sample,
        MandatoryItem::DataSet,
    ];
}

impl fmt::Display for MandatoryItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MandatoryItem::Format => "format",
            MandatoryItem::ExperimentIdentifier => "experiment identifier",
            MandatoryItem::ExperimentRegistrationTimestamp => "experiment registration timestamp",
            MandatoryItem::ExperimentRegistrator => "experiment registrator",
            MandatoryItem::Sample => "sample",
            MandatoryItem::DataSet => "data set",
        };
        write!(f, "{}", name)
    }
}

/// Errors that can occur while working with a container.
#[derive(Debug, Error)]
pub enum DataStructureError {
    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Format resolution error.
    #[error("format error: {0}")]
    Format(#[source] FormatError),

    /// A lifecycle handler failed.
    #[error("handler failed: {0}")]
    HandlerFailed(#[source] HandlerError),

    /// Structural validation: a mandatory item is not set.
    #[error("unspecified {0}")]
    MissingMandatory(MandatoryItem),

    /// Structural validation: the annotations reject the formatted data.
    #[error("invalid annotations: {0}")]
    InvalidAnnotations(String),

    /// Setter called through a read-only handle.
    #[error("cannot {operation}: data structure is opened read-only")]
    AccessDenied { operation: &'static str },

    #[error("there is already a parameter with name '{0}'")]
    DuplicateParameter(String),

    #[error("there is already a reference for file '{0}'")]
    DuplicateReference(String),

    #[error("couldn't create formatted data because of unspecified format")]
    FormatNotSet,

    /// The stored format cannot be replaced by a different one.
    #[error("format {persisted} is already persisted and cannot be changed to {requested}")]
    FormatAlreadyPersisted { persisted: Format, requested: Format },

    #[error("metadata '{0}' is not set")]
    MetadataNotSet(&'static str),

    #[error("storage does not contain a data structure version")]
    VersionMissing,

    #[error("version of loaded data structure is {loaded} which is not backward compatible with {expected}")]
    IncompatibleVersion { loaded: Version, expected: Version },

    #[error("storage already contains a data structure")]
    AlreadyExists,

    /// Operation not allowed in the current lifecycle state.
    #[error("cannot {operation} a data structure in state {state}")]
    InvalidState { operation: &'static str, state: State },
}

impl From<FormatError> for DataStructureError {
    fn from(err: FormatError) -> Self {
        match err {
            FormatError::DuplicateParameter(name) => DataStructureError::DuplicateParameter(name),
            FormatError::Storage(e) => DataStructureError::Storage(e),
            other => DataStructureError::Format(other),
        }
    }
}

impl From<HandlerError> for DataStructureError {
    fn from(err: HandlerError) -> Self {
        match err {
            HandlerError::DuplicateReference(path) => DataStructureError::DuplicateReference(path),
            other => DataStructureError::HandlerFailed(other),
        }
    }
}

impl DataStructureError {
    /// Check if this error reports an incomplete or inconsistent container.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            DataStructureError::MissingMandatory(_) | DataStructureError::InvalidAnnotations(_)
        )
    }

    /// Check if a mutation was refused because of the access mode.
    pub fn is_access_denied(&self) -> bool {
        match self {
            DataStructureError::AccessDenied { .. } => true,
            DataStructureError::Storage(e) => e.is_access_denied(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let err = DataStructureError::IncompatibleVersion {
            loaded: Version::new(2, 0),
            expected: Version::new(1, 0),
        };
        assert_eq!(
            err.to_string(),
            "version of loaded data structure is V2.0 which is not backward compatible with V1.0"
        );
        assert_eq!(
            DataStructureError::MissingMandatory(MandatoryItem::ExperimentRegistrator).to_string(),
            "unspecified experiment registrator"
        );
    }

    #[test]
    fn test_conversions() {
        let err: DataStructureError = FormatError::DuplicateParameter("p".into()).into();
        assert!(matches!(err, DataStructureError::DuplicateParameter(_)));
        let err: DataStructureError = HandlerError::DuplicateReference("a".into()).into();
        assert_eq!(err.to_string(), "there is already a reference for file 'a'");
        assert!(DataStructureError::MissingMandatory(MandatoryItem::Sample).is_structural());
        assert!(DataStructureError::AccessDenied { operation: "set sample" }.is_access_denied());
    }
}
