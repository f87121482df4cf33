//! Payload formats and their typed parameters.
//!
//! A [`Format`] names the semantics of a container's payload. The
//! [`FormatRegistry`] maps a format code to [`FormatDescriptor`]s which
//! type the persisted parameters and build [`FormattedData`] views.
//! Codes nobody registered resolve to the built-in `UNKNOWN` format.

mod error;
mod parameter;
mod registry;
mod types;

pub use error::{FormatError, FormatResult};
pub use parameter::{
    DefaultParameterFactory, FormatParameter, FormatParameterFactory, FormatParameters,
    ParameterKind, ParameterValue, COMPUTE_FILE_CHECKSUMS,
};
pub use registry::{
    FormatDescriptor, FormatRegistry, FormattedData, NoFormattedData, ParameterSpec,
    SchemaFormat, UnknownFormat,
};
pub use types::{Format, Version};
