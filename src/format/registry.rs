//! Format descriptors and the registry that resolves them.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::format::error::{FormatError, FormatResult};
use crate::format::parameter::{
    DefaultParameterFactory, FormatParameter, FormatParameterFactory, FormatParameters,
    ParameterKind,
};
use crate::format::types::{Format, Version};
use crate::storage::{AccessMode, Directory, ReadOnly};

/// A view of the payload interpreted according to a format.
pub trait FormattedData: fmt::Debug {
    fn format(&self) -> &Format;

    fn parameters(&self) -> &FormatParameters;

    /// The `data/` directory; always read-only.
    fn data(&self) -> &Directory<ReadOnly>;
}

/// Describes one format version: how to type its parameters and how to
/// build a formatted-data view over a container.
pub trait FormatDescriptor: Send + Sync + fmt::Debug {
    fn format(&self) -> Format;

    fn parameter_factory(&self) -> &dyn FormatParameterFactory {
        &DefaultParameterFactory
    }

    fn create_formatted_data(
        &self,
        data: Directory<ReadOnly>,
        format: Format,
        parameters: FormatParameters,
    ) -> FormatResult<Box<dyn FormattedData>>;
}

/// Formatted data that only exposes what every container has.
#[derive(Debug)]
pub struct NoFormattedData {
    format: Format,
    parameters: FormatParameters,
    data: Directory<ReadOnly>,
}

impl NoFormattedData {
    pub fn new(data: Directory<ReadOnly>, format: Format, parameters: FormatParameters) -> Self {
        Self {
            format,
            parameters,
            data,
        }
    }
}

impl FormattedData for NoFormattedData {
    fn format(&self) -> &Format {
        &self.format
    }

    fn parameters(&self) -> &FormatParameters {
        &self.parameters
    }

    fn data(&self) -> &Directory<ReadOnly> {
        &self.data
    }
}

/// Fallback for codes nobody registered.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnknownFormat;

impl UnknownFormat {
    pub const CODE: &'static str = "UNKNOWN";
    pub const VERSION: Version = Version::new(1, 0);
}

impl FormatDescriptor for UnknownFormat {
    fn format(&self) -> Format {
        Format::new(Self::CODE, Self::VERSION)
    }

    fn create_formatted_data(
        &self,
        data: Directory<ReadOnly>,
        format: Format,
        parameters: FormatParameters,
    ) -> FormatResult<Box<dyn FormattedData>> {
        Ok(Box::new(NoFormattedData::new(data, format, parameters)))
    }
}

/// Declared parameter of a [`SchemaFormat`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSpec {
    pub name: String,
    pub kind: ParameterKind,
    pub mandatory: bool,
}

impl ParameterSpec {
    pub fn new(name: impl Into<String>, kind: ParameterKind) -> Self {
        Self {
            name: name.into(),
            kind,
            mandatory: false,
        }
    }

    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }
}

#[derive(Debug)]
struct SchemaParameterFactory {
    specs: Vec<ParameterSpec>,
}

impl FormatParameterFactory for SchemaParameterFactory {
    fn create(&self, name: &str, raw: &str) -> FormatResult<FormatParameter> {
        match self.specs.iter().find(|spec| spec.name == name) {
            Some(spec) => Ok(FormatParameter::new(name, spec.kind.parse(name, raw)?)),
            None => DefaultParameterFactory.create(name, raw),
        }
    }
}

/// Descriptor built from a format and a declared parameter schema.
///
/// Parameters are typed according to the schema; mandatory parameters are
/// checked when formatted data is created.
#[derive(Debug)]
pub struct SchemaFormat {
    format: Format,
    factory: SchemaParameterFactory,
}

impl SchemaFormat {
    pub fn new(format: Format, specs: Vec<ParameterSpec>) -> Self {
        Self {
            format,
            factory: SchemaParameterFactory { specs },
        }
    }

    pub fn specs(&self) -> &[ParameterSpec] {
        &self.factory.specs
    }
}

impl FormatDescriptor for SchemaFormat {
    fn format(&self) -> Format {
        self.format.clone()
    }

    fn parameter_factory(&self) -> &dyn FormatParameterFactory {
        &self.factory
    }

    fn create_formatted_data(
        &self,
        data: Directory<ReadOnly>,
        format: Format,
        parameters: FormatParameters,
    ) -> FormatResult<Box<dyn FormattedData>> {
        if let Some(missing) = self
            .specs()
            .iter()
            .find(|spec| spec.mandatory && !parameters.contains(&spec.name))
        {
            return Err(FormatError::MissingParameter {
                format: self.format.to_string(),
                name: missing.name.clone(),
            });
        }
        Ok(Box::new(NoFormattedData::new(data, format, parameters)))
    }
}

/// Registered format descriptors, keyed by code.
///
/// The built-in `UNKNOWN` format is always present.
#[derive(Debug, Clone)]
pub struct FormatRegistry {
    descriptors: BTreeMap<String, Vec<Arc<dyn FormatDescriptor>>>,
    unknown: Arc<dyn FormatDescriptor>,
}

impl Default for FormatRegistry {
    fn default() -> Self {
        let unknown: Arc<dyn FormatDescriptor> = Arc::new(UnknownFormat);
        let mut registry = Self {
            descriptors: BTreeMap::new(),
            unknown: unknown.clone(),
        };
        registry.register(unknown);
        registry
    }
}

impl FormatRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`FormatRegistry::register`].
    pub fn with(mut self, descriptor: impl FormatDescriptor + 'static) -> Self {
        self.register(Arc::new(descriptor));
        self
    }

    /// Register a descriptor; an earlier one for the same code and version
    /// is replaced.
    pub fn register(&mut self, descriptor: Arc<dyn FormatDescriptor>) {
        let format = descriptor.format();
        debug!(format = %format, "registering format");
        let versions = self.descriptors.entry(format.code().to_string()).or_default();
        versions.retain(|d| d.format().version() != format.version());
        versions.push(descriptor);
    }

    pub fn is_registered(&self, code: &str) -> bool {
        self.descriptors.contains_key(code)
    }

    /// Descriptor able to read data of `format`: same major version, highest
    /// minor version not above the persisted one. Unregistered codes resolve
    /// to `UNKNOWN`.
    pub fn resolve(&self, format: &Format) -> FormatResult<Arc<dyn FormatDescriptor>> {
        let Some(versions) = self.descriptors.get(format.code()) else {
            debug!(code = format.code(), "unregistered format code, using {}", UnknownFormat::CODE);
            return Ok(self.unknown.clone());
        };
        let wanted = format.version();
        versions
            .iter()
            .filter(|d| {
                let version = d.format().version();
                version.major == wanted.major && version.minor <= wanted.minor
            })
            .max_by_key(|d| d.format().version().minor)
            .cloned()
            .ok_or_else(|| FormatError::NoCompatibleFormat {
                code: format.code().to_string(),
                version: wanted,
            })
    }

    /// Descriptor whose factory types the parameters of `format`; `None`
    /// means the default factory.
    fn parameter_descriptor(&self, format: Option<&Format>) -> Option<Arc<dyn FormatDescriptor>> {
        match self.resolve(format?) {
            Ok(descriptor) => Some(descriptor),
            Err(e) => {
                warn!(error = %e, "falling back to default parameter factory");
                None
            }
        }
    }

    /// Type a raw parameter value the way it will be typed when reloaded.
    pub fn create_parameter(
        &self,
        format: Option<&Format>,
        name: &str,
        raw: &str,
    ) -> FormatResult<FormatParameter> {
        match self.parameter_descriptor(format) {
            Some(descriptor) => descriptor.parameter_factory().create(name, raw),
            None => DefaultParameterFactory.create(name, raw),
        }
    }

    /// Load persisted parameters with the factory of the format's descriptor.
    ///
    /// Without a format, or when no descriptor is compatible, the default
    /// factory is used.
    pub fn load_parameters(
        &self,
        format: Option<&Format>,
        dir: &Directory<impl AccessMode>,
    ) -> FormatResult<FormatParameters> {
        match self.parameter_descriptor(format) {
            Some(descriptor) => FormatParameters::load_from(dir, descriptor.parameter_factory()),
            None => FormatParameters::load_from(dir, &DefaultParameterFactory),
        }
    }

    pub fn create_formatted_data(
        &self,
        data: Directory<ReadOnly>,
        format: &Format,
        parameters: FormatParameters,
    ) -> FormatResult<Box<dyn FormattedData>> {
        self.resolve(format)?
            .create_formatted_data(data, format.clone(), parameters)
    }
}
