//! The container core.
//!
//! `DataStructure` owns the lifecycle state machine:
//!
//! ```text
//! Uninitialized --create()--> Creating --on_create/on_open--> Open(read-write)
//! Uninitialized --open(mode)--> on_open [--assert_valid] --> Open(mode)
//! Open --close()--> on_close --> Closed
//! ```
//!
//! The core does not check the access mode of setters; that is the job of
//! [`DataStructureHandle`], which every public entry point returns. The
//! stored mode only decides whether layout directories are created on
//! demand and whether closing flushes.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::format::{
    Format, FormatParameter, FormatParameters, FormatRegistry, FormattedData, Version,
};
use crate::handler::{ChecksumHandler, ChecksumMismatch, HandlerChain, HandlerContext, Reference};
use crate::metadata::{
    DataSet, ExperimentIdentifier, ExperimentRegistrationTimestamp, ExperimentRegistrator,
    MetadataNode, Sample,
};
use crate::storage::{AccessMode, Directory, FileStorage, Mode, ReadOnly, StorageBackend};
use crate::structure::annotations::Annotations;
use crate::structure::config::DataStructureConfig;
use crate::structure::error::{DataStructureError, DataStructureResult, MandatoryItem};
use crate::structure::handle::{DataStructureHandle, ReadOnlyHandle, WriteHandle};
use crate::structure::layout;

/// Lifecycle state of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Uninitialized,
    Creating,
    Open(Mode),
    Closed,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Uninitialized => write!(f, "uninitialized"),
            State::Creating => write!(f, "creating"),
            State::Open(mode) => write!(f, "open ({})", mode),
            State::Closed => write!(f, "closed"),
        }
    }
}

/// A BDS container on a storage backend.
#[derive(Debug)]
pub struct DataStructure {
    root: Directory,
    state: State,
    mode: Mode,
    expected_version: Version,
    version: Option<Version>,
    format: Option<Format>,
    format_persisted: bool,
    parameters: FormatParameters,
    annotations: Option<Box<dyn Annotations>>,
    handlers: HandlerChain,
    registry: Arc<FormatRegistry>,
}

impl DataStructure {
    pub fn new(backend: Arc<dyn StorageBackend>, config: DataStructureConfig) -> Self {
        Self {
            root: Directory::root(backend),
            state: State::Uninitialized,
            mode: Mode::ReadOnly,
            expected_version: config.version,
            version: None,
            format: None,
            format_persisted: false,
            parameters: FormatParameters::new(),
            annotations: None,
            handlers: HandlerChain::new(config.handlers),
            registry: config.registry,
        }
    }

    /// Container stored in a directory of the local filesystem.
    pub fn on_filesystem(
        path: impl AsRef<Path>,
        config: DataStructureConfig,
    ) -> DataStructureResult<Self> {
        let storage = FileStorage::open(path)?;
        Ok(Self::new(Arc::new(storage), config))
    }

    /// Initialize a new container and open it for writing.
    pub fn create(self) -> DataStructureResult<WriteHandle> {
        self.create_with_parameters(FormatParameters::new())
    }

    /// Like [`DataStructure::create`], with format parameters known before
    /// the creation handlers run.
    pub fn create_with_parameters(
        mut self,
        parameters: FormatParameters,
    ) -> DataStructureResult<WriteHandle> {
        self.do_create(parameters)?;
        Ok(DataStructureHandle::new(self))
    }

    pub fn open_read_only(self, validate: bool) -> DataStructureResult<ReadOnlyHandle> {
        self.open(validate)
    }

    pub fn open_read_write(self, validate: bool) -> DataStructureResult<WriteHandle> {
        self.open(validate)
    }

    /// Open an existing container with the access mode `M`.
    ///
    /// With `validate`, a container failing [`DataStructure::assert_valid`]
    /// is closed again and the validation error returned.
    pub fn open<M: AccessMode>(mut self, validate: bool) -> DataStructureResult<DataStructureHandle<M>> {
        self.do_open(M::MODE, validate)?;
        Ok(DataStructureHandle::new(self))
    }

    /// Run `f` on a read-only session; the session is closed on every path.
    pub fn with_read_only<T>(
        self,
        validate: bool,
        f: impl FnOnce(&ReadOnlyHandle) -> DataStructureResult<T>,
    ) -> DataStructureResult<T> {
        let handle = self.open_read_only(validate)?;
        let result = f(&handle);
        let closed = handle.close();
        let value = result?;
        closed?;
        Ok(value)
    }

    /// Run `f` on a writable session; the session is closed on every path.
    pub fn with_read_write<T>(
        self,
        validate: bool,
        f: impl FnOnce(&mut WriteHandle) -> DataStructureResult<T>,
    ) -> DataStructureResult<T> {
        let mut handle = self.open_read_write(validate)?;
        let result = f(&mut handle);
        let closed = handle.close();
        let value = result?;
        closed?;
        Ok(value)
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// True between `create()`/`open()` and `close()`.
    pub fn is_open_or_created(&self) -> bool {
        !matches!(self.state, State::Uninitialized | State::Closed)
    }

    pub(crate) fn mode(&self) -> Mode {
        self.mode
    }

    fn writable(&self) -> bool {
        self.mode == Mode::ReadWrite
    }

    fn require_state(&self, operation: &'static str, allowed: bool) -> DataStructureResult<()> {
        if allowed {
            Ok(())
        } else {
            Err(DataStructureError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    fn require_open(&self, operation: &'static str) -> DataStructureResult<()> {
        self.require_state(operation, self.is_open_or_created())
    }

    fn do_create(&mut self, parameters: FormatParameters) -> DataStructureResult<()> {
        self.require_state("create", self.state == State::Uninitialized)?;
        if self.root.contains(layout::VERSION)? {
            return Err(DataStructureError::AlreadyExists);
        }
        self.state = State::Creating;
        self.mode = Mode::ReadWrite;
        self.expected_version
            .save_to(&self.root.make_directory(layout::VERSION)?)?;
        self.version = Some(self.expected_version);
        self.parameters = parameters;

        let ctx = HandlerContext::new(&self.root, &self.parameters, true);
        self.handlers.on_create(&ctx)?;
        self.handlers.on_open(&ctx)?;
        self.state = State::Open(Mode::ReadWrite);
        info!(version = %self.expected_version, "created data structure");
        Ok(())
    }

    fn do_open(&mut self, mode: Mode, validate: bool) -> DataStructureResult<()> {
        self.require_state("open", self.state == State::Uninitialized)?;
        let version_dir = match self.root.try_get_node(layout::VERSION)? {
            Some(node) => node.try_as_directory().ok_or(DataStructureError::VersionMissing)?,
            None => return Err(DataStructureError::VersionMissing),
        };
        let loaded = Version::load_from(&version_dir)?;
        if !loaded.is_backward_compatible_with(&self.expected_version) {
            return Err(DataStructureError::IncompatibleVersion {
                loaded,
                expected: self.expected_version,
            });
        }
        self.version = Some(loaded);
        self.mode = mode;

        let format_dir = layout::try_find(&self.root, &[layout::METADATA, layout::FORMAT])?
            .and_then(|node| node.try_as_directory());
        if let Some(dir) = format_dir {
            self.format = Some(Format::load_from(&dir)?);
            self.format_persisted = true;
        }
        let parameters_dir = layout::try_find(&self.root, &[layout::METADATA, layout::PARAMETERS])?
            .and_then(|node| node.try_as_directory());
        if let Some(dir) = parameters_dir {
            self.parameters = self.registry.load_parameters(self.format.as_ref(), &dir)?;
        }

        let ctx = HandlerContext::new(&self.root, &self.parameters, self.writable());
        self.handlers.on_open(&ctx)?;
        self.state = State::Open(mode);
        info!(version = %loaded, %mode, "opened data structure");

        if validate {
            if let Err(e) = self.assert_valid() {
                if let Err(close_err) = self.close() {
                    warn!(error = %close_err, "closing invalid data structure failed");
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// End the session. Writable sessions flush parameters, format and
    /// annotations; then every handler runs `on_close`.
    pub(crate) fn close(&mut self) -> DataStructureResult<()> {
        self.require_open("close")?;
        let writable = self.writable();
        self.state = State::Closed;

        let flushed = if writable { self.flush() } else { Ok(()) };
        let ctx = HandlerContext::new(&self.root, &self.parameters, writable);
        let handled = self.handlers.on_close(&ctx);
        flushed?;
        handled?;
        info!("closed data structure");
        Ok(())
    }

    fn flush(&mut self) -> DataStructureResult<()> {
        let metadata = self.root.make_directory(layout::METADATA)?;
        self.parameters
            .save_to(&metadata.make_directory(layout::PARAMETERS)?)?;
        if let (Some(format), false) = (&self.format, self.format_persisted) {
            format.save_to(&metadata.make_directory(layout::FORMAT)?)?;
            self.format_persisted = true;
            debug!(format = %format, "persisted format");
        }
        if let Some(annotations) = &self.annotations {
            annotations.save_to(&self.root.make_directory(layout::ANNOTATIONS)?)?;
        }
        Ok(())
    }

    pub fn version(&self) -> Option<Version> {
        self.version
    }

    pub(crate) fn root(&self) -> &Directory {
        &self.root
    }

    fn layout_dir(&self, path: &[&str]) -> DataStructureResult<Directory> {
        let mut dir = self.root.clone();
        for name in path {
            dir = layout::directory(&dir, name, self.writable())?;
        }
        Ok(dir)
    }

    pub(crate) fn original_data(&self) -> DataStructureResult<Directory> {
        self.require_open("get original data")?;
        self.layout_dir(&[layout::DATA, layout::ORIGINAL])
    }

    pub(crate) fn standard_data(&self) -> DataStructureResult<Directory> {
        self.require_open("get standard data")?;
        self.layout_dir(&[layout::DATA, layout::STANDARD])
    }

    fn metadata_dir(&self) -> DataStructureResult<Directory> {
        self.layout_dir(&[layout::METADATA])
    }

    pub fn format(&self) -> Option<&Format> {
        self.format.as_ref()
    }

    pub(crate) fn set_format(&mut self, format: Format) -> DataStructureResult<()> {
        self.require_open("set format")?;
        if let (Some(persisted), true) = (&self.format, self.format_persisted) {
            if persisted != &format {
                return Err(DataStructureError::FormatAlreadyPersisted {
                    persisted: persisted.clone(),
                    requested: format,
                });
            }
        }
        debug!(format = %format, "format set");
        self.format = Some(format);
        Ok(())
    }

    pub fn format_parameters(&self) -> &FormatParameters {
        &self.parameters
    }

    /// Add a parameter from its raw value, typed by the current format's
    /// parameter factory.
    pub(crate) fn add_format_parameter(&mut self, name: &str, value: &str) -> DataStructureResult<()> {
        self.require_open("add format parameter")?;
        let parameter = self
            .registry
            .create_parameter(self.format.as_ref(), name, value)?;
        self.add_typed_format_parameter(parameter)
    }

    pub(crate) fn add_typed_format_parameter(
        &mut self,
        parameter: FormatParameter,
    ) -> DataStructureResult<()> {
        self.require_open("add format parameter")?;
        self.parameters.add(parameter)?;
        Ok(())
    }

    pub fn annotations(&self) -> Option<&dyn Annotations> {
        self.annotations.as_deref()
    }

    pub(crate) fn set_annotations(&mut self, annotations: Box<dyn Annotations>) -> DataStructureResult<()> {
        self.require_open("set annotations")?;
        self.annotations = Some(annotations);
        Ok(())
    }

    fn save_metadata<T: MetadataNode>(&self, operation: &'static str, value: &T) -> DataStructureResult<()> {
        self.require_open(operation)?;
        value.save_to(&self.metadata_dir()?)?;
        debug!(node = T::NAME, "metadata saved");
        Ok(())
    }

    fn try_load_metadata<T: MetadataNode>(&self) -> DataStructureResult<Option<T>> {
        self.require_open("get metadata")?;
        let dir = layout::try_find(&self.root, &[layout::METADATA])?.and_then(|n| n.try_as_directory());
        match dir {
            Some(dir) => Ok(T::try_load_from(&dir)?),
            None => Ok(None),
        }
    }

    fn load_metadata<T: MetadataNode>(&self) -> DataStructureResult<T> {
        self.try_load_metadata()?
            .ok_or(DataStructureError::MetadataNotSet(T::NAME))
    }

    pub(crate) fn set_experiment_identifier(&self, value: &ExperimentIdentifier) -> DataStructureResult<()> {
        self.save_metadata("set experiment identifier", value)
    }

    pub fn try_experiment_identifier(&self) -> DataStructureResult<Option<ExperimentIdentifier>> {
        self.try_load_metadata()
    }

    pub fn experiment_identifier(&self) -> DataStructureResult<ExperimentIdentifier> {
        self.load_metadata()
    }

    pub(crate) fn set_experiment_registration_timestamp(
        &self,
        value: &ExperimentRegistrationTimestamp,
    ) -> DataStructureResult<()> {
        self.save_metadata("set experiment registration timestamp", value)
    }

    pub fn try_experiment_registration_timestamp(
        &self,
    ) -> DataStructureResult<Option<ExperimentRegistrationTimestamp>> {
        self.try_load_metadata()
    }

    pub fn experiment_registration_timestamp(
        &self,
    ) -> DataStructureResult<ExperimentRegistrationTimestamp> {
        self.load_metadata()
    }

    pub(crate) fn set_experiment_registrator(&self, value: &ExperimentRegistrator) -> DataStructureResult<()> {
        self.save_metadata("set experiment registrator", value)
    }

    pub fn try_experiment_registrator(&self) -> DataStructureResult<Option<ExperimentRegistrator>> {
        self.try_load_metadata()
    }

    pub fn experiment_registrator(&self) -> DataStructureResult<ExperimentRegistrator> {
        self.load_metadata()
    }

    pub(crate) fn set_sample(&self, value: &Sample) -> DataStructureResult<()> {
        self.save_metadata("set sample", value)
    }

    pub fn try_sample(&self) -> DataStructureResult<Option<Sample>> {
        self.try_load_metadata()
    }

    pub fn sample(&self) -> DataStructureResult<Sample> {
        self.load_metadata()
    }

    pub(crate) fn set_data_set(&self, value: &DataSet) -> DataStructureResult<()> {
        self.save_metadata("set data set", value)
    }

    pub fn try_data_set(&self) -> DataStructureResult<Option<DataSet>> {
        self.try_load_metadata()
    }

    pub fn data_set(&self) -> DataStructureResult<DataSet> {
        self.load_metadata()
    }

    pub(crate) fn add_reference(&mut self, reference: Reference) -> DataStructureResult<()> {
        self.require_open("add reference")?;
        self.handlers.mapping_mut().add_reference(reference)?;
        Ok(())
    }

    /// References keyed by standard path.
    pub fn references(&self) -> &BTreeMap<String, Reference> {
        self.handlers.mapping().references()
    }

    /// View of `data/` interpreted according to the current format.
    pub fn formatted_data(&self) -> DataStructureResult<Box<dyn FormattedData>> {
        self.require_open("get formatted data")?;
        let format = self.format.as_ref().ok_or(DataStructureError::FormatNotSet)?;
        let data: Directory<ReadOnly> = self.layout_dir(&[layout::DATA])?.into_read_only();
        Ok(self
            .registry
            .create_formatted_data(data, format, self.parameters.clone())?)
    }

    /// Check that every mandatory item is set, in fixed order, then let the
    /// annotations validate the formatted data.
    pub fn assert_valid(&self) -> DataStructureResult<()> {
        self.require_open("validate")?;
        for item in MandatoryItem::ALL {
            let present = match item {
                MandatoryItem::Format => self.format.is_some(),
                MandatoryItem::ExperimentIdentifier => {
                    self.try_load_metadata::<ExperimentIdentifier>()?.is_some()
                }
                MandatoryItem::ExperimentRegistrationTimestamp => self
                    .try_load_metadata::<ExperimentRegistrationTimestamp>()?
                    .is_some(),
                MandatoryItem::ExperimentRegistrator => {
                    self.try_load_metadata::<ExperimentRegistrator>()?.is_some()
                }
                MandatoryItem::Sample => self.try_load_metadata::<Sample>()?.is_some(),
                MandatoryItem::DataSet => self.try_load_metadata::<DataSet>()?.is_some(),
            };
            if !present {
                return Err(DataStructureError::MissingMandatory(item));
            }
        }
        if let Some(annotations) = &self.annotations {
            let data = self.formatted_data()?;
            annotations
                .assert_valid(data.as_ref())
                .map_err(DataStructureError::InvalidAnnotations)?;
        }
        Ok(())
    }

    /// Compare the stored checksums with the current original data.
    pub fn verify_checksums(&self) -> DataStructureResult<Vec<ChecksumMismatch>> {
        self.require_open("verify checksums")?;
        Ok(ChecksumHandler::verify(&self.root)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{ParameterValue, COMPUTE_FILE_CHECKSUMS};
    use crate::handler::{HandlerError, HandlerResult, LifecycleHandler, ReferenceType};
    use crate::storage::MemoryStorage;
    use crate::structure::annotations::FileAnnotations;
    use crate::structure::handle::WriteHandle;
    use chrono::{TimeZone, Utc};
    use parking_lot::Mutex;

    fn fresh(storage: &Arc<MemoryStorage>) -> DataStructure {
        DataStructure::new(storage.clone(), DataStructureConfig::new())
    }

    fn fill(handle: &mut WriteHandle, skip: &[MandatoryItem]) {
        let wanted = |item| !skip.contains(&item);
        if wanted(MandatoryItem::Format) {
            handle.set_format(Format::new("tiff-stack", Version::new(1, 0))).unwrap();
        }
        if wanted(MandatoryItem::ExperimentIdentifier) {
            handle
                .set_experiment_identifier(&ExperimentIdentifier::new("DB", "LAB", "SCREEN", "EXP-1"))
                .unwrap();
        }
        if wanted(MandatoryItem::ExperimentRegistrationTimestamp) {
            let instant = Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap();
            handle
                .set_experiment_registration_timestamp(&instant.into())
                .unwrap();
        }
        if wanted(MandatoryItem::ExperimentRegistrator) {
            handle
                .set_experiment_registrator(&ExperimentRegistrator::new("Ada", "Lovelace", "ada@example.org"))
                .unwrap();
        }
        if wanted(MandatoryItem::Sample) {
            handle.set_sample(&Sample::new("PLATE-1", "PLATE", "384 well plate")).unwrap();
        }
        if wanted(MandatoryItem::DataSet) {
            handle.set_data_set(&DataSet::new("DS-1", "HCS_IMAGE")).unwrap();
        }
    }

    #[test]
    fn test_create_writes_version_only() {
        let storage = Arc::new(MemoryStorage::new());
        let handle = fresh(&storage).create().unwrap();
        assert_eq!(handle.state(), State::Open(Mode::ReadWrite));
        assert_eq!(handle.version(), Some(DataStructureConfig::CURRENT_VERSION));
        let names: Vec<String> = handle
            .root()
            .iter()
            .map(|n| n.unwrap().name().to_string())
            .collect();
        assert_eq!(names, vec!["version"]);

        handle.original_data().unwrap();
        assert!(handle.root().get_directory("data").unwrap().contains("original").unwrap());
        handle.close().unwrap();
    }

    #[test]
    fn test_create_twice_fails() {
        let storage = Arc::new(MemoryStorage::new());
        fresh(&storage).create().unwrap().close().unwrap();
        assert!(matches!(
            fresh(&storage).create(),
            Err(DataStructureError::AlreadyExists)
        ));
    }

    #[test]
    fn test_open_without_version() {
        let storage = Arc::new(MemoryStorage::new());
        assert!(matches!(
            fresh(&storage).open_read_only(false),
            Err(DataStructureError::VersionMissing)
        ));
    }

    #[test]
    fn test_version_compatibility() {
        let storage = Arc::new(MemoryStorage::new());
        DataStructure::new(storage.clone(), DataStructureConfig::new().version(Version::new(2, 0)))
            .create()
            .unwrap()
            .close()
            .unwrap();
        let err = fresh(&storage).open_read_only(false).unwrap_err();
        assert_eq!(
            err.to_string(),
            "version of loaded data structure is V2.0 which is not backward compatible with V1.0"
        );

        let storage = Arc::new(MemoryStorage::new());
        DataStructure::new(storage.clone(), DataStructureConfig::new().version(Version::new(1, 3)))
            .create()
            .unwrap()
            .close()
            .unwrap();
        let newer = DataStructureConfig::new().version(Version::new(1, 1));
        let handle = DataStructure::new(storage.clone(), newer).open_read_only(false).unwrap();
        assert_eq!(handle.version(), Some(Version::new(1, 3)));
        handle.close().unwrap();

        let older = DataStructureConfig::new().version(Version::new(1, 4));
        assert!(matches!(
            DataStructure::new(storage, older).open_read_only(false),
            Err(DataStructureError::IncompatibleVersion { .. })
        ));
    }

    #[test]
    fn test_invalid_state() {
        let storage = Arc::new(MemoryStorage::new());
        let mut ds = fresh(&storage);
        assert!(!ds.is_open_or_created());
        let err = ds.set_format(Format::new("x", Version::new(1, 0))).unwrap_err();
        assert!(matches!(
            err,
            DataStructureError::InvalidState { state: State::Uninitialized, .. }
        ));
        assert!(ds.close().is_err());
    }

    #[test]
    fn test_validation_names_each_missing_item() {
        for item in MandatoryItem::ALL {
            let storage = Arc::new(MemoryStorage::new());
            let mut handle = fresh(&storage).create().unwrap();
            fill(&mut handle, &[item]);
            let err = handle.assert_valid().unwrap_err();
            assert!(err.is_structural());
            assert!(matches!(err, DataStructureError::MissingMandatory(missing) if missing == item));
            handle.close().unwrap();
        }
    }

    #[test]
    fn test_validation_reports_first_in_order() {
        let storage = Arc::new(MemoryStorage::new());
        let mut handle = fresh(&storage).create().unwrap();
        fill(
            &mut handle,
            &[MandatoryItem::DataSet, MandatoryItem::ExperimentRegistrator, MandatoryItem::Sample],
        );
        assert!(matches!(
            handle.assert_valid(),
            Err(DataStructureError::MissingMandatory(MandatoryItem::ExperimentRegistrator))
        ));
        fill(&mut handle, &[MandatoryItem::Format]);
        handle.assert_valid().unwrap();
        handle.close().unwrap();
    }

    #[test]
    fn test_annotations_validated_after_mandatory_items() {
        let storage = Arc::new(MemoryStorage::new());
        let mut handle = fresh(&storage).create().unwrap();
        fill(&mut handle, &[]);
        handle
            .set_annotations(FileAnnotations::new().annotate("well_a1.png", "control"))
            .unwrap();
        assert!(matches!(
            handle.assert_valid(),
            Err(DataStructureError::InvalidAnnotations(_))
        ));

        handle.standard_data().unwrap().add_key_value_pair("well_a1.png", "px").unwrap();
        handle.assert_valid().unwrap();
        handle.close().unwrap();
        assert!(storage.exists(&crate::storage::NodePath::parse("annotations/files").unwrap()).unwrap());
    }

    #[test]
    fn test_open_with_validation_closes_invalid_container() {
        let storage = Arc::new(MemoryStorage::new());
        let mut handle = fresh(&storage).create().unwrap();
        fill(&mut handle, &[MandatoryItem::Sample]);
        handle.close().unwrap();

        assert!(matches!(
            fresh(&storage).open_read_only(true),
            Err(DataStructureError::MissingMandatory(MandatoryItem::Sample))
        ));
        fresh(&storage).open_read_only(false).unwrap().close().unwrap();
    }

    #[test]
    fn test_formatted_data_requires_format() {
        let storage = Arc::new(MemoryStorage::new());
        let mut handle = fresh(&storage).create().unwrap();
        let err = handle.formatted_data().unwrap_err();
        assert_eq!(
            err.to_string(),
            "couldn't create formatted data because of unspecified format"
        );
        handle.set_format(Format::new("tiff-stack", Version::new(1, 0))).unwrap();
        let data = handle.formatted_data().unwrap();
        assert!(data.data().make_directory("x").unwrap_err().is_access_denied());
        handle.close().unwrap();
    }

    #[test]
    fn test_duplicate_parameter_keeps_first() {
        let storage = Arc::new(MemoryStorage::new());
        let mut handle = fresh(&storage).create().unwrap();
        handle.add_format_parameter("channel", "dapi").unwrap();
        let err = handle.add_format_parameter("channel", "gfp").unwrap_err();
        assert!(matches!(err, DataStructureError::DuplicateParameter(ref name) if name == "channel"));
        assert_eq!(handle.format_parameters().len(), 1);
        assert_eq!(
            handle.format_parameters().get("channel"),
            Some(&ParameterValue::Text("dapi".into()))
        );
        handle.close().unwrap();
    }

    #[test]
    fn test_persisted_format_is_immutable() {
        let storage = Arc::new(MemoryStorage::new());
        let tiff = Format::new("tiff-stack", Version::new(1, 0));
        let mut handle = fresh(&storage).create().unwrap();
        handle.set_format(tiff.clone()).unwrap();
        // not persisted yet, so it may still change
        handle.set_format(Format::new("png-stack", Version::new(1, 0))).unwrap();
        handle.set_format(tiff.clone()).unwrap();
        handle.close().unwrap();

        let mut handle = fresh(&storage).open_read_write(false).unwrap();
        assert_eq!(handle.format(), Some(&tiff));
        handle.set_format(tiff.clone()).unwrap();
        assert!(matches!(
            handle.set_format(Format::new("png-stack", Version::new(1, 0))),
            Err(DataStructureError::FormatAlreadyPersisted { .. })
        ));
        handle.close().unwrap();
    }

    #[test]
    fn test_metadata_getters() {
        let storage = Arc::new(MemoryStorage::new());
        let mut handle = fresh(&storage).create().unwrap();
        assert!(handle.try_sample().unwrap().is_none());
        assert!(matches!(
            handle.sample(),
            Err(DataStructureError::MetadataNotSet("sample"))
        ));
        fill(&mut handle, &[]);
        handle.set_sample(&Sample::new("PLATE-2", "PLATE", "96 well plate")).unwrap();
        assert_eq!(handle.sample().unwrap().code, "PLATE-2");
        handle.close().unwrap();

        let handle = fresh(&storage).open_read_only(true).unwrap();
        assert_eq!(handle.experiment_identifier().unwrap().experiment_code, "EXP-1");
        assert_eq!(handle.experiment_registrator().unwrap().last_name, "Lovelace");
        assert_eq!(handle.data_set().unwrap().code, "DS-1");
        assert_eq!(
            handle.experiment_registration_timestamp().unwrap().instant(),
            Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap()
        );
        handle.close().unwrap();
    }

    #[test]
    fn test_read_only_session_creates_nothing() {
        let storage = Arc::new(MemoryStorage::new());
        fresh(&storage).create().unwrap().close().unwrap();
        let before = storage.len();

        let handle = fresh(&storage).open_read_only(false).unwrap();
        // nothing ever created data/standard
        assert!(handle.standard_data().unwrap_err().to_string().contains("not found"));
        assert!(handle.try_data_set().unwrap().is_none());
        handle.close().unwrap();
        assert_eq!(storage.len(), before);
    }

    #[test]
    fn test_references_persist() {
        let storage = Arc::new(MemoryStorage::new());
        let mut handle = fresh(&storage).create().unwrap();
        handle
            .add_reference(Reference::new("a.png", "a.tiff", ReferenceType::Transformed))
            .unwrap();
        assert!(matches!(
            handle.add_reference(Reference::new("a.png", "b.tiff", ReferenceType::Identical)),
            Err(DataStructureError::DuplicateReference(_))
        ));
        handle.close().unwrap();

        let handle = fresh(&storage).open_read_only(false).unwrap();
        assert_eq!(handle.references().len(), 1);
        assert_eq!(handle.references()["a.png"].original_path(), "a.tiff");
        handle.close().unwrap();
    }

    #[test]
    fn test_checksums_written_on_creation_close() {
        let storage = Arc::new(MemoryStorage::new());
        let mut handle = fresh(&storage).create().unwrap();
        handle.add_format_parameter(COMPUTE_FILE_CHECKSUMS, "true").unwrap();
        let original = handle.original_data().unwrap();
        original.add_key_value_pair("a.tiff", "A").unwrap();
        original.add_key_value_pair("b.tiff", "B").unwrap();
        handle.close().unwrap();

        let handle = fresh(&storage).open_read_only(false).unwrap();
        assert_eq!(
            handle.format_parameters().get(COMPUTE_FILE_CHECKSUMS),
            Some(&ParameterValue::Boolean(true))
        );
        assert!(handle.verify_checksums().unwrap().is_empty());
        let records = ChecksumHandler::load(&handle.root()).unwrap().unwrap();
        assert_eq!(records.len(), 2);
        handle.close().unwrap();
    }

    #[derive(Debug)]
    struct Recorder {
        log: Arc<Mutex<Vec<&'static str>>>,
        fail_on_close: bool,
    }

    impl LifecycleHandler for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn on_create(&mut self, _ctx: &HandlerContext<'_>) -> HandlerResult<()> {
            self.log.lock().push("create");
            Ok(())
        }

        fn on_open(&mut self, _ctx: &HandlerContext<'_>) -> HandlerResult<()> {
            self.log.lock().push("open");
            Ok(())
        }

        fn on_close(&mut self, _ctx: &HandlerContext<'_>) -> HandlerResult<()> {
            self.log.lock().push("close");
            if self.fail_on_close {
                return Err(HandlerError::Failed {
                    handler: "recorder".into(),
                    reason: "flush failed".into(),
                });
            }
            Ok(())
        }
    }

    fn recorded(storage: &Arc<MemoryStorage>, log: &Arc<Mutex<Vec<&'static str>>>, fail: bool) -> DataStructure {
        let config = DataStructureConfig::new().handler(Recorder {
            log: log.clone(),
            fail_on_close: fail,
        });
        DataStructure::new(storage.clone(), config)
    }

    #[test]
    fn test_handler_phases() {
        let storage = Arc::new(MemoryStorage::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        recorded(&storage, &log, false).create().unwrap().close().unwrap();
        recorded(&storage, &log, false).open_read_only(false).unwrap().close().unwrap();
        assert_eq!(*log.lock(), vec!["create", "open", "close", "open", "close"]);
    }

    #[test]
    fn test_handler_failure_fails_close() {
        let storage = Arc::new(MemoryStorage::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        let handle = recorded(&storage, &log, true).create().unwrap();
        assert!(matches!(
            handle.close(),
            Err(DataStructureError::HandlerFailed(_))
        ));
    }

    #[test]
    fn test_scoped_session_always_closes() {
        let storage = Arc::new(MemoryStorage::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        recorded(&storage, &log, false).create().unwrap().close().unwrap();
        log.lock().clear();

        let result: DataStructureResult<()> = recorded(&storage, &log, false)
            .with_read_only(false, |handle| {
                handle.assert_valid()?;
                Ok(())
            });
        assert!(result.unwrap_err().is_structural());
        assert_eq!(*log.lock(), vec!["open", "close"]);

        let code = recorded(&storage, &log, false)
            .with_read_write(false, |handle| {
                handle.set_sample(&Sample::new("S", "T", "D"))?;
                Ok(handle.sample()?.code)
            })
            .unwrap();
        assert_eq!(code, "S");
    }

    #[test]
    fn test_drop_closes_and_flushes() {
        let storage = Arc::new(MemoryStorage::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        {
            let mut handle = recorded(&storage, &log, false).create().unwrap();
            handle.set_format(Format::new("tiff-stack", Version::new(1, 0))).unwrap();
        }
        assert_eq!(log.lock().last(), Some(&"close"));
        let handle = fresh(&storage).open_read_only(false).unwrap();
        assert_eq!(handle.format().unwrap().code(), "tiff-stack");
        handle.close().unwrap();
    }

    mod round_trip {
        use super::*;
        use proptest::prelude::*;
        use std::collections::BTreeMap;

        proptest! {
            #[test]
            fn format_and_parameters_survive_reopen(
                code in "[a-z][a-z0-9-]{0,11}",
                major in 0u32..4,
                minor in 0u32..10,
                variant in proptest::option::of("[a-z]{1,6}"),
                parameters in proptest::collection::btree_map("[a-z][a-z0-9]{0,7}", "[A-Za-z0-9]{1,10}", 0..6),
            ) {
                let storage = Arc::new(MemoryStorage::new());
                let mut format = Format::new(code, Version::new(major, minor));
                if let Some(variant) = variant {
                    format = format.with_variant(variant);
                }

                let mut handle = fresh(&storage).create().unwrap();
                handle.set_format(format.clone()).unwrap();
                for (name, value) in &parameters {
                    handle.add_format_parameter(name, value).unwrap();
                }
                handle.close().unwrap();

                let handle = fresh(&storage).open_read_only(false).unwrap();
                prop_assert_eq!(handle.format(), Some(&format));
                let loaded: BTreeMap<String, String> = handle
                    .format_parameters()
                    .iter()
                    .map(|p| (p.name().to_string(), p.value().to_string()))
                    .collect();
                prop_assert_eq!(loaded, parameters);
                handle.close().unwrap();
            }
        }
    }
}
