//! Access-mode guarded handles to an open container.
//!
//! A handle fixes the access mode of a session in its type. Setters go
//! through one guard that refuses them on read-only handles, and every
//! directory a handle returns carries the handle's mode, so nothing
//! reachable from a read-only handle can be mutated.

use std::collections::BTreeMap;
use std::marker::PhantomData;

use tracing::warn;

use crate::format::{Format, FormatParameter, FormatParameters, FormattedData, Version};
use crate::handler::{ChecksumMismatch, Reference};
use crate::metadata::{
    DataSet, ExperimentIdentifier, ExperimentRegistrationTimestamp, ExperimentRegistrator, Sample,
};
use crate::storage::{AccessMode, Directory, Mode, ReadOnly, ReadWrite};
use crate::structure::annotations::Annotations;
use crate::structure::data_structure::{DataStructure, State};
use crate::structure::error::{DataStructureError, DataStructureResult};

/// An open container session with access mode `M`.
///
/// Dropping a handle that was not closed closes it on a best-effort basis.
#[derive(Debug)]
pub struct DataStructureHandle<M: AccessMode> {
    inner: DataStructure,
    _mode: PhantomData<M>,
}

/// A session that may modify the container.
pub type WriteHandle = DataStructureHandle<ReadWrite>;

/// A session that can only read the container.
pub type ReadOnlyHandle = DataStructureHandle<ReadOnly>;

impl<M: AccessMode> DataStructureHandle<M> {
    pub(crate) fn new(inner: DataStructure) -> Self {
        Self {
            inner,
            _mode: PhantomData,
        }
    }

    fn guard(&self, operation: &'static str) -> DataStructureResult<()> {
        match M::MODE {
            Mode::ReadWrite => Ok(()),
            Mode::ReadOnly => Err(DataStructureError::AccessDenied { operation }),
        }
    }

    pub fn mode(&self) -> Mode {
        M::MODE
    }

    pub fn state(&self) -> State {
        self.inner.state()
    }

    pub fn version(&self) -> Option<Version> {
        self.inner.version()
    }

    /// Container root with this handle's access mode.
    pub fn root(&self) -> Directory<M> {
        self.inner.root().clone().with_mode()
    }

    /// `data/original/`, created on demand in writable sessions.
    pub fn original_data(&self) -> DataStructureResult<Directory<M>> {
        Ok(self.inner.original_data()?.with_mode())
    }

    /// `data/standard/`, created on demand in writable sessions.
    pub fn standard_data(&self) -> DataStructureResult<Directory<M>> {
        Ok(self.inner.standard_data()?.with_mode())
    }

    pub fn format(&self) -> Option<&Format> {
        self.inner.format()
    }

    pub fn set_format(&mut self, format: Format) -> DataStructureResult<()> {
        self.guard("set format")?;
        self.inner.set_format(format)
    }

    pub fn format_parameters(&self) -> &FormatParameters {
        self.inner.format_parameters()
    }

    /// Add a parameter; the raw value is typed by the current format.
    pub fn add_format_parameter(&mut self, name: &str, value: &str) -> DataStructureResult<()> {
        self.guard("add format parameter")?;
        self.inner.add_format_parameter(name, value)
    }

    pub fn add_typed_format_parameter(&mut self, parameter: FormatParameter) -> DataStructureResult<()> {
        self.guard("add format parameter")?;
        self.inner.add_typed_format_parameter(parameter)
    }

    pub fn annotations(&self) -> Option<&dyn Annotations> {
        self.inner.annotations()
    }

    pub fn set_annotations(&mut self, annotations: impl Annotations + 'static) -> DataStructureResult<()> {
        self.guard("set annotations")?;
        self.inner.set_annotations(Box::new(annotations))
    }

    pub fn set_experiment_identifier(&mut self, value: &ExperimentIdentifier) -> DataStructureResult<()> {
        self.guard("set experiment identifier")?;
        self.inner.set_experiment_identifier(value)
    }

    pub fn try_experiment_identifier(&self) -> DataStructureResult<Option<ExperimentIdentifier>> {
        self.inner.try_experiment_identifier()
    }

    pub fn experiment_identifier(&self) -> DataStructureResult<ExperimentIdentifier> {
        self.inner.experiment_identifier()
    }

    pub fn set_experiment_registration_timestamp(
        &mut self,
        value: &ExperimentRegistrationTimestamp,
    ) -> DataStructureResult<()> {
        self.guard("set experiment registration timestamp")?;
        self.inner.set_experiment_registration_timestamp(value)
    }

    pub fn try_experiment_registration_timestamp(
        &self,
    ) -> DataStructureResult<Option<ExperimentRegistrationTimestamp>> {
        self.inner.try_experiment_registration_timestamp()
    }

    pub fn experiment_registration_timestamp(&self) -> DataStructureResult<ExperimentRegistrationTimestamp> {
        self.inner.experiment_registration_timestamp()
    }

    pub fn set_experiment_registrator(&mut self, value: &ExperimentRegistrator) -> DataStructureResult<()> {
        self.guard("set experiment registrator")?;
        self.inner.set_experiment_registrator(value)
    }

    pub fn try_experiment_registrator(&self) -> DataStructureResult<Option<ExperimentRegistrator>> {
        self.inner.try_experiment_registrator()
    }

    pub fn experiment_registrator(&self) -> DataStructureResult<ExperimentRegistrator> {
        self.inner.experiment_registrator()
    }

    pub fn set_sample(&mut self, value: &Sample) -> DataStructureResult<()> {
        self.guard("set sample")?;
        self.inner.set_sample(value)
    }

    pub fn try_sample(&self) -> DataStructureResult<Option<Sample>> {
        self.inner.try_sample()
    }

    pub fn sample(&self) -> DataStructureResult<Sample> {
        self.inner.sample()
    }

    pub fn set_data_set(&mut self, value: &DataSet) -> DataStructureResult<()> {
        self.guard("set data set")?;
        self.inner.set_data_set(value)
    }

    pub fn try_data_set(&self) -> DataStructureResult<Option<DataSet>> {
        self.inner.try_data_set()
    }

    pub fn data_set(&self) -> DataStructureResult<DataSet> {
        self.inner.data_set()
    }

    pub fn add_reference(&mut self, reference: Reference) -> DataStructureResult<()> {
        self.guard("add reference")?;
        self.inner.add_reference(reference)
    }

    /// Standard path to reference mapping; read-only view.
    pub fn references(&self) -> &BTreeMap<String, Reference> {
        self.inner.references()
    }

    pub fn formatted_data(&self) -> DataStructureResult<Box<dyn FormattedData>> {
        self.inner.formatted_data()
    }

    pub fn assert_valid(&self) -> DataStructureResult<()> {
        self.inner.assert_valid()
    }

    pub fn verify_checksums(&self) -> DataStructureResult<Vec<ChecksumMismatch>> {
        self.inner.verify_checksums()
    }

    /// End the session; writable sessions are flushed first.
    pub fn close(mut self) -> DataStructureResult<()> {
        self.inner.close()
    }
}

impl<M: AccessMode> Drop for DataStructureHandle<M> {
    fn drop(&mut self) {
        if self.inner.is_open_or_created() {
            warn!(mode = %self.inner.mode(), "data structure dropped without close, closing");
            if let Err(e) = self.inner.close() {
                warn!(error = %e, "closing dropped data structure failed");
            }
        }
    }
}
