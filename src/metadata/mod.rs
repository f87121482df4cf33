//! Metadata value objects stored under `metadata/`.
//!
//! Each value owns exactly one named node below the metadata directory.
//! The presence of that node is the only "is it set" check, so saving
//! replaces whatever was stored before.

use std::fmt;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::{AccessMode, Directory, StorageError, StorageResult};

/// A value persisted as the node [`MetadataNode::NAME`] of a directory.
pub trait MetadataNode: Sized {
    const NAME: &'static str;

    /// Create the node; the name is known to be free.
    fn write_into<M: AccessMode>(&self, parent: &Directory<M>) -> StorageResult<()>;

    /// Read the node, which is known to exist.
    fn read_from<M: AccessMode>(parent: &Directory<M>) -> StorageResult<Self>;

    /// Replace any stored value with this one.
    fn save_to<M: AccessMode>(&self, parent: &Directory<M>) -> StorageResult<()> {
        if let Some(existing) = parent.try_get_node(Self::NAME)? {
            parent.remove_node(&existing)?;
        }
        self.write_into(parent)
    }

    /// The stored value, `None` if the node is absent.
    fn try_load_from<M: AccessMode>(parent: &Directory<M>) -> StorageResult<Option<Self>> {
        if !parent.contains(Self::NAME)? {
            return Ok(None);
        }
        Self::read_from(parent).map(Some)
    }
}

fn value<M: AccessMode>(dir: &Directory<M>, name: &str) -> StorageResult<String> {
    dir.get_file(name)?.read_trimmed()
}

/// Identifies the experiment a data set belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExperimentIdentifier {
    pub instance_code: String,
    pub space_code: String,
    pub project_code: String,
    pub experiment_code: String,
}

impl ExperimentIdentifier {
    const INSTANCE_CODE: &'static str = "instance-code";
    const SPACE_CODE: &'static str = "space-code";
    const PROJECT_CODE: &'static str = "project-code";
    const EXPERIMENT_CODE: &'static str = "experiment-code";

    pub fn new(
        instance_code: impl Into<String>,
        space_code: impl Into<String>,
        project_code: impl Into<String>,
        experiment_code: impl Into<String>,
    ) -> Self {
        Self {
            instance_code: instance_code.into(),
            space_code: space_code.into(),
            project_code: project_code.into(),
            experiment_code: experiment_code.into(),
        }
    }
}

impl fmt::Display for ExperimentIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:/{}/{}/{}",
            self.instance_code, self.space_code, self.project_code, self.experiment_code
        )
    }
}

impl MetadataNode for ExperimentIdentifier {
    const NAME: &'static str = "experiment-identifier";

    fn write_into<M: AccessMode>(&self, parent: &Directory<M>) -> StorageResult<()> {
        let dir = parent.make_directory(Self::NAME)?;
        dir.add_key_value_pair(Self::INSTANCE_CODE, &self.instance_code)?;
        dir.add_key_value_pair(Self::SPACE_CODE, &self.space_code)?;
        dir.add_key_value_pair(Self::PROJECT_CODE, &self.project_code)?;
        dir.add_key_value_pair(Self::EXPERIMENT_CODE, &self.experiment_code)?;
        Ok(())
    }

    fn read_from<M: AccessMode>(parent: &Directory<M>) -> StorageResult<Self> {
        let dir = parent.get_directory(Self::NAME)?;
        Ok(Self {
            instance_code: value(&dir, Self::INSTANCE_CODE)?,
            space_code: value(&dir, Self::SPACE_CODE)?,
            project_code: value(&dir, Self::PROJECT_CODE)?,
            experiment_code: value(&dir, Self::EXPERIMENT_CODE)?,
        })
    }
}

/// Person who registered the experiment, stored as a JSON record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentRegistrator {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

impl ExperimentRegistrator {
    pub fn new(
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        Self {
            first_name: first_name.into(),
            last_name: last_name.into(),
            email: email.into(),
        }
    }
}

impl fmt::Display for ExperimentRegistrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} <{}>", self.first_name, self.last_name, self.email)
    }
}

impl MetadataNode for ExperimentRegistrator {
    const NAME: &'static str = "experiment-registrator";

    fn write_into<M: AccessMode>(&self, parent: &Directory<M>) -> StorageResult<()> {
        parent.add_key_value_pair(Self::NAME, &serde_json::to_string(self)?)?;
        Ok(())
    }

    fn read_from<M: AccessMode>(parent: &Directory<M>) -> StorageResult<Self> {
        Ok(serde_json::from_str(&value(parent, Self::NAME)?)?)
    }
}

/// Instant the experiment was registered.
///
/// Held at millisecond precision, the precision it is stored with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ExperimentRegistrationTimestamp(DateTime<Utc>);

impl ExperimentRegistrationTimestamp {
    pub fn new(instant: DateTime<Utc>) -> Self {
        Self(instant.trunc_subsecs(3))
    }

    pub fn now() -> Self {
        Self::new(Utc::now())
    }

    pub fn instant(&self) -> DateTime<Utc> {
        self.0
    }
}

impl From<DateTime<Utc>> for ExperimentRegistrationTimestamp {
    fn from(instant: DateTime<Utc>) -> Self {
        Self::new(instant)
    }
}

impl fmt::Display for ExperimentRegistrationTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339_opts(SecondsFormat::Millis, true))
    }
}

impl MetadataNode for ExperimentRegistrationTimestamp {
    const NAME: &'static str = "experiment-registration-timestamp";

    fn write_into<M: AccessMode>(&self, parent: &Directory<M>) -> StorageResult<()> {
        parent.add_key_value_pair(Self::NAME, &self.to_string())?;
        Ok(())
    }

    fn read_from<M: AccessMode>(parent: &Directory<M>) -> StorageResult<Self> {
        let file = parent.get_file(Self::NAME)?;
        let raw = file.read_trimmed()?;
        let instant = DateTime::parse_from_rfc3339(&raw).map_err(|e| StorageError::CorruptedData {
            path: file.path().clone(),
            reason: format!("invalid timestamp '{}': {}", raw, e),
        })?;
        Ok(Self::new(instant.with_timezone(&Utc)))
    }
}

/// The sample the data was measured on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub code: String,
    pub type_code: String,
    pub type_description: String,
}

impl Sample {
    const CODE: &'static str = "code";
    const TYPE_CODE: &'static str = "type-code";
    const TYPE_DESCRIPTION: &'static str = "type-description";

    pub fn new(
        code: impl Into<String>,
        type_code: impl Into<String>,
        type_description: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            type_code: type_code.into(),
            type_description: type_description.into(),
        }
    }
}

impl MetadataNode for Sample {
    const NAME: &'static str = "sample";

    fn write_into<M: AccessMode>(&self, parent: &Directory<M>) -> StorageResult<()> {
        let dir = parent.make_directory(Self::NAME)?;
        dir.add_key_value_pair(Self::CODE, &self.code)?;
        dir.add_key_value_pair(Self::TYPE_CODE, &self.type_code)?;
        dir.add_key_value_pair(Self::TYPE_DESCRIPTION, &self.type_description)?;
        Ok(())
    }

    fn read_from<M: AccessMode>(parent: &Directory<M>) -> StorageResult<Self> {
        let dir = parent.get_directory(Self::NAME)?;
        Ok(Self {
            code: value(&dir, Self::CODE)?,
            type_code: value(&dir, Self::TYPE_CODE)?,
            type_description: value(&dir, Self::TYPE_DESCRIPTION)?,
        })
    }
}

/// The data set stored in the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSet {
    pub code: String,
    pub observable_type: String,
    pub is_measured: bool,
    pub parent_codes: Vec<String>,
}

impl DataSet {
    const CODE: &'static str = "code";
    const OBSERVABLE_TYPE: &'static str = "observable-type";
    const IS_MEASURED: &'static str = "is-measured";
    const PARENT_CODES: &'static str = "parent-codes";

    /// A measured data set without parents.
    pub fn new(code: impl Into<String>, observable_type: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            observable_type: observable_type.into(),
            is_measured: true,
            parent_codes: Vec::new(),
        }
    }

    /// A derived data set computed from `parent_codes`.
    pub fn derived(
        code: impl Into<String>,
        observable_type: impl Into<String>,
        parent_codes: Vec<String>,
    ) -> Self {
        Self {
            code: code.into(),
            observable_type: observable_type.into(),
            is_measured: false,
            parent_codes,
        }
    }
}

impl MetadataNode for DataSet {
    const NAME: &'static str = "data-set";

    fn write_into<M: AccessMode>(&self, parent: &Directory<M>) -> StorageResult<()> {
        let dir = parent.make_directory(Self::NAME)?;
        dir.add_key_value_pair(Self::CODE, &self.code)?;
        dir.add_key_value_pair(Self::OBSERVABLE_TYPE, &self.observable_type)?;
        dir.add_key_value_pair(Self::IS_MEASURED, &self.is_measured.to_string())?;
        // one code per line
        dir.add_key_value_pair(Self::PARENT_CODES, &self.parent_codes.join("\n"))?;
        Ok(())
    }

    fn read_from<M: AccessMode>(parent: &Directory<M>) -> StorageResult<Self> {
        let dir = parent.get_directory(Self::NAME)?;
        let measured = dir.get_file(Self::IS_MEASURED)?;
        let is_measured = match measured.read_trimmed()?.as_str() {
            "true" => true,
            "false" => false,
            other => {
                return Err(StorageError::CorruptedData {
                    path: measured.path().clone(),
                    reason: format!("'{}' is not a boolean", other),
                })
            }
        };
        let parent_codes = value(&dir, Self::PARENT_CODES)?
            .lines()
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        Ok(Self {
            code: value(&dir, Self::CODE)?,
            observable_type: value(&dir, Self::OBSERVABLE_TYPE)?,
            is_measured,
            parent_codes,
        })
    }
}
