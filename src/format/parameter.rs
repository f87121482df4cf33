//! Typed format parameters.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::format::error::{FormatError, FormatResult};
use crate::storage::{AccessMode, Directory, Node, NodeName, StorageError};

/// Well-known boolean parameter switching checksum computation on or off.
pub const COMPUTE_FILE_CHECKSUMS: &str = "compute-file-checksums";

/// Value kinds a parameter can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterKind {
    Text,
    Boolean,
    Integer,
}

impl ParameterKind {
    /// Parse a raw stored value as this kind.
    pub fn parse(&self, name: &str, raw: &str) -> FormatResult<ParameterValue> {
        let invalid = |reason: &str| FormatError::InvalidParameterValue {
            name: name.to_string(),
            value: raw.to_string(),
            reason: reason.to_string(),
        };
        match self {
            ParameterKind::Text => Ok(ParameterValue::Text(raw.to_string())),
            ParameterKind::Boolean => match raw.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(ParameterValue::Boolean(true)),
                "false" => Ok(ParameterValue::Boolean(false)),
                _ => Err(invalid("expected 'true' or 'false'")),
            },
            ParameterKind::Integer => raw
                .trim()
                .parse()
                .map(ParameterValue::Integer)
                .map_err(|_| invalid("expected an integer")),
        }
    }
}

impl fmt::Display for ParameterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterKind::Text => write!(f, "text"),
            ParameterKind::Boolean => write!(f, "boolean"),
            ParameterKind::Integer => write!(f, "integer"),
        }
    }
}

/// A typed parameter value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Text(String),
    Boolean(bool),
    Integer(i64),
}

impl ParameterValue {
    pub fn kind(&self) -> ParameterKind {
        match self {
            ParameterValue::Text(_) => ParameterKind::Text,
            ParameterValue::Boolean(_) => ParameterKind::Boolean,
            ParameterValue::Integer(_) => ParameterKind::Integer,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ParameterValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParameterValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            ParameterValue::Integer(i) => Some(*i),
            _ => None,
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::Text(s) => write!(f, "{}", s),
            ParameterValue::Boolean(b) => write!(f, "{}", b),
            ParameterValue::Integer(i) => write!(f, "{}", i),
        }
    }
}

impl From<&str> for ParameterValue {
    fn from(value: &str) -> Self {
        ParameterValue::Text(value.to_string())
    }
}

impl From<String> for ParameterValue {
    fn from(value: String) -> Self {
        ParameterValue::Text(value)
    }
}

impl From<bool> for ParameterValue {
    fn from(value: bool) -> Self {
        ParameterValue::Boolean(value)
    }
}

impl From<i64> for ParameterValue {
    fn from(value: i64) -> Self {
        ParameterValue::Integer(value)
    }
}

/// A named, typed parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatParameter {
    name: String,
    value: ParameterValue,
}

impl FormatParameter {
    pub fn new(name: impl Into<String>, value: impl Into<ParameterValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &ParameterValue {
        &self.value
    }
}

impl fmt::Display for FormatParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.name, self.value)
    }
}

/// Turns persisted `name -> raw value` pairs back into typed parameters.
pub trait FormatParameterFactory: Send + Sync + fmt::Debug {
    fn create(&self, name: &str, raw: &str) -> FormatResult<FormatParameter>;
}

/// Factory for formats without a schema: everything is text except the
/// well-known boolean flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultParameterFactory;

impl FormatParameterFactory for DefaultParameterFactory {
    fn create(&self, name: &str, raw: &str) -> FormatResult<FormatParameter> {
        let kind = if name == COMPUTE_FILE_CHECKSUMS {
            ParameterKind::Boolean
        } else {
            ParameterKind::Text
        };
        Ok(FormatParameter::new(name, kind.parse(name, raw)?))
    }
}

/// Insertion-ordered parameter set with unique names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormatParameters {
    params: Vec<FormatParameter>,
}

impl FormatParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from `parameters`, failing on the first invalid or
    /// duplicate name.
    pub fn try_from_parameters(
        parameters: impl IntoIterator<Item = FormatParameter>,
    ) -> FormatResult<Self> {
        let mut set = Self::new();
        for parameter in parameters {
            set.add(parameter)?;
        }
        Ok(set)
    }

    /// Add a parameter; an existing one with the same name is kept and
    /// the call fails.
    pub fn add(&mut self, parameter: FormatParameter) -> FormatResult<()> {
        NodeName::new(parameter.name()).map_err(StorageError::from)?;
        if self.contains(parameter.name()) {
            return Err(FormatError::DuplicateParameter(parameter.name().to_string()));
        }
        self.params.push(parameter);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ParameterValue> {
        self.params.iter().find(|p| p.name == name).map(|p| &p.value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FormatParameter> {
        self.params.iter()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// The `compute-file-checksums` flag; on unless explicitly switched off.
    pub fn compute_file_checksums(&self) -> bool {
        match self.get(COMPUTE_FILE_CHECKSUMS) {
            Some(ParameterValue::Boolean(flag)) => *flag,
            Some(ParameterValue::Text(raw)) => !raw.trim().eq_ignore_ascii_case("false"),
            _ => true,
        }
    }

    /// Replace the content of `dir` with one file per parameter.
    pub fn save_to<M: AccessMode>(&self, dir: &Directory<M>) -> FormatResult<()> {
        for existing in dir.iter() {
            dir.remove_node(&existing?)?;
        }
        for parameter in &self.params {
            dir.add_key_value_pair(parameter.name(), &parameter.value().to_string())?;
        }
        debug!(count = self.params.len(), dir = %dir.path(), "saved format parameters");
        Ok(())
    }

    /// Load every parameter file in `dir` through `factory`.
    pub fn load_from<M: AccessMode>(
        dir: &Directory<M>,
        factory: &dyn FormatParameterFactory,
    ) -> FormatResult<Self> {
        let mut parameters = Self::new();
        for node in dir.iter() {
            let file = match node? {
                Node::File(file) => file,
                other => return Err(FormatError::UnsupportedParameterNode(other.path().clone())),
            };
            let raw = file.read_trimmed()?;
            parameters.add(factory.create(file.name(), &raw)?)?;
        }
        Ok(parameters)
    }
}

impl<'a> IntoIterator for &'a FormatParameters {
    type Item = &'a FormatParameter;
    type IntoIter = std::slice::Iter<'a, FormatParameter>;

    fn into_iter(self) -> Self::IntoIter {
        self.params.iter()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use std::sync::Arc;

    #[test]
    fn test_duplicate_keeps_first() {
        let mut parameters = FormatParameters::new();
        parameters.add(FormatParameter::new("channel", "dapi")).unwrap();
        let err = parameters.add(FormatParameter::new("channel", "gfp")).unwrap_err();
        assert!(matches!(err, FormatError::DuplicateParameter(ref name) if name == "channel"));
        assert_eq!(parameters.len(), 1);
        assert_eq!(parameters.get("channel").unwrap().as_text(), Some("dapi"));
    }

    #[test]
    fn test_invalid_name_rejected() {
        let mut parameters = FormatParameters::new();
        assert!(parameters.add(FormatParameter::new("a/b", "x")).is_err());
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!(
            ParameterKind::Boolean.parse("flag", "TRUE").unwrap(),
            ParameterValue::Boolean(true)
        );
        assert_eq!(
            ParameterKind::Integer.parse("n", " 12 ").unwrap(),
            ParameterValue::Integer(12)
        );
        assert!(ParameterKind::Integer.parse("n", "twelve").is_err());
        assert!(ParameterKind::Boolean.parse("flag", "yes").is_err());
    }

    #[test]
    fn test_compute_checksums_flag() {
        let mut parameters = FormatParameters::new();
        assert!(parameters.compute_file_checksums());
        parameters.add(FormatParameter::new(COMPUTE_FILE_CHECKSUMS, false)).unwrap();
        assert!(!parameters.compute_file_checksums());

        let text =
            FormatParameters::try_from_parameters([FormatParameter::new(COMPUTE_FILE_CHECKSUMS, "False")])
                .unwrap();
        assert!(!text.compute_file_checksums());
    }

    #[test]
    fn test_try_from_parameters_reports_bad_input() {
        let invalid = FormatParameters::try_from_parameters(vec![FormatParameter::new("a/b", "x")]);
        assert!(matches!(invalid, Err(FormatError::Storage(StorageError::InvalidName(_)))));

        let duplicate = FormatParameters::try_from_parameters(vec![
            FormatParameter::new("channel", "dapi"),
            FormatParameter::new("channel", "gfp"),
        ]);
        assert!(matches!(duplicate, Err(FormatError::DuplicateParameter(ref name)) if name == "channel"));
    }

    #[test]
    fn test_save_and_load_with_default_factory() {
        let root = Directory::root(Arc::new(MemoryStorage::new()));
        let dir = root.make_directory("parameters").unwrap();
        dir.add_key_value_pair("stale", "gone").unwrap();

        let parameters = FormatParameters::try_from_parameters(vec![
            FormatParameter::new(COMPUTE_FILE_CHECKSUMS, true),
            FormatParameter::new("plate-geometry", "16x24"),
        ])
        .unwrap();
        parameters.save_to(&dir).unwrap();
        assert!(!dir.contains("stale").unwrap());

        let loaded = FormatParameters::load_from(&dir, &DefaultParameterFactory).unwrap();
        assert_eq!(loaded.get(COMPUTE_FILE_CHECKSUMS), Some(&ParameterValue::Boolean(true)));
        assert_eq!(loaded.get("plate-geometry").unwrap().as_text(), Some("16x24"));
    }

    #[test]
    fn test_load_rejects_directories() {
        let root = Directory::root(Arc::new(MemoryStorage::new()));
        let dir = root.make_directory("parameters").unwrap();
        dir.make_directory("nested").unwrap();
        assert!(matches!(
            FormatParameters::load_from(&dir, &DefaultParameterFactory),
            Err(FormatError::UnsupportedParameterNode(_))
        ));
    }
}
