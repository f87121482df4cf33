//! Versions and format identities.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::storage::{AccessMode, Directory, StorageError, StorageResult};

/// A `major.minor` version.
///
/// Data written with version `a.b` can be read by code expecting `c.d`
/// if `a == c` and `b >= d`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
}

impl Version {
    pub const MAJOR: &'static str = "major";
    pub const MINOR: &'static str = "minor";

    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Check whether data with this version can be read by code expecting
    /// `expected`.
    pub fn is_backward_compatible_with(&self, expected: &Version) -> bool {
        self.major == expected.major && self.minor >= expected.minor
    }

    /// Write `major` and `minor` files into `dir`.
    pub fn save_to<M: AccessMode>(&self, dir: &Directory<M>) -> StorageResult<()> {
        dir.add_key_value_pair(Self::MAJOR, &self.major.to_string())?;
        dir.add_key_value_pair(Self::MINOR, &self.minor.to_string())?;
        Ok(())
    }

    /// Read a version saved with [`Version::save_to`].
    pub fn load_from<M: AccessMode>(dir: &Directory<M>) -> StorageResult<Self> {
        let number = |name: &str| -> StorageResult<u32> {
            let file = dir.get_file(name)?;
            let raw = file.read_trimmed()?;
            raw.parse().map_err(|_| StorageError::CorruptedData {
                path: file.path().clone(),
                reason: format!("'{}' is not a version number", raw),
            })
        };
        Ok(Self::new(number(Self::MAJOR)?, number(Self::MINOR)?))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "V{}.{}", self.major, self.minor)
    }
}

/// Identity of a payload format: code, version and optional variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Format {
    code: String,
    version: Version,
    variant: Option<String>,
}

impl Format {
    const CODE: &'static str = "code";
    const VERSION: &'static str = "version";
    const VARIANT: &'static str = "variant";

    pub fn new(code: impl Into<String>, version: Version) -> Self {
        Self {
            code: code.into(),
            version,
            variant: None,
        }
    }

    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = Some(variant.into());
        self
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn variant(&self) -> Option<&str> {
        self.variant.as_deref()
    }

    /// Persist into an empty `format/` directory.
    pub fn save_to<M: AccessMode>(&self, dir: &Directory<M>) -> StorageResult<()> {
        dir.add_key_value_pair(Self::CODE, &self.code)?;
        self.version.save_to(&dir.make_directory(Self::VERSION)?)?;
        if let Some(variant) = &self.variant {
            dir.add_key_value_pair(Self::VARIANT, variant)?;
        }
        Ok(())
    }

    pub fn load_from<M: AccessMode>(dir: &Directory<M>) -> StorageResult<Self> {
        let code = dir.get_file(Self::CODE)?.read_trimmed()?;
        let version = Version::load_from(&dir.get_directory(Self::VERSION)?)?;
        let variant = match dir.try_get_node(Self::VARIANT)?.and_then(|n| n.try_as_file()) {
            Some(file) => Some(file.read_trimmed()?),
            None => None,
        };
        Ok(Self {
            code,
            version,
            variant,
        })
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.version)?;
        if let Some(variant) = &self.variant {
            write!(f, " [{}]", variant)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use std::sync::Arc;

    #[test]
    fn test_backward_compatibility() {
        let expected = Version::new(1, 2);
        assert!(Version::new(1, 2).is_backward_compatible_with(&expected));
        assert!(Version::new(1, 5).is_backward_compatible_with(&expected));
        assert!(!Version::new(1, 1).is_backward_compatible_with(&expected));
        assert!(!Version::new(2, 0).is_backward_compatible_with(&Version::new(1, 0)));
    }

    #[test]
    fn test_format_persistence() {
        let root = Directory::root(Arc::new(MemoryStorage::new()));
        let dir = root.make_directory("format").unwrap();
        let format = Format::new("tiff-stack", Version::new(1, 3)).with_variant("hcs");
        format.save_to(&dir).unwrap();

        assert_eq!(
            dir.get_directory("version").unwrap().get_file("minor").unwrap().read_string().unwrap(),
            "3\n"
        );
        let loaded = Format::load_from(&dir.into_read_only()).unwrap();
        assert_eq!(loaded, format);
        assert_eq!(loaded.to_string(), "tiff-stack V1.3 [hcs]");
    }

    #[test]
    fn test_corrupted_version() {
        let root = Directory::root(Arc::new(MemoryStorage::new()));
        root.add_key_value_pair("major", "one").unwrap();
        root.add_key_value_pair("minor", "0").unwrap();
        assert!(matches!(
            Version::load_from(&root),
            Err(StorageError::CorruptedData { .. })
        ));
    }
}
