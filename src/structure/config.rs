//! Container configuration.

use std::sync::Arc;

use crate::format::{FormatRegistry, Version};
use crate::handler::LifecycleHandler;

/// Container configuration options.
#[derive(Debug)]
pub struct DataStructureConfig {
    /// Version written on create and required (backward compatibly) on open.
    pub version: Version,
    /// Formats known to this process.
    pub registry: Arc<FormatRegistry>,
    /// Custom handlers, run after the built-in checksum and mapping handlers.
    pub handlers: Vec<Box<dyn LifecycleHandler>>,
}

impl Default for DataStructureConfig {
    fn default() -> Self {
        Self {
            version: DataStructureConfig::CURRENT_VERSION,
            registry: Arc::new(FormatRegistry::new()),
            handlers: Vec::new(),
        }
    }
}

impl DataStructureConfig {
    /// Layout version produced by this crate.
    pub const CURRENT_VERSION: Version = Version::new(1, 0);

    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    pub fn registry(mut self, registry: impl Into<Arc<FormatRegistry>>) -> Self {
        self.registry = registry.into();
        self
    }

    pub fn handler(mut self, handler: impl LifecycleHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{Format, SchemaFormat};

    #[test]
    fn test_builder() {
        let registry = FormatRegistry::new()
            .with(SchemaFormat::new(Format::new("tiff-stack", Version::new(1, 0)), vec![]));
        let config = DataStructureConfig::new()
            .version(Version::new(1, 2))
            .registry(registry);
        assert_eq!(config.version, Version::new(1, 2));
        assert!(config.registry.is_registered("tiff-stack"));
        assert!(config.handlers.is_empty());
        assert_eq!(DataStructureConfig::default().version, DataStructureConfig::CURRENT_VERSION);
    }
}
