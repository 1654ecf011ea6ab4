//! Runtime configuration types.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;

/// Default size of one semispace.
pub const DEFAULT_HEAP_SIZE: usize = 1024 * 1024;

/// Runtime configuration for the VM.
///
/// Every field may be omitted from a config file:
///
/// ```toml
/// heap_size = 65536
/// gc_stats = true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Bytes per semispace. The heap reserves twice this.
    pub heap_size: usize,
    /// Report collector statistics when the program finishes.
    pub gc_stats: bool,
    /// Log every dispatched instruction at trace level.
    pub trace: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            heap_size: DEFAULT_HEAP_SIZE,
            gc_stats: false,
            trace: false,
        }
    }
}

impl RuntimeConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let source = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_is_default() {
        assert_eq!(
            RuntimeConfig::from_toml_str("").unwrap(),
            RuntimeConfig::default()
        );
    }

    #[test]
    fn test_partial_config() {
        let config = RuntimeConfig::from_toml_str("heap_size = 4096\n").unwrap();
        assert_eq!(config.heap_size, 4096);
        assert!(!config.gc_stats);
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(RuntimeConfig::from_toml_str("jit = true\n").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kiln.toml");
        fs::write(&path, "gc_stats = true\ntrace = true\n").unwrap();
        let config = RuntimeConfig::load(&path).unwrap();
        assert!(config.gc_stats);
        assert!(config.trace);
        assert_eq!(config.heap_size, DEFAULT_HEAP_SIZE);
    }

    #[test]
    fn test_missing_file() {
        let err = RuntimeConfig::load(Path::new("/nonexistent/kiln.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
