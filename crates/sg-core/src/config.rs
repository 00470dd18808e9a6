//! Storage configuration
//!
//! Tunables for the sample store and its undo history:
//! - Block sizes used by stream writers and readers
//! - Upper bound for segment length (new segments and defragmenting)
//! - Undo history limits (depth and memory)

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::{SgError, SgResult};

/// Default number of samples buffered by single-sample writes
pub const DEFAULT_WRITER_BLOCK_SIZE: usize = 16 * 1024;

/// Default number of samples a reader hands out per block
pub const DEFAULT_READER_BLOCK_SIZE: usize = 16 * 1024;

/// Default upper bound for merged segments (4M samples)
pub const DEFAULT_MAX_SEGMENT_LENGTH: usize = 4 * 1024 * 1024;

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Samples buffered by `ChannelWriter::push` before they are flushed
    pub writer_block_size: usize,
    /// Preferred read block size
    pub reader_block_size: usize,
    /// Segments are never created or merged beyond this length
    pub max_segment_length: usize,
    /// Undo history settings
    pub undo: UndoConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            writer_block_size: DEFAULT_WRITER_BLOCK_SIZE,
            reader_block_size: DEFAULT_READER_BLOCK_SIZE,
            max_segment_length: DEFAULT_MAX_SEGMENT_LENGTH,
            undo: UndoConfig::default(),
        }
    }
}

/// Undo history settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UndoConfig {
    /// Maximum number of transactions kept on the undo stack
    pub max_transactions: usize,
    /// Maximum memory held by undo data (bytes)
    pub max_memory_bytes: usize,
}

impl Default for UndoConfig {
    fn default() -> Self {
        Self {
            max_transactions: 100,
            max_memory_bytes: 256 * 1024 * 1024,
        }
    }
}

impl StorageConfig {
    /// Load configuration from a JSON file, a missing file yields the defaults
    pub fn load_from<P: AsRef<Path>>(path: P) -> SgResult<Self> {
        let path = path.as_ref();
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("no storage config at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };

        let config: Self = serde_json::from_str(&content)
            .map_err(|e| SgError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> SgResult<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(self).map_err(|e| SgError::Config(e.to_string()))?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Reject settings the store cannot work with
    pub fn validate(&self) -> SgResult<()> {
        if self.writer_block_size == 0 {
            return Err(SgError::Config("writer_block_size must be > 0".into()));
        }
        if self.reader_block_size == 0 {
            return Err(SgError::Config("reader_block_size must be > 0".into()));
        }
        if self.max_segment_length == 0 {
            return Err(SgError::Config("max_segment_length must be > 0".into()));
        }
        if self.undo.max_transactions == 0 {
            return Err(SgError::Config("undo.max_transactions must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = StorageConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.writer_block_size, DEFAULT_WRITER_BLOCK_SIZE);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig::load_from(dir.path().join("nope.json")).unwrap();
        assert_eq!(config, StorageConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/storage.json");

        let mut config = StorageConfig::default();
        config.writer_block_size = 512;
        config.undo.max_transactions = 7;
        config.save_to(&path).unwrap();

        let loaded = StorageConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.json");
        fs::write(&path, r#"{ "undo": { "max_transactions": 3 } }"#).unwrap();

        let loaded = StorageConfig::load_from(&path).unwrap();
        assert_eq!(loaded.undo.max_transactions, 3);
        assert_eq!(loaded.undo.max_memory_bytes, UndoConfig::default().max_memory_bytes);
        assert_eq!(loaded.reader_block_size, DEFAULT_READER_BLOCK_SIZE);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.json");
        fs::write(&path, r#"{ "writer_block_size": 0 }"#).unwrap();
        assert!(matches!(
            StorageConfig::load_from(&path),
            Err(SgError::Config(_))
        ));

        fs::write(&path, "not json").unwrap();
        assert!(matches!(
            StorageConfig::load_from(&path),
            Err(SgError::Config(_))
        ));
    }
}
