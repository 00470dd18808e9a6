//! sg-core: Shared types for the Segwave sample store
//!
//! This crate provides the foundational types used across all Segwave crates:
//! the sample type, the error taxonomy and the storage configuration.

mod config;
mod error;
mod sample;

pub use config::*;
pub use error::*;
pub use sample::*;

/// Where and how a stream writer puts its samples into a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum InsertMode {
    /// Append behind the last sample, the range is ignored
    Append,
    /// Insert at the left bound, everything behind it moves right
    Insert,
    /// Overwrite in place within `[left, right]`
    Overwrite,
}

impl std::fmt::Display for InsertMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Append => f.write_str("append"),
            Self::Insert => f.write_str("insert"),
            Self::Overwrite => f.write_str("overwrite"),
        }
    }
}
