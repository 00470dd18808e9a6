//! Error types for Segwave

use thiserror::Error;

/// Core error type
#[derive(Error, Debug)]
pub enum SgError {
    /// Growing a segment failed, nothing was changed
    #[error("Out of memory: could not allocate {requested} samples")]
    OutOfMemory { requested: usize },

    #[error("Out of range: {length} samples at offset {offset}, only {available} available")]
    OutOfRange {
        offset: usize,
        length: usize,
        available: usize,
    },

    /// An overwrite would have crossed the right bound of its writer
    #[error("Range exceeded: {count} samples at position {position} cross right bound {right}")]
    RangeExceeded {
        position: usize,
        count: usize,
        right: usize,
    },

    #[error("Writer already closed")]
    WriterClosed,

    #[error("Invalid channel index: {0}")]
    InvalidChannel(usize),

    #[error("Invalid range: [{left}, {right}]")]
    InvalidRange { left: usize, right: usize },

    /// One sample block per selected channel is required
    #[error("Expected {expected} sample blocks, got {actual}")]
    BlockCount { expected: usize, actual: usize },

    /// Undo data and signal no longer agree, there is no way back
    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SgError {
    /// Errors caused by a caller asking for something outside the signal
    pub fn is_range_error(&self) -> bool {
        matches!(
            self,
            Self::OutOfRange { .. } | Self::RangeExceeded { .. } | Self::InvalidRange { .. }
        )
    }
}

/// Result type alias
pub type SgResult<T> = Result<T, SgError>;
