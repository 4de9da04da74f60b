//! Error types for the bramble storage engine.

use thiserror::Error;

/// Result type alias using BrambleError.
pub type Result<T> = std::result::Result<T, BrambleError>;

/// Errors that can occur in bramble operations.
#[derive(Debug, Error)]
pub enum BrambleError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // File-format errors
    #[error("corrupt header: {reason}")]
    CorruptHeader { reason: String },

    #[error("stream is not open")]
    StreamClosed,

    #[error("page out of range: {page_num} (last allocated: {last})")]
    PageOutOfRange { page_num: u32, last: u32 },

    // Parameter errors
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    // Structural errors
    #[error("invariant violation: {0}")]
    InvariantViolation(&'static str),

    // Indexer errors
    #[error("file not indexed: {0}")]
    NotIndexed(String),
}

impl BrambleError {
    /// Shorthand for a CorruptHeader with a formatted reason.
    pub fn corrupt(reason: impl Into<String>) -> Self {
        BrambleError::CorruptHeader {
            reason: reason.into(),
        }
    }

    /// Shorthand for an InvalidArgument with a formatted message.
    pub fn invalid(msg: impl Into<String>) -> Self {
        BrambleError::InvalidArgument(msg.into())
    }
}
