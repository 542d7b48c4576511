//! Error types for Rewind

use std::io;
use thiserror::Error;

use crate::key::CacheKey;

/// Result type for Rewind operations
pub type Result<T> = std::result::Result<T, RewindError>;

/// Boxed error returned by an underlying network transport
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur in Rewind
#[derive(Debug, Error)]
pub enum RewindError {
    /// The wrapped network transport failed
    #[error("Transport error: {0}")]
    Transport(#[source] BoxError),

    /// I/O failure on the storage medium
    #[error("Storage I/O error: {0}")]
    Storage(#[from] io::Error),

    /// Stored exchange is not in a format this version can read
    #[error("Invalid exchange format: {0}")]
    InvalidFormat(String),

    /// Stored exchange failed its checksum
    #[error("Exchange corrupted at offset {offset}: expected CRC {expected:#x}, got {actual:#x}")]
    CorruptedData {
        /// Offset where corruption was detected
        offset: u64,
        /// Expected CRC32 value
        expected: u32,
        /// Actual CRC32 value
        actual: u32,
    },

    /// Replay found nothing stored for the request
    #[error("No recording found for {method} {url} (key {key})")]
    NoRecordingFound {
        /// Derived key that missed
        key: CacheKey,
        /// Request method
        method: String,
        /// Request URL
        url: String,
    },

    /// The caller cancelled the request
    #[error("Request cancelled")]
    Cancelled,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Request could not be turned into a network request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Text is not a valid cache key
    #[error("Invalid cache key: {0}")]
    InvalidKey(String),

    /// Storage scope name rejected
    #[error("Invalid scope name: {0}")]
    InvalidScope(String),

    /// Request/response too large
    #[error("Data too large: {size} bytes exceeds limit of {limit} bytes")]
    DataTooLarge {
        /// Actual size, or one past the limit when a streamed body was cut off
        size: usize,
        /// Size limit
        limit: usize,
    },
}

impl RewindError {
    /// Wrap any error raised by a network transport
    pub fn transport(error: impl Into<BoxError>) -> Self {
        Self::Transport(error.into())
    }

    /// True for failures of the persistence medium, including unreadable data
    #[must_use]
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            Self::Storage(_) | Self::InvalidFormat(_) | Self::CorruptedData { .. }
        )
    }

    /// True when the caller cancelled the request
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
