//! Error types for rangepull core

use rangepull_types::JobStage;
use thiserror::Error;

/// Errors that can occur in rangepull core
#[derive(Debug, Error)]
pub enum RangepullError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Unsupported for ranged download: {0}")]
    UnsupportedRange(String),

    #[error("Server error: {status} - {message}")]
    ServerError { status: u16, message: String },

    #[error("Chunk {index} length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch { index: u32, expected: u64, actual: u64 },

    #[error("Worker pool is stopped")]
    PoolClosed,

    #[error("Download was cancelled")]
    Cancelled,

    #[error("Timeout")]
    Timeout,

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Probe failed: {0}")]
    Probe(#[source] Box<RangepullError>),

    #[error("Chunk {index} failed: {source}")]
    Chunk {
        index: u32,
        #[source]
        source: Box<RangepullError>,
    },

    #[error("Reassembly failed: {0}")]
    Reassembly(#[source] Box<RangepullError>),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl RangepullError {
    pub fn chunk(index: u32, source: RangepullError) -> Self {
        RangepullError::Chunk {
            index,
            source: Box::new(source),
        }
    }

    /// The innermost error, with stage wrappers peeled off
    pub fn root(&self) -> &RangepullError {
        match self {
            RangepullError::Probe(inner)
            | RangepullError::Chunk { source: inner, .. }
            | RangepullError::Reassembly(inner) => inner.root(),
            other => other,
        }
    }

    /// Job stage the error was raised in, when it carries one
    pub fn stage(&self) -> Option<JobStage> {
        match self {
            RangepullError::Probe(_) | RangepullError::UnsupportedRange(_) => {
                Some(JobStage::Probing)
            }
            RangepullError::Chunk { .. } | RangepullError::LengthMismatch { .. } => {
                Some(JobStage::Aggregating)
            }
            RangepullError::Reassembly(_) => Some(JobStage::Reassembling),
            _ => None,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self.root() {
            RangepullError::Network(e) => !e.is_builder(),
            RangepullError::Timeout | RangepullError::LengthMismatch { .. } => true,
            RangepullError::ServerError { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Maps a reqwest failure, folding timeouts into [`RangepullError::Timeout`]
    pub(crate) fn from_request(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            RangepullError::Timeout
        } else {
            RangepullError::Network(error)
        }
    }
}

impl From<RangepullError> for String {
    fn from(error: RangepullError) -> Self {
        error.to_string()
    }
}
