//! Error types for Chunkup.
//!
//! This module provides a unified error type for all Chunkup operations,
//! with specific error variants for different failure modes. Every variant
//! falls into one [`ErrorKind`], which decides how the HTTP layer reports it
//! and how the upload state machine reacts to it.

use std::io;

use thiserror::Error;

/// A specialized `Result` type for Chunkup operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Broad classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed request, rejected before any mutation
    Validation,
    /// Chunk content does not match its checksum
    Integrity,
    /// Chunk index does not match the expected next chunk
    Ordering,
    /// Storage could not be opened or written
    Resource,
    /// Referenced record does not exist
    NotFound,
    /// Network or remote failure seen by the client
    Transport,
    /// Operation was cancelled locally
    Cancelled,
    /// Anything else
    Other,
}

/// The main error type for Chunkup.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed chunk request (E101)
    #[error("invalid chunk request: {0}")]
    InvalidChunk(String),

    /// Checksum mismatch detected (E102)
    #[error("chunk {chunk} of upload '{upload_id}' is corrupted: checksum mismatch")]
    ChecksumMismatch {
        /// The upload the chunk belongs to
        upload_id: String,
        /// The chunk index that failed
        chunk: u64,
    },

    /// Chunk arrived out of order (E103)
    #[error("chunks must be uploaded in order: expected {expected}, received {received}")]
    OutOfOrder {
        /// Index the server expects next
        expected: u64,
        /// Index that was submitted
        received: u64,
    },

    /// Storage could not be opened for writing (E104)
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Completed upload not found (E105)
    #[error("upload '{0}' not found")]
    UploadNotFound(String),

    /// Transport failure while talking to the server (E106)
    #[error("transport error: {0}")]
    Transport(String),

    /// Server rejected the request without a recognised error code
    #[error("server rejected request ({status}): {message}")]
    Rejected {
        /// HTTP status code
        status: u16,
        /// Message reported by the server
        message: String,
    },

    /// Upload was cancelled
    #[error("upload cancelled")]
    Cancelled,

    /// File is empty and cannot be uploaded
    #[error("file '{0}' is empty")]
    EmptyFile(String),

    /// All chunks were sent but the server never confirmed completion
    #[error("upload '{0}' finished sending without a completion acknowledgement")]
    IncompleteUpload(String),

    /// Invalid path
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Configuration file error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Invalid configuration value
    #[error("invalid configuration value for '{key}': {reason}")]
    InvalidConfig {
        /// Configuration key
        key: String,
        /// Reason for invalidity
        reason: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Internal error (should not happen)
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns the error code associated with this error, if any.
    ///
    /// Error codes follow the pattern EXXX where XXX is a 3-digit number.
    #[must_use]
    pub const fn code(&self) -> Option<&'static str> {
        match self {
            Self::InvalidChunk(_) => Some("E101"),
            Self::ChecksumMismatch { .. } => Some("E102"),
            Self::OutOfOrder { .. } => Some("E103"),
            Self::StorageUnavailable(_) => Some("E104"),
            Self::UploadNotFound(_) => Some("E105"),
            Self::Transport(_) => Some("E106"),
            _ => None,
        }
    }

    /// Returns the broad classification of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidChunk(_) | Self::InvalidPath(_) | Self::EmptyFile(_) => {
                ErrorKind::Validation
            }
            Self::ChecksumMismatch { .. } => ErrorKind::Integrity,
            Self::OutOfOrder { .. } => ErrorKind::Ordering,
            Self::StorageUnavailable(_) | Self::Io(_) => ErrorKind::Resource,
            Self::UploadNotFound(_) => ErrorKind::NotFound,
            Self::Transport(_) | Self::Rejected { .. } | Self::IncompleteUpload(_) => {
                ErrorKind::Transport
            }
            Self::Cancelled => ErrorKind::Cancelled,
            _ => ErrorKind::Other,
        }
    }

    /// Returns whether this error is recoverable (can be retried).
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ChecksumMismatch { .. }
                | Self::StorageUnavailable(_)
                | Self::Transport(_)
                | Self::Io(_)
        )
    }

    /// Returns a helpful suggestion for resolving the error, if applicable.
    #[must_use]
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::Transport(_) => Some(
                "Check that the server is running and reachable, then resume the upload.",
            ),
            Self::StorageUnavailable(_) => Some(
                "Check that the server's storage directory exists and is writable.",
            ),
            Self::EmptyFile(_) => Some("Empty files cannot be uploaded."),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::InvalidChunk("x".into()).code(), Some("E101"));
        assert_eq!(
            Error::OutOfOrder {
                expected: 2,
                received: 5
            }
            .code(),
            Some("E103")
        );
        assert_eq!(Error::Cancelled.code(), None);
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            Error::ChecksumMismatch {
                upload_id: "a".into(),
                chunk: 0
            }
            .kind(),
            ErrorKind::Integrity
        );
        assert_eq!(
            Error::Io(io::Error::other("disk")).kind(),
            ErrorKind::Resource
        );
        assert_eq!(Error::Cancelled.kind(), ErrorKind::Cancelled);
        assert_eq!(
            Error::EmptyFile("a.txt".into()).kind(),
            ErrorKind::Validation
        );
    }

    #[test]
    fn test_out_of_order_message_carries_both_indices() {
        let msg = Error::OutOfOrder {
            expected: 3,
            received: 7,
        }
        .to_string();
        assert!(msg.contains("expected 3"));
        assert!(msg.contains("received 7"));
    }

    #[test]
    fn test_recoverable() {
        assert!(Error::Transport("reset".into()).is_recoverable());
        assert!(!Error::InvalidChunk("bad".into()).is_recoverable());
    }
}
