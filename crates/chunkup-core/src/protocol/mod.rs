//! Wire types shared by the upload server and client.
//!
//! ## Chunk submit
//!
//! `POST /upload/chunk` with a multipart body:
//!
//! | Field | Content |
//! |-------|---------|
//! | `chunk` | chunk bytes |
//! | `chunkIndex` | zero-based index |
//! | `totalChunks` | number of chunks in the file |
//! | `originalName` | client-side file name |
//! | `fileIdentifier` | client-chosen upload id |
//! | `checksum` | optional SHA-256 hex of the chunk |
//!
//! The reply is a [`ChunkReceipt`]; failures carry an [`ErrorBody`].
//!
//! ## Abort
//!
//! `POST /upload/abort` with an [`AbortRequest`] JSON body, answered by an
//! [`AbortResponse`] whether or not a session existed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::catalog::CompletedUpload;
use crate::error::{Error, Result};

/// Multipart field carrying the chunk bytes.
pub const FIELD_CHUNK: &str = "chunk";
/// Multipart field carrying the chunk index.
pub const FIELD_CHUNK_INDEX: &str = "chunkIndex";
/// Multipart field carrying the total chunk count.
pub const FIELD_TOTAL_CHUNKS: &str = "totalChunks";
/// Multipart field carrying the original file name.
pub const FIELD_ORIGINAL_NAME: &str = "originalName";
/// Multipart field carrying the upload id.
pub const FIELD_FILE_IDENTIFIER: &str = "fileIdentifier";
/// Multipart field carrying the optional checksum.
pub const FIELD_CHECKSUM: &str = "checksum";

/// Chunk submit route.
pub const ROUTE_CHUNK: &str = "/upload/chunk";
/// Abort route.
pub const ROUTE_ABORT: &str = "/upload/abort";
/// Catalog listing route.
pub const ROUTE_UPLOADS: &str = "/uploads";

/// One chunk of one upload, as handed to the receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRequest {
    /// Client-chosen upload id
    pub upload_id: String,
    /// Zero-based chunk index
    pub chunk_index: u64,
    /// Number of chunks in the file
    pub total_chunks: u64,
    /// Client-side file name
    pub original_name: String,
    /// Chunk bytes
    pub payload: Vec<u8>,
    /// Optional SHA-256 hex of `payload`
    pub checksum: Option<String>,
}

/// Result of a successfully accepted chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// More chunks are expected.
    InProgress {
        /// Chunks accepted so far
        uploaded_chunks: u64,
        /// Number of chunks in the file
        total_chunks: u64,
    },
    /// The last chunk was accepted and the upload finalized.
    Completed {
        /// Storage key of the final file
        file_path: String,
        /// Catalog record created for the upload
        upload: CompletedUpload,
    },
}

impl ChunkOutcome {
    /// Whether this outcome finished the upload.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// Public view of a completed upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResource {
    /// Record id
    pub id: Uuid,
    /// Stored file name
    pub name: String,
    /// Name the client supplied
    pub original_name: String,
    /// Storage key of the file
    pub file_path: String,
    /// Guessed MIME type
    pub mime_type: Option<String>,
    /// Size in bytes
    pub file_size: u64,
    /// Size formatted for display
    pub file_size_human: String,
    /// Relative download URL
    pub download_url: String,
    /// Completion time
    pub created_at: DateTime<Utc>,
}

impl From<&CompletedUpload> for UploadResource {
    fn from(upload: &CompletedUpload) -> Self {
        Self {
            id: upload.id,
            name: upload.name.clone(),
            original_name: upload.original_name.clone(),
            file_path: upload.file_path.clone(),
            mime_type: upload.mime_type.clone(),
            file_size: upload.file_size,
            file_size_human: crate::storage::format_size(upload.file_size),
            download_url: format!("/upload/{}/download", upload.id),
            created_at: upload.created_at,
        }
    }
}

impl From<UploadResource> for CompletedUpload {
    fn from(resource: UploadResource) -> Self {
        Self {
            id: resource.id,
            name: resource.name,
            original_name: resource.original_name,
            file_path: resource.file_path,
            mime_type: resource.mime_type,
            file_size: resource.file_size,
            created_at: resource.created_at,
        }
    }
}

/// Reply to an accepted chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkReceipt {
    /// Human-readable status
    pub message: String,
    /// Whether the upload is finished
    pub completed: bool,
    /// Chunks accepted so far (in progress only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded_chunks: Option<u64>,
    /// Number of chunks (in progress only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<u64>,
    /// Storage key of the final file (completed only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    /// Catalog record (completed only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload: Option<UploadResource>,
}

impl From<&ChunkOutcome> for ChunkReceipt {
    fn from(outcome: &ChunkOutcome) -> Self {
        match outcome {
            ChunkOutcome::InProgress {
                uploaded_chunks,
                total_chunks,
            } => Self {
                message: "chunk uploaded".into(),
                completed: false,
                uploaded_chunks: Some(*uploaded_chunks),
                total_chunks: Some(*total_chunks),
                file_path: None,
                upload: None,
            },
            ChunkOutcome::Completed { file_path, upload } => Self {
                message: "success".into(),
                completed: true,
                uploaded_chunks: None,
                total_chunks: None,
                file_path: Some(file_path.clone()),
                upload: Some(UploadResource::from(upload)),
            },
        }
    }
}

impl ChunkReceipt {
    /// Convert a decoded reply back into a [`ChunkOutcome`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if a field required by the reply's
    /// `completed` flag is missing.
    pub fn into_outcome(self) -> Result<ChunkOutcome> {
        if self.completed {
            let upload = self
                .upload
                .ok_or_else(|| Error::Transport("completion reply without upload".into()))?;
            let file_path = self.file_path.unwrap_or_else(|| upload.file_path.clone());
            Ok(ChunkOutcome::Completed {
                file_path,
                upload: upload.into(),
            })
        } else {
            match (self.uploaded_chunks, self.total_chunks) {
                (Some(uploaded_chunks), Some(total_chunks)) => Ok(ChunkOutcome::InProgress {
                    uploaded_chunks,
                    total_chunks,
                }),
                _ => Err(Error::Transport(
                    "progress reply without chunk counts".into(),
                )),
            }
        }
    }
}

/// Error reply body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    /// Human-readable error message
    pub error: String,
    /// Error code (e.g. "E103" for out-of-order chunks)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Index the server expects next (ordering errors only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_chunk: Option<u64>,
    /// Index that was submitted (ordering errors only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_chunk: Option<u64>,
    /// Additional details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorBody {
    /// Rebuild the typed error a server reply describes.
    #[must_use]
    pub fn into_error(self, status: u16) -> Error {
        match (self.code.as_deref(), self.expected_chunk, self.received_chunk) {
            (Some("E103") | None, Some(expected), Some(received)) => {
                Error::OutOfOrder { expected, received }
            }
            (Some("E101"), ..) => Error::InvalidChunk(self.error),
            (Some("E102"), ..) => Error::ChecksumMismatch {
                upload_id: String::new(),
                chunk: self.received_chunk.unwrap_or_default(),
            },
            (Some("E104"), ..) => Error::StorageUnavailable(self.error),
            (Some("E105"), ..) => Error::UploadNotFound(self.error),
            _ => Error::Rejected {
                status,
                message: self.error,
            },
        }
    }
}

/// Body of an abort request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbortRequest {
    /// Upload id to abort
    pub file_identifier: String,
}

/// Reply to an abort request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbortResponse {
    /// Human-readable status
    pub message: String,
}

impl Default for AbortResponse {
    fn default() -> Self {
        Self {
            message: "Upload aborted and cleaned up".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_progress_receipt_json() {
        let outcome = ChunkOutcome::InProgress {
            uploaded_chunks: 2,
            total_chunks: 3,
        };
        let json = serde_json::to_value(ChunkReceipt::from(&outcome)).unwrap();

        assert_eq!(json["completed"], false);
        assert_eq!(json["uploadedChunks"], 2);
        assert_eq!(json["totalChunks"], 3);
        assert!(json.get("upload").is_none());
    }

    #[test]
    fn test_completed_receipt_json() {
        let upload = CompletedUpload::new("a_1_x.bin", 5_242_880);
        let outcome = ChunkOutcome::Completed {
            file_path: upload.file_path.clone(),
            upload: upload.clone(),
        };
        let json = serde_json::to_value(ChunkReceipt::from(&outcome)).unwrap();

        assert_eq!(json["completed"], true);
        assert_eq!(json["filePath"], "uploads/a_1_x.bin");
        assert_eq!(json["upload"]["file_size"], 5_242_880);
        assert_eq!(json["upload"]["file_size_human"], "5.0 MB");
        assert_eq!(
            json["upload"]["download_url"],
            format!("/upload/{}/download", upload.id)
        );
    }

    #[test]
    fn test_receipt_back_to_outcome() {
        let upload = CompletedUpload::new("a_1_x.bin", 7);
        let outcome = ChunkOutcome::Completed {
            file_path: upload.file_path.clone(),
            upload,
        };
        let receipt: ChunkReceipt =
            serde_json::from_str(&serde_json::to_string(&ChunkReceipt::from(&outcome)).unwrap())
                .unwrap();

        assert_eq!(receipt.into_outcome().unwrap(), outcome);
    }

    #[test]
    fn test_incomplete_receipt_rejected() {
        let receipt = ChunkReceipt {
            message: "chunk uploaded".into(),
            completed: false,
            uploaded_chunks: None,
            total_chunks: Some(3),
            file_path: None,
            upload: None,
        };
        assert!(receipt.into_outcome().is_err());
    }

    #[test]
    fn test_error_body_ordering() {
        let body: ErrorBody = serde_json::from_str(
            r#"{"error":"Chunks must be uploaded in order","expectedChunk":4,"receivedChunk":2}"#,
        )
        .unwrap();

        assert!(matches!(
            body.into_error(400),
            Error::OutOfOrder {
                expected: 4,
                received: 2
            }
        ));
    }

    #[test]
    fn test_error_body_unknown_code() {
        let body = ErrorBody {
            error: "teapot".into(),
            code: None,
            expected_chunk: None,
            received_chunk: None,
            details: None,
        };
        assert!(matches!(
            body.into_error(418),
            Error::Rejected { status: 418, .. }
        ));
    }

    #[test]
    fn test_abort_request_field_name() {
        let json = serde_json::to_string(&AbortRequest {
            file_identifier: "abc".into(),
        })
        .unwrap();
        assert_eq!(json, r#"{"fileIdentifier":"abc"}"#);
    }
}
