//! Upload client.
//!
//! - [`ClientUpload`] drives one file through the chunk protocol and supports
//!   pause, resume and abort mid-transfer.
//! - [`Uploader`] manages several uploads and runs them concurrently.
//! - [`ChunkTransport`] is the request primitive both use; [`LocalTransport`]
//!   calls an in-process receiver and `HttpTransport` talks to a server.
//!
//! Resumption state lives in memory only. A restarted client starts its
//! uploads over with fresh ids.

mod throughput;
mod transport;
mod upload;
mod uploader;

pub use throughput::ThroughputEstimator;
#[cfg(feature = "http")]
pub use transport::HttpTransport;
pub use transport::{ChunkTransport, LocalTransport};
pub use upload::{
    ClientUpload, RunOutcome, UploadEvent, UploadSnapshot, UploadStats, UploadStatus,
    EVENT_CAPACITY,
};
pub use uploader::{generate_upload_id, Uploader, UPLOAD_ID_LEN};
