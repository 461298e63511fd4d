//! # Chunkup Core Library
//!
//! `chunkup-core` provides the core functionality for Chunkup, a resumable
//! chunked file upload system.
//!
//! A client splits a file into fixed-size chunks and sends them strictly in
//! order. The server appends each accepted chunk to a destination file and
//! never persists corrupted or out-of-order data. Uploads can be paused,
//! resumed and aborted mid-transfer.
//!
//! ## Modules
//!
//! - [`catalog`] - Durable catalog of completed uploads
//! - [`chunk`] - Chunk splitting, reading and checksums
//! - [`client`] - Upload state machine, transfer channel and multi-file uploader
//! - [`config`] - Configuration management
//! - [`naming`] - Destination filename normalization
//! - [`protocol`] - Wire types shared by server and client
//! - [`receiver`] - Server-side chunk receiver, finalizer and abort
//! - [`session`] - In-flight upload sessions and their metadata store
//! - [`storage`] - Local file storage primitives
//! - [`web`] - HTTP server exposing the upload API
//!
//! ## Example
//!
//! ```rust,ignore
//! use chunkup_core::client::{HttpTransport, Uploader};
//!
//! let transport = HttpTransport::new("http://localhost:8080")?;
//! let uploader = Uploader::new(transport, chunkup_core::DEFAULT_CHUNK_SIZE);
//! let ids = uploader.add_files(vec!["video.mp4".into()]).await?;
//! uploader.start_all().await;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod catalog;
pub mod chunk;
pub mod client;
pub mod config;
pub mod error;
pub mod naming;
pub mod protocol;
pub mod receiver;
pub mod session;
pub mod storage;

#[cfg(feature = "web")]
pub mod web;

pub use error::{Error, ErrorKind, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default chunk size for uploads (2 MiB)
pub const DEFAULT_CHUNK_SIZE: u64 = 2 * 1024 * 1024;

/// Largest chunk payload the server accepts by default (10 MiB)
pub const DEFAULT_MAX_CHUNK_SIZE: u64 = 10 * 1024 * 1024;

/// Maximum length of an original filename, in characters
pub const MAX_ORIGINAL_NAME_LEN: usize = 255;

/// Maximum length of a client-chosen upload identifier
pub const MAX_UPLOAD_ID_LEN: usize = 128;

/// Default HTTP port for the upload server
pub const DEFAULT_PORT: u16 = 8080;

/// Directory under the storage root that holds destination files
pub const UPLOADS_DIR: &str = "uploads";
