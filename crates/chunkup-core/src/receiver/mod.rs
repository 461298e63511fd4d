//! Server-side chunk receiver.
//!
//! [`ChunkReceiver::receive`] handles one chunk at a time:
//!
//! 1. validate the request
//! 2. verify the checksum, if one was supplied
//! 3. load the session for the upload id, or start one
//! 4. check that the chunk is the one the session expects next
//! 5. persist a new session, then append the payload to the destination file
//! 6. advance the session
//! 7. finalize on the last chunk, otherwise persist the session
//!
//! Any rejection in steps 1-4 leaves the destination file and the session
//! untouched, so the destination is always the in-order concatenation of the
//! accepted chunks. Chunks for the same upload id are serialized by a per-id
//! lock; different uploads proceed concurrently.
//!
//! A session whose file is already in the catalog belongs to an upload that
//! was finalized before its session could be removed. Resending the last
//! chunk for it returns the existing record instead of finalizing again.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::OwnedMutexGuard;

use crate::catalog::{Catalog, CompletedUpload};
use crate::chunk::verify_checksum;
use crate::error::{Error, Result};
use crate::naming::normalize_filename;
use crate::protocol::{ChunkOutcome, ChunkRequest};
use crate::session::{validate_upload_id, SessionStore, UploadSession};
use crate::storage::LocalStorage;

/// Async mutexes keyed by upload id, dropped once nobody holds them.
#[derive(Debug, Default)]
struct KeyedLocks {
    inner: Mutex<HashMap<String, Weak<tokio::sync::Mutex<()>>>>,
}

impl KeyedLocks {
    async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            map.retain(|_, weak| weak.strong_count() > 0);

            if let Some(existing) = map.get(key).and_then(Weak::upgrade) {
                existing
            } else {
                let created = Arc::new(tokio::sync::Mutex::new(()));
                map.insert(key.to_string(), Arc::downgrade(&created));
                created
            }
        };

        mutex.lock_owned().await
    }
}

/// Reassembles uploads from ordered chunks.
#[derive(Debug)]
pub struct ChunkReceiver {
    storage: LocalStorage,
    sessions: SessionStore,
    catalog: Arc<Catalog>,
    locks: KeyedLocks,
    max_chunk_size: u64,
}

impl ChunkReceiver {
    /// Open a receiver over `storage`, creating the root directory and
    /// loading the catalog.
    ///
    /// # Errors
    ///
    /// Returns an error if the root cannot be created or the catalog cannot
    /// be read.
    pub async fn open(storage: LocalStorage) -> Result<Self> {
        storage.ensure_root().await?;
        let catalog = Catalog::open(storage.clone()).await?;

        Ok(Self {
            sessions: SessionStore::new(storage.clone()),
            storage,
            catalog: Arc::new(catalog),
            locks: KeyedLocks::default(),
            max_chunk_size: crate::DEFAULT_MAX_CHUNK_SIZE,
        })
    }

    /// Set the largest accepted chunk payload.
    #[must_use]
    pub const fn with_max_chunk_size(mut self, max_chunk_size: u64) -> Self {
        self.max_chunk_size = max_chunk_size;
        self
    }

    /// Largest accepted chunk payload in bytes.
    #[must_use]
    pub const fn max_chunk_size(&self) -> u64 {
        self.max_chunk_size
    }

    /// The catalog completed uploads are recorded in.
    #[must_use]
    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// The storage destination files are written to.
    #[must_use]
    pub const fn storage(&self) -> &LocalStorage {
        &self.storage
    }

    /// The in-flight session for `upload_id`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is invalid or the session cannot be read.
    pub async fn session(&self, upload_id: &str) -> Result<Option<UploadSession>> {
        self.sessions.load(upload_id).await
    }

    /// Accept one chunk.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidChunk`] for malformed requests
    /// - [`Error::ChecksumMismatch`] when the payload does not match its checksum
    /// - [`Error::OutOfOrder`] when the index is not the expected one
    /// - [`Error::StorageUnavailable`] when the destination cannot be opened
    ///
    /// None of these modify the destination file or the session.
    pub async fn receive(&self, request: ChunkRequest) -> Result<ChunkOutcome> {
        self.validate(&request)?;

        if let Some(expected) = request.checksum.as_deref() {
            if !verify_checksum(&request.payload, expected) {
                tracing::warn!(
                    upload_id = %request.upload_id,
                    chunk = request.chunk_index,
                    "Rejected corrupted chunk"
                );
                return Err(Error::ChecksumMismatch {
                    upload_id: request.upload_id,
                    chunk: request.chunk_index,
                });
            }
        }

        let _guard = self.locks.lock(&request.upload_id).await;

        let (mut session, is_new) = match self.sessions.load(&request.upload_id).await? {
            Some(session) => {
                if session.total_chunks != request.total_chunks {
                    return Err(Error::InvalidChunk(format!(
                        "totalChunks {} does not match the upload's {}",
                        request.total_chunks, session.total_chunks
                    )));
                }
                match self.catalog.find_by_path(&session.file_key()).await {
                    Some(upload) => {
                        // Finalized, but the session was never removed.
                        self.sessions.delete(&session.upload_id).await?;
                        tracing::warn!(
                            upload_id = %session.upload_id,
                            id = %upload.id,
                            "Removed session of an already finalized upload"
                        );
                        if request.chunk_index + 1 == session.total_chunks {
                            return Ok(ChunkOutcome::Completed {
                                file_path: upload.file_path.clone(),
                                upload,
                            });
                        }
                        (Self::start_session(&request), true)
                    }
                    None => (session, false),
                }
            }
            None => (Self::start_session(&request), true),
        };

        if request.chunk_index != session.expected_next_chunk {
            return Err(Error::OutOfOrder {
                expected: session.expected_next_chunk,
                received: request.chunk_index,
            });
        }

        if is_new {
            // Saved before the first append so abort can always find the file.
            self.sessions.save(&session).await?;
        }

        let file_key = session.file_key();
        let written = match self.repair_destination(&session, &file_key).await {
            Ok(()) => self.storage.append(&file_key, &request.payload).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            if is_new {
                self.discard_session(&session, &file_key).await;
            }
            return Err(e);
        }
        session.advance(request.payload.len() as u64);

        tracing::debug!(
            upload_id = %session.upload_id,
            chunk = request.chunk_index,
            total = session.total_chunks,
            bytes = request.payload.len(),
            "Accepted chunk"
        );

        if session.is_complete() {
            let upload = self.finalize(&session, &file_key).await?;
            self.sessions.delete(&session.upload_id).await?;

            tracing::info!(
                upload_id = %session.upload_id,
                id = %upload.id,
                path = %upload.file_path,
                size = upload.file_size,
                "Upload completed"
            );

            return Ok(ChunkOutcome::Completed {
                file_path: upload.file_path.clone(),
                upload,
            });
        }

        self.sessions.save(&session).await?;

        Ok(ChunkOutcome::InProgress {
            uploaded_chunks: session.expected_next_chunk,
            total_chunks: session.total_chunks,
        })
    }

    /// Accept one chunk on a spawned task.
    ///
    /// The chunk is processed to the end even if the returned future is
    /// dropped, so a caller going away mid-request never leaves a half
    /// applied chunk behind.
    ///
    /// # Errors
    ///
    /// Same as [`receive`](Self::receive), plus [`Error::Internal`] if the
    /// task panics.
    pub async fn receive_detached(
        self: Arc<Self>,
        request: ChunkRequest,
    ) -> Result<ChunkOutcome> {
        tokio::spawn(async move { self.receive(request).await })
            .await
            .map_err(|e| Error::Internal(format!("chunk task failed: {e}")))?
    }

    fn start_session(request: &ChunkRequest) -> UploadSession {
        UploadSession::new(
            &request.upload_id,
            request.total_chunks,
            &request.original_name,
            normalize_filename(&request.original_name),
        )
    }

    async fn discard_session(&self, session: &UploadSession, file_key: &str) {
        if let Err(e) = self.storage.delete(file_key).await {
            tracing::warn!(
                upload_id = %session.upload_id,
                error = %e,
                "Failed to remove partial file"
            );
        }
        if let Err(e) = self.sessions.delete(&session.upload_id).await {
            tracing::warn!(
                upload_id = %session.upload_id,
                error = %e,
                "Failed to remove session"
            );
        }
    }

    fn validate(&self, request: &ChunkRequest) -> Result<()> {
        validate_upload_id(&request.upload_id)?;

        if request.total_chunks == 0 {
            return Err(Error::InvalidChunk("totalChunks must be at least 1".into()));
        }
        if request.chunk_index >= request.total_chunks {
            return Err(Error::InvalidChunk(format!(
                "chunkIndex {} is not below totalChunks {}",
                request.chunk_index, request.total_chunks
            )));
        }
        if request.original_name.trim().is_empty() {
            return Err(Error::InvalidChunk("originalName is required".into()));
        }
        if request.original_name.chars().count() > crate::MAX_ORIGINAL_NAME_LEN {
            return Err(Error::InvalidChunk(format!(
                "originalName exceeds {} characters",
                crate::MAX_ORIGINAL_NAME_LEN
            )));
        }
        if request.payload.is_empty() {
            return Err(Error::InvalidChunk("chunk is empty".into()));
        }
        if request.payload.len() as u64 > self.max_chunk_size {
            return Err(Error::InvalidChunk(format!(
                "chunk of {} bytes exceeds the {} byte limit",
                request.payload.len(),
                self.max_chunk_size
            )));
        }
        Ok(())
    }

    /// Bring the destination back in line with the session after a crash
    /// between an append and the session write.
    async fn repair_destination(&self, session: &UploadSession, file_key: &str) -> Result<()> {
        let actual = self.storage.len(file_key).await?.unwrap_or(0);

        if actual > session.bytes_written {
            tracing::warn!(
                upload_id = %session.upload_id,
                recorded = session.bytes_written,
                actual,
                "Destination longer than recorded, truncating"
            );
            self.storage.truncate(file_key, session.bytes_written).await?;
        } else if actual < session.bytes_written {
            return Err(Error::StorageUnavailable(format!(
                "destination for upload '{}' holds {actual} bytes, expected {}",
                session.upload_id, session.bytes_written
            )));
        }
        Ok(())
    }

    async fn finalize(&self, session: &UploadSession, file_key: &str) -> Result<CompletedUpload> {
        let file_size = self
            .storage
            .len(file_key)
            .await?
            .ok_or_else(|| Error::Internal(format!("finished upload {file_key} is missing")))?;

        let mime_type = mime_guess::from_path(&session.normalized_name)
            .first()
            .map(|m| m.essence_str().to_string());

        let upload = CompletedUpload::new(&session.normalized_name, file_size)
            .with_original_name(&session.original_name)
            .with_mime_type(mime_type);

        self.catalog.create(upload.clone()).await?;
        Ok(upload)
    }

    /// Abort an upload, deleting its partial file and session.
    ///
    /// Succeeds whether or not a session exists for the id. Returns whether
    /// one did.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is malformed or the files cannot be removed.
    pub async fn abort(&self, upload_id: &str) -> Result<bool> {
        validate_upload_id(upload_id)?;
        let _guard = self.locks.lock(upload_id).await;

        let Some(session) = self.sessions.load(upload_id).await? else {
            tracing::debug!(upload_id = %upload_id, "Abort for unknown upload");
            return Ok(false);
        };

        self.storage.delete(&session.file_key()).await?;
        self.sessions.delete(upload_id).await?;

        tracing::info!(
            upload_id = %upload_id,
            accepted_chunks = session.expected_next_chunk,
            "Upload aborted and cleaned up"
        );
        Ok(true)
    }

    /// Abort every session not updated within `max_age`.
    ///
    /// Returns the number of sessions removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the sessions cannot be listed.
    pub async fn cleanup_stale(&self, max_age: chrono::Duration) -> Result<usize> {
        let cutoff = chrono::Utc::now() - max_age;
        let mut cleaned = 0;

        for session in self.sessions.list().await? {
            if session.updated_at >= cutoff {
                continue;
            }
            match self.abort(&session.upload_id).await {
                Ok(_) => cleaned += 1,
                Err(e) => tracing::warn!(
                    upload_id = %session.upload_id,
                    error = %e,
                    "Failed to clean up stale session"
                ),
            }
        }

        if cleaned > 0 {
            tracing::info!(count = cleaned, "Cleaned up stale upload sessions");
        }
        Ok(cleaned)
    }
}
