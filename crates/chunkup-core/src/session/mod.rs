//! In-flight upload sessions and their durable metadata store.
//!
//! The server keeps one [`UploadSession`] per client-chosen upload id while
//! chunks are arriving. Sessions are persisted as pretty-printed JSON files
//! under `sessions/` in the storage root, one file per id, so an upload
//! survives a server restart.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::{Error, Result};
use crate::storage::LocalStorage;

/// Directory under the storage root that holds session files.
pub const SESSIONS_DIR: &str = "sessions";

const SESSION_FILE_EXTENSION: &str = "json";

/// Server-side record of an upload being reconstructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSession {
    /// Client-chosen identifier
    pub upload_id: String,
    /// Number of chunks the file was split into
    pub total_chunks: u64,
    /// Name as supplied by the client
    pub original_name: String,
    /// Destination name, fixed when the session is created
    pub normalized_name: String,
    /// Index of the next chunk the server will accept
    pub expected_next_chunk: u64,
    /// Destination length after the last accepted chunk
    pub bytes_written: u64,
    /// When the first chunk arrived
    pub created_at: DateTime<Utc>,
    /// When the last chunk was accepted
    pub updated_at: DateTime<Utc>,
}

impl UploadSession {
    /// Start a session that expects chunk 0 next.
    #[must_use]
    pub fn new(
        upload_id: impl Into<String>,
        total_chunks: u64,
        original_name: impl Into<String>,
        normalized_name: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            upload_id: upload_id.into(),
            total_chunks,
            original_name: original_name.into(),
            normalized_name: normalized_name.into(),
            expected_next_chunk: 0,
            bytes_written: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Storage key of the destination file.
    #[must_use]
    pub fn file_key(&self) -> String {
        format!("{}/{}", crate::UPLOADS_DIR, self.normalized_name)
    }

    /// Record an accepted chunk of `len` bytes.
    pub fn advance(&mut self, len: u64) {
        self.expected_next_chunk += 1;
        self.bytes_written += len;
        self.updated_at = Utc::now();
    }

    /// Whether every chunk has been accepted.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.expected_next_chunk >= self.total_chunks
    }
}

/// Check that an upload id is usable as a storage key.
///
/// # Errors
///
/// Returns [`Error::InvalidChunk`] when the id is empty, too long, or
/// contains characters outside `[A-Za-z0-9_-]`.
pub fn validate_upload_id(upload_id: &str) -> Result<()> {
    if upload_id.is_empty() {
        return Err(Error::InvalidChunk("fileIdentifier is required".into()));
    }
    if upload_id.len() > crate::MAX_UPLOAD_ID_LEN {
        return Err(Error::InvalidChunk(format!(
            "fileIdentifier exceeds {} characters",
            crate::MAX_UPLOAD_ID_LEN
        )));
    }
    if !upload_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(Error::InvalidChunk(
            "fileIdentifier may only contain letters, digits, '_' and '-'".into(),
        ));
    }
    Ok(())
}

/// Durable mapping from upload id to [`UploadSession`].
#[derive(Debug, Clone)]
pub struct SessionStore {
    storage: LocalStorage,
}

impl SessionStore {
    /// Create a store that keeps session files in `storage`.
    #[must_use]
    pub const fn new(storage: LocalStorage) -> Self {
        Self { storage }
    }

    fn key(upload_id: &str) -> Result<String> {
        validate_upload_id(upload_id)?;
        Ok(format!(
            "{SESSIONS_DIR}/{upload_id}.{SESSION_FILE_EXTENSION}"
        ))
    }

    /// Load the session for `upload_id`, if one exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn load(&self, upload_id: &str) -> Result<Option<UploadSession>> {
        let key = Self::key(upload_id)?;
        if !self.storage.exists(&key).await? {
            return Ok(None);
        }

        let bytes = self.storage.get(&key).await?;
        let session: UploadSession = serde_json::from_slice(&bytes).map_err(|e| {
            Error::Serialization(format!("Failed to parse session {upload_id}: {e}"))
        })?;

        Ok(Some(session))
    }

    /// Persist `session`, replacing any previous version atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the session cannot be serialized or written.
    pub async fn save(&self, session: &UploadSession) -> Result<()> {
        let key = Self::key(&session.upload_id)?;
        let json = serde_json::to_vec_pretty(session)
            .map_err(|e| Error::Serialization(format!("Failed to serialize session: {e}")))?;

        self.storage.put(&key, &json).await?;

        tracing::debug!(
            upload_id = %session.upload_id,
            expected_next_chunk = session.expected_next_chunk,
            "Saved upload session"
        );

        Ok(())
    }

    /// Delete the session for `upload_id`. Returns whether one existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    pub async fn delete(&self, upload_id: &str) -> Result<bool> {
        let key = Self::key(upload_id)?;
        let removed = self.storage.delete(&key).await?;
        if removed {
            tracing::debug!(upload_id = %upload_id, "Deleted upload session");
        }
        Ok(removed)
    }

    /// List all stored sessions, most recently updated first.
    ///
    /// Files that cannot be parsed are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error if the sessions directory exists but cannot be read.
    pub async fn list(&self) -> Result<Vec<UploadSession>> {
        let dir = self.storage.resolve(SESSIONS_DIR)?;
        let mut sessions = Vec::new();

        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(sessions),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path
                .extension()
                .is_none_or(|ext| ext != SESSION_FILE_EXTENSION)
            {
                continue;
            }

            let parsed = fs::read(&path)
                .await
                .map_err(Error::from)
                .and_then(|bytes| {
                    serde_json::from_slice::<UploadSession>(&bytes)
                        .map_err(|e| Error::Serialization(e.to_string()))
                });

            match parsed {
                Ok(session) => sessions.push(session),
                Err(e) => tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Skipping unreadable session file"
                ),
            }
        }

        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }
}
