//! Durable catalog of completed uploads.
//!
//! Every finished upload gets exactly one [`CompletedUpload`] record. The
//! catalog lives in `catalog.json` at the storage root and is rewritten
//! atomically on every change.
//!
//! ## Features
//!
//! - Create, get, list (newest first) and delete records
//! - Deleting a record also removes its stored file
//! - Persists records to a versioned JSON file

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::storage::LocalStorage;

/// Storage key of the catalog database.
pub const CATALOG_FILE: &str = "catalog.json";

/// A finished upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedUpload {
    /// Unique identifier for this record
    pub id: Uuid,
    /// Stored file name (the normalized name)
    pub name: String,
    /// Name the client originally supplied
    pub original_name: String,
    /// Storage key of the file, e.g. `uploads/report_1700000000_ab12CD34.pdf`
    pub file_path: String,
    /// Guessed MIME type
    pub mime_type: Option<String>,
    /// Final size in bytes
    pub file_size: u64,
    /// When the upload completed
    pub created_at: DateTime<Utc>,
}

impl CompletedUpload {
    /// Create a record for the file stored under `name` in the uploads
    /// directory.
    #[must_use]
    pub fn new(name: impl Into<String>, file_size: u64) -> Self {
        let name = name.into();
        Self {
            id: Uuid::new_v4(),
            file_path: format!("{}/{name}", crate::UPLOADS_DIR),
            original_name: name.clone(),
            name,
            mime_type: None,
            file_size,
            created_at: Utc::now(),
        }
    }

    /// Set the original client-supplied name.
    #[must_use]
    pub fn with_original_name(mut self, original_name: impl Into<String>) -> Self {
        self.original_name = original_name.into();
        self
    }

    /// Set the MIME type.
    #[must_use]
    pub fn with_mime_type(mut self, mime_type: Option<String>) -> Self {
        self.mime_type = mime_type;
        self
    }
}

/// Serializable wrapper for the catalog database.
#[derive(Debug, Serialize, Deserialize)]
struct CatalogDatabase {
    /// Version of the catalog format
    version: u32,
    /// Records, newest first
    entries: Vec<CompletedUpload>,
}

/// File-backed catalog of completed uploads.
#[derive(Debug)]
pub struct Catalog {
    storage: LocalStorage,
    entries: RwLock<Vec<CompletedUpload>>,
}

impl Catalog {
    /// Open the catalog stored in `storage`, starting empty if none exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog file exists but cannot be read.
    pub async fn open(storage: LocalStorage) -> Result<Self> {
        let entries = if storage.exists(CATALOG_FILE).await? {
            let bytes = storage.get(CATALOG_FILE).await?;
            let db: CatalogDatabase = serde_json::from_slice(&bytes).map_err(|e| {
                Error::Serialization(format!("Failed to parse catalog: {e}"))
            })?;
            db.entries
        } else {
            Vec::new()
        };

        Ok(Self {
            storage,
            entries: RwLock::new(entries),
        })
    }

    async fn persist(&self, entries: &[CompletedUpload]) -> Result<()> {
        let db = CatalogDatabase {
            version: 1,
            entries: entries.to_vec(),
        };
        let json = serde_json::to_vec_pretty(&db)
            .map_err(|e| Error::Serialization(format!("Failed to serialize catalog: {e}")))?;
        self.storage.put(CATALOG_FILE, &json).await
    }

    /// Add a record.
    ///
    /// The in-memory list only changes once the file has been written.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be saved. The record is not
    /// kept in that case.
    pub async fn create(&self, record: CompletedUpload) -> Result<()> {
        let mut entries = self.entries.write().await;
        let mut updated = Vec::with_capacity(entries.len() + 1);
        updated.push(record);
        updated.extend(entries.iter().cloned());

        self.persist(&updated).await?;
        *entries = updated;
        Ok(())
    }

    /// Look up a record by id.
    pub async fn get(&self, id: Uuid) -> Option<CompletedUpload> {
        self.entries
            .read()
            .await
            .iter()
            .find(|e| e.id == id)
            .cloned()
    }

    /// Look up the record stored at `file_path`.
    pub async fn find_by_path(&self, file_path: &str) -> Option<CompletedUpload> {
        self.entries
            .read()
            .await
            .iter()
            .find(|e| e.file_path == file_path)
            .cloned()
    }

    /// All records, newest first.
    pub async fn list(&self) -> Vec<CompletedUpload> {
        self.entries.read().await.clone()
    }

    /// Number of records.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the catalog has no records.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Remove a record and its stored file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UploadNotFound`] for unknown ids, or an error if the
    /// file or the catalog cannot be updated.
    pub async fn delete(&self, id: Uuid) -> Result<CompletedUpload> {
        let mut entries = self.entries.write().await;
        let pos = entries
            .iter()
            .position(|e| e.id == id)
            .ok_or_else(|| Error::UploadNotFound(id.to_string()))?;

        let mut updated = entries.clone();
        let record = updated.remove(pos);
        self.persist(&updated).await?;
        *entries = updated;
        drop(entries);

        if let Err(e) = self.storage.delete(&record.file_path).await {
            tracing::warn!(
                id = %record.id,
                path = %record.file_path,
                error = %e,
                "Failed to delete stored file for removed upload"
            );
        }

        tracing::info!(id = %record.id, name = %record.name, "Deleted upload");
        Ok(record)
    }
}
