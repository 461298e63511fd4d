//! Multi-file upload manager.
//!
//! The [`Uploader`] owns one [`ClientUpload`] per selected file and runs each
//! on its own task. All uploads publish to a shared event channel.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::join_all;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::transport::ChunkTransport;
use super::upload::{
    ClientUpload, RunOutcome, UploadEvent, UploadSnapshot, UploadStatus, EVENT_CAPACITY,
};
use crate::error::{Error, Result};

/// Length of generated upload ids.
pub const UPLOAD_ID_LEN: usize = 21;

/// Generate a random upload id.
#[must_use]
pub fn generate_upload_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(UPLOAD_ID_LEN)
        .map(char::from)
        .collect()
}

/// Runs uploads for a set of files over one transport.
pub struct Uploader<T: ChunkTransport> {
    transport: Arc<T>,
    chunk_size: u64,
    send_checksum: bool,
    uploads: tokio::sync::Mutex<Vec<Arc<ClientUpload<T>>>>,
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
    events: broadcast::Sender<UploadEvent>,
}

impl<T: ChunkTransport> std::fmt::Debug for Uploader<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Uploader")
            .field("chunk_size", &self.chunk_size)
            .field("send_checksum", &self.send_checksum)
            .finish_non_exhaustive()
    }
}

impl<T: ChunkTransport> Uploader<T> {
    /// Create an uploader with no files.
    pub fn new(transport: T, chunk_size: u64) -> Self {
        Self::with_shared(Arc::new(transport), chunk_size)
    }

    /// Create an uploader over a transport shared with other code.
    pub fn with_shared(transport: Arc<T>, chunk_size: u64) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            transport,
            chunk_size,
            send_checksum: true,
            uploads: tokio::sync::Mutex::new(Vec::new()),
            tasks: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Attach (or stop attaching) checksums to chunks of files added later.
    #[must_use]
    pub fn with_checksums(mut self, enabled: bool) -> Self {
        self.send_checksum = enabled;
        self
    }

    /// The transport uploads are sent over.
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Subscribe to events from every upload.
    pub fn subscribe(&self) -> broadcast::Receiver<UploadEvent> {
        self.events.subscribe()
    }

    fn tasks(&self) -> MutexGuard<'_, HashMap<String, JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add files as idle uploads.
    ///
    /// A file whose name matches an upload already in the list is skipped.
    /// Returns the ids of the uploads added.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be inspected. Files before it stay
    /// added.
    pub async fn add_files(&self, paths: Vec<PathBuf>) -> Result<Vec<String>> {
        let mut uploads = self.uploads.lock().await;
        let mut added = Vec::new();

        for path in paths {
            let upload = ClientUpload::from_path(
                generate_upload_id(),
                path,
                self.chunk_size,
                Arc::clone(&self.transport),
            )
            .await?
            .with_checksums(self.send_checksum)
            .with_events(self.events.clone());

            if uploads
                .iter()
                .any(|existing| existing.file_name() == upload.file_name())
            {
                tracing::debug!(file = %upload.file_name(), "Skipping duplicate file");
                continue;
            }

            tracing::debug!(
                upload_id = %upload.id(),
                file = %upload.file_name(),
                chunks = upload.plan().total_chunks(),
                "Added upload"
            );
            added.push(upload.id().to_string());
            uploads.push(Arc::new(upload));
        }

        Ok(added)
    }

    /// Look up an upload by id.
    pub async fn get(&self, id: &str) -> Option<Arc<ClientUpload<T>>> {
        self.uploads
            .lock()
            .await
            .iter()
            .find(|u| u.id() == id)
            .cloned()
    }

    /// Snapshots of every upload, in the order they were added.
    pub async fn uploads(&self) -> Vec<UploadSnapshot> {
        self.uploads
            .lock()
            .await
            .iter()
            .map(|u| u.snapshot())
            .collect()
    }

    /// Start (or resume) one upload on its own task.
    ///
    /// Returns `false` if it is already running or completed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UploadNotFound`] if no upload has this id.
    pub async fn start(&self, id: &str) -> Result<bool> {
        let upload = self
            .get(id)
            .await
            .ok_or_else(|| unknown_upload(id))?;
        Ok(self.spawn(upload))
    }

    fn spawn(&self, upload: Arc<ClientUpload<T>>) -> bool {
        if matches!(
            upload.status(),
            UploadStatus::Uploading | UploadStatus::Completed
        ) {
            return false;
        }

        let mut tasks = self.tasks();
        if tasks.get(upload.id()).is_some_and(|task| !task.is_finished()) {
            return false;
        }

        let id = upload.id().to_string();
        let task = tokio::spawn(async move {
            match upload.run().await {
                Ok(RunOutcome::Completed(_)) => {}
                Ok(outcome) => {
                    tracing::debug!(upload_id = %upload.id(), ?outcome, "Upload stopped");
                }
                Err(e) => {
                    tracing::debug!(
                        upload_id = %upload.id(),
                        error = %e,
                        "Upload task ended with error"
                    );
                }
            }
        });
        tasks.insert(id, task);
        true
    }

    /// Start every idle upload. Returns how many were started.
    pub async fn start_all(&self) -> usize {
        let uploads = self.uploads.lock().await.clone();
        uploads
            .into_iter()
            .filter(|u| u.status() == UploadStatus::Idle)
            .map(|u| self.spawn(u))
            .filter(|started| *started)
            .count()
    }

    /// Pause a running upload.
    pub async fn pause(&self, id: &str) -> bool {
        match self.get(id).await {
            Some(upload) => upload.pause(),
            None => false,
        }
    }

    /// Resume a paused upload from the chunk it stopped at.
    ///
    /// Returns `false` if the upload is not paused.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UploadNotFound`] if no upload has this id.
    pub async fn resume(&self, id: &str) -> Result<bool> {
        let upload = self
            .get(id)
            .await
            .ok_or_else(|| unknown_upload(id))?;
        if upload.status() != UploadStatus::Paused {
            return Ok(false);
        }
        // A paused loop may still be unwinding.
        self.wait(id).await;
        Ok(self.spawn(upload))
    }

    /// Wait for one upload's task to finish.
    pub async fn wait(&self, id: &str) {
        let task = self.tasks().remove(id);
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!(upload_id = %id, error = %e, "Upload task panicked");
            }
        }
    }

    /// Wait for every running task to finish.
    pub async fn wait_all(&self) {
        let tasks: Vec<_> = self.tasks().drain().collect();
        let results = join_all(
            tasks
                .into_iter()
                .map(|(id, task)| async move { (id, task.await) }),
        )
        .await;

        for (id, result) in results {
            if let Err(e) = result {
                tracing::warn!(upload_id = %id, error = %e, "Upload task panicked");
            }
        }
    }

    /// Abort an upload and drop it from the list.
    ///
    /// Unfinished uploads are also discarded on the server; a failure to do
    /// so is logged, not returned. Returns `false` if no upload has this id.
    pub async fn remove(&self, id: &str) -> bool {
        let upload = {
            let mut uploads = self.uploads.lock().await;
            let Some(pos) = uploads.iter().position(|u| u.id() == id) else {
                return false;
            };
            uploads.remove(pos)
        };

        upload.abort();
        self.wait(id).await;
        // The task handle may already have been taken by a cancelled wait_all.
        let _ = upload
            .watch_status()
            .wait_for(|status| *status != UploadStatus::Uploading)
            .await;

        if upload.status() != UploadStatus::Completed {
            if let Err(e) = upload.abort_remote().await {
                tracing::warn!(upload_id = %id, error = %e, "Failed to abort upload on server");
            }
        }

        tracing::debug!(upload_id = %id, "Removed upload");
        true
    }

    /// Remove every upload. Returns how many were removed.
    pub async fn remove_all(&self) -> usize {
        let ids: Vec<String> = self
            .uploads
            .lock()
            .await
            .iter()
            .map(|u| u.id().to_string())
            .collect();

        let mut removed = 0;
        for id in ids {
            if self.remove(&id).await {
                removed += 1;
            }
        }
        removed
    }
}

fn unknown_upload(id: &str) -> Error {
    Error::UploadNotFound(id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::LocalTransport;
    use crate::receiver::ChunkReceiver;
    use crate::storage::LocalStorage;
    use tempfile::TempDir;

    async fn uploader(dir: &TempDir) -> Uploader<LocalTransport> {
        let receiver = ChunkReceiver::open(LocalStorage::new(dir.path().join("server")))
            .await
            .unwrap();
        Uploader::new(LocalTransport::new(Arc::new(receiver)), 4)
    }

    fn write(dir: &TempDir, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    #[test]
    fn test_generated_ids_are_valid() {
        let id = generate_upload_id();
        assert_eq!(id.len(), UPLOAD_ID_LEN);
        assert!(crate::session::validate_upload_id(&id).is_ok());
        assert_ne!(id, generate_upload_id());
    }

    #[tokio::test]
    async fn test_add_files_skips_duplicate_names() {
        let dir = TempDir::new().expect("create temp dir");
        let up = uploader(&dir).await;
        let a = write(&dir, "a.txt", b"one");

        let first = up.add_files(vec![a.clone()]).await.unwrap();
        let second = up.add_files(vec![a]).await.unwrap();

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
        assert_eq!(up.uploads().await.len(), 1);
    }

    #[tokio::test]
    async fn test_start_all_uploads_every_file() {
        let dir = TempDir::new().expect("create temp dir");
        let up = uploader(&dir).await;
        up.add_files(vec![
            write(&dir, "a.txt", b"first file"),
            write(&dir, "b.bin", b"second file!"),
        ])
        .await
        .unwrap();

        assert_eq!(up.start_all().await, 2);
        up.wait_all().await;

        let snaps = up.uploads().await;
        assert!(snaps.iter().all(|s| s.status == UploadStatus::Completed));
        assert_eq!(
            up.transport().receiver().catalog().len().await,
            2
        );
    }

    #[tokio::test]
    async fn test_start_unknown_id() {
        let dir = TempDir::new().expect("create temp dir");
        let up = uploader(&dir).await;
        let err = up.start("nope").await.unwrap_err();
        assert!(matches!(err, Error::UploadNotFound(ref id) if id == "nope"));
        assert_eq!(err.kind(), crate::ErrorKind::NotFound);
        assert!(matches!(
            up.resume("nope").await,
            Err(Error::UploadNotFound(_))
        ));
        assert!(!up.pause("nope").await);
        assert!(!up.remove("nope").await);
    }

    #[tokio::test]
    async fn test_remove_cleans_server_session() {
        let dir = TempDir::new().expect("create temp dir");
        let up = uploader(&dir).await;
        let ids = up
            .add_files(vec![write(&dir, "a.txt", b"0123456789")])
            .await
            .unwrap();
        let upload = up.get(&ids[0]).await.unwrap();

        // Leave a partial session on the server.
        let receiver = Arc::clone(up.transport().receiver());
        receiver
            .receive(crate::protocol::ChunkRequest {
                upload_id: ids[0].clone(),
                chunk_index: 0,
                total_chunks: upload.plan().total_chunks(),
                original_name: "a.txt".into(),
                payload: b"0123".to_vec(),
                checksum: None,
            })
            .await
            .unwrap();
        assert!(receiver.session(&ids[0]).await.unwrap().is_some());

        assert!(up.remove(&ids[0]).await);
        assert!(receiver.session(&ids[0]).await.unwrap().is_none());
        assert!(up.uploads().await.is_empty());
    }
}
