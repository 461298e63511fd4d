//! Per-file upload state machine.
//!
//! ```text
//!            run()              last chunk acknowledged
//!   Idle ─────────────▶ Uploading ─────────────────────▶ Completed
//!    ▲                   │  ▲  │
//!    │ abort()   pause() │  │  │ failure
//!    │                   ▼  │  ▼
//!    └──────────────── Paused  Error
//!                       run()
//! ```
//!
//! Chunks are sent strictly one at a time. Pausing records the cause and
//! cancels the in-flight request; the send loop then stops at the same chunk
//! index, and a later [`ClientUpload::run`] continues from there. Aborting
//! resets the upload to `Idle` with no progress.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

use super::throughput::ThroughputEstimator;
use super::transport::ChunkTransport;
use crate::catalog::CompletedUpload;
use crate::chunk::{chunk_checksum, read_chunk, ChunkPlan};
use crate::error::{Error, Result};
use crate::protocol::{ChunkOutcome, ChunkRequest};

/// Capacity of the per-upload event channel.
pub const EVENT_CAPACITY: usize = 256;

/// Externally visible state of an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    /// Not started, or reset by an abort
    Idle,
    /// Send loop running
    Uploading,
    /// Stopped by a pause, resumable from the same chunk
    Paused,
    /// Server confirmed the final chunk
    Completed,
    /// Stopped by a failure
    Error,
}

impl std::fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Uploading => write!(f, "uploading"),
            Self::Paused => write!(f, "paused"),
            Self::Completed => write!(f, "completed"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Live transfer statistics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct UploadStats {
    /// Bytes acknowledged before the current chunk
    pub bytes_uploaded: u64,
    /// Smoothed speed in bytes per second
    pub speed_bps: f64,
}

/// Notification published while an upload runs.
#[derive(Debug, Clone)]
pub enum UploadEvent {
    /// The upload changed status.
    StatusChanged {
        /// Upload id
        id: String,
        /// New status
        status: UploadStatus,
    },
    /// A chunk was acknowledged.
    Progress {
        /// Upload id
        id: String,
        /// Percentage of chunks acknowledged
        progress: u8,
        /// Updated statistics
        stats: UploadStats,
    },
    /// The upload finished.
    Completed {
        /// Upload id
        id: String,
        /// Catalog record created by the server
        upload: CompletedUpload,
    },
    /// The upload failed.
    Failed {
        /// Upload id
        id: String,
        /// Failure description
        error: String,
    },
}

/// How a call to [`ClientUpload::run`] ended, short of a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every chunk was accepted.
    Completed(CompletedUpload),
    /// Stopped by [`ClientUpload::pause`].
    Paused,
    /// Stopped by [`ClientUpload::abort`].
    Aborted,
}

/// Point-in-time copy of an upload's state.
#[derive(Debug, Clone, Serialize)]
pub struct UploadSnapshot {
    /// Upload id
    pub id: String,
    /// File name sent to the server
    pub file_name: String,
    /// Local path
    pub path: PathBuf,
    /// File size in bytes
    pub file_size: u64,
    /// Number of chunks
    pub total_chunks: u64,
    /// Current status
    pub status: UploadStatus,
    /// Percentage of chunks acknowledged
    pub progress: u8,
    /// Index of the next chunk to send
    pub next_chunk: u64,
    /// Live statistics while uploading
    pub stats: Option<UploadStats>,
    /// Last failure, if the upload is in `Error`
    pub error: Option<String>,
    /// Catalog record once completed
    #[serde(skip)]
    pub completed: Option<CompletedUpload>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CancelCause {
    Pause,
    Abort,
}

#[derive(Debug)]
struct State {
    status: UploadStatus,
    next_chunk: u64,
    progress: u8,
    throughput: ThroughputEstimator,
    stats: Option<UploadStats>,
    cancel: Option<CancellationToken>,
    cause: Option<CancelCause>,
    error: Option<String>,
    completed: Option<CompletedUpload>,
}

/// One file's upload, driven by [`run`](Self::run).
#[derive(Debug)]
pub struct ClientUpload<T> {
    id: String,
    path: PathBuf,
    file_name: String,
    plan: ChunkPlan,
    transport: Arc<T>,
    send_checksum: bool,
    state: Mutex<State>,
    status_tx: watch::Sender<UploadStatus>,
    events: broadcast::Sender<UploadEvent>,
}

impl<T: ChunkTransport> ClientUpload<T> {
    /// Create an idle upload of the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if `path` has no file name or `chunk_size` is zero.
    pub fn new(
        id: impl Into<String>,
        path: impl Into<PathBuf>,
        file_size: u64,
        chunk_size: u64,
        transport: Arc<T>,
    ) -> Result<Self> {
        let path = path.into();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::InvalidPath(path.display().to_string()))?;
        let plan = ChunkPlan::new(file_size, chunk_size)?;

        let (status_tx, _) = watch::channel(UploadStatus::Idle);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            id: id.into(),
            path,
            file_name,
            plan,
            transport,
            send_checksum: true,
            state: Mutex::new(State {
                status: UploadStatus::Idle,
                next_chunk: 0,
                progress: 0,
                throughput: ThroughputEstimator::new(),
                stats: None,
                cancel: None,
                cause: None,
                error: None,
                completed: None,
            }),
            status_tx,
            events,
        })
    }

    /// Create an idle upload, reading the file size from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be inspected or is not a file.
    pub async fn from_path(
        id: impl Into<String>,
        path: impl Into<PathBuf>,
        chunk_size: u64,
        transport: Arc<T>,
    ) -> Result<Self> {
        let path = path.into();
        let metadata = tokio::fs::metadata(&path).await?;
        if !metadata.is_file() {
            return Err(Error::InvalidPath(format!(
                "{} is not a file",
                path.display()
            )));
        }
        Self::new(id, path, metadata.len(), chunk_size, transport)
    }

    /// Publish events on `events` instead of a private channel.
    #[must_use]
    pub fn with_events(mut self, events: broadcast::Sender<UploadEvent>) -> Self {
        self.events = events;
        self
    }

    /// Attach (or stop attaching) a checksum to every chunk.
    #[must_use]
    pub fn with_checksums(mut self, enabled: bool) -> Self {
        self.send_checksum = enabled;
        self
    }

    /// Upload id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// File name sent to the server.
    #[must_use]
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Local path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Chunk layout of the file.
    #[must_use]
    pub const fn plan(&self) -> &ChunkPlan {
        &self.plan
    }

    /// Current status.
    pub fn status(&self) -> UploadStatus {
        self.state().status
    }

    /// Watch status changes.
    pub fn watch_status(&self) -> watch::Receiver<UploadStatus> {
        self.status_tx.subscribe()
    }

    /// Subscribe to this upload's events.
    pub fn subscribe(&self) -> broadcast::Receiver<UploadEvent> {
        self.events.subscribe()
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> UploadSnapshot {
        let state = self.state();
        UploadSnapshot {
            id: self.id.clone(),
            file_name: self.file_name.clone(),
            path: self.path.clone(),
            file_size: self.plan.file_size(),
            total_chunks: self.plan.total_chunks(),
            status: state.status,
            progress: state.progress,
            next_chunk: state.next_chunk,
            stats: state.stats,
            error: state.error.clone(),
            completed: state.completed.clone(),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: UploadEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn set_status(&self, state: &mut State, status: UploadStatus) {
        state.status = status;
        self.status_tx.send_replace(status);
        self.emit(UploadEvent::StatusChanged {
            id: self.id.clone(),
            status,
        });
    }

    /// Run the send loop from the stored chunk index until the upload
    /// completes, is paused or aborted, or fails.
    ///
    /// Runs from `Idle`, `Paused` or `Error`. A completed upload returns its
    /// record again without sending anything.
    ///
    /// # Errors
    ///
    /// Returns the failure that moved the upload to `Error`, or
    /// [`Error::Internal`] if the loop is already running.
    pub async fn run(&self) -> Result<RunOutcome> {
        let cancel = {
            let mut state = self.state();
            match state.status {
                UploadStatus::Uploading => {
                    return Err(Error::Internal(format!(
                        "upload {} is already running",
                        self.id
                    )));
                }
                UploadStatus::Completed => {
                    if let Some(upload) = state.completed.clone() {
                        return Ok(RunOutcome::Completed(upload));
                    }
                }
                _ => {}
            }

            let cancel = CancellationToken::new();
            state.cancel = Some(cancel.clone());
            state.cause = None;
            state.error = None;
            self.set_status(&mut state, UploadStatus::Uploading);
            cancel
        };

        let total = self.plan.total_chunks();
        if total == 0 {
            return Err(self.fail(Error::EmptyFile(self.file_name.clone())));
        }

        tracing::debug!(upload_id = %self.id, file = %self.file_name, total, "Upload loop started");

        loop {
            if cancel.is_cancelled() {
                return Ok(self.on_cancelled());
            }

            let index = self.state().next_chunk;
            if index >= total {
                return Err(self.fail(Error::IncompleteUpload(self.id.clone())));
            }

            let payload = match read_chunk(&self.path, &self.plan, index).await {
                Ok(payload) => payload,
                Err(e) => return Err(self.fail(e)),
            };
            let len = payload.len() as u64;
            let request = ChunkRequest {
                upload_id: self.id.clone(),
                chunk_index: index,
                total_chunks: total,
                original_name: self.file_name.clone(),
                checksum: self.send_checksum.then(|| chunk_checksum(&payload)),
                payload,
            };

            let started = Instant::now();
            match self.transport.send_chunk_cancellable(request, &cancel).await {
                Ok(ChunkOutcome::InProgress { .. }) => {
                    self.on_chunk_sent(index, len, started.elapsed());
                }
                Ok(ChunkOutcome::Completed { upload, .. }) => {
                    self.on_chunk_sent(index, len, started.elapsed());
                    return Ok(self.on_completed(upload));
                }
                Err(Error::Cancelled) => return Ok(self.on_cancelled()),
                Err(Error::OutOfOrder { expected, .. }) if expected > index => {
                    tracing::debug!(
                        upload_id = %self.id,
                        sent = index,
                        expected,
                        "Server is ahead, skipping to its expected chunk"
                    );
                    self.state().next_chunk = expected;
                }
                Err(e) => return Err(self.fail(e)),
            }
        }
    }

    fn on_chunk_sent(&self, index: u64, len: u64, elapsed: Duration) {
        let total = self.plan.total_chunks();
        let mut state = self.state();

        state.next_chunk = index + 1;
        let speed_bps = state.throughput.record(len, elapsed);
        let stats = UploadStats {
            bytes_uploaded: index * self.plan.chunk_size(),
            speed_bps,
        };
        state.stats = Some(stats);
        state.progress = progress_percent(index, total);

        self.emit(UploadEvent::Progress {
            id: self.id.clone(),
            progress: state.progress,
            stats,
        });
    }

    fn on_completed(&self, upload: CompletedUpload) -> RunOutcome {
        let mut state = self.state();
        state.cancel = None;
        state.stats = None;
        state.throughput.reset();
        state.progress = 100;
        state.completed = Some(upload.clone());
        self.set_status(&mut state, UploadStatus::Completed);
        drop(state);

        tracing::info!(
            upload_id = %self.id,
            path = %upload.file_path,
            size = upload.file_size,
            "Upload completed"
        );
        self.emit(UploadEvent::Completed {
            id: self.id.clone(),
            upload: upload.clone(),
        });
        RunOutcome::Completed(upload)
    }

    fn on_cancelled(&self) -> RunOutcome {
        let mut state = self.state();
        state.cancel = None;

        if state.cause.take() == Some(CancelCause::Pause) {
            tracing::debug!(upload_id = %self.id, next_chunk = state.next_chunk, "Upload paused");
            self.set_status(&mut state, UploadStatus::Paused);
            RunOutcome::Paused
        } else {
            reset(&mut state);
            tracing::debug!(upload_id = %self.id, "Upload aborted");
            self.set_status(&mut state, UploadStatus::Idle);
            RunOutcome::Aborted
        }
    }

    fn fail(&self, error: Error) -> Error {
        let mut state = self.state();
        state.cancel = None;
        state.cause = None;
        state.stats = None;
        state.throughput.reset();
        state.error = Some(error.to_string());
        self.set_status(&mut state, UploadStatus::Error);
        drop(state);

        tracing::warn!(upload_id = %self.id, error = %error, "Upload failed");
        self.emit(UploadEvent::Failed {
            id: self.id.clone(),
            error: error.to_string(),
        });
        error
    }

    /// Ask a running upload to pause after the in-flight request is dropped.
    ///
    /// Returns `false` if the upload is not running.
    pub fn pause(&self) -> bool {
        let mut state = self.state();
        if state.status != UploadStatus::Uploading {
            return false;
        }
        state.cause = Some(CancelCause::Pause);
        if let Some(cancel) = &state.cancel {
            cancel.cancel();
        }
        true
    }

    /// Stop the upload and reset it to `Idle` with no progress.
    ///
    /// A running loop is cancelled and performs the reset itself. Completed
    /// uploads are left alone.
    pub fn abort(&self) {
        let mut state = self.state();
        match state.status {
            UploadStatus::Uploading => {
                state.cause = Some(CancelCause::Abort);
                if let Some(cancel) = &state.cancel {
                    cancel.cancel();
                }
            }
            UploadStatus::Paused | UploadStatus::Error => {
                reset(&mut state);
                self.set_status(&mut state, UploadStatus::Idle);
            }
            UploadStatus::Idle | UploadStatus::Completed => {}
        }
    }

    /// Ask the server to discard this upload's partial data.
    ///
    /// # Errors
    ///
    /// Returns the transport's error if the request fails.
    pub async fn abort_remote(&self) -> Result<()> {
        self.transport.abort_upload(&self.id).await
    }
}

fn reset(state: &mut State) {
    state.next_chunk = 0;
    state.progress = 0;
    state.stats = None;
    state.throughput.reset();
    state.error = None;
}

/// `round(100 * (index + 1) / total)`
fn progress_percent(index: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    (100.0 * (index + 1) as f64 / total as f64).round().min(100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tempfile::TempDir;

    /// Accepts every chunk, optionally stalling on one index until released.
    struct ScriptedTransport {
        total: u64,
        sent: Mutex<Vec<u64>>,
        stall_on: Option<u64>,
        release: tokio::sync::Notify,
        fail_on: Option<u64>,
        server_ahead: AtomicU64,
    }

    impl ScriptedTransport {
        fn new(total: u64) -> Self {
            Self {
                total,
                sent: Mutex::new(Vec::new()),
                stall_on: None,
                release: tokio::sync::Notify::new(),
                fail_on: None,
                server_ahead: AtomicU64::new(0),
            }
        }

        fn sent(&self) -> Vec<u64> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl ChunkTransport for ScriptedTransport {
        async fn send_chunk(&self, request: ChunkRequest) -> Result<ChunkOutcome> {
            if self.stall_on == Some(request.chunk_index) {
                self.release.notified().await;
            }
            if self.fail_on == Some(request.chunk_index) {
                return Err(Error::StorageUnavailable("disk full".into()));
            }
            let ahead = self.server_ahead.swap(0, Ordering::SeqCst);
            if ahead > 0 {
                return Err(Error::OutOfOrder {
                    expected: ahead,
                    received: request.chunk_index,
                });
            }

            self.sent.lock().unwrap().push(request.chunk_index);
            if request.chunk_index + 1 == self.total {
                Ok(ChunkOutcome::Completed {
                    file_path: "uploads/f".into(),
                    upload: CompletedUpload::new("f", 0),
                })
            } else {
                Ok(ChunkOutcome::InProgress {
                    uploaded_chunks: request.chunk_index + 1,
                    total_chunks: self.total,
                })
            }
        }

        async fn abort_upload(&self, _upload_id: &str) -> Result<()> {
            Ok(())
        }
    }

    fn file_of(dir: &TempDir, size: usize) -> PathBuf {
        let path = dir.path().join("data.bin");
        std::fs::write(&path, vec![7u8; size]).unwrap();
        path
    }

    #[test]
    fn test_progress_percent() {
        assert_eq!(progress_percent(0, 3), 33);
        assert_eq!(progress_percent(1, 3), 67);
        assert_eq!(progress_percent(2, 3), 100);
        assert_eq!(progress_percent(0, 200), 1);
    }

    #[tokio::test]
    async fn test_runs_to_completion() {
        let dir = TempDir::new().expect("create temp dir");
        let transport = Arc::new(ScriptedTransport::new(3));
        let upload = ClientUpload::new("u", file_of(&dir, 10), 10, 4, transport.clone()).unwrap();
        let mut events = upload.subscribe();

        let outcome = upload.run().await.unwrap();

        assert!(matches!(outcome, RunOutcome::Completed(_)));
        assert_eq!(transport.sent(), vec![0, 1, 2]);
        let snap = upload.snapshot();
        assert_eq!(snap.status, UploadStatus::Completed);
        assert_eq!(snap.progress, 100);
        assert!(snap.stats.is_none());

        let mut progress = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let UploadEvent::Progress { progress: p, stats, .. } = event {
                progress.push((p, stats.bytes_uploaded));
            }
        }
        assert_eq!(progress, vec![(33, 0), (67, 4), (100, 8)]);
    }

    #[tokio::test]
    async fn test_empty_file_errors() {
        let dir = TempDir::new().expect("create temp dir");
        let upload = ClientUpload::new(
            "u",
            file_of(&dir, 0),
            0,
            4,
            Arc::new(ScriptedTransport::new(0)),
        )
        .unwrap();

        assert!(matches!(upload.run().await, Err(Error::EmptyFile(_))));
        assert_eq!(upload.status(), UploadStatus::Error);
    }

    #[tokio::test]
    async fn test_pause_keeps_index_and_resume_continues() {
        let dir = TempDir::new().expect("create temp dir");
        let mut transport = ScriptedTransport::new(4);
        transport.stall_on = Some(2);
        let transport = Arc::new(transport);
        let upload = Arc::new(
            ClientUpload::new("u", file_of(&dir, 16), 16, 4, transport.clone()).unwrap(),
        );

        let runner = {
            let upload = Arc::clone(&upload);
            tokio::spawn(async move { upload.run().await })
        };

        let mut status = upload.watch_status();
        while transport.sent().len() < 2 {
            tokio::task::yield_now().await;
        }
        assert!(upload.pause());

        assert_eq!(runner.await.unwrap().unwrap(), RunOutcome::Paused);
        status
            .wait_for(|s| *s == UploadStatus::Paused)
            .await
            .unwrap();
        assert_eq!(upload.snapshot().next_chunk, 2);

        transport.release.notify_one();
        let outcome = upload.run().await.unwrap();

        assert!(matches!(outcome, RunOutcome::Completed(_)));
        assert_eq!(transport.sent(), vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_abort_resets_to_idle() {
        let dir = TempDir::new().expect("create temp dir");
        let mut transport = ScriptedTransport::new(4);
        transport.stall_on = Some(1);
        let transport = Arc::new(transport);
        let upload = Arc::new(
            ClientUpload::new("u", file_of(&dir, 16), 16, 4, transport.clone()).unwrap(),
        );

        let runner = {
            let upload = Arc::clone(&upload);
            tokio::spawn(async move { upload.run().await })
        };
        while transport.sent().is_empty() {
            tokio::task::yield_now().await;
        }
        upload.abort();

        assert_eq!(runner.await.unwrap().unwrap(), RunOutcome::Aborted);
        let snap = upload.snapshot();
        assert_eq!(snap.status, UploadStatus::Idle);
        assert_eq!(snap.progress, 0);
        assert_eq!(snap.next_chunk, 0);
    }

    #[tokio::test]
    async fn test_abort_while_paused_resets() {
        let dir = TempDir::new().expect("create temp dir");
        let mut transport = ScriptedTransport::new(4);
        transport.stall_on = Some(1);
        let transport = Arc::new(transport);
        let upload = Arc::new(
            ClientUpload::new("u", file_of(&dir, 16), 16, 4, transport.clone()).unwrap(),
        );

        let runner = {
            let upload = Arc::clone(&upload);
            tokio::spawn(async move { upload.run().await })
        };
        while transport.sent().is_empty() {
            tokio::task::yield_now().await;
        }
        upload.pause();
        runner.await.unwrap().unwrap();
        assert_eq!(upload.status(), UploadStatus::Paused);
        assert_eq!(upload.snapshot().progress, 25);

        upload.abort();
        let snap = upload.snapshot();
        assert_eq!(snap.status, UploadStatus::Idle);
        assert_eq!(snap.progress, 0);
    }

    #[tokio::test]
    async fn test_server_ahead_fast_forwards() {
        let dir = TempDir::new().expect("create temp dir");
        let transport = Arc::new(ScriptedTransport::new(4));
        transport.server_ahead.store(2, Ordering::SeqCst);
        let upload = ClientUpload::new("u", file_of(&dir, 16), 16, 4, transport.clone()).unwrap();

        assert!(matches!(
            upload.run().await.unwrap(),
            RunOutcome::Completed(_)
        ));
        assert_eq!(transport.sent(), vec![2, 3]);
    }

    #[tokio::test]
    async fn test_server_behind_is_fatal() {
        let dir = TempDir::new().expect("create temp dir");
        let transport = Arc::new(ScriptedTransport::new(4));
        let upload = ClientUpload::new("u", file_of(&dir, 16), 16, 4, transport.clone()).unwrap();
        upload.state().next_chunk = 3;
        transport.server_ahead.store(1, Ordering::SeqCst);

        assert!(matches!(
            upload.run().await,
            Err(Error::OutOfOrder {
                expected: 1,
                received: 3
            })
        ));
        assert_eq!(upload.status(), UploadStatus::Error);
    }

    #[tokio::test]
    async fn test_failure_moves_to_error_and_clears_stats() {
        let dir = TempDir::new().expect("create temp dir");
        let mut transport = ScriptedTransport::new(4);
        transport.fail_on = Some(2);
        let upload =
            ClientUpload::new("u", file_of(&dir, 16), 16, 4, Arc::new(transport)).unwrap();

        assert!(matches!(
            upload.run().await,
            Err(Error::StorageUnavailable(_))
        ));
        let snap = upload.snapshot();
        assert_eq!(snap.status, UploadStatus::Error);
        assert!(snap.stats.is_none());
        assert!(snap.error.is_some());
        assert_eq!(snap.next_chunk, 2);
    }

    #[test]
    fn test_pause_when_idle_is_noop() {
        let upload = ClientUpload::new(
            "u",
            "/tmp/none.bin",
            10,
            4,
            Arc::new(ScriptedTransport::new(3)),
        )
        .unwrap();
        assert!(!upload.pause());
        assert_eq!(upload.status(), UploadStatus::Idle);
    }
}
