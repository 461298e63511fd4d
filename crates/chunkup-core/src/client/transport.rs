//! Transfer channels that carry one chunk to a receiver.

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::protocol::{ChunkOutcome, ChunkRequest};
use crate::receiver::ChunkReceiver;

/// A request primitive that sends one chunk and returns the receiver's
/// acknowledgement.
///
/// Implementations report receiver rejections with the matching typed error
/// ([`Error::OutOfOrder`], [`Error::ChecksumMismatch`], ...), so the upload
/// state machine can tell them apart.
pub trait ChunkTransport: Send + Sync + 'static {
    /// Send one chunk.
    fn send_chunk(&self, request: ChunkRequest)
        -> impl Future<Output = Result<ChunkOutcome>> + Send;

    /// Ask the receiver to discard an upload's partial data.
    fn abort_upload(&self, upload_id: &str) -> impl Future<Output = Result<()>> + Send;

    /// Send one chunk, giving up as soon as `cancel` fires.
    ///
    /// The in-flight request is dropped on cancellation and
    /// [`Error::Cancelled`] is returned.
    fn send_chunk_cancellable(
        &self,
        request: ChunkRequest,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<ChunkOutcome>> + Send {
        async move {
            tokio::select! {
                biased;
                () = cancel.cancelled() => Err(Error::Cancelled),
                result = self.send_chunk(request) => result,
            }
        }
    }
}

/// Channel that hands chunks straight to an in-process [`ChunkReceiver`].
#[derive(Debug, Clone)]
pub struct LocalTransport {
    receiver: Arc<ChunkReceiver>,
}

impl LocalTransport {
    /// Wrap a receiver.
    #[must_use]
    pub const fn new(receiver: Arc<ChunkReceiver>) -> Self {
        Self { receiver }
    }

    /// The wrapped receiver.
    #[must_use]
    pub const fn receiver(&self) -> &Arc<ChunkReceiver> {
        &self.receiver
    }
}

impl ChunkTransport for LocalTransport {
    async fn send_chunk(&self, request: ChunkRequest) -> Result<ChunkOutcome> {
        self.receiver.receive(request).await
    }

    async fn abort_upload(&self, upload_id: &str) -> Result<()> {
        self.receiver.abort(upload_id).await.map(|_| ())
    }
}

#[cfg(feature = "http")]
pub use http::HttpTransport;

#[cfg(feature = "http")]
mod http {
    use std::time::Duration;

    use reqwest::multipart::{Form, Part};
    use reqwest::{Client, Response};

    use super::ChunkTransport;
    use crate::error::{Error, Result};
    use crate::protocol::{
        AbortRequest, ChunkOutcome, ChunkReceipt, ChunkRequest, ErrorBody, UploadResource,
        FIELD_CHECKSUM, FIELD_CHUNK, FIELD_CHUNK_INDEX, FIELD_FILE_IDENTIFIER,
        FIELD_ORIGINAL_NAME, FIELD_TOTAL_CHUNKS, ROUTE_ABORT, ROUTE_CHUNK, ROUTE_UPLOADS,
    };

    /// HTTP request timeout.
    const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

    /// Channel that posts chunks to a Chunkup server over HTTP.
    #[derive(Debug, Clone)]
    pub struct HttpTransport {
        client: Client,
        base_url: String,
    }

    impl HttpTransport {
        /// Create a transport for the server at `base_url`.
        ///
        /// # Errors
        ///
        /// Returns an error if the HTTP client cannot be built.
        pub fn new(base_url: impl Into<String>) -> Result<Self> {
            Self::with_timeout(base_url, DEFAULT_TIMEOUT)
        }

        /// Create a transport with a custom per-request timeout.
        ///
        /// # Errors
        ///
        /// Returns an error if the HTTP client cannot be built.
        pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
            let client = Client::builder()
                .timeout(timeout)
                .user_agent(format!("chunkup/{}", crate::VERSION))
                .build()
                .map_err(|e| Error::Transport(format!("Failed to create HTTP client: {e}")))?;

            Ok(Self {
                client,
                base_url: base_url.into().trim_end_matches('/').to_string(),
            })
        }

        /// Base URL of the server.
        #[must_use]
        pub fn base_url(&self) -> &str {
            &self.base_url
        }

        fn url(&self, path: &str) -> String {
            format!("{}{path}", self.base_url)
        }

        /// Fetch the server's catalog of completed uploads.
        ///
        /// # Errors
        ///
        /// Returns an error if the request fails or the reply cannot be parsed.
        pub async fn list_uploads(&self) -> Result<Vec<UploadResource>> {
            let response = self
                .client
                .get(self.url(ROUTE_UPLOADS))
                .send()
                .await
                .map_err(|e| Error::Transport(format!("Failed to list uploads: {e}")))?;

            let response = check_status(response).await?;
            response
                .json()
                .await
                .map_err(|e| Error::Transport(format!("Failed to parse upload list: {e}")))
        }
    }

    impl ChunkTransport for HttpTransport {
        async fn send_chunk(&self, request: ChunkRequest) -> Result<ChunkOutcome> {
            let chunk = Part::bytes(request.payload)
                .file_name(request.original_name.clone())
                .mime_str("application/octet-stream")
                .map_err(|e| Error::Transport(e.to_string()))?;

            let mut form = Form::new()
                .part(FIELD_CHUNK, chunk)
                .text(FIELD_CHUNK_INDEX, request.chunk_index.to_string())
                .text(FIELD_TOTAL_CHUNKS, request.total_chunks.to_string())
                .text(FIELD_ORIGINAL_NAME, request.original_name)
                .text(FIELD_FILE_IDENTIFIER, request.upload_id);
            if let Some(checksum) = request.checksum {
                form = form.text(FIELD_CHECKSUM, checksum);
            }

            let response = self
                .client
                .post(self.url(ROUTE_CHUNK))
                .multipart(form)
                .send()
                .await
                .map_err(|e| Error::Transport(format!("Failed to send chunk: {e}")))?;

            let response = check_status(response).await?;
            let receipt: ChunkReceipt = response
                .json()
                .await
                .map_err(|e| Error::Transport(format!("Failed to parse chunk reply: {e}")))?;

            receipt.into_outcome()
        }

        async fn abort_upload(&self, upload_id: &str) -> Result<()> {
            let response = self
                .client
                .post(self.url(ROUTE_ABORT))
                .json(&AbortRequest {
                    file_identifier: upload_id.to_string(),
                })
                .send()
                .await
                .map_err(|e| Error::Transport(format!("Failed to abort upload: {e}")))?;

            check_status(response).await.map(|_| ())
        }
    }

    /// Turn a non-success reply into the error its body describes.
    async fn check_status(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let err = serde_json::from_str::<ErrorBody>(&text).map_or_else(
            |_| Error::Rejected {
                status: status.as_u16(),
                message: if text.is_empty() {
                    status.to_string()
                } else {
                    text
                },
            },
            |body| body.into_error(status.as_u16()),
        );
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalStorage;
    use std::time::Duration;
    use tempfile::TempDir;

    struct NeverReplies;

    impl ChunkTransport for NeverReplies {
        async fn send_chunk(&self, _request: ChunkRequest) -> Result<ChunkOutcome> {
            std::future::pending().await
        }

        async fn abort_upload(&self, _upload_id: &str) -> Result<()> {
            Ok(())
        }
    }

    fn request() -> ChunkRequest {
        ChunkRequest {
            upload_id: "abc".into(),
            chunk_index: 0,
            total_chunks: 1,
            original_name: "a.txt".into(),
            payload: b"data".to_vec(),
            checksum: None,
        }
    }

    #[tokio::test]
    async fn test_cancellation_drops_request() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result = NeverReplies.send_chunk_cancellable(request(), &cancel).await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_local_transport_roundtrip() {
        let dir = TempDir::new().expect("create temp dir");
        let receiver = ChunkReceiver::open(LocalStorage::new(dir.path()))
            .await
            .unwrap();
        let transport = LocalTransport::new(Arc::new(receiver));

        let outcome = transport
            .send_chunk_cancellable(request(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.is_completed());

        transport.abort_upload("abc").await.unwrap();
    }
}
