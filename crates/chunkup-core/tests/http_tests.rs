//! Tests for uploads over HTTP.
//!
//! A server is bound to a free localhost port and driven through
//! [`HttpTransport`].

#![cfg(all(feature = "web", feature = "http"))]

mod common;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use chunkup_core::client::{ChunkTransport, ClientUpload, HttpTransport, RunOutcome};
use chunkup_core::protocol::ChunkRequest;
use chunkup_core::receiver::ChunkReceiver;
use chunkup_core::web::{WebServer, WebServerConfig};
use chunkup_core::Error;

use common::{assert_files_equal, create_temp_dir, create_test_file, random_bytes, stored_path};

struct TestServer {
    addr: SocketAddr,
    receiver: Arc<ChunkReceiver>,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<chunkup_core::Result<()>>,
}

impl TestServer {
    async fn start(root: &std::path::Path) -> Self {
        let config = WebServerConfig {
            port: 0,
            localhost_only: true,
            storage_root: root.to_path_buf(),
            ..WebServerConfig::default()
        };
        let server = WebServer::bind(config).await.expect("bind server");
        let addr = server.local_addr().expect("local addr");
        let receiver = Arc::clone(server.receiver());

        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.run(async {
            let _ = rx.await;
        }));

        Self {
            addr,
            receiver,
            shutdown: Some(tx),
            handle,
        }
    }

    fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.handle
            .await
            .expect("server task")
            .expect("server result");
    }
}

/// A file uploaded over HTTP is rebuilt exactly and listed by the server.
#[tokio::test]
async fn test_http_upload_end_to_end() {
    let dir = create_temp_dir();
    let server = TestServer::start(&dir.path().join("server")).await;
    let source = create_test_file(dir.path(), "archive.tar", &random_bytes(200 * 1024));

    let transport = Arc::new(HttpTransport::new(server.url()).expect("http client"));
    let upload = ClientUpload::from_path("http-upload", &source, 64 * 1024, Arc::clone(&transport))
        .await
        .expect("create upload");
    assert_eq!(upload.plan().total_chunks(), 4);

    let RunOutcome::Completed(done) = upload.run().await.expect("upload") else {
        panic!("expected completion");
    };
    assert_eq!(done.file_size, 200 * 1024);
    assert_files_equal(&source, &stored_path(&server.receiver, &done));

    let listed = transport.list_uploads().await.expect("list uploads");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, done.id);

    server.stop().await;
}

/// Server rejections come back as the matching typed errors.
#[tokio::test]
async fn test_http_errors_map_to_typed_errors() {
    let dir = create_temp_dir();
    let server = TestServer::start(dir.path()).await;
    let transport = HttpTransport::new(server.url()).expect("http client");

    let request = |index: u64, checksum: Option<String>| ChunkRequest {
        upload_id: "http-errors".into(),
        chunk_index: index,
        total_chunks: 3,
        original_name: "a.txt".into(),
        payload: b"abc".to_vec(),
        checksum,
    };

    let err = transport.send_chunk(request(1, None)).await.unwrap_err();
    assert!(matches!(
        err,
        Error::OutOfOrder {
            expected: 0,
            received: 1
        }
    ));

    let err = transport
        .send_chunk(request(0, Some("00".repeat(32))))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ChecksumMismatch { .. }));

    let err = transport
        .send_chunk(ChunkRequest {
            upload_id: "bad id!".into(),
            ..request(0, None)
        })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidChunk(_)));

    server.stop().await;
}

/// Aborting over HTTP discards the partial upload, and repeating it succeeds.
#[tokio::test]
async fn test_http_abort_is_idempotent() {
    let dir = create_temp_dir();
    let server = TestServer::start(dir.path()).await;
    let transport = HttpTransport::new(server.url()).expect("http client");

    transport
        .send_chunk(ChunkRequest {
            upload_id: "http-abort".into(),
            chunk_index: 0,
            total_chunks: 2,
            original_name: "a.txt".into(),
            payload: b"half".to_vec(),
            checksum: None,
        })
        .await
        .expect("first chunk");
    assert!(server.receiver.session("http-abort").await.unwrap().is_some());

    transport.abort_upload("http-abort").await.expect("abort");
    transport.abort_upload("http-abort").await.expect("abort again");
    assert!(server.receiver.session("http-abort").await.unwrap().is_none());

    server.stop().await;
}
