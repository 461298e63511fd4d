//! HTTP server for the upload API.
//!
//! ## API Endpoints
//!
//! | Method | Endpoint | Description |
//! |--------|----------|-------------|
//! | POST | /upload/chunk | Submit one chunk (multipart) |
//! | POST | /upload/abort | Abort an upload |
//! | GET | /uploads | List completed uploads |
//! | GET | /upload/{id} | Get one completed upload |
//! | GET | /upload/{id}/download | Download a completed upload |
//! | DELETE | /upload/{id} | Delete a completed upload |
//!
//! ## Starting the server
//!
//! ```bash
//! chunkup serve                     # Default port 8080
//! chunkup serve --port 9000         # Custom port
//! chunkup serve --localhost-only    # Restrict to localhost
//! ```

pub mod error;
pub mod handlers;
pub mod state;

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;

use crate::config::{Config, StorageConfig};
use crate::error::{Error, Result};
use crate::protocol::{ROUTE_ABORT, ROUTE_CHUNK, ROUTE_UPLOADS};
use crate::receiver::ChunkReceiver;
use crate::storage::LocalStorage;

pub use error::{ApiError, ApiResult};
pub use state::{AppState, SharedState};

/// Room for multipart framing and text fields on top of the chunk payload.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// How often stale sessions are swept.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Configuration for the web server.
#[derive(Debug, Clone)]
pub struct WebServerConfig {
    /// Port to listen on (0 picks a free port)
    pub port: u16,
    /// Bind to localhost only
    pub localhost_only: bool,
    /// Largest accepted chunk payload in bytes
    pub max_chunk_size: u64,
    /// Storage root for files, sessions and the catalog
    pub storage_root: PathBuf,
    /// Sessions idle for longer than this are aborted (None to keep forever)
    pub session_max_age: Option<Duration>,
}

impl Default for WebServerConfig {
    fn default() -> Self {
        Self {
            port: crate::DEFAULT_PORT,
            localhost_only: false,
            max_chunk_size: crate::DEFAULT_MAX_CHUNK_SIZE,
            storage_root: StorageConfig::default_root(),
            session_max_age: None,
        }
    }
}

impl From<&Config> for WebServerConfig {
    fn from(config: &Config) -> Self {
        Self {
            port: config.server.port,
            localhost_only: config.server.localhost_only,
            max_chunk_size: config.server.max_chunk_size,
            storage_root: config.storage.root.clone(),
            session_max_age: Some(config.storage.session_max_age),
        }
    }
}

impl WebServerConfig {
    /// Get the bind address for the server.
    #[must_use]
    pub fn bind_addr(&self) -> SocketAddr {
        if self.localhost_only {
            SocketAddr::from(([127, 0, 0, 1], self.port))
        } else {
            SocketAddr::from(([0, 0, 0, 0], self.port))
        }
    }
}

/// Build the API router.
pub fn router(state: SharedState) -> Router {
    let body_limit = usize::try_from(state.receiver.max_chunk_size())
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD);

    Router::new()
        .route(
            ROUTE_CHUNK,
            post(handlers::upload_chunk).layer(
                ServiceBuilder::new()
                    .layer(DefaultBodyLimit::disable())
                    .layer(RequestBodyLimitLayer::new(body_limit)),
            ),
        )
        .route(ROUTE_ABORT, post(handlers::abort_upload))
        .route(ROUTE_UPLOADS, get(handlers::list_uploads))
        .route(
            "/upload/{id}",
            get(handlers::get_upload).delete(handlers::delete_upload),
        )
        .route("/upload/{id}/download", get(handlers::download_upload))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// The web server instance, bound and ready to serve.
#[derive(Debug)]
pub struct WebServer {
    config: WebServerConfig,
    listener: TcpListener,
    state: SharedState,
}

impl WebServer {
    /// Open the storage root and bind the listener.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be opened or the port cannot
    /// be bound.
    pub async fn bind(config: WebServerConfig) -> Result<Self> {
        let receiver = ChunkReceiver::open(LocalStorage::new(&config.storage_root))
            .await?
            .with_max_chunk_size(config.max_chunk_size);
        Self::bind_with(config, Arc::new(receiver)).await
    }

    /// Bind the listener in front of an existing receiver.
    ///
    /// # Errors
    ///
    /// Returns an error if the port cannot be bound.
    pub async fn bind_with(config: WebServerConfig, receiver: Arc<ChunkReceiver>) -> Result<Self> {
        let listener = TcpListener::bind(config.bind_addr()).await.map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("failed to bind {}: {e}", config.bind_addr()),
            ))
        })?;

        Ok(Self {
            config,
            listener,
            state: Arc::new(AppState::new(receiver)),
        })
    }

    /// Get the server configuration.
    #[must_use]
    pub const fn config(&self) -> &WebServerConfig {
        &self.config
    }

    /// Address the listener is bound to.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket address cannot be read.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// The receiver behind the routes.
    #[must_use]
    pub fn receiver(&self) -> &Arc<ChunkReceiver> {
        &self.state.receiver
    }

    /// Serve requests until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let cleanup = self
            .config
            .session_max_age
            .map(|max_age| tokio::spawn(cleanup_task(Arc::clone(&self.state.receiver), max_age)));

        tracing::info!("Listening on {}", self.local_addr()?);

        let result = axum::serve(self.listener, router(self.state))
            .with_graceful_shutdown(shutdown)
            .await;

        if let Some(task) = cleanup {
            task.abort();
        }
        tracing::info!("Server stopped");
        result.map_err(Error::from)
    }
}

/// Abort sessions idle for longer than `max_age`, once at startup and then
/// periodically.
async fn cleanup_task(receiver: Arc<ChunkReceiver>, max_age: Duration) {
    let Ok(max_age) = chrono::Duration::from_std(max_age) else {
        tracing::warn!("Session max age out of range, stale cleanup disabled");
        return;
    };

    let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
    loop {
        interval.tick().await;
        if let Err(e) = receiver.cleanup_stale(max_age).await {
            tracing::warn!(error = %e, "Stale session cleanup failed");
        }
    }
}
