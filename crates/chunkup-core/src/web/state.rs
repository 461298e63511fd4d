//! Shared state for the web server.

use std::sync::Arc;

use crate::receiver::ChunkReceiver;

/// State shared by every handler.
#[derive(Debug)]
pub struct AppState {
    /// Receiver behind the chunk, abort and catalog routes
    pub receiver: Arc<ChunkReceiver>,
}

impl AppState {
    /// Wrap a receiver.
    #[must_use]
    pub const fn new(receiver: Arc<ChunkReceiver>) -> Self {
        Self { receiver }
    }
}

/// Handle passed to axum.
pub type SharedState = Arc<AppState>;
