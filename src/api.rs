//! HTTP API for the chat page

mod assets;
mod handlers;
mod sse;
mod types;

pub use handlers::create_router;

use crate::session::SessionRegistry;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(registry: Arc<SessionRegistry>, max_upload_bytes: usize) -> Self {
        Self {
            registry,
            max_upload_bytes,
        }
    }
}
