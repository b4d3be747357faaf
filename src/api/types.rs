//! API request and response types

use crate::llm::DocumentRef;
use crate::session::{ChatState, Turn};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Request to send a chat message
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub text: String,
    #[serde(default = "default_stream")]
    pub stream: bool,
}

fn default_stream() -> bool {
    true
}

/// Snapshot of the caller's session
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub model: String,
    pub state: ChatState,
    pub transcript: Vec<Turn>,
    pub document: Option<DocumentRef>,
}

/// Non-streaming chat reply
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub user_turn: Turn,
    pub reply: Turn,
}

#[derive(Debug, Serialize)]
pub struct DocumentResponse {
    pub document: DocumentRef,
}

/// Generic success response
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: &'static str,
    pub retryable: bool,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, kind: &'static str, retryable: bool) -> Self {
        Self {
            error: error.into(),
            kind,
            retryable,
        }
    }
}
