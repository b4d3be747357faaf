//! LLM provider abstraction
//!
//! A small interface over the remote model service, so the session layer can
//! be tested against in-memory fakes.

mod error;
mod files;
mod gemini;
mod streaming;
mod types;

pub use error::{LlmError, LlmErrorKind};
pub use files::GeminiFiles;
pub use gemini::{http_client, GeminiConfig, GeminiService, DEFAULT_BASE_URL, DEFAULT_MODEL};
pub use types::*;

use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Instant;

/// Common interface for LLM providers
#[async_trait]
pub trait LlmService: Send + Sync {
    /// Make a completion request and wait for the whole reply
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError>;

    /// Make a completion request and receive the reply as fragments
    async fn stream(&self, request: &LlmRequest) -> Result<FragmentStream, LlmError>;

    /// Get the model ID
    fn model_id(&self) -> &str;
}

/// Provider-side file storage for documents attached to a chat
#[async_trait]
pub trait DocumentService: Send + Sync {
    async fn upload(&self, upload: &DocumentUpload) -> Result<DocumentRef, LlmError>;

    async fn delete(&self, document: &DocumentRef) -> Result<(), LlmError>;
}

/// Logging wrapper for LLM services
pub struct LoggingService {
    inner: Arc<dyn LlmService>,
    model_id: String,
}

impl LoggingService {
    pub fn new(inner: Arc<dyn LlmService>) -> Self {
        let model_id = inner.model_id().to_string();
        Self { inner, model_id }
    }

    fn log_failure(&self, e: &LlmError, started: Instant) {
        tracing::error!(
            model = %self.model_id,
            duration_ms = %started.elapsed().as_millis(),
            error = %e.message,
            kind = e.kind.as_str(),
            status = ?e.status,
            retryable = e.kind.is_retryable(),
            "LLM request failed"
        );
    }
}

#[async_trait]
impl LlmService for LoggingService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let start = Instant::now();
        let result = self.inner.complete(request).await;

        match &result {
            Ok(response) => {
                tracing::info!(
                    model = %self.model_id,
                    duration_ms = %start.elapsed().as_millis(),
                    turns = request.messages.len(),
                    input_tokens = response.usage.input_tokens,
                    output_tokens = response.usage.output_tokens,
                    "LLM request completed"
                );
            }
            Err(e) => self.log_failure(e, start),
        }

        result
    }

    async fn stream(&self, request: &LlmRequest) -> Result<FragmentStream, LlmError> {
        let start = Instant::now();
        let fragments = match self.inner.stream(request).await {
            Ok(fragments) => fragments,
            Err(e) => {
                self.log_failure(&e, start);
                return Err(e);
            }
        };

        tracing::info!(
            model = %self.model_id,
            first_byte_ms = %start.elapsed().as_millis(),
            turns = request.messages.len(),
            "LLM stream opened"
        );

        let model_id = self.model_id.clone();
        Ok(Box::pin(fragments.inspect(move |item| {
            if let Err(e) = item {
                tracing::error!(
                    model = %model_id,
                    duration_ms = %start.elapsed().as_millis(),
                    error = %e.message,
                    kind = e.kind.as_str(),
                    retryable = e.kind.is_retryable(),
                    "LLM stream failed"
                );
            }
        })))
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
