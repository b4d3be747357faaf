//! Model gateway
//!
//! Translates a transcript into one provider request and adapts the reply
//! back into a single assistant turn, either whole or fragment by fragment.

use crate::llm::{
    http_client, ContentBlock, DocumentRef, DocumentService, FragmentStream, GeminiConfig,
    GeminiFiles, GeminiService, LlmError, LlmMessage, LlmRequest, LlmService, LoggingService,
    MessageRole,
};
use crate::secrets::{ConfigError, Credential};
use crate::session::{Role, Turn};
use futures::StreamExt;
use std::sync::Arc;

/// A session's handle on the remote model service
#[derive(Clone)]
pub struct Gateway {
    llm: Arc<dyn LlmService>,
    documents: Arc<dyn DocumentService>,
}

impl Gateway {
    pub fn new(llm: Arc<dyn LlmService>, documents: Arc<dyn DocumentService>) -> Self {
        Self { llm, documents }
    }

    pub fn model_id(&self) -> &str {
        self.llm.model_id()
    }

    pub fn documents(&self) -> &dyn DocumentService {
        self.documents.as_ref()
    }

    /// Every turn in order. An attached document rides along at the front of
    /// the first user turn.
    pub fn build_request(transcript: &[Turn], document: Option<&DocumentRef>) -> LlmRequest {
        let mut document = document;
        let messages = transcript
            .iter()
            .map(|turn| {
                let mut content = Vec::with_capacity(2);
                let role = match turn.role() {
                    Role::User => {
                        if let Some(doc) = document.take() {
                            content.push(ContentBlock::file(doc));
                        }
                        MessageRole::User
                    }
                    Role::Assistant => MessageRole::Assistant,
                };
                content.push(ContentBlock::text(turn.content()));
                LlmMessage { role, content }
            })
            .collect();

        LlmRequest {
            messages,
            max_tokens: None,
        }
    }

    /// One outbound call, whole reply
    pub async fn generate(
        &self,
        transcript: &[Turn],
        document: Option<&DocumentRef>,
    ) -> Result<Turn, LlmError> {
        reject_empty(transcript)?;
        let response = self
            .llm
            .complete(&Self::build_request(transcript, document))
            .await?;
        assistant_turn(response.text)
    }

    /// One outbound call, reply as a lazy fragment stream
    pub async fn generate_stream(
        &self,
        transcript: &[Turn],
        document: Option<&DocumentRef>,
    ) -> Result<ReplyStream, LlmError> {
        reject_empty(transcript)?;
        let fragments = self
            .llm
            .stream(&Self::build_request(transcript, document))
            .await?;
        Ok(ReplyStream::new(fragments))
    }
}

fn reject_empty(transcript: &[Turn]) -> Result<(), LlmError> {
    if transcript.is_empty() {
        return Err(LlmError::invalid_request(
            "Cannot generate a reply to an empty transcript",
        ));
    }
    Ok(())
}

fn assistant_turn(text: String) -> Result<Turn, LlmError> {
    if text.is_empty() {
        return Err(LlmError::provider("Model returned an empty reply"));
    }
    Ok(Turn::assistant(text))
}

/// Streaming reply in progress. Accumulates fragments in arrival order.
pub struct ReplyStream {
    fragments: FragmentStream,
    text: String,
}

impl ReplyStream {
    fn new(fragments: FragmentStream) -> Self {
        Self {
            fragments,
            text: String::new(),
        }
    }

    /// Pull the next fragment; `None` once the provider is done
    pub async fn next_fragment(&mut self) -> Option<Result<String, LlmError>> {
        let item = self.fragments.next().await?;
        if let Ok(fragment) = &item {
            self.text.push_str(fragment);
        }
        Some(item)
    }

    /// The assistant turn built from everything received so far. A reply
    /// with no text is a provider failure, not a turn.
    pub fn into_turn(self) -> Result<Turn, LlmError> {
        assistant_turn(self.text)
    }

    /// Drain the stream into one turn
    #[cfg(test)]
    pub async fn collect(mut self) -> Result<Turn, LlmError> {
        while let Some(item) = self.next_fragment().await {
            item?;
        }
        self.into_turn()
    }
}

/// Creates a gateway for a credential
pub trait GatewayBuilder: Send + Sync {
    fn build(&self, credential: &Credential) -> Result<Gateway, ConfigError>;
}

/// Production builder: Gemini for both chat and files, with request logging
pub struct GeminiGatewayBuilder {
    config: GeminiConfig,
}

impl GeminiGatewayBuilder {
    pub fn new(config: GeminiConfig) -> Self {
        Self { config }
    }
}

impl GatewayBuilder for GeminiGatewayBuilder {
    fn build(&self, credential: &Credential) -> Result<Gateway, ConfigError> {
        let client = http_client(&self.config).map_err(|e| ConfigError::Client(e.to_string()))?;

        let service: Arc<dyn LlmService> = Arc::new(GeminiService::new(
            client.clone(),
            credential.clone(),
            self.config.clone(),
        ));
        let files = GeminiFiles::new(client, credential.clone(), self.config.clone());

        Ok(Gateway::new(
            Arc::new(LoggingService::new(service)),
            Arc::new(files),
        ))
    }
}
