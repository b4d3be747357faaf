//! Mock implementations for testing
//!
//! These mocks stand in for the remote model service so sessions and the HTTP
//! layer can be exercised without network access.

use crate::gateway::{Gateway, GatewayBuilder};
use crate::llm::{
    DocumentRef, DocumentService, DocumentUpload, FragmentStream, LlmError, LlmRequest,
    LlmResponse, LlmService, Usage,
};
use crate::secrets::{ConfigError, Credential};
use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ============================================================================
// Mock LLM Service
// ============================================================================

/// Scripted reply for one request
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Reply arrives as these fragments
    Fragments(Vec<String>),
    /// Request fails before any text
    Error(LlmError),
    /// Some fragments, then the stream breaks
    FailAfter(Vec<String>, LlmError),
    /// Some fragments, then nothing ever again
    Hang(Vec<String>),
}

impl MockReply {
    pub fn fragments(parts: &[&str]) -> Self {
        Self::Fragments(parts.iter().map(|p| (*p).to_string()).collect())
    }
}

/// Mock LLM service that plays back queued replies
pub struct MockLlmService {
    replies: Mutex<VecDeque<MockReply>>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl MockLlmService {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn queue(&self, reply: MockReply) {
        self.replies.lock().unwrap().push_back(reply);
    }

    /// Get recorded requests
    pub fn recorded_requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next_reply(&self, request: &LlmRequest) -> MockReply {
        self.requests.lock().unwrap().push(request.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| MockReply::Error(LlmError::network("No mock reply queued")))
    }
}

#[async_trait]
impl LlmService for MockLlmService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        match self.next_reply(request) {
            MockReply::Fragments(parts) => Ok(LlmResponse {
                text: parts.concat(),
                usage: Usage::default(),
            }),
            MockReply::Error(e) | MockReply::FailAfter(_, e) => Err(e),
            MockReply::Hang(_) => std::future::pending().await,
        }
    }

    async fn stream(&self, request: &LlmRequest) -> Result<FragmentStream, LlmError> {
        let fragments = match self.next_reply(request) {
            MockReply::Fragments(parts) => stream::iter(parts.into_iter().map(Ok)).boxed(),
            MockReply::Error(e) => return Err(e),
            MockReply::FailAfter(parts, e) => stream::iter(parts.into_iter().map(Ok))
                .chain(stream::once(async move { Err(e) }))
                .boxed(),
            MockReply::Hang(parts) => stream::iter(parts.into_iter().map(Ok))
                .chain(stream::pending())
                .boxed(),
        };
        Ok(fragments)
    }

    fn model_id(&self) -> &str {
        "mock-model"
    }
}

// ============================================================================
// Mock Document Storage
// ============================================================================

pub fn sample_document(name: &str) -> DocumentRef {
    DocumentRef {
        name: name.to_string(),
        uri: format!("https://files.test/v1beta/{name}"),
        mime_type: "application/pdf".to_string(),
        display_name: "report.pdf".to_string(),
        size_bytes: 1024,
        uploaded_at: Utc::now(),
    }
}

/// In-memory file storage that hands out sequential names
pub struct MockDocuments {
    fail: AtomicBool,
    next_id: AtomicUsize,
    deleted: Mutex<Vec<String>>,
}

impl MockDocuments {
    pub fn new() -> Self {
        Self {
            fail: AtomicBool::new(false),
            next_id: AtomicUsize::new(1),
            deleted: Mutex::new(Vec::new()),
        }
    }

    /// Every upload is rejected by the provider
    pub fn failing() -> Self {
        let documents = Self::new();
        documents.fail_uploads(true);
        documents
    }

    pub fn fail_uploads(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Names of deleted files, in order
    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl DocumentService for MockDocuments {
    async fn upload(&self, upload: &DocumentUpload) -> Result<DocumentRef, LlmError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(LlmError::provider("Upload rejected"));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(DocumentRef {
            name: format!("files/{id}"),
            uri: format!("https://files.test/v1beta/files/{id}"),
            mime_type: upload.mime_type.clone(),
            display_name: upload.file_name.clone(),
            size_bytes: upload.bytes.len() as u64,
            uploaded_at: Utc::now(),
        })
    }

    async fn delete(&self, document: &DocumentRef) -> Result<(), LlmError> {
        self.deleted.lock().unwrap().push(document.name.clone());
        Ok(())
    }
}

// ============================================================================
// Mock Gateway Builder
// ============================================================================

/// Builds gateways over shared mocks and counts how often it was asked to
pub struct MockGatewayBuilder {
    pub llm: Arc<MockLlmService>,
    pub documents: Arc<MockDocuments>,
    builds: AtomicUsize,
}

impl MockGatewayBuilder {
    pub fn new() -> Self {
        Self::with_documents(MockDocuments::new())
    }

    pub fn with_documents(documents: MockDocuments) -> Self {
        Self {
            llm: Arc::new(MockLlmService::new()),
            documents: Arc::new(documents),
            builds: AtomicUsize::new(0),
        }
    }

    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

impl GatewayBuilder for MockGatewayBuilder {
    fn build(&self, _credential: &Credential) -> Result<Gateway, ConfigError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(Gateway::new(self.llm.clone(), self.documents.clone()))
    }
}
