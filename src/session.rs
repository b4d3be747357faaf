//! Per-browser chat sessions
//!
//! A session owns one append-only transcript, a gateway built from the shared
//! credential, and at most one attached document.

mod registry;
mod state;

#[cfg(test)]
mod proptests;

pub use registry::{SessionHandle, SessionRegistry};
pub use state::{transition, ChatEvent, ChatState, TransitionError};

use crate::gateway::{Gateway, GatewayBuilder};
use crate::llm::{DocumentRef, DocumentUpload, LlmError};
use crate::secrets::{ConfigError, Credential};
use async_stream::stream;
use chrono::{DateTime, Utc};
use futures::stream::Stream;
use serde::Serialize;
use std::path::Path;
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;

/// File types a document upload may have
pub const SUPPORTED_EXTENSIONS: &[&str] = &["pdf", "txt", "docx", "pptx", "md"];

/// Speaker of a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One message unit. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Turn {
    role: Role,
    content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}

/// Ordered, append-only list of turns
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Configuration(#[from] ConfigError),
    #[error("Message is empty")]
    EmptyMessage,
    #[error(transparent)]
    State(#[from] TransitionError),
    #[error(transparent)]
    Gateway(#[from] LlmError),
    #[error("{0}")]
    Document(String),
}

impl SessionError {
    /// Stable name used in API error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::EmptyMessage => "empty_message",
            Self::State(TransitionError::Busy) => "busy",
            Self::State(TransitionError::NotAwaiting) => "invalid_state",
            Self::Gateway(e) => e.kind.as_str(),
            Self::Document(_) => "document",
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Gateway(e) => e.kind.is_retryable(),
            Self::State(TransitionError::Busy) => true,
            _ => false,
        }
    }
}

/// Validate a file picked in the browser and prepare it for upload
pub fn prepare_upload(
    file_name: &str,
    bytes: Vec<u8>,
    max_bytes: usize,
) -> Result<DocumentUpload, SessionError> {
    let extension = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    if !SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(SessionError::Document(format!(
            "Unsupported file type for {file_name}. Supported: {}",
            SUPPORTED_EXTENSIONS.join(", ")
        )));
    }
    if bytes.is_empty() {
        return Err(SessionError::Document(format!("{file_name} is empty")));
    }
    if bytes.len() > max_bytes {
        return Err(SessionError::Document(format!(
            "{file_name} is larger than the {} MB limit",
            max_bytes / (1024 * 1024)
        )));
    }

    let mime_type = match extension.as_str() {
        "md" => "text/markdown".to_string(),
        _ => mime_guess::from_ext(&extension)
            .first_or_octet_stream()
            .essence_str()
            .to_string(),
    };

    Ok(DocumentUpload {
        file_name: file_name.to_string(),
        mime_type,
        bytes,
    })
}

/// One user's conversation
pub struct Session {
    id: String,
    created_at: DateTime<Utc>,
    transcript: Transcript,
    gateway: Gateway,
    document: Option<DocumentRef>,
    state: ChatState,
}

impl Session {
    /// Start a session with an empty transcript.
    ///
    /// Fails without touching the network when no usable credential was
    /// loaded.
    pub fn initialize(
        id: impl Into<String>,
        credential: &Result<Credential, ConfigError>,
        builder: &dyn GatewayBuilder,
    ) -> Result<Self, ConfigError> {
        let credential = credential.as_ref().map_err(Clone::clone)?;
        let gateway = builder.build(credential)?;

        Ok(Self {
            id: id.into(),
            created_at: Utc::now(),
            transcript: Transcript::new(),
            gateway,
            document: None,
            state: ChatState::Idle,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> ChatState {
        self.state
    }

    pub fn model_id(&self) -> &str {
        self.gateway.model_id()
    }

    pub fn document(&self) -> Option<&DocumentRef> {
        self.document.as_ref()
    }

    /// Append a turn. User turns must say something.
    pub fn append(&mut self, turn: Turn) -> Result<(), SessionError> {
        if turn.role() == Role::User && turn.content().trim().is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        self.transcript.push(turn);
        Ok(())
    }

    /// The transcript, oldest turn first
    pub fn current(&self) -> &[Turn] {
        self.transcript.turns()
    }

    fn apply(&mut self, event: ChatEvent) -> Result<(), TransitionError> {
        self.state = transition(self.state, event)?;
        Ok(())
    }

    /// Replace the attached document. The conversation starts over since the
    /// old turns were about a different file. A failed upload leaves the
    /// current document and transcript untouched.
    pub async fn attach_document(
        &mut self,
        upload: DocumentUpload,
    ) -> Result<&DocumentRef, SessionError> {
        if self.state == ChatState::AwaitingReply {
            return Err(TransitionError::Busy.into());
        }

        let document = self.gateway.documents().upload(&upload).await?;
        self.discard_document().await;
        tracing::info!(
            session = %self.id,
            file = %document.name,
            display_name = %document.display_name,
            size_bytes = document.size_bytes,
            "Document attached"
        );

        self.transcript = Transcript::new();
        Ok(self.document.insert(document))
    }

    /// Drop the attached document and start a fresh conversation
    pub async fn detach_document(&mut self) -> Result<(), SessionError> {
        if self.state == ChatState::AwaitingReply {
            return Err(TransitionError::Busy.into());
        }
        let Some(document) = self.document.take() else {
            return Err(SessionError::Document("No document is attached".to_string()));
        };

        self.gateway.documents().delete(&document).await?;
        tracing::info!(session = %self.id, file = %document.name, "Document deleted");
        self.transcript = Transcript::new();
        Ok(())
    }

    /// Release remote resources held by this session
    pub async fn end(&mut self) {
        self.discard_document().await;
        tracing::info!(session = %self.id, turns = self.transcript.len(), "Session ended");
    }

    /// Best-effort delete of the attached document
    async fn discard_document(&mut self) {
        if let Some(document) = self.document.take() {
            match self.gateway.documents().delete(&document).await {
                Ok(()) => tracing::info!(session = %self.id, file = %document.name, "Document deleted"),
                Err(e) => tracing::warn!(
                    session = %self.id,
                    file = %document.name,
                    error = %e,
                    "Failed to delete document"
                ),
            }
        }
    }
}

/// Streaming progress of one submission
#[derive(Debug)]
pub enum ReplyEvent {
    Fragment(String),
    Complete(Turn),
    Failed(SessionError),
}

/// A submitted user turn waiting for its reply.
///
/// Holds the session lock for as long as the reply is in flight. Dropping it
/// before the reply settles discards the partial reply and returns the
/// session to idle.
pub struct Submission {
    session: OwnedMutexGuard<Session>,
    user_turn: Turn,
    settled: bool,
}

impl Submission {
    /// Record the user turn and move to `awaiting_reply`
    pub fn begin(mut session: OwnedMutexGuard<Session>, text: &str) -> Result<Self, SessionError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::EmptyMessage);
        }

        session.apply(ChatEvent::Submit)?;
        let user_turn = Turn::user(text);
        session.transcript.push(user_turn.clone());
        tracing::debug!(session = %session.id, turns = session.transcript.len(), "User turn appended");

        Ok(Self {
            session,
            user_turn,
            settled: false,
        })
    }

    pub fn user_turn(&self) -> &Turn {
        &self.user_turn
    }

    fn settle(&mut self, result: Result<Turn, LlmError>) -> Result<Turn, SessionError> {
        self.settled = true;
        match result {
            Ok(turn) => {
                self.session.apply(ChatEvent::ReplyComplete)?;
                self.session.transcript.push(turn.clone());
                Ok(turn)
            }
            Err(e) => {
                self.session.apply(ChatEvent::ReplyFailed)?;
                tracing::warn!(
                    session = %self.session.id,
                    kind = e.kind.as_str(),
                    error = %e,
                    "Reply failed, transcript unchanged"
                );
                Err(e.into())
            }
        }
    }

    /// Wait for the whole reply
    pub async fn reply(mut self) -> Result<Turn, SessionError> {
        let session = &*self.session;
        let result = session
            .gateway
            .generate(session.current(), session.document.as_ref())
            .await;
        self.settle(result)
    }

    /// Relay the reply as it arrives. The stream ends after one `Complete`
    /// or `Failed` event.
    pub fn into_events(self) -> impl Stream<Item = ReplyEvent> + Send {
        stream! {
            let mut this = self;

            let opened = {
                let session = &*this.session;
                session
                    .gateway
                    .generate_stream(session.current(), session.document.as_ref())
                    .await
            };
            let mut reply = match opened {
                Ok(reply) => reply,
                Err(e) => {
                    yield settle_event(this.settle(Err(e)));
                    return;
                }
            };

            while let Some(item) = reply.next_fragment().await {
                match item {
                    Ok(fragment) => yield ReplyEvent::Fragment(fragment),
                    Err(e) => {
                        yield settle_event(this.settle(Err(e)));
                        return;
                    }
                }
            }

            yield settle_event(this.settle(reply.into_turn()));
        }
    }
}

fn settle_event(result: Result<Turn, SessionError>) -> ReplyEvent {
    match result {
        Ok(turn) => ReplyEvent::Complete(turn),
        Err(e) => ReplyEvent::Failed(e),
    }
}

impl Drop for Submission {
    fn drop(&mut self) {
        if !self.settled && self.session.apply(ChatEvent::ReplyAbandoned).is_ok() {
            tracing::info!(session = %self.session.id, "Reply abandoned, partial text discarded");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockDocuments, MockGatewayBuilder, MockLlmService, MockReply};
    use futures::StreamExt;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    fn session_with(builder: &MockGatewayBuilder) -> Arc<Mutex<Session>> {
        let session = Session::initialize("s1", &Ok(Credential::new("key")), builder).unwrap();
        Arc::new(Mutex::new(session))
    }

    fn text_upload(name: &str) -> DocumentUpload {
        prepare_upload(name, b"content".to_vec(), 1024).unwrap()
    }

    #[test]
    fn test_missing_credential_is_configuration_error() {
        let builder = MockGatewayBuilder::new();
        let missing = Err(ConfigError::Missing {
            key: "GEMINI_API_KEY".to_string(),
            searched: "secrets.toml".to_string(),
        });

        let result = Session::initialize("s1", &missing, &builder);
        assert!(matches!(result, Err(ConfigError::Missing { .. })));
        assert_eq!(builder.build_count(), 0);
        assert!(builder.llm.recorded_requests().is_empty());
    }

    #[test]
    fn test_initialize_starts_empty_and_idle() {
        let builder = MockGatewayBuilder::new();
        let session = Session::initialize("s1", &Ok(Credential::new("key")), &builder).unwrap();
        assert!(session.current().is_empty());
        assert_eq!(session.state(), ChatState::Idle);
        assert_eq!(session.model_id(), "mock-model");
        assert_eq!(builder.build_count(), 1);
    }

    #[test]
    fn test_append_keeps_order_and_rejects_blank_user_turns() {
        let builder = MockGatewayBuilder::new();
        let mut session = Session::initialize("s1", &Ok(Credential::new("key")), &builder).unwrap();

        session.append(Turn::user("a")).unwrap();
        session.append(Turn::assistant("b")).unwrap();
        assert!(matches!(
            session.append(Turn::user("  ")),
            Err(SessionError::EmptyMessage)
        ));
        assert_eq!(session.current(), &[Turn::user("a"), Turn::assistant("b")]);
    }

    #[tokio::test]
    async fn test_streaming_scenario_hello() {
        let builder = MockGatewayBuilder::new();
        builder.llm.queue(MockReply::fragments(&["Hi", " there!"]));
        let handle = session_with(&builder);

        let submission = Submission::begin(handle.clone().lock_owned().await, "Hello").unwrap();
        assert_eq!(submission.user_turn(), &Turn::user("Hello"));

        let events: Vec<ReplyEvent> = submission.into_events().collect().await;
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], ReplyEvent::Fragment(f) if f == "Hi"));
        assert!(matches!(&events[1], ReplyEvent::Fragment(f) if f == " there!"));
        assert!(matches!(&events[2], ReplyEvent::Complete(t) if *t == Turn::assistant("Hi there!")));

        let session = handle.lock().await;
        assert_eq!(
            session.current(),
            &[Turn::user("Hello"), Turn::assistant("Hi there!")]
        );
        assert_eq!(session.state(), ChatState::Idle);
    }

    #[tokio::test]
    async fn test_non_streaming_reply() {
        let builder = MockGatewayBuilder::new();
        builder.llm.queue(MockReply::fragments(&["Hi there!"]));
        let handle = session_with(&builder);

        let submission = Submission::begin(handle.clone().lock_owned().await, "Hello").unwrap();
        let turn = submission.reply().await.unwrap();
        assert_eq!(turn, Turn::assistant("Hi there!"));
        assert_eq!(handle.lock().await.current().len(), 2);
    }

    #[tokio::test]
    async fn test_auth_failure_appends_no_assistant_turn() {
        let builder = MockGatewayBuilder::new();
        builder
            .llm
            .queue(MockReply::Error(LlmError::auth("API key not valid")));
        let handle = session_with(&builder);

        let submission = Submission::begin(handle.clone().lock_owned().await, "Hello").unwrap();
        let err = submission.reply().await.unwrap_err();
        assert_eq!(err.kind(), "authentication");
        assert!(!err.is_retryable());

        let session = handle.lock().await;
        assert_eq!(session.current(), &[Turn::user("Hello")]);
        assert_eq!(session.state(), ChatState::Idle);
    }

    #[tokio::test]
    async fn test_stream_failure_mid_reply_discards_partial_text() {
        let builder = MockGatewayBuilder::new();
        builder.llm.queue(MockReply::FailAfter(
            vec!["Hal".to_string()],
            LlmError::network("connection reset"),
        ));
        let handle = session_with(&builder);

        let submission = Submission::begin(handle.clone().lock_owned().await, "Hello").unwrap();
        let events: Vec<ReplyEvent> = submission.into_events().collect().await;
        assert!(matches!(events.last(), Some(ReplyEvent::Failed(e)) if e.is_retryable()));

        let session = handle.lock().await;
        assert_eq!(session.current(), &[Turn::user("Hello")]);
        assert_eq!(session.state(), ChatState::Idle);
    }

    #[tokio::test]
    async fn test_second_submission_is_rejected_while_awaiting() {
        let builder = MockGatewayBuilder::new();
        builder.llm.queue(MockReply::Hang(vec!["thinking".to_string()]));
        let handle = session_with(&builder);

        let submission = Submission::begin(handle.clone().lock_owned().await, "Hello").unwrap();
        let mut events = Box::pin(submission.into_events());
        assert!(matches!(events.next().await, Some(ReplyEvent::Fragment(_))));

        // The in-flight reply holds the lock
        assert!(handle.clone().try_lock_owned().is_err());

        // Client disconnects: stream dropped, partial reply discarded
        drop(events);
        let session = handle.lock().await;
        assert_eq!(session.state(), ChatState::Idle);
        assert_eq!(session.current(), &[Turn::user("Hello")]);
    }

    #[tokio::test]
    async fn test_begin_rejects_empty_text() {
        let builder = MockGatewayBuilder::new();
        let handle = session_with(&builder);

        let result = Submission::begin(handle.clone().lock_owned().await, "   ");
        assert!(matches!(result, Err(SessionError::EmptyMessage)));
        assert!(handle.lock().await.current().is_empty());
    }

    #[tokio::test]
    async fn test_full_transcript_sent_on_each_call() {
        let builder = MockGatewayBuilder::new();
        builder.llm.queue(MockReply::fragments(&["first"]));
        builder.llm.queue(MockReply::fragments(&["second"]));
        let handle = session_with(&builder);

        for text in ["one", "two"] {
            let submission = Submission::begin(handle.clone().lock_owned().await, text).unwrap();
            submission.reply().await.unwrap();
        }

        let requests = builder.llm.recorded_requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].messages.len(), 1);
        assert_eq!(requests[1].messages.len(), 3);
    }

    #[tokio::test]
    async fn test_attach_document_replaces_previous_and_resets_transcript() {
        let builder = MockGatewayBuilder::new();
        builder.llm.queue(MockReply::fragments(&["ok"]));
        let handle = session_with(&builder);

        let mut session = handle.clone().lock_owned().await;
        let first = session.attach_document(text_upload("a.txt")).await.unwrap().clone();
        let submission = Submission::begin(session, "Summarize").unwrap();
        submission.reply().await.unwrap();

        let mut session = handle.lock().await;
        assert_eq!(session.current().len(), 2);
        let second = session.attach_document(text_upload("b.md")).await.unwrap().clone();

        assert_ne!(first.name, second.name);
        assert_eq!(second.mime_type, "text/markdown");
        assert!(session.current().is_empty());
        assert_eq!(builder.documents.deleted(), vec![first.name.clone()]);
    }

    #[tokio::test]
    async fn test_document_sent_with_first_user_turn() {
        let builder = MockGatewayBuilder::new();
        builder.llm.queue(MockReply::fragments(&["ok"]));
        let handle = session_with(&builder);

        let mut session = handle.clone().lock_owned().await;
        let doc = session.attach_document(text_upload("a.pdf")).await.unwrap().clone();
        Submission::begin(session, "Summarize").unwrap().reply().await.unwrap();

        let request = &builder.llm.recorded_requests()[0];
        assert_eq!(
            request.messages[0].content[0],
            crate::llm::ContentBlock::file(&doc)
        );
    }

    #[tokio::test]
    async fn test_detach_and_end_delete_remote_file() {
        let builder = MockGatewayBuilder::new();
        let handle = session_with(&builder);
        let mut session = handle.lock().await;

        assert!(matches!(
            session.detach_document().await,
            Err(SessionError::Document(_))
        ));

        let doc = session.attach_document(text_upload("a.txt")).await.unwrap().clone();
        session.detach_document().await.unwrap();
        assert!(session.document().is_none());

        let doc2 = session.attach_document(text_upload("b.txt")).await.unwrap().clone();
        session.end().await;
        assert_eq!(builder.documents.deleted(), vec![doc.name, doc2.name]);
    }

    #[tokio::test]
    async fn test_failed_replacement_keeps_current_document() {
        let builder = MockGatewayBuilder::new();
        builder.llm.queue(MockReply::fragments(&["ok"]));
        let handle = session_with(&builder);

        let mut session = handle.clone().lock_owned().await;
        let doc = session.attach_document(text_upload("a.txt")).await.unwrap().clone();
        Submission::begin(session, "Summarize").unwrap().reply().await.unwrap();

        builder.documents.fail_uploads(true);
        let mut session = handle.lock().await;
        let err = session.attach_document(text_upload("b.txt")).await.unwrap_err();
        assert!(matches!(err, SessionError::Gateway(_)));
        assert_eq!(session.document(), Some(&doc));
        assert_eq!(session.current().len(), 2);
        assert!(builder.documents.deleted().is_empty());
    }

    #[tokio::test]
    async fn test_empty_streamed_reply_appends_no_turn() {
        let builder = MockGatewayBuilder::new();
        builder.llm.queue(MockReply::Fragments(vec![]));
        let handle = session_with(&builder);

        let submission = Submission::begin(handle.clone().lock_owned().await, "Hello").unwrap();
        let events: Vec<ReplyEvent> = submission.into_events().collect().await;
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], ReplyEvent::Failed(e) if e.kind() == "provider"));

        let session = handle.lock().await;
        assert_eq!(session.current(), &[Turn::user("Hello")]);
        assert_eq!(session.state(), ChatState::Idle);
    }

    #[tokio::test]
    async fn test_failed_upload_leaves_no_document() {
        let builder = MockGatewayBuilder::with_documents(MockDocuments::failing());
        let handle = session_with(&builder);
        let mut session = handle.lock().await;

        let err = session.attach_document(text_upload("a.txt")).await.unwrap_err();
        assert!(matches!(err, SessionError::Gateway(_)));
        assert!(session.document().is_none());
    }

    #[test]
    fn test_prepare_upload_validation() {
        assert!(prepare_upload("report.PDF", vec![1], 10).is_ok());
        assert_eq!(
            prepare_upload("report.pdf", vec![1], 10).unwrap().mime_type,
            "application/pdf"
        );
        assert!(matches!(
            prepare_upload("image.png", vec![1], 10),
            Err(SessionError::Document(_))
        ));
        assert!(matches!(
            prepare_upload("notes.txt", vec![], 10),
            Err(SessionError::Document(_))
        ));
        assert!(matches!(
            prepare_upload("notes.txt", vec![0; 11], 10),
            Err(SessionError::Document(_))
        ));
        assert!(matches!(
            prepare_upload("README", vec![1], 10),
            Err(SessionError::Document(_))
        ));
    }
}
