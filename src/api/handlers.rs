//! HTTP request handlers

use super::assets::{get_index_html, serve_static};
use super::sse::reply_sse;
use super::types::{
    ChatRequest, ChatResponse, DocumentResponse, ErrorResponse, SessionResponse, SuccessResponse,
};
use super::AppState;
use crate::llm::LlmErrorKind;
use crate::secrets::ConfigError;
use crate::session::{prepare_upload, SessionError, SessionHandle, Submission, TransitionError};
use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};

pub const SESSION_COOKIE: &str = "chat_session";

/// Room for multipart framing around the file itself
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    let upload_limit = state.max_upload_bytes.saturating_add(MULTIPART_OVERHEAD);

    Router::new()
        .route("/", get(serve_page))
        .route("/assets/*path", get(serve_static))
        .route("/api/session", get(get_session).delete(end_session))
        .route("/api/chat", post(send_chat))
        .route(
            "/api/document",
            post(upload_document)
                .delete(detach_document)
                .layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/version", get(get_version))
        .with_state(state)
}

// ============================================================
// Page
// ============================================================

async fn serve_page() -> impl IntoResponse {
    match get_index_html() {
        Some(content) => Html(content).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Html("<h1>404 - ui/index.html not found</h1>".to_string()),
        )
            .into_response(),
    }
}

// ============================================================
// Session
// ============================================================

/// Resolve the caller's session from its cookie, starting one if needed
async fn session_for(
    state: &AppState,
    jar: CookieJar,
) -> Result<(CookieJar, SessionHandle), AppError> {
    let existing = jar.get(SESSION_COOKIE).map(|c| c.value().to_string());
    let (id, handle) = state.registry.get_or_create(existing.as_deref()).await?;

    let jar = if existing.as_deref() == Some(id.as_str()) {
        jar
    } else {
        jar.add(
            Cookie::build((SESSION_COOKIE, id))
                .path("/")
                .http_only(true)
                .same_site(SameSite::Lax),
        )
    };
    Ok((jar, handle))
}

fn busy() -> AppError {
    AppError::Session(TransitionError::Busy.into())
}

async fn get_session(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<SessionResponse>), AppError> {
    let (jar, handle) = session_for(&state, jar).await?;
    // A reply in flight holds the lock; report busy rather than wait on it
    let session = handle.try_lock().map_err(|_| busy())?;

    let response = SessionResponse {
        session_id: session.id().to_string(),
        created_at: session.created_at(),
        model: session.model_id().to_string(),
        state: session.state(),
        transcript: session.current().to_vec(),
        document: session.document().cloned(),
    };
    Ok((jar, Json(response)))
}

async fn end_session(State(state): State<AppState>, jar: CookieJar) -> impl IntoResponse {
    let ended = match jar.get(SESSION_COOKIE) {
        Some(cookie) => state.registry.end(cookie.value()).await,
        None => false,
    };
    let jar = jar.remove(Cookie::build(SESSION_COOKIE).path("/"));
    (jar, Json(SuccessResponse { success: ended }))
}

// ============================================================
// Chat
// ============================================================

async fn send_chat(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<ChatRequest>,
) -> Result<Response, AppError> {
    let (jar, handle) = session_for(&state, jar).await?;
    let guard = handle.try_lock_owned().map_err(|_| busy())?;
    let submission = Submission::begin(guard, &req.text)?;
    let user_turn = submission.user_turn().clone();

    if req.stream {
        return Ok((jar, reply_sse(user_turn, submission.into_events())).into_response());
    }

    let reply = submission.reply().await?;
    Ok((jar, Json(ChatResponse { user_turn, reply })).into_response())
}

// ============================================================
// Document
// ============================================================

async fn upload_document(
    State(state): State<AppState>,
    jar: CookieJar,
    mut multipart: Multipart,
) -> Result<(CookieJar, Json<DocumentResponse>), AppError> {
    let mut file = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        let name = field.file_name().unwrap_or("document").to_string();
        let bytes = field.bytes().await?;
        file = Some((name, bytes));
        break;
    }
    let Some((name, bytes)) = file else {
        return Err(AppError::BadRequest("Missing multipart field 'file'".to_string()));
    };

    let upload = prepare_upload(&name, bytes.to_vec(), state.max_upload_bytes)?;
    let (jar, handle) = session_for(&state, jar).await?;
    let mut session = handle.try_lock().map_err(|_| busy())?;
    let document = session.attach_document(upload).await?.clone();

    Ok((jar, Json(DocumentResponse { document })))
}

async fn detach_document(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<SuccessResponse>), AppError> {
    let (jar, handle) = session_for(&state, jar).await?;
    let mut session = handle.try_lock().map_err(|_| busy())?;
    session.detach_document().await?;
    Ok((jar, Json(SuccessResponse { success: true })))
}

// ============================================================
// Version
// ============================================================

async fn get_version() -> &'static str {
    concat!("gemini-chat ", env!("CARGO_PKG_VERSION"))
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
enum AppError {
    BadRequest(String),
    Session(SessionError),
}

impl From<SessionError> for AppError {
    fn from(e: SessionError) -> Self {
        AppError::Session(e)
    }
}

impl From<ConfigError> for AppError {
    fn from(e: ConfigError) -> Self {
        AppError::Session(e.into())
    }
}

impl From<MultipartError> for AppError {
    fn from(e: MultipartError) -> Self {
        AppError::BadRequest(format!("Invalid upload: {}", e.body_text()))
    }
}

fn session_status(e: &SessionError) -> StatusCode {
    match e {
        SessionError::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
        SessionError::EmptyMessage | SessionError::Document(_) => StatusCode::BAD_REQUEST,
        SessionError::State(_) => StatusCode::CONFLICT,
        SessionError::Gateway(e) => match e.kind {
            LlmErrorKind::Network => StatusCode::GATEWAY_TIMEOUT,
            LlmErrorKind::Auth | LlmErrorKind::Provider => StatusCode::BAD_GATEWAY,
            LlmErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
        },
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::new(msg, "bad_request", false),
            ),
            AppError::Session(e) => (
                session_status(&e),
                ErrorResponse::new(e.to_string(), e.kind(), e.is_retryable()),
            ),
        };

        (status, Json(body)).into_response()
    }
}
