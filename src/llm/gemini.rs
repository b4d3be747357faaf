//! Google Gemini provider implementation

use super::streaming::sse_data_stream;
use super::types::{ContentBlock, FragmentStream, LlmRequest, LlmResponse, MessageRole, Usage};
use super::{LlmError, LlmService};
use crate::secrets::Credential;
use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Finish reasons meaning the model refused or was cut off by a filter
const BLOCKED_FINISH_REASONS: &[&str] = &[
    "SAFETY",
    "RECITATION",
    "PROHIBITED_CONTENT",
    "BLOCKLIST",
    "SPII",
];

/// Settings shared by every Gemini call
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub model: String,
    pub base_url: String,
    /// Total budget for a non-streaming call; idle budget per streamed line
    pub timeout: Duration,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

impl GeminiConfig {
    pub(crate) fn base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

/// HTTP client used for all Gemini traffic. No total timeout on the client
/// itself: streaming calls are bounded per fragment instead.
pub fn http_client(config: &GeminiConfig) -> Result<Client, reqwest::Error> {
    Client::builder().connect_timeout(config.timeout).build()
}

/// Attach the credential. The key travels in a header, never in the URL.
pub(crate) fn authorized(builder: reqwest::RequestBuilder, credential: &Credential) -> reqwest::RequestBuilder {
    builder.header("x-goog-api-key", credential.expose())
}

/// Gemini service implementation
pub struct GeminiService {
    client: Client,
    credential: Credential,
    config: GeminiConfig,
}

impl GeminiService {
    pub fn new(client: Client, credential: Credential, config: GeminiConfig) -> Self {
        Self {
            client,
            credential,
            config,
        }
    }

    fn endpoint(&self, method: &str) -> String {
        format!(
            "{}/v1beta/models/{}:{}",
            self.config.base(),
            self.config.model,
            method
        )
    }

    fn translate_request(request: &LlmRequest) -> GeminiRequest {
        let contents = request
            .messages
            .iter()
            .filter_map(|msg| {
                let role = match msg.role {
                    MessageRole::User => "user",
                    MessageRole::Assistant => "model",
                };

                let parts: Vec<GeminiPart> = msg
                    .content
                    .iter()
                    .map(|block| match block {
                        ContentBlock::Text { text } => GeminiPart::Text { text: text.clone() },
                        ContentBlock::File { uri, mime_type } => GeminiPart::FileData {
                            file_data: GeminiFileData {
                                mime_type: mime_type.clone(),
                                file_uri: uri.clone(),
                            },
                        },
                    })
                    .collect();

                (!parts.is_empty()).then(|| GeminiContent {
                    role: Some(role.to_string()),
                    parts,
                })
            })
            .collect();

        GeminiRequest {
            contents,
            generation_config: request.max_tokens.map(|max| GeminiGenerationConfig {
                max_output_tokens: Some(max),
            }),
        }
    }

    /// Pull the text out of one (possibly partial) response
    fn response_text(resp: &GeminiResponse) -> Result<String, LlmError> {
        if let Some(reason) = resp
            .prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.as_deref())
        {
            return Err(LlmError::provider(format!("Prompt blocked: {reason}")));
        }

        let Some(candidate) = resp.candidates.first() else {
            return Err(LlmError::provider("No candidates in response"));
        };
        if let Some(reason) = candidate
            .finish_reason
            .as_deref()
            .filter(|r| BLOCKED_FINISH_REASONS.contains(r))
        {
            return Err(LlmError::provider(format!(
                "Response blocked (finish reason: {reason})"
            )));
        }

        Ok(candidate
            .content
            .as_ref()
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|part| match part {
                        GeminiPart::Text { text } => Some(text.as_str()),
                        _ => None,
                    })
                    .collect::<String>()
            })
            .unwrap_or_default())
    }

    fn normalize_response(resp: &GeminiResponse) -> Result<LlmResponse, LlmError> {
        let text = Self::response_text(resp)?;
        if text.is_empty() {
            let reason = resp
                .candidates
                .first()
                .and_then(|c| c.finish_reason.clone())
                .unwrap_or_else(|| "unknown".to_string());
            return Err(LlmError::provider(format!(
                "Empty response from model (finish reason: {reason})"
            )));
        }

        let usage = resp.usage_metadata.as_ref().map_or_else(Usage::default, |u| Usage {
            input_tokens: u.prompt_token_count,
            output_tokens: u.candidates_token_count,
        });

        Ok(LlmResponse { text, usage })
    }

    async fn post(&self, url: &str, request: &LlmRequest, total_timeout: Option<Duration>) -> Result<Response, LlmError> {
        if request.messages.is_empty() {
            return Err(LlmError::invalid_request(
                "Refusing to send an empty transcript",
            ));
        }

        let mut builder = authorized(self.client.post(url), &self.credential)
            .json(&Self::translate_request(request));
        if let Some(timeout) = total_timeout {
            builder = builder.timeout(timeout);
        }

        // Streaming calls carry no total timeout, so bound the wait for headers
        let response = tokio::time::timeout(self.config.timeout, builder.send())
            .await
            .map_err(|_| {
                LlmError::network(format!(
                    "No response from model within {:?}",
                    self.config.timeout
                ))
            })?
            .map_err(|e| LlmError::from_transport(&e))?;

        if response.status().is_success() {
            Ok(response)
        } else {
            Err(error_from_response(response).await)
        }
    }
}

fn parse_stream_chunk(data: &str) -> Result<GeminiResponse, LlmError> {
    if let Ok(err) = serde_json::from_str::<GeminiErrorResponse>(data) {
        return Err(LlmError::provider(err.error.message));
    }
    serde_json::from_str(data)
        .map_err(|e| LlmError::provider(format!("Failed to parse stream chunk: {e}")))
}

/// Turn a non-2xx response into a classified error
pub(crate) async fn error_from_response(response: Response) -> LlmError {
    let status = response.status();
    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs);

    let body = match response.text().await {
        Ok(body) => body,
        Err(e) => return LlmError::network(format!("Failed to read error response: {e}")),
    };

    let mut error = classify_error(status.as_u16(), &body);
    if let Some(after) = retry_after {
        error = error.with_retry_after(after);
    }
    error
}

/// Map an HTTP status and error body to an error kind
pub(crate) fn classify_error(status: u16, body: &str) -> LlmError {
    let parsed = serde_json::from_str::<GeminiErrorResponse>(body).ok();
    let message = parsed
        .as_ref()
        .map_or_else(|| body.trim().to_string(), |e| e.error.message.clone());
    let key_invalid = parsed.as_ref().is_some_and(|e| {
        e.error
            .details
            .iter()
            .any(|d| d.reason.as_deref() == Some("API_KEY_INVALID"))
    }) || message.contains("API key not valid");

    let error = match status {
        401 | 403 => LlmError::auth(format!("Authentication failed: {message}")),
        400 if key_invalid => LlmError::auth(format!("Authentication failed: {message}")),
        _ => LlmError::provider(format!("HTTP {status}: {message}")),
    };
    error.with_status(status)
}

#[async_trait]
impl LlmService for GeminiService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let url = self.endpoint("generateContent");
        let response = self.post(&url, request, Some(self.config.timeout)).await?;

        let body = response
            .text()
            .await
            .map_err(|e| LlmError::network(format!("Failed to read response: {e}")))?;

        let gemini_response: GeminiResponse = serde_json::from_str(&body)
            .map_err(|e| LlmError::provider(format!("Failed to parse response: {e}")))?;

        Self::normalize_response(&gemini_response)
    }

    async fn stream(&self, request: &LlmRequest) -> Result<FragmentStream, LlmError> {
        let url = format!("{}?alt=sse", self.endpoint("streamGenerateContent"));
        let response = self.post(&url, request, None).await?;

        let events = sse_data_stream(response, self.config.timeout);
        let fragments = stream! {
            let mut events = Box::pin(events);
            let mut received_text = false;
            let mut finish_reason = None;

            while let Some(event) = events.next().await {
                let chunk = event.and_then(|data| parse_stream_chunk(&data));
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };
                if let Some(reason) = chunk.candidates.first().and_then(|c| c.finish_reason.clone()) {
                    finish_reason = Some(reason);
                }
                match GeminiService::response_text(&chunk) {
                    Ok(text) if text.is_empty() => {}
                    Ok(text) => {
                        received_text = true;
                        yield Ok(text);
                    }
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }

            if !received_text {
                yield Err(LlmError::provider(format!(
                    "Empty response from model (finish reason: {})",
                    finish_reason.as_deref().unwrap_or("unknown")
                )));
            }
        };

        Ok(Box::pin(fragments))
    }

    fn model_id(&self) -> &str {
        &self.config.model
    }
}

// Gemini API types

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GeminiGenerationConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
    },
    FileData {
        #[serde(rename = "fileData")]
        file_data: GeminiFileData,
    },
    /// Function calls, thoughts, inline data: nothing we render
    Other(serde_json::Value),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiFileData {
    mime_type: String,
    file_uri: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    usage_metadata: Option<GeminiUsageMetadata>,
    prompt_feedback: Option<GeminiPromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GeminiErrorResponse {
    error: GeminiError,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    message: String,
    #[serde(default)]
    details: Vec<GeminiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    reason: Option<String>,
}
