//! Gemini File API: upload, poll until usable, delete

use super::gemini::{authorized, error_from_response, GeminiConfig};
use super::types::{DocumentRef, DocumentUpload};
use super::{DocumentService, LlmError};
use crate::secrets::Credential;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const MAX_STATE_POLLS: u32 = 30;

pub struct GeminiFiles {
    client: Client,
    credential: Credential,
    config: GeminiConfig,
    poll_interval: Duration,
}

impl GeminiFiles {
    pub fn new(client: Client, credential: Credential, config: GeminiConfig) -> Self {
        Self {
            client,
            credential,
            config,
            poll_interval: Duration::from_secs(1),
        }
    }

    #[cfg(test)]
    fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Step one of the resumable protocol: announce the upload, get its URL
    async fn start_upload(&self, upload: &DocumentUpload) -> Result<String, LlmError> {
        let url = format!("{}/upload/v1beta/files", self.config.base());
        let response = authorized(self.client.post(&url), &self.credential)
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", upload.bytes.len())
            .header("X-Goog-Upload-Header-Content-Type", &upload.mime_type)
            .json(&json!({ "file": { "display_name": upload.file_name } }))
            .timeout(self.config.timeout)
            .send()
            .await
            .map_err(|e| LlmError::from_transport(&e))?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        response
            .headers()
            .get("x-goog-upload-url")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| LlmError::provider("Upload start response had no upload URL"))
    }

    async fn get_file(&self, name: &str) -> Result<FileResource, LlmError> {
        let url = format!("{}/v1beta/{}", self.config.base(), name);
        let response = authorized(self.client.get(&url), &self.credential)
            .timeout(self.config.timeout)
            .send()
            .await
            .map_err(|e| LlmError::from_transport(&e))?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        response
            .json()
            .await
            .map_err(|e| LlmError::provider(format!("Failed to parse file metadata: {e}")))
    }

    /// Documents such as PDFs are processed before they can be referenced
    async fn wait_until_active(&self, mut file: FileResource) -> Result<FileResource, LlmError> {
        for _ in 0..MAX_STATE_POLLS {
            match file.state.as_deref() {
                Some("PROCESSING") => {
                    tracing::debug!(file = %file.name, "File still processing");
                    tokio::time::sleep(self.poll_interval).await;
                    file = self.get_file(&file.name).await?;
                }
                Some("FAILED") => {
                    return Err(LlmError::provider(format!(
                        "Provider failed to process {}",
                        file.display_name.as_deref().unwrap_or(&file.name)
                    )));
                }
                _ => return Ok(file),
            }
        }
        Err(LlmError::network(format!(
            "File {} was still processing after {MAX_STATE_POLLS} checks",
            file.name
        )))
    }
}

#[async_trait]
impl DocumentService for GeminiFiles {
    async fn upload(&self, upload: &DocumentUpload) -> Result<DocumentRef, LlmError> {
        let upload_url = self.start_upload(upload).await?;

        let response = self
            .client
            .post(&upload_url)
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(upload.bytes.clone())
            .timeout(self.config.timeout)
            .send()
            .await
            .map_err(|e| LlmError::from_transport(&e))?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let uploaded: UploadResponse = response
            .json()
            .await
            .map_err(|e| LlmError::provider(format!("Failed to parse upload response: {e}")))?;

        let file = self.wait_until_active(uploaded.file).await?;

        Ok(DocumentRef {
            uri: file.uri,
            mime_type: file.mime_type.unwrap_or_else(|| upload.mime_type.clone()),
            display_name: file
                .display_name
                .unwrap_or_else(|| upload.file_name.clone()),
            size_bytes: upload.bytes.len() as u64,
            name: file.name,
            uploaded_at: Utc::now(),
        })
    }

    async fn delete(&self, document: &DocumentRef) -> Result<(), LlmError> {
        let url = format!("{}/v1beta/{}", self.config.base(), document.name);
        let response = authorized(self.client.delete(&url), &self.credential)
            .timeout(self.config.timeout)
            .send()
            .await
            .map_err(|e| LlmError::from_transport(&e))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(error_from_response(response).await)
        }
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    file: FileResource,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileResource {
    name: String,
    uri: String,
    mime_type: Option<String>,
    display_name: Option<String>,
    state: Option<String>,
}
