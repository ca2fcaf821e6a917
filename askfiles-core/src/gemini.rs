//! HTTP client for the Gemini REST API
//!
//! Covers the Files API (resumable upload, list, get, delete) and
//! `generateContent`. Everything askfiles needs from upstream goes through
//! the [`GenerativeBackend`] trait so the assistant and the server can run
//! against a fake in tests.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::GeminiConfig;
use crate::error::{Error, Result};
use crate::types::{normalize_file_ref, ChatTurn, FilePage, FilePart, FileState, RemoteFile};

const API_VERSION: &str = "v1beta";

/// Upstream operations used by askfiles
#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    /// Store `bytes` and wait until the file leaves the `PROCESSING` state.
    async fn upload_file(
        &self,
        bytes: Vec<u8>,
        display_name: &str,
        mime_type: &str,
    ) -> Result<RemoteFile>;

    async fn list_files(&self, page_size: Option<u32>, page_token: Option<&str>)
        -> Result<FilePage>;

    async fn get_file(&self, file_id: &str) -> Result<RemoteFile>;

    async fn delete_file(&self, file_id: &str) -> Result<()>;

    /// Generate an answer to `question` with `files` as context.
    ///
    /// A non-empty `history` is sent ahead of the question as prior turns.
    async fn generate(
        &self,
        model: &str,
        files: &[FilePart],
        question: &str,
        history: &[ChatTurn],
    ) -> Result<String>;

    /// Walk every page of the file listing.
    async fn list_all_files(&self) -> Result<Vec<RemoteFile>> {
        let mut files = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = self.list_files(None, token.as_deref()).await?;
            files.extend(page.files);
            match page.next_page_token {
                Some(next) if !next.is_empty() => token = Some(next),
                _ => return Ok(files),
            }
        }
    }
}

/// Gemini REST client authenticated with one API key
pub struct GeminiClient {
    http_client: reqwest::Client,
    base_url: String,
    poll_interval: Duration,
}

impl GeminiClient {
    /// Create a client for `api_key`
    ///
    /// Returns an error if the key cannot be sent as a header or the
    /// configuration is invalid.
    pub fn new(api_key: &str, config: &GeminiConfig) -> Result<Self> {
        config.validate()?;
        if api_key.trim().is_empty() {
            return Err(Error::NotConfigured);
        }

        // Header auth keeps the key out of URLs and logs
        let mut headers = HeaderMap::new();
        let mut key = HeaderValue::from_str(api_key.trim())
            .map_err(|e| Error::Config(format!("invalid api_key: {}", e)))?;
        key.set_sensitive(true);
        headers.insert("x-goog-api-key", key);

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: config.endpoint.trim_end_matches('/').to_string(),
            poll_interval: Duration::from_secs(config.upload_poll_secs),
        })
    }

    fn file_url(&self, file_id: &str) -> String {
        format!(
            "{}/{}/files/{}",
            self.base_url,
            API_VERSION,
            urlencoding::encode(&normalize_file_ref(file_id))
        )
    }

    async fn start_upload(&self, size: usize, display_name: &str, mime_type: &str) -> Result<String> {
        let url = format!("{}/upload/{}/files", self.base_url, API_VERSION);
        let response = self
            .http_client
            .post(&url)
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", size.to_string())
            .header("X-Goog-Upload-Header-Content-Type", mime_type)
            .json(&json!({ "file": { "display_name": display_name } }))
            .send()
            .await?;
        let response = ensure_success(response).await?;

        response
            .headers()
            .get("x-goog-upload-url")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| Error::Upstream {
                status: None,
                message: "upload session did not return an upload URL".to_string(),
            })
    }
}

#[async_trait]
impl GenerativeBackend for GeminiClient {
    async fn upload_file(
        &self,
        bytes: Vec<u8>,
        display_name: &str,
        mime_type: &str,
    ) -> Result<RemoteFile> {
        let upload_url = self
            .start_upload(bytes.len(), display_name, mime_type)
            .await?;

        let response = self
            .http_client
            .post(&upload_url)
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(bytes)
            .send()
            .await?;
        let uploaded: UploadResponse = ensure_success(response).await?.json().await?;

        let mut file = RemoteFile::from(uploaded.file);
        tracing::info!(file_id = %file.id, display_name, "Upload finished, waiting for processing");

        while file.state == FileState::Processing {
            tokio::time::sleep(self.poll_interval).await;
            file = self.get_file(&file.id).await?;
        }

        if file.state == FileState::Failed {
            return Err(Error::Upstream {
                status: None,
                message: format!("processing failed for file {}", file.id),
            });
        }
        Ok(file)
    }

    async fn list_files(
        &self,
        page_size: Option<u32>,
        page_token: Option<&str>,
    ) -> Result<FilePage> {
        let mut url = format!("{}/{}/files", self.base_url, API_VERSION);
        let mut query = Vec::new();
        if let Some(size) = page_size {
            query.push(format!("pageSize={}", size));
        }
        if let Some(token) = page_token {
            query.push(format!("pageToken={}", urlencoding::encode(token)));
        }
        if !query.is_empty() {
            url.push('?');
            url.push_str(&query.join("&"));
        }

        let response = self.http_client.get(&url).send().await?;
        let listing: ListFilesResponse = ensure_success(response).await?.json().await?;

        Ok(FilePage {
            files: listing.files.into_iter().map(RemoteFile::from).collect(),
            next_page_token: listing.next_page_token.filter(|t| !t.is_empty()),
        })
    }

    async fn get_file(&self, file_id: &str) -> Result<RemoteFile> {
        let response = self.http_client.get(self.file_url(file_id)).send().await?;
        let file: WireFile = ensure_success(response).await?.json().await?;
        Ok(file.into())
    }

    async fn delete_file(&self, file_id: &str) -> Result<()> {
        let response = self
            .http_client
            .delete(self.file_url(file_id))
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn generate(
        &self,
        model: &str,
        files: &[FilePart],
        question: &str,
        history: &[ChatTurn],
    ) -> Result<String> {
        let url = format!(
            "{}/{}/models/{}:generateContent",
            self.base_url, API_VERSION, model
        );
        let body = build_generate_body(files, question, history);

        tracing::debug!(model, files = files.len(), turns = history.len(), "Calling generateContent");

        let response = self.http_client.post(&url).json(&body).send().await?;
        let data: Value = ensure_success(response).await?.json().await?;
        extract_text(&data)
    }
}

/// Turn a non-2xx response into [`Error::Upstream`]
async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "unknown".to_string());
    tracing::debug!(status = %status, "Gemini API error: {}", body);
    Err(Error::upstream(status, &body))
}

fn build_generate_body(files: &[FilePart], question: &str, history: &[ChatTurn]) -> Value {
    let mut contents: Vec<Value> = history
        .iter()
        .map(|turn| {
            json!({
                "role": turn.role.as_str(),
                "parts": [{ "text": turn.parts }]
            })
        })
        .collect();

    let mut parts: Vec<Value> = files
        .iter()
        .map(|file| {
            json!({
                "fileData": {
                    "mimeType": file.mime_type,
                    "fileUri": file.file_uri
                }
            })
        })
        .collect();
    parts.push(json!({ "text": question }));

    contents.push(json!({ "role": "user", "parts": parts }));
    json!({ "contents": contents })
}

/// Concatenate the text parts of the first candidate, skipping thoughts.
fn extract_text(data: &Value) -> Result<String> {
    let Some(candidate) = data["candidates"].get(0) else {
        let reason = data["promptFeedback"]["blockReason"]
            .as_str()
            .unwrap_or("no candidates returned");
        return Err(Error::Upstream {
            status: None,
            message: format!("no answer generated ({})", reason),
        });
    };

    let text: String = candidate["content"]["parts"]
        .as_array()
        .map(|parts| {
            parts
                .iter()
                .filter(|part| !part["thought"].as_bool().unwrap_or(false))
                .filter_map(|part| part["text"].as_str())
                .collect()
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        let finish_reason = candidate["finishReason"].as_str().unwrap_or("unknown");
        return Err(Error::Upstream {
            status: None,
            message: format!("empty response (finishReason={})", finish_reason),
        });
    }
    Ok(text)
}

/// File resource as returned by the Files API
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireFile {
    name: String,
    display_name: Option<String>,
    mime_type: Option<String>,
    /// int64 fields arrive as JSON strings
    size_bytes: Option<String>,
    #[serde(default)]
    state: FileState,
    create_time: Option<String>,
    update_time: Option<String>,
    uri: Option<String>,
}

impl From<WireFile> for RemoteFile {
    fn from(file: WireFile) -> Self {
        RemoteFile {
            id: normalize_file_ref(&file.name),
            size_bytes: file.size_bytes.and_then(|s| s.parse().ok()),
            name: file.name,
            display_name: file.display_name,
            mime_type: file.mime_type,
            state: file.state,
            create_time: file.create_time,
            update_time: file.update_time,
            uri: file.uri,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListFilesResponse {
    #[serde(default)]
    files: Vec<WireFile>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    file: WireFile,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TurnRole;

    #[test]
    fn test_client_requires_key() {
        assert!(GeminiClient::new("", &GeminiConfig::default()).is_err());
        assert!(GeminiClient::new("AIza-test", &GeminiConfig::default()).is_ok());
    }

    #[test]
    fn test_file_url_normalizes_reference() {
        let client = GeminiClient::new("AIza-test", &GeminiConfig::default()).unwrap();
        assert_eq!(
            client.file_url("files/abc123"),
            "https://generativelanguage.googleapis.com/v1beta/files/abc123"
        );
    }

    #[test]
    fn test_wire_file_conversion() {
        let wire: WireFile = serde_json::from_value(json!({
            "name": "files/abc123",
            "displayName": "report.pdf",
            "mimeType": "application/pdf",
            "sizeBytes": "2048",
            "state": "ACTIVE",
            "uri": "https://generativelanguage.googleapis.com/v1beta/files/abc123"
        }))
        .unwrap();
        let file = RemoteFile::from(wire);
        assert_eq!(file.id, "abc123");
        assert_eq!(file.size_bytes, Some(2048));
        assert_eq!(file.state, FileState::Active);
    }

    #[test]
    fn test_generate_body_places_history_before_question() {
        let files = [FilePart {
            file_uri: "https://example.test/files/a".into(),
            mime_type: "application/pdf".into(),
        }];
        let history = [
            ChatTurn {
                role: TurnRole::User,
                parts: "hi".into(),
            },
            ChatTurn {
                role: TurnRole::Model,
                parts: "hello".into(),
            },
        ];
        let body = build_generate_body(&files, "what is this?", &history);
        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[1]["role"], "model");
        let last = &contents[2];
        assert_eq!(last["role"], "user");
        assert_eq!(last["parts"][0]["fileData"]["mimeType"], "application/pdf");
        assert_eq!(last["parts"][1]["text"], "what is this?");
    }

    #[test]
    fn test_extract_text_skips_thoughts() {
        let data = json!({
            "candidates": [{
                "content": {"parts": [
                    {"text": "thinking...", "thought": true},
                    {"text": "The answer"},
                    {"text": " is 42."}
                ]},
                "finishReason": "STOP"
            }]
        });
        assert_eq!(extract_text(&data).unwrap(), "The answer is 42.");
    }

    #[test]
    fn test_extract_text_errors() {
        let blocked = json!({"promptFeedback": {"blockReason": "SAFETY"}});
        assert!(extract_text(&blocked).unwrap_err().to_string().contains("SAFETY"));

        let empty = json!({"candidates": [{"content": {"parts": []}, "finishReason": "MAX_TOKENS"}]});
        assert!(extract_text(&empty)
            .unwrap_err()
            .to_string()
            .contains("MAX_TOKENS"));
    }
}
