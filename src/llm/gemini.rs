use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::config::Config;
use crate::llm::error::GenerationError;
use crate::utils::http::build_http_client;
use crate::utils::timing::log_api_timing;

/// One piece of a generation request.
#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Text(String),
    InlineData { mime_type: String, data: Vec<u8> },
    FileData { mime_type: Option<String>, file_uri: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileState {
    #[default]
    StateUnspecified,
    Processing,
    Active,
    Failed,
    #[serde(other)]
    Unknown,
}

impl FileState {
    pub fn as_str(self) -> &'static str {
        match self {
            FileState::StateUnspecified => "STATE_UNSPECIFIED",
            FileState::Processing => "PROCESSING",
            FileState::Active => "ACTIVE",
            FileState::Failed => "FAILED",
            FileState::Unknown => "UNKNOWN",
        }
    }
}

/// Server-side handle for an uploaded media file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFile {
    pub name: String,
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub state: FileState,
}

/// The subset of the Gemini API the studio drives.
#[async_trait]
pub trait GenerativeApi: Send + Sync {
    fn has_credential(&self) -> bool {
        true
    }

    /// Returns the concatenated response text, `None` when the model sent none.
    async fn generate_content(
        &self,
        parts: Vec<Part>,
        timeout: Duration,
    ) -> Result<Option<String>, GenerationError>;

    async fn upload_file(
        &self,
        display_name: &str,
        mime_type: &str,
        bytes: Vec<u8>,
        timeout: Duration,
    ) -> Result<RemoteFile, GenerationError>;

    async fn get_file(&self, name: &str) -> Result<RemoteFile, GenerationError>;

    async fn delete_file(&self, name: &str) -> Result<(), GenerationError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    prompt_feedback: Option<GeminiPromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    parts: Option<Vec<GeminiResponsePart>>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiFileResponse {
    file: RemoteFile,
}

pub struct GeminiApi {
    client: Client,
    api_key: Option<String>,
    model: String,
    base_url: String,
    request_timeout: Duration,
}

impl GeminiApi {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            client: build_http_client()?,
            api_key: config.gemini_api_key.clone(),
            model: config.gemini_model.clone(),
            base_url: config.gemini_base_url.as_str().trim_end_matches('/').to_string(),
            request_timeout: config.gemini_request_timeout,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn api_key(&self) -> Result<&str, GenerationError> {
        self.api_key
            .as_deref()
            .ok_or(GenerationError::CredentialMissing)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn redact(&self, text: &str) -> String {
        match self.api_key.as_deref() {
            Some(key) if !key.is_empty() => text.replace(key, "[redacted]"),
            _ => text.to_string(),
        }
    }

    async fn send(&self, request: RequestBuilder, action: &str) -> Result<Response, GenerationError> {
        let response = request.send().await.map_err(|err| {
            let err_text = self.redact(&err.to_string());
            warn!(
                "Gemini {} request failed to send: {} (timeout={}, connect={})",
                action,
                err_text,
                err.is_timeout(),
                err.is_connect()
            );
            GenerationError::transport(format!("Gemini {} request failed: {}", action, err_text))
        })?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let (message, body_summary) = summarize_error_body(&body);
        warn!("Gemini {} error: status={}, body={}", action, status, body_summary);
        let detail = self.redact(&message.unwrap_or(body_summary));
        Err(GenerationError::transport(format!(
            "Gemini {} failed with status {}: {}",
            action, status, detail
        )))
    }

    async fn read_json<T: DeserializeOwned>(
        &self,
        response: Response,
        action: &str,
    ) -> Result<T, GenerationError> {
        response.json::<T>().await.map_err(|err| {
            GenerationError::transport(format!(
                "Gemini {} returned an unreadable response: {}",
                action,
                self.redact(&err.to_string())
            ))
        })
    }

    async fn call_generate(&self, payload: Value, timeout: Duration) -> Result<Option<String>, GenerationError> {
        let api_key = self.api_key()?;
        let url = self.endpoint(&format!("v1beta/models/{}:generateContent", self.model));

        if tracing::enabled!(tracing::Level::DEBUG) {
            debug!(target: "llm.gemini", model = %self.model, payload = %summarize_payload(&payload));
        }

        let request = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .timeout(timeout)
            .json(&payload);
        let response = self.send(request, "generateContent").await?;
        let value = self
            .read_json::<GeminiResponse>(response, "generateContent")
            .await?;

        if let Some(reason) = value
            .prompt_feedback
            .as_ref()
            .and_then(|feedback| feedback.block_reason.as_deref())
        {
            warn!("Gemini blocked the prompt: {}", reason);
        }

        Ok(extract_text_from_response(value))
    }
}

#[async_trait]
impl GenerativeApi for GeminiApi {
    fn has_credential(&self) -> bool {
        self.api_key.is_some()
    }

    async fn generate_content(
        &self,
        parts: Vec<Part>,
        timeout: Duration,
    ) -> Result<Option<String>, GenerationError> {
        let payload = json!({
            "contents": [{ "role": "user", "parts": build_gemini_parts(&parts) }],
        });
        let metadata = json!({ "parts": parts.len(), "timeout_s": timeout.as_secs() });
        log_api_timing("gemini", &self.model, "generate_content", Some(metadata), || {
            self.call_generate(payload, timeout)
        })
        .await
    }

    async fn upload_file(
        &self,
        display_name: &str,
        mime_type: &str,
        bytes: Vec<u8>,
        timeout: Duration,
    ) -> Result<RemoteFile, GenerationError> {
        let api_key = self.api_key()?;
        let metadata = json!({ "bytes": bytes.len(), "mime_type": mime_type });
        log_api_timing("gemini", &self.model, "upload_file", Some(metadata), move || async move {
            let start = self
                .client
                .post(self.endpoint("upload/v1beta/files"))
                .header("x-goog-api-key", api_key)
                .header("X-Goog-Upload-Protocol", "resumable")
                .header("X-Goog-Upload-Command", "start")
                .header("X-Goog-Upload-Header-Content-Length", bytes.len().to_string())
                .header("X-Goog-Upload-Header-Content-Type", mime_type)
                .timeout(self.request_timeout)
                .json(&json!({ "file": { "display_name": display_name } }));
            let start_response = self.send(start, "file upload start").await?;

            let upload_url = start_response
                .headers()
                .get("x-goog-upload-url")
                .and_then(|value| value.to_str().ok())
                .map(|value| value.to_string())
                .ok_or_else(|| {
                    GenerationError::transport("Gemini file upload did not return an upload URL")
                })?;

            let length = bytes.len().to_string();
            let finalize = self
                .client
                .post(upload_url)
                .header("X-Goog-Upload-Command", "upload, finalize")
                .header("X-Goog-Upload-Offset", "0")
                .header("Content-Length", length)
                .timeout(timeout)
                .body(bytes);
            let finalize_response = self.send(finalize, "file upload").await?;
            let payload = self
                .read_json::<GeminiFileResponse>(finalize_response, "file upload")
                .await?;
            Ok(payload.file)
        })
        .await
    }

    async fn get_file(&self, name: &str) -> Result<RemoteFile, GenerationError> {
        let api_key = self.api_key()?;
        let request = self
            .client
            .get(self.endpoint(&format!("v1beta/{}", file_resource_path(name))))
            .header("x-goog-api-key", api_key)
            .timeout(self.request_timeout);
        let response = self.send(request, "file metadata fetch").await?;
        // files.get answers with the bare resource; only finalize wraps it.
        self.read_json::<RemoteFile>(response, "file metadata fetch")
            .await
    }

    async fn delete_file(&self, name: &str) -> Result<(), GenerationError> {
        let api_key = self.api_key()?;
        let request = self
            .client
            .delete(self.endpoint(&format!("v1beta/{}", file_resource_path(name))))
            .header("x-goog-api-key", api_key)
            .timeout(self.request_timeout);
        self.send(request, "file delete").await?;
        Ok(())
    }
}

/// `files/abc`, whether the caller passed `abc` or `files/abc`.
fn file_resource_path(name: &str) -> String {
    let name = name.trim();
    format!("files/{}", name.strip_prefix("files/").unwrap_or(name))
}

fn build_gemini_parts(parts: &[Part]) -> Vec<Value> {
    parts
        .iter()
        .map(|part| match part {
            Part::Text(text) => json!({ "text": text }),
            Part::InlineData { mime_type, data } => json!({
                "inlineData": {
                    "mimeType": mime_type,
                    "data": general_purpose::STANDARD.encode(data),
                }
            }),
            Part::FileData {
                mime_type,
                file_uri,
            } => {
                let mut file_data = Map::new();
                file_data.insert("fileUri".to_string(), json!(file_uri));
                if let Some(mime_type) = mime_type {
                    file_data.insert("mimeType".to_string(), json!(mime_type));
                }
                json!({ "fileData": Value::Object(file_data) })
            }
        })
        .collect()
}

fn extract_text_from_response(response: GeminiResponse) -> Option<String> {
    let mut text_parts = Vec::new();
    for candidate in response.candidates.unwrap_or_default() {
        if let Some(parts) = candidate.content.and_then(|content| content.parts) {
            for text in parts.into_iter().filter_map(|part| part.text) {
                if !text.trim().is_empty() {
                    text_parts.push(text);
                }
            }
        }
        // Only the first candidate is the answer; the rest are alternatives.
        if !text_parts.is_empty() {
            break;
        }
    }

    if text_parts.is_empty() {
        None
    } else {
        Some(text_parts.join(""))
    }
}

fn truncate_for_log(value: &str, limit: usize) -> String {
    if value.chars().count() <= limit {
        return value.to_string();
    }
    let truncated: String = value.chars().take(limit).collect();
    format!("{truncated}... (truncated)")
}

fn summarize_payload(payload: &Value) -> Value {
    let parts = payload
        .pointer("/contents/0/parts")
        .and_then(|value| value.as_array())
        .map(|parts| {
            parts
                .iter()
                .map(|part| {
                    if let Some(text) = part.get("text").and_then(|value| value.as_str()) {
                        json!({ "text": truncate_for_log(text, 200) })
                    } else if let Some(inline_data) = part.get("inlineData") {
                        let data_len = inline_data
                            .get("data")
                            .and_then(|value| value.as_str())
                            .map(|value| value.len())
                            .unwrap_or(0);
                        json!({ "inlineData": { "mimeType": inline_data.get("mimeType"), "dataLen": data_len } })
                    } else if let Some(file_data) = part.get("fileData") {
                        json!({ "fileData": file_data })
                    } else {
                        json!({ "unknownPart": true })
                    }
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    json!({ "parts": parts })
}

fn summarize_error_body(body: &str) -> (Option<String>, String) {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return (None, "empty response body".to_string());
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        let message = value
            .pointer("/error/message")
            .and_then(|v| v.as_str())
            .map(|v| v.to_string())
            .or_else(|| {
                value
                    .get("message")
                    .and_then(|v| v.as_str())
                    .map(|v| v.to_string())
            });
        return (message, truncate_for_log(&value.to_string(), 2000));
    }

    (None, truncate_for_log(trimmed, 2000))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use wiremock::matchers::{body_partial_json, header, headers, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn api_for(server: &MockServer, api_key: Option<&str>) -> GeminiApi {
        let mut values = HashMap::new();
        values.insert("GEMINI_BASE_URL".to_string(), server.uri());
        if let Some(key) = api_key {
            values.insert("GOOGLE_API_KEY".to_string(), key.to_string());
        }
        let config = Config::from_lookup(&move |name| values.get(name).cloned()).unwrap();
        GeminiApi::new(&config).unwrap()
    }

    #[tokio::test]
    async fn generate_content_returns_first_candidate_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-2.5-pro:generateContent"))
            .and(header("x-goog-api-key", "test-key"))
            .and(body_partial_json(json!({
                "contents": [{ "role": "user", "parts": [{ "text": "hello world" }, { "text": "translate to French" }] }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [
                    { "content": { "parts": [{ "text": "bonjour " }, { "text": "le monde" }] } },
                    { "content": { "parts": [{ "text": "salut" }] } }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let api = api_for(&server, Some("test-key"));
        let text = api
            .generate_content(
                vec![
                    Part::Text("hello world".to_string()),
                    Part::Text("translate to French".to_string()),
                ],
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert_eq!(text.as_deref(), Some("bonjour le monde"));
    }

    #[tokio::test]
    async fn generate_content_without_text_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "promptFeedback": { "blockReason": "SAFETY" }
            })))
            .mount(&server)
            .await;

        let api = api_for(&server, Some("test-key"));
        let text = api
            .generate_content(vec![Part::Text("hi".to_string())], Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(text, None);
    }

    #[tokio::test]
    async fn error_status_becomes_transport_error_with_api_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": { "code": 400, "message": "API key test-key not valid" }
            })))
            .mount(&server)
            .await;

        let api = api_for(&server, Some("test-key"));
        let err = api
            .generate_content(vec![Part::Text("hi".to_string())], Duration::from_secs(5))
            .await
            .unwrap_err();
        let GenerationError::Transport { detail } = &err else {
            panic!("unexpected error {err:?}");
        };
        assert!(detail.contains("400"), "{detail}");
        assert!(detail.contains("API key [redacted] not valid"), "{detail}");
        assert!(!detail.contains("test-key"));
    }

    #[tokio::test]
    async fn missing_credential_fails_before_any_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let api = api_for(&server, None);
        let err = api
            .generate_content(vec![Part::Text("hi".to_string())], Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err, GenerationError::CredentialMissing);
        assert_eq!(
            api.get_file("files/abc").await.unwrap_err(),
            GenerationError::CredentialMissing
        );
    }

    #[tokio::test]
    async fn inline_data_is_base64_encoded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "contents": [{ "parts": [
                    { "inlineData": { "mimeType": "image/png", "data": "AQID" } },
                    { "text": "describe" }
                ] }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{ "content": { "parts": [{ "text": "three bytes" }] } }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let api = api_for(&server, Some("test-key"));
        let text = api
            .generate_content(
                vec![
                    Part::InlineData {
                        mime_type: "image/png".to_string(),
                        data: vec![1, 2, 3],
                    },
                    Part::Text("describe".to_string()),
                ],
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert_eq!(text.as_deref(), Some("three bytes"));
    }

    #[tokio::test]
    async fn upload_follows_the_resumable_protocol() {
        let server = MockServer::start().await;
        let session_url = format!("{}/upload-session/42", server.uri());

        Mock::given(method("POST"))
            .and(path("/upload/v1beta/files"))
            .and(header("X-Goog-Upload-Command", "start"))
            .and(header("X-Goog-Upload-Header-Content-Type", "video/mp4"))
            .and(header("X-Goog-Upload-Header-Content-Length", "4"))
            .respond_with(ResponseTemplate::new(200).insert_header("x-goog-upload-url", session_url.as_str()))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/upload-session/42"))
            .and(headers("X-Goog-Upload-Command", vec!["upload", "finalize"]))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "file": {
                    "name": "files/abc",
                    "uri": "https://example.invalid/files/abc",
                    "mimeType": "video/mp4",
                    "state": "PROCESSING"
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let api = api_for(&server, Some("test-key"));
        let file = api
            .upload_file("clip.mp4", "video/mp4", b"abcd".to_vec(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(file.name, "files/abc");
        assert_eq!(file.state, FileState::Processing);
        assert_eq!(file.mime_type.as_deref(), Some("video/mp4"));
    }

    #[tokio::test]
    async fn upload_without_session_url_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload/v1beta/files"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let api = api_for(&server, Some("test-key"));
        let err = api
            .upload_file("clip.mp4", "video/mp4", b"abcd".to_vec(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "transport_error");
    }

    #[tokio::test]
    async fn get_and_delete_address_the_file_resource() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1beta/files/abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "files/abc",
                "uri": "u",
                "state": "ACTIVE"
            })))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/v1beta/files/abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let api = api_for(&server, Some("test-key"));
        assert_eq!(api.get_file("files/abc").await.unwrap().state, FileState::Active);
        assert_eq!(api.get_file("abc").await.unwrap().state, FileState::Active);
        api.delete_file("files/abc").await.unwrap();
    }

    #[tokio::test]
    async fn polling_reads_the_bare_file_resource() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1beta/files/clip"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "files/clip",
                "uri": "https://example.invalid/files/clip",
                "mimeType": "video/mp4",
                "state": "PROCESSING"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let api = api_for(&server, Some("test-key"));
        let file = api.get_file("files/clip").await.unwrap();
        assert_eq!(file.name, "files/clip");
        assert_eq!(file.uri, "https://example.invalid/files/clip");
        assert_eq!(file.state, FileState::Processing);
        assert_eq!(file.mime_type.as_deref(), Some("video/mp4"));
    }

    #[test]
    fn unknown_and_missing_states_deserialize() {
        let file: RemoteFile = serde_json::from_value(json!({ "name": "files/x" })).unwrap();
        assert_eq!(file.state, FileState::StateUnspecified);
        let file: RemoteFile =
            serde_json::from_value(json!({ "name": "files/x", "state": "ARCHIVED" })).unwrap();
        assert_eq!(file.state, FileState::Unknown);
    }
}
